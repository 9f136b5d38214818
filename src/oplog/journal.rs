use super::record::{
    BeginEntry, FinishEntry, JournalEntry, OperationRecord, OperationResult, StateSnapshot,
};
use crate::errors::{GsError, Result};
use crate::store::{MetadataStore, OPLOG_FILE};
use chrono::Utc;
use std::collections::HashMap;
use std::fs;
use tracing::{debug, warn};
use uuid::Uuid;

/// Append-only operation journal (`oplog.jsonl`)
pub struct Journal<'a> {
    store: &'a MetadataStore,
}

impl<'a> Journal<'a> {
    pub fn new(store: &'a MetadataStore) -> Self {
        Self { store }
    }

    fn append(&self, entry: &JournalEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        // Never glue a new entry onto a torn one
        let torn_tail = fs::read(self.store.path(OPLOG_FILE))
            .map(|bytes| bytes.last().is_some_and(|last| *last != b'\n'))
            .unwrap_or(false);
        if torn_tail {
            line.insert(0, '\n');
        }
        self.store.append_line(OPLOG_FILE, &line)
    }

    pub fn begin(&self, entry: BeginEntry) -> Result<()> {
        debug!("Operation {} started: {}", entry.id, entry.kind);
        self.append(&JournalEntry::Begin(entry))
    }

    /// Finalize an operation. A record is finalized exactly once.
    pub fn finish(
        &self,
        id: Uuid,
        result: OperationResult,
        post: Option<StateSnapshot>,
    ) -> Result<()> {
        let record = self
            .load()?
            .into_iter()
            .find(|record| record.id() == id)
            .ok_or_else(|| GsError::OperationNotFound(id.to_string()))?;
        if record.is_finished() {
            return Err(GsError::validation(format!(
                "Operation {id} is already finalized"
            )));
        }

        debug!("Operation {} finished: {}", id, result);
        self.append(&JournalEntry::Finish(FinishEntry {
            id,
            finished_at: Utc::now(),
            result,
            post,
        }))
    }

    /// Every operation, oldest first
    pub fn load(&self) -> Result<Vec<OperationRecord>> {
        let path = self.store.path(OPLOG_FILE);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records: Vec<OperationRecord> = Vec::new();
        let mut index: HashMap<Uuid, usize> = HashMap::new();

        for (number, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: JournalEntry = match serde_json::from_str(line) {
                Ok(entry) => entry,
                Err(e) => {
                    // Only a crash mid-append produces these
                    warn!(
                        "Ignoring torn line {} in {}: {}",
                        number + 1,
                        path.display(),
                        e
                    );
                    continue;
                }
            };

            match entry {
                JournalEntry::Begin(begin) => {
                    index.insert(begin.id, records.len());
                    records.push(OperationRecord {
                        begin,
                        finish: None,
                    });
                }
                JournalEntry::Finish(finish) => match index.get(&finish.id) {
                    Some(&position) if records[position].finish.is_none() => {
                        records[position].finish = Some(finish);
                    }
                    Some(_) => warn!("Ignoring second finish entry for {}", finish.id),
                    None => warn!("Ignoring finish entry for unknown operation {}", finish.id),
                },
            }
        }

        Ok(records)
    }

    /// Operations that started but never reached a terminal status
    pub fn interrupted(&self) -> Result<Vec<OperationRecord>> {
        Ok(self
            .load()?
            .into_iter()
            .filter(|record| !record.is_finished())
            .collect())
    }

    /// Close every dangling operation as interrupted. Callers hold the
    /// repository lock, so nothing else can still be running them.
    pub fn close_interrupted(&self) -> Result<Vec<Uuid>> {
        let dangling = self.interrupted()?;
        let mut closed = Vec::new();
        for record in dangling {
            warn!(
                "Operation {} ({}) was interrupted; marking it as such",
                record.id(),
                record.begin.kind
            );
            self.append(&JournalEntry::Finish(FinishEntry {
                id: record.id(),
                finished_at: Utc::now(),
                result: OperationResult::Interrupted,
                post: None,
            }))?;
            closed.push(record.id());
        }
        Ok(closed)
    }

    /// Look an operation up by full id or unique prefix
    pub fn find(&self, id: &str) -> Result<OperationRecord> {
        let mut matches: Vec<OperationRecord> = self
            .load()?
            .into_iter()
            .filter(|record| record.id().to_string().starts_with(id))
            .collect();

        match matches.len() {
            0 => Err(GsError::OperationNotFound(id.to_string())),
            1 => Ok(matches.remove(0)),
            n => Err(GsError::validation(format!(
                "Operation id '{id}' is ambiguous ({n} matches)"
            ))),
        }
    }

    /// Most recent finalized operation
    pub fn last_finished(&self) -> Result<Option<OperationRecord>> {
        Ok(self
            .load()?
            .into_iter()
            .rev()
            .find(|record| record.is_finished()))
    }
}
