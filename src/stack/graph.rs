//! Stack Graph Store: branch topology persisted as `stack.json`.
//!
//! The graph is a forest of linear chains rooted at trunk. Parent links
//! are by name; removing a branch leaves its descendants pointing at a
//! name that no longer exists, marked orphaned until they are pruned.

use super::branch::{BranchNode, BranchStatus};
use crate::errors::{GsError, Result, TopologyError};
use crate::store::{MetadataStore, STACK_FILE};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

pub const GRAPH_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackGraph {
    pub version: u32,
    /// Branch every chain is ultimately rebased onto
    pub trunk: String,
    pub branches: BTreeMap<String, BranchNode>,
}

impl StackGraph {
    pub fn new<S: Into<String>>(trunk: S) -> Self {
        Self {
            version: GRAPH_VERSION,
            trunk: trunk.into(),
            branches: BTreeMap::new(),
        }
    }

    /// Load and validate the graph
    pub fn load(store: &MetadataStore) -> Result<Self> {
        let graph: StackGraph = store.read_json(STACK_FILE)?.ok_or_else(|| {
            GsError::not_initialized(
                "Repository is not initialized for ghoststack. Run `gs init` first.",
            )
        })?;
        graph.validate()?;
        debug!("Loaded stack graph with {} branch(es)", graph.branches.len());
        Ok(graph)
    }

    /// Replace the persisted graph atomically
    pub fn save(&self, store: &MetadataStore) -> Result<()> {
        store.write_json(STACK_FILE, self)
    }

    pub fn get(&self, name: &str) -> Option<&BranchNode> {
        self.branches.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut BranchNode> {
        self.branches.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.branches.contains_key(name)
    }

    pub fn is_trunk(&self, name: &str) -> bool {
        self.trunk == name
    }

    /// Live children of a branch (or of trunk), sorted by name
    pub fn children(&self, parent: &str) -> Vec<&BranchNode> {
        self.branches
            .values()
            .filter(|node| node.parent == parent && !node.is_orphaned())
            .collect()
    }

    /// The single live child of a tracked branch
    pub fn child(&self, parent: &str) -> Option<&BranchNode> {
        self.children(parent).into_iter().next()
    }

    pub fn orphans(&self) -> Vec<&BranchNode> {
        self.branches
            .values()
            .filter(|node| node.is_orphaned())
            .collect()
    }

    /// Reject an add before anything is written
    pub fn check_add(&self, name: &str, parent: &str) -> std::result::Result<(), TopologyError> {
        let invalid = |reason: &str| TopologyError::InvalidParent {
            name: name.to_string(),
            parent: parent.to_string(),
            reason: reason.to_string(),
        };

        if self.is_trunk(name) || self.contains(name) {
            return Err(TopologyError::DuplicateName(name.to_string()));
        }
        if name == parent {
            return Err(invalid("a branch cannot be its own parent"));
        }
        if self.is_trunk(parent) {
            return Ok(());
        }

        let parent_node = self
            .get(parent)
            .ok_or_else(|| invalid("parent is not tracked; add it to the stack first"))?;
        if parent_node.is_orphaned() {
            return Err(invalid("parent is orphaned"));
        }
        if self.ancestors(parent).iter().any(|ancestor| ancestor == name) {
            return Err(invalid("would create a cycle"));
        }
        if let Some(existing) = self.child(parent) {
            return Err(invalid(&format!(
                "it already has child '{}'; stacks are linear chains",
                existing.name
            )));
        }
        Ok(())
    }

    pub fn add(&mut self, node: BranchNode) -> std::result::Result<(), TopologyError> {
        self.check_add(&node.name, &node.parent)?;
        debug!("Tracking '{}' on '{}'", node.name, node.parent);
        self.branches.insert(node.name.clone(), node);
        Ok(())
    }

    /// Untrack a branch; every descendant becomes orphaned. Returns the
    /// removed node and the names of the orphaned descendants.
    pub fn remove(
        &mut self,
        name: &str,
    ) -> std::result::Result<(BranchNode, Vec<String>), TopologyError> {
        let descendants = self.descendants(name);
        let removed = self
            .branches
            .remove(name)
            .ok_or_else(|| TopologyError::Untracked(name.to_string()))?;

        for descendant in &descendants {
            if let Some(node) = self.branches.get_mut(descendant) {
                node.set_status(BranchStatus::Orphaned);
            }
        }

        debug!("Untracked '{}', orphaned {:?}", name, descendants);
        Ok((removed, descendants))
    }

    pub fn check_prune(&self, name: &str) -> std::result::Result<(), TopologyError> {
        match self.get(name) {
            None => Err(TopologyError::Untracked(name.to_string())),
            Some(node) if !node.is_orphaned() => Err(TopologyError::NotOrphaned(name.to_string())),
            Some(_) => Ok(()),
        }
    }

    /// Delete an orphaned node
    pub fn prune(&mut self, name: &str) -> std::result::Result<BranchNode, TopologyError> {
        self.check_prune(name)?;
        self.branches
            .remove(name)
            .ok_or_else(|| TopologyError::Untracked(name.to_string()))
    }

    /// Every node reachable through parent links, orphans included
    pub fn descendants(&self, name: &str) -> Vec<String> {
        let mut found = BTreeSet::new();
        let mut frontier = vec![name.to_string()];
        while let Some(current) = frontier.pop() {
            for node in self.branches.values() {
                if node.parent == current && node.name != name && found.insert(node.name.clone()) {
                    frontier.push(node.name.clone());
                }
            }
        }
        found.into_iter().collect()
    }

    /// Parent names from `name` upward, stopping at trunk or a dangling link
    fn ancestors(&self, name: &str) -> Vec<String> {
        let mut ancestors = Vec::new();
        let mut seen = BTreeSet::new();
        let mut current = self.get(name);
        while let Some(node) = current {
            if !seen.insert(node.name.as_str()) {
                break;
            }
            ancestors.push(node.parent.clone());
            current = self.get(&node.parent);
        }
        ancestors
    }

    /// Ordered path from trunk to `name`, both ends included
    pub fn get_chain(&self, name: &str) -> std::result::Result<Vec<String>, TopologyError> {
        let node = self
            .get(name)
            .ok_or_else(|| TopologyError::Untracked(name.to_string()))?;
        if node.is_orphaned() {
            return Err(TopologyError::Orphaned(name.to_string()));
        }

        let mut chain = vec![name.to_string()];
        chain.extend(self.ancestors(name));
        chain.reverse();

        if chain.first().map(String::as_str) != Some(self.trunk.as_str()) {
            return Err(TopologyError::Corrupt(format!(
                "'{}' does not lead back to trunk '{}'",
                name, self.trunk
            )));
        }
        Ok(chain)
    }

    /// Every live chain, each ordered trunk-side first; chains sorted by
    /// the name of their root branch
    pub fn walk_order(&self) -> Vec<Vec<String>> {
        self.children(&self.trunk)
            .into_iter()
            .map(|root| {
                let mut chain = vec![root.name.clone()];
                let mut seen: BTreeSet<&str> = BTreeSet::from([root.name.as_str()]);
                while let Some(next) = chain.last().and_then(|last| self.child(last)) {
                    if !seen.insert(next.name.as_str()) {
                        break;
                    }
                    chain.push(next.name.clone());
                }
                chain
            })
            .collect()
    }

    /// Stored status, or `needs-restack` when the parent tip moved past the base
    pub fn derived_status(&self, node: &BranchNode, parent_tip: Option<&str>) -> BranchStatus {
        match (node.status, parent_tip) {
            (BranchStatus::Clean, Some(tip)) if tip != node.base => BranchStatus::NeedsRestack,
            (status, _) => status,
        }
    }

    /// Put a node back exactly as captured, or drop it when it was absent
    pub fn restore_node(&mut self, name: &str, node: Option<BranchNode>) {
        match node {
            Some(node) => {
                self.branches.insert(name.to_string(), node);
            }
            None => {
                self.branches.remove(name);
            }
        }
    }

    /// Structural checks run on every load
    pub fn validate(&self) -> std::result::Result<(), TopologyError> {
        if self.contains(&self.trunk) {
            return Err(TopologyError::Corrupt(format!(
                "trunk '{}' is tracked as a stack branch",
                self.trunk
            )));
        }

        let mut live_children: BTreeMap<&str, usize> = BTreeMap::new();
        for (key, node) in &self.branches {
            if key != &node.name {
                return Err(TopologyError::Corrupt(format!(
                    "entry '{}' holds branch '{}'",
                    key, node.name
                )));
            }
            if node.is_orphaned() {
                continue;
            }

            if !self.is_trunk(&node.parent) {
                match self.get(&node.parent) {
                    None => {
                        return Err(TopologyError::Corrupt(format!(
                            "'{}' points at missing parent '{}'",
                            node.name, node.parent
                        )))
                    }
                    Some(parent) if parent.is_orphaned() => {
                        return Err(TopologyError::Corrupt(format!(
                            "'{}' is live but its parent '{}' is orphaned",
                            node.name, node.parent
                        )))
                    }
                    Some(_) => {
                        let count = live_children.entry(node.parent.as_str()).or_default();
                        *count += 1;
                        if *count > 1 {
                            return Err(TopologyError::Corrupt(format!(
                                "'{}' has more than one child",
                                node.parent
                            )));
                        }
                    }
                }
            }

            // Walking up must reach trunk without revisiting a node
            let mut seen = BTreeSet::from([node.name.as_str()]);
            let mut current = node;
            while !self.is_trunk(&current.parent) {
                let Some(parent) = self.get(&current.parent) else {
                    break;
                };
                if !seen.insert(parent.name.as_str()) {
                    return Err(TopologyError::Corrupt(format!(
                        "cycle through '{}'",
                        node.name
                    )));
                }
                current = parent;
            }
        }
        Ok(())
    }
}
