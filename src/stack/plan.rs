//! Batch planning for a completed branch replay.
//!
//! No I/O happens here. Given the graph, the live ref tips and the replay
//! result for one branch, compute every branch marker that moves as a
//! consequence. The sync orchestrator persists the plan before applying it.

use super::graph::StackGraph;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// One branch marker move
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchUpdate {
    pub branch: String,
    /// Tip before the replay
    pub old_tip: String,
    pub new_base: String,
    pub new_tip: String,
}

/// Every update produced by one replay, replayed branch first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPlan {
    pub updates: Vec<BranchUpdate>,
}

impl BatchPlan {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn branches(&self) -> impl Iterator<Item = &str> {
        self.updates.iter().map(|u| u.branch.as_str())
    }
}

/// The replay of a single branch, as reported by the VCS
#[derive(Debug, Clone)]
pub struct Replay<'a> {
    pub branch: &'a str,
    /// Parent tip the branch was replayed onto
    pub onto: &'a str,
    pub old_tip: &'a str,
    pub new_tip: &'a str,
    /// Old commit -> new commit for every replayed commit
    pub rewritten: &'a [(String, String)],
}

/// Create the batch for one replay (PURE)
///
/// Descendants follow along only while both their base and their tip are
/// commits the replay rewrote, i.e. they have no commits of their own on
/// top. The first descendant with its own commits stops the cascade; the
/// walk rebases it in its own step.
pub fn plan_batch(
    graph: &StackGraph,
    ref_tips: &BTreeMap<String, String>,
    replay: &Replay<'_>,
) -> BatchPlan {
    let mut mapping: HashMap<&str, &str> = replay
        .rewritten
        .iter()
        .map(|(old, new)| (old.as_str(), new.as_str()))
        .collect();
    mapping.insert(replay.old_tip, replay.new_tip);

    let mut updates = vec![BranchUpdate {
        branch: replay.branch.to_string(),
        old_tip: replay.old_tip.to_string(),
        new_base: replay.onto.to_string(),
        new_tip: replay.new_tip.to_string(),
    }];

    let mut current = replay.branch;
    while let Some(child) = graph.child(current) {
        let tip = ref_tips
            .get(&child.name)
            .map(String::as_str)
            .unwrap_or(child.tip.as_str());

        match (mapping.get(child.base.as_str()), mapping.get(tip)) {
            (Some(new_base), Some(new_tip)) => updates.push(BranchUpdate {
                branch: child.name.clone(),
                old_tip: tip.to_string(),
                new_base: (*new_base).to_string(),
                new_tip: (*new_tip).to_string(),
            }),
            _ => break,
        }
        current = child.name.as_str();
    }

    BatchPlan { updates }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::branch::BranchNode;

    fn node(name: &str, parent: &str, base: &str, tip: &str) -> BranchNode {
        BranchNode::new(name.into(), parent.into(), base.into(), tip.into())
    }

    fn rewritten(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(old, new)| (old.to_string(), new.to_string()))
            .collect()
    }

    #[test]
    fn test_single_branch() {
        let mut graph = StackGraph::new("main");
        graph.add(node("a", "main", "m0", "a1")).unwrap();
        let pairs = rewritten(&[("a1", "a1'")]);

        let plan = plan_batch(
            &graph,
            &BTreeMap::new(),
            &Replay {
                branch: "a",
                onto: "m1",
                old_tip: "a1",
                new_tip: "a1'",
                rewritten: &pairs,
            },
        );

        assert_eq!(
            plan.updates,
            vec![BranchUpdate {
                branch: "a".into(),
                old_tip: "a1".into(),
                new_base: "m1".into(),
                new_tip: "a1'".into(),
            }]
        );
    }

    #[test]
    fn test_empty_descendants_move_with_parent() {
        let mut graph = StackGraph::new("main");
        graph.add(node("a", "main", "m0", "a1")).unwrap();
        graph.add(node("b", "a", "a1", "a1")).unwrap();
        graph.add(node("c", "b", "a1", "a1")).unwrap();
        let pairs = rewritten(&[("a1", "a1'")]);

        let plan = plan_batch(
            &graph,
            &BTreeMap::new(),
            &Replay {
                branch: "a",
                onto: "m1",
                old_tip: "a1",
                new_tip: "a1'",
                rewritten: &pairs,
            },
        );

        let moved: Vec<&str> = plan.branches().collect();
        assert_eq!(moved, vec!["a", "b", "c"]);
        assert!(plan
            .updates
            .iter()
            .skip(1)
            .all(|u| u.new_base == "a1'" && u.new_tip == "a1'"));
    }

    #[test]
    fn test_descendant_with_own_commits_stops_cascade() {
        let mut graph = StackGraph::new("main");
        graph.add(node("a", "main", "m0", "a1")).unwrap();
        graph.add(node("b", "a", "a1", "b1")).unwrap();
        graph.add(node("c", "b", "b1", "b1")).unwrap();
        let pairs = rewritten(&[("a1", "a1'")]);

        let plan = plan_batch(
            &graph,
            &BTreeMap::new(),
            &Replay {
                branch: "a",
                onto: "m1",
                old_tip: "a1",
                new_tip: "a1'",
                rewritten: &pairs,
            },
        );

        let moved: Vec<&str> = plan.branches().collect();
        assert_eq!(moved, vec!["a"]);
    }

    #[test]
    fn test_live_ref_tip_wins_over_recorded_tip() {
        let mut graph = StackGraph::new("main");
        graph.add(node("a", "main", "m0", "a1")).unwrap();
        // Recorded as empty, but the ref has moved on since
        graph.add(node("b", "a", "a1", "a1")).unwrap();
        let refs = BTreeMap::from([("b".to_string(), "b9".to_string())]);
        let pairs = rewritten(&[("a1", "a1'")]);

        let plan = plan_batch(
            &graph,
            &refs,
            &Replay {
                branch: "a",
                onto: "m1",
                old_tip: "a1",
                new_tip: "a1'",
                rewritten: &pairs,
            },
        );

        assert_eq!(plan.updates.len(), 1);
    }
}
