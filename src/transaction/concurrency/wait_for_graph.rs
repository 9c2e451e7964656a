use std::collections::{BTreeMap, BTreeSet};

use crate::common::types::TxnId;

/// Wait-for digraph: an edge `t -> u` means transaction `t` is waiting
/// for a lock that `u` currently holds.
///
/// Ordered containers make traversal deterministic, so repeated
/// detection passes over the same state pick the same cycle.
pub(crate) struct WaitForGraph {
    graph: BTreeMap<TxnId, BTreeSet<TxnId>>,
}

impl WaitForGraph {
    pub(crate) fn new() -> Self {
        Self {
            graph: BTreeMap::new(),
        }
    }

    pub(crate) fn add_edge(&mut self, from: TxnId, to: TxnId) {
        self.graph.entry(from).or_default().insert(to);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    /// Find one cycle, if any, as the list of transactions on it.
    ///
    /// Depth-first search from the lowest transaction id; a back edge
    /// into the current path yields the cycle as the path suffix from
    /// the revisited node.
    pub(crate) fn find_cycle(&self) -> Option<Vec<TxnId>> {
        let mut visited = BTreeSet::new();

        for &start in self.graph.keys() {
            if visited.contains(&start) {
                continue;
            }
            let mut path = Vec::new();
            if let Some(cycle) = self.dfs(start, &mut visited, &mut path) {
                return Some(cycle);
            }
        }
        None
    }

    fn dfs(
        &self,
        node: TxnId,
        visited: &mut BTreeSet<TxnId>,
        path: &mut Vec<TxnId>,
    ) -> Option<Vec<TxnId>> {
        visited.insert(node);
        path.push(node);

        if let Some(next) = self.graph.get(&node) {
            for &neighbor in next {
                if let Some(pos) = path.iter().position(|&t| t == neighbor) {
                    return Some(path[pos..].to_vec());
                }
                if !visited.contains(&neighbor) {
                    if let Some(cycle) = self.dfs(neighbor, visited, path) {
                        return Some(cycle);
                    }
                }
            }
        }

        path.pop();
        None
    }
}
