//! Caller → callee edges from sampled call chains.
//!
//! Only the immediate caller of each sample is kept: enough to report where
//! hot symbols are called from, without the cost of full chain trees.

use std::collections::HashMap;

use crate::domain::{CallChainError, SymbolId};

/// Deepest chain accepted before the sample is treated as corrupt
pub const MAX_CALLCHAIN_DEPTH: usize = 1024;

#[derive(Debug, Default)]
pub struct CallGraph {
    /// callee → (caller return address → period)
    edges: HashMap<SymbolId, HashMap<u64, u64>>,
    chains: u64,
}

impl CallGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the chain of callers (innermost first) of a sample in `callee`
    ///
    /// # Errors
    /// `TooDeep` if the chain is longer than [`MAX_CALLCHAIN_DEPTH`]
    pub fn append(
        &mut self,
        callee: SymbolId,
        chain: &[u64],
        period: u64,
    ) -> Result<(), CallChainError> {
        Self::check_depth(chain)?;
        let Some(&caller) = chain.first() else {
            return Ok(());
        };

        let weight = self.edges.entry(callee).or_default().entry(caller).or_insert(0);
        *weight = weight.saturating_add(period);
        self.chains += 1;
        Ok(())
    }

    /// Reject chains longer than [`MAX_CALLCHAIN_DEPTH`] without recording anything
    ///
    /// # Errors
    /// `TooDeep` if the chain is too long
    pub fn check_depth(chain: &[u64]) -> Result<(), CallChainError> {
        if chain.len() > MAX_CALLCHAIN_DEPTH {
            return Err(CallChainError::TooDeep { depth: chain.len(), max: MAX_CALLCHAIN_DEPTH });
        }
        Ok(())
    }

    /// Callers of `callee` with their accumulated period, heaviest first
    #[must_use]
    pub fn callers(&self, callee: SymbolId) -> Vec<(u64, u64)> {
        let mut callers: Vec<(u64, u64)> = self
            .edges
            .get(&callee)
            .map(|calls| calls.iter().map(|(&addr, &period)| (addr, period)).collect())
            .unwrap_or_default();
        callers.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        callers
    }

    /// Number of distinct caller → callee edges
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(HashMap::len).sum()
    }

    /// Number of samples that carried a call chain
    #[must_use]
    pub fn chains(&self) -> u64 {
        self.chains
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_immediate_callers_are_weighted() {
        let mut graph = CallGraph::new();
        let foo = SymbolId(0);
        graph.append(foo, &[0x4000, 0x5000], 3).unwrap();
        graph.append(foo, &[0x4000], 2).unwrap();
        graph.append(foo, &[0x4100], 7).unwrap();

        assert_eq!(graph.callers(foo), vec![(0x4100, 7), (0x4000, 5)]);
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.chains(), 3);
    }

    #[test]
    fn test_empty_chain_is_ignored() {
        let mut graph = CallGraph::new();
        graph.append(SymbolId(1), &[], 1).unwrap();
        assert_eq!(graph.chains(), 0);
        assert!(graph.callers(SymbolId(1)).is_empty());
    }

    #[test]
    fn test_overlong_chain_is_rejected() {
        let mut graph = CallGraph::new();
        let chain = vec![0x1000; MAX_CALLCHAIN_DEPTH + 1];
        assert_eq!(
            graph.append(SymbolId(0), &chain, 1),
            Err(CallChainError::TooDeep { depth: MAX_CALLCHAIN_DEPTH + 1, max: MAX_CALLCHAIN_DEPTH })
        );
        assert_eq!(graph.edge_count(), 0);
    }
}
