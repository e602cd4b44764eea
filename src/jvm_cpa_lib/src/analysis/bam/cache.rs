//! The block summary cache of the interprocedural analysis.

use crate::abstract_domain::AbstractDomain;
use crate::analysis::cpa::Completion;
use crate::bytecode::MethodSignature;
use crate::prelude::*;
use fnv::FnvHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// A memoized analysis result for one method under one reduced entry state.
#[derive(Serialize, Debug, Clone)]
pub struct BlockSummary<V> {
    /// The reduced entry state the method was analyzed for.
    pub entry: V,
    /// The reduced exit states reached at the method's exit node.
    pub exits: Vec<V>,
    /// Whether the block analysis ran to completion.
    /// An aborted block analysis yields an under-approximate summary;
    /// the run that computed it reports itself as aborted as a whole.
    pub completion: Completion,
}

/// Counters describing the effectiveness of a [`BlockSummaryCache`].
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy, Default)]
pub struct CacheStats {
    /// The number of lookups answered from the cache.
    pub hits: u64,
    /// The number of block analyses that had to be computed.
    pub misses: u64,
}

/// Memoizes the reduced exit states of analyzed blocks,
/// keyed by method signature and reduced entry state.
///
/// Lookup is subsumption-aware:
/// a query is answered by a cached summary whose entry state subsumes the queried entry state,
/// since the summary of a more abstract entry covers all behaviors of a more concrete one.
/// Summaries are never invalidated within a run;
/// the cache lives exactly as long as the run owning it.
///
/// The cache supports concurrent lookups and inserts,
/// so independent call subtrees may be summarized in parallel.
pub struct BlockSummaryCache<V> {
    summaries: RwLock<FnvHashMap<MethodSignature, Vec<BlockSummary<V>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: AbstractDomain> BlockSummaryCache<V> {
    /// Create an empty cache.
    pub fn new() -> Self {
        BlockSummaryCache {
            summaries: RwLock::new(FnvHashMap::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a summary for the given method whose entry state subsumes the given entry state.
    pub fn lookup(&self, signature: &MethodSignature, entry: &V) -> Option<BlockSummary<V>> {
        let summaries = self.summaries.read().expect("Cache lock poisoned");
        let result = summaries.get(signature).and_then(|entries| {
            entries
                .iter()
                .find(|summary| entry.is_subsumed_by(&summary.entry))
                .cloned()
        });
        if result.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Count the recomputation of a block summary after an unanswered lookup.
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Store a freshly computed summary.
    pub fn insert(&self, signature: MethodSignature, summary: BlockSummary<V>) {
        let mut summaries = self.summaries.write().expect("Cache lock poisoned");
        summaries.entry(signature).or_default().push(summary);
    }

    /// The hit/miss counters accumulated so far.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl<V: AbstractDomain> Default for BlockSummaryCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abstract_domain::FlatDomain;

    fn summary(entry: FlatDomain, exit: FlatDomain) -> BlockSummary<FlatDomain> {
        BlockSummary {
            entry,
            exits: vec![exit],
            completion: Completion::Complete,
        }
    }

    #[test]
    fn lookup_requires_subsumption() {
        let cache = BlockSummaryCache::new();
        let signature = MethodSignature::mock("f", 1);
        cache.insert(signature.clone(), summary(FlatDomain::from(1), FlatDomain::from(2)));
        assert!(cache.lookup(&signature, &FlatDomain::from(1)).is_some());
        assert!(cache.lookup(&signature, &FlatDomain::from(3)).is_none());
        assert!(cache.lookup(&signature, &FlatDomain::Top).is_none());
    }

    #[test]
    fn more_abstract_entries_answer_more_concrete_queries() {
        let cache = BlockSummaryCache::new();
        let signature = MethodSignature::mock("f", 1);
        cache.insert(signature.clone(), summary(FlatDomain::Top, FlatDomain::Top));
        let hit = cache.lookup(&signature, &FlatDomain::from(42)).unwrap();
        assert_eq!(hit.exits, vec![FlatDomain::Top]);
    }

    #[test]
    fn repeated_lookups_are_deterministic() {
        let cache = BlockSummaryCache::new();
        let signature = MethodSignature::mock("f", 1);
        cache.insert(signature.clone(), summary(FlatDomain::from(1), FlatDomain::from(2)));
        let first = cache.lookup(&signature, &FlatDomain::from(1)).unwrap();
        let second = cache.lookup(&signature, &FlatDomain::from(1)).unwrap();
        assert_eq!(first.exits, second.exits);
    }

    #[test]
    fn stats_count_hits_and_recomputations() {
        let cache = BlockSummaryCache::new();
        let signature = MethodSignature::mock("f", 1);
        assert!(cache.lookup(&signature, &FlatDomain::from(1)).is_none());
        cache.record_miss();
        cache.insert(signature.clone(), summary(FlatDomain::from(1), FlatDomain::from(2)));
        cache.lookup(&signature, &FlatDomain::from(1)).unwrap();
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1 });
    }

    #[test]
    fn summaries_for_different_methods_are_independent() {
        let cache = BlockSummaryCache::new();
        cache.insert(
            MethodSignature::mock("f", 1),
            summary(FlatDomain::from(1), FlatDomain::from(2)),
        );
        assert!(cache
            .lookup(&MethodSignature::mock("g", 1), &FlatDomain::from(1))
            .is_none());
    }
}
