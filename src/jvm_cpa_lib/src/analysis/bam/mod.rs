//! Interprocedural analysis via block abstraction memoization (BAM).
//!
//! The engine wraps an intraprocedural configurable program analysis
//! and intercepts the call edges of the control flow automaton.
//! On a call edge it
//! 1. *reduces* the caller state to the callee's local view,
//! 2. looks the reduced entry state up in the block summary cache —
//!    a hit reuses the memoized exit states without recomputation,
//! 3. on a miss runs a nested reachability computation over the callee's body
//!    (with the call site pushed onto the call string),
//!    collects the states at the callee's exit node as the block's summary
//!    and stores it in the cache,
//! 4. *expands* each summary exit state back into the caller's context
//!    at the return site of the call.
//!
//! The depth of the interprocedural recursion is bounded by the configured
//! maximum call stack depth.
//! When a call would exceed the bound, the callee is not analyzed;
//! the caller instead receives a single conservative top summary.
//! This bound is the mechanism that guarantees termination
//! on recursive and mutually recursive call graphs.
//! Such truncated summaries are context-dependent and therefore not cached.
//! A negative bound disables the depth check,
//! which also disables the termination guarantee on cyclic call graphs.

pub mod cache;
pub mod reduce_expand;
pub mod run;

pub use cache::{BlockSummary, BlockSummaryCache, CacheStats};
pub use reduce_expand::{
    CompositeExpandOperator, CompositeReduceOperator, DefaultExpandOperator, DefaultReduceOperator,
    ExpandOperator, ReduceOperator, ReferenceExpandOperator, ReferenceReduceOperator,
};
pub use run::{BamAnalysisOutcome, BamCpaRun, Config, HeapModel};

use crate::abstract_domain::HasTop;
use crate::analysis::cfa::{Cfa, CfaEdge};
use crate::analysis::cpa::{
    AbortOperator, AbstractState, CallString, ConfigurableProgramAnalysis, CpaAlgorithm,
    ProgramLocation, ProgramLocationDependentReachedSet, Waitlist, WaitlistOrder,
};
use crate::bytecode::CallInfo;
use crate::prelude::*;
use petgraph::graph::EdgeIndex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Counters describing one interprocedural analysis run.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy, Default)]
pub struct BamStatistics {
    /// The number of call edges answered from the block summary cache.
    pub cache_hits: u64,
    /// The number of block analyses that had to be computed.
    pub cache_misses: u64,
    /// The number of calls collapsed to a conservative summary
    /// because the call stack depth bound was reached.
    pub depth_truncations: u64,
}

/// The interprocedural wrapper around an intraprocedural analysis.
///
/// Implements [`ConfigurableProgramAnalysis`] itself,
/// delegating all non-call edges and all operators to the wrapped analysis,
/// so nested block computations recursively use the same wrapper.
pub struct BamCpa<C: ConfigurableProgramAnalysis> {
    wrapped: C,
    reduce_operator: Box<dyn ReduceOperator<C::Value>>,
    expand_operator: Box<dyn ExpandOperator<C::Value>>,
    cache: BlockSummaryCache<C::Value>,
    max_call_stack_depth: i64,
    waitlist_order: WaitlistOrder,
    abort_operator: Arc<dyn AbortOperator>,
    /// Set when a nested block computation was aborted,
    /// so that enclosing computations stop as well.
    aborted: AtomicBool,
    depth_truncations: AtomicU64,
}

impl<C: ConfigurableProgramAnalysis> BamCpa<C>
where
    C::Value: HasTop,
{
    /// Wrap an intraprocedural analysis for interprocedural exploration.
    pub fn new(
        wrapped: C,
        reduce_operator: Box<dyn ReduceOperator<C::Value>>,
        expand_operator: Box<dyn ExpandOperator<C::Value>>,
        max_call_stack_depth: i64,
        waitlist_order: WaitlistOrder,
        abort_operator: Arc<dyn AbortOperator>,
    ) -> Self {
        BamCpa {
            wrapped,
            reduce_operator,
            expand_operator,
            cache: BlockSummaryCache::new(),
            max_call_stack_depth,
            waitlist_order,
            abort_operator,
            aborted: AtomicBool::new(false),
            depth_truncations: AtomicU64::new(0),
        }
    }

    /// Get the wrapped intraprocedural analysis.
    pub fn wrapped(&self) -> &C {
        &self.wrapped
    }

    /// Get the installed reduce operator.
    pub fn reduce_operator(&self) -> &dyn ReduceOperator<C::Value> {
        self.reduce_operator.as_ref()
    }

    /// Get the abort operator polled by all (nested) reachability computations.
    pub fn abort_operator(&self) -> &dyn AbortOperator {
        self.abort_operator.as_ref()
    }

    /// Get the configured waitlist exploration order.
    pub fn waitlist_order(&self) -> WaitlistOrder {
        self.waitlist_order
    }

    /// The counters accumulated so far.
    pub fn statistics(&self) -> BamStatistics {
        let cache_stats = self.cache.stats();
        BamStatistics {
            cache_hits: cache_stats.hits,
            cache_misses: cache_stats.misses,
            depth_truncations: self.depth_truncations.load(Ordering::Relaxed),
        }
    }

    /// Returns whether a call from a state with the given call string
    /// would exceed the configured depth bound.
    fn depth_limit_reached(&self, call_context: &CallString) -> bool {
        self.max_call_stack_depth >= 0
            && call_context.depth() as i64 >= self.max_call_stack_depth
    }

    /// Compute the successor states of a call edge.
    fn transfer_call(
        &self,
        state: &AbstractState<C::Value>,
        call: &CallInfo,
        edge: EdgeIndex,
    ) -> Vec<AbstractState<C::Value>> {
        let cfa = self.wrapped.cfa();
        let return_location = ProgramLocation::new(
            cfa.edge_target(edge),
            state.location.call_context.clone(),
        );
        let entry_node = match cfa.entry_node(&call.callee) {
            Some(node) => node,
            None => {
                // A call to unknown code may have any effect on the state.
                return vec![AbstractState::new(return_location, state.value.top())];
            }
        };
        let callee_context = state.location.call_context.push(state.location.node);
        let entry_location = ProgramLocation::new(entry_node, callee_context);
        let reduced = self
            .reduce_operator
            .reduce(&state.value, &entry_location, call);
        let exits = if let Some(summary) = self.cache.lookup(&call.callee, &reduced) {
            summary.exits
        } else if self.depth_limit_reached(&state.location.call_context) {
            self.depth_truncations.fetch_add(1, Ordering::Relaxed);
            vec![reduced.top()]
        } else {
            self.compute_block_summary(call, reduced, entry_location)
        };
        exits
            .into_iter()
            .map(|exit| {
                AbstractState::new(
                    return_location.clone(),
                    self.expand_operator
                        .expand(&state.value, &exit, &return_location, call),
                )
            })
            .collect()
    }

    /// Run a nested reachability computation over the callee's body
    /// and memoize the resulting block summary.
    fn compute_block_summary(
        &self,
        call: &CallInfo,
        entry_value: C::Value,
        entry_location: ProgramLocation,
    ) -> Vec<C::Value> {
        self.cache.record_miss();
        let algorithm = CpaAlgorithm::new(self, self.abort_operator.as_ref());
        let mut reached = ProgramLocationDependentReachedSet::new();
        let mut waitlist = Waitlist::new(self.waitlist_order);
        algorithm.seed(
            &mut reached,
            &mut waitlist,
            AbstractState::new(entry_location.clone(), entry_value.clone()),
        );
        let completion = algorithm.run(&mut reached, &mut waitlist);
        if !completion.is_complete() {
            self.aborted.store(true, Ordering::Relaxed);
        }
        let exit_location = ProgramLocation::new(
            self.wrapped
                .cfa()
                .exit_node(&call.callee)
                .expect("Method with entry node has an exit node"),
            entry_location.call_context,
        );
        let exits = reached.states_at(&exit_location).to_vec();
        self.cache.insert(
            call.callee.clone(),
            BlockSummary {
                entry: entry_value,
                exits: exits.clone(),
                completion,
            },
        );
        exits
    }
}

impl<C: ConfigurableProgramAnalysis> ConfigurableProgramAnalysis for BamCpa<C>
where
    C::Value: HasTop,
{
    type Value = C::Value;

    fn cfa(&self) -> &Cfa {
        self.wrapped.cfa()
    }

    fn transfer(
        &self,
        state: &AbstractState<Self::Value>,
        edge: EdgeIndex,
    ) -> Vec<AbstractState<Self::Value>> {
        match self.wrapped.cfa().edge_label(edge) {
            CfaEdge::Call(call) => self.transfer_call(state, call, edge),
            _ => self.wrapped.transfer(state, edge),
        }
    }

    fn merge(
        &self,
        new_value: &Self::Value,
        existing: &Self::Value,
        location: &ProgramLocation,
    ) -> Self::Value {
        self.wrapped.merge(new_value, existing, location)
    }

    fn stop(&self, value: &Self::Value, reached: &[Self::Value]) -> bool {
        self.wrapped.stop(value, reached)
    }

    fn adjust_precision(
        &self,
        state: AbstractState<Self::Value>,
        reached: &ProgramLocationDependentReachedSet<Self::Value>,
    ) -> AbstractState<Self::Value> {
        self.wrapped.adjust_precision(state, reached)
    }

    fn interrupted(&self) -> bool {
        self.aborted.load(Ordering::Relaxed) || self.wrapped.interrupted()
    }
}
