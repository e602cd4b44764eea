//! The configurable program analysis (CPA) framework.
//!
//! A configurable program analysis is given by an abstract domain
//! together with a set of operators steering the exploration of the state space:
//! * The *transfer* relation computes the successors of an abstract state
//!   along the outgoing edges of its program point.
//! * The *merge* operator decides how a new abstract state is combined
//!   with the states already reached at the same program location.
//!   The default keeps states separate,
//!   analyses over join-lattices typically override it with [`merge_join`].
//! * The *stop* operator decides whether a new abstract state is already covered
//!   by the reached states at its location and can be discarded.
//!   The default discards a state if some reached state subsumes it.
//! * The *precision adjustment* operator may coarsen a state before it is added
//!   to the reached set. The default leaves states unchanged.
//!
//! The reachability algorithm driving these operators
//! is implemented in [`algorithm`].

pub mod algorithm;
pub mod reached_set;
pub mod waitlist;

pub use algorithm::{Completion, CpaAlgorithm};
pub use reached_set::ProgramLocationDependentReachedSet;
pub use waitlist::{Waitlist, WaitlistOrder};

use crate::abstract_domain::AbstractDomain;
use crate::analysis::cfa::Cfa;
use crate::prelude::*;
use derive_more::Deref;
use petgraph::graph::{EdgeIndex, NodeIndex};
use std::sync::Arc;

/// The stack of pending call sites under which a program point is analyzed.
///
/// Two call strings are equal iff they contain the same call site nodes in the same order.
/// This equality is what allows abstract states reached through structurally equal
/// call chains to cover each other.
/// The contained data is wrapped into an `Arc` to make cloning cheap,
/// since every abstract state carries its call string.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Deref)]
#[deref(forward)]
pub struct CallString(Arc<Vec<NodeIndex>>);

impl CallString {
    /// The empty call string of the analysis entry point.
    pub fn root() -> CallString {
        CallString(Arc::new(Vec::new()))
    }

    /// Return the call string extended by the given call site.
    pub fn push(&self, call_site: NodeIndex) -> CallString {
        let mut sites = (*self.0).clone();
        sites.push(call_site);
        CallString(Arc::new(sites))
    }

    /// The number of pending call sites.
    pub fn depth(&self) -> usize {
        self.0.len()
    }
}

impl std::fmt::Display for CallString {
    fn fmt(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            "[{}]",
            self.0
                .iter()
                .map(|site| site.index().to_string())
                .collect::<Vec<String>>()
                .join(", ")
        )
    }
}

/// A program location: a node of the control flow automaton
/// together with the call string under which it is analyzed.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub struct ProgramLocation {
    /// The node of the control flow automaton.
    pub node: NodeIndex,
    /// The call string under which the node is analyzed.
    pub call_context: CallString,
}

impl ProgramLocation {
    /// Create a new program location.
    pub fn new(node: NodeIndex, call_context: CallString) -> ProgramLocation {
        ProgramLocation { node, call_context }
    }

    /// Create a program location with an empty call string.
    pub fn root(node: NodeIndex) -> ProgramLocation {
        ProgramLocation {
            node,
            call_context: CallString::root(),
        }
    }

    /// Render the location using the program point information of the given automaton.
    pub fn describe(&self, cfa: &Cfa) -> String {
        format!("{} | context {}", cfa.node(self.node), self.call_context)
    }
}

/// An abstract state: a value of the abstract domain bound to a program location.
///
/// States are immutable once they are part of the reached set.
/// Merging two states produces a new state instead of modifying an existing one.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct AbstractState<V> {
    /// The program location the value belongs to.
    pub location: ProgramLocation,
    /// The abstract domain value.
    pub value: V,
}

impl<V> AbstractState<V> {
    /// Create a new abstract state.
    pub fn new(location: ProgramLocation, value: V) -> AbstractState<V> {
        AbstractState { location, value }
    }
}

/// A configurable program analysis.
///
/// Implementors provide the transfer relation for their abstract domain
/// and may override the merge, stop and precision adjustment operators.
/// All operators must be deterministic given the same inputs.
pub trait ConfigurableProgramAnalysis {
    /// The abstract domain of the analysis.
    type Value: AbstractDomain;

    /// Get the control flow automaton the analysis runs on.
    fn cfa(&self) -> &Cfa;

    /// Compute the successor states along one outgoing edge of the state's program point.
    ///
    /// An empty result indicates that no information flows through the edge.
    fn transfer(
        &self,
        state: &AbstractState<Self::Value>,
        edge: EdgeIndex,
    ) -> Vec<AbstractState<Self::Value>>;

    /// Combine a new value with a value already reached at the same location.
    ///
    /// If the result differs from `existing`, the reached state is replaced by the result
    /// and put back onto the waitlist.
    /// The default keeps the existing state unchanged (`merge-sep`).
    fn merge(
        &self,
        _new_value: &Self::Value,
        existing: &Self::Value,
        _location: &ProgramLocation,
    ) -> Self::Value {
        existing.clone()
    }

    /// Decide whether a new value is covered by the values already reached at its location.
    ///
    /// Covered values are discarded by the reachability algorithm.
    /// The default discards a value subsumed by some reached value (`stop-sep`).
    fn stop(&self, value: &Self::Value, reached: &[Self::Value]) -> bool {
        reached
            .iter()
            .any(|reached_value| value.is_subsumed_by(reached_value))
    }

    /// Adjust the precision of a state before it is added to the reached set.
    /// The default leaves the state unchanged.
    fn adjust_precision(
        &self,
        state: AbstractState<Self::Value>,
        _reached: &ProgramLocationDependentReachedSet<Self::Value>,
    ) -> AbstractState<Self::Value> {
        state
    }

    /// Polled by the reachability algorithm once per iteration.
    ///
    /// Wrapper analyses that spawn nested reachability computations
    /// override this to propagate an abort encountered in a nested computation.
    fn interrupted(&self) -> bool {
        false
    }
}

/// The join-based merge operator for analyses over join-lattices:
/// the new value is joined into the existing one.
pub fn merge_join<V: AbstractDomain>(new_value: &V, existing: &V) -> V {
    new_value.merge(existing)
}

/// An operator deciding whether an analysis should be terminated prematurely,
/// e.g. because a resource limit is exceeded.
///
/// Triggering the operator is not an error:
/// the analysis stops with an explicit incompleteness flag
/// and its partial results remain available.
pub trait AbortOperator: Send + Sync {
    /// Returns whether the analysis should stop, given the current size of the reached set.
    fn should_abort(&self, reached_size: usize) -> bool;
}

/// The default abort operator: never aborts.
pub struct NeverAbortOperator;

impl AbortOperator for NeverAbortOperator {
    fn should_abort(&self, _reached_size: usize) -> bool {
        false
    }
}

/// An abort operator triggering once the reached set contains
/// at least the configured number of states.
pub struct StateCountAbortOperator {
    /// The maximum admissible size of the reached set.
    pub limit: u64,
}

impl AbortOperator for StateCountAbortOperator {
    fn should_abort(&self, reached_size: usize) -> bool {
        reached_size as u64 >= self.limit
    }
}
