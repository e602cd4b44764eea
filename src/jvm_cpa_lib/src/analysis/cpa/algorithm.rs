//! The reachability algorithm of the configurable program analysis framework.
//!
//! The algorithm repeatedly pops a state from the waitlist
//! and computes its successors via the transfer relation.
//! Each successor is merged into the states already reached at its target location.
//! States widened by the merge are put back onto the waitlist,
//! since their successors have to be recomputed.
//! Successors covered by the reached set (according to the stop operator) are discarded,
//! all others are added to the reached set and the waitlist.
//!
//! The algorithm terminates when the waitlist is empty
//! or when the abort operator signals early termination.
//! Aborting is not an error:
//! the reached set computed so far remains available,
//! but the returned [`Completion`] flag marks it as potentially unsound.

use super::{
    AbortOperator, AbstractState, ConfigurableProgramAnalysis, ProgramLocationDependentReachedSet,
    Waitlist,
};
use crate::prelude::*;

/// Whether a reachability computation explored all pending states
/// or was terminated prematurely by the abort operator.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Completion {
    /// The waitlist was emptied, the reached set is a fixpoint of the transfer relation.
    Complete,
    /// The computation was aborted, the reached set is a potentially unsound partial result.
    Aborted,
}

impl Completion {
    /// Returns whether the computation ran to completion.
    pub fn is_complete(&self) -> bool {
        matches!(self, Completion::Complete)
    }
}

/// A single reachability computation over a given analysis.
pub struct CpaAlgorithm<'a, C: ConfigurableProgramAnalysis> {
    cpa: &'a C,
    abort_operator: &'a dyn AbortOperator,
}

impl<'a, C: ConfigurableProgramAnalysis> CpaAlgorithm<'a, C> {
    /// Create a new reachability computation for the given analysis.
    pub fn new(cpa: &'a C, abort_operator: &'a dyn AbortOperator) -> Self {
        CpaAlgorithm {
            cpa,
            abort_operator,
        }
    }

    /// Add an initial state to a reached set and the corresponding waitlist.
    pub fn seed(
        &self,
        reached: &mut ProgramLocationDependentReachedSet<C::Value>,
        waitlist: &mut Waitlist<C::Value>,
        initial: AbstractState<C::Value>,
    ) {
        reached.insert(initial.location.clone(), initial.value.clone());
        waitlist.push(initial);
    }

    /// Run the reachability computation until the waitlist is empty
    /// or the abort operator triggers.
    pub fn run(
        &self,
        reached: &mut ProgramLocationDependentReachedSet<C::Value>,
        waitlist: &mut Waitlist<C::Value>,
    ) -> Completion {
        while let Some(state) = waitlist.pop() {
            if self.cpa.interrupted() || self.abort_operator.should_abort(reached.len()) {
                return Completion::Aborted;
            }
            for edge in self.cpa.cfa().successor_edges(state.location.node) {
                for successor in self.cpa.transfer(&state, edge) {
                    self.handle_successor(successor, reached, waitlist);
                }
            }
        }
        // An abort inside a nested computation also invalidates this one.
        if self.cpa.interrupted() {
            Completion::Aborted
        } else {
            Completion::Complete
        }
    }

    /// Merge one successor state into the reached set
    /// and add it to the waitlist if it is not covered.
    fn handle_successor(
        &self,
        successor: AbstractState<C::Value>,
        reached: &mut ProgramLocationDependentReachedSet<C::Value>,
        waitlist: &mut Waitlist<C::Value>,
    ) {
        let successor = self.cpa.adjust_precision(successor, reached);
        let location = successor.location.clone();
        let mut widened = Vec::new();
        for (index, existing) in reached.states_at(&location).iter().enumerate() {
            let merged = self.cpa.merge(&successor.value, existing, &location);
            if merged != *existing {
                widened.push((index, merged));
            }
        }
        for (index, merged) in widened {
            reached.replace(&location, index, merged.clone());
            waitlist.push(AbstractState::new(location.clone(), merged));
        }
        if !self.cpa.stop(&successor.value, reached.states_at(&location)) {
            reached.insert(location.clone(), successor.value.clone());
            waitlist.push(successor);
        }
    }
}
