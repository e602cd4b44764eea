//! The reduce/expand protocol for tunneling abstract states through call boundaries.
//!
//! `reduce` maps a caller state into the callee's local view at the callee entry,
//! dropping information that is irrelevant to the callee.
//! `expand` maps a callee exit state back into the caller's context at the return site,
//! splicing the summarized effect of the call back into the state the caller had at the call site.
//! The two operators are not mathematical inverses of each other,
//! but they are used as an inverse-like pairing by the interprocedural engine:
//! every state passed to `expand` was computed from a state produced by the matching `reduce`.
//!
//! Reduction must be sound:
//! it may only drop information that the callee's analysis can reconstruct itself
//! or that `expand` later restores from the caller state.
//! The engine cannot detect violations of this precondition.

use crate::abstract_domain::{AbstractDomain, CallAbstraction};
use crate::analysis::cpa::ProgramLocation;
use crate::bytecode::CallInfo;

/// Maps a caller state into the callee's local view.
pub trait ReduceOperator<V>: Send + Sync {
    /// Compute the callee entry value for a call with the given caller value.
    fn reduce(&self, caller_value: &V, callee_entry: &ProgramLocation, call: &CallInfo) -> V;
}

/// Maps a callee exit state back into the caller's context.
pub trait ExpandOperator<V>: Send + Sync {
    /// Compute the caller value at the return site of a call
    /// from the caller value at the call site and a callee exit value.
    fn expand(
        &self,
        caller_value: &V,
        callee_exit: &V,
        return_location: &ProgramLocation,
        call: &CallInfo,
    ) -> V;
}

/// The identity reduce operator for domains without call-sensitive abstraction:
/// the caller value passes through unchanged, scoped only to the callee entry location.
pub struct DefaultReduceOperator;

impl<V: AbstractDomain> ReduceOperator<V> for DefaultReduceOperator {
    fn reduce(&self, caller_value: &V, _callee_entry: &ProgramLocation, _call: &CallInfo) -> V {
        caller_value.clone()
    }
}

/// The identity expand operator matching [`DefaultReduceOperator`]:
/// the callee exit value passes through unchanged, scoped only to the return site.
pub struct DefaultExpandOperator;

impl<V: AbstractDomain> ExpandOperator<V> for DefaultExpandOperator {
    fn expand(
        &self,
        _caller_value: &V,
        callee_exit: &V,
        _return_location: &ProgramLocation,
        _call: &CallInfo,
    ) -> V {
        callee_exit.clone()
    }
}

/// The reduce operator for domains carrying reference or heap-shape information.
/// Delegates to the domain's own [`CallAbstraction`] capability.
pub struct ReferenceReduceOperator;

impl<V: CallAbstraction> ReduceOperator<V> for ReferenceReduceOperator {
    fn reduce(&self, caller_value: &V, _callee_entry: &ProgramLocation, call: &CallInfo) -> V {
        caller_value.reduce_for_call(call)
    }
}

/// The expand operator matching [`ReferenceReduceOperator`].
/// Delegates to the domain's own [`CallAbstraction`] capability.
pub struct ReferenceExpandOperator;

impl<V: CallAbstraction> ExpandOperator<V> for ReferenceExpandOperator {
    fn expand(
        &self,
        caller_value: &V,
        callee_exit: &V,
        _return_location: &ProgramLocation,
        call: &CallInfo,
    ) -> V {
        caller_value.expand_after_call(callee_exit, call)
    }
}

/// An ordered composition of reduce operators.
///
/// The operators are applied **left-to-right** in the order given at construction time.
/// The matching [`CompositeExpandOperator`] applies its operators right-to-left,
/// so that the first reduction is undone last.
/// The ordering is part of the construction contract and is never reordered by the engine,
/// since reduce operators do not commute in general.
pub struct CompositeReduceOperator<V> {
    operators: Vec<Box<dyn ReduceOperator<V>>>,
}

impl<V> CompositeReduceOperator<V> {
    /// Create a composite from the given operators, applied left-to-right.
    pub fn new(operators: Vec<Box<dyn ReduceOperator<V>>>) -> Self {
        CompositeReduceOperator { operators }
    }
}

impl<V: AbstractDomain> ReduceOperator<V> for CompositeReduceOperator<V> {
    fn reduce(&self, caller_value: &V, callee_entry: &ProgramLocation, call: &CallInfo) -> V {
        self.operators
            .iter()
            .fold(caller_value.clone(), |value, operator| {
                operator.reduce(&value, callee_entry, call)
            })
    }
}

/// An ordered composition of expand operators, applied **right-to-left**.
/// See [`CompositeReduceOperator`] for the ordering contract.
pub struct CompositeExpandOperator<V> {
    operators: Vec<Box<dyn ExpandOperator<V>>>,
}

impl<V> CompositeExpandOperator<V> {
    /// Create a composite from the given operators, applied right-to-left.
    pub fn new(operators: Vec<Box<dyn ExpandOperator<V>>>) -> Self {
        CompositeExpandOperator { operators }
    }
}

impl<V: AbstractDomain> ExpandOperator<V> for CompositeExpandOperator<V> {
    fn expand(
        &self,
        caller_value: &V,
        callee_exit: &V,
        return_location: &ProgramLocation,
        call: &CallInfo,
    ) -> V {
        self.operators
            .iter()
            .rev()
            .fold(callee_exit.clone(), |value, operator| {
                operator.expand(caller_value, &value, return_location, call)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abstract_domain::FlatDomain;
    use crate::analysis::cpa::ProgramLocation;
    use crate::bytecode::MethodSignature;
    use petgraph::graph::NodeIndex;

    fn call() -> CallInfo {
        CallInfo {
            callee: MethodSignature::mock("callee", 0),
            argument_count: 0,
        }
    }

    fn location() -> ProgramLocation {
        ProgramLocation::root(NodeIndex::new(0))
    }

    /// A marker operator appending its digit to the value,
    /// used to observe the application order of composite operators.
    struct DigitOperator(i64);

    impl ReduceOperator<FlatDomain> for DigitOperator {
        fn reduce(
            &self,
            caller_value: &FlatDomain,
            _callee_entry: &ProgramLocation,
            _call: &CallInfo,
        ) -> FlatDomain {
            match caller_value {
                FlatDomain::Value(value) => FlatDomain::Value(value * 10 + self.0),
                FlatDomain::Top => FlatDomain::Top,
            }
        }
    }

    impl ExpandOperator<FlatDomain> for DigitOperator {
        fn expand(
            &self,
            _caller_value: &FlatDomain,
            callee_exit: &FlatDomain,
            _return_location: &ProgramLocation,
            _call: &CallInfo,
        ) -> FlatDomain {
            match callee_exit {
                FlatDomain::Value(value) => FlatDomain::Value(value * 10 + self.0),
                FlatDomain::Top => FlatDomain::Top,
            }
        }
    }

    #[test]
    fn default_operators_roundtrip_unchanged() {
        let caller = FlatDomain::from(17);
        let reduced = DefaultReduceOperator.reduce(&caller, &location(), &call());
        assert_eq!(reduced, caller);
        let callee_exit = FlatDomain::from(23);
        let expanded = DefaultExpandOperator.expand(&caller, &callee_exit, &location(), &call());
        assert_eq!(expanded, callee_exit);
    }

    #[test]
    fn composite_of_identities_roundtrips_unchanged() {
        let reduce = CompositeReduceOperator::new(vec![
            Box::new(DefaultReduceOperator),
            Box::new(DefaultReduceOperator),
        ]);
        let expand = CompositeExpandOperator::new(vec![
            Box::new(DefaultExpandOperator),
            Box::new(DefaultExpandOperator),
        ]);
        let caller = FlatDomain::from(5);
        let callee_exit = FlatDomain::from(7);
        assert_eq!(reduce.reduce(&caller, &location(), &call()), caller);
        assert_eq!(
            expand.expand(&caller, &callee_exit, &location(), &call()),
            callee_exit
        );
    }

    #[test]
    fn composite_reduces_left_to_right() {
        let reduce = CompositeReduceOperator::new(vec![
            Box::new(DigitOperator(1)),
            Box::new(DigitOperator(2)),
        ]);
        assert_eq!(
            reduce.reduce(&FlatDomain::from(0), &location(), &call()),
            FlatDomain::from(12)
        );
    }

    #[test]
    fn composite_expands_right_to_left() {
        let expand = CompositeExpandOperator::new(vec![
            Box::new(DigitOperator(1)),
            Box::new(DigitOperator(2)),
        ]);
        assert_eq!(
            expand.expand(
                &FlatDomain::from(0),
                &FlatDomain::from(0),
                &location(),
                &call()
            ),
            FlatDomain::from(21)
        );
    }
}
