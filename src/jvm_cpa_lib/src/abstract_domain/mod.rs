//! This module defines traits describing general properties of abstract domains
//! as well as several abstract domain types implementing these traits.

use crate::bytecode::CallInfo;
use crate::prelude::*;

mod frame;
pub use frame::JvmFrameState;

mod reference;
pub use reference::{ObjectId, PointsToGraph, ReferenceDomain, RootKey};

/// The main trait describing an abstract domain.
///
/// Each abstract domain is partially ordered.
/// Abstract domains of the same type can be merged.
pub trait AbstractDomain: Sized + Eq + Clone {
    /// Returns an upper bound (with respect to the partial order on the domain)
    /// for the two inputs `self` and `other`.
    #[must_use]
    fn merge(&self, other: &Self) -> Self;

    /// Returns an upper bound (with respect to the partial order on the domain)
    /// for the two inputs `self` and `other`.
    ///
    /// Modifies `self` in-place to hold the result. This can be useful in
    /// situations where it is not necessary to create a new object and more
    /// efficient to modify an existing one in-place.
    ///
    /// # Default
    ///
    /// Calls [`AbstractDomain::merge`] on the inputs and overwrites `self` with
    /// the result. Does nothing when `self` is equal to `other`.
    fn merge_with(&mut self, other: &Self) -> &mut Self {
        if self != other {
            let new_value = self.merge(other);

            *self = new_value;
        }

        self
    }

    /// Returns whether the element represents the top element (i.e. maximal with respect to the partial order) or not.
    /// If a domain has no maximal element, this function should always return false.
    fn is_top(&self) -> bool;

    /// Returns whether every concrete state represented by `self` is also represented by `other`.
    ///
    /// # Default
    ///
    /// Checks whether merging `self` into `other` leaves `other` unchanged.
    /// Domains with a cheaper direct subsumption check should override this method.
    fn is_subsumed_by(&self, other: &Self) -> bool {
        self == other || self.merge(other) == *other
    }
}

/// An abstract domain implementing this trait has a global maximum, i.e. a *Top* element.
pub trait HasTop {
    /// Return an instance of the *Top* element.
    ///
    /// Since an abstract domain type may represent a whole family of abstract domains,
    /// this function takes an instance of the domain as a parameter,
    /// so it can return the *Top* element of the same family member that the provided instance belongs to.
    fn top(&self) -> Self;
}

/// A trait for abstract domains that can compute call-boundary abstractions of themselves.
///
/// The block abstraction memoization engine tunnels abstract states
/// through procedure boundaries:
/// [`CallAbstraction::reduce_for_call`] computes the part of a caller state
/// that is visible to the callee,
/// and [`CallAbstraction::expand_after_call`] splices a callee exit state
/// back into the state the caller had at the call site.
///
/// The default implementations are identity-shaped,
/// so domains without call-sensitive information can implement the trait without overrides.
pub trait CallAbstraction: AbstractDomain {
    /// Compute the callee entry value visible through the given call.
    fn reduce_for_call(&self, _call: &CallInfo) -> Self {
        self.clone()
    }

    /// Combine `self` (the caller value at the call site) with a callee exit value
    /// into the caller value at the return site of the call.
    fn expand_after_call(&self, callee_exit: &Self, _call: &CallInfo) -> Self {
        callee_exit.clone()
    }
}

/// A flat constant lattice over 64-bit integers.
///
/// Two different values merge to `Top`.
/// The domain has no bottom element,
/// since unreachable states are represented by their absence from the reached set.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub enum FlatDomain {
    /// A single known constant.
    Value(i64),
    /// Any value.
    Top,
}

impl AbstractDomain for FlatDomain {
    fn merge(&self, other: &Self) -> Self {
        if self == other {
            self.clone()
        } else {
            FlatDomain::Top
        }
    }

    fn is_top(&self) -> bool {
        matches!(self, FlatDomain::Top)
    }

    fn is_subsumed_by(&self, other: &Self) -> bool {
        self == other || other.is_top()
    }
}

impl HasTop for FlatDomain {
    fn top(&self) -> Self {
        FlatDomain::Top
    }
}

impl CallAbstraction for FlatDomain {}

impl From<i64> for FlatDomain {
    fn from(value: i64) -> FlatDomain {
        FlatDomain::Value(value)
    }
}

impl std::fmt::Display for FlatDomain {
    fn fmt(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FlatDomain::Value(value) => write!(formatter, "{}", value),
            FlatDomain::Top => write!(formatter, "Top"),
        }
    }
}

/// The pointwise product of two abstract domains.
///
/// This is the composition mechanism for running several analyses "in parallel":
/// all domain operations (merge, top check, subsumption, call abstraction)
/// are applied componentwise.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub struct PairDomain<A, B>(pub A, pub B);

impl<A: AbstractDomain, B: AbstractDomain> AbstractDomain for PairDomain<A, B> {
    fn merge(&self, other: &Self) -> Self {
        PairDomain(self.0.merge(&other.0), self.1.merge(&other.1))
    }

    fn is_top(&self) -> bool {
        self.0.is_top() && self.1.is_top()
    }

    fn is_subsumed_by(&self, other: &Self) -> bool {
        self.0.is_subsumed_by(&other.0) && self.1.is_subsumed_by(&other.1)
    }
}

impl<A: HasTop, B: HasTop> HasTop for PairDomain<A, B> {
    fn top(&self) -> Self {
        PairDomain(self.0.top(), self.1.top())
    }
}

impl<A: CallAbstraction, B: CallAbstraction> CallAbstraction for PairDomain<A, B> {
    fn reduce_for_call(&self, call: &CallInfo) -> Self {
        PairDomain(self.0.reduce_for_call(call), self.1.reduce_for_call(call))
    }

    fn expand_after_call(&self, callee_exit: &Self, call: &CallInfo) -> Self {
        PairDomain(
            self.0.expand_after_call(&callee_exit.0, call),
            self.1.expand_after_call(&callee_exit.1, call),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_domain_merge() {
        let two = FlatDomain::from(2);
        let three = FlatDomain::from(3);
        assert_eq!(two.merge(&two), two);
        assert_eq!(two.merge(&three), FlatDomain::Top);
        assert!(two.merge(&three).is_top());
    }

    #[test]
    fn flat_domain_subsumption() {
        let two = FlatDomain::from(2);
        assert!(two.is_subsumed_by(&two));
        assert!(two.is_subsumed_by(&FlatDomain::Top));
        assert!(!FlatDomain::Top.is_subsumed_by(&two));
    }

    #[test]
    fn merge_is_idempotent() {
        for value in [FlatDomain::from(42), FlatDomain::Top] {
            assert_eq!(value.merge(&value), value);
        }
    }

    #[test]
    fn pair_domain_is_pointwise() {
        let left = PairDomain(FlatDomain::from(1), FlatDomain::from(2));
        let right = PairDomain(FlatDomain::from(1), FlatDomain::from(3));
        let merged = left.merge(&right);
        assert_eq!(merged, PairDomain(FlatDomain::from(1), FlatDomain::Top));
        assert!(left.is_subsumed_by(&merged));
        assert!(right.is_subsumed_by(&merged));
        assert!(!merged.is_subsumed_by(&left));
        assert_eq!(left.top(), PairDomain(FlatDomain::Top, FlatDomain::Top));
    }
}
