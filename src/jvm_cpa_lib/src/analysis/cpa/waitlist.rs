//! The pending-work queue driving the reachability algorithm.

use super::AbstractState;
use crate::prelude::*;
use std::collections::VecDeque;
use std::str::FromStr;

/// The exploration order of the waitlist.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum WaitlistOrder {
    /// Depth-first exploration: the most recently added state is processed first.
    LastInFirstOut,
    /// Breadth-first exploration: the oldest pending state is processed first.
    FirstInFirstOut,
}

impl Default for WaitlistOrder {
    fn default() -> Self {
        WaitlistOrder::LastInFirstOut
    }
}

impl FromStr for WaitlistOrder {
    type Err = Error;

    fn from_str(string: &str) -> Result<Self, Error> {
        match string {
            "lifo" => Ok(WaitlistOrder::LastInFirstOut),
            "fifo" => Ok(WaitlistOrder::FirstInFirstOut),
            other => Err(anyhow!("Unknown waitlist order: {}", other)),
        }
    }
}

/// The ordered queue of abstract states awaiting successor exploration.
///
/// The contained states are always a subset of the reached set.
/// The processing order only affects the number of transfer applications,
/// not the final fixpoint (provided merge and stop are monotone).
pub struct Waitlist<V> {
    pending: VecDeque<AbstractState<V>>,
    order: WaitlistOrder,
}

impl<V> Waitlist<V> {
    /// Create an empty waitlist with the given exploration order.
    pub fn new(order: WaitlistOrder) -> Waitlist<V> {
        Waitlist {
            pending: VecDeque::new(),
            order,
        }
    }

    /// Add a state to the waitlist.
    pub fn push(&mut self, state: AbstractState<V>) {
        self.pending.push_back(state);
    }

    /// Remove and return the next state to process.
    pub fn pop(&mut self) -> Option<AbstractState<V>> {
        match self.order {
            WaitlistOrder::LastInFirstOut => self.pending.pop_back(),
            WaitlistOrder::FirstInFirstOut => self.pending.pop_front(),
        }
    }

    /// The number of pending states.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns whether no states are pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abstract_domain::FlatDomain;
    use crate::analysis::cpa::ProgramLocation;
    use petgraph::graph::NodeIndex;

    fn state(value: i64) -> AbstractState<FlatDomain> {
        AbstractState::new(
            ProgramLocation::root(NodeIndex::new(0)),
            FlatDomain::from(value),
        )
    }

    #[test]
    fn lifo_pops_newest_first() {
        let mut waitlist = Waitlist::new(WaitlistOrder::LastInFirstOut);
        waitlist.push(state(1));
        waitlist.push(state(2));
        assert_eq!(waitlist.pop().unwrap().value, FlatDomain::from(2));
        assert_eq!(waitlist.pop().unwrap().value, FlatDomain::from(1));
        assert!(waitlist.pop().is_none());
    }

    #[test]
    fn fifo_pops_oldest_first() {
        let mut waitlist = Waitlist::new(WaitlistOrder::FirstInFirstOut);
        waitlist.push(state(1));
        waitlist.push(state(2));
        assert_eq!(waitlist.pop().unwrap().value, FlatDomain::from(1));
    }

    #[test]
    fn order_is_parsed_from_config_strings() {
        assert_eq!(
            WaitlistOrder::from_str("lifo").unwrap(),
            WaitlistOrder::LastInFirstOut
        );
        assert_eq!(
            WaitlistOrder::from_str("fifo").unwrap(),
            WaitlistOrder::FirstInFirstOut
        );
        assert!(WaitlistOrder::from_str("random").is_err());
    }
}
