//! An abstract JVM frame consisting of local variables and an operand stack.

use super::{AbstractDomain, CallAbstraction, HasTop};
use crate::bytecode::CallInfo;
use crate::prelude::*;
use std::collections::BTreeMap;

/// An abstract method frame.
///
/// Local variable slots and operand stack entries hold values of the generic value domain `V`.
/// A local variable slot that is missing from the map is undefined,
/// i.e. it has not been written on every path reaching the frame's program point.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub struct JvmFrameState<V> {
    locals: BTreeMap<u16, V>,
    stack: Vec<V>,
}

impl<V> Default for JvmFrameState<V> {
    fn default() -> Self {
        JvmFrameState {
            locals: BTreeMap::new(),
            stack: Vec::new(),
        }
    }
}

impl<V: AbstractDomain> JvmFrameState<V> {
    /// Create an empty frame without defined locals and with an empty operand stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the value of a local variable slot if it is defined.
    pub fn local(&self, slot: u16) -> Option<&V> {
        self.locals.get(&slot)
    }

    /// Write a value into a local variable slot.
    pub fn set_local(&mut self, slot: u16, value: V) {
        self.locals.insert(slot, value);
    }

    /// Push a value onto the operand stack.
    pub fn push(&mut self, value: V) {
        self.stack.push(value);
    }

    /// Pop the value on top of the operand stack.
    pub fn pop(&mut self) -> Option<V> {
        self.stack.pop()
    }

    /// Get the current operand stack, bottom first.
    pub fn stack(&self) -> &[V] {
        &self.stack
    }

    /// Get the defined local variable slots.
    pub fn locals(&self) -> &BTreeMap<u16, V> {
        &self.locals
    }
}

impl<V: AbstractDomain> AbstractDomain for JvmFrameState<V> {
    /// Merge two frames slot-wise and stack-entry-wise.
    ///
    /// Local variable slots that are defined in only one of the frames are dropped,
    /// since their value is undefined on some path.
    /// Operand stacks of differing height are truncated to their common lower part.
    fn merge(&self, other: &Self) -> Self {
        let locals = self
            .locals
            .iter()
            .filter_map(|(slot, value)| {
                other
                    .locals
                    .get(slot)
                    .map(|other_value| (*slot, value.merge(other_value)))
            })
            .collect();
        let stack = self
            .stack
            .iter()
            .zip(other.stack.iter())
            .map(|(value, other_value)| value.merge(other_value))
            .collect();
        JvmFrameState { locals, stack }
    }

    fn is_top(&self) -> bool {
        self.locals.values().all(|value| value.is_top())
            && self.stack.iter().all(|value| value.is_top())
    }

    fn is_subsumed_by(&self, other: &Self) -> bool {
        if self.stack.len() != other.stack.len() {
            return false;
        }
        // A frame with fewer defined locals is the more abstract one.
        other.locals.iter().all(|(slot, other_value)| {
            self.locals
                .get(slot)
                .map(|value| value.is_subsumed_by(other_value))
                .unwrap_or(false)
        }) && self
            .stack
            .iter()
            .zip(other.stack.iter())
            .all(|(value, other_value)| value.is_subsumed_by(other_value))
    }
}

impl<V: AbstractDomain + HasTop> HasTop for JvmFrameState<V> {
    /// Return a frame of the same shape with all contained values set to top.
    fn top(&self) -> Self {
        JvmFrameState {
            locals: self
                .locals
                .iter()
                .map(|(slot, value)| (*slot, value.top()))
                .collect(),
            stack: self.stack.iter().map(|value| value.top()).collect(),
        }
    }
}

impl<V: AbstractDomain + HasTop> CallAbstraction for JvmFrameState<V> {
    /// The callee sees a fresh frame whose first local variable slots
    /// hold the call arguments taken from the top of the caller's operand stack.
    fn reduce_for_call(&self, call: &CallInfo) -> Self {
        let args_start = self.stack.len().saturating_sub(call.argument_count);
        let locals = self.stack[args_start..]
            .iter()
            .enumerate()
            .map(|(index, value)| (index as u16, value.clone()))
            .collect();
        JvmFrameState {
            locals,
            stack: Vec::new(),
        }
    }

    /// The caller keeps its locals, pops the call arguments
    /// and receives the callee's return value (the top of the callee exit stack) if there is one.
    fn expand_after_call(&self, callee_exit: &Self, call: &CallInfo) -> Self {
        let mut expanded = self.clone();
        for _ in 0..call.argument_count {
            expanded.pop();
        }
        if let Some(return_value) = callee_exit.stack.last() {
            expanded.push(return_value.clone());
        }
        expanded
    }
}
