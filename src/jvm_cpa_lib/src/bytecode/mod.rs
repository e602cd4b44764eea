//! A minimal representation of JVM bytecode as consumed by the analysis engine.
//!
//! The types in this module are the interface between a bytecode frontend
//! (class file parsing is not part of this crate) and the control flow
//! automaton defined in [`crate::analysis::cfa`].
//! Only the small instruction subset needed to drive abstract transfer
//! relations is modeled.

use crate::prelude::*;
use derive_more::Deref;
use std::sync::Arc;

/// A method signature uniquely identifying a procedure of the analyzed program.
///
/// Signatures are used as the procedure key of the block summary cache,
/// so they occur in many abstract states.
/// The contained data is wrapped into an `Arc` to make cloning cheap.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord, Deref)]
#[deref(forward)]
pub struct MethodSignature(Arc<MethodSignatureData>);

/// The data contained in a method signature.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord)]
pub struct MethodSignatureData {
    /// The fully qualified name of the class containing the method.
    pub class: String,
    /// The name of the method.
    pub name: String,
    /// The JVM type descriptor of the method, e.g. `(II)I`.
    pub descriptor: String,
}

impl MethodSignature {
    /// Create a new method signature.
    pub fn new(
        class: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> MethodSignature {
        MethodSignature(Arc::new(MethodSignatureData {
            class: class.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        }))
    }
}

impl std::fmt::Display for MethodSignature {
    fn fmt(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            "{}.{}{}",
            self.0.class, self.0.name, self.0.descriptor
        )
    }
}

/// Information about a single call site.
///
/// Call edges of the control flow automaton are labeled with this struct.
/// The argument count is needed by reduce operators
/// to determine which part of the caller state is visible to the callee.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub struct CallInfo {
    /// The signature of the called method.
    pub callee: MethodSignature,
    /// The number of arguments popped from the operand stack by the call.
    pub argument_count: usize,
}

/// The instruction subset interpreted by the transfer relations in this crate.
///
/// The variants correspond to families of JVM opcodes
/// (e.g. [`Instruction::Push`] covers the various constant-pushing opcodes).
/// Control flow opcodes are not contained here,
/// since jumps, calls and returns are represented
/// by the edge structure of the control flow automaton.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub enum Instruction {
    /// No effect on the abstract state.
    Nop,
    /// Push an integer constant onto the operand stack.
    Push(i64),
    /// Push the value of the given local variable slot onto the operand stack.
    Load(u16),
    /// Pop the top of the operand stack into the given local variable slot.
    Store(u16),
    /// Pop two values and push their sum.
    Add,
    /// Discard the top of the operand stack.
    Pop,
    /// Push a `null` reference onto the operand stack.
    AConstNull,
    /// Allocate a new object of the given class and push a reference to it.
    New(String),
    /// Pop an object reference and push the value of the given field.
    GetField(String),
    /// Pop a value and an object reference and write the value into the given field.
    PutField(String),
    /// Pop the condition operand of a conditional branch.
    /// The branch structure itself is encoded in the automaton edges.
    If,
    /// An unconditional jump. Does not touch the operand stack.
    Goto,
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Instruction::Nop => write!(formatter, "nop"),
            Instruction::Push(value) => write!(formatter, "push {}", value),
            Instruction::Load(slot) => write!(formatter, "load {}", slot),
            Instruction::Store(slot) => write!(formatter, "store {}", slot),
            Instruction::Add => write!(formatter, "add"),
            Instruction::Pop => write!(formatter, "pop"),
            Instruction::AConstNull => write!(formatter, "aconst_null"),
            Instruction::New(class) => write!(formatter, "new {}", class),
            Instruction::GetField(field) => write!(formatter, "getfield {}", field),
            Instruction::PutField(field) => write!(formatter, "putfield {}", field),
            Instruction::If => write!(formatter, "if"),
            Instruction::Goto => write!(formatter, "goto"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl MethodSignature {
        /// Mock signature of a static method taking `arg_count` integer arguments.
        pub fn mock(name: &str, arg_count: usize) -> MethodSignature {
            MethodSignature::new("Mock", name, format!("({})I", "I".repeat(arg_count)))
        }
    }

    #[test]
    fn signature_display() {
        let signature = MethodSignature::new("com/example/Main", "main", "([Ljava/lang/String;)V");
        assert_eq!(
            format!("{}", signature),
            "com/example/Main.main([Ljava/lang/String;)V"
        );
    }

    #[test]
    fn signatures_compare_by_content() {
        assert_eq!(MethodSignature::mock("f", 1), MethodSignature::mock("f", 1));
        assert!(MethodSignature::mock("f", 1) != MethodSignature::mock("g", 1));
    }
}
