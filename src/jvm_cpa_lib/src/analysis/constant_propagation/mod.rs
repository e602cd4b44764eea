//! A constant propagation analysis over abstract JVM frames.
//!
//! The analysis tracks, for every program location,
//! which constant values the local variables and operand stack entries may hold.
//! Values that are not known to be a single constant are represented by top.
//!
//! Two variants are provided:
//! [`ConstantPropagation`] tracks constants only,
//! while [`HeapAwareConstantPropagation`] additionally tracks
//! heap reachability information via the [`ReferenceDomain`],
//! which allows the tree-structured heap model of the interprocedural engine
//! to carry object graphs across call boundaries.
//!
//! Both variants are intraprocedural:
//! call edges are left to the interprocedural wrapper analysis
//! (see [`crate::analysis::bam`]).

use crate::abstract_domain::{
    FlatDomain, JvmFrameState, ObjectId, PairDomain, ReferenceDomain,
};
use crate::analysis::cfa::{Cfa, CfaEdge};
use crate::analysis::cpa::{
    merge_join, AbstractState, ConfigurableProgramAnalysis, ProgramLocation,
};
use crate::bytecode::Instruction;
use petgraph::graph::EdgeIndex;

/// Compute the abstract result of an integer addition.
fn add(lhs: FlatDomain, rhs: FlatDomain) -> FlatDomain {
    match (lhs, rhs) {
        (FlatDomain::Value(lhs), FlatDomain::Value(rhs)) => {
            FlatDomain::Value(lhs.wrapping_add(rhs))
        }
        _ => FlatDomain::Top,
    }
}

/// Apply one instruction to an abstract frame.
///
/// Returns `None` if the instruction cannot be executed on the frame
/// (operand stack underflow), in which case no information flows through the edge.
fn apply_to_frame(
    frame: &JvmFrameState<FlatDomain>,
    instruction: &Instruction,
) -> Option<JvmFrameState<FlatDomain>> {
    let mut frame = frame.clone();
    match instruction {
        Instruction::Nop | Instruction::Goto => (),
        Instruction::Push(value) => frame.push(FlatDomain::from(*value)),
        Instruction::Load(slot) => {
            let value = frame.local(*slot).cloned().unwrap_or(FlatDomain::Top);
            frame.push(value);
        }
        Instruction::Store(slot) => {
            let value = frame.pop()?;
            frame.set_local(*slot, value);
        }
        Instruction::Add => {
            let rhs = frame.pop()?;
            let lhs = frame.pop()?;
            frame.push(add(lhs, rhs));
        }
        Instruction::Pop | Instruction::If => {
            frame.pop()?;
        }
        // References are not integer constants.
        Instruction::AConstNull | Instruction::New(_) => frame.push(FlatDomain::Top),
        Instruction::GetField(_) => {
            frame.pop()?;
            frame.push(FlatDomain::Top);
        }
        Instruction::PutField(_) => {
            frame.pop()?;
            frame.pop()?;
        }
    }
    Some(frame)
}

/// Apply one instruction to the heap reachability information.
/// `site` is the bytecode offset of the instruction, used to name allocated objects.
fn apply_to_heap(heap: &ReferenceDomain, instruction: &Instruction, site: usize) -> ReferenceDomain {
    let mut heap = heap.clone();
    match instruction {
        Instruction::New(class) => heap.new_object(ObjectId::new(class.clone(), site)),
        Instruction::Load(slot) => heap.load_local(*slot),
        Instruction::Store(slot) => heap.store_local(*slot),
        Instruction::GetField(field) => heap.load_field(field),
        Instruction::PutField(field) => heap.store_field(field),
        _ => (),
    }
    heap
}

/// The intraprocedural constant propagation analysis.
pub struct ConstantPropagation<'a> {
    cfa: &'a Cfa,
}

impl<'a> ConstantPropagation<'a> {
    /// Create a new constant propagation analysis over the given automaton.
    pub fn new(cfa: &'a Cfa) -> Self {
        ConstantPropagation { cfa }
    }
}

impl<'a> ConfigurableProgramAnalysis for ConstantPropagation<'a> {
    type Value = JvmFrameState<FlatDomain>;

    fn cfa(&self) -> &Cfa {
        self.cfa
    }

    fn transfer(
        &self,
        state: &AbstractState<Self::Value>,
        edge: EdgeIndex,
    ) -> Vec<AbstractState<Self::Value>> {
        let location = ProgramLocation::new(
            self.cfa.edge_target(edge),
            state.location.call_context.clone(),
        );
        match self.cfa.edge_label(edge) {
            CfaEdge::Instruction(instruction) => apply_to_frame(&state.value, instruction)
                .map(|frame| AbstractState::new(location, frame))
                .into_iter()
                .collect(),
            CfaEdge::Return => vec![AbstractState::new(location, state.value.clone())],
            // Call edges are handled by the interprocedural wrapper analysis.
            CfaEdge::Call(_) => Vec::new(),
        }
    }

    /// Constant propagation is a join-lattice analysis:
    /// values reached at the same location are joined.
    fn merge(
        &self,
        new_value: &Self::Value,
        existing: &Self::Value,
        _location: &ProgramLocation,
    ) -> Self::Value {
        merge_join(new_value, existing)
    }
}

/// Constant propagation combined with heap reachability tracking.
pub struct HeapAwareConstantPropagation<'a> {
    cfa: &'a Cfa,
}

impl<'a> HeapAwareConstantPropagation<'a> {
    /// Create a new heap-aware constant propagation analysis over the given automaton.
    pub fn new(cfa: &'a Cfa) -> Self {
        HeapAwareConstantPropagation { cfa }
    }
}

impl<'a> ConfigurableProgramAnalysis for HeapAwareConstantPropagation<'a> {
    type Value = PairDomain<JvmFrameState<FlatDomain>, ReferenceDomain>;

    fn cfa(&self) -> &Cfa {
        self.cfa
    }

    fn transfer(
        &self,
        state: &AbstractState<Self::Value>,
        edge: EdgeIndex,
    ) -> Vec<AbstractState<Self::Value>> {
        let location = ProgramLocation::new(
            self.cfa.edge_target(edge),
            state.location.call_context.clone(),
        );
        let PairDomain(frame, heap) = &state.value;
        match self.cfa.edge_label(edge) {
            CfaEdge::Instruction(instruction) => {
                let site = self.cfa.node(self.cfa.edge_source(edge)).offset;
                apply_to_frame(frame, instruction)
                    .map(|new_frame| {
                        AbstractState::new(
                            location,
                            PairDomain(new_frame, apply_to_heap(heap, instruction, site)),
                        )
                    })
                    .into_iter()
                    .collect()
            }
            CfaEdge::Return => vec![AbstractState::new(location, state.value.clone())],
            CfaEdge::Call(_) => Vec::new(),
        }
    }

    fn merge(
        &self,
        new_value: &Self::Value,
        existing: &Self::Value,
        _location: &ProgramLocation,
    ) -> Self::Value {
        merge_join(new_value, existing)
    }
}
