//! Generate control flow automata out of method descriptions.
//!
//! The generated automata follow some basic principles:
//! * **Nodes** denote program points, i.e. the points in time
//! before the execution of the instruction at a given bytecode offset.
//! Each method additionally gets a single artificial *Exit* node
//! that collects the states at all of its return instructions.
//! * **Edges** denote the execution of one instruction
//! or the transfer of control to another program point.
//! Each edge is classified as intraprocedural ([`CfaEdge::Instruction`]),
//! as a call ([`CfaEdge::Call`]) or as a return ([`CfaEdge::Return`]).
//!
//! # Call edges
//!
//! A call edge leads from the call site to the return site *inside the caller*.
//! The body of the callee is not spliced into the caller's automaton.
//! Instead, the interprocedural semantics of call edges
//! is provided by the block abstraction memoization engine (see [`super::bam`]),
//! which analyzes the callee separately, starting at its entry node,
//! and maps the states collected at the callee's exit node back to the return site.
//! Calls to methods without a known body are treated as calls to unknown code
//! by the analysis consuming the automaton.

use crate::bytecode::{CallInfo, Instruction, MethodSignature};
use crate::prelude::*;
use crate::utils::log::LogMessage;
use fnv::FnvHashMap;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;

/// The graph type of a control flow automaton.
pub type CfaGraph = DiGraph<CfaNode, CfaEdge>;

/// The kind of a program point.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum NodeKind {
    /// The entry point of a method.
    Entry,
    /// A regular program point inside a method body.
    Regular,
    /// The artificial exit point of a method collecting all of its return states.
    Exit,
}

/// The node type of a control flow automaton.
///
/// Each node denotes the program point before the execution
/// of the instruction at the contained bytecode offset.
/// The exit node of a method carries the offset one past the end of its code.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub struct CfaNode {
    /// The method containing the program point.
    pub signature: MethodSignature,
    /// The bytecode offset of the program point.
    pub offset: usize,
    /// The kind of the program point.
    pub kind: NodeKind,
}

impl std::fmt::Display for CfaNode {
    fn fmt(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.kind {
            NodeKind::Exit => write!(formatter, "{}:exit", self.signature),
            _ => write!(formatter, "{}:{}", self.signature, self.offset),
        }
    }
}

/// The edge type of a control flow automaton.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub enum CfaEdge {
    /// An intraprocedural edge corresponding to the execution of one instruction.
    Instruction(Instruction),
    /// An edge from a call site to the corresponding return site inside the caller.
    Call(CallInfo),
    /// An edge from a return instruction to the exit node of the containing method.
    Return,
}

impl CfaEdge {
    /// Returns whether the edge is a call edge.
    pub fn is_call(&self) -> bool {
        matches!(self, CfaEdge::Call(_))
    }
}

/// A control flow automaton for a set of methods,
/// with efficient lookup of the entry and exit nodes of each method.
pub struct Cfa {
    graph: CfaGraph,
    entry_nodes: FnvHashMap<MethodSignature, NodeIndex>,
    exit_nodes: FnvHashMap<MethodSignature, NodeIndex>,
}

impl Cfa {
    /// Get the underlying graph.
    pub fn graph(&self) -> &CfaGraph {
        &self.graph
    }

    /// Get the entry node of a method if its body is known.
    pub fn entry_node(&self, signature: &MethodSignature) -> Option<NodeIndex> {
        self.entry_nodes.get(signature).copied()
    }

    /// Get the exit node of a method if its body is known.
    pub fn exit_node(&self, signature: &MethodSignature) -> Option<NodeIndex> {
        self.exit_nodes.get(signature).copied()
    }

    /// Get the program point corresponding to a node index.
    pub fn node(&self, node: NodeIndex) -> &CfaNode {
        &self.graph[node]
    }

    /// Get the signature of the method containing the given node.
    pub fn signature_of(&self, node: NodeIndex) -> &MethodSignature {
        &self.graph[node].signature
    }

    /// Get the label of an edge.
    pub fn edge_label(&self, edge: EdgeIndex) -> &CfaEdge {
        &self.graph[edge]
    }

    /// Get the source node of an edge.
    pub fn edge_source(&self, edge: EdgeIndex) -> NodeIndex {
        self.graph.edge_endpoints(edge).expect("Edge not found").0
    }

    /// Get the target node of an edge.
    pub fn edge_target(&self, edge: EdgeIndex) -> NodeIndex {
        self.graph.edge_endpoints(edge).expect("Edge not found").1
    }

    /// Get the outgoing edges of a node.
    pub fn successor_edges(&self, node: NodeIndex) -> Vec<EdgeIndex> {
        self.graph
            .edges(node)
            .map(|edge_ref| edge_ref.id())
            .collect()
    }

    /// Iterate over the signatures of all methods with a known body.
    pub fn methods(&self) -> impl Iterator<Item = &MethodSignature> {
        self.entry_nodes.keys()
    }
}

/// One element of a method's code as consumed by the [`CfaBuilder`].
///
/// Code elements are addressed by their index in the method's code list,
/// which doubles as the bytecode offset of the generated program points.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub enum CodeOp {
    /// A straight-line instruction falling through to the next offset.
    Instruction(Instruction),
    /// An unconditional jump to the given offset.
    Branch {
        /// The jump target offset.
        target: usize,
    },
    /// A conditional jump that either falls through or jumps to the given offset.
    /// The condition operand is popped from the operand stack on both branches.
    ConditionalBranch {
        /// The jump target offset.
        target: usize,
    },
    /// A call falling through to the next offset after the callee returns.
    Call(CallInfo),
    /// A return from the method.
    Return,
}

/// A serializable description of one method body,
/// as produced by a bytecode frontend or written by hand for experiments.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct MethodDescription {
    /// The fully qualified name of the class containing the method.
    pub class: String,
    /// The name of the method.
    pub name: String,
    /// The JVM type descriptor of the method.
    pub descriptor: String,
    /// The code of the method.
    pub code: Vec<CodeOp>,
}

/// A serializable description of a program: all method bodies known to the frontend.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct ProgramDescription {
    /// The methods of the program.
    pub methods: Vec<MethodDescription>,
}

impl Cfa {
    /// Build a control flow automaton from a parsed program description.
    pub fn from_description(
        description: ProgramDescription,
    ) -> Result<(Cfa, Vec<LogMessage>), Error> {
        let mut builder = CfaBuilder::new();
        for method in description.methods {
            let signature = MethodSignature::new(method.class, method.name, method.descriptor);
            builder.add_method(signature, method.code)?;
        }
        Ok(builder.build())
    }
}

/// A builder struct for building control flow automata.
pub struct CfaBuilder {
    graph: CfaGraph,
    entry_nodes: FnvHashMap<MethodSignature, NodeIndex>,
    exit_nodes: FnvHashMap<MethodSignature, NodeIndex>,
    /// List of `LogMessage` generated while building.
    log_messages: Vec<LogMessage>,
}

impl CfaBuilder {
    /// Create a new builder with an empty automaton.
    pub fn new() -> CfaBuilder {
        CfaBuilder {
            graph: CfaGraph::new(),
            entry_nodes: FnvHashMap::default(),
            exit_nodes: FnvHashMap::default(),
            log_messages: Vec::new(),
        }
    }

    /// Add a method body to the automaton.
    ///
    /// Generates one node per code offset plus the method's exit node
    /// and the edges corresponding to the code elements.
    /// Returns an error for empty bodies, out-of-range jump targets
    /// and code that can fall off the end of the method.
    pub fn add_method(
        &mut self,
        signature: MethodSignature,
        code: Vec<CodeOp>,
    ) -> Result<(), Error> {
        if code.is_empty() {
            return Err(anyhow!("Method {} has an empty body", signature));
        }
        if self.entry_nodes.contains_key(&signature) {
            return Err(anyhow!("Method {} was added twice", signature));
        }
        let nodes: Vec<NodeIndex> = (0..code.len())
            .map(|offset| {
                self.graph.add_node(CfaNode {
                    signature: signature.clone(),
                    offset,
                    kind: if offset == 0 {
                        NodeKind::Entry
                    } else {
                        NodeKind::Regular
                    },
                })
            })
            .collect();
        let exit_node = self.graph.add_node(CfaNode {
            signature: signature.clone(),
            offset: code.len(),
            kind: NodeKind::Exit,
        });
        self.entry_nodes.insert(signature.clone(), nodes[0]);
        self.exit_nodes.insert(signature.clone(), exit_node);

        let fall_through = |offset: usize| -> Result<NodeIndex, Error> {
            nodes.get(offset + 1).copied().ok_or_else(|| {
                anyhow!(
                    "Method {} can fall off the end of its code at offset {}",
                    signature,
                    offset
                )
            })
        };
        let jump_target = |target: usize, offset: usize| -> Result<NodeIndex, Error> {
            nodes.get(target).copied().ok_or_else(|| {
                anyhow!(
                    "Jump target {} at offset {} is outside of method {}",
                    target,
                    offset,
                    signature
                )
            })
        };
        for (offset, op) in code.into_iter().enumerate() {
            match op {
                CodeOp::Instruction(instruction) => {
                    let target = fall_through(offset)?;
                    self.graph
                        .add_edge(nodes[offset], target, CfaEdge::Instruction(instruction));
                }
                CodeOp::Branch { target } => {
                    let target = jump_target(target, offset)?;
                    self.graph.add_edge(
                        nodes[offset],
                        target,
                        CfaEdge::Instruction(Instruction::Goto),
                    );
                }
                CodeOp::ConditionalBranch { target } => {
                    let taken = jump_target(target, offset)?;
                    let untaken = fall_through(offset)?;
                    self.graph
                        .add_edge(nodes[offset], taken, CfaEdge::Instruction(Instruction::If));
                    self.graph.add_edge(
                        nodes[offset],
                        untaken,
                        CfaEdge::Instruction(Instruction::If),
                    );
                }
                CodeOp::Call(call) => {
                    let return_site = fall_through(offset)?;
                    self.graph
                        .add_edge(nodes[offset], return_site, CfaEdge::Call(call));
                }
                CodeOp::Return => {
                    self.graph.add_edge(nodes[offset], exit_node, CfaEdge::Return);
                }
            }
        }
        Ok(())
    }

    /// Build the control flow automaton.
    ///
    /// Calls to methods without a known body are reported as log messages,
    /// since the analysis has to treat them as calls to unknown code.
    pub fn build(self) -> (Cfa, Vec<LogMessage>) {
        let mut log_messages = self.log_messages;
        for edge in self.graph.edge_indices() {
            if let CfaEdge::Call(call) = &self.graph[edge] {
                if !self.entry_nodes.contains_key(&call.callee) {
                    log_messages.push(
                        LogMessage::new_info("Call to method without known body")
                            .location(call.callee.clone()),
                    );
                }
            }
        }
        (
            Cfa {
                graph: self.graph,
                entry_nodes: self.entry_nodes,
                exit_nodes: self.exit_nodes,
            },
            log_messages,
        )
    }
}

impl Default for CfaBuilder {
    fn default() -> Self {
        CfaBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl Cfa {
        /// Mock automaton with a single straight-line method `main()I`:
        /// two constant pushes followed by an addition and a return.
        pub fn mock_straight_line() -> (Cfa, MethodSignature) {
            let signature = MethodSignature::new("Mock", "main", "()I");
            let mut builder = CfaBuilder::new();
            builder
                .add_method(
                    signature.clone(),
                    vec![
                        CodeOp::Instruction(Instruction::Push(2)),
                        CodeOp::Instruction(Instruction::Push(3)),
                        CodeOp::Instruction(Instruction::Add),
                        CodeOp::Return,
                    ],
                )
                .unwrap();
            (builder.build().0, signature)
        }

        /// Mock automaton with a `main` method calling `double(I)I` at two call sites.
        ///
        /// The caller state is restored between the two calls,
        /// so both call sites produce equal callee entry states.
        pub fn mock_two_call_sites() -> (Cfa, MethodSignature, MethodSignature) {
            let main = MethodSignature::new("Mock", "main", "()I");
            let double = MethodSignature::new("Mock", "double", "(I)I");
            let call = CallInfo {
                callee: double.clone(),
                argument_count: 1,
            };
            let mut builder = CfaBuilder::new();
            builder
                .add_method(
                    main.clone(),
                    vec![
                        CodeOp::Instruction(Instruction::Push(21)),
                        CodeOp::Call(call.clone()),
                        CodeOp::Instruction(Instruction::Pop),
                        CodeOp::Instruction(Instruction::Pop),
                        CodeOp::Instruction(Instruction::Push(21)),
                        CodeOp::Call(call),
                        CodeOp::Instruction(Instruction::Pop),
                        CodeOp::Instruction(Instruction::Pop),
                        CodeOp::Return,
                    ],
                )
                .unwrap();
            builder
                .add_method(
                    double.clone(),
                    vec![
                        CodeOp::Instruction(Instruction::Load(0)),
                        CodeOp::Instruction(Instruction::Load(0)),
                        CodeOp::Instruction(Instruction::Add),
                        CodeOp::Return,
                    ],
                )
                .unwrap();
            (builder.build().0, main, double)
        }

        /// Mock automaton with a method `rec(I)I` unconditionally calling itself.
        pub fn mock_recursive() -> (Cfa, MethodSignature, MethodSignature) {
            let main = MethodSignature::new("Mock", "main", "()I");
            let rec = MethodSignature::new("Mock", "rec", "(I)I");
            let self_call = CallInfo {
                callee: rec.clone(),
                argument_count: 1,
            };
            let mut builder = CfaBuilder::new();
            builder
                .add_method(
                    main.clone(),
                    vec![
                        CodeOp::Instruction(Instruction::Push(5)),
                        CodeOp::Call(CallInfo {
                            callee: rec.clone(),
                            argument_count: 1,
                        }),
                        CodeOp::Return,
                    ],
                )
                .unwrap();
            builder
                .add_method(
                    rec.clone(),
                    vec![
                        CodeOp::Instruction(Instruction::Load(0)),
                        CodeOp::Call(self_call),
                        CodeOp::Return,
                    ],
                )
                .unwrap();
            (builder.build().0, main, rec)
        }
    }

    #[test]
    fn build_straight_line_method() {
        let (cfa, signature) = Cfa::mock_straight_line();
        // Four code offsets plus the exit node; one edge per code element.
        assert_eq!(cfa.graph().node_count(), 5);
        assert_eq!(cfa.graph().edge_count(), 4);
        let entry = cfa.entry_node(&signature).unwrap();
        assert_eq!(cfa.node(entry).kind, NodeKind::Entry);
        assert_eq!(cfa.successor_edges(entry).len(), 1);
        assert!(cfa.exit_node(&signature).is_some());
    }

    #[test]
    fn conditional_branches_get_two_edges() {
        let signature = MethodSignature::new("Mock", "loop", "()V");
        let mut builder = CfaBuilder::new();
        builder
            .add_method(
                signature.clone(),
                vec![
                    CodeOp::Instruction(Instruction::Push(1)),
                    CodeOp::ConditionalBranch { target: 0 },
                    CodeOp::Return,
                ],
            )
            .unwrap();
        let (cfa, logs) = builder.build();
        assert!(logs.is_empty());
        assert_eq!(cfa.graph().node_count(), 4);
        assert_eq!(cfa.graph().edge_count(), 4);
    }

    #[test]
    fn falling_off_the_end_is_rejected() {
        let signature = MethodSignature::new("Mock", "bad", "()V");
        let mut builder = CfaBuilder::new();
        assert!(builder
            .add_method(
                signature,
                vec![CodeOp::Instruction(Instruction::Push(1))],
            )
            .is_err());
    }

    #[test]
    fn out_of_range_jump_target_is_rejected() {
        let signature = MethodSignature::new("Mock", "bad", "()V");
        let mut builder = CfaBuilder::new();
        assert!(builder
            .add_method(signature, vec![CodeOp::Branch { target: 7 }])
            .is_err());
    }

    #[test]
    fn unknown_callee_is_logged() {
        let signature = MethodSignature::new("Mock", "main", "()V");
        let mut builder = CfaBuilder::new();
        builder
            .add_method(
                signature,
                vec![
                    CodeOp::Call(CallInfo {
                        callee: MethodSignature::new("Mock", "missing", "()V"),
                        argument_count: 0,
                    }),
                    CodeOp::Return,
                ],
            )
            .unwrap();
        let (_cfa, logs) = builder.build();
        assert_eq!(logs.len(), 1);
    }
}
