//! Orchestration of one interprocedural analysis run.
//!
//! A [`BamCpaRun`] bundles everything one top-level analysis needs:
//! the wrapped intraprocedural analysis, the call stack depth bound,
//! the heap model selecting the installed reduce/expand operator composition,
//! the abort operator and the waitlist exploration order.
//! One run instance performs exactly one analysis —
//! the block summary cache and the reached set are tied to its lifetime,
//! so [`BamCpaRun::run`] consumes the run.

use super::reduce_expand::{
    CompositeExpandOperator, CompositeReduceOperator, DefaultExpandOperator, DefaultReduceOperator,
    ExpandOperator, ReduceOperator, ReferenceExpandOperator, ReferenceReduceOperator,
};
use super::{BamCpa, BamStatistics};
use crate::abstract_domain::{CallAbstraction, HasTop};
use crate::analysis::cfa::Cfa;
use crate::analysis::cpa::{
    AbortOperator, AbstractState, Completion, ConfigurableProgramAnalysis, CpaAlgorithm,
    NeverAbortOperator, ProgramLocation, ProgramLocationDependentReachedSet,
    StateCountAbortOperator, Waitlist, WaitlistOrder,
};
use crate::bytecode::MethodSignature;
use crate::prelude::*;
use crate::utils::log::{LogMessage, LogThreadMsg};
use itertools::Itertools;
use std::str::FromStr;
use std::sync::Arc;

/// The heap model determining which reduce/expand operator composition is installed.
///
/// The model is fixed at run construction time and immutable for the run's lifetime.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum HeapModel {
    /// Identity reduce/expand only.
    /// Intended for analyses whose domain does not model the heap,
    /// so no heap information survives a call boundary.
    Forgetful,
    /// The reference/heap-shape reduce/expand operator followed by the default operator,
    /// preserving tree-shaped heap reachability information across calls.
    TreeStructured,
}

impl FromStr for HeapModel {
    type Err = Error;

    fn from_str(string: &str) -> Result<Self, Error> {
        match string {
            "forgetful" => Ok(HeapModel::Forgetful),
            "tree" => Ok(HeapModel::TreeStructured),
            other => Err(anyhow!("Heap model {} is not supported", other)),
        }
    }
}

/// Configurable parameters of an interprocedural analysis run.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Config {
    /// The maximum depth of the call stack analyzed interprocedurally.
    /// 0 means intraprocedural analysis only, a negative value means no maximum depth.
    pub max_call_stack_depth: i64,
    /// The heap model, `"forgetful"` or `"tree"`.
    pub heap_model: String,
    /// If set, the analysis is aborted once the reached set of some block computation
    /// contains at least this many states.
    pub abort_state_limit: Option<u64>,
    /// The waitlist exploration order, `"lifo"` or `"fifo"`.
    pub waitlist_order: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_call_stack_depth: 10,
            heap_model: "forgetful".to_string(),
            abort_state_limit: None,
            waitlist_order: "lifo".to_string(),
        }
    }
}

/// The result of one interprocedural analysis run.
#[derive(Serialize, Debug)]
pub struct BamAnalysisOutcome<V> {
    /// All abstract states discovered by the top-level computation,
    /// queryable by program location.
    /// States of nested block computations are summarized in the block cache
    /// and surface here only through the expanded states at return sites.
    pub reached: ProgramLocationDependentReachedSet<V>,
    /// Whether the analysis explored all pending states.
    /// An aborted analysis yields a potentially unsound partial result.
    pub completion: Completion,
    /// Cache and truncation counters of the run.
    pub statistics: BamStatistics,
}

impl<V: crate::abstract_domain::AbstractDomain + Serialize> BamAnalysisOutcome<V> {
    /// Generate a compacted json representation of the reached states,
    /// keyed by a textual rendering of their program locations.
    /// Note that this output cannot be used for deserialization,
    /// but is only intended for user output and debugging.
    pub fn generate_compact_json(&self, cfa: &Cfa) -> serde_json::Value {
        let mut json_nodes = serde_json::Map::new();
        for location in self
            .reached
            .locations()
            .sorted_by_key(|location| location.describe(cfa))
        {
            json_nodes.insert(
                location.describe(cfa),
                serde_json::to_value(self.reached.states_at(location))
                    .unwrap_or(serde_json::Value::Null),
            );
        }
        serde_json::Value::Object(json_nodes)
    }

    /// Print the reached states serialized as YAML to stdout.
    pub fn print_yaml(&self, cfa: &Cfa) {
        for (location, state) in self.reached.iter() {
            if let Ok(string) = serde_yaml::to_string(&(location.describe(cfa), state)) {
                println!("{}", string);
            }
        }
    }
}

/// Construct the reduce/expand operator pair installed by the given heap model.
fn create_reduce_expand_operators<V: CallAbstraction + HasTop + 'static>(
    heap_model: HeapModel,
) -> (Box<dyn ReduceOperator<V>>, Box<dyn ExpandOperator<V>>) {
    match heap_model {
        HeapModel::Forgetful => (
            Box::new(DefaultReduceOperator),
            Box::new(DefaultExpandOperator),
        ),
        HeapModel::TreeStructured => (
            Box::new(CompositeReduceOperator::new(vec![
                Box::new(ReferenceReduceOperator),
                Box::new(DefaultReduceOperator),
            ])),
            Box::new(CompositeExpandOperator::new(vec![
                Box::new(ReferenceExpandOperator),
                Box::new(DefaultExpandOperator),
            ])),
        ),
    }
}

/// One interprocedural analysis run.
pub struct BamCpaRun<C: ConfigurableProgramAnalysis>
where
    C::Value: HasTop,
{
    bam_cpa: BamCpa<C>,
    heap_model: HeapModel,
    log_sender: Option<crossbeam_channel::Sender<LogThreadMsg>>,
}

impl<C: ConfigurableProgramAnalysis> BamCpaRun<C>
where
    C::Value: CallAbstraction + HasTop + 'static,
{
    /// Create a new run.
    ///
    /// `max_call_stack_depth` bounds the interprocedural recursion:
    /// 0 analyzes intraprocedurally only,
    /// a positive value analyzes calls up to that depth,
    /// a negative value disables the bound.
    pub fn new(
        cpa: C,
        max_call_stack_depth: i64,
        heap_model: HeapModel,
        abort_operator: Arc<dyn AbortOperator>,
        waitlist_order: WaitlistOrder,
    ) -> Self {
        let (reduce_operator, expand_operator) = create_reduce_expand_operators(heap_model);
        BamCpaRun {
            bam_cpa: BamCpa::new(
                cpa,
                reduce_operator,
                expand_operator,
                max_call_stack_depth,
                waitlist_order,
                abort_operator,
            ),
            heap_model,
            log_sender: None,
        }
    }

    /// Create a new run from a configuration struct.
    ///
    /// Unsupported heap model or waitlist order values are configuration errors
    /// reported here, before any analysis is started.
    pub fn from_config(cpa: C, config: &Config) -> Result<Self, Error> {
        let heap_model = config.heap_model.parse()?;
        let waitlist_order = config.waitlist_order.parse()?;
        let abort_operator: Arc<dyn AbortOperator> = match config.abort_state_limit {
            Some(limit) => Arc::new(StateCountAbortOperator { limit }),
            None => Arc::new(NeverAbortOperator),
        };
        Ok(BamCpaRun::new(
            cpa,
            config.max_call_stack_depth,
            heap_model,
            abort_operator,
            waitlist_order,
        ))
    }

    /// Attach a sender for progress and statistics log messages.
    pub fn with_log_sender(
        mut self,
        log_sender: crossbeam_channel::Sender<LogThreadMsg>,
    ) -> Self {
        self.log_sender = Some(log_sender);
        self
    }

    /// Get the control flow automaton the run analyzes.
    pub fn cfa(&self) -> &Cfa {
        self.bam_cpa.cfa()
    }

    /// Get the heap model of the run.
    pub fn heap_model(&self) -> HeapModel {
        self.heap_model
    }

    /// Get the installed reduce operator for diagnostic purposes.
    pub fn reduce_operator(&self) -> &dyn ReduceOperator<C::Value> {
        self.bam_cpa.reduce_operator()
    }

    /// Create an empty reached set with program-location keyed lookup,
    /// as used by the run itself.
    pub fn create_reached_set(&self) -> ProgramLocationDependentReachedSet<C::Value> {
        ProgramLocationDependentReachedSet::new()
    }

    /// Create the initial state of the analysis:
    /// the given value at the entry node of the given method, with an empty call string.
    pub fn initial_state(
        &self,
        signature: &MethodSignature,
        value: C::Value,
    ) -> Result<AbstractState<C::Value>, Error> {
        let entry_node = self
            .cfa()
            .entry_node(signature)
            .ok_or_else(|| anyhow!("Method {} has no known body", signature))?;
        Ok(AbstractState::new(ProgramLocation::root(entry_node), value))
    }

    /// Perform the analysis, consuming the run.
    pub fn run(self, initial: AbstractState<C::Value>) -> BamAnalysisOutcome<C::Value> {
        self.log_debug(format!(
            "Starting exploration at {}",
            initial.location.describe(self.cfa())
        ));
        let mut reached = self.create_reached_set();
        let mut waitlist = Waitlist::new(self.bam_cpa.waitlist_order());
        let algorithm = CpaAlgorithm::new(&self.bam_cpa, self.bam_cpa.abort_operator());
        algorithm.seed(&mut reached, &mut waitlist, initial);
        let completion = algorithm.run(&mut reached, &mut waitlist);
        let statistics = self.bam_cpa.statistics();
        self.log_debug(format!(
            "Block summaries: {} cache hits, {} cache misses, {} depth truncations",
            statistics.cache_hits, statistics.cache_misses, statistics.depth_truncations
        ));
        if !completion.is_complete() {
            self.log_info("Analysis aborted, the results are incomplete");
        }
        BamAnalysisOutcome {
            reached,
            completion,
            statistics,
        }
    }

    fn log_debug(&self, text: impl Into<String>) {
        if let Some(sender) = &self.log_sender {
            let _ = sender.send(LogThreadMsg::Log(LogMessage::new_debug(text.into())));
        }
    }

    fn log_info(&self, text: impl Into<String>) {
        if let Some(sender) = &self.log_sender {
            let _ = sender.send(LogThreadMsg::Log(LogMessage::new_info(text.into())));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abstract_domain::{
        FlatDomain, JvmFrameState, ObjectId, PairDomain, ReferenceDomain, RootKey,
    };
    use crate::analysis::cfa::{CfaBuilder, CodeOp};
    use crate::analysis::constant_propagation::{
        ConstantPropagation, HeapAwareConstantPropagation,
    };
    use crate::bytecode::{CallInfo, Instruction};

    fn forgetful_run<'a>(
        cfa: &'a Cfa,
        max_call_stack_depth: i64,
    ) -> BamCpaRun<ConstantPropagation<'a>> {
        BamCpaRun::new(
            ConstantPropagation::new(cfa),
            max_call_stack_depth,
            HeapModel::Forgetful,
            Arc::new(NeverAbortOperator),
            WaitlistOrder::default(),
        )
    }

    #[test]
    fn unsupported_heap_model_fails_fast() {
        assert!("tree".parse::<HeapModel>().is_ok());
        assert!("forgetful".parse::<HeapModel>().is_ok());
        assert!("list".parse::<HeapModel>().is_err());
        let (cfa, _) = Cfa::mock_straight_line();
        let config = Config {
            heap_model: "list".to_string(),
            ..Config::default()
        };
        assert!(BamCpaRun::from_config(ConstantPropagation::new(&cfa), &config).is_err());
    }

    #[test]
    fn second_call_site_reuses_the_block_summary() {
        let (cfa, main, _double) = Cfa::mock_two_call_sites();
        let run = forgetful_run(&cfa, 10);
        let initial = run.initial_state(&main, JvmFrameState::new()).unwrap();
        let exit_location = ProgramLocation::root(cfa.exit_node(&main).unwrap());
        let outcome = run.run(initial);
        assert!(outcome.completion.is_complete());
        assert_eq!(outcome.statistics.cache_misses, 1);
        assert_eq!(outcome.statistics.cache_hits, 1);
        assert_eq!(outcome.statistics.depth_truncations, 0);
        assert_eq!(outcome.reached.states_at(&exit_location).len(), 1);
    }

    #[test]
    fn recursion_is_cut_off_at_the_depth_bound() {
        let (cfa, _main, rec) = Cfa::mock_recursive();
        let run = forgetful_run(&cfa, 2);
        let initial = run.initial_state(&rec, JvmFrameState::new()).unwrap();
        let exit_location = ProgramLocation::root(cfa.exit_node(&rec).unwrap());
        let outcome = run.run(initial);
        assert!(outcome.completion.is_complete());
        // Two nested block computations, then the third call collapses
        // to a conservative summary instead of recursing further.
        assert_eq!(outcome.statistics.cache_misses, 2);
        assert_eq!(outcome.statistics.depth_truncations, 1);
        assert!(!outcome.reached.states_at(&exit_location).is_empty());
    }

    #[test]
    fn depth_zero_is_intraprocedural_only() {
        let main = MethodSignature::new("Mock", "main", "()I");
        let callee = MethodSignature::new("Mock", "f", "(I)I");
        let mut builder = CfaBuilder::new();
        builder
            .add_method(
                main.clone(),
                vec![
                    CodeOp::Instruction(Instruction::Push(1)),
                    CodeOp::Call(CallInfo {
                        callee: callee.clone(),
                        argument_count: 1,
                    }),
                    CodeOp::Return,
                ],
            )
            .unwrap();
        builder
            .add_method(
                callee,
                vec![CodeOp::Instruction(Instruction::Load(0)), CodeOp::Return],
            )
            .unwrap();
        let (cfa, _) = builder.build();
        let run = forgetful_run(&cfa, 0);
        let initial = run.initial_state(&main, JvmFrameState::new()).unwrap();
        let exit_location = ProgramLocation::root(cfa.exit_node(&main).unwrap());
        let outcome = run.run(initial);
        assert!(outcome.completion.is_complete());
        assert_eq!(outcome.statistics.cache_misses, 0);
        assert_eq!(outcome.statistics.depth_truncations, 1);
        // The callee was never analyzed; the caller continues with a conservative state.
        let exit_states = outcome.reached.states_at(&exit_location);
        assert_eq!(exit_states.len(), 1);
        assert_eq!(exit_states[0].stack(), &[FlatDomain::Top]);
    }

    #[test]
    fn calls_to_unknown_code_are_conservative() {
        let main = MethodSignature::new("Mock", "main", "()I");
        let mut builder = CfaBuilder::new();
        builder
            .add_method(
                main.clone(),
                vec![
                    CodeOp::Instruction(Instruction::Push(1)),
                    CodeOp::Call(CallInfo {
                        callee: MethodSignature::new("Lib", "external", "(I)I"),
                        argument_count: 1,
                    }),
                    CodeOp::Return,
                ],
            )
            .unwrap();
        let (cfa, _) = builder.build();
        let run = forgetful_run(&cfa, 10);
        let initial = run.initial_state(&main, JvmFrameState::new()).unwrap();
        let exit_location = ProgramLocation::root(cfa.exit_node(&main).unwrap());
        let outcome = run.run(initial);
        assert!(outcome.completion.is_complete());
        assert_eq!(outcome.statistics.cache_misses, 0);
        let exit_states = outcome.reached.states_at(&exit_location);
        assert_eq!(exit_states[0].stack(), &[FlatDomain::Top]);
    }

    #[test]
    fn constant_return_values_flow_back_to_the_caller() {
        let main = MethodSignature::new("Mock", "main", "()I");
        let callee = MethodSignature::new("Mock", "seven", "()I");
        let mut builder = CfaBuilder::new();
        builder
            .add_method(
                main.clone(),
                vec![
                    CodeOp::Call(CallInfo {
                        callee: callee.clone(),
                        argument_count: 0,
                    }),
                    CodeOp::Return,
                ],
            )
            .unwrap();
        builder
            .add_method(
                callee,
                vec![CodeOp::Instruction(Instruction::Push(7)), CodeOp::Return],
            )
            .unwrap();
        let (cfa, _) = builder.build();
        let run = forgetful_run(&cfa, 10);
        let initial = run.initial_state(&main, JvmFrameState::new()).unwrap();
        let exit_location = ProgramLocation::root(cfa.exit_node(&main).unwrap());
        let outcome = run.run(initial);
        let exit_states = outcome.reached.states_at(&exit_location);
        assert_eq!(exit_states[0].stack(), &[FlatDomain::from(7)]);
    }

    #[test]
    fn aborted_nested_computations_flag_the_whole_run() {
        let (cfa, main, _double) = Cfa::mock_two_call_sites();
        let run = BamCpaRun::new(
            ConstantPropagation::new(&cfa),
            10,
            HeapModel::Forgetful,
            Arc::new(StateCountAbortOperator { limit: 3 }),
            WaitlistOrder::default(),
        );
        let initial = run.initial_state(&main, JvmFrameState::new()).unwrap();
        let outcome = run.run(initial);
        assert!(!outcome.completion.is_complete());
    }

    #[test]
    fn tree_model_carries_heap_effects_across_calls() {
        // `main` allocates a Node and passes it to `init`,
        // which hangs a fresh object onto its `next` field.
        // With the tree-structured heap model the caller must see that field edge
        // after the call returns.
        let main = MethodSignature::new("Mock", "main", "()V");
        let init = MethodSignature::new("Mock", "init", "(LNode;)V");
        let mut builder = CfaBuilder::new();
        builder
            .add_method(
                main.clone(),
                vec![
                    CodeOp::Instruction(Instruction::New("Node".to_string())),
                    CodeOp::Instruction(Instruction::Store(0)),
                    CodeOp::Instruction(Instruction::Load(0)),
                    CodeOp::Call(CallInfo {
                        callee: init.clone(),
                        argument_count: 1,
                    }),
                    CodeOp::Return,
                ],
            )
            .unwrap();
        builder
            .add_method(
                init,
                vec![
                    CodeOp::Instruction(Instruction::Load(0)),
                    CodeOp::Instruction(Instruction::New("Fresh".to_string())),
                    CodeOp::Instruction(Instruction::PutField("next".to_string())),
                    CodeOp::Return,
                ],
            )
            .unwrap();
        let (cfa, _) = builder.build();
        let run = BamCpaRun::new(
            HeapAwareConstantPropagation::new(&cfa),
            10,
            HeapModel::TreeStructured,
            Arc::new(NeverAbortOperator),
            WaitlistOrder::default(),
        );
        let initial = run
            .initial_state(
                &main,
                PairDomain(JvmFrameState::new(), ReferenceDomain::new()),
            )
            .unwrap();
        let exit_location = ProgramLocation::root(cfa.exit_node(&main).unwrap());
        let outcome = run.run(initial);
        assert!(outcome.completion.is_complete());
        assert_eq!(outcome.statistics.cache_misses, 1);
        let exit_states = outcome.reached.states_at(&exit_location);
        assert_eq!(exit_states.len(), 1);
        let PairDomain(_, heap) = &exit_states[0];
        let graph = heap.graph().unwrap();
        let node = ObjectId::new("Node", 0);
        assert!(graph.targets(&RootKey::Local(0)).contains(&node));
        let next_targets = graph.field_targets(&[node].into_iter().collect(), "next");
        assert!(next_targets.contains(&ObjectId::new("Fresh", 1)));
    }
}
