/*!
The main library of the jvm_cpa analyzer,
containing a configurable program analysis engine for JVM bytecode.

# What is jvm_cpa

jvm_cpa is a generic static analysis engine in the *configurable program analysis* (CPA) style:
an analysis is assembled from an abstract domain and a set of pluggable operators
(transfer, merge, stop, precision adjustment),
and a single reachability algorithm drives any such analysis to a fixpoint
over a control flow automaton.

Interprocedural analysis is made tractable through *block abstraction memoization* (BAM):
procedure bodies are analyzed separately and their effect is memoized
as a summary keyed by the procedure's signature and its (reduced) entry state.
Repeated calls with equivalent entry states reuse the summary instead of reanalyzing the callee.
Caller states are tunneled through procedure boundaries
by pluggable *reduce* and *expand* operators,
whose composition is selected by the configured heap model.
The depth of the interprocedural recursion is bounded
by a configurable maximum call stack depth,
which guarantees termination on recursive call graphs.

# Usage

If the analyzer is installed locally, just run
```sh
jvm_cpa PROGRAM.json
```
where `PROGRAM.json` contains a program description
(see [`analysis::cfa::ProgramDescription`]).
One can modify the behaviour of the analyzer through the command line
and through a configuration file provided via the `--config` command line option
(see [`analysis::bam::Config`] for the available fields).

# Architecture

* [`bytecode`] contains the minimal bytecode representation consumed by the engine.
* [`analysis::cfa`] builds control flow automata out of method descriptions.
* [`abstract_domain`] defines the lattice contracts every abstract domain has to satisfy
  as well as several concrete domains.
* [`analysis::cpa`] contains the operator interfaces, the reached set, the waitlist
  and the reachability algorithm.
* [`analysis::bam`] contains the block summary cache, the reduce/expand operator protocol
  and the orchestration of interprocedural analysis runs.
* [`analysis::constant_propagation`] is a small constant propagation analysis
  built on top of the framework.
*/

pub mod abstract_domain;
pub mod analysis;
pub mod bytecode;
pub mod utils;

mod prelude {
    pub use anyhow::{anyhow, Error};
    pub use serde::{Deserialize, Serialize};
}
