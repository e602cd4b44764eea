//! The analysis engine:
//! control flow automata, the configurable program analysis algorithm
//! and its interprocedural extension via block abstraction memoization,
//! as well as analyses built on top of these modules.

pub mod bam;
pub mod cfa;
pub mod constant_propagation;
pub mod cpa;
