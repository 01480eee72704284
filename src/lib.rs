//! Lowers a DAG of timestepper instructions into a structured control flow
//! graph (CFG) of basic blocks suitable for code generation into an
//! imperative target.
//!
//! The crate is a single compiler pass with four coupled jobs: a
//! dependency-preserving [transitive reduction](reduce) of the instruction
//! DAG, a [maximal straight-line partition](partition) of the reduced graph
//! into blocks, [flag-guarded emission](assemble) that runs each block at
//! most once per function invocation, and structured lowering of
//! conditionals and yields into a [`Function`](ir::Function) whose every
//! block terminates.
//!
//! [`lower`] is the single entry point most callers need; the per-component
//! modules remain public for callers that want to inspect or test an
//! intermediate stage (the reduced graph, the block partition, the flag
//! tracker) on their own.
//!
//! Parsing and semantic-checking of the instruction source language, the
//! target-language code emitter that walks the resulting CFG, numerical
//! method construction, and the convergence test harness are all external
//! collaborators: this crate consumes an instruction set through
//! [`instruction::Instruction`] and produces a [`ir::Function`], nothing
//! else.

mod assemble;
mod augment;
mod dag;
mod error;
mod flags;
mod graph;
mod instruction;
mod ir;
mod partition;
mod reach;
mod reduce;

pub use assemble::lower;
pub use augment::{augment, Augmented};
pub use dag::{topological_sort, DagView, VertexId};
pub use error::LoweringError;
pub use flags::FlagTracker;
pub use graph::Graph;
pub use instruction::{Expr, Instruction, InstructionId, InstructionKind, Name, VarName};
pub use ir::{
    BasicBlock, BasicBlockId, Cond, Function, Statement, Symbol, SymbolTable, Terminator,
};
pub use partition::{partition, Block, BlockGraph, BlockRef, Partition};
pub use reach::extract;
pub use reduce::{transitive_reduction, ReducedGraph};
