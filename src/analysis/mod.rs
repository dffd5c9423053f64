//! Declarative analysis over shared buffers.
//!
//! An analysis graph is an ordered list of modules. Each module reads whole
//! buffers or literal values, applies one [`Operator`], and writes its results
//! to output buffers. The graph runs on its own thread, sleeping between
//! iterations for a fixed or buffer-driven delay.

pub mod graph;
pub mod module;
pub mod operator;
pub mod ops;

pub use graph::{AnalysisGraph, AnalysisRunner};
pub use module::{Module, ModuleInput, ModuleOutput};
pub use operator::{Operator, RoundMode, TrigFunction};
