//! meshgen library
//!
//! Compiles procedural mesh graphs into runtime node graphs and converts
//! source mesh sections into runtime-ready vertex and index buffers.

pub mod assets;
pub mod bones;
pub mod compile;
pub mod config;
pub mod convert;
pub mod dedup;
pub mod diagnostics;
pub mod graph;
pub mod project;
pub mod report;
pub mod services;
pub mod skin;

// Re-export the entry points used by the CLI and hosts
pub use compile::{CompiledGraph, compile_graph};
pub use config::{CompilerOptions, load_options};
pub use convert::{CompilationContext, MeshSource, convert_skeletal_mesh, convert_static_mesh};
pub use project::Project;
pub use report::CompileReport;
