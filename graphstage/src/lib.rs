pub mod logging;

mod backend;
mod error;
mod graph;
mod platform;
mod runner;
mod tensor;

pub use backend::interp::InterpClient;
pub use backend::{
    OpId, PluginBuffer, PluginBuilder, PluginClient, PluginComputation, PluginExecutable,
    PluginOptions, PrimitiveOp, ReduceFn, ValueShape,
};
pub use error::{Error, Result};
pub use graph::{
    BinaryOp, Graph, GraphId, Node, NodeRef, OutputNode, Subgraph, TupleRef, UnaryOp,
};
pub use platform::{Device, Handle, Platform};
pub use runner::Runner;
pub use tensor::{DType, HostBuffer, Shape, TensorElement};
