#[path = "common/mod.rs"]
mod common;

#[path = "tensor/tensor_shapes.rs"]
mod tensor_shapes;
#[path = "tensor/tensor_handles.rs"]
mod tensor_handles;

#[path = "graph/graph_build.rs"]
mod graph_build;
#[path = "graph/graph_shapes.rs"]
mod graph_shapes;
#[path = "graph/graph_control_flow.rs"]
mod graph_control_flow;

#[path = "runner/runner_exec.rs"]
mod runner_exec;
