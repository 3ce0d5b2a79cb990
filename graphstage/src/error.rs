use crate::tensor::{DType, Shape};

/// Failures surfaced by the bridge.
///
/// All of these are returned to the caller; nothing is retried here and no
/// malformed input ever aborts the process.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The data type has no equivalent on the backend.
    #[error("data type {dtype} is not supported by the {backend} backend")]
    UnsupportedDType { dtype: DType, backend: String },

    /// A language-level operator has no primitive mapping.
    #[error("operator {0} not supported")]
    UnsupportedOperator(String),

    /// A shape or axis precondition was violated.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Expected and actual shapes disagree at a transfer or compile boundary.
    #[error("backend returned a buffer with shape {got} but {want} was expected")]
    ShapeMismatch { got: Shape, want: Shape },

    /// The backend rejected a computation. For control-flow subgraphs the
    /// structural dump of the failing subgraph is attached.
    #[error("cannot compile graph {graph}: {detail}{}", dump_suffix(.dump))]
    Compilation {
        graph: String,
        detail: String,
        dump: Option<String>,
    },

    /// The backend failed while running a compiled executable.
    #[error("execution failed: {0}")]
    Execution(String),
}

fn dump_suffix(dump: &Option<String>) -> String {
    match dump {
        Some(text) => format!("\n{text}"),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, Error>;
