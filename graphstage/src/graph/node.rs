//! Symbolic graph nodes and the operator surface they expose.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::backend::OpId;
use crate::tensor::Shape;

/// Identity of one graph instance. Nodes carry the id of the graph that
/// created them; ids are process-unique so a node can never be mistaken for
/// one of another graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphId(u64);

impl GraphId {
    pub(crate) fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Reference to an operation result inside one graph.
///
/// `deps` holds clones of the input nodes and exists only for the structural
/// dump; execution wiring lives in the backend builder.
#[derive(Debug, Clone)]
pub struct NodeRef {
    pub(crate) graph: GraphId,
    pub(crate) op: OpId,
    pub(crate) label: String,
    pub(crate) info: Option<String>,
    pub(crate) deps: Vec<Node>,
}

/// A tuple-shaped node and its component count.
#[derive(Debug, Clone)]
pub struct TupleRef {
    pub(crate) node: NodeRef,
    pub(crate) size: usize,
}

/// Symbolic reference to a computed value inside one graph.
///
/// Tuple-shaped results are a distinct variant so element access never needs
/// a runtime type assertion.
#[derive(Debug, Clone)]
pub enum Node {
    Plain(NodeRef),
    Tuple(TupleRef),
}

impl Node {
    pub(crate) fn node_ref(&self) -> &NodeRef {
        match self {
            Node::Plain(node) => node,
            Node::Tuple(tuple) => &tuple.node,
        }
    }

    pub(crate) fn graph_id(&self) -> GraphId {
        self.node_ref().graph
    }

    pub(crate) fn op_id(&self) -> OpId {
        self.node_ref().op
    }

    /// Number of components, if this node is a tuple.
    pub fn tuple_size(&self) -> Option<usize> {
        match self {
            Node::Plain(_) => None,
            Node::Tuple(tuple) => Some(tuple.size),
        }
    }

    fn fmt_indent(&self, f: &mut fmt::Formatter<'_>, level: usize) -> fmt::Result {
        let node = self.node_ref();
        write!(f, "{:width$}{}", "", node.label, width = level * 2)?;
        if let Some(info) = &node.info {
            write!(f, "[{info}]")?;
        }
        if let Node::Tuple(tuple) = self {
            write!(f, "<{}>", tuple.size)?;
        }
        if !node.deps.is_empty() {
            writeln!(f, " {{")?;
            for dep in &node.deps {
                dep.fmt_indent(f, level + 1)?;
                writeln!(f)?;
            }
            write!(f, "{:width$}}}", "", width = level * 2)?;
        }
        Ok(())
    }
}

// The structural dump: op labels with brace-indented dependency trees.
impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indent(f, 0)
    }
}

/// A graph output: the node plus the shape the caller declared for it.
#[derive(Debug, Clone)]
pub struct OutputNode {
    pub node: Node,
    pub shape: Shape,
}

impl OutputNode {
    pub fn new(node: Node, shape: Shape) -> Self {
        Self { node, shape }
    }
}

/// Language-level unary operators the bridge knows how to map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Unary plus, mapped to the identity.
    Plus,
    Neg,
    Not,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            UnaryOp::Plus => "+",
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
        };
        write!(f, "{symbol}")
    }
}

/// Language-level binary operators the bridge knows how to map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Shl,
    /// Dtype-directed: logical shift for unsigned operands, arithmetic for
    /// signed ones.
    Shr,
    BitAnd,
    BitOr,
    BitXor,
    /// Bit clear. Has no primitive mapping and always fails.
    AndNot,
    LogicalAnd,
    LogicalOr,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::AndNot => "&^",
            BinaryOp::LogicalAnd => "&&",
            BinaryOp::LogicalOr => "||",
        };
        write!(f, "{symbol}")
    }
}
