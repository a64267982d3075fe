//! Abstract syntax tree for textual context expressions.

use crate::value::Value;
use std::fmt;

/// One step of a `this...` path.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
}

/// Built-in functions callable from expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Len,
    /// Metadata accessors; they take a path argument, not a value.
    Offset,
    Size,
    EndOffset,
    PtrSize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprNode {
    Literal(Value),
    /// `this` followed by segments; empty means the current scope itself.
    Path(Vec<Segment>),
    Unary(UnaryOp, Box<ExprNode>),
    Binary(BinaryOp, Box<ExprNode>, Box<ExprNode>),
    Call(Function, Vec<ExprNode>),
}

impl Function {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "len" => Some(Function::Len),
            "offset" => Some(Function::Offset),
            "size" => Some(Function::Size),
            "end_offset" => Some(Function::EndOffset),
            "ptr_size" => Some(Function::PtrSize),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Function::Len => "len",
            Function::Offset => "offset",
            Function::Size => "size",
            Function::EndOffset => "end_offset",
            Function::PtrSize => "ptr_size",
        }
    }
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Or => "or",
            BinaryOp::And => "and",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::FloorDiv => "//",
            BinaryOp::Mod => "%",
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(k) => write!(f, ".{}", k),
            Segment::Index(i) => write!(f, "[{}]", i),
        }
    }
}

impl fmt::Display for ExprNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprNode::Literal(Value::Str(s)) => write!(f, "{:?}", s),
            ExprNode::Literal(Value::None) => write!(f, "none"),
            ExprNode::Literal(v) => match v.as_i128() {
                Some(x) if v.is_integer() => write!(f, "{}", x),
                _ => write!(f, "{:?}", v),
            },
            ExprNode::Path(segments) => {
                write!(f, "this")?;
                segments.iter().try_for_each(|s| write!(f, "{}", s))
            }
            ExprNode::Unary(UnaryOp::Neg, e) => write!(f, "-{}", e),
            ExprNode::Unary(UnaryOp::Not, e) => write!(f, "not {}", e),
            ExprNode::Binary(op, l, r) => write!(f, "({} {} {})", l, op.symbol(), r),
            ExprNode::Call(func, args) => {
                write!(f, "{}(", func.name())?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}
