//! Context-dependent expressions.
//!
//! An [`Expr`] is a pure function from a [`Context`] to a [`Value`]: a
//! constant, a Rust closure, or a tree parsed from text such as
//! `len(this.items)` or `this._.header.kind == 2`.

use crate::ast::{BinaryOp, ExprNode, Function, Segment, UnaryOp};
use crate::codec::{CodecError, Result};
use crate::context::Context;
use crate::parser;
use crate::value::{MetaInformation, Value};
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

pub type ExprFn = Rc<dyn Fn(&Context<'_>) -> Result<Value>>;

#[derive(Clone)]
pub enum Expr {
    Const(Box<Value>),
    Tree(Rc<ExprNode>),
    Func(ExprFn),
}

impl Expr {
    /// Parse textual expression source.
    pub fn parse(source: &str) -> Result<Expr> {
        parser::parse(source)
            .map(|node| Expr::Tree(Rc::new(node)))
            .map_err(|e| CodecError::expression(e, "(expression)"))
    }

    pub fn constant(value: impl Into<Value>) -> Expr {
        Expr::Const(Box::new(value.into()))
    }

    pub fn func<F>(f: F) -> Expr
    where
        F: Fn(&Context<'_>) -> Result<Value> + 'static,
    {
        Expr::Func(Rc::new(f))
    }

    /// Path relative to the current scope, e.g. `Expr::this("header.length")`.
    pub fn this(path: &str) -> Expr {
        let segments = path
            .split('.')
            .filter(|s| !s.is_empty())
            .map(|s| Segment::Key(s.to_string()))
            .collect();
        Expr::Tree(Rc::new(ExprNode::Path(segments)))
    }

    pub fn evaluate(&self, ctx: &Context<'_>, path: &str) -> Result<Value> {
        match self {
            Expr::Const(v) => Ok((**v).clone()),
            Expr::Tree(node) => eval_node(node, ctx, path),
            Expr::Func(f) => f(ctx),
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Expr::Const(_))
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(v) => write!(f, "Const({:?})", v),
            Expr::Tree(node) => write!(f, "Expr({})", node),
            Expr::Func(_) => write!(f, "Expr(<fn>)"),
        }
    }
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Expr::Const(a), Expr::Const(b)) => a == b,
            (Expr::Tree(a), Expr::Tree(b)) => a == b,
            (Expr::Func(a), Expr::Func(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

macro_rules! expr_from {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Expr {
            fn from(x: $ty) -> Self {
                Expr::constant(x)
            }
        })*
    };
}

expr_from!(bool, u8, u16, u32, u64, i32, i64, usize, Value);

fn eval_node(node: &ExprNode, ctx: &Context<'_>, path: &str) -> Result<Value> {
    match node {
        ExprNode::Literal(v) => Ok(v.clone()),
        ExprNode::Path(segments) => ctx.lookup_path(segments, path),
        ExprNode::Unary(UnaryOp::Not, e) => Ok(Value::Bool(!eval_node(e, ctx, path)?.truthy())),
        ExprNode::Unary(UnaryOp::Neg, e) => {
            let v = eval_node(e, ctx, path)?;
            match (v.as_i128(), &v) {
                (_, Value::Float(_) | Value::Double(_)) => Ok(Value::Double(-v.as_f64().unwrap_or(0.0))),
                (Some(x), _) if v.is_integer() => integer(-x, path),
                _ => Err(CodecError::expression(format!("cannot negate {}", v.type_name()), path)),
            }
        }
        ExprNode::Binary(BinaryOp::And, l, r) => {
            let lhs = eval_node(l, ctx, path)?;
            if !lhs.truthy() {
                return Ok(lhs);
            }
            eval_node(r, ctx, path)
        }
        ExprNode::Binary(BinaryOp::Or, l, r) => {
            let lhs = eval_node(l, ctx, path)?;
            if lhs.truthy() {
                return Ok(lhs);
            }
            eval_node(r, ctx, path)
        }
        ExprNode::Binary(op, l, r) => {
            let lhs = eval_node(l, ctx, path)?;
            let rhs = eval_node(r, ctx, path)?;
            binary(*op, lhs, rhs, path)
        }
        ExprNode::Call(Function::Len, args) => {
            let arg = args
                .first()
                .ok_or_else(|| CodecError::expression("len() needs an argument", path))?;
            let v = eval_node(arg, ctx, path)?;
            let len = match &v {
                Value::Bytes(b) => b.len(),
                Value::Str(s) => s.len(),
                Value::List(l) => l.len(),
                Value::Struct(c) => c.len(),
                other => {
                    return Err(CodecError::expression(
                        format!("len() of {}", other.type_name()),
                        path,
                    ))
                }
            };
            Ok(Value::U64(len as u64))
        }
        ExprNode::Call(func, args) => {
            let segments = match args.first() {
                Some(ExprNode::Path(segments)) => segments,
                _ => return Err(CodecError::expression(format!("{}() expects a path", func.name()), path)),
            };
            let meta = ctx.meta_path(segments, path)?.ok_or_else(|| {
                CodecError::expression(
                    format!("no layout information for {}; preprocess first", ExprNode::Path(segments.clone())),
                    path,
                )
            })?;
            Ok(Value::U64(meta_field(*func, &meta)))
        }
    }
}

fn meta_field(func: Function, meta: &MetaInformation) -> u64 {
    match func {
        Function::Offset => meta.offset,
        Function::Size => meta.size,
        Function::EndOffset => meta.end_offset,
        Function::PtrSize | Function::Len => meta.pointer_size,
    }
}

fn integer(x: i128, path: &str) -> Result<Value> {
    if let Ok(v) = i64::try_from(x) {
        return Ok(Value::I64(v));
    }
    u64::try_from(x)
        .map(Value::U64)
        .map_err(|_| CodecError::expression(format!("integer overflow: {}", x), path))
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value, path: &str) -> Result<Value> {
    match op {
        BinaryOp::Eq => return Ok(Value::Bool(lhs.loose_eq(&rhs))),
        BinaryOp::Ne => return Ok(Value::Bool(!lhs.loose_eq(&rhs))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(&lhs, &rhs).ok_or_else(|| {
                CodecError::expression(
                    format!("cannot compare {} with {}", lhs.type_name(), rhs.type_name()),
                    path,
                )
            })?;
            let result = match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            };
            return Ok(Value::Bool(result));
        }
        _ => {}
    }

    if lhs.is_integer() && rhs.is_integer() {
        let (a, b) = (lhs.as_i128().unwrap_or(0), rhs.as_i128().unwrap_or(0));
        if matches!(op, BinaryOp::Div | BinaryOp::FloorDiv | BinaryOp::Mod) && b == 0 {
            return Err(CodecError::expression("division by zero", path));
        }
        let result = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            // integer division floors, like `//`
            BinaryOp::Div | BinaryOp::FloorDiv => {
                let q = a / b;
                Some(if a % b != 0 && ((a < 0) != (b < 0)) { q - 1 } else { q })
            }
            _ => Some(((a % b) + b) % b),
        };
        let result = result.ok_or_else(|| CodecError::expression("integer overflow", path))?;
        return integer(result, path);
    }

    match (op, &lhs, &rhs) {
        (BinaryOp::Add, Value::Bytes(a), Value::Bytes(b)) => {
            return Ok(Value::Bytes([a.as_slice(), b.as_slice()].concat()))
        }
        (BinaryOp::Add, Value::Str(a), Value::Str(b)) => return Ok(Value::Str(format!("{}{}", a, b))),
        _ => {}
    }

    match (lhs.as_f64(), rhs.as_f64()) {
        (Some(a), Some(b)) => Ok(Value::Double(match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::FloorDiv => (a / b).floor(),
            _ => a.rem_euclid(b),
        })),
        _ => Err(CodecError::expression(
            format!(
                "unsupported operands for {}: {} and {}",
                op.symbol(),
                lhs.type_name(),
                rhs.type_name()
            ),
            path,
        )),
    }
}

fn compare(lhs: &Value, rhs: &Value) -> Option<Ordering> {
    if lhs.is_integer() && rhs.is_integer() {
        return Some(lhs.as_i128()?.cmp(&rhs.as_i128()?));
    }
    match (lhs, rhs) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
        _ => lhs.as_f64()?.partial_cmp(&rhs.as_f64()?),
    }
}
