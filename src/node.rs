//! The node protocol and the closed set of schema node kinds.
//!
//! Every schema node implements [`Construct`]. Composite nodes own their
//! children as [`Node`] values; [`Node`] is a sum type over all built-in
//! kinds plus [`Node::Custom`] for leaf codecs defined outside this crate.
//!
//! `parse` and `build` return a [`Flow`]: `Stop` ends the enclosing
//! Struct/Sequence/GreedyRange early without error, `Cancel` unwinds to the
//! top level where parsing returns `None`.

use crate::adapter::{Adapted, RawCopy};
use crate::arrays::{Array, GreedyRange, PrefixedArray, RepeatUntil};
use crate::codec::{CodecError, Result};
use crate::context::Context;
use crate::dispatch::{IfThenElse, Switch, Union};
use crate::expr::Expr;
use crate::lazy::{Lazy, LazyBound};
use crate::leaf::{
    BitsInteger, Bytes, Check, Computed, Const, Defaulted, ErrorField, Flag, FormatField, GreedyBytes,
    Index, Pass, Rebuild, StopIf, Tell, Terminated,
};
use crate::pointer::{Area, Peek, Pointer};
use crate::stream::{ReadStream, WriteStream};
use crate::structs::{FocusedSeq, Sequence, Struct};
use crate::transform::{Restreamed, Transformed};
use crate::tunnel::{Aligned, FixedSized, NullStripped, NullTerminated, OffsettedEnd, Padded, Prefixed};
use crate::value::{MetaInformation, Value};
use std::fmt;
use std::rc::Rc;

/// Outcome of `parse`/`build`.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow<T> {
    Continue(T),
    /// Finish the enclosing repeatable/sequential node successfully.
    Stop,
    /// Abort the whole top-level parse; not an error.
    Cancel,
}

impl<T> Flow<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Flow<U> {
        match self {
            Flow::Continue(v) => Flow::Continue(f(v)),
            Flow::Stop => Flow::Stop,
            Flow::Cancel => Flow::Cancel,
        }
    }

    pub fn value(self) -> Option<T> {
        match self {
            Flow::Continue(v) => Some(v),
            _ => None,
        }
    }
}

impl<T> From<T> for Flow<T> {
    fn from(v: T) -> Self {
        Flow::Continue(v)
    }
}

/// Unwrap `Flow::Continue` or return the control signal from the enclosing function.
macro_rules! proceed {
    ($e:expr) => {
        match $e {
            $crate::node::Flow::Continue(v) => v,
            $crate::node::Flow::Stop => return Ok($crate::node::Flow::Stop),
            $crate::node::Flow::Cancel => return Ok($crate::node::Flow::Cancel),
        }
    };
}
pub(crate) use proceed;

/// Capability interface shared by every schema node.
///
/// `path` is a diagnostic breadcrumb (`(parsing) -> header -> length`) and
/// has no semantic effect.
pub trait Construct: fmt::Debug {
    fn parse(&self, stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>>;

    /// Write `value`; the returned value is the canonical form later siblings observe.
    fn build(
        &self,
        value: Value,
        stream: &mut dyn WriteStream,
        ctx: &mut Context<'_>,
        path: &str,
    ) -> Result<Flow<Value>>;

    /// Size from schema and context alone.
    fn static_size(&self, _ctx: &Context<'_>, path: &str) -> Result<u64> {
        Err(CodecError::sizeof(
            format!("{} cannot be sized statically", self.kind()),
            path,
        ))
    }

    /// Size of a concrete value. Callers go through [`measure`], which tries
    /// [`Construct::static_size`] first.
    fn size(&self, _value: &Value, ctx: &Context<'_>, path: &str) -> Result<u64> {
        self.static_size(ctx, path)
    }

    /// Like `size` but counting data placed out of line by pointers.
    fn full_size(&self, value: &Value, ctx: &Context<'_>, path: &str) -> Result<u64> {
        measure(self, value, ctx, path)
    }

    /// Value-resolution pass: replace rebuilt/computed entries by deferred expressions.
    fn preprocess(&self, value: Value, _ctx: &mut Context<'_>, _path: &str) -> Result<Value> {
        Ok(value)
    }

    /// Offset-assignment pass starting at `offset`.
    fn preprocess_size(
        &self,
        value: Value,
        ctx: &mut Context<'_>,
        path: &str,
        offset: u64,
    ) -> Result<(Value, MetaInformation)> {
        let size = measure(self, &value, ctx, path)?;
        Ok((value, MetaInformation::new(offset, size)))
    }

    /// Bytes a lazy parse must skip; may read a length prefix.
    fn expected_size(&self, _stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<u64> {
        self.static_size(ctx, path)
    }

    fn name(&self) -> Option<&str> {
        None
    }

    /// Names under which a parent may find this node's value.
    fn names(&self) -> Vec<String> {
        self.name().map(|n| vec![n.to_string()]).unwrap_or_default()
    }

    /// Can be built without a value.
    fn flag_build_none(&self) -> bool {
        false
    }

    /// Needs its own nested scope.
    fn is_struct(&self) -> bool {
        false
    }

    fn is_array(&self) -> bool {
        false
    }

    /// Whether a stop condition holds, consulted by sizing loops.
    fn stops(&self, _ctx: &Context<'_>) -> Result<bool> {
        Ok(false)
    }

    /// Short kind name for diagnostics.
    fn kind(&self) -> &'static str {
        "construct"
    }
}

/// Size of `value`: static size when available, value-dependent otherwise.
pub fn measure<C: Construct + ?Sized>(node: &C, value: &Value, ctx: &Context<'_>, path: &str) -> Result<u64> {
    match node.static_size(ctx, path) {
        Ok(size) => Ok(size),
        Err(e) if e.is_sizeof() => {
            log::trace!("{}: static size unavailable, sizing value", path);
            node.size(value, ctx, path)
        }
        Err(e) => Err(e),
    }
}

/// Evaluate an expression while sizing; unresolvable references become `Sizeof`.
pub(crate) fn evaluate_for_size(expr: &Expr, ctx: &Context<'_>, path: &str) -> Result<Value> {
    ctx.evaluate(expr, path).map_err(|e| match e {
        CodecError::MissingKey { key, path } => {
            CodecError::sizeof(format!("missing context entry {}", key), &path)
        }
        CodecError::Expression { message, path } => CodecError::sizeof(message, &path),
        other => other,
    })
}

/// Evaluate a count/length expression to a non-negative integer.
pub(crate) fn evaluate_count(expr: &Expr, ctx: &Context<'_>, path: &str) -> Result<u64> {
    let v = ctx.evaluate(expr, path)?;
    count_of(&v, path)
}

pub(crate) fn count_of(v: &Value, path: &str) -> Result<u64> {
    match v.as_i128() {
        Some(n) if n >= 0 && v.is_integer() => u64::try_from(n)
            .map_err(|_| CodecError::range(format!("count {} too large", n), path)),
        Some(n) => Err(CodecError::range(format!("invalid count {}", n), path)),
        None => Err(CodecError::range(format!("count must be an integer, got {}", v.type_name()), path)),
    }
}

/// `a + b` for sizes; overflow is a `Sizeof` error.
pub(crate) fn size_add(a: u64, b: u64, path: &str) -> Result<u64> {
    a.checked_add(b)
        .ok_or_else(|| CodecError::sizeof(format!("size overflow: {} + {}", a, b), path))
}

/// `count * element` for sizes; overflow is a `Sizeof` error.
pub(crate) fn size_mul(count: u64, element: u64, path: &str) -> Result<u64> {
    count
        .checked_mul(element)
        .ok_or_else(|| CodecError::sizeof(format!("size overflow: {} x {}", count, element), path))
}

/// Run `f` in the scope `node` needs: a nested scope for structural
/// nodes, the current one otherwise.
pub(crate) fn with_scope<R>(node: &Node, ctx: &mut Context<'_>, f: impl FnOnce(&mut Context<'_>) -> R) -> R {
    if node.is_struct() {
        let mut scope = ctx.child();
        f(&mut scope)
    } else {
        f(ctx)
    }
}

/// Read-only variant of [`with_scope`] for static sizing.
pub(crate) fn scope_ref<R>(node: &Node, ctx: &Context<'_>, f: impl FnOnce(&Context<'_>) -> R) -> R {
    if node.is_struct() {
        f(&ctx.child())
    } else {
        f(ctx)
    }
}

/// Scope for sizing `value`: structural nodes see their own entries.
pub(crate) fn sized_scope<R>(
    node: &Node,
    value: &Value,
    ctx: &Context<'_>,
    f: impl FnOnce(&Context<'_>) -> R,
) -> R {
    if node.is_struct() {
        let mut scope = ctx.child();
        if let Value::Struct(c) = value {
            scope.fill(c.clone());
        }
        f(&scope)
    } else {
        f(ctx)
    }
}

/// Post-parse hook; may return `Flow::Cancel` to abort the whole parse.
pub type ParseHook = Rc<dyn Fn(&Value, &Context<'_>) -> Result<Flow<()>>>;

/// Attaches a name, documentation and an optional post-parse hook to a node.
#[derive(Clone)]
pub struct Renamed {
    subcon: Box<Node>,
    name: Option<String>,
    docs: String,
    hook: Option<ParseHook>,
}

impl Renamed {
    pub fn new(subcon: Node) -> Self {
        Renamed {
            subcon: Box::new(subcon),
            name: None,
            docs: String::new(),
            hook: None,
        }
    }

    pub fn docs(&self) -> &str {
        &self.docs
    }

    pub fn subcon(&self) -> &Node {
        &self.subcon
    }

    fn extend(&self, path: &str) -> String {
        match &self.name {
            Some(name) => format!("{} -> {}", path, name),
            None => path.to_string(),
        }
    }
}

impl fmt::Debug for Renamed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Renamed")
            .field("name", &self.name)
            .field("subcon", &self.subcon)
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

impl Construct for Renamed {
    fn parse(&self, stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>> {
        let path = self.extend(path);
        let value = proceed!(self.subcon.parse(stream, ctx, &path)?);
        if let Some(hook) = &self.hook {
            match hook(&value, ctx)? {
                Flow::Continue(()) => {}
                Flow::Stop => return Ok(Flow::Stop),
                Flow::Cancel => {
                    log::debug!("{}: parse cancelled by hook", path);
                    return Ok(Flow::Cancel);
                }
            }
        }
        Ok(Flow::Continue(value))
    }

    fn build(
        &self,
        value: Value,
        stream: &mut dyn WriteStream,
        ctx: &mut Context<'_>,
        path: &str,
    ) -> Result<Flow<Value>> {
        self.subcon.build(value, stream, ctx, &self.extend(path))
    }

    fn static_size(&self, ctx: &Context<'_>, path: &str) -> Result<u64> {
        self.subcon.static_size(ctx, &self.extend(path))
    }

    fn size(&self, value: &Value, ctx: &Context<'_>, path: &str) -> Result<u64> {
        self.subcon.size(value, ctx, &self.extend(path))
    }

    fn full_size(&self, value: &Value, ctx: &Context<'_>, path: &str) -> Result<u64> {
        self.subcon.full_size(value, ctx, &self.extend(path))
    }

    fn preprocess(&self, value: Value, ctx: &mut Context<'_>, path: &str) -> Result<Value> {
        self.subcon.preprocess(value, ctx, &self.extend(path))
    }

    fn preprocess_size(
        &self,
        value: Value,
        ctx: &mut Context<'_>,
        path: &str,
        offset: u64,
    ) -> Result<(Value, MetaInformation)> {
        self.subcon.preprocess_size(value, ctx, &self.extend(path), offset)
    }

    fn expected_size(&self, stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<u64> {
        self.subcon.expected_size(stream, ctx, &self.extend(path))
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.name.iter().cloned().collect();
        names.extend(self.subcon.names());
        names
    }

    fn flag_build_none(&self) -> bool {
        self.subcon.flag_build_none()
    }

    fn is_struct(&self) -> bool {
        self.subcon.is_struct()
    }

    fn is_array(&self) -> bool {
        self.subcon.is_array()
    }

    fn stops(&self, ctx: &Context<'_>) -> Result<bool> {
        self.subcon.stops(ctx)
    }

    fn kind(&self) -> &'static str {
        self.subcon.kind()
    }
}

/// A schema node.
#[derive(Debug, Clone)]
pub enum Node {
    Struct(Struct),
    Sequence(Sequence),
    FocusedSeq(FocusedSeq),
    Array(Array),
    GreedyRange(GreedyRange),
    RepeatUntil(RepeatUntil),
    PrefixedArray(PrefixedArray),
    IfThenElse(IfThenElse),
    Switch(Switch),
    Union(Union),
    Pointer(Pointer),
    Area(Area),
    Peek(Peek),
    Lazy(Lazy),
    LazyBound(LazyBound),
    Renamed(Renamed),
    Transformed(Transformed),
    Restreamed(Restreamed),
    Prefixed(Prefixed),
    FixedSized(FixedSized),
    Padded(Padded),
    Aligned(Aligned),
    NullTerminated(NullTerminated),
    NullStripped(NullStripped),
    OffsettedEnd(OffsettedEnd),
    Adapted(Adapted),
    RawCopy(RawCopy),
    FormatField(FormatField),
    BitsInteger(BitsInteger),
    Bytes(Bytes),
    GreedyBytes(GreedyBytes),
    Flag(Flag),
    Const(Const),
    Computed(Computed),
    Rebuild(Rebuild),
    Defaulted(Defaulted),
    Check(Check),
    Index(Index),
    Tell(Tell),
    Pass(Pass),
    Terminated(Terminated),
    ErrorField(ErrorField),
    StopIf(StopIf),
    /// Externally defined node.
    Custom(Rc<dyn Construct>),
}

macro_rules! dispatch {
    ($node:expr, $n:ident => $body:expr) => {
        match $node {
            Node::Struct($n) => $body,
            Node::Sequence($n) => $body,
            Node::FocusedSeq($n) => $body,
            Node::Array($n) => $body,
            Node::GreedyRange($n) => $body,
            Node::RepeatUntil($n) => $body,
            Node::PrefixedArray($n) => $body,
            Node::IfThenElse($n) => $body,
            Node::Switch($n) => $body,
            Node::Union($n) => $body,
            Node::Pointer($n) => $body,
            Node::Area($n) => $body,
            Node::Peek($n) => $body,
            Node::Lazy($n) => $body,
            Node::LazyBound($n) => $body,
            Node::Renamed($n) => $body,
            Node::Transformed($n) => $body,
            Node::Restreamed($n) => $body,
            Node::Prefixed($n) => $body,
            Node::FixedSized($n) => $body,
            Node::Padded($n) => $body,
            Node::Aligned($n) => $body,
            Node::NullTerminated($n) => $body,
            Node::NullStripped($n) => $body,
            Node::OffsettedEnd($n) => $body,
            Node::Adapted($n) => $body,
            Node::RawCopy($n) => $body,
            Node::FormatField($n) => $body,
            Node::BitsInteger($n) => $body,
            Node::Bytes($n) => $body,
            Node::GreedyBytes($n) => $body,
            Node::Flag($n) => $body,
            Node::Const($n) => $body,
            Node::Computed($n) => $body,
            Node::Rebuild($n) => $body,
            Node::Defaulted($n) => $body,
            Node::Check($n) => $body,
            Node::Index($n) => $body,
            Node::Tell($n) => $body,
            Node::Pass($n) => $body,
            Node::Terminated($n) => $body,
            Node::ErrorField($n) => $body,
            Node::StopIf($n) => $body,
            Node::Custom($n) => $body,
        }
    };
}

macro_rules! node_from {
    ($($variant:ident),* $(,)?) => {
        $(impl From<$variant> for Node {
            fn from(n: $variant) -> Self {
                Node::$variant(n)
            }
        }

        impl $variant {
            /// Shorthand for `Node::from(self).named(name)`.
            pub fn named(self, name: &str) -> Node {
                Node::from(self).named(name)
            }
        })*
    };
}

node_from!(
    Struct, Sequence, FocusedSeq, Array, GreedyRange, RepeatUntil, PrefixedArray, IfThenElse,
    Switch, Union, Pointer, Area, Peek, Lazy, LazyBound, Renamed, Transformed, Restreamed, Prefixed,
    FixedSized, Padded, Aligned, NullTerminated, NullStripped, OffsettedEnd, Adapted, RawCopy, FormatField, BitsInteger, Bytes, GreedyBytes, Flag, Const,
    Computed, Rebuild, Defaulted, Check, Index, Tell, Pass, Terminated, ErrorField, StopIf,
);

impl Construct for Node {
    fn parse(&self, stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>> {
        dispatch!(self, n => n.parse(stream, ctx, path))
    }

    fn build(
        &self,
        value: Value,
        stream: &mut dyn WriteStream,
        ctx: &mut Context<'_>,
        path: &str,
    ) -> Result<Flow<Value>> {
        dispatch!(self, n => n.build(value, stream, ctx, path))
    }

    fn static_size(&self, ctx: &Context<'_>, path: &str) -> Result<u64> {
        dispatch!(self, n => n.static_size(ctx, path))
    }

    fn size(&self, value: &Value, ctx: &Context<'_>, path: &str) -> Result<u64> {
        dispatch!(self, n => n.size(value, ctx, path))
    }

    fn full_size(&self, value: &Value, ctx: &Context<'_>, path: &str) -> Result<u64> {
        dispatch!(self, n => n.full_size(value, ctx, path))
    }

    fn preprocess(&self, value: Value, ctx: &mut Context<'_>, path: &str) -> Result<Value> {
        dispatch!(self, n => n.preprocess(value, ctx, path))
    }

    fn preprocess_size(
        &self,
        value: Value,
        ctx: &mut Context<'_>,
        path: &str,
        offset: u64,
    ) -> Result<(Value, MetaInformation)> {
        dispatch!(self, n => n.preprocess_size(value, ctx, path, offset))
    }

    fn expected_size(&self, stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<u64> {
        dispatch!(self, n => n.expected_size(stream, ctx, path))
    }

    fn name(&self) -> Option<&str> {
        dispatch!(self, n => n.name())
    }

    fn names(&self) -> Vec<String> {
        dispatch!(self, n => n.names())
    }

    fn flag_build_none(&self) -> bool {
        dispatch!(self, n => n.flag_build_none())
    }

    fn is_struct(&self) -> bool {
        dispatch!(self, n => n.is_struct())
    }

    fn is_array(&self) -> bool {
        dispatch!(self, n => n.is_array())
    }

    fn stops(&self, ctx: &Context<'_>) -> Result<bool> {
        dispatch!(self, n => n.stops(ctx))
    }

    fn kind(&self) -> &'static str {
        dispatch!(self, n => n.kind())
    }
}

impl Node {
    /// Wrap an externally defined node.
    pub fn custom(node: impl Construct + 'static) -> Node {
        Node::Custom(Rc::new(node))
    }

    /// Give this node a name (`"name" / node`).
    pub fn named(self, name: &str) -> Node {
        let mut renamed = match self {
            Node::Renamed(r) => r,
            other => Renamed::new(other),
        };
        renamed.name = Some(name.to_string());
        Node::Renamed(renamed)
    }

    pub fn with_docs(self, docs: &str) -> Node {
        let mut renamed = match self {
            Node::Renamed(r) => r,
            other => Renamed::new(other),
        };
        renamed.docs = docs.to_string();
        Node::Renamed(renamed)
    }

    /// Run `hook` after every successful parse of this node.
    pub fn with_hook<F>(self, hook: F) -> Node
    where
        F: Fn(&Value, &Context<'_>) -> Result<Flow<()>> + 'static,
    {
        let mut renamed = match self {
            Node::Renamed(r) => r,
            other => Renamed::new(other),
        };
        renamed.hook = Some(Rc::new(hook));
        Node::Renamed(renamed)
    }

    /// `count` repetitions of this node.
    pub fn repeat(self, count: impl Into<Expr>) -> Node {
        Array::new(count, self).into()
    }
}
