//! Deferred parsing ([`Lazy`]) and late-bound schemas ([`LazyBound`]).

use crate::codec::{CodecError, Result};
use crate::context::{Context, ScopeSnapshot};
use crate::node::{measure, scope_ref, size_add, sized_scope, with_scope, Construct, Flow, Node};
use crate::stream::{stream_read_entire, stream_seek, stream_tell, ReadStream, WriteStream};
use crate::value::{MetaInformation, Value};
use std::cell::OnceCell;
use std::fmt;
use std::io::{Cursor, SeekFrom};
use std::rc::Rc;

/// A value whose bytes were located but not decoded.
///
/// Keeps the source the parse ran over and the scope chain seen at parse
/// time, so it can be decoded later, any number of times, at its original
/// position.
#[derive(Clone)]
pub struct LazyValue {
    node: Rc<Node>,
    offset: u64,
    size: u64,
    source: Rc<[u8]>,
    scope: Rc<ScopeSnapshot>,
    path: Rc<str>,
}

impl LazyValue {
    /// Stream offset the value was found at.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.size as usize
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// The bytes the value spans.
    pub fn bytes(&self) -> &[u8] {
        let start = (self.offset as usize).min(self.source.len());
        let end = start.saturating_add(self.size as usize).min(self.source.len());
        &self.source[start..end]
    }

    /// Decode from the captured source, positioned at the captured offset.
    pub fn force(&self) -> Result<Value> {
        log::trace!("{}: materializing lazy value at {}", self.path, self.offset);
        let mut cursor = Cursor::new(&*self.source);
        self.force_in(&mut cursor)
    }

    /// Decode from `stream` at the captured offset; the stream position is restored.
    pub fn force_in(&self, stream: &mut dyn ReadStream) -> Result<Value> {
        let fallback = stream_tell(stream, &self.path)?;
        let result = stream_seek(stream, SeekFrom::Start(self.offset), &self.path)
            .and_then(|_| self.parse_from(stream));
        stream_seek(stream, SeekFrom::Start(fallback), &self.path)?;
        result
    }

    fn parse_from(&self, stream: &mut dyn ReadStream) -> Result<Value> {
        let node: &Node = &self.node;
        let path: &str = &self.path;
        self.scope.enter(&mut |ctx| {
            with_scope(node, ctx, |s| node.parse(stream, s, path))
                .map(|flow| flow.value().unwrap_or(Value::None))
        })
    }
}

impl fmt::Debug for LazyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyValue")
            .field("offset", &self.offset)
            .field("len", &self.size)
            .finish()
    }
}

impl PartialEq for LazyValue {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.node, &other.node) && self.offset == other.offset && self.bytes() == other.bytes()
    }
}

/// Whole content of `stream`; the position is left at the start.
fn capture_source(stream: &mut dyn ReadStream, path: &str) -> Result<Rc<[u8]>> {
    stream_seek(stream, SeekFrom::Start(0), path)?;
    Ok(stream_read_entire(stream, path)?.into())
}

fn materialize(value: Value) -> Result<Value> {
    match value {
        Value::Lazy(lazy) => lazy.force(),
        other => Ok(other),
    }
}

/// Skips the child's bytes at parse time and returns a [`LazyValue`].
#[derive(Debug, Clone)]
pub struct Lazy {
    subcon: Rc<Node>,
}

impl Lazy {
    pub fn new(subcon: Node) -> Self {
        Lazy {
            subcon: Rc::new(subcon),
        }
    }
}

impl Construct for Lazy {
    fn parse(&self, stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>> {
        let offset = stream_tell(stream, path)?;
        let size = with_scope(&self.subcon, ctx, |s| self.subcon.expected_size(stream, s, path));
        stream_seek(stream, SeekFrom::Start(offset), path)?;
        let size = size?;
        let source = capture_source(stream, path)?;
        let end = size_add(offset, size, path);
        let resume = match end {
            Ok(end) if end <= source.len() as u64 => end,
            _ => offset,
        };
        stream_seek(stream, SeekFrom::Start(resume), path)?;
        let end = end?;
        if end > source.len() as u64 {
            return Err(CodecError::stream(
                format!(
                    "stream read less than specified amount, expected {}, found {}",
                    size,
                    (source.len() as u64).saturating_sub(offset)
                ),
                path,
            ));
        }
        log::trace!("{}: deferred {} bytes at {}", path, size, offset);
        Ok(Flow::Continue(Value::Lazy(LazyValue {
            node: self.subcon.clone(),
            offset,
            size,
            source,
            scope: Rc::new(ctx.snapshot()),
            path: path.into(),
        })))
    }

    fn build(
        &self,
        value: Value,
        stream: &mut dyn WriteStream,
        ctx: &mut Context<'_>,
        path: &str,
    ) -> Result<Flow<Value>> {
        let value = materialize(value)?;
        with_scope(&self.subcon, ctx, |s| self.subcon.build(value, stream, s, path))
    }

    fn static_size(&self, ctx: &Context<'_>, path: &str) -> Result<u64> {
        scope_ref(&self.subcon, ctx, |s| self.subcon.static_size(s, path))
    }

    fn size(&self, value: &Value, ctx: &Context<'_>, path: &str) -> Result<u64> {
        let value = materialize(value.clone())?;
        sized_scope(&self.subcon, &value, ctx, |s| measure(self.subcon.as_ref(), &value, s, path))
    }

    fn preprocess(&self, value: Value, ctx: &mut Context<'_>, path: &str) -> Result<Value> {
        let value = materialize(value)?;
        with_scope(&self.subcon, ctx, |s| self.subcon.preprocess(value, s, path))
    }

    fn preprocess_size(
        &self,
        value: Value,
        ctx: &mut Context<'_>,
        path: &str,
        offset: u64,
    ) -> Result<(Value, MetaInformation)> {
        let value = materialize(value)?;
        with_scope(&self.subcon, ctx, |s| self.subcon.preprocess_size(value, s, path, offset))
    }

    fn expected_size(&self, stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<u64> {
        with_scope(&self.subcon, ctx, |s| self.subcon.expected_size(stream, s, path))
    }

    fn kind(&self) -> &'static str {
        "Lazy"
    }
}

/// Child produced by `provider` on first use; lets a schema refer to itself.
#[derive(Clone)]
pub struct LazyBound {
    provider: Rc<dyn Fn() -> Node>,
    resolved: Rc<OnceCell<Node>>,
}

impl LazyBound {
    pub fn new<F>(provider: F) -> Self
    where
        F: Fn() -> Node + 'static,
    {
        LazyBound {
            provider: Rc::new(provider),
            resolved: Rc::new(OnceCell::new()),
        }
    }

    fn subcon(&self) -> &Node {
        self.resolved.get_or_init(|| (self.provider)())
    }
}

impl fmt::Debug for LazyBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyBound")
            .field("resolved", &self.resolved.get().is_some())
            .finish()
    }
}

impl Construct for LazyBound {
    fn parse(&self, stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>> {
        self.subcon().parse(stream, ctx, path)
    }

    fn build(
        &self,
        value: Value,
        stream: &mut dyn WriteStream,
        ctx: &mut Context<'_>,
        path: &str,
    ) -> Result<Flow<Value>> {
        self.subcon().build(value, stream, ctx, path)
    }

    fn static_size(&self, ctx: &Context<'_>, path: &str) -> Result<u64> {
        self.subcon().static_size(ctx, path)
    }

    fn size(&self, value: &Value, ctx: &Context<'_>, path: &str) -> Result<u64> {
        self.subcon().size(value, ctx, path)
    }

    fn full_size(&self, value: &Value, ctx: &Context<'_>, path: &str) -> Result<u64> {
        self.subcon().full_size(value, ctx, path)
    }

    fn preprocess(&self, value: Value, ctx: &mut Context<'_>, path: &str) -> Result<Value> {
        self.subcon().preprocess(value, ctx, path)
    }

    fn preprocess_size(
        &self,
        value: Value,
        ctx: &mut Context<'_>,
        path: &str,
        offset: u64,
    ) -> Result<(Value, MetaInformation)> {
        self.subcon().preprocess_size(value, ctx, path, offset)
    }

    fn expected_size(&self, stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<u64> {
        self.subcon().expected_size(stream, ctx, path)
    }

    fn names(&self) -> Vec<String> {
        self.subcon().names()
    }

    /// Always `false`; answering must not resolve the provider.
    fn flag_build_none(&self) -> bool {
        false
    }

    fn is_struct(&self) -> bool {
        self.subcon().is_struct()
    }

    fn is_array(&self) -> bool {
        self.subcon().is_array()
    }

    fn stops(&self, ctx: &Context<'_>) -> Result<bool> {
        self.subcon().stops(ctx)
    }

    fn kind(&self) -> &'static str {
        "LazyBound"
    }
}
