//! Value adapters: translate between what the child reads/writes and what
//! the caller sees. [`Mapping`], [`ExprAdapter`] and [`ExprValidator`] cover
//! the common cases; anything else implements [`Adapter`]. [`RawCopy`]
//! exposes the child's raw bytes next to its value.

use crate::codec::{CodecError, Result};
use crate::context::Context;
use crate::expr::Expr;
use crate::node::{measure, proceed, scope_ref, sized_scope, with_scope, Construct, Flow, Node};
use crate::stream::{stream_read, stream_seek, stream_tell, stream_write, ReadStream, WriteStream};
use crate::value::{Container, MetaInformation, Value};
use std::io::SeekFrom;
use std::fmt;
use std::rc::Rc;

/// Bidirectional value translation.
pub trait Adapter: fmt::Debug {
    /// Child value to caller value (parsing).
    fn decode(&self, value: Value, ctx: &Context<'_>, path: &str) -> Result<Value>;
    /// Caller value to child value (building and sizing).
    fn encode(&self, value: Value, ctx: &Context<'_>, path: &str) -> Result<Value>;
}

#[derive(Debug, Clone)]
pub struct Adapted {
    subcon: Box<Node>,
    adapter: Rc<dyn Adapter>,
}

impl Adapted {
    pub fn new(subcon: Node, adapter: impl Adapter + 'static) -> Self {
        Adapted {
            subcon: Box::new(subcon),
            adapter: Rc::new(adapter),
        }
    }

    /// Deferred values are resolved later by the child; they pass through untouched.
    fn encode(&self, value: Value, ctx: &Context<'_>, path: &str) -> Result<Value> {
        match value {
            Value::Deferred(_) => Ok(value),
            other => self.adapter.encode(other, ctx, path),
        }
    }

    fn decode(&self, value: Value, ctx: &Context<'_>, path: &str) -> Result<Value> {
        match value {
            Value::Deferred(inner) => {
                let adapter = self.adapter.clone();
                let path = path.to_string();
                Ok(Value::Deferred(Expr::func(move |ctx| {
                    let raw = ctx.resolve(inner.evaluate(ctx, &path)?, &path)?;
                    adapter.decode(raw, ctx, &path)
                })))
            }
            other => self.adapter.decode(other, ctx, path),
        }
    }
}

impl Construct for Adapted {
    fn parse(&self, stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>> {
        let flow = with_scope(&self.subcon, ctx, |s| self.subcon.parse(stream, s, path))?;
        let raw = proceed!(flow);
        self.adapter.decode(raw, ctx, path).map(Flow::Continue)
    }

    fn build(
        &self,
        value: Value,
        stream: &mut dyn WriteStream,
        ctx: &mut Context<'_>,
        path: &str,
    ) -> Result<Flow<Value>> {
        let value = ctx.resolve(value, path)?;
        let encoded = self.adapter.encode(value.clone(), ctx, path)?;
        let flow = with_scope(&self.subcon, ctx, |s| self.subcon.build(encoded, stream, s, path))?;
        proceed!(flow);
        Ok(Flow::Continue(value))
    }

    fn static_size(&self, ctx: &Context<'_>, path: &str) -> Result<u64> {
        scope_ref(&self.subcon, ctx, |s| self.subcon.static_size(s, path))
    }

    fn size(&self, value: &Value, ctx: &Context<'_>, path: &str) -> Result<u64> {
        let encoded = self.encode(value.clone(), ctx, path)?;
        sized_scope(&self.subcon, &encoded, ctx, |s| measure(self.subcon.as_ref(), &encoded, s, path))
    }

    fn full_size(&self, value: &Value, ctx: &Context<'_>, path: &str) -> Result<u64> {
        let encoded = self.encode(value.clone(), ctx, path)?;
        sized_scope(&self.subcon, &encoded, ctx, |s| self.subcon.full_size(&encoded, s, path))
    }

    fn preprocess(&self, value: Value, ctx: &mut Context<'_>, path: &str) -> Result<Value> {
        let encoded = self.encode(value, ctx, path)?;
        let processed = with_scope(&self.subcon, ctx, |s| self.subcon.preprocess(encoded, s, path))?;
        self.decode(processed, ctx, path)
    }

    fn preprocess_size(
        &self,
        value: Value,
        ctx: &mut Context<'_>,
        path: &str,
        offset: u64,
    ) -> Result<(Value, MetaInformation)> {
        let encoded = self.encode(value, ctx, path)?;
        let (processed, meta) =
            with_scope(&self.subcon, ctx, |s| self.subcon.preprocess_size(encoded, s, path, offset))?;
        Ok((self.decode(processed, ctx, path)?, meta))
    }

    fn expected_size(&self, stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<u64> {
        with_scope(&self.subcon, ctx, |s| self.subcon.expected_size(stream, s, path))
    }

    fn flag_build_none(&self) -> bool {
        self.subcon.flag_build_none()
    }

    fn is_array(&self) -> bool {
        self.subcon.is_array()
    }

    fn kind(&self) -> &'static str {
        "Adapted"
    }
}

/// Table of `(decoded, encoded)` pairs.
#[derive(Debug, Clone)]
pub struct Mapping {
    pairs: Vec<(Value, Value)>,
}

impl Mapping {
    pub fn new(pairs: Vec<(Value, Value)>) -> Self {
        Mapping { pairs }
    }
}

impl Adapter for Mapping {
    fn decode(&self, value: Value, _ctx: &Context<'_>, path: &str) -> Result<Value> {
        self.pairs
            .iter()
            .find(|(_, encoded)| encoded.loose_eq(&value))
            .map(|(decoded, _)| decoded.clone())
            .ok_or_else(|| CodecError::mapping(format!("parsing failed, no decoding mapping for {:?}", value), path))
    }

    fn encode(&self, value: Value, _ctx: &Context<'_>, path: &str) -> Result<Value> {
        self.pairs
            .iter()
            .find(|(decoded, _)| decoded.loose_eq(&value))
            .map(|(_, encoded)| encoded.clone())
            .ok_or_else(|| CodecError::mapping(format!("building failed, no encoding mapping for {:?}", value), path))
    }
}

/// Maps child values through `pairs` of `(decoded, encoded)`.
pub fn mapping(subcon: Node, pairs: Vec<(Value, Value)>) -> Node {
    Adapted::new(subcon, Mapping::new(pairs)).into()
}

pub type ValueFn = Rc<dyn Fn(Value, &Context<'_>) -> Result<Value>>;

/// Adapter built from two closures.
#[derive(Clone)]
pub struct ExprAdapter {
    decoder: ValueFn,
    encoder: ValueFn,
}

impl ExprAdapter {
    pub fn new<D, E>(decoder: D, encoder: E) -> Self
    where
        D: Fn(Value, &Context<'_>) -> Result<Value> + 'static,
        E: Fn(Value, &Context<'_>) -> Result<Value> + 'static,
    {
        ExprAdapter {
            decoder: Rc::new(decoder),
            encoder: Rc::new(encoder),
        }
    }
}

impl fmt::Debug for ExprAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ExprAdapter")
    }
}

impl Adapter for ExprAdapter {
    fn decode(&self, value: Value, ctx: &Context<'_>, _path: &str) -> Result<Value> {
        (self.decoder)(value, ctx)
    }

    fn encode(&self, value: Value, ctx: &Context<'_>, _path: &str) -> Result<Value> {
        (self.encoder)(value, ctx)
    }
}

pub type ValidateFn = Rc<dyn Fn(&Value, &Context<'_>) -> Result<bool>>;

/// Rejects values failing `validator`, both when parsing and when building.
#[derive(Clone)]
pub struct ExprValidator {
    validator: ValidateFn,
}

impl ExprValidator {
    pub fn new<F>(validator: F) -> Self
    where
        F: Fn(&Value, &Context<'_>) -> Result<bool> + 'static,
    {
        ExprValidator {
            validator: Rc::new(validator),
        }
    }

    fn check(&self, value: Value, ctx: &Context<'_>, path: &str) -> Result<Value> {
        if (self.validator)(&value, ctx)? {
            Ok(value)
        } else {
            Err(CodecError::validation(format!("object failed validation: {:?}", value), path))
        }
    }
}

impl fmt::Debug for ExprValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ExprValidator")
    }
}

impl Adapter for ExprValidator {
    fn decode(&self, value: Value, ctx: &Context<'_>, path: &str) -> Result<Value> {
        self.check(value, ctx, path)
    }

    fn encode(&self, value: Value, ctx: &Context<'_>, path: &str) -> Result<Value> {
        self.check(value, ctx, path)
    }
}

/// Value must equal one of `valids`.
pub fn one_of(subcon: Node, valids: Vec<Value>) -> Node {
    let validator = ExprValidator::new(move |v, _| Ok(valids.iter().any(|x| x.loose_eq(v))));
    Adapted::new(subcon, validator).into()
}

/// Value must equal none of `invalids`.
pub fn none_of(subcon: Node, invalids: Vec<Value>) -> Node {
    let validator = ExprValidator::new(move |v, _| Ok(!invalids.iter().any(|x| x.loose_eq(v))));
    Adapted::new(subcon, validator).into()
}

/// Child value together with the bytes it spans: parses to
/// `{data, value, offset1, offset2, length}`. Building writes `data` when
/// present and builds `value` otherwise.
#[derive(Debug, Clone)]
pub struct RawCopy {
    subcon: Box<Node>,
}

fn span(mut c: Container, data: Vec<u8>, offset1: u64, offset2: u64) -> Value {
    c.insert("data", Value::Bytes(data));
    c.insert("offset1", Value::U64(offset1));
    c.insert("offset2", Value::U64(offset2));
    c.insert("length", Value::U64(offset2 - offset1));
    Value::Struct(c)
}

impl RawCopy {
    pub fn new(subcon: Node) -> Self {
        RawCopy {
            subcon: Box::new(subcon),
        }
    }

    fn fields(&self, value: Value, path: &str) -> Result<Container> {
        match value {
            Value::None if self.subcon.flag_build_none() => Ok(Container::new().with("value", Value::None)),
            Value::Struct(c) => Ok(c),
            other => Err(CodecError::format(
                format!("RawCopy expects a struct with data or value, got {}", other.type_name()),
                path,
            )),
        }
    }
}

impl Construct for RawCopy {
    fn parse(&self, stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>> {
        let offset1 = stream_tell(stream, path)?;
        let value = proceed!(with_scope(&self.subcon, ctx, |s| self.subcon.parse(stream, s, path))?);
        let offset2 = stream_tell(stream, path)?;
        stream_seek(stream, SeekFrom::Start(offset1), path)?;
        let data = stream_read(stream, offset2 - offset1, path)?;
        Ok(Flow::Continue(span(Container::new().with("value", value), data, offset1, offset2)))
    }

    fn build(
        &self,
        value: Value,
        stream: &mut dyn WriteStream,
        ctx: &mut Context<'_>,
        path: &str,
    ) -> Result<Flow<Value>> {
        let mut fields = self.fields(ctx.resolve(value, path)?, path)?;
        let offset1 = stream_tell(stream, path)?;
        if let Some(data) = fields.get("data") {
            let data = data
                .as_bytes()
                .ok_or_else(|| CodecError::format(format!("RawCopy data must be bytes, got {}", data.type_name()), path))?
                .to_vec();
            stream_write(stream, &data, path)?;
            let offset2 = stream_tell(stream, path)?;
            return Ok(Flow::Continue(span(fields, data, offset1, offset2)));
        }
        let Some(value) = fields.remove("value") else {
            return Err(CodecError::format("RawCopy cannot build, both data and value keys are missing", path));
        };
        let value = ctx.resolve(value, path)?;
        let built = proceed!(with_scope(&self.subcon, ctx, |s| self.subcon.build(value, stream, s, path))?);
        let offset2 = stream_tell(stream, path)?;
        stream_seek(stream, SeekFrom::Start(offset1), path)?;
        let data = stream_read(stream, offset2 - offset1, path)?;
        fields.insert("value", built);
        Ok(Flow::Continue(span(fields, data, offset1, offset2)))
    }

    fn static_size(&self, ctx: &Context<'_>, path: &str) -> Result<u64> {
        scope_ref(&self.subcon, ctx, |s| self.subcon.static_size(s, path))
    }

    fn size(&self, value: &Value, ctx: &Context<'_>, path: &str) -> Result<u64> {
        let fields = self.fields(value.clone(), path)?;
        if let Some(data) = fields.get("data").and_then(Value::as_bytes) {
            return Ok(data.len() as u64);
        }
        let inner = fields
            .get("value")
            .ok_or_else(|| CodecError::sizeof("RawCopy value without data or value key", path))?;
        sized_scope(&self.subcon, inner, ctx, |s| measure(self.subcon.as_ref(), inner, s, path))
    }

    fn preprocess(&self, value: Value, ctx: &mut Context<'_>, path: &str) -> Result<Value> {
        let mut fields = self.fields(value, path)?;
        if !fields.contains_key("data") {
            if let Some(inner) = fields.remove("value") {
                let inner = with_scope(&self.subcon, ctx, |s| self.subcon.preprocess(inner, s, path))?;
                fields.insert("value", inner);
            }
        }
        Ok(Value::Struct(fields))
    }

    fn flag_build_none(&self) -> bool {
        self.subcon.flag_build_none()
    }

    fn kind(&self) -> &'static str {
        "RawCopy"
    }
}
