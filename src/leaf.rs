//! Leaf and context-only nodes: fixed-width numbers, bit integers, byte
//! strings, constants, computed/rebuilt values and stream markers.

use crate::codec::{CodecError, Result};
use crate::context::Context;
use crate::expr::Expr;
use crate::node::{count_of, evaluate_for_size, measure, scope_ref, with_scope, Construct, Flow, Node};
use crate::stream::{stream_read, stream_read_entire, stream_tell, stream_write, ReadStream, WriteStream};
use crate::value::{MetaInformation, Value};
use byteorder::{BigEndian, ByteOrder, LittleEndian};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Big,
    Little,
}

/// Machine number formats understood by [`FormatField`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberKind {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl NumberKind {
    pub fn width(self) -> usize {
        match self {
            NumberKind::U8 | NumberKind::I8 => 1,
            NumberKind::U16 | NumberKind::I16 => 2,
            NumberKind::U32 | NumberKind::I32 | NumberKind::F32 => 4,
            NumberKind::U64 | NumberKind::I64 | NumberKind::F64 => 8,
        }
    }
}

fn integer(value: &Value, path: &str) -> Result<i128> {
    value
        .as_i128()
        .ok_or_else(|| CodecError::format(format!("expected an integer, got {}", value.type_name()), path))
}

fn fit<T: TryFrom<i128>>(value: &Value, path: &str) -> Result<T> {
    let n = integer(value, path)?;
    T::try_from(n).map_err(|_| CodecError::format(format!("integer {} does not fit in field", n), path))
}

fn float(value: &Value, path: &str) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| CodecError::format(format!("expected a number, got {}", value.type_name()), path))
}

fn decode_number<B: ByteOrder>(kind: NumberKind, buf: &[u8]) -> Value {
    match kind {
        NumberKind::U8 => Value::U8(buf[0]),
        NumberKind::I8 => Value::I8(buf[0] as i8),
        NumberKind::U16 => Value::U16(B::read_u16(buf)),
        NumberKind::I16 => Value::I16(B::read_i16(buf)),
        NumberKind::U32 => Value::U32(B::read_u32(buf)),
        NumberKind::I32 => Value::I32(B::read_i32(buf)),
        NumberKind::U64 => Value::U64(B::read_u64(buf)),
        NumberKind::I64 => Value::I64(B::read_i64(buf)),
        NumberKind::F32 => Value::Float(B::read_f32(buf)),
        NumberKind::F64 => Value::Double(B::read_f64(buf)),
    }
}

fn encode_number<B: ByteOrder>(kind: NumberKind, value: &Value, path: &str) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; kind.width()];
    match kind {
        NumberKind::U8 => buf[0] = fit::<u8>(value, path)?,
        NumberKind::I8 => buf[0] = fit::<i8>(value, path)? as u8,
        NumberKind::U16 => B::write_u16(&mut buf, fit(value, path)?),
        NumberKind::I16 => B::write_i16(&mut buf, fit(value, path)?),
        NumberKind::U32 => B::write_u32(&mut buf, fit(value, path)?),
        NumberKind::I32 => B::write_i32(&mut buf, fit(value, path)?),
        NumberKind::U64 => B::write_u64(&mut buf, fit(value, path)?),
        NumberKind::I64 => B::write_i64(&mut buf, fit(value, path)?),
        NumberKind::F32 => B::write_f32(&mut buf, float(value, path)? as f32),
        NumberKind::F64 => B::write_f64(&mut buf, float(value, path)?),
    }
    Ok(buf)
}

/// Fixed-width integer or float.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatField {
    kind: NumberKind,
    endianness: Endianness,
}

impl FormatField {
    pub fn new(kind: NumberKind, endianness: Endianness) -> Self {
        FormatField { kind, endianness }
    }
}

impl Construct for FormatField {
    fn parse(&self, stream: &mut dyn ReadStream, _ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>> {
        let buf = stream_read(stream, self.kind.width() as u64, path)?;
        let value = match self.endianness {
            Endianness::Big => decode_number::<BigEndian>(self.kind, &buf),
            Endianness::Little => decode_number::<LittleEndian>(self.kind, &buf),
        };
        Ok(Flow::Continue(value))
    }

    fn build(
        &self,
        value: Value,
        stream: &mut dyn WriteStream,
        _ctx: &mut Context<'_>,
        path: &str,
    ) -> Result<Flow<Value>> {
        let buf = match self.endianness {
            Endianness::Big => encode_number::<BigEndian>(self.kind, &value, path)?,
            Endianness::Little => encode_number::<LittleEndian>(self.kind, &value, path)?,
        };
        stream_write(stream, &buf, path)?;
        Ok(Flow::Continue(value))
    }

    fn static_size(&self, _ctx: &Context<'_>, _path: &str) -> Result<u64> {
        Ok(self.kind.width() as u64)
    }

    fn kind(&self) -> &'static str {
        "FormatField"
    }
}

macro_rules! number_fields {
    ($($name:ident => $kind:ident, $endian:ident;)*) => {
        $(pub fn $name() -> Node {
            FormatField::new(NumberKind::$kind, Endianness::$endian).into()
        })*
    };
}

number_fields! {
    u8 => U8, Big;
    i8 => I8, Big;
    u16_be => U16, Big;
    u16_le => U16, Little;
    u32_be => U32, Big;
    u32_le => U32, Little;
    u64_be => U64, Big;
    u64_le => U64, Little;
    i16_be => I16, Big;
    i16_le => I16, Little;
    i32_be => I32, Big;
    i32_le => I32, Little;
    i64_be => I64, Big;
    i64_le => I64, Little;
    f32_be => F32, Big;
    f32_le => F32, Little;
    f64_be => F64, Big;
    f64_le => F64, Little;
}

/// Integer of `bits` bits read from a bit stream (one byte per bit, see
/// [`crate::transform::bitwise`]). `swapped` reverses the order of its
/// 8-bit groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitsInteger {
    bits: u64,
    signed: bool,
    swapped: bool,
}

impl BitsInteger {
    pub fn new(bits: u64) -> Self {
        BitsInteger {
            bits,
            signed: false,
            swapped: false,
        }
    }

    pub fn signed(mut self) -> Self {
        self.signed = true;
        self
    }

    pub fn swapped(mut self) -> Self {
        self.swapped = true;
        self
    }

    fn check_shape(&self, path: &str) -> Result<()> {
        if self.bits == 0 || self.bits > 64 {
            return Err(CodecError::format(format!("cannot handle a {}-bit integer", self.bits), path));
        }
        if self.swapped && self.bits % 8 != 0 {
            return Err(CodecError::format(
                format!("swapped bit integer needs a multiple of 8 bits, got {}", self.bits),
                path,
            ));
        }
        Ok(())
    }

    fn reorder(&self, bits: Vec<u8>) -> Vec<u8> {
        if self.swapped {
            bits.chunks(8).rev().flatten().copied().collect()
        } else {
            bits
        }
    }
}

impl Construct for BitsInteger {
    fn parse(&self, stream: &mut dyn ReadStream, _ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>> {
        self.check_shape(path)?;
        let bits = self.reorder(stream_read(stream, self.bits, path)?);
        let raw = bits.iter().fold(0u64, |acc, bit| (acc << 1) | u64::from(bit & 1));
        let value = if self.signed {
            let mut n = i128::from(raw);
            if n >= 1i128 << (self.bits - 1) {
                n -= 1i128 << self.bits;
            }
            Value::I64(n as i64)
        } else {
            Value::U64(raw)
        };
        Ok(Flow::Continue(value))
    }

    fn build(
        &self,
        value: Value,
        stream: &mut dyn WriteStream,
        _ctx: &mut Context<'_>,
        path: &str,
    ) -> Result<Flow<Value>> {
        self.check_shape(path)?;
        let n = integer(&value, path)?;
        let (low, high) = if self.signed {
            (-(1i128 << (self.bits - 1)), 1i128 << (self.bits - 1))
        } else {
            (0, 1i128 << self.bits)
        };
        if n < low || n >= high {
            return Err(CodecError::format(
                format!("integer {} does not fit in {} bits", n, self.bits),
                path,
            ));
        }
        let raw = if n < 0 { (n + (1i128 << self.bits)) as u64 } else { n as u64 };
        let bits: Vec<u8> = (0..self.bits).rev().map(|i| ((raw >> i) & 1) as u8).collect();
        stream_write(stream, &self.reorder(bits), path)?;
        Ok(Flow::Continue(value))
    }

    fn static_size(&self, _ctx: &Context<'_>, _path: &str) -> Result<u64> {
        Ok(self.bits)
    }

    fn kind(&self) -> &'static str {
        "BitsInteger"
    }
}

/// Big-endian two's complement image of `n` in exactly `length` bytes.
fn integer_bytes(n: i128, length: usize, path: &str) -> Result<Vec<u8>> {
    let full = n.to_be_bytes();
    let sign = if n < 0 { 0xff } else { 0x00 };
    if length >= full.len() {
        let mut out = vec![sign; length - full.len()];
        out.extend_from_slice(&full);
        return Ok(out);
    }
    let (dropped, kept) = full.split_at(full.len() - length);
    if dropped.iter().any(|b| *b != sign) {
        return Err(CodecError::format(format!("integer {} does not fit in {} bytes", n, length), path));
    }
    Ok(kept.to_vec())
}

/// `length` raw bytes. Building also accepts an integer.
#[derive(Debug, Clone)]
pub struct Bytes {
    length: Expr,
}

impl Bytes {
    pub fn new(length: impl Into<Expr>) -> Self {
        Bytes { length: length.into() }
    }
}

impl Construct for Bytes {
    fn parse(&self, stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>> {
        let length = count_of(&ctx.evaluate(&self.length, path)?, path)?;
        Ok(Flow::Continue(Value::Bytes(stream_read(stream, length, path)?)))
    }

    fn build(
        &self,
        value: Value,
        stream: &mut dyn WriteStream,
        ctx: &mut Context<'_>,
        path: &str,
    ) -> Result<Flow<Value>> {
        let length = count_of(&ctx.evaluate(&self.length, path)?, path)?;
        let data = match value {
            Value::Bytes(data) => data,
            other if other.is_integer() => integer_bytes(integer(&other, path)?, length as usize, path)?,
            other => {
                return Err(CodecError::format(
                    format!("expected bytes, got {}", other.type_name()),
                    path,
                ))
            }
        };
        if data.len() as u64 != length {
            return Err(CodecError::stream(
                format!("bytes object of wrong length, expected {}, found {}", length, data.len()),
                path,
            ));
        }
        stream_write(stream, &data, path)?;
        Ok(Flow::Continue(Value::Bytes(data)))
    }

    fn static_size(&self, ctx: &Context<'_>, path: &str) -> Result<u64> {
        count_of(&evaluate_for_size(&self.length, ctx, path)?, path)
    }

    fn size(&self, value: &Value, ctx: &Context<'_>, path: &str) -> Result<u64> {
        match value {
            Value::Bytes(data) => Ok(data.len() as u64),
            _ => self.static_size(ctx, path),
        }
    }

    fn kind(&self) -> &'static str {
        "Bytes"
    }
}

/// Everything up to end of stream.
#[derive(Debug, Clone, Copy)]
pub struct GreedyBytes;

impl Construct for GreedyBytes {
    fn parse(&self, stream: &mut dyn ReadStream, _ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>> {
        Ok(Flow::Continue(Value::Bytes(stream_read_entire(stream, path)?)))
    }

    fn build(
        &self,
        value: Value,
        stream: &mut dyn WriteStream,
        _ctx: &mut Context<'_>,
        path: &str,
    ) -> Result<Flow<Value>> {
        match &value {
            Value::Bytes(data) => stream_write(stream, data, path)?,
            other => {
                return Err(CodecError::format(
                    format!("expected bytes, got {}", other.type_name()),
                    path,
                ))
            }
        }
        Ok(Flow::Continue(value))
    }

    fn size(&self, value: &Value, _ctx: &Context<'_>, path: &str) -> Result<u64> {
        value
            .as_bytes()
            .map(|b| b.len() as u64)
            .ok_or_else(|| CodecError::sizeof(format!("cannot size {} as bytes", value.type_name()), path))
    }

    fn kind(&self) -> &'static str {
        "GreedyBytes"
    }
}

/// One byte; any non-zero byte parses as `true`.
#[derive(Debug, Clone, Copy)]
pub struct Flag;

impl Construct for Flag {
    fn parse(&self, stream: &mut dyn ReadStream, _ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>> {
        let byte = stream_read(stream, 1, path)?;
        Ok(Flow::Continue(Value::Bool(byte[0] != 0)))
    }

    fn build(
        &self,
        value: Value,
        stream: &mut dyn WriteStream,
        _ctx: &mut Context<'_>,
        path: &str,
    ) -> Result<Flow<Value>> {
        let set = value.truthy();
        stream_write(stream, &[u8::from(set)], path)?;
        Ok(Flow::Continue(Value::Bool(set)))
    }

    fn static_size(&self, _ctx: &Context<'_>, _path: &str) -> Result<u64> {
        Ok(1)
    }

    fn kind(&self) -> &'static str {
        "Flag"
    }
}

/// Child whose value must equal `value`; builds without input.
#[derive(Debug, Clone)]
pub struct Const {
    value: Value,
    subcon: Box<Node>,
}

impl Const {
    pub fn new(value: impl Into<Value>, subcon: Node) -> Self {
        Const {
            value: value.into(),
            subcon: Box::new(subcon),
        }
    }

    /// Magic byte signature.
    pub fn bytes(signature: &[u8]) -> Self {
        Const::new(signature, Bytes::new(signature.len()).into())
    }
}

impl Construct for Const {
    fn parse(&self, stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>> {
        let parsed = match self.subcon.parse(stream, ctx, path)? {
            Flow::Continue(v) => v,
            other => return Ok(other),
        };
        if !parsed.loose_eq(&self.value) {
            return Err(CodecError::constant(
                format!("parsing expected {:?} but parsed {:?}", self.value, parsed),
                path,
            ));
        }
        Ok(Flow::Continue(parsed))
    }

    fn build(
        &self,
        value: Value,
        stream: &mut dyn WriteStream,
        ctx: &mut Context<'_>,
        path: &str,
    ) -> Result<Flow<Value>> {
        if !value.is_none() && !value.loose_eq(&self.value) {
            return Err(CodecError::constant(
                format!("building expected None or {:?} but got {:?}", self.value, value),
                path,
            ));
        }
        self.subcon.build(self.value.clone(), stream, ctx, path)
    }

    fn static_size(&self, ctx: &Context<'_>, path: &str) -> Result<u64> {
        self.subcon.static_size(ctx, path)
    }

    fn size(&self, _value: &Value, ctx: &Context<'_>, path: &str) -> Result<u64> {
        measure(self.subcon.as_ref(), &self.value, ctx, path)
    }

    fn preprocess(&self, _value: Value, _ctx: &mut Context<'_>, _path: &str) -> Result<Value> {
        Ok(self.value.clone())
    }

    fn flag_build_none(&self) -> bool {
        true
    }

    fn kind(&self) -> &'static str {
        "Const"
    }
}

/// Value computed from context; consumes and produces no bytes.
#[derive(Debug, Clone)]
pub struct Computed {
    func: Expr,
}

impl Computed {
    pub fn new(func: impl Into<Expr>) -> Self {
        Computed { func: func.into() }
    }
}

impl Construct for Computed {
    fn parse(&self, _stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>> {
        ctx.evaluate(&self.func, path).map(Flow::Continue)
    }

    fn build(
        &self,
        _value: Value,
        _stream: &mut dyn WriteStream,
        ctx: &mut Context<'_>,
        path: &str,
    ) -> Result<Flow<Value>> {
        ctx.evaluate(&self.func, path).map(Flow::Continue)
    }

    fn static_size(&self, _ctx: &Context<'_>, _path: &str) -> Result<u64> {
        Ok(0)
    }

    fn preprocess(&self, _value: Value, _ctx: &mut Context<'_>, _path: &str) -> Result<Value> {
        Ok(Value::Deferred(self.func.clone()))
    }

    fn flag_build_none(&self) -> bool {
        true
    }

    fn kind(&self) -> &'static str {
        "Computed"
    }
}

/// Child whose build value is always recomputed from `func`.
#[derive(Debug, Clone)]
pub struct Rebuild {
    subcon: Box<Node>,
    func: Expr,
}

impl Rebuild {
    pub fn new(subcon: Node, func: impl Into<Expr>) -> Self {
        Rebuild {
            subcon: Box::new(subcon),
            func: func.into(),
        }
    }

    fn value_size(&self, ctx: &Context<'_>, path: &str) -> Result<u64> {
        let value = evaluate_for_size(&self.func, ctx, path)?;
        let value = ctx.resolve(value, path)?;
        scope_ref(&self.subcon, ctx, |s| measure(self.subcon.as_ref(), &value, s, path))
    }
}

impl Construct for Rebuild {
    fn parse(&self, stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>> {
        with_scope(&self.subcon, ctx, |s| self.subcon.parse(stream, s, path))
    }

    fn build(
        &self,
        _value: Value,
        stream: &mut dyn WriteStream,
        ctx: &mut Context<'_>,
        path: &str,
    ) -> Result<Flow<Value>> {
        let value = ctx.evaluate(&self.func, path)?;
        let value = ctx.resolve(value, path)?;
        with_scope(&self.subcon, ctx, |s| self.subcon.build(value, stream, s, path))
    }

    fn static_size(&self, ctx: &Context<'_>, path: &str) -> Result<u64> {
        scope_ref(&self.subcon, ctx, |s| self.subcon.static_size(s, path))
    }

    fn size(&self, _value: &Value, ctx: &Context<'_>, path: &str) -> Result<u64> {
        self.value_size(ctx, path)
    }

    fn preprocess(&self, _value: Value, _ctx: &mut Context<'_>, _path: &str) -> Result<Value> {
        Ok(Value::Deferred(self.func.clone()))
    }

    fn preprocess_size(
        &self,
        _value: Value,
        ctx: &mut Context<'_>,
        path: &str,
        offset: u64,
    ) -> Result<(Value, MetaInformation)> {
        let size = match self.static_size(ctx, path) {
            Ok(size) => size,
            Err(e) if e.is_sizeof() => self.value_size(ctx, path)?,
            Err(e) => return Err(e),
        };
        Ok((Value::Deferred(self.func.clone()), MetaInformation::new(offset, size)))
    }

    fn flag_build_none(&self) -> bool {
        true
    }

    fn kind(&self) -> &'static str {
        "Rebuild"
    }
}

/// Child built from `value` when no value is given.
#[derive(Debug, Clone)]
pub struct Defaulted {
    subcon: Box<Node>,
    value: Expr,
}

impl Defaulted {
    pub fn new(subcon: Node, value: impl Into<Expr>) -> Self {
        Defaulted {
            subcon: Box::new(subcon),
            value: value.into(),
        }
    }

    fn or_default(&self, value: Value, ctx: &Context<'_>, path: &str) -> Result<Value> {
        match value {
            Value::None => ctx.evaluate(&self.value, path),
            other => Ok(other),
        }
    }
}

impl Construct for Defaulted {
    fn parse(&self, stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>> {
        with_scope(&self.subcon, ctx, |s| self.subcon.parse(stream, s, path))
    }

    fn build(
        &self,
        value: Value,
        stream: &mut dyn WriteStream,
        ctx: &mut Context<'_>,
        path: &str,
    ) -> Result<Flow<Value>> {
        let value = self.or_default(value, ctx, path)?;
        with_scope(&self.subcon, ctx, |s| self.subcon.build(value, stream, s, path))
    }

    fn static_size(&self, ctx: &Context<'_>, path: &str) -> Result<u64> {
        scope_ref(&self.subcon, ctx, |s| self.subcon.static_size(s, path))
    }

    fn size(&self, value: &Value, ctx: &Context<'_>, path: &str) -> Result<u64> {
        let value = match value {
            Value::None => evaluate_for_size(&self.value, ctx, path)?,
            other => other.clone(),
        };
        scope_ref(&self.subcon, ctx, |s| self.subcon.size(&value, s, path))
    }

    fn preprocess(&self, value: Value, ctx: &mut Context<'_>, path: &str) -> Result<Value> {
        let value = self.or_default(value, ctx, path)?;
        with_scope(&self.subcon, ctx, |s| self.subcon.preprocess(value, s, path))
    }

    fn flag_build_none(&self) -> bool {
        true
    }

    fn kind(&self) -> &'static str {
        "Default"
    }
}

/// Fails with a check error unless `func` is truthy.
#[derive(Debug, Clone)]
pub struct Check {
    func: Expr,
}

impl Check {
    pub fn new(func: impl Into<Expr>) -> Self {
        Check { func: func.into() }
    }

    fn verify(&self, ctx: &Context<'_>, path: &str, during: &str) -> Result<Flow<Value>> {
        if ctx.evaluate(&self.func, path)?.truthy() {
            Ok(Flow::Continue(Value::None))
        } else {
            Err(CodecError::check(format!("check failed during {}", during), path))
        }
    }
}

impl Construct for Check {
    fn parse(&self, _stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>> {
        self.verify(ctx, path, "parsing")
    }

    fn build(
        &self,
        _value: Value,
        _stream: &mut dyn WriteStream,
        ctx: &mut Context<'_>,
        path: &str,
    ) -> Result<Flow<Value>> {
        self.verify(ctx, path, "building")
    }

    fn static_size(&self, _ctx: &Context<'_>, _path: &str) -> Result<u64> {
        Ok(0)
    }

    fn flag_build_none(&self) -> bool {
        true
    }

    fn kind(&self) -> &'static str {
        "Check"
    }
}

/// Current repetition index of the enclosing array.
#[derive(Debug, Clone, Copy)]
pub struct Index;

impl Index {
    fn current(ctx: &Context<'_>) -> Flow<Value> {
        Flow::Continue(ctx.index().map(Value::from).unwrap_or(Value::None))
    }
}

impl Construct for Index {
    fn parse(&self, _stream: &mut dyn ReadStream, ctx: &mut Context<'_>, _path: &str) -> Result<Flow<Value>> {
        Ok(Index::current(ctx))
    }

    fn build(
        &self,
        _value: Value,
        _stream: &mut dyn WriteStream,
        ctx: &mut Context<'_>,
        _path: &str,
    ) -> Result<Flow<Value>> {
        Ok(Index::current(ctx))
    }

    fn static_size(&self, _ctx: &Context<'_>, _path: &str) -> Result<u64> {
        Ok(0)
    }

    fn flag_build_none(&self) -> bool {
        true
    }

    fn kind(&self) -> &'static str {
        "Index"
    }
}

/// Current stream offset.
#[derive(Debug, Clone, Copy)]
pub struct Tell;

impl Construct for Tell {
    fn parse(&self, stream: &mut dyn ReadStream, _ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>> {
        Ok(Flow::Continue(Value::U64(stream_tell(stream, path)?)))
    }

    fn build(
        &self,
        _value: Value,
        stream: &mut dyn WriteStream,
        _ctx: &mut Context<'_>,
        path: &str,
    ) -> Result<Flow<Value>> {
        Ok(Flow::Continue(Value::U64(stream_tell(stream, path)?)))
    }

    fn static_size(&self, _ctx: &Context<'_>, _path: &str) -> Result<u64> {
        Ok(0)
    }

    fn flag_build_none(&self) -> bool {
        true
    }

    fn kind(&self) -> &'static str {
        "Tell"
    }
}

/// No-op.
#[derive(Debug, Clone, Copy)]
pub struct Pass;

impl Construct for Pass {
    fn parse(&self, _stream: &mut dyn ReadStream, _ctx: &mut Context<'_>, _path: &str) -> Result<Flow<Value>> {
        Ok(Flow::Continue(Value::None))
    }

    fn build(
        &self,
        value: Value,
        _stream: &mut dyn WriteStream,
        _ctx: &mut Context<'_>,
        _path: &str,
    ) -> Result<Flow<Value>> {
        Ok(Flow::Continue(value))
    }

    fn static_size(&self, _ctx: &Context<'_>, _path: &str) -> Result<u64> {
        Ok(0)
    }

    fn flag_build_none(&self) -> bool {
        true
    }

    fn kind(&self) -> &'static str {
        "Pass"
    }
}

/// Asserts end of stream.
#[derive(Debug, Clone, Copy)]
pub struct Terminated;

impl Construct for Terminated {
    fn parse(&self, stream: &mut dyn ReadStream, _ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>> {
        let mut probe = [0u8; 1];
        let n = stream
            .read(&mut probe)
            .map_err(|e| CodecError::stream(format!("stream.read() failed: {}", e), path))?;
        if n > 0 {
            return Err(CodecError::terminated("expected end of stream", path));
        }
        Ok(Flow::Continue(Value::None))
    }

    fn build(
        &self,
        value: Value,
        _stream: &mut dyn WriteStream,
        _ctx: &mut Context<'_>,
        _path: &str,
    ) -> Result<Flow<Value>> {
        Ok(Flow::Continue(value))
    }

    fn static_size(&self, _ctx: &Context<'_>, _path: &str) -> Result<u64> {
        Ok(0)
    }

    fn flag_build_none(&self) -> bool {
        true
    }

    fn kind(&self) -> &'static str {
        "Terminated"
    }
}

/// Always fails; the error passes through Peek, Union and GreedyRange.
#[derive(Debug, Clone, Copy)]
pub struct ErrorField;

impl Construct for ErrorField {
    fn parse(&self, _stream: &mut dyn ReadStream, _ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>> {
        Err(CodecError::explicit("Error field was activated during parsing", path))
    }

    fn build(
        &self,
        _value: Value,
        _stream: &mut dyn WriteStream,
        _ctx: &mut Context<'_>,
        path: &str,
    ) -> Result<Flow<Value>> {
        Err(CodecError::explicit("Error field was activated during building", path))
    }

    fn static_size(&self, _ctx: &Context<'_>, path: &str) -> Result<u64> {
        Err(CodecError::sizeof(
            "Error does not have size, because it interrupts parsing and building",
            path,
        ))
    }

    fn size(&self, _value: &Value, ctx: &Context<'_>, path: &str) -> Result<u64> {
        self.static_size(ctx, path)
    }

    fn flag_build_none(&self) -> bool {
        true
    }

    fn kind(&self) -> &'static str {
        "Error"
    }
}

/// Ends the enclosing Struct, Sequence or GreedyRange when `cond` holds.
#[derive(Debug, Clone)]
pub struct StopIf {
    cond: Expr,
}

impl StopIf {
    pub fn new(cond: impl Into<Expr>) -> Self {
        StopIf { cond: cond.into() }
    }

    fn signal(&self, ctx: &Context<'_>, path: &str) -> Result<Flow<Value>> {
        if ctx.evaluate(&self.cond, path)?.truthy() {
            log::trace!("{}: stop condition met", path);
            Ok(Flow::Stop)
        } else {
            Ok(Flow::Continue(Value::None))
        }
    }
}

impl Construct for StopIf {
    fn parse(&self, _stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>> {
        self.signal(ctx, path)
    }

    fn build(
        &self,
        _value: Value,
        _stream: &mut dyn WriteStream,
        ctx: &mut Context<'_>,
        path: &str,
    ) -> Result<Flow<Value>> {
        self.signal(ctx, path)
    }

    fn static_size(&self, _ctx: &Context<'_>, path: &str) -> Result<u64> {
        Err(CodecError::sizeof("StopIf size depends on its condition", path))
    }

    fn size(&self, _value: &Value, _ctx: &Context<'_>, _path: &str) -> Result<u64> {
        Ok(0)
    }

    fn flag_build_none(&self) -> bool {
        true
    }

    fn stops(&self, ctx: &Context<'_>) -> Result<bool> {
        ctx.evaluate(&self.cond, "(sizing)").map(|v| v.truthy())
    }

    fn kind(&self) -> &'static str {
        "StopIf"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Codec;
    use crate::structs::Struct;

    #[test]
    fn numbers_roundtrip_with_endianness() {
        let codec = Codec::new(u32_le());
        assert_eq!(codec.parse(&[1, 0, 0, 0]).expect("parse"), Some(Value::U32(1)));
        assert_eq!(codec.build(&Value::U32(258)).expect("build"), vec![2, 1, 0, 0]);
        let codec = Codec::new(i16_be());
        assert_eq!(codec.parse(&[0xff, 0xfe]).expect("parse"), Some(Value::I16(-2)));
        let codec = Codec::new(f32_be());
        assert_eq!(codec.build(&Value::Float(1.0)).expect("build"), vec![0x3f, 0x80, 0, 0]);
    }

    #[test]
    fn out_of_range_integer_is_format_error() {
        let err = Codec::new(u8()).build(&Value::U16(300)).unwrap_err();
        assert!(matches!(err, CodecError::Format { .. }));
    }

    #[test]
    fn bytes_accepts_integer_and_checks_length() {
        let codec = Codec::new(Bytes::new(2u64).into());
        assert_eq!(codec.build(&Value::U16(0x0102)).expect("build"), vec![1, 2]);
        let err = codec.build(&Value::Bytes(vec![1])).unwrap_err();
        assert!(matches!(err, CodecError::Stream { .. }));
    }

    #[test]
    fn const_rejects_mismatch() {
        let codec = Codec::new(Const::bytes(b"PNG").into());
        assert_eq!(codec.parse(b"PNG").expect("parse"), Some(Value::Bytes(b"PNG".to_vec())));
        assert!(matches!(codec.parse(b"JPG").unwrap_err(), CodecError::Const { .. }));
        assert_eq!(codec.build(&Value::None).expect("build"), b"PNG".to_vec());
    }

    #[test]
    fn signed_bits_integer() {
        let codec = Codec::new(BitsInteger::new(4).signed().into());
        assert_eq!(codec.parse(&[1, 1, 1, 0]).expect("parse"), Some(Value::I64(-2)));
        assert_eq!(codec.build(&Value::I64(-2)).expect("build"), vec![1, 1, 1, 0]);
        assert!(codec.build(&Value::I64(8)).is_err());
    }

    #[test]
    fn terminated_and_error_field() {
        let codec = Codec::new(Struct::new(vec![u8().named("a"), Terminated.into()]).into());
        assert!(codec.parse(&[1]).is_ok());
        assert!(matches!(codec.parse(&[1, 2]).unwrap_err(), CodecError::Terminated { .. }));
        let err = Codec::new(ErrorField.into()).parse(&[]).unwrap_err();
        assert!(err.is_explicit());
    }

    #[test]
    fn check_and_computed_in_struct() {
        let schema = Struct::new(vec![
            u8().named("width"),
            u8().named("height"),
            Node::from(Computed::new(Expr::parse("this.width * this.height").expect("expr"))).named("area"),
            Check::new(Expr::parse("this.area < 100").expect("expr")).into(),
        ]);
        let codec = Codec::new(schema.into());
        let parsed = codec.parse(&[3, 4]).expect("parse").expect("value");
        assert_eq!(parsed.as_struct().and_then(|c| c.get("area")), Some(&Value::I64(12)));
        assert!(matches!(codec.parse(&[20, 20]).unwrap_err(), CodecError::Check { .. }));
    }

    #[test]
    fn stop_if_ends_struct() {
        let schema = Struct::new(vec![
            u8().named("kind"),
            StopIf::new(Expr::parse("this.kind == 0").expect("expr")).into(),
            u8().named("extra"),
        ]);
        let codec = Codec::new(schema.into());
        let parsed = codec.parse(&[0]).expect("parse").expect("value");
        assert!(parsed.as_struct().expect("struct").get("extra").is_none());
        let parsed = codec.parse(&[1, 5]).expect("parse").expect("value");
        assert_eq!(parsed.as_struct().and_then(|c| c.get("extra")), Some(&Value::U8(5)));
    }
}
