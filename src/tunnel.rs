//! Length-bounded regions: [`Prefixed`], [`FixedSized`], [`Padded`] and
//! [`Aligned`], plus regions delimited by the data itself:
//! [`NullTerminated`], [`NullStripped`] and [`OffsettedEnd`].

use crate::codec::{CodecError, Result};
use crate::context::Context;
use crate::expr::Expr;
use crate::leaf::Pass;
use crate::node::{
    count_of, evaluate_for_size, measure, proceed, scope_ref, size_add, sized_scope, with_scope,
    Construct, Flow, Node,
};
use crate::stream::{
    stream_read, stream_read_entire, stream_seek, stream_size, stream_tell, stream_write, ReadStream, WriteStream,
};
use crate::structs::Struct;
use crate::value::Value;
use std::io::{Cursor, SeekFrom};

fn region_length(length: &Value, path: &str) -> Result<u64> {
    match length.as_i128() {
        Some(n) if n < 0 => Err(CodecError::padding("length cannot be negative", path)),
        Some(n) if length.is_integer() => {
            u64::try_from(n).map_err(|_| CodecError::padding(format!("length {} too large", n), path))
        }
        _ => Err(CodecError::padding(
            format!("length must be an integer, got {}", length.type_name()),
            path,
        )),
    }
}

/// Child bytes preceded by their byte count.
#[derive(Debug, Clone)]
pub struct Prefixed {
    lengthfield: Box<Node>,
    subcon: Box<Node>,
    include_length: bool,
}

impl Prefixed {
    pub fn new(lengthfield: Node, subcon: Node) -> Self {
        Prefixed {
            lengthfield: Box::new(lengthfield),
            subcon: Box::new(subcon),
            include_length: false,
        }
    }

    /// The stored length counts the length field itself.
    pub fn include_length(mut self) -> Self {
        self.include_length = true;
        self
    }

    fn prefix_size(&self, ctx: &Context<'_>, path: &str) -> Result<u64> {
        if self.include_length {
            self.lengthfield.static_size(ctx, path)
        } else {
            Ok(0)
        }
    }

    fn read_length(&self, stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<Flow<u64>> {
        let stored = proceed!(self.lengthfield.parse(stream, ctx, path)?);
        let stored = count_of(&stored, path)?;
        let own = self.prefix_size(ctx, path)?;
        stored
            .checked_sub(own)
            .map(Flow::Continue)
            .ok_or_else(|| CodecError::range(format!("length {} smaller than its own field", stored), path))
    }
}

impl Construct for Prefixed {
    fn parse(&self, stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>> {
        let length = proceed!(self.read_length(stream, ctx, path)?);
        let mut substream = Cursor::new(stream_read(stream, length, path)?);
        with_scope(&self.subcon, ctx, |s| self.subcon.parse(&mut substream, s, path))
    }

    fn build(
        &self,
        value: Value,
        stream: &mut dyn WriteStream,
        ctx: &mut Context<'_>,
        path: &str,
    ) -> Result<Flow<Value>> {
        let mut substream = Cursor::new(Vec::new());
        let flow = with_scope(&self.subcon, ctx, |s| self.subcon.build(value, &mut substream, s, path))?;
        let built = proceed!(flow);
        let data = substream.into_inner();
        let length = data.len() as u64 + self.prefix_size(ctx, path)?;
        proceed!(self.lengthfield.build(Value::U64(length), stream, ctx, path)?);
        stream_write(stream, &data, path)?;
        Ok(Flow::Continue(built))
    }

    fn static_size(&self, ctx: &Context<'_>, path: &str) -> Result<u64> {
        let inner = scope_ref(&self.subcon, ctx, |s| self.subcon.static_size(s, path))?;
        size_add(self.lengthfield.static_size(ctx, path)?, inner, path)
    }

    fn size(&self, value: &Value, ctx: &Context<'_>, path: &str) -> Result<u64> {
        let inner = sized_scope(&self.subcon, value, ctx, |s| measure(self.subcon.as_ref(), value, s, path))?;
        let stored = Value::U64(size_add(inner, self.prefix_size(ctx, path)?, path)?);
        size_add(measure(self.lengthfield.as_ref(), &stored, ctx, path)?, inner, path)
    }

    fn preprocess(&self, value: Value, ctx: &mut Context<'_>, path: &str) -> Result<Value> {
        with_scope(&self.subcon, ctx, |s| self.subcon.preprocess(value, s, path))
    }

    fn expected_size(&self, stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<u64> {
        let start = stream_tell(stream, path)?;
        let length = match self.read_length(stream, ctx, path)? {
            Flow::Continue(n) => n,
            _ => return Err(CodecError::sizeof("length field did not produce a value", path)),
        };
        size_add(stream_tell(stream, path)? - start, length, path)
    }

    fn flag_build_none(&self) -> bool {
        self.subcon.flag_build_none()
    }

    fn kind(&self) -> &'static str {
        "Prefixed"
    }
}

/// Child confined to exactly `length` bytes; building pads with zeros.
#[derive(Debug, Clone)]
pub struct FixedSized {
    length: Expr,
    subcon: Box<Node>,
}

impl FixedSized {
    pub fn new(length: impl Into<Expr>, subcon: Node) -> Self {
        FixedSized {
            length: length.into(),
            subcon: Box::new(subcon),
        }
    }
}

impl Construct for FixedSized {
    fn parse(&self, stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>> {
        let length = region_length(&ctx.evaluate(&self.length, path)?, path)?;
        let mut substream = Cursor::new(stream_read(stream, length, path)?);
        with_scope(&self.subcon, ctx, |s| self.subcon.parse(&mut substream, s, path))
    }

    fn build(
        &self,
        value: Value,
        stream: &mut dyn WriteStream,
        ctx: &mut Context<'_>,
        path: &str,
    ) -> Result<Flow<Value>> {
        let length = region_length(&ctx.evaluate(&self.length, path)?, path)?;
        let mut substream = Cursor::new(Vec::new());
        let flow = with_scope(&self.subcon, ctx, |s| self.subcon.build(value, &mut substream, s, path))?;
        let built = proceed!(flow);
        let mut data = substream.into_inner();
        if data.len() as u64 > length {
            return Err(CodecError::padding(
                format!("subcon built {} bytes but was allowed only {}", data.len(), length),
                path,
            ));
        }
        data.resize(length as usize, 0);
        stream_write(stream, &data, path)?;
        Ok(Flow::Continue(built))
    }

    fn static_size(&self, ctx: &Context<'_>, path: &str) -> Result<u64> {
        region_length(&evaluate_for_size(&self.length, ctx, path)?, path)
    }

    fn preprocess(&self, value: Value, ctx: &mut Context<'_>, path: &str) -> Result<Value> {
        with_scope(&self.subcon, ctx, |s| self.subcon.preprocess(value, s, path))
    }

    fn flag_build_none(&self) -> bool {
        self.subcon.flag_build_none()
    }

    fn kind(&self) -> &'static str {
        "FixedSized"
    }
}

/// Child followed by `pattern` bytes up to a total of `length`.
#[derive(Debug, Clone)]
pub struct Padded {
    length: Expr,
    subcon: Box<Node>,
    pattern: u8,
}

impl Padded {
    pub fn new(length: impl Into<Expr>, subcon: Node) -> Self {
        Padded {
            length: length.into(),
            subcon: Box::new(subcon),
            pattern: 0,
        }
    }

    pub fn pattern(mut self, pattern: u8) -> Self {
        self.pattern = pattern;
        self
    }

    fn remaining(&self, length: u64, used: u64, verb: &str, path: &str) -> Result<u64> {
        length.checked_sub(used).ok_or_else(|| {
            CodecError::padding(
                format!("subcon {} {} bytes but was allowed only {}", verb, used, length),
                path,
            )
        })
    }
}

impl Construct for Padded {
    fn parse(&self, stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>> {
        let length = region_length(&ctx.evaluate(&self.length, path)?, path)?;
        let start = stream_tell(stream, path)?;
        let flow = with_scope(&self.subcon, ctx, |s| self.subcon.parse(stream, s, path))?;
        let value = proceed!(flow);
        let used = stream_tell(stream, path)? - start;
        stream_read(stream, self.remaining(length, used, "parsed", path)?, path)?;
        Ok(Flow::Continue(value))
    }

    fn build(
        &self,
        value: Value,
        stream: &mut dyn WriteStream,
        ctx: &mut Context<'_>,
        path: &str,
    ) -> Result<Flow<Value>> {
        let length = region_length(&ctx.evaluate(&self.length, path)?, path)?;
        let start = stream_tell(stream, path)?;
        let flow = with_scope(&self.subcon, ctx, |s| self.subcon.build(value, stream, s, path))?;
        let built = proceed!(flow);
        let used = stream_tell(stream, path)? - start;
        let pad = self.remaining(length, used, "built", path)?;
        stream_write(stream, &vec![self.pattern; pad as usize], path)?;
        Ok(Flow::Continue(built))
    }

    fn static_size(&self, ctx: &Context<'_>, path: &str) -> Result<u64> {
        region_length(&evaluate_for_size(&self.length, ctx, path)?, path)
    }

    fn preprocess(&self, value: Value, ctx: &mut Context<'_>, path: &str) -> Result<Value> {
        with_scope(&self.subcon, ctx, |s| self.subcon.preprocess(value, s, path))
    }

    fn flag_build_none(&self) -> bool {
        self.subcon.flag_build_none()
    }

    fn kind(&self) -> &'static str {
        "Padded"
    }
}

/// `length` filler bytes; parses to `None`.
pub fn padding(length: impl Into<Expr>) -> Node {
    Padded::new(length, Pass.into()).into()
}

/// Child followed by `pattern` bytes up to the next multiple of `modulus`.
#[derive(Debug, Clone)]
pub struct Aligned {
    modulus: Expr,
    subcon: Box<Node>,
    pattern: u8,
}

fn alignment_pad(used: u64, modulus: u64) -> u64 {
    (modulus - used % modulus) % modulus
}

impl Aligned {
    pub fn new(modulus: impl Into<Expr>, subcon: Node) -> Self {
        Aligned {
            modulus: modulus.into(),
            subcon: Box::new(subcon),
            pattern: 0,
        }
    }

    pub fn pattern(mut self, pattern: u8) -> Self {
        self.pattern = pattern;
        self
    }

    fn modulus(&self, value: &Value, path: &str) -> Result<u64> {
        let modulus = count_of(value, path).map_err(|e| CodecError::padding(e.to_string(), path))?;
        if modulus < 2 {
            return Err(CodecError::padding(format!("expected modulus 2 or greater, got {}", modulus), path));
        }
        Ok(modulus)
    }
}

impl Construct for Aligned {
    fn parse(&self, stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>> {
        let modulus = self.modulus(&ctx.evaluate(&self.modulus, path)?, path)?;
        let start = stream_tell(stream, path)?;
        let value = proceed!(with_scope(&self.subcon, ctx, |s| self.subcon.parse(stream, s, path))?);
        let used = stream_tell(stream, path)? - start;
        stream_read(stream, alignment_pad(used, modulus), path)?;
        Ok(Flow::Continue(value))
    }

    fn build(
        &self,
        value: Value,
        stream: &mut dyn WriteStream,
        ctx: &mut Context<'_>,
        path: &str,
    ) -> Result<Flow<Value>> {
        let modulus = self.modulus(&ctx.evaluate(&self.modulus, path)?, path)?;
        let start = stream_tell(stream, path)?;
        let built = proceed!(with_scope(&self.subcon, ctx, |s| self.subcon.build(value, stream, s, path))?);
        let used = stream_tell(stream, path)? - start;
        stream_write(stream, &vec![self.pattern; alignment_pad(used, modulus) as usize], path)?;
        Ok(Flow::Continue(built))
    }

    fn static_size(&self, ctx: &Context<'_>, path: &str) -> Result<u64> {
        let modulus = self.modulus(&evaluate_for_size(&self.modulus, ctx, path)?, path)?;
        let inner = scope_ref(&self.subcon, ctx, |s| self.subcon.static_size(s, path))?;
        size_add(inner, alignment_pad(inner, modulus), path)
    }

    fn size(&self, value: &Value, ctx: &Context<'_>, path: &str) -> Result<u64> {
        let modulus = self.modulus(&evaluate_for_size(&self.modulus, ctx, path)?, path)?;
        let inner = sized_scope(&self.subcon, value, ctx, |s| measure(self.subcon.as_ref(), value, s, path))?;
        size_add(inner, alignment_pad(inner, modulus), path)
    }

    fn preprocess(&self, value: Value, ctx: &mut Context<'_>, path: &str) -> Result<Value> {
        with_scope(&self.subcon, ctx, |s| self.subcon.preprocess(value, s, path))
    }

    fn flag_build_none(&self) -> bool {
        self.subcon.flag_build_none()
    }

    fn kind(&self) -> &'static str {
        "Aligned"
    }
}

/// A [`Struct`] whose every field is individually [`Aligned`] to `modulus`.
pub fn aligned_struct(modulus: impl Into<Expr>, fields: Vec<Node>) -> Node {
    let modulus = modulus.into();
    let fields = fields
        .into_iter()
        .map(|field| match field.name().map(str::to_string) {
            Some(name) => Aligned::new(modulus.clone(), field).named(&name),
            None => Aligned::new(modulus.clone(), field).into(),
        })
        .collect();
    Struct::new(fields).into()
}

/// Child data delimited by a terminator sequence.
#[derive(Debug, Clone)]
pub struct NullTerminated {
    subcon: Box<Node>,
    term: Vec<u8>,
    include: bool,
    consume: bool,
    require: bool,
}

impl NullTerminated {
    pub fn new(subcon: Node) -> Self {
        NullTerminated {
            subcon: Box::new(subcon),
            term: vec![0],
            include: false,
            consume: true,
            require: true,
        }
    }

    /// Terminator unit; the data is scanned in steps of its length.
    pub fn term(mut self, term: &[u8]) -> Self {
        self.term = term.to_vec();
        self
    }

    /// Hand the terminator to the child along with the data.
    pub fn include(mut self) -> Self {
        self.include = true;
        self
    }

    /// Leave the terminator in the stream.
    pub fn keep(mut self) -> Self {
        self.consume = false;
        self
    }

    /// End of stream also ends the data.
    pub fn optional(mut self) -> Self {
        self.require = false;
        self
    }

    fn unit(&self, path: &str) -> Result<u64> {
        if self.term.is_empty() {
            return Err(CodecError::padding("terminator must be at least 1 byte", path));
        }
        Ok(self.term.len() as u64)
    }
}

impl Construct for NullTerminated {
    fn parse(&self, stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>> {
        let unit = self.unit(path)?;
        let mut data = Vec::new();
        loop {
            let chunk = match stream_read(stream, unit, path) {
                Ok(chunk) => chunk,
                Err(e) if self.require => return Err(e),
                Err(e) => {
                    log::trace!("{}: no terminator before end of stream: {}", path, e);
                    break;
                }
            };
            if chunk == self.term {
                if self.include {
                    data.extend_from_slice(&chunk);
                }
                if !self.consume {
                    stream_seek(stream, SeekFrom::Current(-(unit as i64)), path)?;
                }
                break;
            }
            data.extend_from_slice(&chunk);
        }
        let mut substream = Cursor::new(data);
        with_scope(&self.subcon, ctx, |s| self.subcon.parse(&mut substream, s, path))
    }

    fn build(
        &self,
        value: Value,
        stream: &mut dyn WriteStream,
        ctx: &mut Context<'_>,
        path: &str,
    ) -> Result<Flow<Value>> {
        self.unit(path)?;
        let built = proceed!(with_scope(&self.subcon, ctx, |s| self.subcon.build(value, stream, s, path))?);
        stream_write(stream, &self.term, path)?;
        Ok(Flow::Continue(built))
    }

    fn size(&self, value: &Value, ctx: &Context<'_>, path: &str) -> Result<u64> {
        let inner = sized_scope(&self.subcon, value, ctx, |s| measure(self.subcon.as_ref(), value, s, path))?;
        size_add(inner, self.unit(path)?, path)
    }

    fn preprocess(&self, value: Value, ctx: &mut Context<'_>, path: &str) -> Result<Value> {
        with_scope(&self.subcon, ctx, |s| self.subcon.preprocess(value, s, path))
    }

    fn flag_build_none(&self) -> bool {
        self.subcon.flag_build_none()
    }

    fn kind(&self) -> &'static str {
        "NullTerminated"
    }
}

/// Child parsed from the rest of the stream with trailing `pad` units removed.
#[derive(Debug, Clone)]
pub struct NullStripped {
    subcon: Box<Node>,
    pad: Vec<u8>,
}

impl NullStripped {
    pub fn new(subcon: Node) -> Self {
        NullStripped {
            subcon: Box::new(subcon),
            pad: vec![0],
        }
    }

    pub fn pad(mut self, pad: &[u8]) -> Self {
        self.pad = pad.to_vec();
        self
    }

    fn strip<'d>(&self, data: &'d [u8], path: &str) -> Result<&'d [u8]> {
        let unit = self.pad.len();
        if unit == 0 {
            return Err(CodecError::padding("pad must be at least 1 byte", path));
        }
        let mut end = data.len();
        let tail = end % unit;
        if tail != 0 && data[end - tail..] == self.pad[..tail] {
            end -= tail;
        }
        while end >= unit && data[end - unit..end] == self.pad[..] {
            end -= unit;
        }
        Ok(&data[..end])
    }
}

impl Construct for NullStripped {
    fn parse(&self, stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>> {
        let data = stream_read_entire(stream, path)?;
        let mut substream = Cursor::new(self.strip(&data, path)?.to_vec());
        with_scope(&self.subcon, ctx, |s| self.subcon.parse(&mut substream, s, path))
    }

    fn build(
        &self,
        value: Value,
        stream: &mut dyn WriteStream,
        ctx: &mut Context<'_>,
        path: &str,
    ) -> Result<Flow<Value>> {
        with_scope(&self.subcon, ctx, |s| self.subcon.build(value, stream, s, path))
    }

    fn preprocess(&self, value: Value, ctx: &mut Context<'_>, path: &str) -> Result<Value> {
        with_scope(&self.subcon, ctx, |s| self.subcon.preprocess(value, s, path))
    }

    fn flag_build_none(&self) -> bool {
        self.subcon.flag_build_none()
    }

    fn kind(&self) -> &'static str {
        "NullStripped"
    }
}

/// Child parsed from the bytes between here and `endoffset` relative to
/// the end of the stream (0 or negative).
#[derive(Debug, Clone)]
pub struct OffsettedEnd {
    endoffset: Expr,
    subcon: Box<Node>,
}

impl OffsettedEnd {
    pub fn new(endoffset: impl Into<Expr>, subcon: Node) -> Self {
        OffsettedEnd {
            endoffset: endoffset.into(),
            subcon: Box::new(subcon),
        }
    }
}

impl Construct for OffsettedEnd {
    fn parse(&self, stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>> {
        let endoffset = ctx.evaluate(&self.endoffset, path)?;
        let endoffset = endoffset.as_i128().filter(|_| endoffset.is_integer()).ok_or_else(|| {
            CodecError::stream(format!("end offset must be an integer, got {}", endoffset.type_name()), path)
        })?;
        let position = stream_tell(stream, path)?;
        let end = stream_size(stream, path)?;
        let length = i128::from(end) + endoffset - i128::from(position);
        let length = u64::try_from(length).map_err(|_| {
            CodecError::stream(
                format!("end offset {} lies before the current position {}", endoffset, position),
                path,
            )
        })?;
        let mut substream = Cursor::new(stream_read(stream, length, path)?);
        with_scope(&self.subcon, ctx, |s| self.subcon.parse(&mut substream, s, path))
    }

    fn build(
        &self,
        value: Value,
        stream: &mut dyn WriteStream,
        ctx: &mut Context<'_>,
        path: &str,
    ) -> Result<Flow<Value>> {
        with_scope(&self.subcon, ctx, |s| self.subcon.build(value, stream, s, path))
    }

    fn preprocess(&self, value: Value, ctx: &mut Context<'_>, path: &str) -> Result<Value> {
        with_scope(&self.subcon, ctx, |s| self.subcon.preprocess(value, s, path))
    }

    fn flag_build_none(&self) -> bool {
        self.subcon.flag_build_none()
    }

    fn kind(&self) -> &'static str {
        "OffsettedEnd"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrays::GreedyRange;
    use crate::codec::Codec;
    use crate::leaf::{u16_le, u8 as byte, GreedyBytes};
    use crate::value::Container;

    #[test]
    fn prefixed_bounds_greedy_child() {
        let codec = Codec::new(Prefixed::new(byte(), GreedyRange::new(u16_le()).into()).into());
        let parsed = codec.parse(&[4, 1, 0, 2, 0, 9]).expect("parse").expect("value");
        assert_eq!(parsed, Value::from(vec![Value::U16(1), Value::U16(2)]));
        assert_eq!(codec.build(&parsed).expect("build"), vec![4, 1, 0, 2, 0]);
        assert_eq!(codec.size(&parsed).expect("size"), 5);
    }

    #[test]
    fn prefixed_include_length() {
        let codec = Codec::new(Prefixed::new(byte(), GreedyBytes.into()).include_length().into());
        assert_eq!(codec.build(&Value::Bytes(vec![7, 7])).expect("build"), vec![3, 7, 7]);
        assert_eq!(codec.parse(&[3, 7, 7]).expect("parse"), Some(Value::Bytes(vec![7, 7])));
    }

    #[test]
    fn fixed_sized_pads_and_rejects_overflow() {
        let codec = Codec::new(FixedSized::new(4u64, GreedyBytes.into()).into());
        assert_eq!(codec.build(&Value::Bytes(vec![1])).expect("build"), vec![1, 0, 0, 0]);
        assert_eq!(codec.static_size().expect("size"), 4);
        let err = codec.build(&Value::Bytes(vec![0; 5])).unwrap_err();
        assert!(matches!(err, CodecError::Padding { .. }));
    }

    #[test]
    fn padded_consumes_remainder() {
        let codec = Codec::new(Padded::new(3u64, byte()).pattern(0xee).into());
        assert_eq!(codec.build(&Value::U8(5)).expect("build"), vec![5, 0xee, 0xee]);
        assert_eq!(codec.parse(&[5, 1, 2]).expect("parse"), Some(Value::U8(5)));
        let pad = Codec::new(padding(2u64));
        assert_eq!(pad.build(&Value::None).expect("build"), vec![0, 0]);
    }

    #[test]
    fn aligned_pads_to_modulus() {
        let codec = Codec::new(Aligned::new(4u64, u16_le()).pattern(0xff).into());
        assert_eq!(codec.build(&Value::U16(1)).expect("build"), vec![1, 0, 0xff, 0xff]);
        assert_eq!(codec.parse(&[1, 0, 0xff, 0xff]).expect("parse"), Some(Value::U16(1)));
        assert_eq!(codec.static_size().expect("size"), 4);
        let err = Codec::new(Aligned::new(1u64, byte()).into()).build(&Value::U8(1)).unwrap_err();
        assert!(matches!(err, CodecError::Padding { .. }));
    }

    #[test]
    fn aligned_struct_aligns_each_field() {
        let codec = Codec::new(aligned_struct(4u64, vec![byte().named("a"), u16_le().named("b")]));
        let value = Value::from(Container::new().with("a", Value::U8(0xff)).with("b", Value::U16(0xffff)));
        let built = codec.build(&value).expect("build");
        assert_eq!(built, vec![0xff, 0, 0, 0, 0xff, 0xff, 0, 0]);
        let parsed = codec.parse(&built).expect("parse").expect("value");
        assert_eq!(parsed.as_struct().expect("struct").get("b"), Some(&Value::U16(0xffff)));
    }

    #[test]
    fn null_terminated_splits_at_terminator() {
        let codec = Codec::new(
            Struct::new(vec![
                NullTerminated::new(GreedyBytes.into()).named("name"),
                byte().named("next"),
            ])
            .into(),
        );
        let parsed = codec.parse(b"abc\0\x07").expect("parse").expect("value");
        let c = parsed.as_struct().expect("struct");
        assert_eq!(c.get("name"), Some(&Value::Bytes(b"abc".to_vec())));
        assert_eq!(c.get("next"), Some(&Value::U8(7)));
        assert_eq!(codec.build(&parsed).expect("build"), b"abc\0\x07".to_vec());
    }

    #[test]
    fn null_terminated_options() {
        let wide = Codec::new(NullTerminated::new(GreedyBytes.into()).term(&[0, 0]).include().into());
        assert_eq!(wide.parse(&[1, 0, 0, 0]).expect("parse"), Some(Value::Bytes(vec![1, 0, 0, 0])));
        let missing = Codec::new(NullTerminated::new(GreedyBytes.into()).into());
        assert!(matches!(missing.parse(b"abc").unwrap_err(), CodecError::Stream { .. }));
        let optional = Codec::new(NullTerminated::new(GreedyBytes.into()).optional().into());
        assert_eq!(optional.parse(b"abc").expect("parse"), Some(Value::Bytes(b"abc".to_vec())));
        let kept = Codec::new(
            Struct::new(vec![NullTerminated::new(GreedyBytes.into()).keep().named("s"), byte().named("t")]).into(),
        );
        let parsed = kept.parse(b"x\0").expect("parse").expect("value");
        assert_eq!(parsed.as_struct().expect("struct").get("t"), Some(&Value::U8(0)));
        let empty = Codec::new(NullTerminated::new(GreedyBytes.into()).term(&[]).into());
        assert!(matches!(empty.parse(b"a").unwrap_err(), CodecError::Padding { .. }));
    }

    #[test]
    fn null_stripped_removes_trailing_pad() {
        let codec = Codec::new(NullStripped::new(GreedyBytes.into()).into());
        assert_eq!(codec.parse(&[1, 0, 2, 0, 0]).expect("parse"), Some(Value::Bytes(vec![1, 0, 2])));
        let wide = Codec::new(NullStripped::new(GreedyBytes.into()).pad(&[0xaa, 0xbb]).into());
        assert_eq!(wide.parse(&[1, 0, 0xaa, 0xbb, 0xaa]).expect("parse"), Some(Value::Bytes(vec![1, 0])));
        assert!(codec.static_size().unwrap_err().is_sizeof());
    }

    #[test]
    fn offsetted_end_leaves_trailer() {
        let codec = Codec::new(
            Struct::new(vec![
                OffsettedEnd::new(-2i64, GreedyBytes.into()).named("body"),
                u16_le().named("crc"),
            ])
            .into(),
        );
        let parsed = codec.parse(&[1, 2, 3, 0x34, 0x12]).expect("parse").expect("value");
        let c = parsed.as_struct().expect("struct");
        assert_eq!(c.get("body"), Some(&Value::Bytes(vec![1, 2, 3])));
        assert_eq!(c.get("crc"), Some(&Value::U16(0x1234)));
        let err = Codec::new(OffsettedEnd::new(-3i64, GreedyBytes.into()).into()).parse(&[1]).unwrap_err();
        assert!(matches!(err, CodecError::Stream { .. }));
    }
}
