//! Out-of-line access: [`Pointer`], [`Area`] and [`Peek`].
//!
//! All three leave the stream exactly where they found it, whether the
//! child succeeds or fails.

use crate::arrays::{build_elements, elements_size, list_value, preprocess_elements, preprocess_size_elements};
use crate::codec::{CodecError, Result};
use crate::context::Context;
use crate::expr::Expr;
use crate::node::{
    evaluate_count, evaluate_for_size, sized_scope, size_add, with_scope, Construct, Flow, Node,
};
use crate::stream::{stream_seek, stream_tell, ReadStream, WriteStream};
use crate::value::{ListContainer, MetaInformation, Value};
use std::io::SeekFrom;

/// Child data located at `offset` (negative: relative to end of stream).
#[derive(Debug, Clone)]
pub struct Pointer {
    offset: Expr,
    subcon: Box<Node>,
}

/// Absolute start of out-of-line data when it can be known before writing;
/// 0 when it depends on data not laid out yet or on the stream end.
fn layout_offset(offset: &Expr, ctx: &Context<'_>, path: &str) -> Result<u64> {
    let value = match evaluate_for_size(offset, ctx, path) {
        Ok(v) => v,
        Err(e) if e.is_sizeof() => {
            log::trace!("{}: offset unknown during layout: {}", path, e);
            return Ok(0);
        }
        Err(e) => return Err(e),
    };
    match seek_target(&value, path)? {
        SeekFrom::Start(offset) => Ok(offset),
        _ => {
            log::trace!("{}: end-relative offset {:?} laid out at 0", path, value);
            Ok(0)
        }
    }
}

fn seek_target(offset: &Value, path: &str) -> Result<SeekFrom> {
    match offset.as_i128() {
        Some(o) if o < 0 => Ok(SeekFrom::End(o as i64)),
        Some(o) => u64::try_from(o)
            .map(SeekFrom::Start)
            .map_err(|_| CodecError::stream(format!("offset {} out of range", o), path)),
        None => Err(CodecError::stream(
            format!("pointer offset must be an integer, got {}", offset.type_name()),
            path,
        )),
    }
}

impl Pointer {
    pub fn new(offset: impl Into<Expr>, subcon: Node) -> Self {
        Pointer {
            offset: offset.into(),
            subcon: Box::new(subcon),
        }
    }
}

impl Construct for Pointer {
    fn parse(&self, stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>> {
        let target = seek_target(&ctx.evaluate(&self.offset, path)?, path)?;
        let fallback = stream_tell(stream, path)?;
        let result = stream_seek(stream, target, path)
            .and_then(|_| with_scope(&self.subcon, ctx, |s| self.subcon.parse(stream, s, path)));
        stream_seek(stream, SeekFrom::Start(fallback), path)?;
        result
    }

    fn build(
        &self,
        value: Value,
        stream: &mut dyn WriteStream,
        ctx: &mut Context<'_>,
        path: &str,
    ) -> Result<Flow<Value>> {
        let target = seek_target(&ctx.evaluate(&self.offset, path)?, path)?;
        let fallback = stream_tell(stream, path)?;
        let result = stream_seek(stream, target, path)
            .and_then(|_| with_scope(&self.subcon, ctx, |s| self.subcon.build(value, stream, s, path)));
        stream_seek(stream, SeekFrom::Start(fallback), path)?;
        result
    }

    fn static_size(&self, _ctx: &Context<'_>, _path: &str) -> Result<u64> {
        Ok(0)
    }

    fn full_size(&self, value: &Value, ctx: &Context<'_>, path: &str) -> Result<u64> {
        sized_scope(&self.subcon, value, ctx, |s| self.subcon.full_size(value, s, path))
    }

    fn preprocess(&self, value: Value, ctx: &mut Context<'_>, path: &str) -> Result<Value> {
        with_scope(&self.subcon, ctx, |s| self.subcon.preprocess(value, s, path))
    }

    fn preprocess_size(
        &self,
        value: Value,
        ctx: &mut Context<'_>,
        path: &str,
        offset: u64,
    ) -> Result<(Value, MetaInformation)> {
        let target = layout_offset(&self.offset, ctx, path)?;
        let (value, child) =
            with_scope(&self.subcon, ctx, |s| self.subcon.preprocess_size(value, s, path, target))?;
        let meta = MetaInformation::new(offset, 0).with_pointer_size(child.size + child.pointer_size);
        Ok((value, meta))
    }

    fn flag_build_none(&self) -> bool {
        self.subcon.flag_build_none()
    }

    fn kind(&self) -> &'static str {
        "Pointer"
    }
}

/// Elements packed into `size` bytes at `offset` (negative: relative to
/// end of stream). Takes no room where it is declared.
#[derive(Debug, Clone)]
pub struct Area {
    offset: Expr,
    size: Expr,
    subcon: Box<Node>,
    check_stream_pos: bool,
    count: Option<Expr>,
}

impl Area {
    pub fn new(offset: impl Into<Expr>, size: impl Into<Expr>, subcon: Node) -> Self {
        Area {
            offset: offset.into(),
            size: size.into(),
            subcon: Box::new(subcon),
            check_stream_pos: true,
            count: None,
        }
    }

    /// Accept elements that stop short of the end of the region.
    pub fn allow_short(mut self) -> Self {
        self.check_stream_pos = false;
        self
    }

    /// Require exactly `count` elements.
    pub fn count(mut self, count: impl Into<Expr>) -> Self {
        self.count = Some(count.into());
        self
    }

    fn check_end(&self, start: u64, position: u64, size: u64, path: &str) -> Result<()> {
        let used = position - start;
        if used > size || (self.check_stream_pos && used != size) {
            return Err(CodecError::stream(
                format!("area of {} bytes at {} ended after {} bytes", size, start, used),
                path,
            ));
        }
        Ok(())
    }

    fn check_count(&self, found: usize, ctx: &Context<'_>, path: &str) -> Result<()> {
        if let Some(count) = &self.count {
            let expected = evaluate_count(count, ctx, path)?;
            if expected != found as u64 {
                return Err(CodecError::range(
                    format!("expected {} elements in area, found {}", expected, found),
                    path,
                ));
            }
        }
        Ok(())
    }

    fn parse_region(
        &self,
        stream: &mut dyn ReadStream,
        ctx: &mut Context<'_>,
        path: &str,
        start: u64,
        size: u64,
    ) -> Result<Flow<Value>> {
        let end = size_add(start, size, path)?;
        let mut items = ListContainer::new();
        let mut position = start;
        while position < end {
            let mut scope = ctx.indexed(items.len());
            match with_scope(&self.subcon, &mut scope, |s| self.subcon.parse(stream, s, path))? {
                Flow::Continue(v) => items.push(v),
                Flow::Stop => break,
                Flow::Cancel => return Ok(Flow::Cancel),
            }
            let next = stream_tell(stream, path)?;
            if next == position {
                return Err(CodecError::stream(
                    format!("area element {} consumed no bytes", items.len() - 1),
                    path,
                ));
            }
            position = next;
        }
        self.check_end(start, position, size, path)?;
        self.check_count(items.len(), ctx, path)?;
        Ok(Flow::Continue(Value::List(items)))
    }
}

impl Construct for Area {
    fn parse(&self, stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>> {
        let size = evaluate_count(&self.size, ctx, path)?;
        if size == 0 {
            return Ok(Flow::Continue(Value::List(ListContainer::new())));
        }
        let target = seek_target(&ctx.evaluate(&self.offset, path)?, path)?;
        let fallback = stream_tell(stream, path)?;
        let result = stream_seek(stream, target, path)
            .and_then(|start| self.parse_region(stream, ctx, path, start, size));
        stream_seek(stream, SeekFrom::Start(fallback), path)?;
        result
    }

    fn build(
        &self,
        value: Value,
        stream: &mut dyn WriteStream,
        ctx: &mut Context<'_>,
        path: &str,
    ) -> Result<Flow<Value>> {
        let items = list_value(ctx.resolve(value, path)?, "Area", path)?;
        let size = evaluate_count(&self.size, ctx, path)?;
        self.check_count(items.len(), ctx, path)?;
        let target = seek_target(&ctx.evaluate(&self.offset, path)?, path)?;
        let fallback = stream_tell(stream, path)?;
        let result = stream_seek(stream, target, path).and_then(|start| {
            let built = match build_elements(&self.subcon, &items, stream, ctx, path)? {
                Flow::Continue(built) => built,
                other => return Ok(other.map(Value::List)),
            };
            self.check_end(start, stream_tell(stream, path)?, size, path)?;
            Ok(Flow::Continue(Value::List(built)))
        });
        stream_seek(stream, SeekFrom::Start(fallback), path)?;
        result
    }

    fn static_size(&self, _ctx: &Context<'_>, _path: &str) -> Result<u64> {
        Ok(0)
    }

    fn full_size(&self, value: &Value, ctx: &Context<'_>, path: &str) -> Result<u64> {
        elements_size(&self.subcon, value, ctx, path, true)
    }

    fn preprocess(&self, value: Value, ctx: &mut Context<'_>, path: &str) -> Result<Value> {
        preprocess_elements(&self.subcon, list_value(value, "Area", path)?, ctx, path)
    }

    fn preprocess_size(
        &self,
        value: Value,
        ctx: &mut Context<'_>,
        path: &str,
        offset: u64,
    ) -> Result<(Value, MetaInformation)> {
        let target = layout_offset(&self.offset, ctx, path)?;
        let items = list_value(value, "Area", path)?;
        let (items, child) = preprocess_size_elements(&self.subcon, items, ctx, path, target)?;
        let meta = MetaInformation::new(offset, 0).with_pointer_size(child.size + child.pointer_size);
        Ok((Value::List(items), meta))
    }

    fn is_array(&self) -> bool {
        true
    }

    fn kind(&self) -> &'static str {
        "Area"
    }
}

/// Parse ahead without consuming; a failed parse yields `None`. Builds nothing.
#[derive(Debug, Clone)]
pub struct Peek {
    subcon: Box<Node>,
}

impl Peek {
    pub fn new(subcon: Node) -> Self {
        Peek {
            subcon: Box::new(subcon),
        }
    }
}

impl Construct for Peek {
    fn parse(&self, stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>> {
        let fallback = stream_tell(stream, path)?;
        let result = with_scope(&self.subcon, ctx, |s| self.subcon.parse(stream, s, path));
        stream_seek(stream, SeekFrom::Start(fallback), path)?;
        match result {
            Err(e) if !e.is_explicit() => {
                log::trace!("{}: peek failed: {}", path, e);
                Ok(Flow::Continue(Value::None))
            }
            other => other,
        }
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
        "Peek"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Codec;
    use crate::leaf::{u16_le, u8 as byte};
    use crate::structs::Struct;

    fn table() -> Codec {
        Codec::new(
            Struct::new(vec![
                byte().named("start"),
                byte().named("length"),
                Area::new(Expr::this("start"), Expr::this("length"), u16_le()).named("items"),
            ])
            .into(),
        )
    }

    #[test]
    fn area_parses_region_and_leaves_position() {
        let codec = Codec::new(
            Struct::new(vec![
                byte().named("start"),
                byte().named("length"),
                Area::new(Expr::this("start"), Expr::this("length"), u16_le()).named("items"),
                byte().named("after"),
            ])
            .into(),
        );
        let parsed = codec.parse(&[3, 4, 0xaa, 1, 0, 2, 0]).expect("parse").expect("value");
        let c = parsed.as_struct().expect("struct");
        assert_eq!(c.get("items"), Some(&Value::from(vec![Value::U16(1), Value::U16(2)])));
        assert_eq!(c.get("after"), Some(&Value::U8(0xaa)));
    }

    #[test]
    fn area_rejects_partial_element() {
        let err = table().parse(&[2, 3, 1, 0, 2, 0]).unwrap_err();
        assert!(matches!(err, CodecError::Stream { .. }), "{}", err);
    }

    #[test]
    fn area_empty_region() {
        let parsed = table().parse(&[9, 0]).expect("parse").expect("value");
        assert_eq!(parsed.as_struct().expect("struct").get("items"), Some(&Value::from(Vec::<Value>::new())));
    }

    #[test]
    fn area_count_mismatch() {
        let codec = Codec::new(Area::new(0u64, 4u64, byte()).count(3u64).into());
        let err = codec.parse(&[1, 2, 3, 4]).unwrap_err();
        assert!(matches!(err, CodecError::Range { .. }), "{}", err);
    }

    #[test]
    fn area_build_checks_region_size() {
        let codec = Codec::new(Area::new(0u64, 2u64, byte()).into());
        let value = Value::from(vec![Value::U8(5), Value::U8(6)]);
        assert_eq!(codec.build(&value).expect("build"), vec![5, 6]);
        assert_eq!(codec.static_size().expect("size"), 0);
        let err = codec.build(&Value::from(vec![Value::U8(5)])).unwrap_err();
        assert!(matches!(err, CodecError::Stream { .. }), "{}", err);
        let short = Codec::new(Area::new(0u64, 2u64, byte()).allow_short().into());
        assert_eq!(short.build(&Value::from(vec![Value::U8(5)])).expect("build"), vec![5]);
    }

    #[test]
    fn pointer_offset_error_surfaces_in_layout() {
        let codec = Codec::new(
            Pointer::new(Expr::func(|_| Err(CodecError::check("offset table corrupt", "offset"))), byte()).into(),
        );
        let err = codec.preprocess(Value::U8(1)).unwrap_err();
        assert!(matches!(err, CodecError::Check { .. }), "{}", err);
    }

    #[test]
    fn pointer_negative_offset_lays_out_at_zero() {
        let codec = Codec::new(Pointer::new(-1i64, byte()).into());
        let (_, meta) = codec.preprocess(Value::U8(1)).expect("preprocess");
        assert_eq!(meta.size, 0);
        assert_eq!(meta.pointer_size, 1);
    }
}
