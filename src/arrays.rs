//! Repetition: fixed-count [`Array`], [`GreedyRange`], [`RepeatUntil`] and
//! the count-prefixed [`PrefixedArray`].
//!
//! Elements run in an index scope (`this._index`) that otherwise resolves
//! names exactly like the enclosing scope.

use crate::codec::{CodecError, Result};
use crate::context::Context;
use crate::expr::Expr;
use crate::node::{
    count_of, evaluate_count, evaluate_for_size, measure, proceed, scope_ref, size_add, size_mul, sized_scope,
    with_scope, Construct, Flow, Node,
};
use crate::stream::{stream_seek, stream_tell, ReadStream, WriteStream};
use crate::value::{ListContainer, MetaInformation, Value};
use std::fmt;
use std::io::SeekFrom;
use std::rc::Rc;

pub(crate) fn list_value(value: Value, kind: &str, path: &str) -> Result<ListContainer> {
    match value {
        Value::List(l) => Ok(l),
        Value::None => Ok(ListContainer::new()),
        other => Err(CodecError::format(
            format!("{} expects a list value, got {}", kind, other.type_name()),
            path,
        )),
    }
}

pub(crate) fn elements_size(subcon: &Node, value: &Value, ctx: &Context<'_>, path: &str, full: bool) -> Result<u64> {
    let items = value.as_list().ok_or_else(|| {
        CodecError::sizeof(format!("sizing repeated elements needs a list, got {}", value.type_name()), path)
    })?;
    let mut total = 0;
    for (i, item) in items.iter().enumerate() {
        let scope = ctx.indexed(i);
        let element = sized_scope(subcon, item, &scope, |s| {
            if full {
                subcon.full_size(item, s, path)
            } else {
                measure(subcon, item, s, path)
            }
        })?;
        total = size_add(total, element, path)?;
    }
    Ok(total)
}

pub(crate) fn preprocess_elements(subcon: &Node, items: ListContainer, ctx: &Context<'_>, path: &str) -> Result<Value> {
    let mut resolved = ListContainer::new();
    for (i, item) in items.into_vec().into_iter().enumerate() {
        let mut scope = ctx.indexed(i);
        resolved.push(with_scope(subcon, &mut scope, |s| subcon.preprocess(item, s, path))?);
    }
    Ok(Value::List(resolved))
}

pub(crate) fn preprocess_size_elements(
    subcon: &Node,
    items: ListContainer,
    ctx: &Context<'_>,
    path: &str,
    offset: u64,
) -> Result<(ListContainer, MetaInformation)> {
    let mut resolved = ListContainer::new();
    let mut position = offset;
    let mut pointer_size = 0;
    for (i, item) in items.into_vec().into_iter().enumerate() {
        let mut scope = ctx.indexed(i);
        let (v, meta) = with_scope(subcon, &mut scope, |s| subcon.preprocess_size(item, s, path, position))?;
        position += meta.size;
        pointer_size += meta.pointer_size;
        resolved.push(v);
        resolved.set_meta(i, meta);
    }
    let meta = MetaInformation::new(offset, position - offset).with_pointer_size(pointer_size);
    Ok((resolved, meta))
}

/// Build each element in order, collecting canonical values.
pub(crate) fn build_elements(
    subcon: &Node,
    items: &ListContainer,
    stream: &mut dyn WriteStream,
    ctx: &Context<'_>,
    path: &str,
) -> Result<Flow<ListContainer>> {
    let mut built = ListContainer::new();
    for (i, item) in items.iter().enumerate() {
        let mut scope = ctx.indexed(i);
        let item = scope.resolve(item.clone(), path)?;
        let v = proceed!(with_scope(subcon, &mut scope, |s| subcon.build(item, stream, s, path))?);
        built.push(v);
        if let Some(meta) = items.meta(i) {
            built.set_meta(i, meta);
        }
    }
    Ok(Flow::Continue(built))
}

/// Exactly `count` repetitions of one child.
#[derive(Debug, Clone)]
pub struct Array {
    count: Expr,
    subcon: Box<Node>,
    discard: bool,
}

impl Array {
    pub fn new(count: impl Into<Expr>, subcon: Node) -> Self {
        Array {
            count: count.into(),
            subcon: Box::new(subcon),
            discard: false,
        }
    }

    /// Parse elements without keeping them.
    pub fn discard(mut self) -> Self {
        self.discard = true;
        self
    }
}

impl Construct for Array {
    fn parse(&self, stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>> {
        let count = evaluate_count(&self.count, ctx, path)?;
        let mut items = ListContainer::new();
        for i in 0..count as usize {
            let mut scope = ctx.indexed(i);
            let v = proceed!(with_scope(&self.subcon, &mut scope, |s| self.subcon.parse(stream, s, path))?);
            if !self.discard {
                items.push(v);
            }
        }
        Ok(Flow::Continue(Value::List(items)))
    }

    fn build(
        &self,
        value: Value,
        stream: &mut dyn WriteStream,
        ctx: &mut Context<'_>,
        path: &str,
    ) -> Result<Flow<Value>> {
        let count = evaluate_count(&self.count, ctx, path)?;
        let items = list_value(value, "Array", path)?;
        if items.len() as u64 != count {
            return Err(CodecError::range(
                format!("expected {} elements, found {}", count, items.len()),
                path,
            ));
        }
        Ok(build_elements(&self.subcon, &items, stream, ctx, path)?.map(Value::List))
    }

    fn static_size(&self, ctx: &Context<'_>, path: &str) -> Result<u64> {
        let count = count_of(&evaluate_for_size(&self.count, ctx, path)?, path)
            .map_err(|e| CodecError::sizeof(e.to_string(), path))?;
        let element = scope_ref(&self.subcon, ctx, |s| self.subcon.static_size(s, path))?;
        size_mul(count, element, path)
    }

    fn size(&self, value: &Value, ctx: &Context<'_>, path: &str) -> Result<u64> {
        elements_size(&self.subcon, value, ctx, path, false)
    }

    fn full_size(&self, value: &Value, ctx: &Context<'_>, path: &str) -> Result<u64> {
        elements_size(&self.subcon, value, ctx, path, true)
    }

    fn preprocess(&self, value: Value, ctx: &mut Context<'_>, path: &str) -> Result<Value> {
        preprocess_elements(&self.subcon, list_value(value, "Array", path)?, ctx, path)
    }

    fn preprocess_size(
        &self,
        value: Value,
        ctx: &mut Context<'_>,
        path: &str,
        offset: u64,
    ) -> Result<(Value, MetaInformation)> {
        let items = list_value(value, "Array", path)?;
        let (items, meta) = preprocess_size_elements(&self.subcon, items, ctx, path, offset)?;
        Ok((Value::List(items), meta))
    }

    fn is_array(&self) -> bool {
        true
    }

    fn kind(&self) -> &'static str {
        "Array"
    }
}

/// Repeats until the child fails to parse or stops; never statically sized.
#[derive(Debug, Clone)]
pub struct GreedyRange {
    subcon: Box<Node>,
    discard: bool,
}

impl GreedyRange {
    pub fn new(subcon: Node) -> Self {
        GreedyRange {
            subcon: Box::new(subcon),
            discard: false,
        }
    }

    pub fn discard(mut self) -> Self {
        self.discard = true;
        self
    }
}

impl Construct for GreedyRange {
    fn parse(&self, stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>> {
        let mut items = ListContainer::new();
        for i in 0.. {
            let fallback = stream_tell(stream, path)?;
            let mut scope = ctx.indexed(i);
            match with_scope(&self.subcon, &mut scope, |s| self.subcon.parse(stream, s, path)) {
                Ok(Flow::Continue(v)) => {
                    if stream_tell(stream, path)? == fallback {
                        log::debug!("{}: element {} consumed no bytes, ending range", path, i);
                        break;
                    }
                    if !self.discard {
                        items.push(v);
                    }
                }
                Ok(Flow::Stop) => break,
                Ok(Flow::Cancel) => return Ok(Flow::Cancel),
                Err(e) if e.is_explicit() => return Err(e),
                Err(e) => {
                    log::trace!("{}: rolled back to {} after element {}: {}", path, fallback, i, e);
                    stream_seek(stream, SeekFrom::Start(fallback), path)?;
                    break;
                }
            }
        }
        Ok(Flow::Continue(Value::List(items)))
    }

    fn build(
        &self,
        value: Value,
        stream: &mut dyn WriteStream,
        ctx: &mut Context<'_>,
        path: &str,
    ) -> Result<Flow<Value>> {
        let items = list_value(value, "GreedyRange", path)?;
        let mut built = ListContainer::new();
        for (i, item) in items.iter().enumerate() {
            let mut scope = ctx.indexed(i);
            let item = scope.resolve(item.clone(), path)?;
            match with_scope(&self.subcon, &mut scope, |s| self.subcon.build(item, stream, s, path))? {
                Flow::Continue(v) => built.push(v),
                Flow::Stop => break,
                Flow::Cancel => return Ok(Flow::Cancel),
            }
        }
        Ok(Flow::Continue(Value::List(built)))
    }

    fn size(&self, value: &Value, ctx: &Context<'_>, path: &str) -> Result<u64> {
        elements_size(&self.subcon, value, ctx, path, false)
    }

    fn full_size(&self, value: &Value, ctx: &Context<'_>, path: &str) -> Result<u64> {
        elements_size(&self.subcon, value, ctx, path, true)
    }

    fn preprocess(&self, value: Value, ctx: &mut Context<'_>, path: &str) -> Result<Value> {
        preprocess_elements(&self.subcon, list_value(value, "GreedyRange", path)?, ctx, path)
    }

    fn preprocess_size(
        &self,
        value: Value,
        ctx: &mut Context<'_>,
        path: &str,
        offset: u64,
    ) -> Result<(Value, MetaInformation)> {
        let items = list_value(value, "GreedyRange", path)?;
        let (items, meta) = preprocess_size_elements(&self.subcon, items, ctx, path, offset)?;
        Ok((Value::List(items), meta))
    }

    fn is_array(&self) -> bool {
        true
    }

    fn kind(&self) -> &'static str {
        "GreedyRange"
    }
}

/// `predicate(element, elements so far, scope)`.
pub type RepeatPredicate = Rc<dyn Fn(&Value, &[Value], &Context<'_>) -> Result<bool>>;

/// Repeats until the predicate accepts the last element (which is kept).
#[derive(Clone)]
pub struct RepeatUntil {
    predicate: RepeatPredicate,
    subcon: Box<Node>,
    discard: bool,
    check_predicate: bool,
}

impl RepeatUntil {
    pub fn new<F>(predicate: F, subcon: Node) -> Self
    where
        F: Fn(&Value, &[Value], &Context<'_>) -> Result<bool> + 'static,
    {
        RepeatUntil {
            predicate: Rc::new(predicate),
            subcon: Box::new(subcon),
            discard: false,
            check_predicate: true,
        }
    }

    pub fn discard(mut self) -> Self {
        self.discard = true;
        self
    }

    /// When disabled, building writes every given element without testing the predicate.
    pub fn check_predicate(mut self, check: bool) -> Self {
        self.check_predicate = check;
        self
    }
}

impl fmt::Debug for RepeatUntil {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepeatUntil")
            .field("subcon", &self.subcon)
            .field("discard", &self.discard)
            .field("check_predicate", &self.check_predicate)
            .finish()
    }
}

impl Construct for RepeatUntil {
    fn parse(&self, stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>> {
        let mut items = ListContainer::new();
        for i in 0.. {
            let mut scope = ctx.indexed(i);
            let v = proceed!(with_scope(&self.subcon, &mut scope, |s| self.subcon.parse(stream, s, path))?);
            if !self.discard {
                items.push(v.clone());
            }
            if (self.predicate)(&v, &items, &scope)? {
                break;
            }
        }
        Ok(Flow::Continue(Value::List(items)))
    }

    fn build(
        &self,
        value: Value,
        stream: &mut dyn WriteStream,
        ctx: &mut Context<'_>,
        path: &str,
    ) -> Result<Flow<Value>> {
        let items = list_value(value, "RepeatUntil", path)?;
        let mut built = ListContainer::new();
        for (i, item) in items.iter().enumerate() {
            let mut scope = ctx.indexed(i);
            let item = scope.resolve(item.clone(), path)?;
            let v = proceed!(with_scope(&self.subcon, &mut scope, |s| self.subcon.build(item.clone(), stream, s, path))?);
            built.push(v);
            if self.check_predicate && (self.predicate)(&item, &items[..=i], &scope)? {
                return Ok(Flow::Continue(Value::List(built)));
            }
        }
        if self.check_predicate {
            return Err(CodecError::repeat("no element satisfied the predicate", path));
        }
        Ok(Flow::Continue(Value::List(built)))
    }

    fn size(&self, value: &Value, ctx: &Context<'_>, path: &str) -> Result<u64> {
        elements_size(&self.subcon, value, ctx, path, false)
    }

    fn full_size(&self, value: &Value, ctx: &Context<'_>, path: &str) -> Result<u64> {
        elements_size(&self.subcon, value, ctx, path, true)
    }

    fn preprocess(&self, value: Value, ctx: &mut Context<'_>, path: &str) -> Result<Value> {
        preprocess_elements(&self.subcon, list_value(value, "RepeatUntil", path)?, ctx, path)
    }

    fn preprocess_size(
        &self,
        value: Value,
        ctx: &mut Context<'_>,
        path: &str,
        offset: u64,
    ) -> Result<(Value, MetaInformation)> {
        let items = list_value(value, "RepeatUntil", path)?;
        let (items, meta) = preprocess_size_elements(&self.subcon, items, ctx, path, offset)?;
        Ok((Value::List(items), meta))
    }

    fn is_array(&self) -> bool {
        true
    }

    fn kind(&self) -> &'static str {
        "RepeatUntil"
    }
}

/// Element count stored in front of the elements.
#[derive(Debug, Clone)]
pub struct PrefixedArray {
    countfield: Box<Node>,
    subcon: Box<Node>,
}

impl PrefixedArray {
    pub fn new(countfield: Node, subcon: Node) -> Self {
        PrefixedArray {
            countfield: Box::new(countfield),
            subcon: Box::new(subcon),
        }
    }
}

impl Construct for PrefixedArray {
    fn parse(&self, stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>> {
        let count = proceed!(self.countfield.parse(stream, ctx, path)?);
        let count = count_of(&count, path)?;
        let mut items = ListContainer::new();
        for i in 0..count as usize {
            let mut scope = ctx.indexed(i);
            items.push(proceed!(with_scope(&self.subcon, &mut scope, |s| self.subcon.parse(stream, s, path))?));
        }
        Ok(Flow::Continue(Value::List(items)))
    }

    fn build(
        &self,
        value: Value,
        stream: &mut dyn WriteStream,
        ctx: &mut Context<'_>,
        path: &str,
    ) -> Result<Flow<Value>> {
        let items = list_value(value, "PrefixedArray", path)?;
        proceed!(self.countfield.build(Value::U64(items.len() as u64), stream, ctx, path)?);
        Ok(build_elements(&self.subcon, &items, stream, ctx, path)?.map(Value::List))
    }

    fn size(&self, value: &Value, ctx: &Context<'_>, path: &str) -> Result<u64> {
        let count = Value::U64(value.as_list().map(|l| l.len()).unwrap_or(0) as u64);
        let prefix = measure(self.countfield.as_ref(), &count, ctx, path)?;
        size_add(prefix, elements_size(&self.subcon, value, ctx, path, false)?, path)
    }

    fn full_size(&self, value: &Value, ctx: &Context<'_>, path: &str) -> Result<u64> {
        let count = Value::U64(value.as_list().map(|l| l.len()).unwrap_or(0) as u64);
        let prefix = measure(self.countfield.as_ref(), &count, ctx, path)?;
        size_add(prefix, elements_size(&self.subcon, value, ctx, path, true)?, path)
    }

    fn preprocess(&self, value: Value, ctx: &mut Context<'_>, path: &str) -> Result<Value> {
        preprocess_elements(&self.subcon, list_value(value, "PrefixedArray", path)?, ctx, path)
    }

    fn preprocess_size(
        &self,
        value: Value,
        ctx: &mut Context<'_>,
        path: &str,
        offset: u64,
    ) -> Result<(Value, MetaInformation)> {
        let items = list_value(value, "PrefixedArray", path)?;
        let count = Value::U64(items.len() as u64);
        let prefix = measure(self.countfield.as_ref(), &count, ctx, path)?;
        let (items, meta) = preprocess_size_elements(&self.subcon, items, ctx, path, offset + prefix)?;
        let meta = MetaInformation::new(offset, prefix + meta.size).with_pointer_size(meta.pointer_size);
        Ok((Value::List(items), meta))
    }

    fn expected_size(&self, stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<u64> {
        let start = stream_tell(stream, path)?;
        let count = match self.countfield.parse(stream, ctx, path)? {
            Flow::Continue(v) => count_of(&v, path)?,
            _ => return Err(CodecError::sizeof("count field did not produce a value", path)),
        };
        let prefix = stream_tell(stream, path)? - start;
        let element = scope_ref(&self.subcon, ctx, |s| self.subcon.static_size(s, path))?;
        size_add(prefix, size_mul(count, element, path)?, path)
    }

    fn is_array(&self) -> bool {
        true
    }

    fn kind(&self) -> &'static str {
        "PrefixedArray"
    }
}
