//! Sequential composites: [`Struct`] (named fields), [`Sequence`]
//! (positional) and [`FocusedSeq`] (positional, one value exposed).
//!
//! All three are structural: they own one scope, shared by their children,
//! in which every named child's value is stored as soon as it is known.

use crate::codec::{CodecError, Result};
use crate::context::Context;
use crate::node::{measure, proceed, scope_ref, size_add, sized_scope, with_scope, Construct, Flow, Node};
use crate::stream::{ReadStream, WriteStream};
use crate::value::{Container, ListContainer, MetaInformation, Value};

/// Value a child of a structure is built/sized from: its own entry, or `None`.
fn entry_for(sc: &Node, fields: Option<&Container>, ctx: &Context<'_>) -> Value {
    sc.names()
        .iter()
        .find_map(|n| fields.and_then(|f| f.get(n)).or_else(|| ctx.get_raw(n)))
        .cloned()
        .unwrap_or(Value::None)
}

fn struct_value(value: Value, kind: &str, path: &str) -> Result<Container> {
    match value {
        Value::Struct(c) => Ok(c),
        Value::None => Ok(Container::new()),
        other => Err(CodecError::format(
            format!("{} expects a struct value, got {}", kind, other.type_name()),
            path,
        )),
    }
}

fn list_value(value: Value, kind: &str, path: &str) -> Result<ListContainer> {
    match value {
        Value::List(l) => Ok(l),
        Value::None => Ok(ListContainer::new()),
        other => Err(CodecError::format(
            format!("{} expects a list value, got {}", kind, other.type_name()),
            path,
        )),
    }
}

/// Sum of children's sizes, stopping at the first child whose stop condition holds.
fn sum_sizes(
    subcons: &[Node],
    values: impl Fn(usize, &Node) -> Value,
    ctx: &Context<'_>,
    path: &str,
    full: bool,
) -> Result<u64> {
    let mut total = 0;
    for (i, sc) in subcons.iter().enumerate() {
        if sc.stops(ctx)? {
            break;
        }
        let value = values(i, sc);
        let size = sized_scope(sc, &value, ctx, |scope| {
            if full {
                sc.full_size(&value, scope, path)
            } else {
                measure(sc, &value, scope, path)
            }
        })?;
        total = size_add(total, size, path)?;
    }
    Ok(total)
}

/// Ordered named fields.
#[derive(Debug, Clone)]
pub struct Struct {
    subcons: Vec<Node>,
    flag_build_none: bool,
}

impl Struct {
    pub fn new(subcons: Vec<Node>) -> Self {
        let flag_build_none = subcons.iter().all(|sc| sc.flag_build_none());
        Struct {
            subcons,
            flag_build_none,
        }
    }

    pub fn subcons(&self) -> &[Node] {
        &self.subcons
    }

    /// Child registered under `name`.
    pub fn field(&self, name: &str) -> Option<&Node> {
        self.subcons.iter().find(|sc| sc.name() == Some(name))
    }
}

impl Construct for Struct {
    fn parse(&self, stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>> {
        for sc in &self.subcons {
            match with_scope(sc, ctx, |scope| sc.parse(stream, scope, path))? {
                Flow::Continue(value) => {
                    if let Some(name) = sc.name() {
                        ctx.insert(name, value);
                    }
                }
                Flow::Stop => {
                    log::trace!("{}: struct stopped early", path);
                    break;
                }
                Flow::Cancel => return Ok(Flow::Cancel),
            }
        }
        Ok(Flow::Continue(Value::Struct(ctx.entries().clone())))
    }

    fn build(
        &self,
        value: Value,
        stream: &mut dyn WriteStream,
        ctx: &mut Context<'_>,
        path: &str,
    ) -> Result<Flow<Value>> {
        ctx.fill(struct_value(value, "Struct", path)?);
        for sc in &self.subcons {
            let sub = match sc.name() {
                Some(name) => match ctx.get_raw(name).cloned() {
                    Some(v) => ctx.resolve(v, path)?,
                    None if sc.flag_build_none() => Value::None,
                    None => return Err(CodecError::missing_key(name, path)),
                },
                None => Value::None,
            };
            match with_scope(sc, ctx, |scope| sc.build(sub, stream, scope, path))? {
                Flow::Continue(built) => {
                    if let Some(name) = sc.name() {
                        ctx.insert(name, built);
                    }
                }
                Flow::Stop => break,
                Flow::Cancel => return Ok(Flow::Cancel),
            }
        }
        Ok(Flow::Continue(Value::Struct(ctx.entries().clone())))
    }

    fn static_size(&self, ctx: &Context<'_>, path: &str) -> Result<u64> {
        self.subcons
            .iter()
            .map(|sc| scope_ref(sc, ctx, |scope| sc.static_size(scope, path)))
            .sum()
    }

    fn size(&self, value: &Value, ctx: &Context<'_>, path: &str) -> Result<u64> {
        let fields = value.as_struct();
        sum_sizes(&self.subcons, |_, sc| entry_for(sc, fields, ctx), ctx, path, false)
    }

    fn full_size(&self, value: &Value, ctx: &Context<'_>, path: &str) -> Result<u64> {
        let fields = value.as_struct();
        sum_sizes(&self.subcons, |_, sc| entry_for(sc, fields, ctx), ctx, path, true)
    }

    fn preprocess(&self, value: Value, ctx: &mut Context<'_>, path: &str) -> Result<Value> {
        ctx.fill(struct_value(value, "Struct", path)?);
        for sc in &self.subcons {
            let sub = entry_for(sc, None, ctx);
            let resolved = with_scope(sc, ctx, |scope| sc.preprocess(sub, scope, path))?;
            if let Some(name) = sc.name() {
                ctx.insert(name, resolved);
            }
        }
        Ok(Value::Struct(ctx.entries().clone()))
    }

    fn preprocess_size(
        &self,
        value: Value,
        ctx: &mut Context<'_>,
        path: &str,
        offset: u64,
    ) -> Result<(Value, MetaInformation)> {
        ctx.fill(struct_value(value, "Struct", path)?);
        let mut position = offset;
        let mut pointer_size = 0;
        for sc in &self.subcons {
            if sc.stops(ctx)? {
                break;
            }
            let sub = entry_for(sc, None, ctx);
            let (resolved, meta) =
                with_scope(sc, ctx, |scope| sc.preprocess_size(sub, scope, path, position))?;
            position += meta.size;
            pointer_size += meta.pointer_size;
            if let Some(name) = sc.name() {
                ctx.insert(name, resolved);
                ctx.set_meta(name, meta);
            }
        }
        let meta = MetaInformation::new(offset, position - offset).with_pointer_size(pointer_size);
        Ok((Value::Struct(ctx.entries().clone()), meta))
    }

    fn flag_build_none(&self) -> bool {
        self.flag_build_none
    }

    fn is_struct(&self) -> bool {
        true
    }

    fn kind(&self) -> &'static str {
        "Struct"
    }
}

/// Positional fields; named ones are also stored in scope.
#[derive(Debug, Clone)]
pub struct Sequence {
    subcons: Vec<Node>,
    flag_build_none: bool,
}

impl Sequence {
    pub fn new(subcons: Vec<Node>) -> Self {
        let flag_build_none = subcons.iter().all(|sc| sc.flag_build_none());
        Sequence {
            subcons,
            flag_build_none,
        }
    }
}

impl Construct for Sequence {
    fn parse(&self, stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>> {
        let mut items = ListContainer::new();
        for sc in &self.subcons {
            match with_scope(sc, ctx, |scope| sc.parse(stream, scope, path))? {
                Flow::Continue(value) => {
                    if let Some(name) = sc.name() {
                        ctx.insert(name, value.clone());
                    }
                    items.push(value);
                }
                Flow::Stop => break,
                Flow::Cancel => return Ok(Flow::Cancel),
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
        let given = list_value(value, "Sequence", path)?;
        let mut built = ListContainer::new();
        for (i, sc) in self.subcons.iter().enumerate() {
            let sub = match given.get(i) {
                Some(v) => ctx.resolve(v.clone(), path)?,
                None if sc.flag_build_none() => Value::None,
                None => {
                    return Err(CodecError::range(
                        format!("expected {} elements, got {}", self.subcons.len(), given.len()),
                        path,
                    ))
                }
            };
            if let Some(name) = sc.name() {
                ctx.insert(name, sub.clone());
            }
            match with_scope(sc, ctx, |scope| sc.build(sub, stream, scope, path))? {
                Flow::Continue(v) => {
                    if let Some(name) = sc.name() {
                        ctx.insert(name, v.clone());
                    }
                    built.push(v);
                }
                Flow::Stop => break,
                Flow::Cancel => return Ok(Flow::Cancel),
            }
        }
        Ok(Flow::Continue(Value::List(built)))
    }

    fn static_size(&self, ctx: &Context<'_>, path: &str) -> Result<u64> {
        self.subcons
            .iter()
            .map(|sc| scope_ref(sc, ctx, |scope| sc.static_size(scope, path)))
            .sum()
    }

    fn size(&self, value: &Value, ctx: &Context<'_>, path: &str) -> Result<u64> {
        let items = value.as_list();
        let at = |i: usize, _: &Node| items.and_then(|l| l.get(i)).cloned().unwrap_or(Value::None);
        sum_sizes(&self.subcons, at, ctx, path, false)
    }

    fn full_size(&self, value: &Value, ctx: &Context<'_>, path: &str) -> Result<u64> {
        let items = value.as_list();
        let at = |i: usize, _: &Node| items.and_then(|l| l.get(i)).cloned().unwrap_or(Value::None);
        sum_sizes(&self.subcons, at, ctx, path, true)
    }

    fn preprocess(&self, value: Value, ctx: &mut Context<'_>, path: &str) -> Result<Value> {
        let given = list_value(value, "Sequence", path)?;
        let mut resolved = ListContainer::new();
        for (i, sc) in self.subcons.iter().enumerate() {
            let sub = given.get(i).cloned().unwrap_or(Value::None);
            if let Some(name) = sc.name() {
                ctx.insert(name, sub.clone());
            }
            let v = with_scope(sc, ctx, |scope| sc.preprocess(sub, scope, path))?;
            if let Some(name) = sc.name() {
                ctx.insert(name, v.clone());
            }
            resolved.push(v);
        }
        Ok(Value::List(resolved))
    }

    fn preprocess_size(
        &self,
        value: Value,
        ctx: &mut Context<'_>,
        path: &str,
        offset: u64,
    ) -> Result<(Value, MetaInformation)> {
        let given = list_value(value, "Sequence", path)?;
        let mut resolved = ListContainer::new();
        let mut position = offset;
        let mut pointer_size = 0;
        for (i, sc) in self.subcons.iter().enumerate() {
            if sc.stops(ctx)? {
                break;
            }
            let sub = given.get(i).cloned().unwrap_or(Value::None);
            let (v, meta) = with_scope(sc, ctx, |scope| sc.preprocess_size(sub, scope, path, position))?;
            position += meta.size;
            pointer_size += meta.pointer_size;
            if let Some(name) = sc.name() {
                ctx.insert(name, v.clone());
                ctx.set_meta(name, meta);
            }
            resolved.push(v);
            resolved.set_meta(i, meta);
        }
        let meta = MetaInformation::new(offset, position - offset).with_pointer_size(pointer_size);
        Ok((Value::List(resolved), meta))
    }

    fn flag_build_none(&self) -> bool {
        self.flag_build_none
    }

    fn is_struct(&self) -> bool {
        true
    }

    fn kind(&self) -> &'static str {
        "Sequence"
    }
}

/// Which child of a [`FocusedSeq`] carries the value.
#[derive(Debug, Clone, PartialEq)]
pub enum Focus {
    Index(usize),
    Name(String),
}

impl From<usize> for Focus {
    fn from(i: usize) -> Self {
        Focus::Index(i)
    }
}

impl From<&str> for Focus {
    fn from(name: &str) -> Self {
        Focus::Name(name.to_string())
    }
}

/// Parses all children but returns only the focused one's value; building
/// feeds the value to the focused child and builds the others from nothing.
#[derive(Debug, Clone)]
pub struct FocusedSeq {
    focus: Focus,
    subcons: Vec<Node>,
}

impl FocusedSeq {
    pub fn new(focus: impl Into<Focus>, subcons: Vec<Node>) -> Self {
        FocusedSeq {
            focus: focus.into(),
            subcons,
        }
    }

    fn focused(&self, i: usize, sc: &Node) -> bool {
        match &self.focus {
            Focus::Index(n) => *n == i,
            Focus::Name(name) => sc.name() == Some(name.as_str()),
        }
    }
}

impl Construct for FocusedSeq {
    fn parse(&self, stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>> {
        let mut focused = Value::None;
        for (i, sc) in self.subcons.iter().enumerate() {
            let value = proceed!(with_scope(sc, ctx, |scope| sc.parse(stream, scope, path))?);
            if let Some(name) = sc.name() {
                ctx.insert(name, value.clone());
            }
            if self.focused(i, sc) {
                focused = value;
            }
        }
        Ok(Flow::Continue(focused))
    }

    fn build(
        &self,
        value: Value,
        stream: &mut dyn WriteStream,
        ctx: &mut Context<'_>,
        path: &str,
    ) -> Result<Flow<Value>> {
        let mut focused = Value::None;
        for (i, sc) in self.subcons.iter().enumerate() {
            let sub = if self.focused(i, sc) { value.clone() } else { Value::None };
            if let Some(name) = sc.name() {
                ctx.insert(name, sub.clone());
            }
            let built = proceed!(with_scope(sc, ctx, |scope| sc.build(sub, stream, scope, path))?);
            if let Some(name) = sc.name() {
                ctx.insert(name, built.clone());
            }
            if self.focused(i, sc) {
                focused = built;
            }
        }
        Ok(Flow::Continue(focused))
    }

    fn static_size(&self, ctx: &Context<'_>, path: &str) -> Result<u64> {
        self.subcons
            .iter()
            .map(|sc| scope_ref(sc, ctx, |scope| sc.static_size(scope, path)))
            .sum()
    }

    fn size(&self, value: &Value, ctx: &Context<'_>, path: &str) -> Result<u64> {
        let at = |i: usize, sc: &Node| if self.focused(i, sc) { value.clone() } else { Value::None };
        sum_sizes(&self.subcons, at, ctx, path, false)
    }

    fn is_struct(&self) -> bool {
        true
    }

    fn kind(&self) -> &'static str {
        "FocusedSeq"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Codec;
    use crate::leaf::u8 as byte;

    #[test]
    fn sequence_exposes_named_elements_to_siblings() {
        let seq: Node = Sequence::new(vec![
            byte().named("n"),
            crate::leaf::Bytes::new(crate::expr::Expr::this("n")).into(),
        ])
        .into();
        let value = Codec::new(seq).parse(&[2, 0xaa, 0xbb]).expect("parse").expect("value");
        assert_eq!(value, Value::from(vec![Value::U8(2), Value::Bytes(vec![0xaa, 0xbb])]));
    }

    #[test]
    fn focused_seq_returns_focus_only() {
        let node: Node = FocusedSeq::new("x", vec![byte().named("pad"), byte().named("x")]).into();
        let codec = Codec::new(node);
        assert_eq!(codec.parse(&[9, 7]).expect("parse"), Some(Value::U8(7)));
    }
}
