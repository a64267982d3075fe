//! Conditional dispatch: [`IfThenElse`], [`Switch`] and [`Union`].
//!
//! A branch that is structural gets its own nested scope; simple branches
//! share the caller's scope.

use crate::codec::{CodecError, Result};
use crate::context::Context;
use crate::expr::Expr;
use crate::leaf::Pass;
use crate::node::{measure, proceed, scope_ref, sized_scope, with_scope, Construct, Flow, Node};
use crate::stream::{stream_seek, stream_tell, ReadStream, WriteStream};
use crate::value::{Container, MetaInformation, Value};
use std::io::SeekFrom;

/// Run the one branch selected by `condition`.
#[derive(Debug, Clone)]
pub struct IfThenElse {
    condition: Expr,
    then_subcon: Box<Node>,
    else_subcon: Box<Node>,
}

impl IfThenElse {
    pub fn new(condition: impl Into<Expr>, then_subcon: Node, else_subcon: Node) -> Self {
        IfThenElse {
            condition: condition.into(),
            then_subcon: Box::new(then_subcon),
            else_subcon: Box::new(else_subcon),
        }
    }

    fn branch(&self, ctx: &Context<'_>, path: &str) -> Result<&Node> {
        let taken = ctx.evaluate(&self.condition, path)?.truthy();
        Ok(if taken { &self.then_subcon } else { &self.else_subcon })
    }
}

/// `IfThenElse` with a no-op else branch.
pub fn if_(condition: impl Into<Expr>, subcon: Node) -> Node {
    IfThenElse::new(condition, subcon, Pass.into()).into()
}

impl Construct for IfThenElse {
    fn parse(&self, stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>> {
        let branch = self.branch(ctx, path)?;
        with_scope(branch, ctx, |s| branch.parse(stream, s, path))
    }

    fn build(
        &self,
        value: Value,
        stream: &mut dyn WriteStream,
        ctx: &mut Context<'_>,
        path: &str,
    ) -> Result<Flow<Value>> {
        let branch = self.branch(ctx, path)?;
        with_scope(branch, ctx, |s| branch.build(value, stream, s, path))
    }

    fn static_size(&self, ctx: &Context<'_>, path: &str) -> Result<u64> {
        let branch = self
            .branch(ctx, path)
            .map_err(|e| CodecError::sizeof(format!("condition unavailable: {}", e), path))?;
        scope_ref(branch, ctx, |s| branch.static_size(s, path))
    }

    fn size(&self, value: &Value, ctx: &Context<'_>, path: &str) -> Result<u64> {
        let branch = self.branch(ctx, path)?;
        sized_scope(branch, value, ctx, |s| measure(branch, value, s, path))
    }

    fn full_size(&self, value: &Value, ctx: &Context<'_>, path: &str) -> Result<u64> {
        let branch = self.branch(ctx, path)?;
        sized_scope(branch, value, ctx, |s| branch.full_size(value, s, path))
    }

    fn preprocess(&self, value: Value, ctx: &mut Context<'_>, path: &str) -> Result<Value> {
        let branch = self.branch(ctx, path)?;
        with_scope(branch, ctx, |s| branch.preprocess(value, s, path))
    }

    fn preprocess_size(
        &self,
        value: Value,
        ctx: &mut Context<'_>,
        path: &str,
        offset: u64,
    ) -> Result<(Value, MetaInformation)> {
        let branch = self.branch(ctx, path)?;
        with_scope(branch, ctx, |s| branch.preprocess_size(value, s, path, offset))
    }

    fn flag_build_none(&self) -> bool {
        self.then_subcon.flag_build_none() && self.else_subcon.flag_build_none()
    }

    fn kind(&self) -> &'static str {
        "IfThenElse"
    }
}

/// Select a branch by key; unmatched keys use `default` (no-op unless set).
#[derive(Debug, Clone)]
pub struct Switch {
    keyfn: Expr,
    cases: Vec<(Value, Node)>,
    default: Box<Node>,
}

impl Switch {
    pub fn new(keyfn: impl Into<Expr>, cases: Vec<(Value, Node)>) -> Self {
        Switch {
            keyfn: keyfn.into(),
            cases,
            default: Box::new(Pass.into()),
        }
    }

    pub fn default(mut self, default: Node) -> Self {
        self.default = Box::new(default);
        self
    }

    fn branch(&self, ctx: &Context<'_>, path: &str) -> Result<&Node> {
        let key = ctx.evaluate(&self.keyfn, path)?;
        Ok(self
            .cases
            .iter()
            .find(|(k, _)| k.loose_eq(&key))
            .map(|(_, node)| node)
            .unwrap_or(&self.default))
    }
}

impl Construct for Switch {
    fn parse(&self, stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>> {
        let branch = self.branch(ctx, path)?;
        with_scope(branch, ctx, |s| branch.parse(stream, s, path))
    }

    fn build(
        &self,
        value: Value,
        stream: &mut dyn WriteStream,
        ctx: &mut Context<'_>,
        path: &str,
    ) -> Result<Flow<Value>> {
        let branch = self.branch(ctx, path)?;
        with_scope(branch, ctx, |s| branch.build(value, stream, s, path))
    }

    fn static_size(&self, _ctx: &Context<'_>, path: &str) -> Result<u64> {
        Err(CodecError::sizeof("Switch cannot be sized statically", path))
    }

    fn size(&self, value: &Value, ctx: &Context<'_>, path: &str) -> Result<u64> {
        let branch = self.branch(ctx, path)?;
        sized_scope(branch, value, ctx, |s| measure(branch, value, s, path))
    }

    fn full_size(&self, value: &Value, ctx: &Context<'_>, path: &str) -> Result<u64> {
        let branch = self.branch(ctx, path)?;
        sized_scope(branch, value, ctx, |s| branch.full_size(value, s, path))
    }

    fn preprocess(&self, value: Value, ctx: &mut Context<'_>, path: &str) -> Result<Value> {
        let branch = self.branch(ctx, path)?;
        with_scope(branch, ctx, |s| branch.preprocess(value, s, path))
    }

    fn preprocess_size(
        &self,
        value: Value,
        ctx: &mut Context<'_>,
        path: &str,
        offset: u64,
    ) -> Result<(Value, MetaInformation)> {
        let branch = self.branch(ctx, path)?;
        with_scope(branch, ctx, |s| branch.preprocess_size(value, s, path, offset))
    }

    fn names(&self) -> Vec<String> {
        self.cases
            .iter()
            .flat_map(|(_, node)| node.names())
            .chain(self.default.names())
            .collect()
    }

    fn kind(&self) -> &'static str {
        "Switch"
    }
}

/// Which parsed alternative of a [`Union`] decides the final stream position.
#[derive(Debug, Clone)]
pub enum UnionSelector {
    /// Stay at the starting offset.
    None,
    Index(usize),
    Name(String),
    /// Evaluates to an index or a name.
    Expr(Expr),
}

impl From<usize> for UnionSelector {
    fn from(i: usize) -> Self {
        UnionSelector::Index(i)
    }
}

impl From<&str> for UnionSelector {
    fn from(name: &str) -> Self {
        UnionSelector::Name(name.to_string())
    }
}

impl From<Expr> for UnionSelector {
    fn from(expr: Expr) -> Self {
        UnionSelector::Expr(expr)
    }
}

/// Parses every alternative from the same offset.
#[derive(Debug, Clone)]
pub struct Union {
    parsefrom: UnionSelector,
    subcons: Vec<Node>,
}

impl Union {
    pub fn new(parsefrom: impl Into<UnionSelector>, subcons: Vec<Node>) -> Self {
        Union {
            parsefrom: parsefrom.into(),
            subcons,
        }
    }

    fn parse_all(
        &self,
        stream: &mut dyn ReadStream,
        ctx: &mut Context<'_>,
        path: &str,
        fallback: u64,
    ) -> Result<Flow<Vec<u64>>> {
        let mut forwards = Vec::with_capacity(self.subcons.len());
        for sc in &self.subcons {
            stream_seek(stream, SeekFrom::Start(fallback), path)?;
            let value = proceed!(with_scope(sc, ctx, |s| sc.parse(stream, s, path))?);
            forwards.push(stream_tell(stream, path)?);
            if let Some(name) = sc.name() {
                ctx.insert(name, value);
            }
        }
        Ok(Flow::Continue(forwards))
    }

    fn selected(&self, ctx: &Context<'_>, path: &str) -> Result<Option<usize>> {
        let by_name = |name: &str| {
            self.subcons
                .iter()
                .position(|sc| sc.name() == Some(name))
                .map(Some)
                .ok_or_else(|| CodecError::union(format!("no alternative named {}", name), path))
        };
        let by_index = |i: usize| {
            if i < self.subcons.len() {
                Ok(Some(i))
            } else {
                Err(CodecError::union(format!("no alternative at index {}", i), path))
            }
        };
        match &self.parsefrom {
            UnionSelector::None => Ok(None),
            UnionSelector::Index(i) => by_index(*i),
            UnionSelector::Name(name) => by_name(name),
            UnionSelector::Expr(expr) => match ctx.evaluate(expr, path)? {
                Value::None => Ok(None),
                Value::Str(name) => by_name(&name),
                other => match other.as_u64() {
                    Some(i) => by_index(i as usize),
                    None => Err(CodecError::union(
                        format!("selector evaluated to {}", other.type_name()),
                        path,
                    )),
                },
            },
        }
    }
}

impl Construct for Union {
    fn parse(&self, stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>> {
        let fallback = stream_tell(stream, path)?;
        let forwards = match self.parse_all(stream, ctx, path, fallback) {
            Ok(Flow::Continue(forwards)) => forwards,
            other => {
                stream_seek(stream, SeekFrom::Start(fallback), path)?;
                return other.map(|flow| flow.map(|_| Value::None));
            }
        };
        let target = match self.selected(ctx, path) {
            Ok(Some(i)) => forwards[i],
            Ok(None) => fallback,
            Err(e) => {
                stream_seek(stream, SeekFrom::Start(fallback), path)?;
                return Err(e);
            }
        };
        log::trace!("{}: union committed at offset {}", path, target);
        stream_seek(stream, SeekFrom::Start(target), path)?;
        Ok(Flow::Continue(Value::Struct(ctx.entries().clone())))
    }

    fn build(
        &self,
        value: Value,
        stream: &mut dyn WriteStream,
        ctx: &mut Context<'_>,
        path: &str,
    ) -> Result<Flow<Value>> {
        let given = match value {
            Value::Struct(c) => c,
            Value::None => Container::new(),
            other => {
                return Err(CodecError::format(
                    format!("Union expects a struct value, got {}", other.type_name()),
                    path,
                ))
            }
        };
        ctx.fill(given.clone());
        for sc in &self.subcons {
            let Some(name) = sc.name() else { continue };
            let Some(sub) = given.get(name).cloned() else { continue };
            let sub = ctx.resolve(sub, path)?;
            let built = proceed!(with_scope(sc, ctx, |s| sc.build(sub, stream, s, path))?);
            ctx.insert(name, built);
            return Ok(Flow::Continue(Value::Struct(ctx.entries().clone())));
        }
        let keys: Vec<&str> = given.keys().collect();
        Err(CodecError::union(
            format!("cannot build Union from keys {:?}", keys),
            path,
        ))
    }

    fn static_size(&self, _ctx: &Context<'_>, path: &str) -> Result<u64> {
        Err(CodecError::sizeof("Union cannot be sized", path))
    }

    /// Size of the alternative `build` would write.
    fn size(&self, value: &Value, ctx: &Context<'_>, path: &str) -> Result<u64> {
        let given = value.as_struct();
        for sc in &self.subcons {
            let Some(sub) = sc.name().and_then(|n| given.and_then(|g| g.get(n))) else {
                continue;
            };
            return sized_scope(sc, sub, ctx, |s| measure(sc, sub, s, path));
        }
        Err(CodecError::sizeof("Union value selects no alternative", path))
    }

    fn is_struct(&self) -> bool {
        true
    }

    fn kind(&self) -> &'static str {
        "Union"
    }
}
