//! Scoped name → value store active during one parse/build/size traversal.
//!
//! Every structural node works inside a [`Context`]: an owned [`Container`]
//! plus a borrowed link to the enclosing scope. Children never outlive their
//! parent. Mode flags and caller parameters live once in a shared
//! [`RunState`] and are exposed through reserved keys:
//!
//! | key | meaning |
//! |-----|---------|
//! | `_` | parent scope |
//! | `_root` | scope of the top-level node |
//! | `_index` | current repetition index |
//! | `_params` | caller parameters |
//! | `_parsing`, `_building`, `_sizing`, `_preprocessing` | mode flags |
//!
//! Lookups of entries missing from the top-level scope fall back to the
//! parameters.

use crate::ast::Segment;
use crate::codec::{CodecError, Result};
use crate::expr::Expr;
use crate::value::{Container, MetaInformation, Value};
use std::cell::Cell;
use std::rc::Rc;

/// Nesting limit for deferred-value resolution unless configured otherwise.
pub const DEFAULT_MAX_EVAL_DEPTH: usize = 64;

/// Which top-level operation is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Parsing,
    Building,
    Sizing,
    Preprocessing,
    PreprocessingSizing,
}

/// Per-invocation state shared by every scope of one traversal.
#[derive(Debug)]
pub struct RunState {
    mode: Mode,
    params: Container,
    eval_depth: Cell<usize>,
    max_eval_depth: usize,
}

impl RunState {
    pub fn new(mode: Mode, params: Container, max_eval_depth: usize) -> Rc<Self> {
        Rc::new(RunState {
            mode,
            params,
            eval_depth: Cell::new(0),
            max_eval_depth,
        })
    }
}

#[derive(Debug)]
pub struct Context<'a> {
    entries: Container,
    index: Option<usize>,
    /// Index-only scope: lookups fall through to the parent.
    overlay: bool,
    parent: Option<&'a Context<'a>>,
    root: Option<&'a Context<'a>>,
    run: Rc<RunState>,
}

impl Context<'static> {
    pub fn root(run: Rc<RunState>) -> Self {
        Context {
            entries: Container::new(),
            index: None,
            overlay: false,
            parent: None,
            root: None,
            run,
        }
    }
}

impl<'a> Context<'a> {
    /// New nested scope; inherits the repetition index.
    pub fn child(&self) -> Context<'_> {
        Context {
            entries: Container::new(),
            index: self.index,
            overlay: false,
            parent: Some(self),
            root: self.parent.map(|_| self.root_scope()),
            run: self.run.clone(),
        }
    }

    /// Same scope as `self` as far as lookups go, with `_index` set.
    pub fn indexed(&self, index: usize) -> Context<'_> {
        let mut scope = self.child();
        scope.overlay = true;
        scope.index = Some(index);
        scope
    }

    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub fn mode(&self) -> Mode {
        self.run.mode
    }

    pub fn params(&self) -> &Container {
        &self.run.params
    }

    pub fn parent_scope(&self) -> Option<&Context<'_>> {
        let parent = self.parent?;
        if self.overlay {
            parent.parent_scope()
        } else {
            Some(parent)
        }
    }

    /// Outermost scope below the run root, i.e. the top-level node's entries.
    pub fn root_scope(&self) -> &Context<'_> {
        match self.root {
            Some(root) => root,
            None => self,
        }
    }

    /// Entries owned by this scope.
    pub fn entries(&self) -> &Container {
        &self.entries
    }

    /// Entry without resolving deferred values.
    pub fn get_raw(&self, key: &str) -> Option<&Value> {
        if let Some(v) = self.entries.get(key) {
            return Some(v);
        }
        match self.parent {
            Some(parent) if self.overlay || self.root.is_none() => parent.get_raw(key),
            Some(_) => None,
            None => self.run.params.get(key),
        }
    }

    /// Entry with deferred values evaluated in this scope.
    pub fn get(&self, key: &str, path: &str) -> Result<Option<Value>> {
        match self.get_raw(key).cloned() {
            Some(v) => self.resolve(v, path).map(Some),
            None => Ok(None),
        }
    }

    pub fn meta(&self, key: &str) -> Option<MetaInformation> {
        match self.entries.meta(key) {
            Some(meta) => Some(meta),
            None if self.overlay => self.parent.and_then(|p| p.meta(key)),
            None => None,
        }
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.entries.insert(key, value);
    }

    pub fn set_meta(&mut self, key: &str, meta: MetaInformation) {
        self.entries.set_meta(key, meta);
    }

    /// Merge a structure's entries into this scope.
    pub fn fill(&mut self, entries: Container) {
        self.entries.update(entries);
    }

    pub fn evaluate(&self, expr: &Expr, path: &str) -> Result<Value> {
        expr.evaluate(self, path)
    }

    /// Evaluate a deferred value, guarding against runaway chains.
    pub fn resolve(&self, value: Value, path: &str) -> Result<Value> {
        let Value::Deferred(expr) = value else {
            return Ok(value);
        };
        let depth = self.run.eval_depth.get();
        if depth >= self.run.max_eval_depth {
            return Err(CodecError::expression(
                format!("deferred values nested deeper than {}", self.run.max_eval_depth),
                path,
            ));
        }
        self.run.eval_depth.set(depth + 1);
        let result = expr
            .evaluate(self, path)
            .and_then(|v| self.resolve(v, path));
        self.run.eval_depth.set(depth);
        result
    }

    /// Resolve `this.a.b[2]`-style paths from this scope.
    pub fn lookup_path(&self, segments: &[Segment], path: &str) -> Result<Value> {
        let Some((first, rest)) = segments.split_first() else {
            return Ok(Value::Struct(self.visible_entries()));
        };
        let key = match first {
            Segment::Key(key) => key.as_str(),
            Segment::Index(i) => {
                return Err(CodecError::expression(format!("scope is not indexable: [{}]", i), path))
            }
        };
        match key {
            "_" => {
                let parent = self
                    .parent_scope()
                    .ok_or_else(|| CodecError::missing_key("_", path))?;
                parent.lookup_path(rest, path)
            }
            "_root" => self.root_scope().lookup_path(rest, path),
            "_params" => self.descend(Value::Struct(self.run.params.clone()), rest, path),
            "_index" => {
                let index = self
                    .index
                    .ok_or_else(|| CodecError::missing_key("_index", path))?;
                self.descend(Value::U64(index as u64), rest, path)
            }
            "_parsing" => Ok(Value::Bool(self.mode() == Mode::Parsing)),
            "_building" => Ok(Value::Bool(self.mode() == Mode::Building)),
            "_sizing" => Ok(Value::Bool(self.mode() == Mode::Sizing)),
            "_preprocessing" => Ok(Value::Bool(matches!(
                self.mode(),
                Mode::Preprocessing | Mode::PreprocessingSizing
            ))),
            _ => {
                let value = self
                    .get_raw(key)
                    .cloned()
                    .ok_or_else(|| CodecError::missing_key(key, path))?;
                let value = self.resolve(value, path)?;
                self.descend(value, rest, path)
            }
        }
    }

    fn descend(&self, value: Value, segments: &[Segment], path: &str) -> Result<Value> {
        let Some((first, rest)) = segments.split_first() else {
            return Ok(value);
        };
        match (value, first) {
            (Value::Struct(c), Segment::Key(_)) => {
                let mut scope = self.child();
                scope.fill(c);
                scope.lookup_path(segments, path)
            }
            (Value::List(l), Segment::Index(i)) => {
                let item = l.get(*i).cloned().ok_or_else(|| {
                    CodecError::expression(format!("index {} out of range (len {})", i, l.len()), path)
                })?;
                let item = self.resolve(item, path)?;
                self.descend(item, rest, path)
            }
            (Value::Lazy(lazy), _) => {
                let v = lazy.force()?;
                self.descend(v, segments, path)
            }
            (other, segment) => Err(CodecError::expression(
                format!("cannot access {} on {}", segment, other.type_name()),
                path,
            )),
        }
    }

    /// Metadata recorded for the entry a path designates.
    pub fn meta_path(&self, segments: &[Segment], path: &str) -> Result<Option<MetaInformation>> {
        match segments {
            [] => Ok(None),
            [Segment::Key(key)] if !key.starts_with('_') => Ok(self.meta(key)),
            [Segment::Key(key), rest @ ..] if key == "_" => {
                let parent = self
                    .parent_scope()
                    .ok_or_else(|| CodecError::missing_key("_", path))?;
                parent.meta_path(rest, path)
            }
            [Segment::Key(key), rest @ ..] if key == "_root" => self.root_scope().meta_path(rest, path),
            [Segment::Key(key), rest @ ..] => {
                let value = self
                    .get_raw(key)
                    .cloned()
                    .ok_or_else(|| CodecError::missing_key(key, path))?;
                match (value, rest) {
                    (Value::List(l), [Segment::Index(i)]) => Ok(l.meta(*i)),
                    (Value::Struct(c), _) => {
                        let mut scope = self.child();
                        scope.fill(c);
                        scope.meta_path(rest, path)
                    }
                    (other, _) => Err(CodecError::expression(
                        format!("no layout information inside {}", other.type_name()),
                        path,
                    )),
                }
            }
            [Segment::Index(i), ..] => {
                Err(CodecError::expression(format!("scope is not indexable: [{}]", i), path))
            }
        }
    }

    fn visible_entries(&self) -> Container {
        match self.parent {
            Some(parent) if self.overlay => parent.visible_entries(),
            _ => self.entries.clone(),
        }
    }

    /// Capture the scope chain so it can be re-entered later.
    pub fn snapshot(&self) -> ScopeSnapshot {
        let mut levels = Vec::new();
        let mut current: Option<&Context<'_>> = Some(self);
        while let Some(scope) = current {
            levels.push(Level {
                entries: scope.entries.clone(),
                index: scope.index,
                overlay: scope.overlay,
            });
            current = scope.parent;
        }
        levels.reverse();
        ScopeSnapshot {
            levels,
            run: self.run.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct Level {
    entries: Container,
    index: Option<usize>,
    overlay: bool,
}

/// Owned copy of a scope chain, used by lazily parsed values.
#[derive(Debug, Clone)]
pub struct ScopeSnapshot {
    levels: Vec<Level>,
    run: Rc<RunState>,
}

impl ScopeSnapshot {
    /// Rebuild the chain and run `f` in (a copy of) the innermost scope.
    pub fn enter<R>(&self, f: &mut dyn FnMut(&mut Context<'_>) -> R) -> R {
        enter_levels(&self.levels, None, &self.run, f)
    }
}

fn enter_levels<R>(
    levels: &[Level],
    parent: Option<&Context<'_>>,
    run: &Rc<RunState>,
    f: &mut dyn FnMut(&mut Context<'_>) -> R,
) -> R {
    let mut scope = match parent {
        Some(p) => p.child(),
        None => Context::root(run.clone()),
    };
    match levels.split_first() {
        Some((level, rest)) => {
            scope.entries = level.entries.clone();
            scope.index = level.index;
            scope.overlay = level.overlay;
            if rest.is_empty() {
                f(&mut scope)
            } else {
                enter_levels(rest, Some(&scope), run, f)
            }
        }
        None => f(&mut scope),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run() -> Rc<RunState> {
        RunState::new(Mode::Parsing, Container::new().with("key", 9u8), 16)
    }

    #[test]
    fn parent_and_root_lookups() {
        let root = Context::root(run());
        let mut top = root.child();
        top.insert("a", 1u8);
        let mut child = top.child();
        child.insert("b", 2u8);
        let grandchild = child.child();
        let up = Expr::parse("this._._.a + this._.b").expect("parse");
        assert_eq!(up.evaluate(&grandchild, "(test)").expect("eval"), Value::I64(3));
        let root_ref = Expr::parse("this._root.a").expect("parse");
        assert_eq!(root_ref.evaluate(&grandchild, "(test)").expect("eval"), Value::U8(1));
    }

    #[test]
    fn params_visible_from_root_and_reserved_key() {
        let root = Context::root(run());
        assert_eq!(root.get_raw("key"), Some(&Value::U8(9)));
        let child = root.child();
        let expr = Expr::parse("this._params.key").expect("parse");
        assert_eq!(expr.evaluate(&child, "(test)").expect("eval"), Value::U8(9));
    }

    #[test]
    fn indexed_scope_falls_through() {
        let mut root = Context::root(run());
        root.insert("n", 4u8);
        let scope = root.indexed(2);
        let expr = Expr::parse("this.n * this._index").expect("parse");
        assert_eq!(expr.evaluate(&scope, "(test)").expect("eval"), Value::I64(8));
    }

    #[test]
    fn deferred_entries_resolve_on_lookup() {
        let mut root = Context::root(run());
        root.insert("items", vec![Value::U8(1), Value::U8(2)]);
        root.insert("count", Value::Deferred(Expr::parse("len(this.items)").expect("parse")));
        let expr = Expr::this("count");
        assert_eq!(expr.evaluate(&root, "(test)").expect("eval"), Value::U64(2));
    }

    #[test]
    fn missing_key_is_reported() {
        let root = Context::root(run());
        let err = Expr::this("nope").evaluate(&root, "(test)").unwrap_err();
        assert!(matches!(err, CodecError::MissingKey { .. }));
    }
}
