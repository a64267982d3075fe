//! Top-level entry points and the crate error type.
//!
//! A [`Codec`] wraps a schema [`Node`] together with user parameters and
//! runs the four operations on it: parse, build, size and preprocess.

use crate::context::{Context, Mode, RunState, DEFAULT_MAX_EVAL_DEPTH};
use crate::node::{measure, sized_scope, with_scope, Construct, Flow, Node};
use crate::stream::{ReadStream, WriteStream};
use crate::value::{Container, MetaInformation, Value};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Cursor};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("Error in path {path}\nstream error: {message}")]
    Stream { message: String, path: String },
    #[error("Error in path {path}\nsizeof error: {message}")]
    Sizeof { message: String, path: String },
    #[error("Error in path {path}\nrange error: {message}")]
    Range { message: String, path: String },
    #[error("Error in path {path}\nrepeat error: {message}")]
    Repeat { message: String, path: String },
    #[error("Error in path {path}\nmapping error: {message}")]
    Mapping { message: String, path: String },
    #[error("Error in path {path}\nvalidation error: {message}")]
    Validation { message: String, path: String },
    #[error("Error in path {path}\nconst error: {message}")]
    Const { message: String, path: String },
    #[error("Error in path {path}\nunion error: {message}")]
    Union { message: String, path: String },
    #[error("Error in path {path}\nformat field error: {message}")]
    Format { message: String, path: String },
    #[error("Error in path {path}\npadding error: {message}")]
    Padding { message: String, path: String },
    #[error("Error in path {path}\ncheck error: {message}")]
    Check { message: String, path: String },
    #[error("Error in path {path}\nterminated error: {message}")]
    Terminated { message: String, path: String },
    #[error("Error in path {path}\nexplicit error: {message}")]
    Explicit { message: String, path: String },
    #[error("Error in path {path}\nexpression error: {message}")]
    Expression { message: String, path: String },
    #[error("Error in path {path}\nmissing context entry: {key}")]
    MissingKey { key: String, path: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

macro_rules! error_constructors {
    ($($fn_name:ident => $variant:ident),* $(,)?) => {
        $(pub fn $fn_name(message: impl Into<String>, path: &str) -> Self {
            CodecError::$variant {
                message: message.into(),
                path: path.to_string(),
            }
        })*
    };
}

impl CodecError {
    error_constructors! {
        stream => Stream,
        sizeof => Sizeof,
        range => Range,
        repeat => Repeat,
        mapping => Mapping,
        validation => Validation,
        constant => Const,
        union => Union,
        format => Format,
        padding => Padding,
        check => Check,
        terminated => Terminated,
        explicit => Explicit,
        expression => Expression,
    }

    pub fn missing_key(key: impl Into<String>, path: &str) -> Self {
        CodecError::MissingKey {
            key: key.into(),
            path: path.to_string(),
        }
    }

    pub fn is_sizeof(&self) -> bool {
        matches!(self, CodecError::Sizeof { .. })
    }

    /// Raised by an `Error` node; never swallowed by alternatives or greedy repeats.
    pub fn is_explicit(&self) -> bool {
        matches!(self, CodecError::Explicit { .. })
    }

    /// Breadcrumb of the node that failed, when known.
    pub fn path(&self) -> Option<&str> {
        match self {
            CodecError::Stream { path, .. }
            | CodecError::Sizeof { path, .. }
            | CodecError::Range { path, .. }
            | CodecError::Repeat { path, .. }
            | CodecError::Mapping { path, .. }
            | CodecError::Validation { path, .. }
            | CodecError::Const { path, .. }
            | CodecError::Union { path, .. }
            | CodecError::Format { path, .. }
            | CodecError::Padding { path, .. }
            | CodecError::Check { path, .. }
            | CodecError::Terminated { path, .. }
            | CodecError::Explicit { path, .. }
            | CodecError::Expression { path, .. }
            | CodecError::MissingKey { path, .. } => Some(path),
            CodecError::Io(_) | CodecError::Other(_) => None,
        }
    }
}

pub type Result<T, E = CodecError> = std::result::Result<T, E>;

/// Run-wide settings.
#[derive(Debug, Clone)]
pub struct CodecOptions {
    /// Entries visible as `_params` (and at the root) to every expression.
    pub params: Container,
    /// Run the preprocess passes before building so rebuilt fields see sizes.
    pub preprocess_before_build: bool,
    /// Nesting limit for resolving deferred values.
    pub max_eval_depth: usize,
}

impl Default for CodecOptions {
    fn default() -> Self {
        CodecOptions {
            params: Container::new(),
            preprocess_before_build: true,
            max_eval_depth: DEFAULT_MAX_EVAL_DEPTH,
        }
    }
}

/// A schema ready to parse and build.
#[derive(Debug, Clone)]
pub struct Codec {
    schema: Node,
    options: CodecOptions,
}

impl Codec {
    pub fn new(schema: Node) -> Self {
        Codec {
            schema,
            options: CodecOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CodecOptions) -> Self {
        self.options = options;
        self
    }

    /// Add a user parameter, visible to expressions as `_params.<key>`.
    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.options.params.insert(key, value);
        self
    }

    pub fn schema(&self) -> &Node {
        &self.schema
    }

    pub fn options(&self) -> &CodecOptions {
        &self.options
    }

    fn run(&self, mode: Mode) -> Context<'static> {
        Context::root(RunState::new(
            mode,
            self.options.params.clone(),
            self.options.max_eval_depth,
        ))
    }

    /// Parse a byte slice. `Ok(None)` means a hook cancelled the parse.
    pub fn parse(&self, data: &[u8]) -> Result<Option<Value>> {
        self.parse_stream(&mut Cursor::new(data))
    }

    pub fn parse_stream(&self, stream: &mut dyn ReadStream) -> Result<Option<Value>> {
        let mut ctx = self.run(Mode::Parsing);
        let path = "(parsing)";
        let flow = with_scope(&self.schema, &mut ctx, |s| self.schema.parse(stream, s, path))?;
        match flow {
            Flow::Continue(value) => Ok(Some(value)),
            Flow::Stop => Ok(Some(Value::None)),
            Flow::Cancel => {
                log::debug!("{}: cancelled by hook", path);
                Ok(None)
            }
        }
    }

    pub fn parse_file(&self, filename: impl AsRef<Path>) -> Result<Option<Value>> {
        let mut reader = BufReader::new(File::open(filename)?);
        self.parse_stream(&mut reader)
    }

    /// Build `value` into a new byte vector.
    pub fn build(&self, value: &Value) -> Result<Vec<u8>> {
        let mut stream = Cursor::new(Vec::new());
        self.build_stream(value, &mut stream)?;
        Ok(stream.into_inner())
    }

    pub fn build_stream(&self, value: &Value, stream: &mut dyn WriteStream) -> Result<()> {
        let value = if self.options.preprocess_before_build {
            self.preprocess(value.clone())?.0
        } else {
            value.clone()
        };
        let mut ctx = self.run(Mode::Building);
        let path = "(building)";
        if let Flow::Cancel = with_scope(&self.schema, &mut ctx, |s| self.schema.build(value, stream, s, path))? {
            log::debug!("{}: cancelled", path);
        }
        Ok(())
    }

    /// Build into `filename`; the file is opened read-write so nodes may read back what they wrote.
    pub fn build_file(&self, value: &Value, filename: impl AsRef<Path>) -> Result<()> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(filename)?;
        self.build_stream(value, &mut file)
    }

    /// Resolve rebuilt and computed fields, then assign offsets and sizes.
    ///
    /// The first pass replaces values that are recomputed at build time
    /// with deferred expressions; the second walks the tree from offset 0
    /// recording [`MetaInformation`] for each named field.
    pub fn preprocess(&self, value: Value) -> Result<(Value, MetaInformation)> {
        let value = self.preprocess_values(value)?;
        let mut ctx = self.run(Mode::PreprocessingSizing);
        let path = "(preprocess_size)";
        with_scope(&self.schema, &mut ctx, |s| self.schema.preprocess_size(value, s, path, 0))
    }

    /// First preprocess pass only.
    pub fn preprocess_values(&self, value: Value) -> Result<Value> {
        let mut ctx = self.run(Mode::Preprocessing);
        let path = "(preprocess)";
        with_scope(&self.schema, &mut ctx, |s| self.schema.preprocess(value, s, path))
    }

    /// Size from the schema alone.
    pub fn static_size(&self) -> Result<u64> {
        let ctx = self.run(Mode::Sizing);
        self.schema.static_size(&ctx, "(static_sizeof)")
    }

    /// Size of the encoding of `value`, excluding data placed by pointers.
    pub fn size(&self, value: &Value) -> Result<u64> {
        let ctx = self.run(Mode::Sizing);
        sized_scope(&self.schema, value, &ctx, |s| measure(&self.schema, value, s, "(sizeof)"))
    }

    /// Size of the encoding of `value` including pointed-to data.
    pub fn full_size(&self, value: &Value) -> Result<u64> {
        let ctx = self.run(Mode::Sizing);
        sized_scope(&self.schema, value, &ctx, |s| self.schema.full_size(value, s, "(full_sizeof)"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leaf::{u16_be, u8 as byte, Rebuild};
    use crate::structs::Struct;
    use crate::expr::Expr;

    #[test]
    fn error_display_carries_path() {
        let err = CodecError::padding("too long", "(building) -> body");
        assert_eq!(err.path(), Some("(building) -> body"));
        assert!(err.to_string().contains("padding error: too long"));
        assert!(!err.is_sizeof());
    }

    #[test]
    fn params_are_visible_to_expressions() {
        let schema = Struct::new(vec![
            byte().named("a"),
            Rebuild::new(byte(), Expr::parse("this._params.bias + this.a").expect("expr")).named("b"),
        ]);
        let codec = Codec::new(schema.into()).with_param("bias", 10u8);
        let value = Value::from(Container::new().with("a", 1u8));
        assert_eq!(codec.build(&value).expect("build"), vec![1, 11]);
    }

    #[test]
    fn build_without_preprocess() {
        let options = CodecOptions {
            preprocess_before_build: false,
            ..CodecOptions::default()
        };
        let codec = Codec::new(u16_be()).with_options(options);
        assert_eq!(codec.build(&Value::U16(0x0102)).expect("build"), vec![1, 2]);
        assert_eq!(codec.static_size().expect("size"), 2);
    }
}
