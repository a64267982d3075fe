//! Byte-level transformations between the outer stream and a child:
//! [`Transformed`] for fixed amounts, [`Restreamed`] for unit-by-unit
//! conversion, and the [`bitwise`]/[`bytewise`]/[`byte_swapped`]/[`bits_swapped`]
//! wrappers that pick one of the two.

use crate::codec::{CodecError, Result};
use crate::context::{Context, Mode, RunState, DEFAULT_MAX_EVAL_DEPTH};
use crate::node::{measure, proceed, scope_ref, sized_scope, with_scope, Construct, Flow, Node};
use crate::stream::{
    bits_to_bytes, bytes_to_bits, stream_read, stream_read_entire, stream_write, swap_bits_in_bytes,
    swap_bytes, ByteFn, ReadStream, RestreamedStream, WriteStream,
};
use crate::value::{Container, Value};
use std::fmt;
use std::io::Cursor;
use std::rc::Rc;

/// Reads `decode_amount` bytes (or the rest of the stream), decodes them and
/// parses the child from the result. Building encodes the child's output.
#[derive(Clone)]
pub struct Transformed {
    subcon: Box<Node>,
    decode: ByteFn,
    decode_amount: Option<u64>,
    encode: ByteFn,
    encode_amount: Option<u64>,
}

impl Transformed {
    pub fn new<D, E>(
        subcon: Node,
        decode: D,
        decode_amount: Option<u64>,
        encode: E,
        encode_amount: Option<u64>,
    ) -> Self
    where
        D: Fn(&[u8]) -> Result<Vec<u8>> + 'static,
        E: Fn(&[u8]) -> Result<Vec<u8>> + 'static,
    {
        Transformed {
            subcon: Box::new(subcon),
            decode: Rc::new(decode),
            decode_amount,
            encode: Rc::new(encode),
            encode_amount,
        }
    }
}

impl fmt::Debug for Transformed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transformed")
            .field("subcon", &self.subcon)
            .field("decode_amount", &self.decode_amount)
            .field("encode_amount", &self.encode_amount)
            .finish()
    }
}

impl Construct for Transformed {
    fn parse(&self, stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>> {
        let raw = match self.decode_amount {
            Some(amount) => stream_read(stream, amount, path)?,
            None => stream_read_entire(stream, path)?,
        };
        let mut substream = Cursor::new((self.decode)(&raw)?);
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
        let data = (self.encode)(substream.get_ref())?;
        if let Some(amount) = self.encode_amount {
            if data.len() as u64 != amount {
                return Err(CodecError::stream(
                    format!(
                        "encoding transformation produced wrong amount of bytes, {} instead of expected {}",
                        data.len(),
                        amount
                    ),
                    path,
                ));
            }
        }
        stream_write(stream, &data, path)?;
        Ok(Flow::Continue(built))
    }

    fn static_size(&self, _ctx: &Context<'_>, path: &str) -> Result<u64> {
        match (self.decode_amount, self.encode_amount) {
            (Some(d), Some(e)) if d == e => Ok(e),
            _ => Err(CodecError::sizeof("transformation amounts differ or are unbounded", path)),
        }
    }

    fn preprocess(&self, value: Value, ctx: &mut Context<'_>, path: &str) -> Result<Value> {
        with_scope(&self.subcon, ctx, |s| self.subcon.preprocess(value, s, path))
    }

    fn kind(&self) -> &'static str {
        "Transformed"
    }
}

/// Converts the stream unit by unit while the child reads or writes it.
#[derive(Clone)]
pub struct Restreamed {
    subcon: Box<Node>,
    decoder: ByteFn,
    decoder_unit: usize,
    encoder: ByteFn,
    encoder_unit: usize,
    size_computer: Option<Rc<dyn Fn(u64) -> u64>>,
}

impl Restreamed {
    pub fn new<D, E>(subcon: Node, decoder: D, decoder_unit: usize, encoder: E, encoder_unit: usize) -> Self
    where
        D: Fn(&[u8]) -> Result<Vec<u8>> + 'static,
        E: Fn(&[u8]) -> Result<Vec<u8>> + 'static,
    {
        Restreamed {
            subcon: Box::new(subcon),
            decoder: Rc::new(decoder),
            decoder_unit,
            encoder: Rc::new(encoder),
            encoder_unit,
            size_computer: None,
        }
    }

    /// Outer size as a function of the child's size.
    pub fn size_computer(mut self, f: impl Fn(u64) -> u64 + 'static) -> Self {
        self.size_computer = Some(Rc::new(f));
        self
    }

    fn outer_size(&self, inner: impl FnOnce() -> Result<u64>, path: &str) -> Result<u64> {
        match &self.size_computer {
            Some(f) => inner().map(|n| f(n)),
            None => Err(CodecError::sizeof(
                "Restreamed cannot calculate size without a size computer",
                path,
            )),
        }
    }
}

impl fmt::Debug for Restreamed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Restreamed")
            .field("subcon", &self.subcon)
            .field("decoder_unit", &self.decoder_unit)
            .field("encoder_unit", &self.encoder_unit)
            .finish()
    }
}

impl Construct for Restreamed {
    fn parse(&self, stream: &mut dyn ReadStream, ctx: &mut Context<'_>, path: &str) -> Result<Flow<Value>> {
        let mut substream = RestreamedStream::new(
            stream,
            self.decoder.clone(),
            self.decoder_unit,
            self.encoder.clone(),
            self.encoder_unit,
        );
        let result = with_scope(&self.subcon, ctx, |s| self.subcon.parse(&mut substream, s, path))?;
        substream.close(path)?;
        Ok(result)
    }

    fn build(
        &self,
        value: Value,
        stream: &mut dyn WriteStream,
        ctx: &mut Context<'_>,
        path: &str,
    ) -> Result<Flow<Value>> {
        let mut substream = RestreamedStream::new(
            stream,
            self.decoder.clone(),
            self.decoder_unit,
            self.encoder.clone(),
            self.encoder_unit,
        );
        let result = with_scope(&self.subcon, ctx, |s| self.subcon.build(value, &mut substream, s, path))?;
        substream.close(path)?;
        Ok(result)
    }

    fn static_size(&self, ctx: &Context<'_>, path: &str) -> Result<u64> {
        self.outer_size(|| scope_ref(&self.subcon, ctx, |s| self.subcon.static_size(s, path)), path)
    }

    fn size(&self, value: &Value, ctx: &Context<'_>, path: &str) -> Result<u64> {
        self.outer_size(
            || sized_scope(&self.subcon, value, ctx, |s| measure(self.subcon.as_ref(), value, s, path)),
            path,
        )
    }

    fn preprocess(&self, value: Value, ctx: &mut Context<'_>, path: &str) -> Result<Value> {
        with_scope(&self.subcon, ctx, |s| self.subcon.preprocess(value, s, path))
    }

    fn kind(&self) -> &'static str {
        "Restreamed"
    }
}

/// Static size of `node` outside of any enclosing structure, if it has one.
fn detached_size(node: &Node) -> Option<u64> {
    let ctx = Context::root(RunState::new(Mode::Sizing, Container::new(), DEFAULT_MAX_EVAL_DEPTH));
    scope_ref(node, &ctx, |s| node.static_size(s, "(sizing)")).ok()
}

fn lift(f: fn(&[u8]) -> Vec<u8>) -> impl Fn(&[u8]) -> Result<Vec<u8>> + 'static {
    move |data: &[u8]| Ok(f(data))
}

/// Exposes every byte as eight bytes holding one bit each, MSB first.
/// The child's size must be a multiple of 8.
pub fn bitwise(subcon: Node) -> Node {
    match detached_size(&subcon) {
        Some(size) => Transformed::new(
            subcon,
            lift(bytes_to_bits),
            Some(size / 8),
            lift(bits_to_bytes),
            Some(size / 8),
        )
        .into(),
        None => Restreamed::new(subcon, lift(bytes_to_bits), 1, lift(bits_to_bytes), 8)
            .size_computer(|n| n / 8)
            .into(),
    }
}

/// Inverse of [`bitwise`], for byte-oriented fields inside a bit stream.
pub fn bytewise(subcon: Node) -> Node {
    match detached_size(&subcon) {
        Some(size) => Transformed::new(
            subcon,
            lift(bits_to_bytes),
            Some(size * 8),
            lift(bytes_to_bits),
            Some(size * 8),
        )
        .into(),
        None => Restreamed::new(subcon, lift(bits_to_bytes), 8, lift(bytes_to_bits), 1)
            .size_computer(|n| n * 8)
            .into(),
    }
}

/// Reverses the byte order over the child's extent; the child must have a static size.
pub fn byte_swapped(subcon: Node) -> Result<Node> {
    let size = detached_size(&subcon).ok_or_else(|| {
        CodecError::sizeof(
            format!("{} needs a static size to be byte swapped", subcon.kind()),
            "(sizing)",
        )
    })?;
    Ok(Transformed::new(subcon, lift(swap_bytes), Some(size), lift(swap_bytes), Some(size)).into())
}

/// Reverses the bits of every byte seen through a bit stream.
pub fn bits_swapped(subcon: Node) -> Node {
    match detached_size(&subcon) {
        Some(size) => Transformed::new(
            subcon,
            lift(swap_bits_in_bytes),
            Some(size),
            lift(swap_bits_in_bytes),
            Some(size),
        )
        .into(),
        None => Restreamed::new(subcon, lift(swap_bits_in_bytes), 1, lift(swap_bits_in_bytes), 1)
            .size_computer(|n| n)
            .into(),
    }
}
