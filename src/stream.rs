//! Stream primitives: bounds-checked read/write/seek/tell over any seekable
//! byte source or sink, plus the unit-buffered [`RestreamedStream`] used by
//! variable-ratio transforms (bit streams).
//!
//! Every failure is reported as [`CodecError::Stream`] carrying the
//! diagnostic path of the node that touched the stream.

use crate::codec::{CodecError, Result};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::rc::Rc;

/// Source stream accepted by `parse`.
pub trait ReadStream: Read + Seek {}

impl<T: Read + Seek> ReadStream for T {}

/// Sink stream accepted by `build`. Readable so nodes can inspect what was
/// already written (e.g. checksums over a written range).
pub trait WriteStream: Read + Write + Seek {}

impl<T: Read + Write + Seek> WriteStream for T {}

/// Byte-to-byte transformation used by tunnels and restreamed streams.
pub type ByteFn = Rc<dyn Fn(&[u8]) -> Result<Vec<u8>>>;

/// Read exactly `length` bytes.
pub fn stream_read<R: Read + ?Sized>(stream: &mut R, length: u64, path: &str) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(length.min(1 << 16) as usize);
    (&mut *stream)
        .take(length)
        .read_to_end(&mut data)
        .map_err(|e| CodecError::stream(format!("stream.read() failed: {}", e), path))?;
    if data.len() as u64 != length {
        return Err(CodecError::stream(
            format!(
                "stream read less than specified amount, expected {}, found {}",
                length,
                data.len()
            ),
            path,
        ));
    }
    Ok(data)
}

/// Read everything up to end of stream.
pub fn stream_read_entire<R: Read + ?Sized>(stream: &mut R, path: &str) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    stream
        .read_to_end(&mut data)
        .map_err(|e| CodecError::stream(format!("stream.read() failed: {}", e), path))?;
    Ok(data)
}

pub fn stream_write<W: Write + ?Sized>(stream: &mut W, data: &[u8], path: &str) -> Result<()> {
    stream
        .write_all(data)
        .map_err(|e| CodecError::stream(format!("stream.write() failed: {}", e), path))
}

pub fn stream_seek<S: Seek + ?Sized>(stream: &mut S, pos: SeekFrom, path: &str) -> Result<u64> {
    stream
        .seek(pos)
        .map_err(|e| CodecError::stream(format!("stream.seek() failed: {}", e), path))
}

pub fn stream_tell<S: Seek + ?Sized>(stream: &mut S, path: &str) -> Result<u64> {
    stream
        .stream_position()
        .map_err(|e| CodecError::stream(format!("stream.tell() failed: {}", e), path))
}

/// Total length of the stream; the position is left unchanged.
pub fn stream_size<S: Seek + ?Sized>(stream: &mut S, path: &str) -> Result<u64> {
    let fallback = stream_tell(stream, path)?;
    let end = stream_seek(stream, SeekFrom::End(0), path)?;
    stream_seek(stream, SeekFrom::Start(fallback), path)?;
    Ok(end)
}

/// Each byte becomes eight bytes holding `0` or `1`, most significant bit first.
pub fn bytes_to_bits(data: &[u8]) -> Vec<u8> {
    let mut bits = Vec::with_capacity(data.len() * 8);
    for byte in data {
        for shift in (0..8).rev() {
            bits.push((byte >> shift) & 1);
        }
    }
    bits
}

/// Inverse of [`bytes_to_bits`]. A trailing group shorter than eight bits is
/// packed as if left-aligned.
pub fn bits_to_bytes(data: &[u8]) -> Vec<u8> {
    data.chunks(8)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .fold(0u8, |acc, (i, bit)| acc | ((bit & 1) << (7 - i)))
        })
        .collect()
}

pub fn swap_bytes(data: &[u8]) -> Vec<u8> {
    data.iter().rev().copied().collect()
}

/// Reverses the order of each 8-bit group of a bit stream.
pub fn swap_bits_in_bytes(data: &[u8]) -> Vec<u8> {
    data.chunks(8).flat_map(|chunk| chunk.iter().rev().copied()).collect()
}

/// Wraps a stream and converts data unit by unit: reads pull whole
/// `decoder_unit` chunks from the substream through `decoder`, writes buffer
/// until `encoder_unit` bytes are available and push them through `encoder`.
/// Only `tell` is supported; any real seek fails.
pub struct RestreamedStream<'s, S: ?Sized> {
    substream: &'s mut S,
    decoder: ByteFn,
    decoder_unit: usize,
    encoder: ByteFn,
    encoder_unit: usize,
    rbuffer: Vec<u8>,
    wbuffer: Vec<u8>,
    since_read_written: u64,
}

impl<'s, S: ?Sized> RestreamedStream<'s, S> {
    pub fn new(
        substream: &'s mut S,
        decoder: ByteFn,
        decoder_unit: usize,
        encoder: ByteFn,
        encoder_unit: usize,
    ) -> Self {
        RestreamedStream {
            substream,
            decoder,
            decoder_unit: decoder_unit.max(1),
            encoder,
            encoder_unit: encoder_unit.max(1),
            rbuffer: Vec::new(),
            wbuffer: Vec::new(),
            since_read_written: 0,
        }
    }

    /// Fails when decoded bytes were left unread or written bytes did not
    /// fill a whole encoder unit.
    pub fn close(self, path: &str) -> Result<()> {
        if !self.rbuffer.is_empty() {
            return Err(CodecError::stream(
                format!("closing restreamed stream with {} unread bytes", self.rbuffer.len()),
                path,
            ));
        }
        if !self.wbuffer.is_empty() {
            return Err(CodecError::stream(
                format!("closing restreamed stream with {} unwritten bytes", self.wbuffer.len()),
                path,
            ));
        }
        Ok(())
    }
}

fn transform_failed(e: CodecError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e.to_string())
}

impl<S: Read + ?Sized> Read for RestreamedStream<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.rbuffer.len() < buf.len() {
            let mut unit = vec![0u8; self.decoder_unit];
            match self.substream.read_exact(&mut unit) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            let decoded = (self.decoder)(&unit).map_err(transform_failed)?;
            self.rbuffer.extend_from_slice(&decoded);
        }
        let n = buf.len().min(self.rbuffer.len());
        buf[..n].copy_from_slice(&self.rbuffer[..n]);
        self.rbuffer.drain(..n);
        self.since_read_written += n as u64;
        Ok(n)
    }
}

impl<S: Write + ?Sized> Write for RestreamedStream<'_, S> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.wbuffer.extend_from_slice(data);
        while self.wbuffer.len() >= self.encoder_unit {
            let unit: Vec<u8> = self.wbuffer.drain(..self.encoder_unit).collect();
            let encoded = (self.encoder)(&unit).map_err(transform_failed)?;
            self.substream.write_all(&encoded)?;
        }
        self.since_read_written += data.len() as u64;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.substream.flush()
    }
}

impl<S: ?Sized> Seek for RestreamedStream<'_, S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match pos {
            SeekFrom::Current(0) => Ok(self.since_read_written),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "restreamed stream is not seekable",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn bits_roundtrip() {
        let bits = bytes_to_bits(&[0b1010_0001, 0xff]);
        assert_eq!(&bits[..8], &[1, 0, 1, 0, 0, 0, 0, 1]);
        assert_eq!(bits_to_bytes(&bits), vec![0b1010_0001, 0xff]);
    }

    #[test]
    fn swap_bits_reverses_each_group() {
        let bits = bytes_to_bits(&[0b1000_0000]);
        assert_eq!(bits_to_bytes(&swap_bits_in_bytes(&bits)), vec![0b0000_0001]);
    }

    #[test]
    fn short_read_is_stream_error() {
        let mut cursor = Cursor::new(vec![1u8, 2]);
        let err = stream_read(&mut cursor, 3, "(test)").unwrap_err();
        assert!(matches!(err, CodecError::Stream { .. }));
    }

    #[test]
    fn restreamed_reads_units_and_refuses_seek() {
        let mut inner = Cursor::new(vec![0b1100_0000u8]);
        let decoder: ByteFn = Rc::new(|b: &[u8]| Ok(bytes_to_bits(b)));
        let encoder: ByteFn = Rc::new(|b: &[u8]| Ok(bits_to_bytes(b)));
        let mut restreamed = RestreamedStream::new(&mut inner, decoder, 1, encoder, 8);
        let bits = stream_read(&mut restreamed, 2, "(test)").expect("read");
        assert_eq!(bits, vec![1, 1]);
        assert_eq!(stream_tell(&mut restreamed, "(test)").expect("tell"), 2);
        assert!(stream_seek(&mut restreamed, SeekFrom::Start(0), "(test)").is_err());
        assert!(restreamed.close("(test)").is_err());
    }
}
