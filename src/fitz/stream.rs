//! Seekable in-memory streams and the decode filter chain

use std::io::{Read, SeekFrom};

use bytes::Bytes;

use crate::fitz::error::{Error, Result};

// ============================================================================
// Stream
// ============================================================================

/// A seekable byte stream with a cursor, backed by shared bytes.
#[derive(Debug, Clone)]
pub struct Stream {
    data: Bytes,
    pos: usize,
}

impl Stream {
    pub fn from_bytes(data: Bytes) -> Self {
        Stream { data, pos: 0 }
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Stream {
            data: Bytes::from(data),
            pos: 0,
        }
    }

    pub fn from_slice(data: &[u8]) -> Self {
        Stream {
            data: Bytes::copy_from_slice(data),
            pos: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn tell(&self) -> u64 {
        self.pos as u64
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn seek(&mut self, from: SeekFrom) -> Result<u64> {
        let new_pos = match from {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::Current(n) => self.pos as i64 + n,
            SeekFrom::End(n) => self.data.len() as i64 + n,
        };
        if new_pos < 0 {
            return Err(Error::range("seek before start of stream"));
        }
        // Seeking past the end is allowed; reads there return nothing.
        self.pos = new_pos as usize;
        Ok(self.pos as u64)
    }

    /// Read up to `buf.len()` bytes, returning the count actually read.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.remaining());
        if n > 0 {
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
        }
        n
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        if self.read(buf) != buf.len() {
            return Err(Error::Eof);
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        self.read_exact(&mut b)?;
        Ok(b[0])
    }

    pub fn skip(&mut self, n: u64) -> Result<u64> {
        self.seek(SeekFrom::Current(n as i64))
    }

    /// A detached view of `len` bytes starting at `offset`, independent of
    /// the cursor. Used to lift embedded data (e.g. ICC profiles) out of an
    /// encoded stream.
    pub fn slice_at(&self, offset: u64, len: usize) -> Result<Bytes> {
        let start = offset as usize;
        let end = start
            .checked_add(len)
            .ok_or_else(|| Error::range("slice length overflow"))?;
        if end > self.data.len() {
            return Err(Error::Eof);
        }
        Ok(self.data.slice(start..end))
    }
}

// ============================================================================
// Filters
// ============================================================================

/// A single decode filter in a stream's filter chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Flate,
    Lzw,
    AsciiHex,
    RunLength,
    /// Image codecs and anything else we hand off downstream undecoded.
    Passthrough(String),
}

impl Filter {
    pub fn from_name(name: &str) -> Filter {
        match name {
            "FlateDecode" | "Fl" => Filter::Flate,
            "LZWDecode" | "LZW" => Filter::Lzw,
            "ASCIIHexDecode" | "AHx" => Filter::AsciiHex,
            "RunLengthDecode" | "RL" => Filter::RunLength,
            other => Filter::Passthrough(other.to_string()),
        }
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self, Filter::Passthrough(_))
    }
}

/// Run `data` through the filter chain in order, stopping at the first
/// passthrough codec (its input is the fully-decoded prefix chain output).
pub fn decode_filters(data: &[u8], filters: &[Filter]) -> Result<Bytes> {
    let mut current = Bytes::copy_from_slice(data);
    for filter in filters {
        current = match filter {
            Filter::Flate => flate_decode(&current)?,
            Filter::Lzw => lzw_decode(&current)?,
            Filter::AsciiHex => ascii_hex_decode(&current)?,
            Filter::RunLength => run_length_decode(&current)?,
            Filter::Passthrough(name) => {
                tracing::debug!(filter = %name, "leaving stream encoded for downstream codec");
                break;
            }
        };
    }
    Ok(current)
}

fn flate_decode(data: &[u8]) -> Result<Bytes> {
    let mut out = Vec::new();
    let mut decoder = flate2::read::ZlibDecoder::new(data);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::format(format!("flate decode failed: {}", e)))?;
    Ok(Bytes::from(out))
}

fn lzw_decode(data: &[u8]) -> Result<Bytes> {
    let mut decoder = weezl::decode::Decoder::new(weezl::BitOrder::Msb, 8);
    let out = decoder
        .decode(data)
        .map_err(|e| Error::format(format!("LZW decode failed: {}", e)))?;
    Ok(Bytes::from(out))
}

fn ascii_hex_decode(data: &[u8]) -> Result<Bytes> {
    let mut out = Vec::with_capacity(data.len() / 2);
    let mut hi: Option<u8> = None;
    for &b in data {
        let nibble = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            b'>' => break,
            b if b.is_ascii_whitespace() => continue,
            _ => return Err(Error::syntax("invalid character in hex stream")),
        };
        match hi.take() {
            None => hi = Some(nibble),
            Some(h) => out.push((h << 4) | nibble),
        }
    }
    // A trailing odd digit acts as if followed by zero.
    if let Some(h) = hi {
        out.push(h << 4);
    }
    Ok(Bytes::from(out))
}

fn run_length_decode(data: &[u8]) -> Result<Bytes> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < data.len() {
        let len = data[i];
        i += 1;
        match len {
            0..=127 => {
                let n = len as usize + 1;
                if i + n > data.len() {
                    return Err(Error::Eof);
                }
                out.extend_from_slice(&data[i..i + n]);
                i += n;
            }
            128 => break,
            _ => {
                if i >= data.len() {
                    return Err(Error::Eof);
                }
                out.extend(std::iter::repeat(data[i]).take(257 - len as usize));
                i += 1;
            }
        }
    }
    Ok(Bytes::from(out))
}
