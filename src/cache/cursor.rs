//! Bounds-checked reader over an in-memory buffer

use thiserror::Error;

/// Failures while decoding a buffer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CursorError {
    #[error("unexpected end of data at offset {offset}: needed {wanted} bytes, {available} left")]
    UnexpectedEof {
        offset: usize,
        wanted: usize,
        available: usize,
    },

    #[error("negative length {value} at offset {offset}")]
    NegativeLength { offset: usize, value: i32 },
}

/// Little-endian cursor that never reads past the end of its buffer
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current offset from the start of the buffer
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Consume the next `n` bytes
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], CursorError> {
        if n > self.remaining() {
            return Err(CursorError::UnexpectedEof {
                offset: self.pos,
                wanted: n,
                available: self.remaining(),
            });
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], CursorError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u64_le(&mut self) -> Result<u64, CursorError> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn read_i32_le(&mut self) -> Result<i32, CursorError> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    /// Read a 4-byte length prefix. Negative values are rejected.
    pub fn read_len(&mut self) -> Result<usize, CursorError> {
        let offset = self.pos;
        let value = self.read_i32_le()?;
        usize::try_from(value).map_err(|_| CursorError::NegativeLength { offset, value })
    }

    /// Read a length-prefixed byte string
    pub fn read_prefixed(&mut self) -> Result<&'a [u8], CursorError> {
        let len = self.read_len()?;
        self.take(len)
    }
}
