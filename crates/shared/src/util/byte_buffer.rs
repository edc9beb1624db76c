// ByteBuffer / ByteReader - little-endian binary serialization
// ByteBuffer appends, ByteReader walks a borrowed slice with bounds checks.

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

/// Failure of a bounds-checked read. The reader position is left untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("read of {wanted} bytes at offset {offset} overruns buffer of {len} bytes")]
    Truncated {
        offset: usize,
        wanted: usize,
        len: usize,
    },
}

/// An append-only byte buffer for writing binary file data.
#[derive(Debug, Clone)]
pub struct ByteBuffer {
    data: Vec<u8>,
}

impl Default for ByteBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteBuffer {
    /// Create a new empty ByteBuffer
    pub fn new() -> Self {
        ByteBuffer { data: Vec::new() }
    }

    /// Create with a pre-allocated capacity
    pub fn with_capacity(capacity: usize) -> Self {
        ByteBuffer {
            data: Vec::with_capacity(capacity),
        }
    }

    /// Get the current size of the buffer
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Check if the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the raw contents
    pub fn contents(&self) -> &[u8] {
        &self.data
    }

    /// Consume the buffer and return the bytes
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    /// Clear the buffer
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Append raw bytes
    pub fn append(&mut self, data: &[u8]) {
        self.data.extend_from_slice(data);
    }

    pub fn write_u8(&mut self, val: u8) {
        self.data.push(val);
    }

    pub fn write_i8(&mut self, val: i8) {
        self.data.push(val as u8);
    }

    pub fn write_u16(&mut self, val: u16) {
        let mut buf = [0u8; 2];
        LittleEndian::write_u16(&mut buf, val);
        self.data.extend_from_slice(&buf);
    }

    pub fn write_i16(&mut self, val: i16) {
        let mut buf = [0u8; 2];
        LittleEndian::write_i16(&mut buf, val);
        self.data.extend_from_slice(&buf);
    }

    pub fn write_u32(&mut self, val: u32) {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, val);
        self.data.extend_from_slice(&buf);
    }

    pub fn write_i32(&mut self, val: i32) {
        let mut buf = [0u8; 4];
        LittleEndian::write_i32(&mut buf, val);
        self.data.extend_from_slice(&buf);
    }

    pub fn write_f32(&mut self, val: f32) {
        let mut buf = [0u8; 4];
        LittleEndian::write_f32(&mut buf, val);
        self.data.extend_from_slice(&buf);
    }

    /// Write a null-terminated string
    pub fn write_string(&mut self, val: &str) {
        self.data.extend_from_slice(val.as_bytes());
        self.data.push(0);
    }

    /// Write a u32 length followed by the string bytes (no terminator)
    pub fn write_sized_string(&mut self, val: &str) {
        self.write_u32(val.len() as u32);
        self.data.extend_from_slice(val.as_bytes());
    }

    /// Overwrite a u32 previously written at `pos`
    pub fn put_u32(&mut self, pos: usize, val: u32) {
        if pos + 4 <= self.data.len() {
            LittleEndian::write_u32(&mut self.data[pos..pos + 4], val);
        }
    }
}

impl std::fmt::Display for ByteBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ByteBuffer(size={})", self.size())
    }
}

/// Bounds-checked sequential reader over a borrowed byte slice.
///
/// Every read either advances the position by the size of the value or
/// fails with [`BufferError::Truncated`] and leaves the position unchanged.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        ByteReader { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_eof(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// The slice that has not been consumed yet
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    fn check(&self, wanted: usize) -> Result<(), BufferError> {
        match self.pos.checked_add(wanted) {
            Some(end) if end <= self.data.len() => Ok(()),
            _ => Err(BufferError::Truncated {
                offset: self.pos,
                wanted,
                len: self.data.len(),
            }),
        }
    }

    /// Move to an absolute position; `pos == len` is allowed
    pub fn seek(&mut self, pos: usize) -> Result<(), BufferError> {
        if pos > self.data.len() {
            return Err(BufferError::Truncated {
                offset: pos,
                wanted: 0,
                len: self.data.len(),
            });
        }
        self.pos = pos;
        Ok(())
    }

    pub fn skip(&mut self, count: usize) -> Result<(), BufferError> {
        self.check(count)?;
        self.pos += count;
        Ok(())
    }

    pub fn bytes(&mut self, count: usize) -> Result<&'a [u8], BufferError> {
        self.check(count)?;
        let slice = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    /// Split off a child reader over the next `count` bytes, advancing past them
    pub fn sub_reader(&mut self, count: usize) -> Result<ByteReader<'a>, BufferError> {
        Ok(ByteReader::new(self.bytes(count)?))
    }

    pub fn read_u8(&mut self) -> Result<u8, BufferError> {
        Ok(self.bytes(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8, BufferError> {
        Ok(self.bytes(1)?[0] as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16, BufferError> {
        Ok(LittleEndian::read_u16(self.bytes(2)?))
    }

    pub fn read_i16(&mut self) -> Result<i16, BufferError> {
        Ok(LittleEndian::read_i16(self.bytes(2)?))
    }

    pub fn read_u32(&mut self) -> Result<u32, BufferError> {
        Ok(LittleEndian::read_u32(self.bytes(4)?))
    }

    pub fn read_i32(&mut self) -> Result<i32, BufferError> {
        Ok(LittleEndian::read_i32(self.bytes(4)?))
    }

    pub fn read_f32(&mut self) -> Result<f32, BufferError> {
        Ok(LittleEndian::read_f32(self.bytes(4)?))
    }

    pub fn read_f32x3(&mut self) -> Result<[f32; 3], BufferError> {
        self.check(12)?;
        Ok([self.read_f32()?, self.read_f32()?, self.read_f32()?])
    }

    /// Read a null-terminated string. A string running to the end of the
    /// buffer without a terminator is accepted.
    pub fn read_cstring(&mut self) -> Result<String, BufferError> {
        let rest = &self.data[self.pos..];
        if rest.is_empty() {
            return Err(BufferError::Truncated {
                offset: self.pos,
                wanted: 1,
                len: self.data.len(),
            });
        }
        let len = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        let s = String::from_utf8_lossy(&rest[..len]).to_string();
        self.pos += (len + 1).min(rest.len());
        Ok(s)
    }
}

/// Read the null-terminated string starting at `offset` of a string pool.
/// Offsets past the end resolve to an empty string.
pub fn cstring_at(pool: &[u8], offset: usize) -> String {
    if offset >= pool.len() {
        return String::new();
    }
    let slice = &pool[offset..];
    let len = slice.iter().position(|&b| b == 0).unwrap_or(slice.len());
    String::from_utf8_lossy(&slice[..len]).to_string()
}
