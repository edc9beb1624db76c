// Utility module - binary buffers shared by all format parsers

pub mod byte_buffer;

pub use byte_buffer::{cstring_at, BufferError, ByteBuffer, ByteReader};
