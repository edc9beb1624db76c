// Compression - zlib block helpers
// Archive entries are a run of independently deflated chunks of at most
// CHUNK_SIZE bytes. Output files (`.map`, `.wtr`) store one block.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use zone_shared::util::{ByteBuffer, ByteReader};

use crate::error::{Result, ZoneError};

/// Largest uncompressed size of one archive chunk
pub const CHUNK_SIZE: usize = 8192;

/// Deflate `data` as a raw zlib stream
pub fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| ZoneError::Compression(format!("deflate failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| ZoneError::Compression(format!("deflate failed: {e}")))
}

/// Inflate a zlib stream that must produce exactly `expected` bytes
pub fn inflate(data: &[u8], expected: usize) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::with_capacity(expected.min(1 << 24));
    decoder
        .read_to_end(&mut out)
        .map_err(|e| ZoneError::Compression(format!("inflate failed: {e}")))?;
    if out.len() != expected {
        return Err(ZoneError::Compression(format!(
            "inflated {} bytes, header declared {}",
            out.len(),
            expected
        )));
    }
    Ok(out)
}

/// Compress into `[u32 deflated][u32 inflated][bytes]` chunks of at most
/// [`CHUNK_SIZE`] input bytes each
pub fn deflate_chunked(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = ByteBuffer::with_capacity(data.len() / 2 + 16);
    for chunk in data.chunks(CHUNK_SIZE) {
        let deflated = deflate(chunk)?;
        out.write_u32(deflated.len() as u32);
        out.write_u32(chunk.len() as u32);
        out.append(&deflated);
    }
    Ok(out.into_inner())
}

/// Inflate a chunk run; the chunk sizes must add up to exactly `total`
pub fn inflate_chunked(data: &[u8], total: usize) -> Result<Vec<u8>> {
    let mut reader = ByteReader::new(data);
    let mut out = Vec::with_capacity(total.min(1 << 24));
    while out.len() < total {
        let deflated_len = reader.read_u32()? as usize;
        let inflated_len = reader.read_u32()? as usize;
        if inflated_len > CHUNK_SIZE {
            tracing::trace!("oversized chunk of {} bytes", inflated_len);
        }
        let block = reader.bytes(deflated_len)?;
        out.extend_from_slice(&inflate(block, inflated_len)?);
    }
    if out.len() != total {
        return Err(ZoneError::Compression(format!(
            "chunks inflated to {} bytes, entry declared {}",
            out.len(),
            total
        )));
    }
    Ok(out)
}

/// Length in bytes of the chunk run starting at the beginning of `data`
/// whose inflated sizes add up to `total`, read from chunk headers only
pub fn chunked_extent(data: &[u8], total: usize) -> Result<usize> {
    let mut reader = ByteReader::new(data);
    let mut inflated = 0usize;
    while inflated < total {
        let deflated_len = reader.read_u32()? as usize;
        let inflated_len = reader.read_u32()? as usize;
        reader.skip(deflated_len)?;
        inflated += inflated_len;
    }
    Ok(reader.position())
}

/// Append `[u32 compressed][u32 uncompressed][bytes]` for a single block
pub fn write_single_block(out: &mut ByteBuffer, payload: &[u8]) -> Result<()> {
    let deflated = deflate(payload)?;
    out.write_u32(deflated.len() as u32);
    out.write_u32(payload.len() as u32);
    out.append(&deflated);
    Ok(())
}

/// Read back a block written by [`write_single_block`]
pub fn read_single_block(reader: &mut ByteReader<'_>) -> Result<Vec<u8>> {
    let deflated_len = reader.read_u32()? as usize;
    let inflated_len = reader.read_u32()? as usize;
    let block = reader.bytes(deflated_len)?;
    inflate(block, inflated_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    #[test]
    fn test_chunk_count_is_ceil_of_size() {
        for (len, chunks) in [(0usize, 0usize), (1, 1), (8192, 1), (8193, 2), (20000, 3)] {
            let packed = deflate_chunked(&sample(len)).unwrap();
            let mut reader = ByteReader::new(&packed);
            let mut count = 0;
            let mut inflated = 0;
            while !reader.is_eof() {
                let deflated_len = reader.read_u32().unwrap() as usize;
                let inflated_len = reader.read_u32().unwrap() as usize;
                assert!(inflated_len <= CHUNK_SIZE);
                reader.skip(deflated_len).unwrap();
                inflated += inflated_len;
                count += 1;
            }
            assert_eq!(count, chunks, "len {len}");
            assert_eq!(inflated, len);
            assert_eq!(chunked_extent(&packed, len).unwrap(), packed.len());
        }
    }

    #[test]
    fn test_inflate_chunked_restores_content() {
        let data = sample(17000);
        let packed = deflate_chunked(&data).unwrap();
        assert_eq!(inflate_chunked(&packed, data.len()).unwrap(), data);
    }

    #[test]
    fn test_declared_total_mismatch_is_error() {
        let data = sample(100);
        let packed = deflate_chunked(&data).unwrap();
        assert!(matches!(
            inflate_chunked(&packed, 50),
            Err(ZoneError::Compression(_))
        ));
        assert!(inflate_chunked(&packed, 200).is_err());
    }

    #[test]
    fn test_chunk_header_mismatch_is_error() {
        let data = sample(100);
        let mut packed = deflate_chunked(&data).unwrap();
        // claim 99 inflated bytes for a chunk that holds 100
        packed[4..8].copy_from_slice(&99u32.to_le_bytes());
        assert!(matches!(
            inflate_chunked(&packed, 99),
            Err(ZoneError::Compression(_))
        ));
    }

    #[test]
    fn test_single_block_layout() {
        let data = sample(30000);
        let mut out = ByteBuffer::new();
        write_single_block(&mut out, &data).unwrap();
        let mut reader = ByteReader::new(out.contents());
        let compressed = reader.read_u32().unwrap() as usize;
        assert_eq!(reader.read_u32().unwrap() as usize, data.len());
        assert_eq!(compressed + 8, out.size());

        let mut reader = ByteReader::new(out.contents());
        assert_eq!(read_single_block(&mut reader).unwrap(), data);
    }
}
