//! Chunked stream reading
//!
//! Every read path in the cache goes through [`read_chunked`]: the stream is
//! consumed in fixed-size chunks until a chunk comes back short or empty, and
//! the chunks are then assembled into one contiguous buffer.

use std::io::{self, Read};
use tracing::trace;

/// Reference chunk size for payload and journal reads
pub const READ_CHUNK_SIZE: usize = 4096;

/// Read a stream to completion in [`READ_CHUNK_SIZE`] chunks
pub fn read_chunked<R: Read + ?Sized>(reader: &mut R) -> io::Result<Vec<u8>> {
    read_chunked_with(reader, READ_CHUNK_SIZE)
}

/// Read a stream to completion using chunks of `chunk_size` bytes.
///
/// A chunk that ends up shorter than `chunk_size` is the last one. On error
/// the chunks read so far are dropped and only the error is returned.
pub fn read_chunked_with<R: Read + ?Sized>(
    reader: &mut R,
    chunk_size: usize,
) -> io::Result<Vec<u8>> {
    let chunk_size = chunk_size.max(1);
    let mut chunks: Vec<Vec<u8>> = Vec::new();
    let mut total_len = 0usize;

    loop {
        let mut chunk = vec![0u8; chunk_size];
        let len = fill_chunk(reader, &mut chunk)?;
        if len == 0 {
            break;
        }
        total_len += len;
        trace!(len, total_len, "Read chunk");
        if len < chunk_size {
            chunk.truncate(len);
            chunks.push(chunk);
            break;
        }
        chunks.push(chunk);
    }

    let mut content = Vec::with_capacity(total_len);
    for chunk in &chunks {
        content.extend_from_slice(chunk);
    }
    trace!(total_len, chunks = chunks.len(), "Chunked read finished");
    Ok(content)
}

/// Fill `buf` from the reader, stopping early only at end-of-stream.
///
/// A single `read` call may legitimately return fewer bytes than asked for,
/// so the chunk is only considered short once the reader reports zero bytes.
fn fill_chunk<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
