//! Splitting files into chunks and putting them back together.
//!
//! A file of length `L` always has `L / chunk_size + 1` chunks, so a file
//! whose length is an exact multiple of the chunk size ends with an empty
//! chunk. Holders strip trailing zero bytes before writing; reassembly pads
//! every chunk back to `chunk_size` and truncates to the recorded length.

use bytes::Bytes;

pub fn chunk_count(len: u64, chunk_size: usize) -> u32 {
    (len / chunk_size as u64 + 1) as u32
}

/// Split `data` into `chunk_count(data.len())` chunks.
pub fn split(data: &Bytes, chunk_size: usize) -> Vec<Bytes> {
    let count = chunk_count(data.len() as u64, chunk_size) as usize;
    (0..count)
        .map(|i| {
            let start = (i * chunk_size).min(data.len());
            let end = (start + chunk_size).min(data.len());
            data.slice(start..end)
        })
        .collect()
}

/// The stored form of a chunk body.
pub fn trim_trailing_zeros(body: &[u8]) -> &[u8] {
    let end = body.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    &body[..end]
}

/// Rebuild a file from its chunks in order.
///
/// Each chunk is zero-padded (or cut) to `chunk_size` before concatenation,
/// and the result is truncated to `total_len`.
pub fn reassemble<'a, I>(chunks: I, chunk_size: usize, total_len: u64) -> Vec<u8>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let total_len = total_len as usize;
    let mut out = Vec::with_capacity(total_len + chunk_size);
    for chunk in chunks {
        let take = chunk.len().min(chunk_size);
        out.extend_from_slice(&chunk[..take]);
        out.resize(out.len() + (chunk_size - take), 0);
        if out.len() >= total_len {
            break;
        }
    }
    out.resize(total_len, 0);
    out
}
