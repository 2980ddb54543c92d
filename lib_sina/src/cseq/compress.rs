//! Persistence blob codec for [`super::CSeq`] entry lists (§6 "Compressed CSeq blob").
//!
//! Format: 1 byte tag `'#'`, 2-byte little-endian original (uncompressed
//! payload) size, then a deflate-compressed payload of one byte per base
//! followed by 4 bytes per entry of little-endian delta-encoded column index.
//! Width is a store-level fact and is not part of this blob.

use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::base::Base;
use crate::error::SequenceError;

const TAG: u8 = b'#';
const COLUMN_BYTES: usize = 4;

/// Packs a column-sorted entry list into the on-disk blob.
pub fn compress(entries: &[(Base, u32)]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(entries.len() * (1 + COLUMN_BYTES));
    for &(base, _) in entries {
        payload.push(base.to_bits());
    }
    let mut previous = 0i64;
    for &(_, column) in entries {
        let delta = column as i64 - previous;
        previous = column as i64;
        payload.extend_from_slice(&(delta as i32).to_le_bytes());
    }

    let original_size = payload.len().min(u16::MAX as usize) as u16;
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&payload)
        .expect("writing to an in-memory Vec cannot fail");
    let deflated = encoder.finish().expect("finishing an in-memory deflate stream cannot fail");

    let mut blob = Vec::with_capacity(3 + deflated.len());
    blob.push(TAG);
    blob.extend_from_slice(&original_size.to_le_bytes());
    blob.extend_from_slice(&deflated);
    blob
}

/// Unpacks a blob produced by [`compress`] back into a column-sorted entry list.
pub fn decompress(blob: &[u8]) -> Result<Vec<(Base, u32)>, SequenceError> {
    if blob.len() < 3 || blob[0] != TAG {
        return Err(SequenceError::MalformedBlob {
            reason: "missing '#' tag header",
        });
    }
    let original_size = u16::from_le_bytes([blob[1], blob[2]]) as usize;

    let mut decoder = DeflateDecoder::new(&blob[3..]);
    let mut payload = Vec::new();
    decoder
        .read_to_end(&mut payload)
        .map_err(|_| SequenceError::MalformedBlob {
            reason: "deflate stream is corrupt",
        })?;

    // The stored size saturates at u16::MAX; only trust it as an exact length
    // when the payload did not overflow that at compress time.
    if payload.len() < original_size && original_size < u16::MAX as usize {
        return Err(SequenceError::MalformedBlob {
            reason: "decompressed payload shorter than recorded size",
        });
    }

    let stride = 1 + COLUMN_BYTES;
    if payload.len() % stride != 0 {
        return Err(SequenceError::MalformedBlob {
            reason: "payload length is not a multiple of the per-entry stride",
        });
    }
    let entry_count = payload.len() / stride;

    let mut entries = Vec::with_capacity(entry_count);
    let mut column = 0i64;
    for i in 0..entry_count {
        let base = Base::from_bits(payload[i]);
        let delta_offset = entry_count + i * COLUMN_BYTES;
        let delta_bytes: [u8; 4] = payload[delta_offset..delta_offset + COLUMN_BYTES]
            .try_into()
            .expect("slice length is exactly COLUMN_BYTES");
        let delta = i32::from_le_bytes(delta_bytes) as i64;
        column += delta;
        entries.push((base, column as u32));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_bases_and_positions() {
        let entries = vec![
            (Base::A, 0),
            (Base::G, 2),
            (Base::C, 5),
            (Base::T, 100),
        ];
        let blob = compress(&entries);
        assert_eq!(blob[0], TAG);
        let restored = decompress(&blob).unwrap();
        assert_eq!(restored, entries);
    }

    #[test]
    fn round_trips_empty_sequence() {
        let entries: Vec<(Base, u32)> = Vec::new();
        let blob = compress(&entries);
        let restored = decompress(&blob).unwrap();
        assert!(restored.is_empty());
    }

    #[test]
    fn rejects_blob_without_tag() {
        let err = decompress(&[0, 0, 0]).unwrap_err();
        assert!(matches!(err, SequenceError::MalformedBlob { .. }));
    }
}
