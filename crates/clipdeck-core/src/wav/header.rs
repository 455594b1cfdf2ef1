//! Bounds-tolerant little-endian field access and size patching for RIFF headers
//!
//! Reads past the end of the buffer yield 0 instead of panicking, so a
//! truncated file degrades to garbage metadata rather than a crash.

/// Size of the RIFF preamble: "RIFF" + u32 size + "WAVE"
pub const RIFF_HEADER_LEN: usize = 12;

/// Size of a chunk header: 4-byte id + u32 length
pub const CHUNK_HEADER_LEN: usize = 8;

/// Read a little-endian u16 at `at`, or 0 if it would run past the buffer
pub fn read_u16_le(bytes: &[u8], at: usize) -> u16 {
    match bytes.get(at..at.saturating_add(2)) {
        Some(&[b0, b1]) => u16::from_le_bytes([b0, b1]),
        _ => 0,
    }
}

/// Read a little-endian u32 at `at`, or 0 if it would run past the buffer
pub fn read_u32_le(bytes: &[u8], at: usize) -> u32 {
    match bytes.get(at..at.saturating_add(4)) {
        Some(&[b0, b1, b2, b3]) => u32::from_le_bytes([b0, b1, b2, b3]),
        _ => 0,
    }
}

/// Four-character chunk id at `at`, if fully inside the buffer
pub fn chunk_id(bytes: &[u8], at: usize) -> Option<[u8; 4]> {
    bytes
        .get(at..at.saturating_add(4))
        .and_then(|id| id.try_into().ok())
}

fn write_u32_le(bytes: &mut [u8], at: usize, value: u32) -> bool {
    match bytes.get_mut(at..at.saturating_add(4)) {
        Some(slot) => {
            slot.copy_from_slice(&value.to_le_bytes());
            true
        }
        None => false,
    }
}

/// Rewrite the two size fields of a RIFF/WAVE file for a new payload length
///
/// - RIFF size at offset 4 becomes `total_len - 8`
/// - the `data` chunk length (found by walking chunks from offset 12) becomes `data_len`
///
/// Returns false if no `data` chunk id was found inside `bytes`; the RIFF
/// size is still written when the buffer is long enough.
pub fn patch_sizes(bytes: &mut [u8], total_len: usize, data_len: usize) -> bool {
    let riff_size = total_len.saturating_sub(CHUNK_HEADER_LEN) as u32;
    write_u32_le(bytes, 4, riff_size);

    let mut offset = RIFF_HEADER_LEN;
    while let Some(id) = chunk_id(bytes, offset) {
        if &id == b"data" {
            return write_u32_le(bytes, offset + 4, data_len as u32);
        }
        let size = read_u32_le(bytes, offset + 4) as usize;
        offset = offset
            .saturating_add(CHUNK_HEADER_LEN)
            .saturating_add(size);
    }
    false
}
