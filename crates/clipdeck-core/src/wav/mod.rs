//! RIFF/WAVE container parsing
//!
//! Decodes the structural metadata of an in-memory WAV file (channel count,
//! sample rate, bit depth, data offset/size) without copying the PCM payload.
//!
//! Chunks after the 12-byte RIFF preamble are walked sequentially:
//!
//! ```text
//! "RIFF" <u32 size> "WAVE"
//!   "fmt " <u32 len> format, channels, rate, byte rate, block align, bits [+ extension]
//!   "LIST" <u32 len> free text (first 256 bytes kept)
//!   <any> <u32 len> skipped
//!   "data" <u32 len> PCM...           ← walk stops here
//! ```

mod header;

pub use header::{patch_sizes, read_u16_le, read_u32_le, CHUNK_HEADER_LEN, RIFF_HEADER_LEN};

use thiserror::Error;

use header::chunk_id;

/// Header size assumed when a clip fails strict RIFF/WAVE validation
pub const DEFAULT_HEADER_SIZE: usize = 78;

/// Maximum number of LIST payload bytes kept as `custom_info`
pub const MAX_CUSTOM_INFO_LEN: usize = 256;

/// Canonical fmt payload length; anything beyond is an extension and skipped
const FMT_CANONICAL_LEN: usize = 16;

/// WAV container validation failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WavError {
    /// Fewer than 12 bytes, can't hold the RIFF preamble
    #[error("Buffer too small for a RIFF header: {0} bytes")]
    TooSmall(usize),

    /// Bytes 0..4 are not "RIFF"
    #[error("Not a RIFF file")]
    NotARiffFile,

    /// Bytes 8..12 are not "WAVE"
    #[error("Not a WAVE file")]
    NotWaveFormat,
}

/// Structural metadata of a WAV file
///
/// Computed on demand from the raw bytes and never mutated; cheap to
/// recompute (O(header size)).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WavInfo {
    /// Bytes preceding the PCM payload
    pub header_size: usize,
    pub num_channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub byte_rate: u32,
    pub block_align: u16,
    /// Audio format tag (1 = PCM, 3 = IEEE float)
    pub audio_format: u16,
    /// Declared length of the data chunk
    pub data_size: u32,
    /// Offset of the data chunk's id (start of its 8-byte chunk header)
    pub data_chunk_offset: Option<usize>,
    /// Best-effort text from a LIST chunk
    pub custom_info: Option<String>,
}

impl WavInfo {
    /// PCM payload that follows the header
    ///
    /// Everything after `header_size`, matching what gets written to a sink.
    pub fn payload<'a>(&self, bytes: &'a [u8]) -> &'a [u8] {
        bytes.get(self.header_size..).unwrap_or(&[])
    }

    /// Whether this is the format the playback pipeline expects
    pub fn is_mono_16bit_pcm(&self) -> bool {
        self.audio_format == 1 && self.num_channels == 1 && self.bits_per_sample == 16
    }
}

/// Parse the metadata of a RIFF/WAVE byte buffer
pub fn parse(bytes: &[u8]) -> Result<WavInfo, WavError> {
    if bytes.len() < RIFF_HEADER_LEN {
        return Err(WavError::TooSmall(bytes.len()));
    }
    if &bytes[0..4] != b"RIFF" {
        return Err(WavError::NotARiffFile);
    }
    if &bytes[8..12] != b"WAVE" {
        return Err(WavError::NotWaveFormat);
    }

    let mut info = WavInfo::default();
    let mut offset = RIFF_HEADER_LEN;

    while let Some(id) = chunk_id(bytes, offset) {
        let chunk_size = read_u32_le(bytes, offset + 4) as usize;
        let payload = offset + CHUNK_HEADER_LEN;

        match &id {
            b"fmt " => {
                info.audio_format = read_u16_le(bytes, payload);
                info.num_channels = read_u16_le(bytes, payload + 2);
                info.sample_rate = read_u32_le(bytes, payload + 4);
                info.byte_rate = read_u32_le(bytes, payload + 8);
                info.block_align = read_u16_le(bytes, payload + 12);
                info.bits_per_sample = read_u16_le(bytes, payload + 14);
                if chunk_size > FMT_CANONICAL_LEN {
                    log::trace!(
                        "[WAV] fmt chunk carries {} extension bytes",
                        chunk_size - FMT_CANONICAL_LEN
                    );
                }
            }
            b"data" => {
                info.data_size = chunk_size as u32;
                info.data_chunk_offset = Some(offset);
                break;
            }
            b"LIST" => {
                let end = payload
                    .saturating_add(chunk_size.min(MAX_CUSTOM_INFO_LEN))
                    .min(bytes.len());
                if let Some(text) = bytes.get(payload..end) {
                    info.custom_info = Some(String::from_utf8_lossy(text).into_owned());
                }
            }
            other => {
                log::trace!(
                    "[WAV] Skipping chunk {:?} ({} bytes)",
                    String::from_utf8_lossy(other),
                    chunk_size
                );
            }
        }

        offset = payload.saturating_add(chunk_size);
    }

    info.header_size = match info.data_chunk_offset {
        Some(data_offset) => data_offset + CHUNK_HEADER_LEN,
        None => offset,
    };

    Ok(info)
}

/// Header size to strip before the PCM payload
///
/// Falls back to `fallback` (normally [`DEFAULT_HEADER_SIZE`]) when the
/// buffer fails validation; playback then continues with a possibly
/// misaligned payload.
pub fn header_size_or(bytes: &[u8], fallback: usize, clip: &str) -> usize {
    match parse(bytes) {
        Ok(info) => {
            if !info.is_mono_16bit_pcm() {
                log::warn!(
                    "[WAV] {}: format {} / {} ch / {} bit is not mono 16-bit PCM, playing as-is",
                    clip,
                    info.audio_format,
                    info.num_channels,
                    info.bits_per_sample
                );
            }
            info.header_size
        }
        Err(e) => {
            log::warn!("[WAV] {}: {}, assuming {}-byte header", clip, e, fallback);
            fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Hand-built WAV: RIFF preamble + chunks in order
    fn build_wav(chunks: &[(&[u8; 4], Vec<u8>)]) -> Vec<u8> {
        let mut body = Vec::new();
        for (id, payload) in chunks {
            body.extend_from_slice(*id);
            body.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            body.extend_from_slice(payload);
        }
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&((body.len() + 4) as u32).to_le_bytes());
        bytes.extend_from_slice(b"WAVE");
        bytes.extend_from_slice(&body);
        bytes
    }

    fn fmt_payload(channels: u16, rate: u32, bits: u16, extension: usize) -> Vec<u8> {
        let block_align = channels * bits / 8;
        let mut p = Vec::new();
        p.extend_from_slice(&1u16.to_le_bytes());
        p.extend_from_slice(&channels.to_le_bytes());
        p.extend_from_slice(&rate.to_le_bytes());
        p.extend_from_slice(&(rate * block_align as u32).to_le_bytes());
        p.extend_from_slice(&block_align.to_le_bytes());
        p.extend_from_slice(&bits.to_le_bytes());
        p.extend(std::iter::repeat(0xAA).take(extension));
        p
    }

    #[test]
    fn test_canonical_header() {
        let bytes = build_wav(&[
            (b"fmt ", fmt_payload(1, 16_000, 16, 0)),
            (b"data", vec![0; 100]),
        ]);
        let info = parse(&bytes).unwrap();
        assert_eq!(info.header_size, 44);
        assert_eq!(info.data_chunk_offset, Some(36));
        assert_eq!(info.data_size, 100);
        assert_eq!(info.num_channels, 1);
        assert_eq!(info.sample_rate, 16_000);
        assert_eq!(info.bits_per_sample, 16);
        assert_eq!(info.byte_rate, 32_000);
        assert_eq!(info.block_align, 2);
        assert!(info.is_mono_16bit_pcm());
        assert_eq!(info.payload(&bytes).len(), 100);
    }

    #[test]
    fn test_fmt_extension_and_unknown_chunks_are_skipped() {
        let bytes = build_wav(&[
            (b"fmt ", fmt_payload(1, 16_000, 16, 2)),
            (b"fact", vec![0; 4]),
            (b"LIST", b"INFOISFT\x05\0\0\0clip\0".to_vec()),
            (b"data", vec![0; 10]),
        ]);
        let info = parse(&bytes).unwrap();
        // 12 + (8+18) + (8+4) + (8+17) = 75
        assert_eq!(info.data_chunk_offset, Some(75));
        assert_eq!(info.header_size, 83);
        assert_eq!(info.sample_rate, 16_000);
        assert!(info.custom_info.as_deref().unwrap().starts_with("INFOISFT"));
    }

    #[test]
    fn test_list_text_is_capped() {
        let bytes = build_wav(&[(b"LIST", vec![b'x'; 1000]), (b"data", vec![])]);
        let info = parse(&bytes).unwrap();
        assert_eq!(info.custom_info.unwrap().len(), MAX_CUSTOM_INFO_LEN);
    }

    #[test]
    fn test_chunks_after_data_are_ignored() {
        let bytes = build_wav(&[
            (b"data", vec![0; 4]),
            (b"fmt ", fmt_payload(2, 44_100, 24, 0)),
        ]);
        let info = parse(&bytes).unwrap();
        assert_eq!(info.header_size, 20);
        assert_eq!(info.num_channels, 0);
        assert_eq!(info.sample_rate, 0);
    }

    #[test]
    fn test_too_small() {
        for len in 0..RIFF_HEADER_LEN {
            let bytes = vec![b'R'; len];
            assert_eq!(parse(&bytes), Err(WavError::TooSmall(len)));
        }
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = build_wav(&[(b"data", vec![])]);
        bytes[0] = b'X';
        assert_eq!(parse(&bytes), Err(WavError::NotARiffFile));

        let mut bytes = build_wav(&[(b"data", vec![])]);
        bytes[8..12].copy_from_slice(b"AVI ");
        assert_eq!(parse(&bytes), Err(WavError::NotWaveFormat));
    }

    #[test]
    fn test_truncated_fmt_degrades_to_zero_fields() {
        let mut bytes = build_wav(&[(b"fmt ", fmt_payload(1, 16_000, 16, 0))]);
        bytes.truncate(26); // cut inside the sample rate
        let info = parse(&bytes).unwrap();
        assert_eq!(info.num_channels, 1);
        assert_eq!(info.sample_rate, 0);
        assert_eq!(info.bits_per_sample, 0);
        assert_eq!(info.data_chunk_offset, None);
    }

    #[test]
    fn test_header_size_without_data_chunk_is_scan_offset() {
        let bytes = build_wav(&[(b"fmt ", fmt_payload(1, 16_000, 16, 0))]);
        let info = parse(&bytes).unwrap();
        assert_eq!(info.header_size, bytes.len());
        assert!(info.payload(&bytes).is_empty());
    }

    #[test]
    fn test_oversized_chunk_length_does_not_panic() {
        let mut bytes = build_wav(&[(b"junk", vec![0; 4]), (b"data", vec![0; 4])]);
        bytes[16..20].copy_from_slice(&u32::MAX.to_le_bytes());
        let info = parse(&bytes).unwrap();
        assert_eq!(info.data_chunk_offset, None);
    }

    #[test]
    fn test_header_size_fallback() {
        assert_eq!(header_size_or(b"not a wav file", 78, "bad"), 78);
        let bytes = build_wav(&[
            (b"fmt ", fmt_payload(1, 16_000, 16, 0)),
            (b"data", vec![0; 8]),
        ]);
        assert_eq!(header_size_or(&bytes, 78, "good"), 44);
    }

    #[test]
    fn test_hound_written_file() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..320i16 {
                writer.write_sample(i).unwrap();
            }
            writer.finalize().unwrap();
        }
        let bytes = cursor.into_inner();

        let info = parse(&bytes).unwrap();
        assert_eq!(info.header_size, info.data_chunk_offset.unwrap() + 8);
        assert_eq!(info.data_size, 640);
        assert_eq!(info.payload(&bytes).len(), 640);
        assert_eq!(info.sample_rate, 16_000);
    }
}
