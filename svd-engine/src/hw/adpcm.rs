//! IMA ADPCM block decoder used by the emulated coprocessor
//!
//! Block layout per channel: a 4-byte header (predictor `i16`, step index
//! `u8`, reserved `u8`) which is also the first output sample, followed by
//! 4-byte groups per channel of eight 4-bit codes, low nibble first.

use crate::error::{Error, Result};

const INDEX_TABLE: [i8; 16] = [-1, -1, -1, -1, 2, 4, 6, 8, -1, -1, -1, -1, 2, 4, 6, 8];

const STEP_TABLE: [i32; 89] = [
    7, 8, 9, 10, 11, 12, 13, 14, 16, 17, 19, 21, 23, 25, 28, 31, 34, 37, 41, 45, 50, 55, 60, 66,
    73, 80, 88, 97, 107, 118, 130, 143, 157, 173, 190, 209, 230, 253, 279, 307, 337, 371, 408,
    449, 494, 544, 598, 658, 724, 796, 876, 963, 1060, 1166, 1282, 1411, 1552, 1707, 1878, 2066,
    2272, 2499, 2749, 3024, 3327, 3660, 4026, 4428, 4871, 5358, 5894, 6484, 7132, 7845, 8630,
    9493, 10442, 11487, 12635, 13899, 15289, 16818, 18500, 20350, 22385, 24623, 27086, 29794,
    32767,
];

/// Predictor state of one channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ChannelState {
    predictor: i32,
    index: usize,
}

impl ChannelState {
    fn expand(&mut self, code: u8) -> i16 {
        let step = STEP_TABLE[self.index];
        let mut diff = step >> 3;
        if code & 4 != 0 {
            diff += step;
        }
        if code & 2 != 0 {
            diff += step >> 1;
        }
        if code & 1 != 0 {
            diff += step >> 2;
        }
        if code & 8 != 0 {
            self.predictor -= diff;
        } else {
            self.predictor += diff;
        }
        self.predictor = self.predictor.clamp(i16::MIN as i32, i16::MAX as i32);
        self.index = (self.index as i32 + INDEX_TABLE[(code & 0x0F) as usize] as i32)
            .clamp(0, STEP_TABLE.len() as i32 - 1) as usize;
        self.predictor as i16
    }
}

/// Frames decoded from one block
pub fn frames_per_block(block_align: usize, channels: usize) -> usize {
    if channels == 0 || block_align < 4 * channels {
        return 0;
    }
    (block_align - 4 * channels) * 2 / channels + 1
}

/// Decode one block into `out` (interleaved)
pub fn decode_block(block: &[u8], channels: usize, out: &mut Vec<i16>) -> Result<usize> {
    let fpb = frames_per_block(block.len(), channels);
    if fpb == 0 || (block.len() - 4 * channels) % (4 * channels) != 0 {
        return Err(Error::InvalidState(format!(
            "ADPCM block of {} bytes does not fit {} channels",
            block.len(),
            channels
        )));
    }

    let base = out.len();
    out.resize(base + fpb * channels, 0);

    let mut states = Vec::with_capacity(channels);
    for ch in 0..channels {
        let h = &block[ch * 4..ch * 4 + 4];
        let predictor = i16::from_le_bytes([h[0], h[1]]);
        if h[2] as usize >= STEP_TABLE.len() {
            return Err(Error::InvalidState(format!(
                "ADPCM step index {} out of range",
                h[2]
            )));
        }
        states.push(ChannelState {
            predictor: predictor as i32,
            index: h[2] as usize,
        });
        out[base + ch] = predictor;
    }

    let body = &block[4 * channels..];
    for (group, chunk) in body.chunks_exact(4 * channels).enumerate() {
        for (ch, state) in states.iter_mut().enumerate() {
            let bytes = &chunk[ch * 4..ch * 4 + 4];
            for (i, byte) in bytes.iter().enumerate() {
                for (half, code) in [byte & 0x0F, byte >> 4].into_iter().enumerate() {
                    let frame = 1 + group * 8 + i * 2 + half;
                    out[base + frame * channels + ch] = state.expand(code);
                }
            }
        }
    }
    Ok(fpb)
}

/// Decode `blocks` consecutive blocks of `block_align` bytes
pub fn decode_blocks(
    input: &[u8],
    blocks: usize,
    block_align: usize,
    channels: usize,
) -> Result<Vec<i16>> {
    if input.len() < blocks * block_align {
        return Err(Error::InvalidState(format!(
            "{} ADPCM blocks need {} bytes, got {}",
            blocks,
            blocks * block_align,
            input.len()
        )));
    }
    let fpb = frames_per_block(block_align, channels);
    let mut out = Vec::with_capacity(blocks * fpb * channels);
    for block in input.chunks_exact(block_align).take(blocks) {
        decode_block(block, channels, &mut out)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mono_block(predictor: i16, index: u8, body: &[u8]) -> Vec<u8> {
        let mut block = Vec::new();
        block.extend_from_slice(&predictor.to_le_bytes());
        block.push(index);
        block.push(0);
        block.extend_from_slice(body);
        block
    }

    #[test]
    fn test_frames_per_block() {
        assert_eq!(frames_per_block(36, 1), 65);
        assert_eq!(frames_per_block(1024, 2), 1017);
        assert_eq!(frames_per_block(2, 1), 0);
    }

    #[test]
    fn test_header_sample_and_nibble_arithmetic() {
        // Code 7 at step 7: 0 + 7 + 3 + 1 = 11; index moves to 8
        let block = mono_block(1000, 0, &[0x07, 0, 0, 0]);
        let mut out = Vec::new();
        assert_eq!(decode_block(&block, 1, &mut out).unwrap(), 9);
        assert_eq!(out[0], 1000);
        assert_eq!(out[1], 1011);
        // Code 0 at index 8 (step 16): diff 2
        assert_eq!(out[2], 1013);
    }

    #[test]
    fn test_negative_codes_clamp() {
        let block = mono_block(i16::MIN + 5, 88, &[0x0F, 0, 0, 0]);
        let mut out = Vec::new();
        decode_block(&block, 1, &mut out).unwrap();
        assert_eq!(out[1], i16::MIN);
    }

    #[test]
    fn test_zero_body_holds_predictor() {
        let block = mono_block(-300, 0, &[0u8; 32]);
        let out = decode_blocks(&block, 1, 36, 1).unwrap();
        assert_eq!(out.len(), 65);
        assert!(out.iter().all(|&s| s == -300));
    }

    #[test]
    fn test_stereo_groups_interleave() {
        let mut block = Vec::new();
        block.extend_from_slice(&[0x10, 0x00, 0, 0]); // left predictor 16
        block.extend_from_slice(&[0x20, 0x00, 0, 0]); // right predictor 32
        block.extend_from_slice(&[0x04, 0, 0, 0]); // left codes
        block.extend_from_slice(&[0x0C, 0, 0, 0]); // right codes
        let mut out = Vec::new();
        assert_eq!(decode_block(&block, 2, &mut out).unwrap(), 9);
        assert_eq!(&out[..2], &[16, 32]);
        // +7 on the left, -7 on the right
        assert_eq!(&out[2..4], &[23, 25]);
    }

    #[test]
    fn test_short_input_rejected() {
        assert!(decode_blocks(&[0u8; 40], 2, 36, 1).is_err());
        let mut out = Vec::new();
        assert!(decode_block(&[0u8; 35], 1, &mut out).is_err());
    }
}
