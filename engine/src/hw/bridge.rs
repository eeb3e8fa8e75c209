//! Block conversion between a driver's native half-buffer and a float channel.

use crate::error::{Error, Result};
use crate::hw::codec::{SampleCodec, with_codec};
use crate::hw::format::SampleType;

fn check_len(hw_len: usize, samples: usize, width: usize) -> Result<usize> {
    let bytes = samples.saturating_mul(width);
    if hw_len < bytes {
        return Err(Error::Range {
            what: "hardware buffer byte",
            index: bytes - 1,
            len: hw_len,
        });
    }
    Ok(bytes)
}

#[inline]
fn decode_block<C: SampleCodec>(hw: &[u8], dst: &mut [f32]) {
    for (sample, word) in dst.iter_mut().zip(hw.chunks_exact(C::WIDTH)) {
        *sample = C::decode(word);
    }
}

#[inline]
fn encode_block<C: SampleCodec>(src: &[f32], hw: &mut [u8]) {
    for (sample, word) in src.iter().zip(hw.chunks_exact_mut(C::WIDTH)) {
        C::encode(*sample, word);
    }
}

/// Decode `dst.len()` native samples from `hw` into `dst`.
///
/// Returns the number of bytes consumed. The format is resolved once per
/// block, not per sample.
pub fn import(hw: &[u8], dst: &mut [f32], sample_type: SampleType) -> Result<usize> {
    with_codec!(sample_type, C => {
        let bytes = check_len(hw.len(), dst.len(), C::WIDTH)?;
        decode_block::<C>(&hw[..bytes], dst);
        bytes
    })
}

/// Encode every sample of `src` into `hw`, returning the bytes written.
pub fn export(src: &[f32], hw: &mut [u8], sample_type: SampleType) -> Result<usize> {
    with_codec!(sample_type, C => {
        let bytes = check_len(hw.len(), src.len(), C::WIDTH)?;
        encode_block::<C>(src, &mut hw[..bytes]);
        bytes
    })
}
