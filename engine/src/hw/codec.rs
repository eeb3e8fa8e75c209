//! Conversion between native driver sample words and normalized `f32`.
//!
//! Integer formats map the full signed range onto `[-1.0, 1.0]` by dividing
//! by `2^(bits-1) - 1`. Encoding multiplies back, rounds to nearest and
//! saturates, so out-of-range floats clip instead of wrapping. NaN encodes
//! as silence.

use crate::error::{Error, Result};
use crate::hw::format::SampleType;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use std::marker::PhantomData;

pub trait SampleCodec {
    /// Container width in bytes.
    const WIDTH: usize;

    /// Decode one sample from the first `WIDTH` bytes of `src`.
    fn decode(src: &[u8]) -> f32;

    /// Encode one sample into the first `WIDTH` bytes of `dst`.
    fn encode(value: f32, dst: &mut [u8]);
}

pub struct Int16<E>(PhantomData<E>);

/// Signed integer in a 32-bit container with `BITS` valid bits, right aligned.
pub struct Int32<E, const BITS: u32>(PhantomData<E>);

pub struct Float32<E>(PhantomData<E>);

pub struct Float64<E>(PhantomData<E>);

impl<E: ByteOrder> SampleCodec for Int16<E> {
    const WIDTH: usize = 2;

    #[inline]
    fn decode(src: &[u8]) -> f32 {
        E::read_i16(src) as f32 / i16::MAX as f32
    }

    #[inline]
    fn encode(value: f32, dst: &mut [u8]) {
        // float -> int `as` casts saturate and map NaN to 0
        E::write_i16(dst, (value * i16::MAX as f32).round() as i16);
    }
}

impl<E, const BITS: u32> Int32<E, BITS> {
    const MAX: i64 = (1i64 << (BITS - 1)) - 1;
    const MIN: i64 = -(1i64 << (BITS - 1));
}

impl<E: ByteOrder, const BITS: u32> SampleCodec for Int32<E, BITS> {
    const WIDTH: usize = 4;

    #[inline]
    fn decode(src: &[u8]) -> f32 {
        (E::read_i32(src) as f64 / Self::MAX as f64) as f32
    }

    #[inline]
    fn encode(value: f32, dst: &mut [u8]) {
        let scaled = (value as f64 * Self::MAX as f64).round();
        let word = if scaled.is_nan() {
            0
        } else {
            scaled.clamp(Self::MIN as f64, Self::MAX as f64) as i32
        };
        E::write_i32(dst, word);
    }
}

impl<E: ByteOrder> SampleCodec for Float32<E> {
    const WIDTH: usize = 4;

    #[inline]
    fn decode(src: &[u8]) -> f32 {
        E::read_f32(src)
    }

    #[inline]
    fn encode(value: f32, dst: &mut [u8]) {
        E::write_f32(dst, value);
    }
}

impl<E: ByteOrder> SampleCodec for Float64<E> {
    const WIDTH: usize = 8;

    #[inline]
    fn decode(src: &[u8]) -> f32 {
        E::read_f64(src) as f32
    }

    #[inline]
    fn encode(value: f32, dst: &mut [u8]) {
        E::write_f64(dst, value as f64);
    }
}

/// Resolve `$sample_type` to its codec once, bind it to `$codec` and
/// evaluate `$body`. Evaluates to `Result<_>`; formats without a codec
/// yield `Error::UnsupportedFormat`.
macro_rules! with_codec {
    ($sample_type:expr, $codec:ident => $body:expr) => {{
        use $crate::hw::codec::{Float32, Float64, Int16, Int32};
        use $crate::hw::format::SampleType as St;
        use byteorder::{BigEndian as Be, LittleEndian as Le};
        match $sample_type {
            St::Int16Lsb => {
                type $codec = Int16<Le>;
                Ok($body)
            }
            St::Int16Msb => {
                type $codec = Int16<Be>;
                Ok($body)
            }
            St::Int32Lsb => {
                type $codec = Int32<Le, 32>;
                Ok($body)
            }
            St::Int32Msb => {
                type $codec = Int32<Be, 32>;
                Ok($body)
            }
            St::Int32Lsb16 => {
                type $codec = Int32<Le, 16>;
                Ok($body)
            }
            St::Int32Msb16 => {
                type $codec = Int32<Be, 16>;
                Ok($body)
            }
            St::Int32Lsb18 => {
                type $codec = Int32<Le, 18>;
                Ok($body)
            }
            St::Int32Msb18 => {
                type $codec = Int32<Be, 18>;
                Ok($body)
            }
            St::Int32Lsb20 => {
                type $codec = Int32<Le, 20>;
                Ok($body)
            }
            St::Int32Msb20 => {
                type $codec = Int32<Be, 20>;
                Ok($body)
            }
            St::Int32Lsb24 => {
                type $codec = Int32<Le, 24>;
                Ok($body)
            }
            St::Int32Msb24 => {
                type $codec = Int32<Be, 24>;
                Ok($body)
            }
            St::Float32Lsb => {
                type $codec = Float32<Le>;
                Ok($body)
            }
            St::Float32Msb => {
                type $codec = Float32<Be>;
                Ok($body)
            }
            St::Float64Lsb => {
                type $codec = Float64<Le>;
                Ok($body)
            }
            St::Float64Msb => {
                type $codec = Float64<Be>;
                Ok($body)
            }
            other => Err($crate::error::Error::UnsupportedFormat(other)),
        }
    }};
}

pub(crate) use with_codec;

fn short(len: usize, width: usize) -> Error {
    Error::Range {
        what: "sample byte",
        index: width - 1,
        len,
    }
}

/// Decode a single native sample.
pub fn decode(src: &[u8], sample_type: SampleType) -> Result<f32> {
    with_codec!(sample_type, C => {
        if src.len() < C::WIDTH {
            return Err(short(src.len(), C::WIDTH));
        }
        C::decode(src)
    })
}

/// Encode a single sample, returning the number of bytes written.
pub fn encode(value: f32, sample_type: SampleType, dst: &mut [u8]) -> Result<usize> {
    with_codec!(sample_type, C => {
        if dst.len() < C::WIDTH {
            return Err(short(dst.len(), C::WIDTH));
        }
        C::encode(value, dst);
        C::WIDTH
    })
}

pub type Int16Lsb = Int16<LittleEndian>;
pub type Int16Msb = Int16<BigEndian>;
pub type Int32Lsb = Int32<LittleEndian, 32>;
pub type Int32Msb = Int32<BigEndian, 32>;
