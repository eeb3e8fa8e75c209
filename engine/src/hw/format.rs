use serde::{Deserialize, Serialize};
use std::fmt;

/// Native per-channel sample encodings a driver may report.
///
/// Discriminants are the driver ABI codes. `Lsb` variants are little-endian,
/// `Msb` variants big-endian. The `Int32*16..24` variants carry fewer valid
/// bits inside a 32-bit container, right aligned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleType {
    Int16Msb = 0,
    Int24Msb = 1,
    Int32Msb = 2,
    Float32Msb = 3,
    Float64Msb = 4,
    Int32Msb16 = 8,
    Int32Msb18 = 9,
    Int32Msb20 = 10,
    Int32Msb24 = 11,
    Int16Lsb = 16,
    Int24Lsb = 17,
    Int32Lsb = 18,
    Float32Lsb = 19,
    Float64Lsb = 20,
    Int32Lsb16 = 24,
    Int32Lsb18 = 25,
    Int32Lsb20 = 26,
    Int32Lsb24 = 27,
    DsdInt8Lsb1 = 32,
    DsdInt8Msb1 = 33,
    DsdInt8Ner8 = 40,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ByteOrder {
    Little,
    Big,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encoding {
    Integer,
    Float,
    Dsd,
}

/// Width, byte order and validity of one native sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatDescriptor {
    pub encoding: Encoding,
    pub container_bytes: usize,
    pub valid_bits: u32,
    pub byte_order: ByteOrder,
}

impl SampleType {
    pub const ALL: [SampleType; 21] = [
        SampleType::Int16Msb,
        SampleType::Int24Msb,
        SampleType::Int32Msb,
        SampleType::Float32Msb,
        SampleType::Float64Msb,
        SampleType::Int32Msb16,
        SampleType::Int32Msb18,
        SampleType::Int32Msb20,
        SampleType::Int32Msb24,
        SampleType::Int16Lsb,
        SampleType::Int24Lsb,
        SampleType::Int32Lsb,
        SampleType::Float32Lsb,
        SampleType::Float64Lsb,
        SampleType::Int32Lsb16,
        SampleType::Int32Lsb18,
        SampleType::Int32Lsb20,
        SampleType::Int32Lsb24,
        SampleType::DsdInt8Lsb1,
        SampleType::DsdInt8Msb1,
        SampleType::DsdInt8Ner8,
    ];

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.code() == code)
    }

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn descriptor(self) -> FormatDescriptor {
        use ByteOrder::{Big, Little};
        use Encoding::{Dsd, Float, Integer};
        let (encoding, container_bytes, valid_bits, byte_order) = match self {
            SampleType::Int16Msb => (Integer, 2, 16, Big),
            SampleType::Int24Msb => (Integer, 3, 24, Big),
            SampleType::Int32Msb => (Integer, 4, 32, Big),
            SampleType::Float32Msb => (Float, 4, 32, Big),
            SampleType::Float64Msb => (Float, 8, 64, Big),
            SampleType::Int32Msb16 => (Integer, 4, 16, Big),
            SampleType::Int32Msb18 => (Integer, 4, 18, Big),
            SampleType::Int32Msb20 => (Integer, 4, 20, Big),
            SampleType::Int32Msb24 => (Integer, 4, 24, Big),
            SampleType::Int16Lsb => (Integer, 2, 16, Little),
            SampleType::Int24Lsb => (Integer, 3, 24, Little),
            SampleType::Int32Lsb => (Integer, 4, 32, Little),
            SampleType::Float32Lsb => (Float, 4, 32, Little),
            SampleType::Float64Lsb => (Float, 8, 64, Little),
            SampleType::Int32Lsb16 => (Integer, 4, 16, Little),
            SampleType::Int32Lsb18 => (Integer, 4, 18, Little),
            SampleType::Int32Lsb20 => (Integer, 4, 20, Little),
            SampleType::Int32Lsb24 => (Integer, 4, 24, Little),
            SampleType::DsdInt8Lsb1 => (Dsd, 1, 1, Little),
            SampleType::DsdInt8Msb1 => (Dsd, 1, 1, Big),
            SampleType::DsdInt8Ner8 => (Dsd, 1, 8, Little),
        };
        FormatDescriptor {
            encoding,
            container_bytes,
            valid_bits,
            byte_order,
        }
    }

    pub fn bytes_per_sample(self) -> usize {
        self.descriptor().container_bytes
    }

    /// Whether the codec can bridge this format.
    pub fn is_supported(self) -> bool {
        !matches!(
            self,
            SampleType::Int24Msb
                | SampleType::Int24Lsb
                | SampleType::DsdInt8Lsb1
                | SampleType::DsdInt8Msb1
                | SampleType::DsdInt8Ner8
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            SampleType::Int16Msb => "Int16MSB",
            SampleType::Int24Msb => "Int24MSB",
            SampleType::Int32Msb => "Int32MSB",
            SampleType::Float32Msb => "Float32MSB",
            SampleType::Float64Msb => "Float64MSB",
            SampleType::Int32Msb16 => "Int32MSB16",
            SampleType::Int32Msb18 => "Int32MSB18",
            SampleType::Int32Msb20 => "Int32MSB20",
            SampleType::Int32Msb24 => "Int32MSB24",
            SampleType::Int16Lsb => "Int16LSB",
            SampleType::Int24Lsb => "Int24LSB",
            SampleType::Int32Lsb => "Int32LSB",
            SampleType::Float32Lsb => "Float32LSB",
            SampleType::Float64Lsb => "Float64LSB",
            SampleType::Int32Lsb16 => "Int32LSB16",
            SampleType::Int32Lsb18 => "Int32LSB18",
            SampleType::Int32Lsb20 => "Int32LSB20",
            SampleType::Int32Lsb24 => "Int32LSB24",
            SampleType::DsdInt8Lsb1 => "DSDInt8LSB1",
            SampleType::DsdInt8Msb1 => "DSDInt8MSB1",
            SampleType::DsdInt8Ner8 => "DSDInt8NER8",
        }
    }
}

impl fmt::Display for SampleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
