use crate::error::{Error, Result};
use crate::hw::format::SampleType;
use serde::Serialize;
use std::fmt;

/// Identity reported by a driver when it is initialized.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriverInfo {
    pub name: String,
    pub version: i64,
    pub error_message: String,
}

impl fmt::Display for DriverInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (version {})", self.name, self.version)?;
        if !self.error_message.is_empty() {
            write!(f, ": {}", self.error_message)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelInfo {
    pub channel: usize,
    pub is_input: bool,
    pub is_active: bool,
    pub group: i64,
    pub sample_type: SampleType,
    pub name: String,
}

/// Block lengths a driver accepts.
///
/// `granularity > 0` allows multiples of it within bounds; `-1` allows
/// powers of two; `0` only allows `min` (which then equals `max`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BufferSizeInfo {
    pub min: usize,
    pub max: usize,
    pub preferred: usize,
    pub granularity: isize,
}

impl BufferSizeInfo {
    pub fn fixed(len: usize) -> Self {
        Self {
            min: len,
            max: len,
            preferred: len,
            granularity: 0,
        }
    }

    pub fn accepts(&self, len: usize) -> bool {
        if len < self.min || len > self.max {
            return false;
        }
        match self.granularity {
            0 => len == self.min,
            -1 => len.is_power_of_two(),
            g if g > 0 => len % g as usize == 0,
            _ => false,
        }
    }

    pub fn validate(&self, len: usize) -> Result<usize> {
        if self.accepts(len) {
            Ok(len)
        } else {
            Err(Error::BlockLength {
                requested: len,
                min: self.min,
                max: self.max,
                granularity: self.granularity,
            })
        }
    }
}

/// Snapshot of a driver's channel and clock configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceCapabilities {
    pub input_channels: usize,
    pub output_channels: usize,
    pub inputs: Vec<ChannelInfo>,
    pub outputs: Vec<ChannelInfo>,
    pub buffer_size: BufferSizeInfo,
    pub sample_rate: f64,
    pub post_output: bool,
}

impl DeviceCapabilities {
    pub fn channel(&self, channel: usize, is_input: bool) -> Result<&ChannelInfo> {
        let list = if is_input { &self.inputs } else { &self.outputs };
        list.get(channel).ok_or(Error::Range {
            what: if is_input { "input channel" } else { "output channel" },
            index: channel,
            len: list.len(),
        })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for DeviceCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Sample rate: {}", self.sample_rate)?;
        let b = &self.buffer_size;
        writeln!(
            f,
            "Buffer size: min {} max {} preferred {} granularity {}",
            b.min, b.max, b.preferred, b.granularity
        )?;
        writeln!(f, "Output ready supported: {}", self.post_output)?;
        writeln!(f, "Inputs: {}", self.input_channels)?;
        for c in &self.inputs {
            writeln!(f, "  [{}] {} {} group {}", c.channel, c.name, c.sample_type, c.group)?;
        }
        writeln!(f, "Outputs: {}", self.output_channels)?;
        for c in &self.outputs {
            writeln!(f, "  [{}] {} {} group {}", c.channel, c.name, c.sample_type, c.group)?;
        }
        Ok(())
    }
}
