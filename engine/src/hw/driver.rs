//! Interfaces to the external driver and loader services.
//!
//! A [`Driver`] is a loaded hardware driver. Its calls mirror the native
//! driver API one to one, so each may fail with a [`DriverError`] carrying
//! the native status code. Callbacks are plain function pointers with no
//! user context, which is why the session routes them through the
//! process-wide table in [`crate::hw::callback`].

use crate::error::DriverError;
use crate::hw::device::{BufferSizeInfo, ChannelInfo, DriverInfo};
use std::sync::Arc;

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// One negotiated channel as handed to [`Driver::create_buffers`].
///
/// The driver fills `buffers` with the two halves of its ping-pong memory
/// for this channel. The pointers stay owned by the driver and are valid
/// until [`Driver::dispose_buffers`].
#[derive(Debug, Clone, Copy)]
pub struct BufferInfo {
    pub is_input: bool,
    pub channel: usize,
    pub buffers: [*mut u8; 2],
}

impl BufferInfo {
    pub fn new(is_input: bool, channel: usize) -> Self {
        Self {
            is_input,
            channel,
            buffers: [std::ptr::null_mut(); 2],
        }
    }
}

/// Selectors carried by the driver's message callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSelector {
    SelectorSupported,
    EngineVersion,
    ResetRequest,
    BufferSizeChange,
    ResyncRequest,
    LatenciesChanged,
    SupportsTimeInfo,
    SupportsTimeCode,
    MmcCommand,
    SupportsInputMonitor,
    SupportsInputGain,
    SupportsInputMeter,
    SupportsOutputGain,
    SupportsOutputMeter,
    Overload,
    Other(i64),
}

impl MessageSelector {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => MessageSelector::SelectorSupported,
            2 => MessageSelector::EngineVersion,
            3 => MessageSelector::ResetRequest,
            4 => MessageSelector::BufferSizeChange,
            5 => MessageSelector::ResyncRequest,
            6 => MessageSelector::LatenciesChanged,
            7 => MessageSelector::SupportsTimeInfo,
            8 => MessageSelector::SupportsTimeCode,
            9 => MessageSelector::MmcCommand,
            10 => MessageSelector::SupportsInputMonitor,
            11 => MessageSelector::SupportsInputGain,
            12 => MessageSelector::SupportsInputMeter,
            13 => MessageSelector::SupportsOutputGain,
            14 => MessageSelector::SupportsOutputMeter,
            15 => MessageSelector::Overload,
            other => MessageSelector::Other(other),
        }
    }

    pub fn code(self) -> i64 {
        match self {
            MessageSelector::SelectorSupported => 1,
            MessageSelector::EngineVersion => 2,
            MessageSelector::ResetRequest => 3,
            MessageSelector::BufferSizeChange => 4,
            MessageSelector::ResyncRequest => 5,
            MessageSelector::LatenciesChanged => 6,
            MessageSelector::SupportsTimeInfo => 7,
            MessageSelector::SupportsTimeCode => 8,
            MessageSelector::MmcCommand => 9,
            MessageSelector::SupportsInputMonitor => 10,
            MessageSelector::SupportsInputGain => 11,
            MessageSelector::SupportsInputMeter => 12,
            MessageSelector::SupportsOutputGain => 13,
            MessageSelector::SupportsOutputMeter => 14,
            MessageSelector::Overload => 15,
            MessageSelector::Other(code) => code,
        }
    }
}

/// Callback table installed with [`Driver::create_buffers`].
#[derive(Debug, Clone, Copy)]
pub struct DriverCallbacks {
    /// Block boundary: `(buffer_index, direct_process)`.
    pub buffer_switch: fn(usize, bool),
    pub sample_rate_changed: fn(f64),
    /// `(selector, value) -> answer`.
    pub message: fn(MessageSelector, i64) -> i64,
}

/// "Output consumed" acknowledgement some drivers expect after every block.
pub trait OutputReady: Send + Sync {
    fn signal(&self);
}

pub trait Driver: Send {
    fn init(&mut self) -> DriverResult<DriverInfo>;
    fn exit(&mut self) -> DriverResult<()>;

    /// `(inputs, outputs)`.
    fn channel_counts(&self) -> DriverResult<(usize, usize)>;
    fn channel_info(&self, channel: usize, is_input: bool) -> DriverResult<ChannelInfo>;
    fn buffer_size(&self) -> DriverResult<BufferSizeInfo>;
    fn sample_rate(&self) -> DriverResult<f64>;

    /// `Some` when the driver wants [`OutputReady::signal`] after each block.
    fn output_ready(&self) -> Option<Arc<dyn OutputReady>>;

    fn create_buffers(
        &mut self,
        buffers: &mut [BufferInfo],
        block_length: usize,
        callbacks: DriverCallbacks,
    ) -> DriverResult<()>;
    fn dispose_buffers(&mut self) -> DriverResult<()>;

    /// Once `stop` returns no further callback may be issued.
    fn start(&mut self) -> DriverResult<()>;
    fn stop(&mut self) -> DriverResult<()>;
}

/// Driver discovery and loading service.
pub trait DriverLoader: Send {
    fn list_drivers(&self, max_count: usize) -> Vec<String>;
    fn load(&mut self, name: &str) -> DriverResult<Box<dyn Driver>>;
    fn unload(&mut self, driver: Box<dyn Driver>) -> DriverResult<()>;
}
