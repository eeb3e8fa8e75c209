//! Per-block consumers of bridged audio.

pub mod effect;
pub mod loopback;

pub use effect::{Effect, EffectChain, EffectSink, Gain};
pub use loopback::LoopbackSink;

/// Where a channel sits in the negotiated geometry.
///
/// `position` indexes the negotiated list for its direction (inputs and
/// outputs count separately); `channel` is the driver's channel id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSlot {
    pub position: usize,
    pub channel: usize,
}

/// Driver notifications that should influence policy but never stop
/// processing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AdvisoryEvent {
    Overload,
    ResetRequest,
    LatenciesChanged,
    SampleRateChanged { rate: f64 },
}

/// Receives every negotiated channel once per block.
///
/// `configure` runs on the control thread when buffers are created. All
/// other calls run on the driver's real-time thread: inputs first in
/// negotiated order, then outputs. Implementations must not allocate, lock
/// or block outside `configure`.
pub trait ProcessingSink: Send {
    fn configure(&mut self, block_length: usize, inputs: usize, outputs: usize);

    fn process_input(&mut self, slot: ChannelSlot, buffer: &[f32]);

    /// `buffer` arrives zeroed.
    fn process_output(&mut self, slot: ChannelSlot, buffer: &mut [f32]);

    /// Delivered at the start of the next block, or when buffers are
    /// disposed if no block follows.
    fn handle_advisory_event(&mut self, _event: AdvisoryEvent) {}
}

/// Consumes inputs and leaves outputs silent.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProcessingSink for NullSink {
    fn configure(&mut self, _block_length: usize, _inputs: usize, _outputs: usize) {}

    fn process_input(&mut self, _slot: ChannelSlot, _buffer: &[f32]) {}

    fn process_output(&mut self, _slot: ChannelSlot, _buffer: &mut [f32]) {}
}
