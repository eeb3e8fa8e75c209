use crate::audio::ChannelBufferSet;
use crate::sink::{AdvisoryEvent, ChannelSlot, ProcessingSink};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Echoes inputs to outputs: output position `k` plays input `k mod n`.
///
/// With no inputs every output stays silent.
#[derive(Debug, Default)]
pub struct LoopbackSink {
    captured: ChannelBufferSet,
    overloads: Arc<AtomicU64>,
}

impl LoopbackSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared count of overload notifications seen by this sink.
    pub fn overload_counter(&self) -> Arc<AtomicU64> {
        self.overloads.clone()
    }
}

impl ProcessingSink for LoopbackSink {
    fn configure(&mut self, block_length: usize, inputs: usize, _outputs: usize) {
        self.captured.configure(block_length, inputs);
    }

    fn process_input(&mut self, slot: ChannelSlot, buffer: &[f32]) {
        if let Ok(dst) = self.captured.channel_mut(slot.position) {
            let n = dst.len().min(buffer.len());
            dst[..n].copy_from_slice(&buffer[..n]);
        }
    }

    fn process_output(&mut self, slot: ChannelSlot, buffer: &mut [f32]) {
        let inputs = self.captured.channel_count();
        if inputs == 0 {
            return;
        }
        if let Ok(src) = self.captured.channel(slot.position % inputs) {
            let n = src.len().min(buffer.len());
            buffer[..n].copy_from_slice(&src[..n]);
        }
    }

    fn handle_advisory_event(&mut self, event: AdvisoryEvent) {
        if event == AdvisoryEvent::Overload {
            self.overloads.fetch_add(1, Ordering::Relaxed);
        }
    }
}
