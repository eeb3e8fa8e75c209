//! Plugin-hosting sink.
//!
//! A loaded plugin is adapted to [`Effect`]; the sink gathers every input
//! channel of a block, runs the chain once, then serves processed output
//! channels.

use crate::audio::ChannelBufferSet;
use crate::sink::{AdvisoryEvent, ChannelSlot, ProcessingSink};
use tracing::debug;

pub trait Effect: Send {
    fn name(&self) -> &str;

    /// Control thread, before the first block of a geometry.
    fn prepare(&mut self, sample_rate: f64, block_length: usize, inputs: usize, outputs: usize);

    /// Real-time thread. `output` arrives zeroed with the sink's output
    /// channel count.
    fn process(&mut self, input: &ChannelBufferSet, output: &mut ChannelBufferSet);

    fn reset(&mut self) {}
}

#[derive(Default)]
pub struct EffectChain {
    effects: Vec<Box<dyn Effect>>,
}

impl EffectChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, effect: Box<dyn Effect>) {
        self.effects.push(effect);
    }

    pub fn with(mut self, effect: impl Effect + 'static) -> Self {
        self.push(Box::new(effect));
        self
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.effects.iter().map(|e| e.name())
    }
}

pub struct EffectSink {
    chain: EffectChain,
    sample_rate: f64,
    inputs: ChannelBufferSet,
    outputs: ChannelBufferSet,
    scratch: ChannelBufferSet,
    pending: bool,
}

impl EffectSink {
    pub fn new(chain: EffectChain, sample_rate: f64) -> Self {
        Self {
            chain,
            sample_rate,
            inputs: ChannelBufferSet::default(),
            outputs: ChannelBufferSet::default(),
            scratch: ChannelBufferSet::default(),
            pending: false,
        }
    }

    pub fn chain(&self) -> &EffectChain {
        &self.chain
    }

    fn run_chain(&mut self) {
        self.outputs.fill(0.0);
        let mut effects = self.chain.effects.iter_mut();
        let Some(first) = effects.next() else {
            for (position, out) in self.outputs.channels_mut().enumerate() {
                if let Ok(src) = self.inputs.channel(position) {
                    out.copy_from_slice(src);
                }
            }
            return;
        };
        first.process(&self.inputs, &mut self.outputs);
        for effect in effects {
            std::mem::swap(&mut self.outputs, &mut self.scratch);
            self.outputs.fill(0.0);
            effect.process(&self.scratch, &mut self.outputs);
        }
    }
}

impl ProcessingSink for EffectSink {
    fn configure(&mut self, block_length: usize, inputs: usize, outputs: usize) {
        self.inputs.configure(block_length, inputs);
        self.outputs.configure(block_length, outputs);
        self.scratch.configure(block_length, outputs);
        self.pending = false;
        for effect in &mut self.chain.effects {
            debug!("Preparing effect {} for {block_length} frames", effect.name());
            effect.prepare(self.sample_rate, block_length, inputs, outputs);
        }
    }

    fn process_input(&mut self, slot: ChannelSlot, buffer: &[f32]) {
        if let Ok(dst) = self.inputs.channel_mut(slot.position) {
            let n = dst.len().min(buffer.len());
            dst[..n].copy_from_slice(&buffer[..n]);
        }
        self.pending = true;
    }

    fn process_output(&mut self, slot: ChannelSlot, buffer: &mut [f32]) {
        if self.pending || slot.position == 0 {
            self.run_chain();
            self.pending = false;
        }
        if let Ok(src) = self.outputs.channel(slot.position) {
            let n = src.len().min(buffer.len());
            buffer[..n].copy_from_slice(&src[..n]);
        }
    }

    fn handle_advisory_event(&mut self, event: AdvisoryEvent) {
        match event {
            AdvisoryEvent::ResetRequest => {
                for effect in &mut self.chain.effects {
                    effect.reset();
                }
            }
            AdvisoryEvent::SampleRateChanged { rate } => self.sample_rate = rate,
            AdvisoryEvent::Overload | AdvisoryEvent::LatenciesChanged => {}
        }
    }
}

/// Constant gain applied position-wise; extra outputs stay silent.
#[derive(Debug, Clone, Copy)]
pub struct Gain {
    pub factor: f32,
}

impl Effect for Gain {
    fn name(&self) -> &str {
        "gain"
    }

    fn prepare(&mut self, _sample_rate: f64, _block: usize, _inputs: usize, _outputs: usize) {}

    fn process(&mut self, input: &ChannelBufferSet, output: &mut ChannelBufferSet) {
        for (src, dst) in input.channels().zip(output.channels_mut()) {
            for (s, d) in src.iter().zip(dst.iter_mut()) {
                *d = s * self.factor;
            }
        }
    }
}
