use crate::error::{Error, Result};

/// Per-direction float scratch storage: `channel_count` channels of
/// `block_length` samples each, laid out contiguously channel after channel.
///
/// Storage is allocated by [`ChannelBufferSet::configure`] on the control
/// thread. The callback path only reads and writes through slices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelBufferSet {
    samples: Vec<f32>,
    block_length: usize,
    channel_count: usize,
}

impl ChannelBufferSet {
    pub fn new(block_length: usize, channel_count: usize) -> Self {
        let mut set = Self::default();
        set.configure(block_length, channel_count);
        set
    }

    /// Resize to the given geometry and zero every sample.
    ///
    /// Zero channels is legal and leaves the set empty.
    pub fn configure(&mut self, block_length: usize, channel_count: usize) {
        self.samples.clear();
        self.samples.resize(block_length * channel_count, 0.0);
        self.block_length = block_length;
        self.channel_count = channel_count;
    }

    pub fn block_length(&self) -> usize {
        self.block_length
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn is_empty(&self) -> bool {
        self.channel_count == 0
    }

    fn span(&self, index: usize) -> Result<std::ops::Range<usize>> {
        if index >= self.channel_count {
            return Err(Error::Range {
                what: "channel",
                index,
                len: self.channel_count,
            });
        }
        let start = index * self.block_length;
        Ok(start..start + self.block_length)
    }

    pub fn channel(&self, index: usize) -> Result<&[f32]> {
        let span = self.span(index)?;
        Ok(&self.samples[span])
    }

    pub fn channel_mut(&mut self, index: usize) -> Result<&mut [f32]> {
        let span = self.span(index)?;
        Ok(&mut self.samples[span])
    }

    pub fn channels(&self) -> impl Iterator<Item = &[f32]> {
        // chunks_exact panics on a zero chunk size
        self.samples.chunks_exact(self.block_length.max(1))
    }

    pub fn channels_mut(&mut self) -> impl Iterator<Item = &mut [f32]> {
        self.samples.chunks_exact_mut(self.block_length.max(1))
    }

    pub fn fill(&mut self, value: f32) {
        self.samples.fill(value);
    }

    /// Copy every channel of `other` into `self`. Geometry must match.
    pub fn copy_from(&mut self, other: &ChannelBufferSet) -> Result<()> {
        if other.block_length != self.block_length || other.channel_count != self.channel_count
        {
            return Err(Error::Range {
                what: "channel",
                index: other.channel_count,
                len: self.channel_count,
            });
        }
        self.samples.copy_from_slice(&other.samples);
        Ok(())
    }

    /// Whole backing store, channel-major.
    pub fn as_slice(&self) -> &[f32] {
        &self.samples
    }
}
