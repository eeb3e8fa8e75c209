pub mod buffers;

pub use buffers::ChannelBufferSet;
