pub mod audio;
mod cell;
pub mod error;
pub mod hw;
pub mod sink;

pub use audio::ChannelBufferSet;
pub use error::{DriverError, DriverErrorCode, Error, Precondition, Result};
pub use hw::{DriverSession, LifecycleState};
pub use sink::{AdvisoryEvent, ChannelSlot, NullSink, ProcessingSink};
