pub mod bridge;
pub mod callback;
pub mod codec;
pub mod config;
pub mod device;
pub mod driver;
pub mod error_fmt;
pub mod events;
pub mod format;
pub mod options;
pub mod session;
pub mod simulated;

pub use device::{BufferSizeInfo, ChannelInfo, DeviceCapabilities, DriverInfo};
pub use driver::{Driver, DriverLoader};
pub use format::SampleType;
pub use options::SessionOptions;
pub use session::{
    DriverSession, Geometry, LifecycleState, ShutdownReport, StepStatus, TeardownStep,
};
