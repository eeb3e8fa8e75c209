//! Error taxonomy for driver sessions and sample bridging.

use crate::hw::error_fmt;
use crate::hw::format::SampleType;
use crate::hw::session::LifecycleState;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{precondition} (session is {state:?})")]
    State {
        precondition: Precondition,
        state: LifecycleState,
    },

    #[error("another driver session is already live in this process")]
    SessionInUse,

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("unsupported native sample format {0}")]
    UnsupportedFormat(SampleType),

    #[error("{what} index {index} out of range 0..{len}")]
    Range {
        what: &'static str,
        index: usize,
        len: usize,
    },

    #[error(
        "invalid block length {requested}: must lie in {min}..={max} with granularity {granularity}"
    )]
    BlockLength {
        requested: usize,
        min: usize,
        max: usize,
        granularity: isize,
    },

    #[error("real-time callback still in flight after {waited:?}")]
    CallbackTimeout { waited: Duration },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn is_state(&self) -> bool {
        matches!(self, Error::State { .. })
    }

    pub fn precondition(&self) -> Option<Precondition> {
        match self {
            Error::State { precondition, .. } => Some(*precondition),
            _ => None,
        }
    }
}

/// The lifecycle requirement a transition found violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    AlreadyLoaded,
    NotLoaded,
    AlreadyInitialized,
    NotInitialized,
    SinkAlreadyBound,
    SinkNotBound,
    BuffersPresent,
    BuffersAbsent,
    AlreadyRunning,
    NotRunning,
    SampleRateChanged,
}

impl fmt::Display for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Precondition::AlreadyLoaded => "driver already loaded",
            Precondition::NotLoaded => "driver not loaded",
            Precondition::AlreadyInitialized => "driver already initialized",
            Precondition::NotInitialized => "driver not initialized",
            Precondition::SinkAlreadyBound => "sink already bound",
            Precondition::SinkNotBound => "sink not bound",
            Precondition::BuffersPresent => "buffers already created",
            Precondition::BuffersAbsent => "buffers not created",
            Precondition::AlreadyRunning => "driver is already running",
            Precondition::NotRunning => "driver is not running",
            Precondition::SampleRateChanged => {
                "sample rate changed; re-initialize the driver"
            }
        };
        f.write_str(msg)
    }
}

/// Native driver status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorCode {
    NotPresent,
    HwMalfunction,
    InvalidParameter,
    InvalidMode,
    SpNotAdvancing,
    NoClock,
    NoMemory,
    Other(i32),
}

impl DriverErrorCode {
    pub fn from_native(code: i32) -> Self {
        match code {
            -1000 => DriverErrorCode::NotPresent,
            -999 => DriverErrorCode::HwMalfunction,
            -998 => DriverErrorCode::InvalidParameter,
            -997 => DriverErrorCode::InvalidMode,
            -996 => DriverErrorCode::SpNotAdvancing,
            -995 => DriverErrorCode::NoClock,
            -994 => DriverErrorCode::NoMemory,
            other => DriverErrorCode::Other(other),
        }
    }

    pub fn native(self) -> i32 {
        match self {
            DriverErrorCode::NotPresent => -1000,
            DriverErrorCode::HwMalfunction => -999,
            DriverErrorCode::InvalidParameter => -998,
            DriverErrorCode::InvalidMode => -997,
            DriverErrorCode::SpNotAdvancing => -996,
            DriverErrorCode::NoClock => -995,
            DriverErrorCode::NoMemory => -994,
            DriverErrorCode::Other(code) => code,
        }
    }
}

impl fmt::Display for DriverErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&error_fmt::status(self.native()))
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{op} failed: {code} ({reason})")]
pub struct DriverError {
    pub op: &'static str,
    pub code: DriverErrorCode,
    pub reason: String,
}

impl DriverError {
    pub fn new(op: &'static str, code: DriverErrorCode, reason: impl Into<String>) -> Self {
        Self {
            op,
            code,
            reason: reason.into(),
        }
    }

    pub fn native(op: &'static str, code: i32) -> Self {
        Self::new(
            op,
            DriverErrorCode::from_native(code),
            "driver returned an error status",
        )
    }
}
