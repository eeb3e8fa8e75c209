#![allow(dead_code)]

use rtbridge_engine::hw::simulated::{SimulatedHandle, SimulatedLoader, SimulatedSpec};
use rtbridge_engine::hw::{DriverSession, SessionOptions};
use rtbridge_engine::sink::{AdvisoryEvent, ChannelSlot, ProcessingSink};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

static SERIAL: Mutex<()> = Mutex::new(());

/// Sessions are process-wide; tests that acquire one take this first.
pub fn serial() -> MutexGuard<'static, ()> {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
    SERIAL.lock().unwrap_or_else(|e| e.into_inner())
}

pub fn options() -> SessionOptions {
    SessionOptions {
        stop_timeout: Duration::from_millis(200),
        event_capacity: 64,
    }
}

pub fn rig(spec: SimulatedSpec) -> (DriverSession, SimulatedHandle) {
    rig_with(spec, options())
}

pub fn rig_with(spec: SimulatedSpec, options: SessionOptions) -> (DriverSession, SimulatedHandle) {
    let mut loader = SimulatedLoader::new();
    let name = spec.name.clone();
    let device = loader.add(spec);
    let mut session = DriverSession::acquire_with_options(loader, options).unwrap();
    session.load(&name).unwrap();
    (session, device)
}

/// Session in `HandlersBound` with `sink`.
pub fn bound(
    spec: SimulatedSpec,
    sink: impl ProcessingSink + 'static,
) -> (DriverSession, SimulatedHandle) {
    let (mut session, device) = rig(spec);
    session.initialize().unwrap();
    session.bind_sink(Box::new(sink)).unwrap();
    (session, device)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Configure {
        block_length: usize,
        inputs: usize,
        outputs: usize,
    },
    Input {
        slot: ChannelSlot,
        len: usize,
    },
    Output {
        slot: ChannelSlot,
        len: usize,
    },
    Advisory(AdvisoryEvent),
}

/// Logs every sink call and writes a constant into outputs.
#[derive(Clone)]
pub struct RecordingSink {
    pub log: Arc<Mutex<Vec<Call>>>,
    pub level: f32,
}

impl RecordingSink {
    pub fn new(level: f32) -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            level,
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.log.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.log.lock().unwrap().clear();
    }

    pub fn block_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Input { .. } | Call::Output { .. }))
            .collect()
    }

    pub fn advisories(&self) -> Vec<AdvisoryEvent> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Advisory(event) => Some(event),
                _ => None,
            })
            .collect()
    }
}

impl ProcessingSink for RecordingSink {
    fn configure(&mut self, block_length: usize, inputs: usize, outputs: usize) {
        self.log.lock().unwrap().push(Call::Configure {
            block_length,
            inputs,
            outputs,
        });
    }

    fn process_input(&mut self, slot: ChannelSlot, buffer: &[f32]) {
        self.log.lock().unwrap().push(Call::Input {
            slot,
            len: buffer.len(),
        });
    }

    fn process_output(&mut self, slot: ChannelSlot, buffer: &mut [f32]) {
        buffer.fill(self.level);
        self.log.lock().unwrap().push(Call::Output {
            slot,
            len: buffer.len(),
        });
    }

    fn handle_advisory_event(&mut self, event: AdvisoryEvent) {
        self.log.lock().unwrap().push(Call::Advisory(event));
    }
}

pub fn slot(position: usize, channel: usize) -> ChannelSlot {
    ChannelSlot { position, channel }
}
