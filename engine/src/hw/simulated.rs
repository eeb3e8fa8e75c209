//! Software driver with driver-owned ping-pong memory.
//!
//! A [`SimClock::Manual`] device only calls back when the test asks via
//! [`SimulatedHandle::fire`]. A [`SimClock::Realtime`] device runs its own
//! block-rate thread that feeds a sine into every input channel.

use crate::error::{DriverError, DriverErrorCode};
use crate::hw::codec;
use crate::hw::config::{RT_PRIORITY_ENV, env_flag};
use crate::hw::device::{BufferSizeInfo, ChannelInfo, DriverInfo};
use crate::hw::driver::{
    BufferInfo, Driver, DriverCallbacks, DriverLoader, DriverResult, MessageSelector, OutputReady,
};
use crate::hw::format::SampleType;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimClock {
    Manual,
    Realtime,
}

/// Driver operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    Load,
    Init,
    ChannelInfo,
    CreateBuffers,
    Start,
    Stop,
    DisposeBuffers,
    Exit,
    Unload,
}

#[derive(Debug, Clone)]
pub struct SimulatedSpec {
    pub name: String,
    pub version: i64,
    pub inputs: Vec<(String, SampleType)>,
    pub outputs: Vec<(String, SampleType)>,
    pub buffer_size: BufferSizeInfo,
    pub sample_rate: f64,
    pub post_output: bool,
    pub clock: SimClock,
}

impl SimulatedSpec {
    /// Stereo in and out, `Int32Lsb`, 32..=2048 frames in steps of 32.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: 1,
            inputs: stereo("In", SampleType::Int32Lsb),
            outputs: stereo("Out", SampleType::Int32Lsb),
            buffer_size: BufferSizeInfo {
                min: 32,
                max: 2048,
                preferred: 256,
                granularity: 32,
            },
            sample_rate: 48_000.0,
            post_output: true,
            clock: SimClock::Manual,
        }
    }

    pub fn inputs(mut self, inputs: Vec<(String, SampleType)>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn outputs(mut self, outputs: Vec<(String, SampleType)>) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn buffer_size(mut self, buffer_size: BufferSizeInfo) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn sample_rate(mut self, sample_rate: f64) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn post_output(mut self, post_output: bool) -> Self {
        self.post_output = post_output;
        self
    }

    pub fn clock(mut self, clock: SimClock) -> Self {
        self.clock = clock;
        self
    }
}

fn stereo(prefix: &str, sample_type: SampleType) -> Vec<(String, SampleType)> {
    (1..=2).map(|i| (format!("{prefix} {i}"), sample_type)).collect()
}

struct ChannelMemory {
    is_input: bool,
    channel: usize,
    sample_type: SampleType,
    halves: [Vec<u8>; 2],
}

#[derive(Default)]
struct Inner {
    faults: HashSet<FaultPoint>,
    calls: Vec<&'static str>,
    callbacks: Option<DriverCallbacks>,
    memory: Vec<ChannelMemory>,
    block_length: usize,
    sample_rate: f64,
    phase: f64,
}

struct Shared {
    spec: SimulatedSpec,
    inner: Mutex<Inner>,
    started: AtomicBool,
    output_ready: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        // test doubles keep going after a panicking test thread
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn enter(&self, op: &'static str, point: FaultPoint) -> DriverResult<MutexGuard<'_, Inner>> {
        let mut inner = self.lock();
        inner.calls.push(op);
        if inner.faults.contains(&point) {
            return Err(DriverError::new(
                op,
                DriverErrorCode::HwMalfunction,
                "injected fault",
            ));
        }
        Ok(inner)
    }

    fn callbacks(&self) -> Option<DriverCallbacks> {
        self.lock().callbacks
    }
}

/// Test-side control of a simulated device.
#[derive(Clone)]
pub struct SimulatedHandle {
    shared: Arc<Shared>,
}

impl SimulatedHandle {
    pub fn name(&self) -> &str {
        &self.shared.spec.name
    }

    pub fn fail(&self, point: FaultPoint) {
        self.shared.lock().faults.insert(point);
    }

    pub fn clear_faults(&self) {
        self.shared.lock().faults.clear();
    }

    /// Driver operations seen so far, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.shared.lock().calls.clone()
    }

    pub fn is_started(&self) -> bool {
        self.shared.started.load(Ordering::Acquire)
    }

    pub fn has_buffers(&self) -> bool {
        !self.shared.lock().memory.is_empty()
    }

    pub fn output_ready_count(&self) -> u64 {
        self.shared.output_ready.load(Ordering::Acquire)
    }

    /// Issue one buffer switch. Returns false when no callbacks are
    /// installed.
    pub fn fire(&self, index: usize) -> bool {
        match self.shared.callbacks() {
            Some(callbacks) => {
                (callbacks.buffer_switch)(index, false);
                true
            }
            None => false,
        }
    }

    /// Send a driver message, returning the host's answer.
    pub fn message(&self, selector: MessageSelector, value: i64) -> Option<i64> {
        self.shared
            .callbacks()
            .map(|callbacks| (callbacks.message)(selector, value))
    }

    pub fn notify_overload(&self) -> Option<i64> {
        self.message(MessageSelector::Overload, 0)
    }

    pub fn change_sample_rate(&self, rate: f64) -> bool {
        self.shared.lock().sample_rate = rate;
        match self.shared.callbacks() {
            Some(callbacks) => {
                (callbacks.sample_rate_changed)(rate);
                true
            }
            None => false,
        }
    }

    /// Encode `samples` into the `index` half of input `channel`.
    pub fn write_input(&self, channel: usize, index: usize, samples: &[f32]) -> bool {
        let mut inner = self.shared.lock();
        let Some(mem) = inner
            .memory
            .iter_mut()
            .find(|m| m.is_input && m.channel == channel)
        else {
            return false;
        };
        let width = mem.sample_type.bytes_per_sample();
        let sample_type = mem.sample_type;
        for (value, word) in samples.iter().zip(mem.halves[index & 1].chunks_exact_mut(width)) {
            if codec::encode(*value, sample_type, word).is_err() {
                return false;
            }
        }
        true
    }

    /// Raw bytes of the `index` half of output `channel`.
    pub fn output_bytes(&self, channel: usize, index: usize) -> Option<Vec<u8>> {
        let inner = self.shared.lock();
        inner
            .memory
            .iter()
            .find(|m| !m.is_input && m.channel == channel)
            .map(|m| m.halves[index & 1].clone())
    }

    /// Decoded samples of the `index` half of output `channel`.
    pub fn read_output(&self, channel: usize, index: usize) -> Option<Vec<f32>> {
        let inner = self.shared.lock();
        let mem = inner
            .memory
            .iter()
            .find(|m| !m.is_input && m.channel == channel)?;
        mem.halves[index & 1]
            .chunks_exact(mem.sample_type.bytes_per_sample())
            .map(|word| codec::decode(word, mem.sample_type).ok())
            .collect()
    }
}

struct SimOutputReady(Arc<Shared>);

impl OutputReady for SimOutputReady {
    fn signal(&self) {
        self.0.output_ready.fetch_add(1, Ordering::AcqRel);
    }
}

pub struct SimulatedDriver {
    shared: Arc<Shared>,
    clock: Option<JoinHandle<()>>,
}

impl Driver for SimulatedDriver {
    fn init(&mut self) -> DriverResult<DriverInfo> {
        let mut inner = self.shared.enter("init", FaultPoint::Init)?;
        // a rate announced through the callback survives re-initialization
        if inner.sample_rate == 0.0 {
            inner.sample_rate = self.shared.spec.sample_rate;
        }
        Ok(DriverInfo {
            name: self.shared.spec.name.clone(),
            version: self.shared.spec.version,
            error_message: String::new(),
        })
    }

    fn exit(&mut self) -> DriverResult<()> {
        self.shared.enter("exit", FaultPoint::Exit).map(drop)
    }

    fn channel_counts(&self) -> DriverResult<(usize, usize)> {
        Ok((self.shared.spec.inputs.len(), self.shared.spec.outputs.len()))
    }

    fn channel_info(&self, channel: usize, is_input: bool) -> DriverResult<ChannelInfo> {
        let inner = self.shared.lock();
        if inner.faults.contains(&FaultPoint::ChannelInfo) {
            return Err(DriverError::native("channel info", -1000));
        }
        let list = if is_input {
            &self.shared.spec.inputs
        } else {
            &self.shared.spec.outputs
        };
        let (name, sample_type) = list.get(channel).ok_or_else(|| {
            DriverError::new(
                "channel info",
                DriverErrorCode::InvalidParameter,
                format!("no channel {channel}"),
            )
        })?;
        let is_active = inner
            .memory
            .iter()
            .any(|m| m.is_input == is_input && m.channel == channel);
        Ok(ChannelInfo {
            channel,
            is_input,
            is_active,
            group: 0,
            sample_type: *sample_type,
            name: name.clone(),
        })
    }

    fn buffer_size(&self) -> DriverResult<BufferSizeInfo> {
        Ok(self.shared.spec.buffer_size)
    }

    fn sample_rate(&self) -> DriverResult<f64> {
        Ok(self.shared.lock().sample_rate)
    }

    fn output_ready(&self) -> Option<Arc<dyn OutputReady>> {
        if self.shared.spec.post_output {
            Some(Arc::new(SimOutputReady(self.shared.clone())))
        } else {
            None
        }
    }

    fn create_buffers(
        &mut self,
        buffers: &mut [BufferInfo],
        block_length: usize,
        callbacks: DriverCallbacks,
    ) -> DriverResult<()> {
        let mut inner = self.shared.enter("create_buffers", FaultPoint::CreateBuffers)?;
        let mut memory = Vec::with_capacity(buffers.len());
        for info in buffers.iter_mut() {
            let list = if info.is_input {
                &self.shared.spec.inputs
            } else {
                &self.shared.spec.outputs
            };
            let Some((_, sample_type)) = list.get(info.channel) else {
                return Err(DriverError::native("create_buffers", -998));
            };
            let bytes = block_length * sample_type.bytes_per_sample();
            let mut halves = [vec![0u8; bytes], vec![0u8; bytes]];
            info.buffers = [halves[0].as_mut_ptr(), halves[1].as_mut_ptr()];
            memory.push(ChannelMemory {
                is_input: info.is_input,
                channel: info.channel,
                sample_type: *sample_type,
                halves,
            });
        }
        inner.memory = memory;
        inner.block_length = block_length;
        inner.callbacks = Some(callbacks);
        Ok(())
    }

    fn dispose_buffers(&mut self) -> DriverResult<()> {
        let mut inner = self.shared.enter("dispose_buffers", FaultPoint::DisposeBuffers)?;
        inner.callbacks = None;
        inner.memory.clear();
        Ok(())
    }

    fn start(&mut self) -> DriverResult<()> {
        drop(self.shared.enter("start", FaultPoint::Start)?);
        self.shared.started.store(true, Ordering::Release);
        if self.shared.spec.clock == SimClock::Realtime {
            let shared = self.shared.clone();
            let spawned = std::thread::Builder::new()
                .name("rtbridge-sim".to_string())
                .spawn(move || run_clock(&shared));
            match spawned {
                Ok(handle) => self.clock = Some(handle),
                Err(e) => {
                    self.shared.started.store(false, Ordering::Release);
                    return Err(DriverError::new(
                        "start",
                        DriverErrorCode::NoClock,
                        e.to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    fn stop(&mut self) -> DriverResult<()> {
        drop(self.shared.enter("stop", FaultPoint::Stop)?);
        self.shared.started.store(false, Ordering::Release);
        if let Some(handle) = self.clock.take()
            && handle.join().is_err()
        {
            error!("Simulated clock thread panicked");
        }
        Ok(())
    }
}

impl Drop for SimulatedDriver {
    fn drop(&mut self) {
        self.shared.started.store(false, Ordering::Release);
        if let Some(handle) = self.clock.take() {
            let _ = handle.join();
        }
    }
}

fn run_clock(shared: &Shared) {
    if env_flag(RT_PRIORITY_ENV)
        && let Err(e) = configure_rt_thread("rtbridge-sim", 70)
    {
        warn!("Simulated clock realtime priority not enabled: {e}");
    }
    let mut index = 0usize;
    while shared.started.load(Ordering::Acquire) {
        let (callbacks, period) = {
            let mut inner = shared.lock();
            let block = inner.block_length.max(1);
            let rate = inner.sample_rate.max(1.0);
            fill_sine(&mut inner, index, 440.0 / rate);
            (inner.callbacks, Duration::from_secs_f64(block as f64 / rate))
        };
        let Some(callbacks) = callbacks else {
            break;
        };
        (callbacks.buffer_switch)(index, true);
        index ^= 1;
        std::thread::sleep(period);
    }
    debug!("Simulated clock stopped");
}

fn fill_sine(inner: &mut Inner, index: usize, step: f64) {
    let block = inner.block_length;
    let start = inner.phase;
    for mem in inner.memory.iter_mut().filter(|m| m.is_input) {
        let width = mem.sample_type.bytes_per_sample();
        for (i, word) in mem.halves[index].chunks_exact_mut(width).enumerate() {
            let phase = (start + i as f64 * step).fract();
            let value = 0.25 * (phase * std::f64::consts::TAU).sin() as f32;
            let _ = codec::encode(value, mem.sample_type, word);
        }
    }
    inner.phase = (start + block as f64 * step).fract();
}

#[cfg(unix)]
fn configure_rt_thread(name: &str, priority: i32) -> Result<(), String> {
    use nix::libc;
    let thread = unsafe { libc::pthread_self() };
    let param = unsafe {
        let mut p = std::mem::zeroed::<libc::sched_param>();
        p.sched_priority = priority;
        p
    };
    let rc = unsafe { libc::pthread_setschedparam(thread, libc::SCHED_FIFO, &param) };
    if rc != 0 {
        return Err(format!(
            "pthread_setschedparam({name}, prio {priority}) failed with errno {rc}"
        ));
    }
    Ok(())
}

#[cfg(not(unix))]
fn configure_rt_thread(_name: &str, _priority: i32) -> Result<(), String> {
    Err("realtime scheduling is only available on unix".to_string())
}

/// Loader over a fixed set of simulated devices.
#[derive(Default)]
pub struct SimulatedLoader {
    devices: Vec<Arc<Shared>>,
    loaded: Option<Arc<Shared>>,
}

impl SimulatedLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// A stereo device on a realtime clock and a 16-bit big-endian device
    /// that only takes power-of-two blocks.
    pub fn with_default_devices() -> Self {
        let mut loader = Self::new();
        loader.add(SimulatedSpec::new("Simulated Stereo").clock(SimClock::Realtime));
        loader.add(
            SimulatedSpec::new("Simulated 16-bit Quad")
                .inputs(
                    (1..=4)
                        .map(|i| (format!("Line {i}"), SampleType::Int16Msb))
                        .collect(),
                )
                .outputs(
                    (1..=4)
                        .map(|i| (format!("Main {i}"), SampleType::Int16Msb))
                        .collect(),
                )
                .buffer_size(BufferSizeInfo {
                    min: 64,
                    max: 1024,
                    preferred: 128,
                    granularity: -1,
                })
                .sample_rate(44_100.0)
                .post_output(false)
                .clock(SimClock::Realtime),
        );
        loader
    }

    pub fn add(&mut self, spec: SimulatedSpec) -> SimulatedHandle {
        let shared = Arc::new(Shared {
            spec,
            inner: Mutex::new(Inner::default()),
            started: AtomicBool::new(false),
            output_ready: AtomicU64::new(0),
        });
        self.devices.push(shared.clone());
        SimulatedHandle { shared }
    }

    pub fn handle(&self, name: &str) -> Option<SimulatedHandle> {
        self.devices
            .iter()
            .find(|d| d.spec.name == name)
            .map(|shared| SimulatedHandle {
                shared: shared.clone(),
            })
    }
}

impl DriverLoader for SimulatedLoader {
    fn list_drivers(&self, max_count: usize) -> Vec<String> {
        self.devices
            .iter()
            .take(max_count)
            .map(|d| d.spec.name.clone())
            .collect()
    }

    fn load(&mut self, name: &str) -> DriverResult<Box<dyn Driver>> {
        let shared = self
            .devices
            .iter()
            .find(|d| d.spec.name == name)
            .cloned()
            .ok_or_else(|| {
                DriverError::new(
                    "load",
                    DriverErrorCode::NotPresent,
                    format!("no driver named {name:?}"),
                )
            })?;
        drop(shared.enter("load", FaultPoint::Load)?);
        self.loaded = Some(shared.clone());
        Ok(Box::new(SimulatedDriver {
            shared,
            clock: None,
        }))
    }

    fn unload(&mut self, driver: Box<dyn Driver>) -> DriverResult<()> {
        drop(driver);
        match self.loaded.take() {
            Some(shared) => shared.enter("unload", FaultPoint::Unload).map(drop),
            None => Ok(()),
        }
    }
}
