//! Driver session lifecycle.
//!
//! ```text
//! Unloaded --load--> Loaded --initialize--> Initialized --bind_sink--> HandlersBound
//! HandlersBound --create_buffers--> BuffersCreated --start--> Running
//! Running --stop--> BuffersCreated --dispose_buffers--> HandlersBound
//! HandlersBound --unbind_sink--> Initialized --deinitialize--> Loaded --unload--> Unloaded
//! ```
//!
//! Every transition checks the current state first and leaves it untouched
//! when it fails. [`DriverSession::shutdown`] unwinds from any state and
//! reports each step instead of failing.

use crate::audio::ChannelBufferSet;
use crate::error::{DriverError, DriverErrorCode, Error, Precondition, Result};
use crate::hw::callback::{
    self, ActiveChannel, BlockState, CallbackContext, Registration, Signals,
};
use crate::hw::device::{DeviceCapabilities, DriverInfo};
use crate::hw::driver::{BufferInfo, Driver, DriverLoader, OutputReady};
use crate::hw::events::{EventConsumer, EventProducer, RtEvent, event_channel};
use crate::hw::options::SessionOptions;
use crate::sink::{ChannelSlot, ProcessingSink};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

static SESSION_LIVE: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    Unloaded,
    Loaded,
    Initialized,
    HandlersBound,
    BuffersCreated,
    Running,
}

/// Channels and block length agreed with the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Geometry {
    pub inputs: Vec<usize>,
    pub outputs: Vec<usize>,
    pub block_length: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    Stop,
    DisposeBuffers,
    UnbindSink,
    Deinitialize,
    Unload,
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TeardownStep::Stop => "stop",
            TeardownStep::DisposeBuffers => "dispose buffers",
            TeardownStep::UnbindSink => "unbind sink",
            TeardownStep::Deinitialize => "deinitialize",
            TeardownStep::Unload => "unload",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub enum StepStatus {
    Skipped,
    Done,
    Failed(Error),
}

/// Outcome of every teardown step, in execution order.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub steps: Vec<(TeardownStep, StepStatus)>,
}

impl ShutdownReport {
    pub fn status(&self, step: TeardownStep) -> Option<&StepStatus> {
        self.steps.iter().find(|(s, _)| *s == step).map(|(_, st)| st)
    }

    pub fn failures(&self) -> impl Iterator<Item = (TeardownStep, &Error)> {
        self.steps.iter().filter_map(|(step, status)| match status {
            StepStatus::Failed(e) => Some((*step, e)),
            _ => None,
        })
    }

    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// The process-wide driver session.
///
/// At most one session exists at a time; [`DriverSession::acquire`] fails
/// with [`Error::SessionInUse`] while another is alive.
pub struct DriverSession {
    loader: Box<dyn DriverLoader>,
    options: SessionOptions,
    state: LifecycleState,
    driver: Option<Box<dyn Driver>>,
    driver_name: Option<String>,
    info: Option<DriverInfo>,
    capabilities: Option<DeviceCapabilities>,
    output_ready: Option<Arc<dyn OutputReady>>,
    sink: Option<Box<dyn ProcessingSink>>,
    geometry: Option<Geometry>,
    registration: Option<Registration>,
    signals: Arc<Signals>,
    producer: Option<EventProducer>,
    events: EventConsumer,
}

impl DriverSession {
    pub fn acquire(loader: impl DriverLoader + 'static) -> Result<Self> {
        Self::acquire_with_options(loader, SessionOptions::from_env())
    }

    pub fn acquire_with_options(
        loader: impl DriverLoader + 'static,
        options: SessionOptions,
    ) -> Result<Self> {
        if SESSION_LIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::SessionInUse);
        }
        let (producer, events) = event_channel(options.event_capacity);
        Ok(Self {
            loader: Box::new(loader),
            options,
            state: LifecycleState::Unloaded,
            driver: None,
            driver_name: None,
            info: None,
            capabilities: None,
            output_ready: None,
            sink: None,
            geometry: None,
            registration: None,
            signals: Arc::new(Signals::default()),
            producer: Some(producer),
            events,
        })
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn driver_name(&self) -> Option<&str> {
        self.driver_name.as_deref()
    }

    pub fn driver_info(&self) -> Option<&DriverInfo> {
        self.info.as_ref()
    }

    pub fn capabilities(&self) -> Option<&DeviceCapabilities> {
        self.capabilities.as_ref()
    }

    pub fn geometry(&self) -> Option<&Geometry> {
        self.geometry.as_ref()
    }

    pub fn available_drivers(&self, max_count: usize) -> Vec<String> {
        self.loader.list_drivers(max_count)
    }

    /// Rate announced by the driver since the last `initialize`.
    pub fn pending_sample_rate(&self) -> Option<f64> {
        self.signals.pending_rate()
    }

    /// Blocks completed under the current buffer geometry.
    pub fn blocks_processed(&self) -> u64 {
        self.registration
            .as_ref()
            .and_then(Registration::context)
            .map_or(0, CallbackContext::blocks)
    }

    /// Take everything the callback reported since the last drain.
    pub fn drain_events(&mut self) -> Vec<RtEvent> {
        let events = self.events.drain();
        for event in &events {
            warn!("Real-time callback: {event}");
        }
        let dropped = self.events.take_dropped();
        if dropped > 0 {
            warn!("Real-time callback dropped {dropped} events");
        }
        events
    }

    fn violated(&self, precondition: Precondition) -> Error {
        Error::State {
            precondition,
            state: self.state,
        }
    }

    fn driver_mut(&mut self) -> Result<&mut Box<dyn Driver>> {
        let state = self.state;
        self.driver.as_mut().ok_or(Error::State {
            precondition: Precondition::NotLoaded,
            state,
        })
    }

    pub fn load(&mut self, name: &str) -> Result<()> {
        if self.state != LifecycleState::Unloaded {
            return Err(self.violated(Precondition::AlreadyLoaded));
        }
        let driver = self.loader.load(name)?;
        self.driver = Some(driver);
        self.driver_name = Some(name.to_string());
        self.state = LifecycleState::Loaded;
        info!("Loaded driver {name}");
        Ok(())
    }

    pub fn initialize(&mut self) -> Result<()> {
        match self.state {
            LifecycleState::Loaded => {}
            LifecycleState::Unloaded => return Err(self.violated(Precondition::NotLoaded)),
            _ => return Err(self.violated(Precondition::AlreadyInitialized)),
        }
        let driver = self.driver_mut()?;
        let info = driver.init()?;
        let capabilities = match query_capabilities(&**driver) {
            Ok(caps) => caps,
            Err(e) => {
                if let Err(exit) = driver.exit() {
                    warn!("Driver exit after failed capability query: {exit}");
                }
                return Err(e.into());
            }
        };
        let output_ready = driver.output_ready();
        self.output_ready = output_ready;
        self.signals.clear_rate_change();
        info!(
            "Initialized {info}: {} in / {} out at {} Hz",
            capabilities.input_channels, capabilities.output_channels, capabilities.sample_rate
        );
        self.info = Some(info);
        self.capabilities = Some(capabilities);
        self.state = LifecycleState::Initialized;
        Ok(())
    }

    pub fn bind_sink(&mut self, sink: Box<dyn ProcessingSink>) -> Result<()> {
        match self.state {
            LifecycleState::Initialized => {}
            LifecycleState::Unloaded | LifecycleState::Loaded => {
                return Err(self.violated(Precondition::NotInitialized));
            }
            _ => return Err(self.violated(Precondition::SinkAlreadyBound)),
        }
        self.sink = Some(sink);
        self.state = LifecycleState::HandlersBound;
        debug!("Bound processing sink");
        Ok(())
    }

    pub fn unbind_sink(&mut self) -> Result<Box<dyn ProcessingSink>> {
        match self.state {
            LifecycleState::HandlersBound => {}
            LifecycleState::BuffersCreated | LifecycleState::Running => {
                return Err(self.violated(Precondition::BuffersPresent));
            }
            _ => return Err(self.violated(Precondition::SinkNotBound)),
        }
        let sink = self
            .sink
            .take()
            .ok_or(self.violated(Precondition::SinkNotBound))?;
        self.state = LifecycleState::Initialized;
        debug!("Unbound processing sink");
        Ok(sink)
    }

    /// Negotiate buffers for the given driver channel ids.
    ///
    /// The sink is configured with the final geometry before this returns.
    pub fn create_buffers(
        &mut self,
        inputs: &[usize],
        outputs: &[usize],
        block_length: usize,
    ) -> Result<()> {
        match self.state {
            LifecycleState::HandlersBound => {}
            LifecycleState::BuffersCreated | LifecycleState::Running => {
                return Err(self.violated(Precondition::BuffersPresent));
            }
            _ => return Err(self.violated(Precondition::SinkNotBound)),
        }
        if self.signals.pending_rate().is_some() {
            return Err(self.violated(Precondition::SampleRateChanged));
        }
        let caps = self
            .capabilities
            .as_ref()
            .ok_or(self.violated(Precondition::NotInitialized))?;
        caps.buffer_size.validate(block_length)?;

        let mut channels = Vec::with_capacity(inputs.len() + outputs.len());
        for (is_input, ids) in [(true, inputs), (false, outputs)] {
            for (position, &channel) in ids.iter().enumerate() {
                let sample_type = caps.channel(channel, is_input)?.sample_type;
                if !sample_type.is_supported() {
                    warn!(
                        "Rejecting {} channel {channel}: unsupported format {sample_type}",
                        if is_input { "input" } else { "output" }
                    );
                    return Err(Error::UnsupportedFormat(sample_type));
                }
                channels.push(ActiveChannel {
                    slot: ChannelSlot { position, channel },
                    is_input,
                    sample_type,
                    buffers: [std::ptr::null_mut(); 2],
                });
            }
        }

        if self.sink.is_none() || self.producer.is_none() {
            return Err(self.violated(Precondition::SinkNotBound));
        }

        let mut infos: Vec<BufferInfo> = channels
            .iter()
            .map(|c| BufferInfo::new(c.is_input, c.slot.channel))
            .collect();
        let driver = self.driver_mut()?;
        driver.create_buffers(&mut infos, block_length, callback::callbacks())?;
        if let Some(missing) = infos.iter().find(|i| i.buffers.iter().any(|p| p.is_null())) {
            let err = DriverError::new(
                "create buffers",
                DriverErrorCode::InvalidMode,
                format!("no memory returned for channel {}", missing.channel),
            );
            self.release_driver_buffers("incomplete buffers");
            return Err(err.into());
        }
        for (channel, info) in channels.iter_mut().zip(&infos) {
            channel.buffers = info.buffers;
        }

        let (mut sink, events) = match (self.sink.take(), self.producer.take()) {
            (Some(sink), Some(events)) => (sink, events),
            (sink, producer) => {
                self.sink = sink;
                self.producer = producer;
                self.release_driver_buffers("missing sink");
                return Err(self.violated(Precondition::SinkNotBound));
            }
        };
        sink.configure(block_length, inputs.len(), outputs.len());
        let block = BlockState {
            inputs: ChannelBufferSet::new(block_length, inputs.len()),
            outputs: ChannelBufferSet::new(block_length, outputs.len()),
            sink,
            events,
        };
        let ctx = CallbackContext::new(
            block_length,
            channels,
            self.output_ready.clone(),
            self.signals.clone(),
            block,
        );
        let registration = match Registration::install(Box::new(ctx), self.options.stop_timeout) {
            Ok(registration) => registration,
            Err((ctx, e)) => {
                self.reclaim(ctx.into_block());
                self.release_driver_buffers("failed registration");
                return Err(e);
            }
        };
        self.registration = Some(registration);
        self.geometry = Some(Geometry {
            inputs: inputs.to_vec(),
            outputs: outputs.to_vec(),
            block_length,
        });
        self.state = LifecycleState::BuffersCreated;
        info!(
            "Created buffers: {} in / {} out, {block_length} frames",
            inputs.len(),
            outputs.len()
        );
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        match self.state {
            LifecycleState::BuffersCreated => {}
            LifecycleState::Running => return Err(self.violated(Precondition::AlreadyRunning)),
            _ => return Err(self.violated(Precondition::BuffersAbsent)),
        }
        if self.signals.pending_rate().is_some() {
            return Err(self.violated(Precondition::SampleRateChanged));
        }
        let Some(ctx) = self.registration.as_ref().and_then(Registration::context) else {
            return Err(self.violated(Precondition::BuffersAbsent));
        };
        ctx.set_running(true);
        let result = match self.driver.as_mut() {
            Some(driver) => driver.start(),
            None => Err(DriverError::new(
                "start",
                DriverErrorCode::NotPresent,
                "no driver",
            )),
        };
        if let Err(e) = result {
            if let Some(ctx) = self.registration.as_ref().and_then(Registration::context) {
                ctx.set_running(false);
            }
            return Err(e.into());
        }
        self.state = LifecycleState::Running;
        info!("Driver started");
        Ok(())
    }

    /// Stop the driver and wait until no callback is executing.
    ///
    /// The callback is gated off before the driver is asked to stop. If a
    /// callback is still executing when `stop_timeout` runs out, the session
    /// stays `Running` and reports [`Error::CallbackTimeout`]; calling `stop`
    /// again keeps waiting.
    pub fn stop(&mut self) -> Result<()> {
        if self.state != LifecycleState::Running {
            return Err(self.violated(Precondition::NotRunning));
        }
        let Some(registration) = self.registration.as_ref() else {
            return Err(self.violated(Precondition::BuffersAbsent));
        };
        if let Some(ctx) = registration.context() {
            ctx.set_running(false);
        }
        let result = match self.driver.as_mut() {
            Some(driver) => driver.stop(),
            None => Ok(()),
        };
        if let Err(e) = result {
            if let Some(ctx) = registration.context() {
                ctx.set_running(true);
            }
            return Err(e.into());
        }
        registration.quiesce()?;
        self.state = LifecycleState::BuffersCreated;
        info!("Driver stopped after {} blocks", self.blocks_processed());
        Ok(())
    }

    /// Release driver buffers. The sink stays bound.
    ///
    /// The callback context is revoked before the driver frees its memory.
    /// Any failure leaves the session in `BuffersCreated`.
    pub fn dispose_buffers(&mut self) -> Result<()> {
        match self.state {
            LifecycleState::BuffersCreated => {}
            LifecycleState::Running => return Err(self.violated(Precondition::AlreadyRunning)),
            _ => return Err(self.violated(Precondition::BuffersAbsent)),
        }
        let Some(registration) = self.registration.take() else {
            return Err(self.violated(Precondition::BuffersAbsent));
        };
        let ctx = match registration.revoke() {
            Ok(ctx) => ctx,
            Err((registration, e)) => {
                warn!("Buffers kept: callback still in flight");
                self.registration = Some(registration);
                return Err(e);
            }
        };
        let disposed = match self.driver.as_mut() {
            Some(driver) => driver.dispose_buffers(),
            None => Ok(()),
        };
        if let Err(e) = disposed {
            match Registration::install(Box::new(ctx), self.options.stop_timeout) {
                Ok(registration) => self.registration = Some(registration),
                Err((ctx, reinstall)) => {
                    error!("Callback context not republished: {reinstall}");
                    self.reclaim(ctx.into_block());
                    self.geometry = None;
                    self.state = LifecycleState::HandlersBound;
                }
            }
            return Err(e.into());
        }
        self.geometry = None;
        let mut block = ctx.into_block();
        callback::flush_advisories(&mut block, &self.signals);
        self.reclaim(block);
        self.state = LifecycleState::HandlersBound;
        info!("Disposed buffers");
        Ok(())
    }

    fn reclaim(&mut self, block: BlockState) {
        self.sink = Some(block.sink);
        self.producer = Some(block.events);
    }

    fn release_driver_buffers(&mut self, reason: &str) {
        if let Some(driver) = self.driver.as_mut()
            && let Err(e) = driver.dispose_buffers()
        {
            warn!("Driver dispose after {reason}: {e}");
        }
    }

    fn reset_events(&mut self) {
        let (producer, events) = event_channel(self.options.event_capacity);
        self.producer = Some(producer);
        self.events = events;
    }

    pub fn deinitialize(&mut self) -> Result<()> {
        match self.state {
            LifecycleState::Initialized => {}
            LifecycleState::Unloaded | LifecycleState::Loaded => {
                return Err(self.violated(Precondition::NotInitialized));
            }
            LifecycleState::HandlersBound => {
                return Err(self.violated(Precondition::SinkAlreadyBound));
            }
            _ => return Err(self.violated(Precondition::BuffersPresent)),
        }
        self.driver_mut()?.exit()?;
        self.forget_device();
        self.state = LifecycleState::Loaded;
        info!("Driver deinitialized");
        Ok(())
    }

    /// Hand the driver back to the loader. A loader failure still releases
    /// the handle, so the session ends up `Unloaded` either way.
    pub fn unload(&mut self) -> Result<()> {
        match self.state {
            LifecycleState::Loaded => {}
            LifecycleState::Unloaded => return Err(self.violated(Precondition::NotLoaded)),
            _ => return Err(self.violated(Precondition::AlreadyInitialized)),
        }
        let driver = self
            .driver
            .take()
            .ok_or(self.violated(Precondition::NotLoaded))?;
        let name = self.driver_name.take().unwrap_or_default();
        self.state = LifecycleState::Unloaded;
        self.loader.unload(driver)?;
        info!("Unloaded driver {name}");
        Ok(())
    }

    fn forget_device(&mut self) {
        self.info = None;
        self.capabilities = None;
        self.output_ready = None;
    }

    /// Unwind to `Unloaded` from any state.
    ///
    /// Each step runs even if an earlier one failed; a failed step still
    /// moves the session past it so the hardware is always released. The
    /// exception is a callback that never drains: its context, the driver
    /// buffers and the driver handle are leaked instead of freed under it.
    pub fn shutdown(&mut self) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        let mut abandoned = false;

        let status = if self.state == LifecycleState::Running {
            let result = self.stop();
            if self.state == LifecycleState::Running {
                if let Some(ctx) = self.registration.as_ref().and_then(Registration::context) {
                    ctx.set_running(false);
                }
                self.state = LifecycleState::BuffersCreated;
            }
            completed(result)
        } else {
            StepStatus::Skipped
        };
        report.steps.push((TeardownStep::Stop, status));

        let status = if self.state == LifecycleState::BuffersCreated {
            let result = self.dispose_buffers();
            if self.state == LifecycleState::BuffersCreated {
                let stuck = matches!(result, Err(Error::CallbackTimeout { .. }));
                self.geometry = None;
                self.sink = None;
                match self.registration.take() {
                    Some(registration) if stuck => {
                        registration.leak();
                        abandoned = true;
                    }
                    Some(registration) => match registration.revoke() {
                        Ok(ctx) => {
                            self.producer = Some(ctx.into_block().events);
                            self.release_driver_buffers("failed dispose");
                        }
                        Err((registration, e)) => {
                            error!("Callback stuck during shutdown: {e}");
                            registration.leak();
                            abandoned = true;
                        }
                    },
                    None => self.release_driver_buffers("failed dispose"),
                }
                if self.producer.is_none() {
                    self.reset_events();
                }
                self.state = LifecycleState::Initialized;
            }
            completed(result)
        } else {
            StepStatus::Skipped
        };
        report.steps.push((TeardownStep::DisposeBuffers, status));

        let status = if self.state == LifecycleState::HandlersBound {
            completed(self.unbind_sink().map(drop))
        } else {
            StepStatus::Skipped
        };
        report.steps.push((TeardownStep::UnbindSink, status));

        let status = if self.state != LifecycleState::Initialized {
            StepStatus::Skipped
        } else if abandoned {
            if let Some(driver) = self.driver.take() {
                error!("Leaking driver handle with a callback in flight");
                std::mem::forget(driver);
            }
            self.forget_device();
            self.state = LifecycleState::Loaded;
            StepStatus::Failed(self.stuck_callback())
        } else {
            let result = self.deinitialize();
            if self.state == LifecycleState::Initialized {
                self.forget_device();
                self.state = LifecycleState::Loaded;
            }
            completed(result)
        };
        report.steps.push((TeardownStep::Deinitialize, status));

        let status = if self.state != LifecycleState::Loaded {
            StepStatus::Skipped
        } else if abandoned {
            self.driver_name = None;
            self.state = LifecycleState::Unloaded;
            StepStatus::Failed(self.stuck_callback())
        } else {
            completed(self.unload())
        };
        report.steps.push((TeardownStep::Unload, status));

        for (step, e) in report.failures() {
            warn!("Shutdown step {step} failed: {e}");
        }
        report
    }

    fn stuck_callback(&self) -> Error {
        Error::CallbackTimeout {
            waited: self.options.stop_timeout,
        }
    }
}

fn completed(result: Result<()>) -> StepStatus {
    match result {
        Ok(()) => StepStatus::Done,
        Err(e) => StepStatus::Failed(e),
    }
}

fn query_capabilities(
    driver: &dyn Driver,
) -> std::result::Result<DeviceCapabilities, DriverError> {
    let (input_channels, output_channels) = driver.channel_counts()?;
    let inputs = (0..input_channels)
        .map(|c| driver.channel_info(c, true))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let outputs = (0..output_channels)
        .map(|c| driver.channel_info(c, false))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(DeviceCapabilities {
        input_channels,
        output_channels,
        inputs,
        outputs,
        buffer_size: driver.buffer_size()?,
        sample_rate: driver.sample_rate()?,
        post_output: driver.output_ready().is_some(),
    })
}

impl Drop for DriverSession {
    fn drop(&mut self) {
        if self.state != LifecycleState::Unloaded {
            let report = self.shutdown();
            if !report.is_clean() {
                error!("Driver session dropped with an unclean shutdown");
            }
        }
        SESSION_LIVE.store(false, Ordering::Release);
    }
}
