//! Process-wide callback registration.
//!
//! Driver callbacks are bare function pointers without a context argument.
//! The trampolines here resolve the single registered [`CallbackContext`]
//! with one atomic load and hand it explicit parameters from then on.
//!
//! Exclusion between callbacks and teardown works without locks: a callback
//! bumps `IN_FLIGHT` before it loads `ACTIVE`, and teardown clears `ACTIVE`
//! (or the running flag) before it waits for `IN_FLIGHT` to drain. All four
//! accesses are `SeqCst`, so a callback that saw the context is always
//! counted by the waiter.

use crate::audio::ChannelBufferSet;
use crate::cell::RtCell;
use crate::error::{Error, Result};
use crate::hw::bridge;
use crate::hw::driver::{DriverCallbacks, MessageSelector, OutputReady};
use crate::hw::events::{EventProducer, RtEvent};
use crate::hw::format::SampleType;
use crate::sink::{AdvisoryEvent, ChannelSlot, ProcessingSink};
use std::ptr::{self, NonNull};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error};

static ACTIVE: AtomicPtr<CallbackContext> = AtomicPtr::new(ptr::null_mut());
static IN_FLIGHT: AtomicUsize = AtomicUsize::new(0);
static GENERATION: AtomicU64 = AtomicU64::new(0);

/// Message protocol version reported to drivers.
pub const ENGINE_VERSION: i64 = 2;

struct InFlight;

impl InFlight {
    #[inline]
    fn enter() -> Self {
        IN_FLIGHT.fetch_add(1, Ordering::SeqCst);
        InFlight
    }
}

impl Drop for InFlight {
    #[inline]
    fn drop(&mut self) {
        IN_FLIGHT.fetch_sub(1, Ordering::SeqCst);
    }
}

#[inline]
fn with_active<R>(f: impl FnOnce(&CallbackContext) -> R) -> Option<R> {
    let _guard = InFlight::enter();
    let ctx = ACTIVE.load(Ordering::SeqCst);
    if ctx.is_null() {
        return None;
    }
    // SAFETY: the pointer stays valid until every guard taken after it was
    // published has dropped; see `Registration::revoke`.
    Some(f(unsafe { &*ctx }))
}

fn wait_idle(timeout: Duration) -> Result<()> {
    let started = Instant::now();
    let mut spins = 0u32;
    while IN_FLIGHT.load(Ordering::SeqCst) != 0 {
        let waited = started.elapsed();
        if waited >= timeout {
            return Err(Error::CallbackTimeout { waited });
        }
        if spins < 64 {
            spins += 1;
            std::hint::spin_loop();
        } else {
            std::thread::sleep(Duration::from_micros(100));
        }
    }
    Ok(())
}

fn on_buffer_switch(index: usize, _direct_process: bool) {
    with_active(|ctx| ctx.buffer_switch(index));
}

fn on_sample_rate_changed(rate: f64) {
    with_active(|ctx| ctx.signals.sample_rate_changed(rate));
}

fn on_message(selector: MessageSelector, value: i64) -> i64 {
    if let Some(advisory) = advisory_for(selector) {
        with_active(|ctx| ctx.signals.raise(advisory));
    }
    answer(selector, value)
}

/// Trampolines to install with the driver.
pub fn callbacks() -> DriverCallbacks {
    DriverCallbacks {
        buffer_switch: on_buffer_switch,
        sample_rate_changed: on_sample_rate_changed,
        message: on_message,
    }
}

fn advisory_for(selector: MessageSelector) -> Option<Notice> {
    match selector {
        MessageSelector::Overload => Some(Notice::Overload),
        MessageSelector::ResetRequest => Some(Notice::Reset),
        MessageSelector::LatenciesChanged => Some(Notice::Latencies),
        _ => None,
    }
}

/// Reply to a driver message.
pub fn answer(selector: MessageSelector, value: i64) -> i64 {
    match selector {
        MessageSelector::SelectorSupported => matches!(
            MessageSelector::from_code(value),
            MessageSelector::EngineVersion
                | MessageSelector::ResetRequest
                | MessageSelector::LatenciesChanged
                | MessageSelector::Overload
        ) as i64,
        MessageSelector::EngineVersion => ENGINE_VERSION,
        MessageSelector::ResetRequest | MessageSelector::LatenciesChanged => 1,
        _ => 0,
    }
}

#[derive(Debug, Clone, Copy)]
enum Notice {
    Overload,
    Reset,
    Latencies,
}

impl Notice {
    const ALL: [Notice; 3] = [Notice::Overload, Notice::Reset, Notice::Latencies];

    fn advisory(self) -> AdvisoryEvent {
        match self {
            Notice::Overload => AdvisoryEvent::Overload,
            Notice::Reset => AdvisoryEvent::ResetRequest,
            Notice::Latencies => AdvisoryEvent::LatenciesChanged,
        }
    }
}

/// Notifications raised from any driver thread and consumed by the block
/// loop. Shared with the session so a rate change is visible while stopped.
///
/// Every message is counted, so a burst between two blocks is delivered as
/// that many events.
#[derive(Debug, Default)]
pub struct Signals {
    counts: [AtomicU32; 3],
    rate_delivery: AtomicBool,
    rate_changed: AtomicBool,
    rate_bits: AtomicU64,
}

impl Signals {
    fn raise(&self, notice: Notice) {
        self.counts[notice as usize].fetch_add(1, Ordering::AcqRel);
    }

    fn sample_rate_changed(&self, rate: f64) {
        self.rate_bits.store(rate.to_bits(), Ordering::Release);
        self.rate_changed.store(true, Ordering::Release);
        self.rate_delivery.store(true, Ordering::Release);
    }

    /// Rate reported by the last unhandled change notification.
    pub fn pending_rate(&self) -> Option<f64> {
        if self.rate_changed.load(Ordering::Acquire) {
            Some(f64::from_bits(self.rate_bits.load(Ordering::Acquire)))
        } else {
            None
        }
    }

    pub fn clear_rate_change(&self) {
        self.rate_changed.store(false, Ordering::Release);
    }

    /// Hand every pending advisory to `sink`, mirroring overloads and rate
    /// changes into `events`.
    fn deliver(&self, sink: &mut dyn ProcessingSink, events: &mut EventProducer) {
        for notice in Notice::ALL {
            let count = self.counts[notice as usize].swap(0, Ordering::AcqRel);
            for _ in 0..count {
                if let Notice::Overload = notice {
                    events.push(RtEvent::Overload);
                }
                sink.handle_advisory_event(notice.advisory());
            }
        }
        if self.rate_delivery.swap(false, Ordering::AcqRel) {
            let rate = f64::from_bits(self.rate_bits.load(Ordering::Acquire));
            events.push(RtEvent::SampleRateChanged(rate));
            sink.handle_advisory_event(AdvisoryEvent::SampleRateChanged { rate });
        }
    }
}

/// One negotiated channel as seen by the block loop.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ActiveChannel {
    pub(crate) slot: ChannelSlot,
    pub(crate) is_input: bool,
    pub(crate) sample_type: SampleType,
    pub(crate) buffers: [*mut u8; 2],
}

/// State only the block loop touches while registered.
pub(crate) struct BlockState {
    pub(crate) inputs: ChannelBufferSet,
    pub(crate) outputs: ChannelBufferSet,
    pub(crate) sink: Box<dyn ProcessingSink>,
    pub(crate) events: EventProducer,
}

pub(crate) struct CallbackContext {
    generation: u64,
    running: AtomicBool,
    block_length: usize,
    /// Inputs first, then outputs, each in negotiated order.
    channels: Vec<ActiveChannel>,
    output_ready: Option<Arc<dyn OutputReady>>,
    signals: Arc<Signals>,
    blocks: AtomicU64,
    block: RtCell<BlockState>,
}

// Raw hardware pointers are only dereferenced inside `buffer_switch`, which
// the driver never runs concurrently with itself.
unsafe impl Send for CallbackContext {}
unsafe impl Sync for CallbackContext {}

impl CallbackContext {
    pub(crate) fn new(
        block_length: usize,
        channels: Vec<ActiveChannel>,
        output_ready: Option<Arc<dyn OutputReady>>,
        signals: Arc<Signals>,
        block: BlockState,
    ) -> Self {
        Self {
            generation: GENERATION.fetch_add(1, Ordering::Relaxed) + 1,
            running: AtomicBool::new(false),
            block_length,
            channels,
            output_ready,
            signals,
            blocks: AtomicU64::new(0),
            block: RtCell::new(block),
        }
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub(crate) fn blocks(&self) -> u64 {
        self.blocks.load(Ordering::Acquire)
    }

    pub(crate) fn into_block(self) -> BlockState {
        self.block.into_inner()
    }

    fn buffer_switch(&self, index: usize) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        // SAFETY: the driver serializes buffer switches and the control
        // thread only reclaims this state after the registration is revoked.
        let state = unsafe { self.block.get_mut() };
        self.signals.deliver(state.sink.as_mut(), &mut state.events);

        if index > 1 {
            state.events.push(RtEvent::InvalidBufferIndex(index));
            return;
        }

        for ch in &self.channels {
            let bytes = self.block_length * ch.sample_type.bytes_per_sample();
            let hw = ch.buffers[index];
            if ch.is_input {
                let len = state.inputs.channel_count();
                let Ok(dst) = state.inputs.channel_mut(ch.slot.position) else {
                    state.events.push(RtEvent::ChannelRange {
                        position: ch.slot.position,
                        len,
                    });
                    continue;
                };
                // SAFETY: the driver guarantees `bytes` valid bytes behind each
                // half-buffer for the duration of the callback.
                let hw = unsafe { std::slice::from_raw_parts(hw as *const u8, bytes) };
                if bridge::import(hw, dst, ch.sample_type).is_err() {
                    dst.fill(0.0);
                    state.events.push(RtEvent::UnsupportedFormat {
                        channel: ch.slot.channel,
                        sample_type: ch.sample_type,
                    });
                }
                state.sink.process_input(ch.slot, dst);
            } else {
                let len = state.outputs.channel_count();
                let Ok(src) = state.outputs.channel_mut(ch.slot.position) else {
                    state.events.push(RtEvent::ChannelRange {
                        position: ch.slot.position,
                        len,
                    });
                    continue;
                };
                src.fill(0.0);
                state.sink.process_output(ch.slot, src);
                // SAFETY: as above, and output halves are ours to write.
                let hw = unsafe { std::slice::from_raw_parts_mut(hw, bytes) };
                if bridge::export(src, hw, ch.sample_type).is_err() {
                    hw.fill(0);
                    state.events.push(RtEvent::UnsupportedFormat {
                        channel: ch.slot.channel,
                        sample_type: ch.sample_type,
                    });
                }
            }
        }

        if let Some(ready) = &self.output_ready {
            ready.signal();
        }
        self.blocks.fetch_add(1, Ordering::Release);
    }
}

/// Owner of the published context. Dropping it revokes the context.
pub(crate) struct Registration {
    ctx: Option<NonNull<CallbackContext>>,
    timeout: Duration,
}

// The context is Sync and owned exclusively by this registration.
unsafe impl Send for Registration {}

impl Registration {
    /// Publish `ctx`. Hands it back if another context is already live.
    pub(crate) fn install(
        ctx: Box<CallbackContext>,
        timeout: Duration,
    ) -> std::result::Result<Self, (Box<CallbackContext>, Error)> {
        let generation = ctx.generation;
        let raw = Box::into_raw(ctx);
        if ACTIVE
            .compare_exchange(ptr::null_mut(), raw, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // SAFETY: never published.
            return Err((unsafe { Box::from_raw(raw) }, Error::SessionInUse));
        }
        debug!("Installed callback context #{generation}");
        Ok(Self {
            ctx: NonNull::new(raw),
            timeout,
        })
    }

    pub(crate) fn context(&self) -> Option<&CallbackContext> {
        // SAFETY: the context lives until `revoke` takes it back.
        self.ctx.map(|ctx| unsafe { &*ctx.as_ptr() })
    }

    /// Block until no callback is executing against a stopped context.
    pub(crate) fn quiesce(&self) -> Result<()> {
        wait_idle(self.timeout)
    }

    /// Unpublish the context and take it back once no callback holds it.
    ///
    /// On timeout the context is published again and handed back inside the
    /// registration. The caller must not release anything the callback may
    /// be touching.
    pub(crate) fn revoke(mut self) -> std::result::Result<CallbackContext, (Self, Error)> {
        let Some(ctx) = self.ctx else {
            return Err((self, Error::CallbackTimeout { waited: Duration::ZERO }));
        };
        // SAFETY: published by `install` and not yet freed.
        let context = unsafe { ctx.as_ref() };
        context.set_running(false);
        let _ = ACTIVE.compare_exchange(
            ctx.as_ptr(),
            ptr::null_mut(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        if let Err(e) = wait_idle(self.timeout) {
            let _ = ACTIVE.compare_exchange(
                ptr::null_mut(),
                ctx.as_ptr(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
            return Err((self, e));
        }
        debug!("Revoked callback context #{}", context.generation);
        self.ctx = None;
        // SAFETY: unpublished and no callback is in flight.
        Ok(*unsafe { Box::from_raw(ctx.as_ptr()) })
    }

    /// Unpublish a context a callback is stuck in without freeing it.
    pub(crate) fn leak(mut self) {
        if let Some(ctx) = self.ctx.take() {
            // SAFETY: published by `install` and never freed.
            let generation = unsafe { ctx.as_ref() }.generation;
            let _ = ACTIVE.compare_exchange(
                ctx.as_ptr(),
                ptr::null_mut(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
            error!("Leaking callback context #{generation}");
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let Some(ctx) = self.ctx.take() else {
            return;
        };
        let registration = Registration {
            ctx: Some(ctx),
            timeout: self.timeout,
        };
        if let Err((registration, e)) = registration.revoke() {
            error!("Dropping registration with a callback in flight: {e}");
            registration.leak();
        }
    }
}

/// Deliver advisories that arrived after the last block.
pub(crate) fn flush_advisories(block: &mut BlockState, signals: &Signals) {
    signals.deliver(block.sink.as_mut(), &mut block.events);
}
