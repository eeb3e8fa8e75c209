mod common;

use approx::assert_relative_eq;
use common::{Call, RecordingSink, bound, rig, serial, slot};
use rtbridge_engine::hw::events::RtEvent;
use rtbridge_engine::hw::simulated::{FaultPoint, SimulatedLoader, SimulatedSpec};
use rtbridge_engine::hw::{
    BufferSizeInfo, DriverSession, LifecycleState, SampleType, StepStatus, TeardownStep,
};
use rtbridge_engine::sink::{AdvisoryEvent, EffectChain, EffectSink, Gain, LoopbackSink};
use rtbridge_engine::{DriverErrorCode, Error, NullSink, Precondition};
use std::sync::atomic::Ordering;

fn spec() -> SimulatedSpec {
    SimulatedSpec::new("Sim")
}

#[test]
fn walks_the_full_lifecycle() {
    let _serial = serial();
    let sink = RecordingSink::new(0.0);
    let (mut session, device) = rig(spec());
    assert_eq!(session.state(), LifecycleState::Loaded);

    session.initialize().unwrap();
    assert_eq!(session.state(), LifecycleState::Initialized);
    let info = session.driver_info().unwrap();
    assert_eq!(info.name, "Sim");
    let caps = session.capabilities().unwrap();
    assert_eq!((caps.input_channels, caps.output_channels), (2, 2));
    assert_eq!(caps.sample_rate, 48_000.0);
    assert!(caps.post_output);

    session.bind_sink(Box::new(sink.clone())).unwrap();
    session.create_buffers(&[0], &[0], 64).unwrap();
    assert_eq!(session.geometry().unwrap().block_length, 64);
    assert_eq!(
        sink.calls(),
        vec![Call::Configure {
            block_length: 64,
            inputs: 1,
            outputs: 1
        }]
    );
    session.start().unwrap();
    assert_eq!(session.state(), LifecycleState::Running);
    assert!(device.fire(0));
    assert_eq!(session.blocks_processed(), 1);
    session.stop().unwrap();
    session.dispose_buffers().unwrap();
    assert_eq!(session.state(), LifecycleState::HandlersBound);
    assert!(session.geometry().is_none());
    session.unbind_sink().unwrap();
    session.deinitialize().unwrap();
    session.unload().unwrap();
    assert_eq!(session.state(), LifecycleState::Unloaded);

    assert_eq!(
        device.calls(),
        [
            "load",
            "init",
            "create_buffers",
            "start",
            "stop",
            "dispose_buffers",
            "exit",
            "unload"
        ]
    );
}

#[test]
fn block_length_must_match_bounds_and_granularity() {
    let _serial = serial();
    let (mut session, device) = bound(spec(), NullSink);

    for bad in [50, 16, 4096] {
        let err = session.create_buffers(&[0], &[0], bad).unwrap_err();
        assert!(
            matches!(err, Error::BlockLength { requested, .. } if requested == bad),
            "{err}"
        );
        assert_eq!(session.state(), LifecycleState::HandlersBound);
    }
    assert!(!device.calls().contains(&"create_buffers"));

    session.create_buffers(&[0], &[0], 64).unwrap();
    assert_eq!(session.state(), LifecycleState::BuffersCreated);
}

#[test]
fn power_of_two_granularity_is_honoured() {
    let _serial = serial();
    let spec = spec().buffer_size(BufferSizeInfo {
        min: 64,
        max: 1024,
        preferred: 128,
        granularity: -1,
    });
    let (mut session, _device) = bound(spec, NullSink);
    assert!(session.create_buffers(&[0], &[0], 96).is_err());
    session.create_buffers(&[0], &[0], 256).unwrap();
}

#[test]
fn start_before_create_buffers_is_a_state_error() {
    let _serial = serial();
    let (mut session, device) = bound(spec(), NullSink);
    let err = session.start().unwrap_err();
    assert!(err.is_state());
    assert!(err.to_string().contains("buffers not created"), "{err}");
    assert_eq!(session.state(), LifecycleState::HandlersBound);
    assert!(!device.is_started());
}

#[test]
fn out_of_order_calls_leave_state_untouched() {
    let _serial = serial();
    let mut loader = SimulatedLoader::new();
    loader.add(spec());
    let mut session = DriverSession::acquire_with_options(loader, common::options()).unwrap();

    let checks: [(Result<(), Error>, Precondition); 7] = [
        (session.initialize(), Precondition::NotLoaded),
        (session.bind_sink(Box::new(NullSink)), Precondition::NotInitialized),
        (session.create_buffers(&[0], &[0], 64), Precondition::SinkNotBound),
        (session.start(), Precondition::BuffersAbsent),
        (session.stop(), Precondition::NotRunning),
        (session.dispose_buffers(), Precondition::BuffersAbsent),
        (session.deinitialize(), Precondition::NotInitialized),
    ];
    for (result, expected) in checks {
        assert_eq!(result.unwrap_err().precondition(), Some(expected));
        assert_eq!(session.state(), LifecycleState::Unloaded);
    }
    assert_eq!(
        session.unload().unwrap_err().precondition(),
        Some(Precondition::NotLoaded)
    );

    session.load("Sim").unwrap();
    assert_eq!(
        session.load("Sim").unwrap_err().precondition(),
        Some(Precondition::AlreadyLoaded)
    );
    session.initialize().unwrap();
    assert_eq!(
        session.unload().unwrap_err().precondition(),
        Some(Precondition::AlreadyInitialized)
    );
    session.bind_sink(Box::new(NullSink)).unwrap();
    assert_eq!(
        session.bind_sink(Box::new(NullSink)).unwrap_err().precondition(),
        Some(Precondition::SinkAlreadyBound)
    );
    assert_eq!(
        session.deinitialize().unwrap_err().precondition(),
        Some(Precondition::SinkAlreadyBound)
    );
    session.create_buffers(&[0], &[0], 64).unwrap();
    assert_eq!(
        session.create_buffers(&[0], &[0], 64).unwrap_err().precondition(),
        Some(Precondition::BuffersPresent)
    );
    session.start().unwrap();
    assert_eq!(
        session.start().unwrap_err().precondition(),
        Some(Precondition::AlreadyRunning)
    );
    assert_eq!(
        session.dispose_buffers().unwrap_err().precondition(),
        Some(Precondition::AlreadyRunning)
    );
    assert_eq!(session.state(), LifecycleState::Running);
}

#[test]
fn callback_visits_inputs_then_outputs_in_negotiated_order() {
    let _serial = serial();
    let sink = RecordingSink::new(0.0);
    let (mut session, device) = bound(spec(), sink.clone());
    session.create_buffers(&[1, 0], &[1, 0], 64).unwrap();
    session.start().unwrap();
    sink.clear();

    for index in [0, 1, 0, 1, 1] {
        assert!(device.fire(index));
    }
    let block = [
        Call::Input { slot: slot(0, 1), len: 64 },
        Call::Input { slot: slot(1, 0), len: 64 },
        Call::Output { slot: slot(0, 1), len: 64 },
        Call::Output { slot: slot(1, 0), len: 64 },
    ];
    let calls = sink.block_calls();
    assert_eq!(calls.len(), 5 * block.len());
    for chunk in calls.chunks(block.len()) {
        assert_eq!(chunk, block);
    }
    assert_eq!(session.blocks_processed(), 5);
}

#[test]
fn no_block_runs_until_started() {
    let _serial = serial();
    let sink = RecordingSink::new(0.0);
    let (mut session, device) = bound(spec(), sink.clone());
    assert!(!device.fire(0));
    session.create_buffers(&[0], &[0], 64).unwrap();
    assert!(device.fire(0));
    assert!(sink.block_calls().is_empty());
    assert_eq!(session.blocks_processed(), 0);

    session.start().unwrap();
    session.stop().unwrap();
    assert!(device.fire(1));
    assert!(sink.block_calls().is_empty());
}

#[test]
fn renegotiated_geometry_reaches_the_next_callback() {
    let _serial = serial();
    let sink = RecordingSink::new(0.0);
    let (mut session, device) = bound(spec(), sink.clone());
    session.create_buffers(&[0], &[0], 64).unwrap();
    session.start().unwrap();
    device.fire(0);
    session.stop().unwrap();
    session.dispose_buffers().unwrap();

    session.create_buffers(&[0, 1], &[1], 128).unwrap();
    assert_eq!(session.geometry().unwrap().inputs, vec![0, 1]);
    session.start().unwrap();
    sink.clear();
    device.fire(1);

    assert_eq!(
        sink.block_calls(),
        vec![
            Call::Input { slot: slot(0, 0), len: 128 },
            Call::Input { slot: slot(1, 1), len: 128 },
            Call::Output { slot: slot(0, 1), len: 128 },
        ]
    );
    assert_eq!(session.blocks_processed(), 1);
}

#[test]
fn configure_is_called_once_per_create_buffers() {
    let _serial = serial();
    let sink = RecordingSink::new(0.0);
    let (mut session, _device) = bound(spec(), sink.clone());
    session.create_buffers(&[0], &[0, 1], 32).unwrap();
    session.dispose_buffers().unwrap();
    session.create_buffers(&[], &[0], 2048).unwrap();
    let configures: Vec<_> = sink
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::Configure { .. }))
        .collect();
    assert_eq!(
        configures,
        vec![
            Call::Configure { block_length: 32, inputs: 1, outputs: 2 },
            Call::Configure { block_length: 2048, inputs: 0, outputs: 1 },
        ]
    );
}

#[test]
fn loopback_converts_between_native_formats() {
    let _serial = serial();
    let spec = spec()
        .inputs(vec![("Mic".into(), SampleType::Int16Lsb)])
        .outputs(vec![
            ("Left".into(), SampleType::Int32Msb),
            ("Right".into(), SampleType::Float32Lsb),
        ]);
    let (mut session, device) = bound(spec, LoopbackSink::new());
    session.create_buffers(&[0], &[0, 1], 64).unwrap();
    session.start().unwrap();

    let ramp: Vec<f32> = (0..64).map(|i| i as f32 / 64.0 - 0.5).collect();
    assert!(device.write_input(0, 1, &ramp));
    device.fire(1);

    let left = device.read_output(0, 1).unwrap();
    let right = device.read_output(1, 1).unwrap();
    for ((expected, l), r) in ramp.iter().zip(&left).zip(&right) {
        assert_relative_eq!(*l, *expected, epsilon = 1.0 / 32767.0);
        assert_relative_eq!(*r, *l, epsilon = 1e-6);
    }
    // the other half stays untouched
    assert!(device.read_output(0, 0).unwrap().iter().all(|s| *s == 0.0));
}

#[test]
fn half_scale_int16_input_reaches_the_sink() {
    let _serial = serial();
    let spec = spec().inputs(vec![("In".into(), SampleType::Int16Lsb)]);
    let (mut session, device) = bound(spec, LoopbackSink::new());
    session.create_buffers(&[0], &[0], 32).unwrap();
    session.start().unwrap();
    assert!(device.write_input(0, 0, &[16384.0 / 32767.0; 32]));
    device.fire(0);
    let out = device.read_output(0, 0).unwrap();
    assert_relative_eq!(out[0], 0.5, epsilon = 1e-4);
}

#[test]
fn effect_sink_processes_through_the_session() {
    let _serial = serial();
    let sink = EffectSink::new(EffectChain::new().with(Gain { factor: 0.5 }), 48_000.0);
    let (mut session, device) = bound(spec(), sink);
    session.create_buffers(&[0, 1], &[0, 1], 64).unwrap();
    session.start().unwrap();
    device.write_input(0, 0, &[0.8; 64]);
    device.write_input(1, 0, &[-0.4; 64]);
    device.fire(0);
    assert_relative_eq!(device.read_output(0, 0).unwrap()[10], 0.4, epsilon = 1e-6);
    assert_relative_eq!(device.read_output(1, 0).unwrap()[63], -0.2, epsilon = 1e-6);
}

#[test]
fn output_ready_follows_every_block_when_supported() {
    let _serial = serial();
    let (mut session, device) = bound(spec(), NullSink);
    session.create_buffers(&[0], &[0], 64).unwrap();
    session.start().unwrap();
    for i in 0..3 {
        device.fire(i % 2);
    }
    assert_eq!(device.output_ready_count(), 3);
    drop(session);

    let (mut session, device) = bound(spec().post_output(false), NullSink);
    assert!(!session.capabilities().unwrap().post_output);
    session.create_buffers(&[0], &[0], 64).unwrap();
    session.start().unwrap();
    device.fire(0);
    assert_eq!(device.output_ready_count(), 0);
    assert_eq!(session.blocks_processed(), 1);
}

#[test]
fn overload_is_forwarded_as_advisory() {
    let _serial = serial();
    let sink = LoopbackSink::new();
    let overloads = sink.overload_counter();
    let (mut session, device) = bound(spec(), sink);
    session.create_buffers(&[0], &[0], 64).unwrap();
    session.start().unwrap();

    assert_eq!(device.notify_overload(), Some(0));
    assert_eq!(overloads.load(Ordering::Relaxed), 0);
    device.fire(0);
    assert_eq!(overloads.load(Ordering::Relaxed), 1);
    assert_eq!(session.drain_events(), vec![RtEvent::Overload]);
    assert!(session.drain_events().is_empty());
}

#[test]
fn every_overload_in_a_block_is_delivered() {
    let _serial = serial();
    let sink = LoopbackSink::new();
    let overloads = sink.overload_counter();
    let (mut session, device) = bound(spec(), sink);
    session.create_buffers(&[0], &[0], 64).unwrap();
    session.start().unwrap();

    for _ in 0..3 {
        assert_eq!(device.notify_overload(), Some(0));
    }
    device.fire(0);
    assert_eq!(overloads.load(Ordering::Relaxed), 3);
    assert_eq!(session.drain_events(), vec![RtEvent::Overload; 3]);

    device.notify_overload();
    device.fire(1);
    device.fire(0);
    assert_eq!(overloads.load(Ordering::Relaxed), 4);
    assert_eq!(session.drain_events(), vec![RtEvent::Overload]);
}

#[test]
fn advisories_pending_at_dispose_still_reach_the_sink() {
    let _serial = serial();
    let sink = RecordingSink::new(0.0);
    let (mut session, device) = bound(spec(), sink.clone());
    session.create_buffers(&[0], &[0], 64).unwrap();
    assert_eq!(
        device.message(rtbridge_engine::hw::driver::MessageSelector::ResetRequest, 0),
        Some(1)
    );
    session.dispose_buffers().unwrap();
    assert_eq!(sink.advisories(), vec![AdvisoryEvent::ResetRequest]);
}

#[test]
fn answers_driver_messages() {
    use rtbridge_engine::hw::driver::MessageSelector;
    let _serial = serial();
    let (mut session, device) = bound(spec(), NullSink);
    assert_eq!(device.message(MessageSelector::EngineVersion, 0), None);
    session.create_buffers(&[0], &[0], 64).unwrap();
    assert_eq!(device.message(MessageSelector::EngineVersion, 0), Some(2));
    assert_eq!(device.message(MessageSelector::SelectorSupported, 15), Some(1));
    assert_eq!(device.message(MessageSelector::SelectorSupported, 8), Some(0));
    assert_eq!(device.message(MessageSelector::LatenciesChanged, 0), Some(1));
    assert_eq!(device.message(MessageSelector::BufferSizeChange, 0), Some(0));
}

#[test]
fn sample_rate_change_is_rejected_until_reinitialized() {
    let _serial = serial();
    let sink = RecordingSink::new(0.0);
    let (mut session, device) = bound(spec(), sink.clone());
    session.create_buffers(&[0], &[0], 64).unwrap();
    session.start().unwrap();

    assert!(device.change_sample_rate(96_000.0));
    assert_eq!(session.pending_sample_rate(), Some(96_000.0));
    device.fire(0);
    assert_eq!(
        sink.advisories(),
        vec![AdvisoryEvent::SampleRateChanged { rate: 96_000.0 }]
    );
    assert_eq!(
        session.drain_events(),
        vec![RtEvent::SampleRateChanged(96_000.0)]
    );
    // the running loop keeps the negotiated geometry
    assert_eq!(session.blocks_processed(), 1);

    session.stop().unwrap();
    assert_eq!(
        session.start().unwrap_err().precondition(),
        Some(Precondition::SampleRateChanged)
    );
    assert_eq!(session.state(), LifecycleState::BuffersCreated);
    session.dispose_buffers().unwrap();
    assert_eq!(
        session.create_buffers(&[0], &[0], 64).unwrap_err().precondition(),
        Some(Precondition::SampleRateChanged)
    );

    let sink = session.unbind_sink().unwrap();
    session.deinitialize().unwrap();
    session.initialize().unwrap();
    assert_eq!(session.pending_sample_rate(), None);
    assert_eq!(session.capabilities().unwrap().sample_rate, 96_000.0);
    session.bind_sink(sink).unwrap();
    session.create_buffers(&[0], &[0], 64).unwrap();
    session.start().unwrap();
}

#[test]
fn invalid_buffer_index_is_reported_not_processed() {
    let _serial = serial();
    let sink = RecordingSink::new(0.0);
    let (mut session, device) = bound(spec(), sink.clone());
    session.create_buffers(&[0], &[0], 64).unwrap();
    session.start().unwrap();
    device.fire(2);
    assert!(sink.block_calls().is_empty());
    assert_eq!(session.blocks_processed(), 0);
    assert_eq!(session.drain_events(), vec![RtEvent::InvalidBufferIndex(2)]);
}

#[test]
fn unsupported_format_aborts_buffer_creation() {
    let _serial = serial();
    let spec = spec().inputs(vec![
        ("Ok".into(), SampleType::Int16Msb),
        ("Packed".into(), SampleType::Int24Lsb),
    ]);
    let (mut session, device) = bound(spec, NullSink);
    let err = session.create_buffers(&[0, 1], &[0], 64).unwrap_err();
    assert!(matches!(err, Error::UnsupportedFormat(SampleType::Int24Lsb)));
    assert_eq!(session.state(), LifecycleState::HandlersBound);
    assert!(!device.calls().contains(&"create_buffers"));
    session.create_buffers(&[0], &[0], 64).unwrap();
}

#[test]
fn unknown_channel_is_a_range_error() {
    let _serial = serial();
    let (mut session, _device) = bound(spec(), NullSink);
    let err = session.create_buffers(&[0], &[5], 64).unwrap_err();
    assert!(matches!(err, Error::Range { index: 5, len: 2, .. }), "{err}");
    assert_eq!(session.state(), LifecycleState::HandlersBound);
}

#[test]
fn only_one_session_at_a_time() {
    let _serial = serial();
    let first = DriverSession::acquire_with_options(SimulatedLoader::new(), common::options())
        .unwrap();
    let second = DriverSession::acquire_with_options(SimulatedLoader::new(), common::options());
    assert!(matches!(second, Err(Error::SessionInUse)));
    drop(first);
    DriverSession::acquire_with_options(SimulatedLoader::new(), common::options()).unwrap();
}

#[test]
fn driver_failures_keep_the_previous_state() {
    let _serial = serial();
    let (mut session, device) = bound(spec(), NullSink);

    device.fail(FaultPoint::CreateBuffers);
    let err = session.create_buffers(&[0], &[0], 64).unwrap_err();
    assert!(matches!(err, Error::Driver(ref e) if e.code == DriverErrorCode::HwMalfunction));
    assert_eq!(session.state(), LifecycleState::HandlersBound);
    device.clear_faults();
    session.create_buffers(&[0], &[0], 64).unwrap();

    device.fail(FaultPoint::Start);
    assert!(matches!(session.start(), Err(Error::Driver(_))));
    assert_eq!(session.state(), LifecycleState::BuffersCreated);
    device.fire(0);
    assert_eq!(session.blocks_processed(), 0);
    device.clear_faults();
    session.start().unwrap();

    device.fail(FaultPoint::Stop);
    assert!(session.stop().is_err());
    assert_eq!(session.state(), LifecycleState::Running);
    device.fire(0);
    assert_eq!(session.blocks_processed(), 1);
    device.clear_faults();
    session.stop().unwrap();
}

#[test]
fn failed_driver_dispose_keeps_the_callback_live() {
    let _serial = serial();
    let sink = RecordingSink::new(0.0);
    let (mut session, device) = bound(spec(), sink.clone());
    session.create_buffers(&[0], &[0], 64).unwrap();

    device.fail(FaultPoint::DisposeBuffers);
    assert!(matches!(session.dispose_buffers(), Err(Error::Driver(_))));
    assert_eq!(session.state(), LifecycleState::BuffersCreated);
    assert!(session.geometry().is_some());
    assert!(device.has_buffers());

    device.clear_faults();
    session.start().unwrap();
    assert!(device.fire(0));
    assert_eq!(session.blocks_processed(), 1);
    assert_eq!(sink.block_calls().len(), 2);
    session.stop().unwrap();
    session.dispose_buffers().unwrap();
    assert!(!device.has_buffers());
    session.unbind_sink().unwrap();
    assert_eq!(session.state(), LifecycleState::Initialized);
}

#[test]
fn initialize_failures_stay_loaded() {
    let _serial = serial();
    let (mut session, device) = rig(spec());
    device.fail(FaultPoint::Init);
    assert!(matches!(session.initialize(), Err(Error::Driver(_))));
    assert_eq!(session.state(), LifecycleState::Loaded);
    device.clear_faults();

    device.fail(FaultPoint::ChannelInfo);
    let err = session.initialize().unwrap_err();
    assert!(matches!(err, Error::Driver(ref e) if e.code == DriverErrorCode::NotPresent));
    assert_eq!(session.state(), LifecycleState::Loaded);
    assert!(session.capabilities().is_none());
    assert_eq!(device.calls().last(), Some(&"exit"));
    device.clear_faults();
    session.initialize().unwrap();
}

#[test]
fn loading_an_unknown_driver_fails() {
    let _serial = serial();
    let mut loader = SimulatedLoader::new();
    loader.add(spec());
    let mut session = DriverSession::acquire_with_options(loader, common::options()).unwrap();
    assert_eq!(session.available_drivers(8), vec!["Sim".to_string()]);
    assert!(session.available_drivers(0).is_empty());
    let err = session.load("Missing").unwrap_err();
    assert!(matches!(err, Error::Driver(ref e) if e.code == DriverErrorCode::NotPresent));
    assert_eq!(session.state(), LifecycleState::Unloaded);
}

#[test]
fn unbinding_returns_the_sink_for_rebinding() {
    let _serial = serial();
    let sink = RecordingSink::new(0.0);
    let (mut session, _device) = bound(spec(), sink.clone());
    session.create_buffers(&[0], &[0], 64).unwrap();
    assert_eq!(
        session.unbind_sink().err().and_then(|e| e.precondition()),
        Some(Precondition::BuffersPresent)
    );
    session.dispose_buffers().unwrap();
    let returned = session.unbind_sink().unwrap();
    assert_eq!(session.state(), LifecycleState::Initialized);
    session.bind_sink(returned).unwrap();
    session.create_buffers(&[1], &[1], 96).unwrap();
    assert!(sink.calls().contains(&Call::Configure {
        block_length: 96,
        inputs: 1,
        outputs: 1
    }));
}

#[test]
fn shutdown_from_running_runs_every_step() {
    let _serial = serial();
    let (mut session, device) = bound(spec(), NullSink);
    session.create_buffers(&[0], &[0], 64).unwrap();
    session.start().unwrap();

    let report = session.shutdown();
    assert!(report.is_clean());
    let steps: Vec<_> = report.steps.iter().map(|(step, _)| *step).collect();
    assert_eq!(
        steps,
        [
            TeardownStep::Stop,
            TeardownStep::DisposeBuffers,
            TeardownStep::UnbindSink,
            TeardownStep::Deinitialize,
            TeardownStep::Unload
        ]
    );
    assert!(report.steps.iter().all(|(_, s)| matches!(s, StepStatus::Done)));
    assert_eq!(session.state(), LifecycleState::Unloaded);
    assert!(!device.is_started());
    assert!(!device.has_buffers());
}

#[test]
fn shutdown_continues_past_failing_steps() {
    let _serial = serial();
    let (mut session, device) = bound(spec(), NullSink);
    session.create_buffers(&[0], &[0], 64).unwrap();
    session.start().unwrap();
    device.fail(FaultPoint::Stop);
    device.fail(FaultPoint::DisposeBuffers);
    device.fail(FaultPoint::Exit);

    let report = session.shutdown();
    assert!(!report.is_clean());
    assert!(matches!(
        report.status(TeardownStep::Stop),
        Some(StepStatus::Failed(Error::Driver(_)))
    ));
    assert!(matches!(
        report.status(TeardownStep::DisposeBuffers),
        Some(StepStatus::Failed(_))
    ));
    assert!(matches!(report.status(TeardownStep::UnbindSink), Some(StepStatus::Skipped)));
    assert!(matches!(report.status(TeardownStep::Deinitialize), Some(StepStatus::Failed(_))));
    assert!(matches!(report.status(TeardownStep::Unload), Some(StepStatus::Done)));
    assert_eq!(report.failures().count(), 3);
    assert_eq!(session.state(), LifecycleState::Unloaded);

    // no block runs once teardown has passed the stop step
    device.fire(0);
    assert_eq!(device.calls().last(), Some(&"unload"));
}

#[test]
fn shutdown_from_partial_states_skips_what_never_happened() {
    let _serial = serial();
    let (mut session, _device) = rig(spec());
    session.initialize().unwrap();
    let report = session.shutdown();
    let statuses: Vec<_> = report
        .steps
        .iter()
        .map(|(_, s)| matches!(s, StepStatus::Done))
        .collect();
    assert_eq!(statuses, [false, false, false, true, true]);
    assert!(report.is_clean());

    let report = session.shutdown();
    assert!(report.steps.iter().all(|(_, s)| matches!(s, StepStatus::Skipped)));
}

#[test]
fn dropping_a_running_session_releases_the_driver() {
    let _serial = serial();
    let (mut session, device) = bound(spec(), NullSink);
    session.create_buffers(&[0], &[0], 64).unwrap();
    session.start().unwrap();
    drop(session);
    assert!(!device.is_started());
    assert!(!device.has_buffers());
    assert!(!device.fire(0));
    assert_eq!(device.calls().last(), Some(&"unload"));

    let (_session, _device) = rig(spec());
}
