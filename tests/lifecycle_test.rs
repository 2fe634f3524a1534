use std::collections::HashSet;
use std::sync::Arc;

use asio_host::sim::{SimConfig, SimDriver};
use asio_host::{
    AsioDriver, AsioDriverListener, AsioError, BufferSizeBounds, Channel, DriverState, HostOptions,
    SampleType,
};

fn make() -> (Arc<SimDriver>, AsioDriver) {
    let sim = SimDriver::new();
    let driver = AsioDriver::attach(sim.clone());
    (sim, driver)
}

fn output_set(driver: &AsioDriver) -> HashSet<Arc<Channel>> {
    let mut set = HashSet::new();
    for index in 0..driver.output_channel_count().unwrap() {
        set.insert(driver.output_channel(index).unwrap());
    }
    set
}

struct NullListener;

impl AsioDriverListener for NullListener {
    fn buffer_switch(&self, _: i64, _: i64, _: &HashSet<Arc<Channel>>) {}
}

#[test]
fn operations_out_of_order_leave_state_unchanged() {
    let (_sim, driver) = make();
    assert_eq!(driver.state(), DriverState::Loaded);

    assert!(matches!(driver.start(), Err(AsioError::InvalidState { .. })));
    assert!(matches!(driver.stop(), Err(AsioError::InvalidState { .. })));
    assert!(matches!(
        driver.sample_rate(),
        Err(AsioError::InvalidState { .. })
    ));
    assert!(matches!(
        driver.shutdown(),
        Err(AsioError::InvalidState { .. })
    ));
    assert_eq!(driver.state(), DriverState::Loaded);

    driver.initialize().unwrap();
    assert_eq!(driver.state(), DriverState::Initialized);

    // Second initialize is rejected, driver stays initialized.
    let err = driver.initialize().unwrap_err();
    assert!(matches!(
        err,
        AsioError::InvalidState {
            current: DriverState::Initialized,
            required: DriverState::Loaded,
            ..
        }
    ));
    assert_eq!(driver.state(), DriverState::Initialized);
}

#[test]
fn full_lifecycle_round_trip() {
    let (sim, driver) = make();

    let info = driver.initialize().unwrap();
    assert_eq!(info.driver_name, "Simulated ASIO Driver");
    assert_eq!(info.asio_version, 2);
    assert_eq!(driver.driver_name(), Some("Simulated ASIO Driver"));
    assert_eq!(driver.asio_version(), Some(2));

    let channels = output_set(&driver);
    driver.create_buffers(&channels).unwrap();
    assert_eq!(driver.state(), DriverState::Prepared);
    assert_eq!(driver.active_channels().len(), 2);
    assert_eq!(driver.block_frames().unwrap(), 256);
    assert!(sim.has_buffers());
    for channel in channels.iter() {
        assert!(channel.is_active());
    }

    driver.start().unwrap();
    assert_eq!(driver.state(), DriverState::Running);
    assert!(sim.is_streaming());

    driver.stop().unwrap();
    assert_eq!(driver.state(), DriverState::Prepared);
    assert!(!sim.is_streaming());

    driver.dispose_buffers().unwrap();
    assert_eq!(driver.state(), DriverState::Initialized);
    assert!(driver.active_channels().is_empty());
    assert!(!sim.has_buffers());
    for channel in channels.iter() {
        assert!(!channel.is_active());
    }

    driver.shutdown().unwrap();
    assert_eq!(driver.state(), DriverState::Loaded);
    assert_eq!(sim.init_calls(), 1);
    assert_eq!(sim.exit_calls(), 1);
}

#[test]
fn return_to_state_walks_the_whole_teardown() {
    let (sim, driver) = make();
    driver.initialize().unwrap();
    driver.create_buffers(&output_set(&driver)).unwrap();
    driver.start().unwrap();

    driver.return_to_state(DriverState::Loaded).unwrap();
    assert_eq!(driver.state(), DriverState::Loaded);
    assert!(!sim.is_streaming());
    assert!(!sim.has_buffers());
    assert_eq!(sim.exit_calls(), 1);

    // Idempotent: a second walk is a no-op.
    driver.return_to_state(DriverState::Loaded).unwrap();
    assert_eq!(driver.state(), DriverState::Loaded);
    assert_eq!(sim.exit_calls(), 1);

    // A target at or above the current state never moves the machine.
    driver.return_to_state(DriverState::Running).unwrap();
    assert_eq!(driver.state(), DriverState::Loaded);
}

#[test]
fn partial_teardown_stops_at_the_target() {
    let (sim, driver) = make();
    driver.initialize().unwrap();
    driver.create_buffers(&output_set(&driver)).unwrap();
    driver.start().unwrap();

    driver.return_to_state(DriverState::Initialized).unwrap();
    assert_eq!(driver.state(), DriverState::Initialized);
    assert!(!sim.is_streaming());
    assert!(!sim.has_buffers());
    assert_eq!(sim.exit_calls(), 0);
}

#[test]
fn create_buffers_rejects_empty_and_foreign_sets() {
    let (_sim, driver) = make();
    driver.initialize().unwrap();

    assert!(matches!(
        driver.create_buffers(&HashSet::new()),
        Err(AsioError::EmptyChannelSet)
    ));
    assert_eq!(driver.state(), DriverState::Initialized);

    // A channel with the same identity from a different driver instance.
    let (_other_sim, other) = make();
    other.initialize().unwrap();
    let mut foreign = HashSet::new();
    foreign.insert(other.output_channel(0).unwrap());
    assert!(matches!(
        driver.create_buffers(&foreign),
        Err(AsioError::ForeignChannel(_))
    ));
    assert_eq!(driver.state(), DriverState::Initialized);
    assert!(driver.active_channels().is_empty());
}

#[test]
fn activation_set_is_copied_on_create() {
    let (_sim, driver) = make();
    driver.initialize().unwrap();
    let mut channels = output_set(&driver);
    driver.create_buffers(&channels).unwrap();

    // Mutating the caller's set afterwards changes nothing.
    channels.clear();
    assert_eq!(driver.active_channels().len(), 2);
}

#[test]
fn listeners_lock_at_prepared() {
    let (_sim, driver) = make();
    let listener: Arc<dyn AsioDriverListener> = Arc::new(NullListener);

    driver.add_listener(listener.clone()).unwrap();
    // Same Arc registered twice keeps one entry.
    driver.add_listener(listener.clone()).unwrap();
    assert_eq!(driver.listener_count(), 1);

    driver.initialize().unwrap();
    driver.create_buffers(&output_set(&driver)).unwrap();

    let another: Arc<dyn AsioDriverListener> = Arc::new(NullListener);
    assert!(matches!(
        driver.add_listener(another),
        Err(AsioError::ListenersLocked { .. })
    ));
    assert!(matches!(
        driver.remove_listener(&listener),
        Err(AsioError::ListenersLocked { .. })
    ));
    assert_eq!(driver.listener_count(), 1);

    driver.dispose_buffers().unwrap();
    driver.remove_listener(&listener).unwrap();
    assert_eq!(driver.listener_count(), 0);
}

#[test]
fn block_size_override_is_validated_when_asked() {
    let bounds = BufferSizeBounds {
        min: 64,
        max: 1024,
        preferred: 256,
        granularity: -1,
    };
    let config = SimConfig {
        bounds,
        ..SimConfig::default()
    };

    let sim = SimDriver::with_config(config.clone());
    let driver = AsioDriver::attach_with_options(
        sim,
        HostOptions {
            block_frames: Some(512),
            enforce_buffer_size_bounds: true,
        },
    );
    driver.initialize().unwrap();
    driver.create_buffers(&output_set(&driver)).unwrap();
    assert_eq!(driver.block_frames().unwrap(), 512);

    // 500 is in range but not a power of two.
    let sim = SimDriver::with_config(config);
    let driver = AsioDriver::attach_with_options(
        sim,
        HostOptions {
            block_frames: Some(500),
            enforce_buffer_size_bounds: true,
        },
    );
    driver.initialize().unwrap();
    assert!(matches!(
        driver.create_buffers(&output_set(&driver)),
        Err(AsioError::BlockSizeOutOfBounds { requested: 500, .. })
    ));
    assert_eq!(driver.state(), DriverState::Initialized);
}

#[test]
fn unvalidated_override_is_passed_through() {
    let sim = SimDriver::new();
    let driver = AsioDriver::attach_with_options(
        sim,
        HostOptions {
            block_frames: Some(100),
            enforce_buffer_size_bounds: false,
        },
    );
    driver.initialize().unwrap();
    driver.create_buffers(&output_set(&driver)).unwrap();
    assert_eq!(driver.block_frames().unwrap(), 100);
}

#[test]
fn queries_require_initialization() {
    let (sim, driver) = make();
    assert!(matches!(
        driver.open_control_panel(),
        Err(AsioError::InvalidState { .. })
    ));
    assert!(driver.driver_info().is_none());

    driver.initialize().unwrap();
    assert_eq!(driver.sample_rate().unwrap(), 44100.0);
    assert!(driver.can_sample_rate(48000.0).unwrap());
    assert!(!driver.can_sample_rate(12345.0).unwrap());
    driver.set_sample_rate(48000.0).unwrap();
    assert_eq!(driver.sample_rate().unwrap(), 48000.0);

    let bounds = driver.buffer_size_bounds().unwrap();
    assert_eq!(bounds.preferred, 256);

    driver.open_control_panel().unwrap();
    assert_eq!(sim.control_panel_opens(), 1);

    assert_eq!(driver.input_channel_count().unwrap(), 2);
    assert_eq!(driver.output_channel_count().unwrap(), 2);
    assert!(matches!(
        driver.output_channel(9),
        Err(AsioError::ChannelOutOfRange { index: 9, .. })
    ));
}

#[test]
fn channel_identities_survive_reinitialization() {
    let (_sim, driver) = make();
    driver.initialize().unwrap();
    let before = driver.output_channel(0).unwrap();
    driver.shutdown().unwrap();
    driver.initialize().unwrap();
    let after = driver.output_channel(0).unwrap();
    assert!(Arc::ptr_eq(&before, &after));
}

#[test]
fn thread_registration_happens_once_per_thread() {
    let (sim, driver) = make();
    driver.initialize().unwrap();
    driver.sample_rate().unwrap();
    driver.buffer_size_bounds().unwrap();
    driver.create_buffers(&output_set(&driver)).unwrap();
    assert_eq!(sim.thread_registrations(), 1);

    let driver = Arc::new(driver);
    let worker = {
        let driver = Arc::clone(&driver);
        std::thread::spawn(move || {
            driver.sample_rate().unwrap();
            driver.latencies().unwrap();
        })
    };
    worker.join().unwrap();
    assert_eq!(sim.thread_registrations(), 2);
}

#[test]
fn drop_returns_the_driver_to_loaded() {
    let (sim, driver) = make();
    driver.initialize().unwrap();
    driver.create_buffers(&output_set(&driver)).unwrap();
    driver.start().unwrap();

    drop(driver);
    assert!(!sim.is_streaming());
    assert!(!sim.has_buffers());
    assert_eq!(sim.exit_calls(), 1);
}

#[test]
fn display_formats_match_the_reported_identity() {
    let config = SimConfig {
        outputs: vec![SampleType::Int32Lsb],
        ..SimConfig::default()
    };
    let driver = AsioDriver::attach(SimDriver::with_config(config));
    let info = driver.initialize().unwrap();

    let text = info.to_string();
    assert!(text.contains("=== ASIO Driver Information ==="));
    assert!(text.contains("Driver Name: Simulated ASIO Driver"));

    let channel = driver.output_channel(0).unwrap();
    assert_eq!(
        channel.to_string(),
        "Output Channel 0: Sim Out 0, Int32Lsb, group 0, inactive"
    );
}
