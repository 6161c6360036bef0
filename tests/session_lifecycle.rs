//! Session lifecycle and acquisition behaviour against the mock driver.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use areascan_capture::mock::{MockCameraSpec, MockDriver, TestPattern};
use areascan_capture::validation::{validate_color_bars, validate_frame_order};
use areascan_capture::{
    Binning, BinningMode, CameraDriver, CameraError, CameraModel, CameraSystem, KnownModel, PixelFormat,
    SessionHandle, SessionState, SystemConfig, WhiteBalance,
};

const FRAME_TIMEOUT: Option<Duration> = Some(Duration::from_secs(2));
const GUARD: Duration = Duration::from_secs(5);

fn config() -> SystemConfig {
    SystemConfig::default()
        .with_grab_poll_interval(Duration::from_millis(20))
        .with_default_await_timeout(None)
}

fn system_with(cameras: Vec<MockCameraSpec>) -> (Arc<MockDriver>, Arc<CameraSystem>) {
    let driver = Arc::new(MockDriver::new(cameras));
    let shared: Arc<dyn CameraDriver> = Arc::clone(&driver) as Arc<dyn CameraDriver>;
    let system = CameraSystem::initialize(shared, config()).expect("initialize failed");
    (driver, Arc::new(system))
}

fn reference_system() -> (Arc<MockDriver>, Arc<CameraSystem>) {
    system_with(vec![MockCameraSpec::reference("CAM-001")])
}

/// Run `wait` on another thread and fail if it does not finish within `GUARD`.
fn bounded<T, F, G>(wait: F, during: G) -> T
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
    G: FnOnce(),
{
    let (tx, rx) = mpsc::channel();
    let waiter = thread::spawn(move || {
        let _ = tx.send(wait());
    });
    during();
    let value = rx.recv_timeout(GUARD).expect("waiter did not unblock");
    waiter.join().expect("waiter panicked");
    value
}

#[test]
fn test_every_enumerated_device_creates_and_destroys_once() {
    let (_driver, system) = system_with(vec![
        MockCameraSpec::reference("CAM-001"),
        MockCameraSpec::reference("CAM-002").with_model_name("acA1300-30gm"),
    ]);

    let descriptors = system.enumerate();
    assert_eq!(descriptors.len(), 2);
    for descriptor in descriptors {
        let handle = system.create(&descriptor.serial);
        assert!(!handle.is_null(), "create failed for {}", descriptor.serial);
        assert!(system.destroy(handle).is_ok());
        assert!(matches!(system.destroy(handle), Err(CameraError::InvalidHandle)));
    }
    assert_eq!(system.session_count(), 0);
}

#[test]
fn test_bogus_serial_yields_null_handle() {
    let (_driver, system) = reference_system();
    let handle = system.create("not-a-real-serial");
    assert!(handle.is_null());
    assert_eq!(handle.to_raw(), 0);
    assert_eq!(system.resolve_model("not-a-real-serial"), CameraModel::Unknown);
}

#[test]
fn test_exposure_round_trip_and_rejection() {
    let (_driver, system) = reference_system();
    let handle = system.create("CAM-001");

    let (min, max) = (system.min_exposure(handle), system.max_exposure(handle));
    assert!(min > 0.0 && min < max, "range [{min}, {max}]");

    for value in [min, (min + max) / 2.0, max] {
        system.set_exposure(handle, value).expect("set_exposure failed");
        assert!((system.exposure(handle) - value).abs() < 1.0);
    }

    let before = system.exposure(handle);
    let result = system.set_exposure(handle, max * 2.0);
    assert!(matches!(result, Err(CameraError::DeviceRejectedParameter { .. })));
    assert!(system.set_exposure(handle, min / 2.0).is_err());
    assert!((system.exposure(handle) - before).abs() < f64::EPSILON);
}

#[test]
fn test_manual_exposure_disables_auto() {
    let (_driver, system) = reference_system();
    let handle = system.create("CAM-001");
    assert!(system.auto_exposure(handle));
    system.set_exposure(handle, 1000.0).expect("set_exposure failed");
    assert!(!system.auto_exposure(handle));
    system.set_auto_exposure(handle, true).expect("set_auto_exposure failed");
    assert!(system.auto_exposure(handle));
}

#[test]
fn test_white_balance_shape_follows_capability() {
    let (_driver, system) = reference_system();
    let handle = system.create("CAM-001");

    assert!(system.min_white_balance(handle) < system.max_white_balance(handle));
    let ratios = WhiteBalance::Ratios([1.5, 1.0, 2.0]);
    system.set_white_balance(handle, ratios).expect("set_white_balance failed");
    assert_eq!(system.white_balance(handle), Some(ratios));
    assert!(!system.auto_white_balance(handle));

    let wrong_shape = system.set_white_balance(handle, WhiteBalance::Temperature(5000.0));
    assert!(matches!(wrong_shape, Err(CameraError::DeviceRejectedParameter { .. })));
    assert_eq!(system.white_balance(handle), Some(ratios));
}

#[test]
fn test_format_and_binning_locked_while_streaming() {
    let (_driver, system) = reference_system();
    let handle = system.create("CAM-001");
    let binning = Binning::new(BinningMode::Sum, 2, 2).expect("binning");

    system.start(handle).expect("start failed");
    assert!(matches!(
        system.set_pixel_format(handle, PixelFormat::BayerRg8),
        Err(CameraError::InvalidStateTransition {
            from: SessionState::Streaming,
            ..
        })
    ));
    assert!(system.set_binning(handle, binning).is_err());
    assert_eq!(system.pixel_format(handle), Some(PixelFormat::Mono8));

    system.stop(handle).expect("stop failed");
    system.set_pixel_format(handle, PixelFormat::BayerRg8).expect("set_pixel_format failed");
    system.set_binning(handle, binning).expect("set_binning failed");
    assert_eq!(system.pixel_format(handle), Some(PixelFormat::BayerRg8));
    assert_eq!(system.binning(handle), Some(binning));
}

#[test]
fn test_take_frame_before_start_and_after_await() {
    let (_driver, system) = reference_system();
    let handle = system.create("CAM-001");
    assert!(system.take_frame(handle).is_none());

    system.start(handle).expect("start failed");
    let awaited = system.await_new_frame(handle, FRAME_TIMEOUT).expect("no frame");
    let taken = system.take_frame(handle).expect("take_frame after await");
    assert!(taken.width > 0 && taken.height > 0);
    assert!(taken.sequence >= awaited.sequence);
    system.stop(handle).expect("stop failed");

    // The last frame of the run stays available until the next start.
    assert!(system.take_frame(handle).is_some());
    system.start(handle).expect("restart failed");
    let fresh = system.await_new_frame(handle, FRAME_TIMEOUT).expect("no frame after restart");
    assert!(fresh.sequence > taken.sequence);
}

#[test]
fn test_stop_unblocks_waiter() {
    let spec = MockCameraSpec::reference("CAM-001").with_frame_rate(1.0);
    let (_driver, system) = system_with(vec![spec]);
    let handle = system.create("CAM-001");
    system.start(handle).expect("start failed");
    // Consume the first frame so the next wait has nothing to return.
    system.await_new_frame(handle, FRAME_TIMEOUT).expect("no first frame");

    let waiting = Arc::clone(&system);
    let result = bounded(
        move || waiting.await_new_frame(handle, None),
        || {
            thread::sleep(Duration::from_millis(100));
            system.stop(handle).expect("stop failed");
        },
    );
    assert!(result.is_none());
    assert_eq!(system.state(handle), Some(SessionState::Configuring));
}

#[test]
fn test_destroy_unblocks_waiter() {
    let spec = MockCameraSpec::reference("CAM-001").with_frame_rate(1.0);
    let (_driver, system) = system_with(vec![spec]);
    let handle = system.create("CAM-001");
    system.start(handle).expect("start failed");
    system.await_new_frame(handle, FRAME_TIMEOUT).expect("no first frame");

    let waiting = Arc::clone(&system);
    let result = bounded(
        move || waiting.await_new_frame(handle, None),
        || {
            thread::sleep(Duration::from_millis(100));
            system.destroy(handle).expect("destroy failed");
        },
    );
    assert!(result.is_none());
    assert!(system.session(handle).is_none());
}

#[test]
fn test_await_times_out() {
    let spec = MockCameraSpec::reference("CAM-001").with_frame_rate(1.0);
    let (_driver, system) = system_with(vec![spec]);
    let handle = system.create("CAM-001");
    system.start(handle).expect("start failed");
    system.await_new_frame(handle, FRAME_TIMEOUT).expect("no first frame");

    let session = system.session(handle).expect("session");
    let result = session.await_new_frame(Some(Duration::from_millis(50)));
    assert!(matches!(result, Err(CameraError::AcquisitionTimeout)));
}

#[test]
fn test_bayer8_materializes_three_channels() {
    let (_driver, system) = reference_system();
    let handle = system.create("CAM-001");
    system.set_pixel_format(handle, PixelFormat::BayerRg8).expect("set_pixel_format failed");
    system.start(handle).expect("start failed");

    let frame = system.await_new_frame(handle, FRAME_TIMEOUT).expect("no frame");
    let image = system.materialize(handle, &frame).expect("materialize failed");
    assert_eq!((image.width, image.height), (frame.width, frame.height));
    assert_eq!(image.channels, 3);
    assert_eq!(image.bit_depth, 8);
}

#[test]
fn test_uncataloged_code_fails_materialize() {
    let spec = MockCameraSpec::reference("CAM-001").with_reported_code(0x3247_504d);
    let (_driver, system) = system_with(vec![spec]);
    let handle = system.create("CAM-001");
    system.start(handle).expect("start failed");

    let frame = system.await_new_frame(handle, FRAME_TIMEOUT).expect("no frame");
    assert_eq!(frame.format.0, 0x3247_504d);
    let result = system.materialize(handle, &frame);
    assert!(matches!(result, Err(CameraError::UnsupportedFormat(0x3247_504d))));
}

#[test]
fn test_reference_camera_scenario() {
    let (_driver, system) = reference_system();
    assert_eq!(
        system.resolve_model("CAM-001"),
        CameraModel::Known(KnownModel::Daa1280_54uc)
    );

    let handle = system.create("CAM-001");
    assert!(!handle.is_null());
    system.set_pixel_format(handle, PixelFormat::Mono8).expect("set_pixel_format failed");
    system.start(handle).expect("start failed");

    let frame = system.await_new_frame(handle, FRAME_TIMEOUT).expect("no frame");
    assert_eq!((frame.width, frame.height), (1280, 960));

    let image = system.materialize(handle, &frame).expect("materialize failed");
    assert_eq!((image.width, image.height), (1280, 960));
    assert_eq!((image.channels, image.bit_depth), (1, 8));
    assert_eq!(image.data.len(), 1280 * 960);

    system.stop(handle).expect("stop failed");
    system.destroy(handle).expect("destroy failed");
    assert!(system.start(handle).is_err());
}

#[test]
fn test_color_bars_survive_yuv_stream() {
    let (_driver, system) = reference_system();
    let handle = system.create("CAM-001");
    system.set_pixel_format(handle, PixelFormat::Ycbcr422).expect("set_pixel_format failed");
    system.start(handle).expect("start failed");

    let frame = system.await_new_frame(handle, FRAME_TIMEOUT).expect("no frame");
    let image = system.materialize(handle, &frame).expect("materialize failed");
    let result = validate_color_bars(&image);
    assert!(result.is_ok(), "color bars: {result:?}");
}

#[test]
fn test_binning_applied_on_materialize() {
    let spec = MockCameraSpec::reference("CAM-001").with_pattern(TestPattern::Solid(100, 100, 100));
    let (_driver, system) = system_with(vec![spec]);
    let handle = system.create("CAM-001");
    let binning = Binning::new(BinningMode::Average, 2, 4).expect("binning");
    system.set_binning(handle, binning).expect("set_binning failed");
    system.start(handle).expect("start failed");

    let frame = system.await_new_frame(handle, FRAME_TIMEOUT).expect("no frame");
    let image = system.materialize(handle, &frame).expect("materialize failed");
    assert_eq!((image.width, image.height), (640, 240));
    assert_eq!(image.sample_at(10, 10, 0), Some(100.0));
}

#[test]
fn test_binning_fixed_when_frame_was_captured() {
    let (_driver, system) = reference_system();
    let handle = system.create("CAM-001");
    system.start(handle).expect("start failed");
    let frame = system.await_new_frame(handle, FRAME_TIMEOUT).expect("no frame");
    let before = system.materialize(handle, &frame).expect("materialize failed");
    system.stop(handle).expect("stop failed");

    let binning = Binning::new(BinningMode::Sum, 2, 2).expect("binning");
    system.set_binning(handle, binning).expect("set_binning failed");
    let taken = system.take_frame(handle).expect("last frame of the run");
    let after = system.materialize(handle, &taken).expect("materialize failed");

    assert_eq!((before.width, before.height), (1280, 960));
    assert_eq!(
        (after.width, after.height, after.bit_depth),
        (before.width, before.height, before.bit_depth),
        "frame was captured unbinned"
    );
    assert_eq!(system.binning(handle), Some(binning));
}

#[test]
fn test_frames_surface_in_order() {
    let spec = MockCameraSpec::reference("CAM-001").with_frame_rate(54.0);
    let (_driver, system) = system_with(vec![spec]);
    let handle = system.create("CAM-001");
    system.start(handle).expect("start failed");

    let frames: Vec<_> = (0..5)
        .map(|_| system.await_new_frame(handle, FRAME_TIMEOUT).expect("no frame"))
        .collect();
    let result = validate_frame_order(&frames);
    assert!(result.is_ok(), "frame order: {result:?}");

    let stats = system.stats(handle).expect("stats");
    assert!(stats.surfaced >= 5);
    assert!(stats.published >= stats.surfaced);
}

#[test]
fn test_stale_frame_after_newer_frame() {
    let (_driver, system) = reference_system();
    let handle = system.create("CAM-001");
    system.start(handle).expect("start failed");

    let first = system.await_new_frame(handle, FRAME_TIMEOUT).expect("no frame");
    let second = system.await_new_frame(handle, FRAME_TIMEOUT).expect("no second frame");
    assert!(second.sequence > first.sequence);
    assert!(matches!(
        system.frame_data(handle, &first),
        Err(CameraError::StaleFrame)
    ));
}

#[test]
fn test_stale_session_handle_after_slot_reuse() {
    let (_driver, system) = reference_system();
    let first = system.create("CAM-001");
    system.destroy(first).expect("destroy failed");

    let second = system.create("CAM-001");
    assert_ne!(first, second);
    assert!(system.session(first).is_none());
    assert!(system.start(first).is_err());
    assert!((system.exposure(first) + 1.0).abs() < f64::EPSILON);
    assert!(system.session(second).is_some());
    assert_eq!(SessionHandle::from_raw(second.to_raw()), second);
}

#[test]
fn test_device_released_before_recreate() {
    let (driver, system) = reference_system();
    for _ in 0..20 {
        let handle = system.create("CAM-001");
        assert!(!handle.is_null(), "create after destroy failed");
        system.start(handle).expect("start failed");

        let racer = {
            let system = Arc::clone(&system);
            thread::spawn(move || loop {
                let next = system.create("CAM-001");
                if !next.is_null() {
                    return next;
                }
                thread::yield_now();
            })
        };
        system.destroy(handle).expect("destroy failed");
        let next = racer.join().expect("racer panicked");
        system.destroy(next).expect("destroy failed");
    }

    assert_eq!(driver.peak_open_count(), 1, "device was opened by two sessions at once");
    assert_eq!(driver.open_count("CAM-001"), 0);
    assert_eq!(system.session_count(), 0);
}

#[test]
fn test_shutdown_terminates_driver_once() {
    let (driver, system) = reference_system();
    let handle = system.create("CAM-001");
    system.start(handle).expect("start failed");

    system.shutdown();
    system.shutdown();
    assert_eq!(driver.terminate_count(), 1);
    assert!(!driver.is_initialized());
    assert!(system.take_frame(handle).is_none());
    assert!(system.create("CAM-001").is_null());
}
