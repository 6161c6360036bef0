//! Areascan-capture binary: drives one camera session end to end.

use std::process;
use std::sync::Arc;
use std::time::Duration;

use areascan_capture::mock::MockDriver;
use areascan_capture::{
    logging, CameraDriver, CameraError, CameraSystem, PixelFormat, SystemConfig, V4l2Driver,
};
use clap::Parser;
use tracing::{error, info, warn};

/// Capture frames from an area-scan camera and report what arrives.
///
/// Arguments can be given on the command line or through environment
/// variables.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Camera serial; the first enumerated camera when omitted
    #[arg(short, long, env = "CAMERA_SERIAL")]
    serial: Option<String>,

    /// Pixel format catalog name (e.g. Mono8, BayerRG8, YUV422_8)
    #[arg(short, long, env = "PIXEL_FORMAT")]
    pixel_format: Option<PixelFormat>,

    /// Number of frames to acquire
    #[arg(short = 'n', long, env = "FRAME_COUNT", default_value = "10")]
    frame_count: u32,

    /// How long to wait for each frame, in milliseconds
    #[arg(long, env = "AWAIT_TIMEOUT_MS", default_value = "5000")]
    await_timeout_ms: u64,

    /// Use the simulated reference camera instead of V4L2 devices
    #[arg(long, env = "MOCK_CAMERA")]
    mock: bool,
}

fn main() {
    logging::init();
    let args = Args::parse();

    if let Err(err) = run(&args) {
        error!(error = %err, "Capture failed");
        process::exit(1);
    }
}

fn run(args: &Args) -> areascan_capture::Result<()> {
    let driver: Arc<dyn CameraDriver> = if args.mock {
        Arc::new(MockDriver::reference())
    } else {
        Arc::new(V4l2Driver::new())
    };
    let config = SystemConfig::default()
        .with_default_await_timeout(Some(Duration::from_millis(args.await_timeout_ms)));
    let system = CameraSystem::initialize(driver, config)?;

    let cameras = system.enumerate();
    for camera in &cameras {
        info!(serial = %camera.serial, model = %camera.model, "Found camera");
    }

    let serial = match &args.serial {
        Some(serial) => serial.clone(),
        None => cameras
            .first()
            .map(|camera| camera.serial.clone())
            .ok_or_else(|| CameraError::IdentityUnresolved("<any>".to_owned()))?,
    };

    let handle = system.create(&serial);
    if handle.is_null() {
        return Err(CameraError::IdentityUnresolved(serial));
    }

    if let Some(format) = args.pixel_format {
        system.set_pixel_format(handle, format)?;
    }
    info!(
        %serial,
        pixel_format = ?system.pixel_format(handle),
        exposure = system.exposure(handle),
        gain = system.gain(handle),
        fps = system.frame_rate(handle),
        "Session configured"
    );

    system.start(handle)?;
    for _ in 0..args.frame_count {
        let Some(frame) = system.await_new_frame(handle, None) else {
            warn!(%serial, "No frame before timeout");
            continue;
        };
        match system.materialize(handle, &frame) {
            Ok(image) => info!(
                sequence = frame.sequence,
                width = image.width,
                height = image.height,
                channels = image.channels,
                bytes = frame.byte_len,
                timestamp = ?frame.timestamp,
                "Frame"
            ),
            Err(err) => warn!(sequence = frame.sequence, error = %err, "Cannot materialize frame"),
        }
    }
    system.stop(handle)?;

    info!(stats = ?system.stats(handle), "Acquisition finished");
    system.destroy(handle)?;
    system.shutdown();
    Ok(())
}
