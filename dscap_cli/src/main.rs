use std::error::Error;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use dscap::{CaptureConfig, CarryOver, DsCapture, DualFrame, StatsSnapshot};
use log::{info, warn};

#[derive(Parser, Debug)]
#[command(version, about = "Capture frames from a DS capture board")]
struct Args {
    /// Background capture threads
    #[arg(long, default_value_t = 1)]
    workers: usize,

    /// How long to capture for, in seconds
    #[arg(long, default_value_t = 10)]
    seconds: u64,

    /// USB transfer timeout in milliseconds, 0 waits forever
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,

    /// Fill lines the device skipped from the row above instead of the last frame
    #[arg(long)]
    line_repeat: bool,

    /// Grab frames one by one on this thread instead of using workers
    #[arg(long)]
    poll: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = Args::parse();

    let carry = if args.line_repeat {
        CarryOver::PreviousLine
    } else {
        CarryOver::PreviousFrame
    };
    let config = CaptureConfig::default()
        .with_workers(args.workers)
        .with_transfer_timeout(Duration::from_millis(args.timeout_ms))
        .with_carry(carry);

    let mut capture = DsCapture::open_with(config)?;

    match capture.device_status() {
        Ok(status) => info!(
            "device frame {}, lcd {}, capturing {}",
            status.frame_count, status.lcd_on, status.capture_in_progress
        ),
        Err(err) => warn!("could not read device status: {}", err),
    }

    let duration = Duration::from_secs(args.seconds);
    if args.poll {
        poll(&mut capture, duration);
    } else {
        background(&mut capture, duration)?;
    }

    capture.close();
    Ok(())
}

fn poll(capture: &mut DsCapture, duration: Duration) {
    let mut frame = DualFrame::new();
    let start = Instant::now();
    let mut last = start;
    let mut grabbed = 0;
    let mut dropped = 0;

    while start.elapsed() < duration {
        if capture.grab_frame(&mut frame) {
            grabbed += 1;
        } else {
            dropped += 1;
        }

        if last.elapsed() >= Duration::from_secs(1) {
            info!("{} fps, {} dropped", grabbed, dropped);
            grabbed = 0;
            dropped = 0;
            last = Instant::now();
        }
    }
}

fn background(capture: &mut DsCapture, duration: Duration) -> Result<(), Box<dyn Error>> {
    let frame = DualFrame::shared();
    capture.start_capture(frame.clone())?;

    let start = Instant::now();
    let mut last = StatsSnapshot::default();
    while start.elapsed() < duration {
        thread::sleep(Duration::from_secs(1));

        let stats = capture.stats();
        let lit = {
            let frame = frame.lock();
            frame.pixels().iter().filter(|&&p| p != 0).count()
        };

        let frames = stats.published - last.published;
        let lines = stats.lines_received - last.lines_received;
        info!(
            "{} fps, {} dropped, {} lines/frame, {} lit pixels",
            frames,
            stats.failed - last.failed,
            if frames > 0 { lines / frames } else { 0 },
            lit
        );
        last = stats;
    }

    capture.end_capture();
    Ok(())
}
