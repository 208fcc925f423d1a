/*!
Exposure runs.

A synchronous run reads and writes every frame on the calling thread. An
asynchronous run moves the command channel to a worker thread, hands frames to
a writer thread through a bounded channel and watches the detector status from
the calling thread until the detector is idle again.

Ctrl+C during a run sends `AbortCurrentProcess` on the status channel.
*/

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::bounded;
use tracing::{error, info};
use xpad::{DeviceSession, ExposureOutcome, ImageFrame, StatusHandle};

use crate::config::PollingConfig;
use crate::writer::{self, ImageFormat};

/// Frames buffered between the exposure worker and the file writer
const FRAME_QUEUE_DEPTH: usize = 16;

/// Files written by one run and how the server closed it
#[derive(Debug)]
pub struct ExposureReport {
    pub outcome: ExposureOutcome,
    pub written: Vec<PathBuf>,
}

impl ExposureReport {
    pub fn print(&self) {
        match &self.outcome {
            ExposureOutcome::Done => println!("✅ Exposure done ({} images)", self.written.len()),
            ExposureOutcome::Aborted => println!(
                "🛑 Exposure aborted ({} images written)",
                self.written.len()
            ),
            ExposureOutcome::Other(reply) => println!(
                "Exposure finished with reply {:?} ({} images)",
                reply,
                self.written.len()
            ),
        }
    }
}

/// Ctrl+C handling: abort while armed, exit otherwise
#[derive(Clone)]
pub struct AbortSwitch {
    armed: Arc<AtomicBool>,
}

impl AbortSwitch {
    /// Install the process-wide Ctrl+C handler
    pub fn install(status: StatusHandle) -> Result<Self> {
        let armed = Arc::new(AtomicBool::new(false));
        let handler_armed = Arc::clone(&armed);
        ctrlc::set_handler(move || {
            if handler_armed.load(Ordering::SeqCst) {
                println!("\n🛑 Received Ctrl+C, aborting current process...");
                if let Err(e) = status.abort() {
                    error!("Abort failed: {}", e);
                }
            } else {
                println!("\n🛑 Received Ctrl+C, exiting");
                std::process::exit(130);
            }
        })
        .context("Failed to install Ctrl+C handler")?;
        Ok(Self { armed })
    }

    /// Arm until the returned guard is dropped
    pub fn arm(&self) -> ArmedGuard<'_> {
        self.armed.store(true, Ordering::SeqCst);
        ArmedGuard { switch: self }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }
}

pub struct ArmedGuard<'a> {
    switch: &'a AbortSwitch,
}

impl Drop for ArmedGuard<'_> {
    fn drop(&mut self) {
        self.switch.armed.store(false, Ordering::SeqCst);
    }
}

fn image_stem(index: usize) -> String {
    format!("test{}", index)
}

/// Run an exposure on the calling thread
pub fn expose(session: &mut DeviceSession, dir: &Path, format: ImageFormat) -> Result<ExposureReport> {
    println!("📸 Exposure in progress .....");
    let mut written = Vec::new();
    let outcome = session.acquire(|index, frame| -> Result<()> {
        println!("Image Number = {}", index);
        written.push(writer::write_image(dir, &image_stem(index), format, &frame)?);
        Ok(())
    })?;
    Ok(ExposureReport { outcome, written })
}

/// Run an exposure on a worker thread while polling the detector status
pub fn expose_async(
    session: &mut DeviceSession,
    dir: &Path,
    format: ImageFormat,
    polling: &PollingConfig,
) -> Result<ExposureReport> {
    let status = session.status_handle();
    let (frame_tx, frame_rx) = bounded::<(usize, ImageFrame)>(FRAME_QUEUE_DEPTH);

    thread::scope(|scope| {
        let worker = scope.spawn(move || {
            session.acquire(|index, frame| -> Result<()> {
                frame_tx
                    .send((index, frame))
                    .map_err(|_| anyhow!("Image writer stopped"))
            })
        });

        let file_writer = scope.spawn(move || -> Result<Vec<PathBuf>> {
            let mut written = Vec::new();
            for (index, frame) in frame_rx {
                println!("Image Number = {}", index);
                written.push(writer::write_image(dir, &image_stem(index), format, &frame)?);
            }
            Ok(written)
        });

        watch_status(&status, polling, || worker.is_finished());

        println!("Waiting for the TCP transfer to finish...");
        let outcome = worker
            .join()
            .map_err(|_| anyhow!("Exposure thread panicked"))?;
        let written = file_writer
            .join()
            .map_err(|_| anyhow!("Writer thread panicked"))?;

        // A writer failure also stops the worker; report the root cause
        let written = written?;
        let outcome = outcome?;
        Ok(ExposureReport { outcome, written })
    })
}

/// Wait for the detector to start and then to return to idle
///
/// Returns early once `finished` reports the exposure worker is done.
fn watch_status<F>(status: &StatusHandle, polling: &PollingConfig, finished: F)
where
    F: Fn() -> bool,
{
    while status.detector_status().is_idle() {
        if finished() {
            return;
        }
        thread::sleep(polling.start_interval());
    }

    loop {
        let current = status.detector_status();
        if current.is_idle() {
            println!("Detector is free");
            return;
        }
        println!("Detector status = {}", current);
        if finished() {
            info!("Exposure worker finished while detector reports {}", current);
            return;
        }
        thread::sleep(polling.interval());
    }
}
