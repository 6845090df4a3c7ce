use std::fmt::Debug;
use std::time::{Duration, Instant};

use log::{error, info, warn};
use thiserror::Error;

use crate::camera::{Camera, CameraDriver, CaptureError, Frame, DRIVER_TIMEOUT};
use crate::clock::PixelClock;
use crate::config::PixelFormat;
use crate::perf::PerformanceLock;

pub const CAPTURE_PATH: &str = "/api/v1/camera";

pub const CAPTURE_HEADERS: [(&str, &str); 2] = [
    ("Content-Type", "image/jpeg"),
    ("Content-Disposition", "inline; filename=capture.jpg"),
];

/// Writes the capture route's response onto whatever HTTP server hosts it.
pub trait ImageResponder {
    type Error: Debug;

    fn send_image(&mut self, headers: &[(&str, &str)], body: &[u8]) -> Result<(), Self::Error>;

    /// Status line only, no body.
    fn send_status(&mut self, status: u16) -> Result<(), Self::Error>;
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("unsupported frame format {0:?}, only JPEG can be served")]
    UnsupportedFormat(PixelFormat),
    #[error("failed to write response: {0}")]
    Write(String),
}

impl RouteError {
    pub fn status(&self) -> u16 {
        500
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, RouteError::Capture(e) if e.is_fatal())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSummary {
    pub bytes: usize,
    pub elapsed: Duration,
}

/// `GET /api/v1/camera`: capture one frame and send it back as JPEG.
///
/// Any failure is answered with a bare 500 before the error is returned.
pub fn handle_capture<D, C, L, R>(
    camera: &mut Camera<D, C, L>,
    responder: &mut R,
) -> Result<CaptureSummary, RouteError>
where
    D: CameraDriver,
    C: PixelClock,
    L: PerformanceLock,
    R: ImageResponder,
{
    let started = Instant::now();

    let result = serve_frame(camera, responder);
    let summary = match result {
        Ok(bytes) => CaptureSummary {
            bytes,
            elapsed: started.elapsed(),
        },
        Err(e @ RouteError::Write(_)) => {
            error!("Camera response failed: {}", e);
            return Err(e);
        }
        Err(e) => {
            error!("Camera capture failed: {}", e);
            if let Err(write_err) = responder.send_status(e.status()) {
                error!("Failed to send {}: {:?}", e.status(), write_err);
            }
            return Err(e);
        }
    };

    info!(
        "JPG: {}KB {}ms",
        summary.bytes / 1024,
        summary.elapsed.as_millis()
    );
    if summary.elapsed > DRIVER_TIMEOUT {
        warn!("Capture took longer than the driver timeout");
    }

    Ok(summary)
}

fn serve_frame<D, C, L, R>(camera: &mut Camera<D, C, L>, responder: &mut R) -> Result<usize, RouteError>
where
    D: CameraDriver,
    C: PixelClock,
    L: PerformanceLock,
    R: ImageResponder,
{
    let frame = camera.capture_frame()?;

    if frame.format() != PixelFormat::Jpeg {
        return Err(RouteError::UnsupportedFormat(frame.format()));
    }

    responder
        .send_image(&CAPTURE_HEADERS, frame.data())
        .map_err(|e| RouteError::Write(format!("{:?}", e)))?;

    Ok(frame.len())
}
