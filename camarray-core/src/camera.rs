use std::fmt::Debug;
use std::time::Duration;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use log::{debug, info};
use thiserror::Error;

use crate::clock::{ClockGuard, PixelClock};
use crate::config::{CameraConfig, ConfigError, PixelFormat};
use crate::perf::PerformanceLock;
use crate::power::{PowerSequenceError, PowerSequencer};

/// Worst case the driver blocks in `frame_get` before giving up on a frame.
pub const DRIVER_TIMEOUT: Duration = Duration::from_secs(4);

/// A frame buffer handed out by the driver.
///
/// Implementations return the buffer to the driver when dropped.
pub trait Frame {
    fn data(&self) -> &[u8];

    fn len(&self) -> usize {
        self.data().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn format(&self) -> PixelFormat;

    fn width(&self) -> usize;

    fn height(&self) -> usize;

    /// Time the frame was latched, relative to boot.
    fn timestamp(&self) -> Duration;
}

pub trait CameraDriver {
    type Frame<'a>: Frame
    where
        Self: 'a;

    /// Blocks until a frame is ready or [`DRIVER_TIMEOUT`] elapses.
    fn frame_get(&mut self) -> Option<Self::Frame<'_>>;
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to acquire performance lock: {0}")]
    LockAcquireFailed(String),
    #[error("failed to enable pixel clock: {0}")]
    ClockEnableFailed(String),
    #[error("camera returned no frame buffer")]
    NoFrame,
}

impl CaptureError {
    /// Fatal errors leave the capture pipeline without a safe way to continue.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CaptureError::NoFrame)
    }
}

#[derive(Debug, Error)]
pub enum StartError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Power(#[from] PowerSequenceError),
    #[error("camera driver init failed: {0}")]
    Driver(String),
}

pub struct Camera<D, C, L> {
    config: CameraConfig,
    driver: D,
    clock: C,
    lock: L,
}

impl<D, C, L> Camera<D, C, L>
where
    D: CameraDriver,
    C: PixelClock,
    L: PerformanceLock,
{
    /// Power the sensor, bring up the driver, then stop XCLK until the first
    /// capture.
    pub fn start<P, W, F, E>(
        config: CameraConfig,
        power: &mut PowerSequencer<P, W>,
        mut clock: C,
        lock: L,
        init: F,
    ) -> Result<Self, StartError>
    where
        P: OutputPin,
        W: DelayNs,
        F: FnOnce(&CameraConfig) -> Result<D, E>,
        E: Debug,
    {
        config.validate()?;

        info!("Initializing camera");
        for (signal, pin) in config.pins.signals() {
            match pin {
                Some(pin) => debug!("  {:<5} GPIO{}", signal, pin),
                None => debug!("  {:<5} unconnected", signal),
            }
        }

        power.power_on()?;
        let driver = init(&config).map_err(|e| StartError::Driver(format!("{:?}", e)))?;

        // Probing the sensor leaves XCLK running.
        clock.disable();

        info!(
            "Camera initialized: {:?} {:?} quality {}",
            config.pixel_format, config.frame_size, config.jpeg_quality
        );

        Ok(Self {
            config,
            driver,
            clock,
            lock,
        })
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    /// Capture one frame.
    ///
    /// Holds the performance lock and runs XCLK only for the duration of the
    /// driver call. The clock is stopped and the lock released before this
    /// returns, on every path. The frame borrows the camera, so at most one
    /// buffer is outstanding.
    pub fn capture_frame(&mut self) -> Result<D::Frame<'_>, CaptureError> {
        let Self {
            config,
            driver,
            clock,
            lock,
        } = self;

        let _lock = lock
            .hold()
            .map_err(|e| CaptureError::LockAcquireFailed(format!("{:?}", e)))?;
        let _xclk = ClockGuard::enable(clock, config.xclk_freq_hz)
            .map_err(|e| CaptureError::ClockEnableFailed(format!("{:?}", e)))?;

        driver.frame_get().ok_or(CaptureError::NoFrame)
    }
}
