//! Camera sequencing and station connection logic for the ESP32-CAM array
//! firmware, kept free of ESP-IDF types so it builds and tests on the host.
//!
//! - [`power`]: PWDN rail with settle delay
//! - [`clock`] and [`perf`]: XCLK gate and CPU frequency lock around captures
//! - [`camera`]: start-up sequence and frame capture
//! - [`route`]: the `GET /api/v1/camera` handler
//! - [`connection`]: retrying station association with a blocking rendezvous
//! - [`indicator`]: status LED

pub mod camera;
pub mod clock;
pub mod config;
pub mod connection;
pub mod indicator;
pub mod perf;
pub mod power;
pub mod route;

pub use camera::{Camera, CameraDriver, CaptureError, Frame, StartError, DRIVER_TIMEOUT};
pub use clock::{ClockGuard, PixelClock};
pub use config::{CameraConfig, CameraSettings, ConfigError, FrameSize, PinMap, PixelFormat};
pub use connection::{
    ConnectionError, ConnectionSession, ConnectionState, ConnectionStateMachine, NetEvent,
    Outcome, Station, WaitTimeout, WifiCredentials, MAX_CONNECT_ATTEMPTS,
};
pub use indicator::{IndicatorLed, LedError};
pub use perf::{CountedLock, LockError, PerfLockGuard, PerformanceLock};
pub use power::{NoPin, PowerSequenceError, PowerSequencer, Rail, SETTLE_DELAY_MS};
pub use route::{handle_capture, CaptureSummary, ImageResponder, RouteError, CAPTURE_PATH};
