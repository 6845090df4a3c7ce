// Camera configuration for the AI-Thinker ESP32-CAM (OV2640 sensor)
//
// Pin Configuration:
// - PWDN: GPIO32 (power-down, active high)
// - RESET: -1 (software reset is performed by the driver)
// - XCLK: GPIO0
// - SIOD (SDA): GPIO26
// - SIOC (SCL): GPIO27
// - Y9 (D7): GPIO35
// - Y8 (D6): GPIO34
// - Y7 (D5): GPIO39
// - Y6 (D4): GPIO36
// - Y5 (D3): GPIO21
// - Y4 (D2): GPIO19
// - Y3 (D1): GPIO18
// - Y2 (D0): GPIO5
// - VSYNC: GPIO25
// - HREF: GPIO23
// - PCLK: GPIO22

use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pixel clock handed to the sensor while a capture is running.
pub const XCLK_FREQ_HZ: u32 = 20_000_000;

const MAX_XCLK_FREQ_HZ: u32 = 40_000_000;

/// Highest accepted JPEG quality value. Lower numbers mean better quality.
pub const MAX_JPEG_QUALITY: u8 = 63;

/// Lowest quality value the OV2640 encodes reliably; anything below
/// intermittently produces truncated frames.
pub const MIN_RELIABLE_JPEG_QUALITY: u8 = 4;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("JPEG quality {0} is out of range 0-63")]
    QualityOutOfRange(u8),
    #[error("frame size {0:?} is larger than QVGA and requires JPEG output")]
    FrameSizeRequiresJpeg(FrameSize),
    #[error("{0} frame buffers requested; continuous mode is only supported with JPEG")]
    BufferCountRequiresJpeg(u8),
    #[error("at least one frame buffer is required")]
    NoFrameBuffers,
    #[error("XCLK frequency {0} Hz is outside 1 Hz to 40 MHz")]
    ClockOutOfRange(u32),
    #[error("GPIO{pin} is assigned to both {first} and {second}")]
    PinConflict {
        pin: u8,
        first: &'static str,
        second: &'static str,
    },
    #[error("invalid camera settings: {0}")]
    Parse(#[from] toml::de::Error),
}

/// GPIO assignment of every camera signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinMap {
    pub pwdn: Option<u8>,
    pub reset: Option<u8>,
    pub xclk: u8,
    pub sccb_sda: u8,
    pub sccb_scl: u8,
    /// D0 through D7 (Y2 through Y9 in the OV2640 datasheet).
    pub data: [u8; 8],
    pub vsync: u8,
    pub href: u8,
    pub pclk: u8,
}

impl PinMap {
    pub const AI_THINKER: PinMap = PinMap {
        pwdn: Some(32),
        reset: None,
        xclk: 0,
        sccb_sda: 26,
        sccb_scl: 27,
        data: [5, 18, 19, 21, 36, 39, 34, 35],
        vsync: 25,
        href: 23,
        pclk: 22,
    };

    /// Every signal by name, with its GPIO or `None` when unconnected.
    pub fn signals(&self) -> [(&'static str, Option<u8>); 16] {
        const DATA_NAMES: [&str; 8] = ["D0", "D1", "D2", "D3", "D4", "D5", "D6", "D7"];

        let mut signals = [("", None); 16];
        signals[0] = ("PWDN", self.pwdn);
        signals[1] = ("RESET", self.reset);
        signals[2] = ("XCLK", Some(self.xclk));
        signals[3] = ("SIOD", Some(self.sccb_sda));
        signals[4] = ("SIOC", Some(self.sccb_scl));
        for (i, (name, pin)) in DATA_NAMES.iter().zip(self.data).enumerate() {
            signals[5 + i] = (*name, Some(pin));
        }
        signals[13] = ("VSYNC", Some(self.vsync));
        signals[14] = ("HREF", Some(self.href));
        signals[15] = ("PCLK", Some(self.pclk));
        signals
    }

    fn check_conflicts(&self) -> Result<(), ConfigError> {
        let signals = self.signals();
        for (i, (first, pin)) in signals.iter().enumerate() {
            let Some(pin) = pin else { continue };
            if let Some((second, _)) = signals[i + 1..].iter().find(|(_, p)| *p == Some(*pin)) {
                return Err(ConfigError::PinConflict {
                    pin: *pin,
                    first: *first,
                    second: *second,
                });
            }
        }
        Ok(())
    }
}

impl Default for PinMap {
    fn default() -> Self {
        Self::AI_THINKER
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PixelFormat {
    Rgb565,
    Yuv422,
    Yuv420,
    Grayscale,
    Jpeg,
    Rgb888,
    Raw,
    Rgb444,
    Rgb555,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrameSize {
    Qqvga,
    Qcif,
    Hqvga,
    Qvga,
    Cif,
    Hvga,
    Vga,
    Svga,
    Xga,
    Hd,
    Sxga,
    Uxga,
    Qxga,
}

impl FrameSize {
    pub fn dimensions(self) -> (u16, u16) {
        match self {
            FrameSize::Qqvga => (160, 120),
            FrameSize::Qcif => (176, 144),
            FrameSize::Hqvga => (240, 176),
            FrameSize::Qvga => (320, 240),
            FrameSize::Cif => (400, 296),
            FrameSize::Hvga => (480, 320),
            FrameSize::Vga => (640, 480),
            FrameSize::Svga => (800, 600),
            FrameSize::Xga => (1024, 768),
            FrameSize::Hd => (1280, 720),
            FrameSize::Sxga => (1280, 1024),
            FrameSize::Uxga => (1600, 1200),
            FrameSize::Qxga => (2048, 1536),
        }
    }

    /// Uncompressed formats cannot be captured reliably above QVGA.
    pub fn exceeds_qvga(self) -> bool {
        let (width, height) = self.dimensions();
        width > 320 || height > 240
    }
}

/// Sensor and driver configuration. Built once at startup and then only read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub pins: PinMap,
    pub xclk_freq_hz: u32,
    pub pixel_format: PixelFormat,
    pub frame_size: FrameSize,
    /// 0-63, lower is better.
    pub jpeg_quality: u8,
    /// More than one buffer puts I2S in continuous mode; JPEG only.
    pub fb_count: u8,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            pins: PinMap::AI_THINKER,
            xclk_freq_hz: XCLK_FREQ_HZ,
            pixel_format: PixelFormat::Jpeg,
            frame_size: FrameSize::Qxga,
            jpeg_quality: MIN_RELIABLE_JPEG_QUALITY,
            fb_count: 1,
        }
    }
}

impl CameraConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jpeg_quality > MAX_JPEG_QUALITY {
            return Err(ConfigError::QualityOutOfRange(self.jpeg_quality));
        }
        if self.xclk_freq_hz == 0 || self.xclk_freq_hz > MAX_XCLK_FREQ_HZ {
            return Err(ConfigError::ClockOutOfRange(self.xclk_freq_hz));
        }
        if self.fb_count == 0 {
            return Err(ConfigError::NoFrameBuffers);
        }
        if self.pixel_format != PixelFormat::Jpeg {
            if self.frame_size.exceeds_qvga() {
                return Err(ConfigError::FrameSizeRequiresJpeg(self.frame_size));
            }
            if self.fb_count > 1 {
                return Err(ConfigError::BufferCountRequiresJpeg(self.fb_count));
            }
        }
        self.pins.check_conflicts()?;

        if self.pixel_format == PixelFormat::Jpeg && self.jpeg_quality < MIN_RELIABLE_JPEG_QUALITY
        {
            warn!(
                "JPEG quality {} is below {}; frames may come back truncated",
                self.jpeg_quality, MIN_RELIABLE_JPEG_QUALITY
            );
        }

        Ok(())
    }

    /// Apply overrides and validate the result.
    pub fn with_settings(mut self, settings: &CameraSettings) -> Result<Self, ConfigError> {
        if let Some(pixel_format) = settings.pixel_format {
            self.pixel_format = pixel_format;
        }
        if let Some(frame_size) = settings.frame_size {
            self.frame_size = frame_size;
        }
        if let Some(jpeg_quality) = settings.jpeg_quality {
            self.jpeg_quality = jpeg_quality;
        }
        if let Some(xclk_freq_hz) = settings.xclk_freq_hz {
            self.xclk_freq_hz = xclk_freq_hz;
        }
        self.validate()?;
        Ok(self)
    }
}

/// Optional overrides for the tunable part of [`CameraConfig`], read from
/// `camera.toml`. Pin assignments are fixed by the board and not exposed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CameraSettings {
    #[serde(default)]
    pub pixel_format: Option<PixelFormat>,
    #[serde(default)]
    pub frame_size: Option<FrameSize>,
    #[serde(default)]
    pub jpeg_quality: Option<u8>,
    #[serde(default)]
    pub xclk_freq_hz: Option<u32>,
}

impl CameraSettings {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }
}
