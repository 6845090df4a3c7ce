// Bindings from camarray-core's capture traits onto the esp32-camera component.
//
// Driver and frame buffer wrappers adapted from:
// https://github.com/Kezii/esp32cam_rs
// Copyright (c) Kezii
// Used under MIT license with attribution as required

use std::ffi::c_int;
use std::marker::PhantomData;
use std::ptr;
use std::time::Duration;

use camarray_core::{CameraConfig, Frame, FrameSize, PerformanceLock, PixelClock, PixelFormat};
use esp_idf_sys::{self as sys, camera, esp, EspError};
use log::{error, warn};

// XCLK helpers live in the component's private xclk.h, so they are not part of
// the generated bindings.
extern "C" {
    fn camera_enable_out_clock(config: *const camera::camera_config_t) -> sys::esp_err_t;
    fn camera_disable_out_clock();
}

fn driver_config(config: &CameraConfig) -> camera::camera_config_t {
    let pins = &config.pins;
    let gpio = |pin: Option<u8>| pin.map_or(-1, c_int::from);

    camera::camera_config_t {
        // PWDN is driven by the power sequencer; the driver must not touch it.
        pin_pwdn: -1,
        pin_reset: gpio(pins.reset),
        pin_xclk: c_int::from(pins.xclk),

        pin_d0: c_int::from(pins.data[0]),
        pin_d1: c_int::from(pins.data[1]),
        pin_d2: c_int::from(pins.data[2]),
        pin_d3: c_int::from(pins.data[3]),
        pin_d4: c_int::from(pins.data[4]),
        pin_d5: c_int::from(pins.data[5]),
        pin_d6: c_int::from(pins.data[6]),
        pin_d7: c_int::from(pins.data[7]),
        pin_vsync: c_int::from(pins.vsync),
        pin_href: c_int::from(pins.href),
        pin_pclk: c_int::from(pins.pclk),

        xclk_freq_hz: config.xclk_freq_hz as c_int,
        ledc_timer: sys::ledc_timer_t_LEDC_TIMER_0,
        ledc_channel: sys::ledc_channel_t_LEDC_CHANNEL_0,

        pixel_format: pixformat(config.pixel_format),
        frame_size: framesize(config.frame_size),

        jpeg_quality: c_int::from(config.jpeg_quality),
        fb_count: usize::from(config.fb_count),
        grab_mode: camera::camera_grab_mode_t_CAMERA_GRAB_WHEN_EMPTY,

        fb_location: camera::camera_fb_location_t_CAMERA_FB_IN_PSRAM,

        __bindgen_anon_1: camera::camera_config_t__bindgen_ty_1 {
            pin_sccb_sda: c_int::from(pins.sccb_sda),
        },
        __bindgen_anon_2: camera::camera_config_t__bindgen_ty_2 {
            pin_sccb_scl: c_int::from(pins.sccb_scl),
        },

        ..Default::default()
    }
}

fn pixformat(format: PixelFormat) -> camera::pixformat_t {
    match format {
        PixelFormat::Rgb565 => camera::pixformat_t_PIXFORMAT_RGB565,
        PixelFormat::Yuv422 => camera::pixformat_t_PIXFORMAT_YUV422,
        PixelFormat::Yuv420 => camera::pixformat_t_PIXFORMAT_YUV420,
        PixelFormat::Grayscale => camera::pixformat_t_PIXFORMAT_GRAYSCALE,
        PixelFormat::Jpeg => camera::pixformat_t_PIXFORMAT_JPEG,
        PixelFormat::Rgb888 => camera::pixformat_t_PIXFORMAT_RGB888,
        PixelFormat::Raw => camera::pixformat_t_PIXFORMAT_RAW,
        PixelFormat::Rgb444 => camera::pixformat_t_PIXFORMAT_RGB444,
        PixelFormat::Rgb555 => camera::pixformat_t_PIXFORMAT_RGB555,
    }
}

fn pixel_format(format: camera::pixformat_t) -> PixelFormat {
    match format {
        camera::pixformat_t_PIXFORMAT_RGB565 => PixelFormat::Rgb565,
        camera::pixformat_t_PIXFORMAT_YUV422 => PixelFormat::Yuv422,
        camera::pixformat_t_PIXFORMAT_YUV420 => PixelFormat::Yuv420,
        camera::pixformat_t_PIXFORMAT_GRAYSCALE => PixelFormat::Grayscale,
        camera::pixformat_t_PIXFORMAT_JPEG => PixelFormat::Jpeg,
        camera::pixformat_t_PIXFORMAT_RGB888 => PixelFormat::Rgb888,
        camera::pixformat_t_PIXFORMAT_RGB444 => PixelFormat::Rgb444,
        camera::pixformat_t_PIXFORMAT_RGB555 => PixelFormat::Rgb555,
        _ => PixelFormat::Raw,
    }
}

fn framesize(size: FrameSize) -> camera::framesize_t {
    match size {
        FrameSize::Qqvga => camera::framesize_t_FRAMESIZE_QQVGA,
        FrameSize::Qcif => camera::framesize_t_FRAMESIZE_QCIF,
        FrameSize::Hqvga => camera::framesize_t_FRAMESIZE_HQVGA,
        FrameSize::Qvga => camera::framesize_t_FRAMESIZE_QVGA,
        FrameSize::Cif => camera::framesize_t_FRAMESIZE_CIF,
        FrameSize::Hvga => camera::framesize_t_FRAMESIZE_HVGA,
        FrameSize::Vga => camera::framesize_t_FRAMESIZE_VGA,
        FrameSize::Svga => camera::framesize_t_FRAMESIZE_SVGA,
        FrameSize::Xga => camera::framesize_t_FRAMESIZE_XGA,
        FrameSize::Hd => camera::framesize_t_FRAMESIZE_HD,
        FrameSize::Sxga => camera::framesize_t_FRAMESIZE_SXGA,
        FrameSize::Uxga => camera::framesize_t_FRAMESIZE_UXGA,
        FrameSize::Qxga => camera::framesize_t_FRAMESIZE_QXGA,
    }
}

/// Frame buffer on loan from the driver. Returned on drop.
pub struct EspFrame<'a> {
    fb: *mut camera::camera_fb_t,
    _p: PhantomData<&'a camera::camera_fb_t>,
}

impl Frame for EspFrame<'_> {
    fn data(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts((*self.fb).buf, (*self.fb).len) }
    }

    fn format(&self) -> PixelFormat {
        pixel_format(unsafe { (*self.fb).format })
    }

    fn width(&self) -> usize {
        unsafe { (*self.fb).width }
    }

    fn height(&self) -> usize {
        unsafe { (*self.fb).height }
    }

    fn timestamp(&self) -> Duration {
        let tv = unsafe { (*self.fb).timestamp };
        Duration::from_secs(tv.tv_sec as u64) + Duration::from_micros(tv.tv_usec as u64)
    }
}

impl Drop for EspFrame<'_> {
    fn drop(&mut self) {
        unsafe { camera::esp_camera_fb_return(self.fb) }
    }
}

/// Owns the initialized esp32-camera driver.
pub struct EspCameraDriver {
    _p: PhantomData<*const ()>,
}

// The driver serializes access internally; the handle itself carries no data.
unsafe impl Send for EspCameraDriver {}

impl EspCameraDriver {
    /// Probes the sensor and allocates frame buffers. The sensor must already
    /// be powered.
    pub fn init(config: &CameraConfig) -> Result<Self, EspError> {
        let raw = driver_config(config);
        esp!(unsafe { camera::esp_camera_init(&raw) })?;
        Ok(Self { _p: PhantomData })
    }
}

impl camarray_core::CameraDriver for EspCameraDriver {
    type Frame<'a> = EspFrame<'a>;

    fn frame_get(&mut self) -> Option<EspFrame<'_>> {
        let fb = unsafe { camera::esp_camera_fb_get() };
        if fb.is_null() {
            None
        } else {
            Some(EspFrame {
                fb,
                _p: PhantomData,
            })
        }
    }
}

impl Drop for EspCameraDriver {
    fn drop(&mut self) {
        if let Err(e) = esp!(unsafe { camera::esp_camera_deinit() }) {
            error!("esp_camera_deinit failed: {}", e);
        }
    }
}

/// LEDC output feeding XCLK to the sensor.
pub struct XclkGate {
    config: camera::camera_config_t,
}

// Plain integers only; the raw struct is never shared with the driver.
unsafe impl Send for XclkGate {}

impl XclkGate {
    pub fn new(config: &CameraConfig) -> Self {
        Self {
            config: driver_config(config),
        }
    }
}

impl PixelClock for XclkGate {
    type Error = EspError;

    fn enable(&mut self, freq_hz: u32) -> Result<(), EspError> {
        self.config.xclk_freq_hz = freq_hz as c_int;
        esp!(unsafe { camera_enable_out_clock(&self.config) })
    }

    fn disable(&mut self) {
        unsafe { camera_disable_out_clock() }
    }
}

/// `ESP_PM_CPU_FREQ_MAX` lock. Keeps the APB clock steady while XCLK runs.
pub struct EspPmLock {
    handle: sys::esp_pm_lock_handle_t,
}

// esp_pm_lock_* functions are thread safe.
unsafe impl Send for EspPmLock {}
unsafe impl Sync for EspPmLock {}

impl EspPmLock {
    pub fn cpu_freq_max() -> Result<Self, EspError> {
        let mut handle: sys::esp_pm_lock_handle_t = ptr::null_mut();
        esp!(unsafe {
            sys::esp_pm_lock_create(
                sys::esp_pm_lock_type_t_ESP_PM_CPU_FREQ_MAX,
                0,
                c"camera".as_ptr(),
                &mut handle,
            )
        })?;
        Ok(Self { handle })
    }
}

impl PerformanceLock for EspPmLock {
    type Error = EspError;

    fn acquire(&self) -> Result<(), EspError> {
        esp!(unsafe { sys::esp_pm_lock_acquire(self.handle) })
    }

    fn release(&self) -> Result<(), EspError> {
        esp!(unsafe { sys::esp_pm_lock_release(self.handle) })
    }
}

impl Drop for EspPmLock {
    fn drop(&mut self) {
        if let Err(e) = esp!(unsafe { sys::esp_pm_lock_delete(self.handle) }) {
            warn!("esp_pm_lock_delete failed: {}", e);
        }
    }
}
