use std::sync::{Arc, Mutex};
use std::time::Duration;

use camarray_core::{
    handle_capture, Camera, CameraConfig, CameraDriver, CaptureError, Frame, ImageResponder,
    NoPin, PerformanceLock, PixelClock, PixelFormat, PowerSequencer, RouteError,
};
use embedded_hal::delay::DelayNs;

/// Everything the probes observe, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    LockAcquire,
    LockRelease,
    ClockEnable(u32),
    ClockDisable,
    FrameGet,
    FrameReturn,
}

#[derive(Clone, Default)]
struct Probe {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Probe {
    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    fn count(&self, event: Event) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| **e == event)
            .count()
    }
}

struct ProbeLock {
    probe: Probe,
    holders: Mutex<usize>,
}

impl PerformanceLock for ProbeLock {
    type Error = &'static str;

    fn acquire(&self) -> Result<(), Self::Error> {
        *self.holders.lock().unwrap() += 1;
        self.probe.record(Event::LockAcquire);
        Ok(())
    }

    fn release(&self) -> Result<(), Self::Error> {
        let mut holders = self.holders.lock().unwrap();
        *holders = (*holders).checked_sub(1).ok_or("released more than acquired")?;
        self.probe.record(Event::LockRelease);
        Ok(())
    }
}

struct ProbeClock {
    probe: Probe,
    running: Arc<Mutex<bool>>,
}

impl PixelClock for ProbeClock {
    type Error = ();

    fn enable(&mut self, freq_hz: u32) -> Result<(), ()> {
        *self.running.lock().unwrap() = true;
        self.probe.record(Event::ClockEnable(freq_hz));
        Ok(())
    }

    fn disable(&mut self) {
        *self.running.lock().unwrap() = false;
        self.probe.record(Event::ClockDisable);
    }
}

struct ProbeFrame {
    probe: Probe,
    data: Vec<u8>,
    format: PixelFormat,
}

impl Frame for ProbeFrame {
    fn data(&self) -> &[u8] {
        &self.data
    }

    fn format(&self) -> PixelFormat {
        self.format
    }

    fn width(&self) -> usize {
        2048
    }

    fn height(&self) -> usize {
        1536
    }

    fn timestamp(&self) -> Duration {
        Duration::from_millis(1234)
    }
}

impl Drop for ProbeFrame {
    fn drop(&mut self) {
        self.probe.record(Event::FrameReturn);
    }
}

/// Hands out frames of a fixed format, or nothing once `dry` is set.
struct ProbeDriver {
    probe: Probe,
    format: PixelFormat,
    dry: bool,
}

impl CameraDriver for ProbeDriver {
    type Frame<'a> = ProbeFrame;

    fn frame_get(&mut self) -> Option<ProbeFrame> {
        self.probe.record(Event::FrameGet);
        if self.dry {
            return None;
        }
        Some(ProbeFrame {
            probe: self.probe.clone(),
            data: jpeg_bytes(3000),
            format: self.format,
        })
    }
}

struct NullDelay;

impl DelayNs for NullDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

#[derive(Default)]
struct RecordedResponse {
    status: Option<u16>,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl ImageResponder for RecordedResponse {
    type Error = &'static str;

    fn send_image(&mut self, headers: &[(&str, &str)], body: &[u8]) -> Result<(), Self::Error> {
        self.status = Some(200);
        self.headers = headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.body = body.to_vec();
        Ok(())
    }

    fn send_status(&mut self, status: u16) -> Result<(), Self::Error> {
        self.status = Some(status);
        Ok(())
    }
}

struct BrokenSocket;

impl ImageResponder for BrokenSocket {
    type Error = &'static str;

    fn send_image(&mut self, _: &[(&str, &str)], _: &[u8]) -> Result<(), Self::Error> {
        Err("connection reset")
    }

    fn send_status(&mut self, _: u16) -> Result<(), Self::Error> {
        panic!("status must not be sent after the body failed");
    }
}

fn jpeg_bytes(len: usize) -> Vec<u8> {
    let mut data = vec![0x55; len];
    data[..2].copy_from_slice(&[0xFF, 0xD8]);
    data[len - 2..].copy_from_slice(&[0xFF, 0xD9]);
    data
}

type ProbeCamera = Camera<ProbeDriver, ProbeClock, Arc<ProbeLock>>;

struct Rig {
    camera: ProbeCamera,
    probe: Probe,
    lock: Arc<ProbeLock>,
    clock_running: Arc<Mutex<bool>>,
}

fn rig(config: CameraConfig, format: PixelFormat, dry: bool) -> Rig {
    let _ = env_logger::builder().is_test(true).try_init();

    let probe = Probe::default();
    let lock = Arc::new(ProbeLock {
        probe: probe.clone(),
        holders: Mutex::new(0),
    });
    let clock_running = Arc::new(Mutex::new(true));
    let clock = ProbeClock {
        probe: probe.clone(),
        running: clock_running.clone(),
    };

    let mut power = PowerSequencer::<NoPin, _>::unconfigured(NullDelay);
    let driver_probe = probe.clone();
    let camera = Camera::start(config, &mut power, clock, lock.clone(), move |_: &CameraConfig| {
        Ok::<_, ()>(ProbeDriver {
            probe: driver_probe,
            format,
            dry,
        })
    })
    .unwrap();

    // start() stops the clock the driver left running.
    assert_eq!(probe.take(), vec![Event::ClockDisable]);
    assert!(!*clock_running.lock().unwrap());

    Rig {
        camera,
        probe,
        lock,
        clock_running,
    }
}

#[test]
fn test_capture_sequence_order() {
    let mut rig = rig(CameraConfig::default(), PixelFormat::Jpeg, false);

    let frame = rig.camera.capture_frame().unwrap();
    assert_eq!(frame.len(), 3000);
    assert_eq!(frame.timestamp(), Duration::from_millis(1234));
    drop(frame);

    assert_eq!(
        rig.probe.take(),
        vec![
            Event::LockAcquire,
            Event::ClockEnable(20_000_000),
            Event::FrameGet,
            Event::ClockDisable,
            Event::LockRelease,
            Event::FrameReturn,
        ]
    );
}

#[test]
fn test_no_leak_across_many_captures() {
    let mut rig = rig(CameraConfig::default(), PixelFormat::Jpeg, false);

    for _ in 0..25 {
        let frame = rig.camera.capture_frame().unwrap();
        assert!(!*rig.clock_running.lock().unwrap());
        assert_eq!(*rig.lock.holders.lock().unwrap(), 0);
        drop(frame);
    }

    assert_eq!(rig.probe.count(Event::LockAcquire), 25);
    assert_eq!(rig.probe.count(Event::LockRelease), 25);
    assert_eq!(rig.probe.count(Event::ClockDisable), 25);
    assert_eq!(rig.probe.count(Event::FrameReturn), 25);
}

#[test]
fn test_no_frame_still_cleans_up() {
    let mut rig = rig(CameraConfig::default(), PixelFormat::Jpeg, true);

    let err = rig.camera.capture_frame().err().unwrap();
    assert!(matches!(err, CaptureError::NoFrame));

    assert_eq!(
        rig.probe.take(),
        vec![
            Event::LockAcquire,
            Event::ClockEnable(20_000_000),
            Event::FrameGet,
            Event::ClockDisable,
            Event::LockRelease,
        ]
    );
    assert!(!*rig.clock_running.lock().unwrap());
    assert_eq!(*rig.lock.holders.lock().unwrap(), 0);
}

#[test]
fn test_route_serves_jpeg() {
    let mut rig = rig(CameraConfig::default(), PixelFormat::Jpeg, false);
    let mut response = RecordedResponse::default();

    let summary = handle_capture(&mut rig.camera, &mut response).unwrap();

    assert_eq!(summary.bytes, 3000);
    assert_eq!(response.status, Some(200));
    assert_eq!(
        response.headers,
        vec![
            ("Content-Type".to_string(), "image/jpeg".to_string()),
            (
                "Content-Disposition".to_string(),
                "inline; filename=capture.jpg".to_string()
            ),
        ]
    );
    assert_eq!(&response.body[..2], &[0xFF, 0xD8]);
    assert_eq!(rig.probe.count(Event::FrameReturn), 1);
}

#[test]
fn test_route_no_frame_is_500() {
    let mut rig = rig(CameraConfig::default(), PixelFormat::Jpeg, true);
    let mut response = RecordedResponse::default();

    let err = handle_capture(&mut rig.camera, &mut response).unwrap_err();

    assert!(matches!(err, RouteError::Capture(CaptureError::NoFrame)));
    assert!(!err.is_fatal());
    assert_eq!(response.status, Some(500));
    assert!(response.body.is_empty());

    // The next request is unaffected.
    rig.camera.capture_frame().err().unwrap();
    assert_eq!(*rig.lock.holders.lock().unwrap(), 0);
}

#[test]
fn test_route_rejects_uncompressed_frames() {
    let config = CameraConfig {
        pixel_format: PixelFormat::Rgb565,
        frame_size: camarray_core::FrameSize::Qvga,
        ..Default::default()
    };
    let mut rig = rig(config, PixelFormat::Rgb565, false);
    let mut response = RecordedResponse::default();

    let err = handle_capture(&mut rig.camera, &mut response).unwrap_err();

    assert!(matches!(
        err,
        RouteError::UnsupportedFormat(PixelFormat::Rgb565)
    ));
    assert_eq!(err.status(), 500);
    assert_eq!(response.status, Some(500));
    assert!(response.body.is_empty());
    // The frame went back to the driver even though it was never served.
    assert_eq!(rig.probe.count(Event::FrameReturn), 1);
    assert!(!*rig.clock_running.lock().unwrap());
}

#[test]
fn test_route_write_failure() {
    let mut rig = rig(CameraConfig::default(), PixelFormat::Jpeg, false);

    let err = handle_capture(&mut rig.camera, &mut BrokenSocket).unwrap_err();

    assert!(matches!(err, RouteError::Write(_)));
    assert_eq!(rig.probe.count(Event::FrameReturn), 1);
    assert_eq!(*rig.lock.holders.lock().unwrap(), 0);
}
