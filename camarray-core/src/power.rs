use core::convert::Infallible;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{Error as _, ErrorKind, ErrorType, OutputPin};
use log::debug;
use thiserror::Error;

/// Time the analog rails need after a PWDN transition before the sensor
/// answers on SCCB.
pub const SETTLE_DELAY_MS: u32 = 100;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PowerSequenceError {
    #[error("failed to drive the power-down line: {0:?}")]
    Pin(ErrorKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rail {
    On,
    Off,
}

/// Placeholder for boards whose PWDN line is tied to a fixed level.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPin;

impl ErrorType for NoPin {
    type Error = Infallible;
}

impl OutputPin for NoPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Drives the camera's power-down line.
///
/// PWDN is active high: driving it low powers the module. Every transition
/// blocks for [`SETTLE_DELAY_MS`]; requesting the state the rail is already
/// in returns immediately.
pub struct PowerSequencer<P, D> {
    pin: Option<P>,
    delay: D,
    rail: Option<Rail>,
}

impl<D: DelayNs> PowerSequencer<NoPin, D> {
    pub fn unconfigured(delay: D) -> Self {
        Self::new(None, delay)
    }
}

impl<P: OutputPin, D: DelayNs> PowerSequencer<P, D> {
    pub fn new(pin: Option<P>, delay: D) -> Self {
        Self {
            pin,
            delay,
            rail: None,
        }
    }

    /// Last level driven onto the rail, `None` before the first transition
    /// or when no pin is configured.
    pub fn rail(&self) -> Option<Rail> {
        self.rail
    }

    pub fn power_on(&mut self) -> Result<(), PowerSequenceError> {
        self.drive(Rail::On)
    }

    /// Cut power to the sensor.
    ///
    /// Experimental: the OV2640 does not come back on SCCB after the rail is
    /// dropped without a full driver re-init, so the firmware never calls this.
    pub fn power_off(&mut self) -> Result<(), PowerSequenceError> {
        self.drive(Rail::Off)
    }

    pub fn release(self) -> (Option<P>, D) {
        (self.pin, self.delay)
    }

    fn drive(&mut self, target: Rail) -> Result<(), PowerSequenceError> {
        let Some(pin) = self.pin.as_mut() else {
            debug!("No PWDN pin configured, skipping power {:?}", target);
            return Ok(());
        };

        if self.rail == Some(target) {
            debug!("Camera rail already {:?}", target);
            return Ok(());
        }

        let result = match target {
            Rail::On => pin.set_low(),
            Rail::Off => pin.set_high(),
        };
        result.map_err(|e| PowerSequenceError::Pin(e.kind()))?;

        self.rail = Some(target);
        self.delay.delay_ms(SETTLE_DELAY_MS);
        debug!("Camera rail {:?} after {}ms settle", target, SETTLE_DELAY_MS);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Op {
        Low,
        High,
        DelayNs(u32),
    }

    type Log = Rc<RefCell<Vec<Op>>>;

    struct RecordingPin {
        log: Log,
        fail: bool,
    }

    #[derive(Debug)]
    struct PinFault;

    impl embedded_hal::digital::Error for PinFault {
        fn kind(&self) -> ErrorKind {
            ErrorKind::Other
        }
    }

    impl ErrorType for RecordingPin {
        type Error = PinFault;
    }

    impl OutputPin for RecordingPin {
        fn set_low(&mut self) -> Result<(), PinFault> {
            if self.fail {
                return Err(PinFault);
            }
            self.log.borrow_mut().push(Op::Low);
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), PinFault> {
            if self.fail {
                return Err(PinFault);
            }
            self.log.borrow_mut().push(Op::High);
            Ok(())
        }
    }

    struct RecordingDelay {
        log: Log,
    }

    impl DelayNs for RecordingDelay {
        fn delay_ns(&mut self, ns: u32) {
            self.log.borrow_mut().push(Op::DelayNs(ns));
        }
    }

    fn sequencer(fail: bool) -> (PowerSequencer<RecordingPin, RecordingDelay>, Log) {
        let log: Log = Rc::default();
        let pin = RecordingPin {
            log: log.clone(),
            fail,
        };
        let delay = RecordingDelay { log: log.clone() };
        (PowerSequencer::new(Some(pin), delay), log)
    }

    fn settled_ms(log: &Log) -> u64 {
        log.borrow()
            .iter()
            .map(|op| match op {
                Op::DelayNs(ns) => u64::from(*ns),
                _ => 0,
            })
            .sum::<u64>()
            / 1_000_000
    }

    #[test]
    fn test_power_on_drives_low_then_settles() {
        let (mut power, log) = sequencer(false);
        power.power_on().unwrap();

        assert_eq!(log.borrow().first(), Some(&Op::Low));
        assert_eq!(settled_ms(&log), 100);
        assert_eq!(power.rail(), Some(Rail::On));
    }

    #[test]
    fn test_power_on_twice_is_idempotent() {
        let (mut power, log) = sequencer(false);
        power.power_on().unwrap();
        power.power_on().unwrap();

        let lows = log.borrow().iter().filter(|op| **op == Op::Low).count();
        assert_eq!(lows, 1);
        assert_eq!(settled_ms(&log), 100);
        assert_eq!(power.rail(), Some(Rail::On));

        log.borrow_mut().clear();
        power.power_off().unwrap();
        assert_eq!(log.borrow().first(), Some(&Op::High));
        assert_eq!(settled_ms(&log), 100);
        assert_eq!(power.rail(), Some(Rail::Off));
    }

    #[test]
    fn test_unconfigured_is_noop() {
        let log: Log = Rc::default();
        let mut power = PowerSequencer::unconfigured(RecordingDelay { log: log.clone() });

        power.power_on().unwrap();
        power.power_off().unwrap();

        assert!(log.borrow().is_empty());
        assert_eq!(power.rail(), None);
    }

    #[test]
    fn test_pin_failure_is_reported() {
        let (mut power, log) = sequencer(true);

        assert_eq!(
            power.power_on(),
            Err(PowerSequenceError::Pin(ErrorKind::Other))
        );
        assert_eq!(power.rail(), None);
        assert!(log.borrow().is_empty());
    }
}
