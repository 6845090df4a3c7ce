use embedded_hal::digital::{Error as _, ErrorKind, StatefulOutputPin};
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("indicator LED pin error: {0:?}")]
pub struct LedError(pub ErrorKind);

/// Status LED wired active low (GPIO33 on the ESP32-CAM lights when low).
pub struct IndicatorLed<P> {
    pin: P,
}

impl<P: StatefulOutputPin> IndicatorLed<P> {
    /// Takes the pin and switches the LED off.
    pub fn new(mut pin: P) -> Result<Self, LedError> {
        pin.set_high().map_err(|e| LedError(e.kind()))?;
        Ok(Self { pin })
    }

    pub fn set(&mut self, on: bool) -> Result<(), LedError> {
        let result = if on {
            self.pin.set_low()
        } else {
            self.pin.set_high()
        };
        result.map_err(|e| LedError(e.kind()))
    }

    pub fn is_on(&mut self) -> Result<bool, LedError> {
        self.pin.is_set_low().map_err(|e| LedError(e.kind()))
    }

    pub fn toggle(&mut self) -> Result<(), LedError> {
        self.pin.toggle().map_err(|e| LedError(e.kind()))
    }
}
