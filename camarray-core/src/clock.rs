use std::fmt::Debug;

/// The sensor's XCLK output.
///
/// The OV2640 clocks pixel data out on PCLK, which it derives from XCLK, so
/// gating XCLK stops pixel transfer and saves the LEDC timer's power budget
/// between captures.
pub trait PixelClock {
    type Error: Debug;

    fn enable(&mut self, freq_hz: u32) -> Result<(), Self::Error>;

    fn disable(&mut self);
}

/// Keeps the pixel clock running until dropped.
#[must_use = "the pixel clock is disabled as soon as the guard is dropped"]
pub struct ClockGuard<'a, C: PixelClock> {
    clock: &'a mut C,
}

impl<'a, C: PixelClock> ClockGuard<'a, C> {
    pub fn enable(clock: &'a mut C, freq_hz: u32) -> Result<Self, C::Error> {
        clock.enable(freq_hz)?;
        Ok(Self { clock })
    }
}

impl<C: PixelClock> Drop for ClockGuard<'_, C> {
    fn drop(&mut self) {
        self.clock.disable();
    }
}
