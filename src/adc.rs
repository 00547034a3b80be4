use anyhow::Result;

/// One multiplexed ADC read of both channels, in raw converter counts.
/// The current channel is converted shortly after the voltage channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSample {
    pub voltage: i32,
    pub current: i32,
}

/// A source of raw two-channel ADC samples.
///
/// Implementations block until the next sample pair is available. An open or
/// grounded sensor input is not an error; it simply produces flat readings.
pub trait AdcSource: Send {
    fn read(&mut self) -> Result<RawSample>;

    /// Called once before each observation window. Streaming sources drop
    /// whatever arrived since the previous window here.
    fn begin_window(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: AdcSource + ?Sized> AdcSource for Box<S> {
    fn read(&mut self) -> Result<RawSample> {
        (**self).read()
    }

    fn begin_window(&mut self) -> Result<()> {
        (**self).begin_window()
    }
}
