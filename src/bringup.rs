use crate::config::Config;
use crate::delay::msleep;
use crate::gpio::{GpioError, OutputLine, Sysfs};
use crate::spi::SpiDevice;
use anyhow::{Context, Result};
use log::{debug, info, warn};

/// Hardware reset: high 10ms, low 20ms, high 120ms.
///
/// The controller ignores commands for 120ms after reset is released.
pub fn reset_pulse(reset: &mut OutputLine) -> Result<(), GpioError> {
    debug!("Pulsing reset on GPIO {}", reset.pin());
    reset.high()?;
    msleep(10);
    reset.low()?;
    msleep(20);
    reset.high()?;
    msleep(120);
    Ok(())
}

/// GPIO lines and SPI bus of one display, ready for command/data writes.
pub struct Bringup {
    dc: OutputLine,
    reset: OutputLine,
    spi: SpiDevice,
}

impl Bringup {
    /// Export and configure the DC and reset lines, pulse reset, then open
    /// and configure the SPI bus. Both lines are unexported again if the
    /// reset pulse or the bus bring-up fails.
    pub fn start(config: &Config) -> Result<Self> {
        let sysfs = Sysfs::new(&config.gpio.sysfs_root);

        let dc = OutputLine::new(&sysfs, config.gpio.dc_pin)
            .context(format!("Failed to set up DC line GPIO {}", config.gpio.dc_pin))?;
        let mut reset = OutputLine::new(&sysfs, config.gpio.reset_pin).context(format!(
            "Failed to set up reset line GPIO {}",
            config.gpio.reset_pin
        ))?;
        if let Err(e) = reset_pulse(&mut reset) {
            release_line(dc);
            release_line(reset);
            return Err(e).context("Reset sequence failed");
        }

        let spi = match SpiDevice::open(config.spi.device.as_deref(), &config.spi.settings) {
            Ok(spi) => spi,
            Err(e) => {
                release_line(dc);
                release_line(reset);
                return Err(e).context("Failed to bring up SPI");
            }
        };

        info!("Display interface ready");
        Ok(Bringup { dc, reset, spi })
    }

    /// Send one command byte with DC low.
    pub fn command(&mut self, cmd: u8) -> Result<()> {
        self.dc.low()?;
        self.spi.write_all(&[cmd])?;
        Ok(())
    }

    /// Send parameter or pixel bytes with DC high.
    pub fn data(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.dc.high()?;
        self.spi.write_chunked(bytes)?;
        Ok(())
    }

    /// Close the bus and unexport both lines. Every step runs; the first
    /// failure is returned.
    pub fn shutdown(self) -> Result<()> {
        let spi = self.spi.close().context("Failed to close SPI device");
        let dc = self.dc.release().context("Failed to unexport DC line");
        let reset = self.reset.release().context("Failed to unexport reset line");
        info!("Display interface released");
        spi.and(dc).and(reset)
    }
}

fn release_line(line: OutputLine) {
    let pin = line.pin();
    if let Err(e) = line.release() {
        warn!("Failed to unexport GPIO {}: {}", pin, e);
    }
}
