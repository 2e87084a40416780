/// ST7789 display shim - Linux spidev and sysfs GPIO access
///
/// This library provides the hardware access layer a higher-level ST7789 driver
/// sits on: a SPI channel over a spidev character device, GPIO lines through
/// `/sys/class/gpio`, and a millisecond sleep for reset timing.

pub mod bringup;
pub mod config;
pub mod delay;
pub mod gpio;
pub mod spi;

// Re-export main types for convenience
pub use delay::msleep;
pub use gpio::{Direction, GpioError, Level, OutputLine, Sysfs};
pub use spi::{configure, ConfigStep, SpiChannel, SpiControl, SpiDevice, SpiError, SpiSettings};
