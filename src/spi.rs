use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use spidev::spidevioctl;
use spidev::SpiModeFlags;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::FileTypeExt;
use std::os::unix::io::{AsRawFd, IntoRawFd, RawFd};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default spidev transfer limit (`spidev.bufsiz`).
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Which of the three configuration requests was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigStep {
    Mode,
    BitsPerWord,
    MaxSpeed,
}

impl ConfigStep {
    /// Legacy return code of the step: -1, -2 or -3.
    pub fn code(self) -> i32 {
        match self {
            ConfigStep::Mode => -1,
            ConfigStep::BitsPerWord => -2,
            ConfigStep::MaxSpeed => -3,
        }
    }
}

impl std::fmt::Display for ConfigStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ConfigStep::Mode => "mode",
            ConfigStep::BitsPerWord => "bits per word",
            ConfigStep::MaxSpeed => "max speed",
        })
    }
}

#[derive(Debug, Error)]
pub enum SpiError {
    #[error("failed to open SPI device {}: {source}", path.display())]
    Open { path: PathBuf, source: io::Error },

    #[error("failed to set SPI {step}: {source}")]
    Config { step: ConfigStep, source: io::Error },

    #[error("SPI write failed: {0}")]
    Write(#[source] io::Error),

    #[error("SPI close failed: {0}")]
    Close(#[source] io::Error),

    #[error("SPI short write ({written}/{expected} bytes)")]
    ShortWrite { written: usize, expected: usize },
}

impl SpiError {
    /// Integer code matching the C-style contract: -1 for open, write and
    /// close failures, the step code for configuration failures.
    pub fn code(&self) -> i32 {
        match self {
            SpiError::Config { step, .. } => step.code(),
            _ => -1,
        }
    }

    /// The underlying OS error number, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            SpiError::Open { source, .. } | SpiError::Config { source, .. } => source.raw_os_error(),
            SpiError::Write(e) | SpiError::Close(e) => e.raw_os_error(),
            SpiError::ShortWrite { .. } => None,
        }
    }
}

/// Bus parameters applied by [`configure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpiSettings {
    pub mode: u8,
    pub bits_per_word: u8,
    pub speed_hz: u32,
}

impl Default for SpiSettings {
    fn default() -> Self {
        Self {
            mode: 0,
            bits_per_word: 8,
            speed_hz: 4_000_000,
        }
    }
}

/// The control requests a SPI master accepts.
pub trait SpiControl {
    fn set_mode(&mut self, mode: u8) -> io::Result<()>;
    fn set_bits_per_word(&mut self, bits: u8) -> io::Result<()>;
    fn set_max_speed_hz(&mut self, speed_hz: u32) -> io::Result<()>;
}

/// Apply mode, bits per word and clock speed, in that order.
///
/// Stops at the first rejected request. The bus may then be partially
/// configured; callers must treat any error as "configuration unknown".
pub fn configure<C: SpiControl + ?Sized>(
    ctl: &mut C,
    mode: u8,
    bits_per_word: u8,
    speed_hz: u32,
) -> Result<(), SpiError> {
    ctl.set_mode(mode).map_err(|source| SpiError::Config {
        step: ConfigStep::Mode,
        source,
    })?;
    ctl.set_bits_per_word(bits_per_word)
        .map_err(|source| SpiError::Config {
            step: ConfigStep::BitsPerWord,
            source,
        })?;
    ctl.set_max_speed_hz(speed_hz)
        .map_err(|source| SpiError::Config {
            step: ConfigStep::MaxSpeed,
            source,
        })?;
    Ok(())
}

/// An open spidev character device.
///
/// Only obtainable through [`SpiChannel::open`], so every value holds a valid
/// descriptor.
#[derive(Debug)]
pub struct SpiChannel {
    file: File,
    device_path: PathBuf,
}

impl SpiChannel {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SpiError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| SpiError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        debug!("Opened SPI device {} (fd {})", path.display(), file.as_raw_fd());
        Ok(SpiChannel {
            file,
            device_path: path.to_path_buf(),
        })
    }

    pub fn configure(&mut self, settings: &SpiSettings) -> Result<(), SpiError> {
        debug!(
            "Configuring {}: mode={} bits={} speed={}Hz",
            self.device_path.display(),
            settings.mode,
            settings.bits_per_word,
            settings.speed_hz
        );
        configure(self, settings.mode, settings.bits_per_word, settings.speed_hz)
    }

    /// Single blocking `write(2)` of `buf`.
    ///
    /// Returns the byte count the kernel accepted, which may be less than
    /// `buf.len()`. Short writes are not retried.
    pub fn write_buf(&mut self, buf: &[u8]) -> Result<usize, SpiError> {
        self.file.write(buf).map_err(SpiError::Write)
    }

    /// Close the descriptor and report the result of `close(2)`.
    pub fn close(self) -> Result<(), SpiError> {
        let fd = self.file.into_raw_fd();
        // SAFETY: fd was just released from the File, so this is its only close.
        let rc = unsafe { libc::close(fd) };
        if rc < 0 {
            return Err(SpiError::Close(io::Error::last_os_error()));
        }
        Ok(())
    }

    pub fn raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    pub fn device_path(&self) -> &Path {
        &self.device_path
    }
}

impl SpiControl for SpiChannel {
    fn set_mode(&mut self, mode: u8) -> io::Result<()> {
        spidevioctl::set_mode(
            self.file.as_raw_fd(),
            SpiModeFlags::from_bits_truncate(mode.into()),
        )
    }

    fn set_bits_per_word(&mut self, bits: u8) -> io::Result<()> {
        spidevioctl::set_bits_per_word(self.file.as_raw_fd(), bits)
    }

    fn set_max_speed_hz(&mut self, speed_hz: u32) -> io::Result<()> {
        spidevioctl::set_max_speed_hz(self.file.as_raw_fd(), speed_hz)
    }
}

/// First `spidev*` character device in `dir`, by name.
pub fn first_available_spidev(dir: impl AsRef<Path>) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    let mut devices: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("spidev"))
        .filter(|entry| {
            fs::metadata(entry.path())
                .map(|m| m.file_type().is_char_device())
                .unwrap_or(false)
        })
        .map(|entry| entry.path())
        .collect();
    devices.sort();
    devices.into_iter().next()
}

pub fn first_available_spidev_in_dev() -> Option<PathBuf> {
    first_available_spidev("/dev")
}

/// A configured channel that insists on full-buffer delivery.
///
/// This sits above [`SpiChannel`]: a short write is reported as
/// [`SpiError::ShortWrite`] rather than as a byte count. Nothing is retried.
#[derive(Debug)]
pub struct SpiDevice {
    channel: SpiChannel,
    chunk_size: usize,
}

impl SpiDevice {
    /// Open `device`, or the first spidev found under `/dev` when `None`,
    /// falling back to `/dev/spidev0.0`.
    pub fn open(device: Option<&Path>, settings: &SpiSettings) -> Result<Self, SpiError> {
        let path = match device {
            Some(path) => path.to_path_buf(),
            None => first_available_spidev_in_dev().unwrap_or_else(|| PathBuf::from("/dev/spidev0.0")),
        };

        let mut channel = SpiChannel::open(&path)?;
        channel.configure(settings)?;
        info!(
            "SPI device ready: {} ({}Hz, mode {})",
            path.display(),
            settings.speed_hz,
            settings.mode
        );

        Ok(SpiDevice {
            channel,
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn write_all(&mut self, buf: &[u8]) -> Result<(), SpiError> {
        let written = self.channel.write_buf(buf)?;
        if written != buf.len() {
            warn!("SPI short write: {}/{} bytes", written, buf.len());
            return Err(SpiError::ShortWrite {
                written,
                expected: buf.len(),
            });
        }
        Ok(())
    }

    /// Write `buf` in transfers no larger than the chunk size.
    pub fn write_chunked(&mut self, buf: &[u8]) -> Result<(), SpiError> {
        for chunk in buf.chunks(self.chunk_size) {
            self.write_all(chunk)?;
        }
        Ok(())
    }

    pub fn channel(&self) -> &SpiChannel {
        &self.channel
    }

    pub fn close(self) -> Result<(), SpiError> {
        self.channel.close()
    }
}
