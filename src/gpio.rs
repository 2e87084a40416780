use log::{debug, info};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

#[derive(Debug, Error)]
pub enum GpioError {
    #[error("failed to open {}: {source}", path.display())]
    Open { path: PathBuf, source: io::Error },

    #[error("failed to write {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
}

impl GpioError {
    /// -1 when the control file could not be opened, -2 when the write failed.
    pub fn code(&self) -> i32 {
        match self {
            GpioError::Open { .. } => -1,
            GpioError::Write { .. } => -2,
        }
    }

    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            GpioError::Open { source, .. } | GpioError::Write { source, .. } => source.raw_os_error(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Low => "0",
            Level::High => "1",
        }
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Level::High
        } else {
            Level::Low
        }
    }
}

/// The sysfs GPIO control tree.
///
/// Pins are plain numbers; all line state (exported, direction, value) lives
/// in the kernel and nothing is cached here.
#[derive(Debug, Clone)]
pub struct Sysfs {
    root: PathBuf,
}

impl Default for Sysfs {
    fn default() -> Self {
        Self::new(SYSFS_GPIO_ROOT)
    }
}

impl Sysfs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Sysfs { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn export_path(&self) -> PathBuf {
        self.root.join("export")
    }

    pub fn unexport_path(&self) -> PathBuf {
        self.root.join("unexport")
    }

    pub fn direction_path(&self, pin: u32) -> PathBuf {
        self.root.join(format!("gpio{}", pin)).join("direction")
    }

    pub fn value_path(&self, pin: u32) -> PathBuf {
        self.root.join(format!("gpio{}", pin)).join("value")
    }

    /// Write `payload` to a control file in one `write(2)`.
    ///
    /// The file is closed whether or not the write succeeded.
    pub fn write_str(&self, path: &Path, payload: &str) -> Result<(), GpioError> {
        let mut file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|source| GpioError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        let written = file
            .write(payload.as_bytes())
            .map_err(|source| GpioError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        if written < payload.len() {
            debug!("Short write to {}: {}/{} bytes", path.display(), written, payload.len());
        }
        Ok(())
    }

    /// Export `pin`. Always succeeds.
    ///
    /// Exporting an already exported pin fails with EBUSY under sysfs, so any
    /// failure is logged and dropped.
    pub fn export(&self, pin: u32) {
        if let Err(e) = self.write_str(&self.export_path(), &pin.to_string()) {
            debug!("Ignoring export failure for GPIO {}: {}", pin, e);
        }
    }

    pub fn unexport(&self, pin: u32) -> Result<(), GpioError> {
        self.write_str(&self.unexport_path(), &pin.to_string())
    }

    pub fn set_direction(&self, pin: u32, direction: Direction) -> Result<(), GpioError> {
        self.write_str(&self.direction_path(pin), direction.as_str())
    }

    pub fn set_value(&self, pin: u32, level: Level) -> Result<(), GpioError> {
        self.write_str(&self.value_path(pin), level.as_str())
    }
}

/// A pin exported and configured as an output.
///
/// Dropping it leaves the pin exported; call [`OutputLine::release`] to
/// unexport.
#[derive(Debug)]
pub struct OutputLine {
    sysfs: Sysfs,
    pin: u32,
}

impl OutputLine {
    pub fn new(sysfs: &Sysfs, pin: u32) -> Result<Self, GpioError> {
        sysfs.export(pin);
        sysfs.set_direction(pin, Direction::Out)?;
        info!("GPIO {} configured as output", pin);
        Ok(OutputLine {
            sysfs: sysfs.clone(),
            pin,
        })
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }

    pub fn set(&mut self, level: Level) -> Result<(), GpioError> {
        self.sysfs.set_value(self.pin, level)
    }

    pub fn high(&mut self) -> Result<(), GpioError> {
        self.set(Level::High)
    }

    pub fn low(&mut self) -> Result<(), GpioError> {
        self.set(Level::Low)
    }

    pub fn release(self) -> Result<(), GpioError> {
        self.sysfs.unexport(self.pin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// A fake sysfs tree with control files for the given pins.
    fn fake_tree(pins: &[u32]) -> (TempDir, Sysfs) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("export"), "").unwrap();
        fs::write(dir.path().join("unexport"), "").unwrap();
        for pin in pins {
            let pin_dir = dir.path().join(format!("gpio{}", pin));
            fs::create_dir(&pin_dir).unwrap();
            fs::write(pin_dir.join("direction"), "").unwrap();
            fs::write(pin_dir.join("value"), "").unwrap();
        }
        let sysfs = Sysfs::new(dir.path());
        (dir, sysfs)
    }

    #[test]
    fn test_paths() {
        let sysfs = Sysfs::default();
        assert_eq!(sysfs.export_path(), Path::new("/sys/class/gpio/export"));
        assert_eq!(sysfs.unexport_path(), Path::new("/sys/class/gpio/unexport"));
        assert_eq!(
            sysfs.direction_path(17),
            Path::new("/sys/class/gpio/gpio17/direction")
        );
        assert_eq!(sysfs.value_path(7), Path::new("/sys/class/gpio/gpio7/value"));
    }

    #[test]
    fn test_export_twice_succeeds() {
        let (dir, sysfs) = fake_tree(&[]);
        sysfs.export(17);
        sysfs.export(17);
        assert_eq!(fs::read_to_string(dir.path().join("export")).unwrap(), "17");

        // No control file at all: still no error surfaced.
        Sysfs::new(dir.path().join("missing")).export(17);
    }

    #[test]
    fn test_unexport_without_export_fails() {
        let (dir, _) = fake_tree(&[]);
        let err = Sysfs::new(dir.path().join("missing")).unexport(5).unwrap_err();
        assert_eq!(err.code(), -1);
        assert!(err.code() < 0);
    }

    #[test]
    fn test_set_direction_payloads() {
        let (dir, sysfs) = fake_tree(&[4]);
        let path = dir.path().join("gpio4/direction");

        sysfs.set_direction(4, Direction::Out).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "out");

        // Real attribute files hold no stale bytes; a regular file does.
        fs::write(&path, "").unwrap();
        sysfs.set_direction(4, Direction::In).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "in");
    }

    #[test]
    fn test_set_value_payloads() {
        let (dir, sysfs) = fake_tree(&[4]);
        let path = dir.path().join("gpio4/value");

        sysfs.set_value(4, Level::from(true)).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"1");

        sysfs.set_value(4, Level::Low).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"0");
    }

    #[test]
    fn test_set_value_unexported_pin() {
        let (_dir, sysfs) = fake_tree(&[]);
        let err = sysfs.set_value(9, Level::High).unwrap_err();
        assert!(matches!(err, GpioError::Open { .. }));
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    }

    /// Control files that open but reject every write, like an unexported
    /// pin's unexport or an already exported pin's export.
    fn rejecting_tree() -> (TempDir, Sysfs) {
        use std::os::unix::fs::symlink;

        let dir = tempfile::tempdir().unwrap();
        symlink("/dev/full", dir.path().join("export")).unwrap();
        symlink("/dev/full", dir.path().join("unexport")).unwrap();
        let sysfs = Sysfs::new(dir.path());
        (dir, sysfs)
    }

    #[test]
    fn test_unexport_write_failure() {
        let (_dir, sysfs) = rejecting_tree();
        let err = sysfs.unexport(5).unwrap_err();
        assert!(matches!(err, GpioError::Write { .. }));
        assert_eq!(err.code(), -2);
        assert_eq!(err.raw_os_error(), Some(libc::ENOSPC));
    }

    #[test]
    fn test_export_swallows_write_failure() {
        let (_dir, sysfs) = rejecting_tree();
        sysfs.export(5);
        sysfs.export(5);
    }

    #[test]
    fn test_output_line() {
        let (dir, sysfs) = fake_tree(&[25]);
        let mut line = OutputLine::new(&sysfs, 25).unwrap();
        assert_eq!(line.pin(), 25);
        assert_eq!(
            fs::read_to_string(dir.path().join("gpio25/direction")).unwrap(),
            "out"
        );

        line.high().unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("gpio25/value")).unwrap(), "1");

        line.release().unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("unexport")).unwrap(), "25");
    }
}
