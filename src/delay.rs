use std::thread;
use std::time::Duration;

/// Block the calling thread for `ms` milliseconds.
pub fn msleep(ms: u32) {
    thread::sleep(Duration::from_micros(u64::from(ms) * 1000));
}
