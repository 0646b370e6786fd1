use std::sync::atomic::{AtomicU32, Ordering};

/// A serial type, whose comparison takes into account the wrapping-around behavior of the
/// underlying counter.
#[derive(Debug, Copy, Clone, Hash)]
pub struct Serial(pub(crate) u32);

impl PartialEq for Serial {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Serial {}

impl PartialOrd for Serial {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        let distance = self.0.abs_diff(other.0);
        if distance < u32::MAX / 2 {
            self.0.partial_cmp(&other.0)
        } else {
            // wrap-around occurred, invert comparison
            other.0.partial_cmp(&self.0)
        }
    }
}

impl From<u32> for Serial {
    fn from(n: u32) -> Self {
        Serial(n)
    }
}

impl From<Serial> for u32 {
    fn from(serial: Serial) -> u32 {
        serial.0
    }
}

impl Serial {
    /// Checks if a serial was generated after or is equal to another given serial
    pub fn is_no_older_than(&self, other: &Serial) -> bool {
        other <= self
    }
}

/// A counter for generating serials
///
/// Every client connection owns one of these, serials are never shared between
/// connections. The counter wraps around on overflow and never yields `0`.
#[derive(Debug)]
pub struct SerialCounter {
    serial: AtomicU32,
}

impl Default for SerialCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialCounter {
    /// Create a new counter, starting at `1`
    pub const fn new() -> Self {
        SerialCounter {
            serial: AtomicU32::new(1),
        }
    }

    /// Retrieve the next serial from the counter
    pub fn next_serial(&self) -> Serial {
        let _ = self
            .serial
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::SeqCst);
        Serial(self.serial.fetch_add(1, Ordering::AcqRel))
    }

    /// The serial that was handed out last, if any
    pub fn last_serial(&self) -> Option<Serial> {
        match self.serial.load(Ordering::Acquire) {
            // nothing handed out yet
            1 => None,
            0 => Some(Serial(u32::MAX)),
            n => Some(Serial(n - 1)),
        }
    }
}
