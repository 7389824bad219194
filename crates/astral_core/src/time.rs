use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Monotonic server time in microseconds since process start.
///
/// All movement interpolation and scheduling is expressed in `ServerTime`.
/// Wall-clock time never feeds into it; durable status-effect expirations
/// use [`ServerTime::system_secs`] instead.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct ServerTime(pub u64);

impl ServerTime {
    pub const ZERO: Self = Self(0);

    pub fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    pub fn as_micros(self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    /// Saturating difference in microseconds.
    pub fn since(self, earlier: ServerTime) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    pub fn plus_millis(self, millis: u64) -> Self {
        Self(self.0 + millis * 1000)
    }

    pub fn plus_micros(self, micros: u64) -> Self {
        Self(self.0 + micros)
    }

    /// Current wall-clock time in whole seconds since the Unix epoch.
    ///
    /// Used only for durable expirations; everything else runs on the
    /// monotonic clock.
    pub fn system_secs() -> u32 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0)
    }
}

/// Time as the client expresses it: float seconds relative to the
/// connection's login epoch.
#[derive(Copy, Clone, PartialEq, PartialOrd, Debug, Default)]
pub struct ClientTime(pub f32);

impl ClientTime {
    /// Converts a server timestamp into the client's frame of reference.
    pub fn from_server(time: ServerTime, login_epoch: ServerTime) -> Self {
        Self((time.since(login_epoch) as f64 / 1_000_000.0) as f32)
    }

    /// Converts a client-relative timestamp back to server time.
    pub fn to_server(self, login_epoch: ServerTime) -> ServerTime {
        let micros = (self.0.max(0.0) as f64 * 1_000_000.0) as u64;
        ServerTime(login_epoch.0 + micros)
    }
}

/// The single monotonic time source for a server process.
#[derive(Debug, Clone, Copy)]
pub struct ServerClock {
    start: Instant,
}

impl ServerClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now(&self) -> ServerTime {
        ServerTime(self.start.elapsed().as_micros() as u64)
    }

    /// The `Instant` corresponding to a `ServerTime`, for sleeping until it.
    pub fn instant_at(&self, time: ServerTime) -> Instant {
        self.start + Duration::from_micros(time.0)
    }
}

impl Default for ServerClock {
    fn default() -> Self {
        Self::new()
    }
}
