//! The non-blocking database client surface.
//!
//! Everything here is synchronous: progress is made only when the caller
//! invokes a poll entry point, and the returned [`PollStatus`] tells the
//! caller which socket readiness to wait for before polling again.

mod raw;

pub use raw::{PqConn, PqResult, ResultStatus};

/// Readiness the client needs before further progress can be made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// The current operation needs no further I/O.
    Ok,
    /// The socket was not readable yet; wait for read readiness.
    WantRead,
    /// The socket was not writable yet; wait for write readiness.
    WantWrite,
}

/// An asynchronous notification received over a `LISTEN`ing connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Channel the notification was raised on.
    pub channel: String,
    /// Process ID of the notifying backend.
    pub pid: i32,
    /// Payload; an empty payload arrives as an empty string.
    pub payload: String,
}

impl PqConn {
    /// Unified poll for a dispatched statement.
    ///
    /// Shaped the way libpq prescribes non-blocking execution: consume any
    /// pending input, finish flushing the outbound buffer, then wait out
    /// the server until the whole response is buffered locally. Several
    /// flips between `WantRead` and `WantWrite` are normal for a single
    /// statement.
    pub fn exec_poll(&self) -> crate::error::Result<PollStatus> {
        self.consume_input()?;
        if !self.flush()? {
            return Ok(PollStatus::WantWrite);
        }
        if self.is_busy() {
            return Ok(PollStatus::WantRead);
        }
        Ok(PollStatus::Ok)
    }
}
