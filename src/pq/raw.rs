//! Thin owning wrapper over the libpq client library.
//!
//! libpq is the only component allowed to speak the wire protocol; this
//! module confines the unsafe FFI so that nothing above it ever sees a raw
//! pointer.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::os::unix::io::RawFd;
use std::ptr::{self, NonNull};

use pq_sys::*;

use crate::error::{Error, Result};

use super::{Notification, PollStatus};

/// One libpq connection.
///
/// The handle may be moved between threads but is never shared: libpq
/// connections are not safe for concurrent use, and every session owns its
/// connection exclusively.
pub struct PqConn {
    conn: NonNull<PGconn>,
}

unsafe impl Send for PqConn {}

impl PqConn {
    /// Begin a non-blocking connection attempt (`PQconnectStart`).
    ///
    /// The handshake has not completed when this returns; the caller drives
    /// it with [`connect_poll`](Self::connect_poll).
    pub fn start(uri: &str) -> Result<Self> {
        let conninfo = CString::new(uri)
            .map_err(|_| Error::driver("connection string contains a NUL byte"))?;

        // NULL here means libpq could not even allocate the PGconn
        let conn = NonNull::new(unsafe { PQconnectStart(conninfo.as_ptr()) })
            .ok_or_else(|| Error::driver("libpq failed to allocate a connection"))?;

        let conn = PqConn { conn };
        if unsafe { PQstatus(conn.conn.as_ptr()) } == ConnStatusType::CONNECTION_BAD {
            return Err(conn.error("connection attempt refused"));
        }

        Ok(conn)
    }

    /// Advance the connection handshake (`PQconnectPoll`).
    pub fn connect_poll(&self) -> Result<PollStatus> {
        match unsafe { PQconnectPoll(self.conn.as_ptr()) } {
            PostgresPollingStatusType::PGRES_POLLING_OK => Ok(PollStatus::Ok),
            PostgresPollingStatusType::PGRES_POLLING_READING => Ok(PollStatus::WantRead),
            PostgresPollingStatusType::PGRES_POLLING_WRITING => Ok(PollStatus::WantWrite),
            _ => Err(self.error("connection handshake failed")),
        }
    }

    pub fn set_nonblocking(&self) -> Result<()> {
        if unsafe { PQsetnonblocking(self.conn.as_ptr(), 1) } != 0 {
            return Err(self.error("failed to switch the connection to non-blocking mode"));
        }
        Ok(())
    }

    /// File descriptor of the connection socket. libpq may replace the
    /// socket while the handshake advances, so this is re-queried after
    /// every connect poll.
    pub fn socket(&self) -> Result<RawFd> {
        let fd = unsafe { PQsocket(self.conn.as_ptr()) };
        if fd < 0 {
            return Err(self.error("connection has no socket"));
        }
        Ok(fd)
    }

    /// Dispatch one statement (`PQsendQueryParams`, all-text parameters).
    pub fn send_query_params(&self, sql: &str, params: &[Option<&str>]) -> Result<()> {
        let sql =
            CString::new(sql).map_err(|_| Error::driver("statement contains a NUL byte"))?;

        let mut owned = Vec::with_capacity(params.len());
        for param in params {
            owned.push(match param {
                Some(value) => Some(
                    CString::new(*value)
                        .map_err(|_| Error::driver("parameter contains a NUL byte"))?,
                ),
                None => None,
            });
        }
        let values: Vec<*const c_char> = owned
            .iter()
            .map(|param| param.as_ref().map_or(ptr::null(), |v| v.as_ptr()))
            .collect();

        let dispatched = unsafe {
            PQsendQueryParams(
                self.conn.as_ptr(),
                sql.as_ptr(),
                params.len() as c_int,
                ptr::null(), // parameter types are inferred by the server
                values.as_ptr(),
                ptr::null(), // text values carry their own length
                ptr::null(), // all parameters in text format
                0,           // text results
            )
        };
        if dispatched != 1 {
            return Err(self.error("failed to dispatch statement"));
        }

        Ok(())
    }

    /// Flush buffered outbound data; `false` means the socket would block
    /// and the caller must wait for write readiness.
    pub fn flush(&self) -> Result<bool> {
        match unsafe { PQflush(self.conn.as_ptr()) } {
            0 => Ok(true),
            1 => Ok(false),
            _ => Err(self.error("failed to flush outbound data")),
        }
    }

    /// Read whatever the server has sent so far into libpq's buffers.
    pub fn consume_input(&self) -> Result<()> {
        if unsafe { PQconsumeInput(self.conn.as_ptr()) } != 1 {
            return Err(self.error("failed to consume server input"));
        }
        Ok(())
    }

    /// Whether a response is still incomplete, i.e. `PQgetResult` would block.
    pub fn is_busy(&self) -> bool {
        unsafe { PQisBusy(self.conn.as_ptr()) != 0 }
    }

    /// Next buffered result of the current statement; `None` once the
    /// response has been fully consumed.
    pub fn get_result(&self) -> Option<PqResult> {
        NonNull::new(unsafe { PQgetResult(self.conn.as_ptr()) }).map(|res| PqResult { res })
    }

    /// Pop one buffered notification, oldest first.
    pub fn notifies(&self) -> Option<Notification> {
        let raw = unsafe { PQnotifies(self.conn.as_ptr()) };
        if raw.is_null() {
            return None;
        }

        let notification = unsafe {
            let notify = &*raw;
            Notification {
                channel: cstr_lossy(notify.relname),
                pid: notify.be_pid as i32,
                payload: cstr_lossy(notify.extra),
            }
        };
        unsafe { PQfreemem(raw.cast()) };

        Some(notification)
    }

    pub fn error_message(&self) -> String {
        unsafe { cstr_lossy(PQerrorMessage(self.conn.as_ptr())) }
            .trim_end()
            .to_string()
    }

    pub(crate) fn error(&self, context: &str) -> Error {
        let detail = self.error_message();
        if detail.is_empty() {
            Error::driver(context)
        } else {
            Error::driver(format!("{context}: {detail}"))
        }
    }
}

impl Drop for PqConn {
    fn drop(&mut self) {
        unsafe { PQfinish(self.conn.as_ptr()) };
    }
}

/// Coarse classification of a `PGresult`, as much as the adapter needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultStatus {
    /// A row set is available.
    Rows,
    /// A command completed without producing rows.
    Command,
    /// The statement was empty.
    Empty,
    /// The server reported an error for the statement.
    Failed,
}

/// One owned `PGresult`.
pub struct PqResult {
    res: NonNull<PGresult>,
}

unsafe impl Send for PqResult {}

impl PqResult {
    pub fn status(&self) -> ResultStatus {
        match unsafe { PQresultStatus(self.res.as_ptr()) } {
            ExecStatusType::PGRES_TUPLES_OK | ExecStatusType::PGRES_SINGLE_TUPLE => {
                ResultStatus::Rows
            }
            ExecStatusType::PGRES_COMMAND_OK => ResultStatus::Command,
            ExecStatusType::PGRES_EMPTY_QUERY => ResultStatus::Empty,
            _ => ResultStatus::Failed,
        }
    }

    /// Affected-row count as reported by `PQcmdTuples`; zero when the
    /// statement has no such count.
    pub fn rows_affected(&self) -> u64 {
        unsafe { cstr_lossy(PQcmdTuples(self.res.as_ptr())) }
            .parse()
            .unwrap_or(0)
    }

    pub fn ntuples(&self) -> usize {
        unsafe { PQntuples(self.res.as_ptr()) as usize }
    }

    pub fn nfields(&self) -> usize {
        unsafe { PQnfields(self.res.as_ptr()) as usize }
    }

    pub fn field_name(&self, col: usize) -> Option<String> {
        let name = unsafe { PQfname(self.res.as_ptr(), col as c_int) };
        if name.is_null() {
            return None;
        }
        Some(unsafe { cstr_lossy(name) })
    }

    /// Text value at (`row`, `col`); `None` for SQL NULL.
    pub fn value(&self, row: usize, col: usize) -> Option<String> {
        if unsafe { PQgetisnull(self.res.as_ptr(), row as c_int, col as c_int) } != 0 {
            return None;
        }
        let value = unsafe { PQgetvalue(self.res.as_ptr(), row as c_int, col as c_int) };
        if value.is_null() {
            return None;
        }
        Some(unsafe { cstr_lossy(value) })
    }

    pub fn error_message(&self) -> String {
        unsafe { cstr_lossy(PQresultErrorMessage(self.res.as_ptr())) }
            .trim_end()
            .to_string()
    }
}

impl Drop for PqResult {
    fn drop(&mut self) {
        unsafe { PQclear(self.res.as_ptr()) };
    }
}

unsafe fn cstr_lossy(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    CStr::from_ptr(ptr).to_string_lossy().into_owned()
}
