//! One task-owned database session, driven from the reactor.
//!
//! A session wraps a single non-blocking libpq connection and turns its
//! tri-state poll protocol into ordinary `async` methods: whenever the
//! client reports `WantRead`/`WantWrite`, the session registers the
//! matching interest for the connection socket and suspends until the
//! reactor wakes it. Exactly one operation is in flight at a time, which
//! the `&mut self` receivers enforce statically.

use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;

use tokio::io::unix::AsyncFd;

use crate::error::{Error, Result};
use crate::pq::{Notification, PollStatus, PqConn, PqResult, ResultStatus};

/// How the server response of [`Session::execute`] is materialised.
///
/// This replaces dispatch over a cursor-method name with a closed set of
/// retrieval modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetch {
    /// Return only the affected-row count.
    RowCount,
    /// Materialise every row of the result set.
    All,
}

/// Result of a completed statement.
#[derive(Debug)]
pub enum Outcome {
    RowCount(u64),
    Rows(Vec<Row>),
}

/// One result row in text format.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<[Box<str>]>,
    values: Vec<Option<String>>,
}

impl Row {
    /// Value by position; `None` for SQL NULL or an out-of-range index.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.values.get(index).and_then(|v| v.as_deref())
    }

    /// Value by column name; `None` when the column does not exist or the
    /// value is SQL NULL.
    pub fn get_by_name(&self, name: &str) -> Option<&str> {
        let index = self.columns.iter().position(|c| &**c == name)?;
        self.get(index)
    }

    pub fn columns(&self) -> &[Box<str>] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Connection socket as registered with the reactor.
///
/// libpq owns the descriptor. The registration is dropped before `PQfinish`
/// closes the socket (field order in [`Inner`]).
struct SessionFd(RawFd);

impl AsRawFd for SessionFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

struct Inner {
    fd: AsyncFd<SessionFd>,
    conn: PqConn,
}

/// A live database session. `None` inside means the session was closed,
/// either explicitly or because an operation failed.
pub struct Session {
    inner: Option<Inner>,
}

impl Session {
    /// Open a connection and complete the handshake.
    ///
    /// Suspends on socket readiness while the handshake advances and
    /// returns only once the session is idle, with the connection switched
    /// to non-blocking mode. libpq may replace the socket mid-handshake
    /// (e.g. while walking host candidates), so interest is re-registered
    /// whenever the descriptor changes.
    pub async fn connect(uri: &str) -> Result<Self> {
        let conn = PqConn::start(uri)?;
        let mut fd = AsyncFd::new(SessionFd(conn.socket()?))?;

        loop {
            let status = conn.connect_poll()?;
            if status == PollStatus::Ok {
                break;
            }

            let socket = conn.socket()?;
            if socket != fd.get_ref().0 {
                fd = AsyncFd::new(SessionFd(socket))?;
            }

            match status {
                PollStatus::WantRead => {
                    let mut guard = fd.readable_mut().await?;
                    guard.clear_ready();
                }
                PollStatus::WantWrite => {
                    let mut guard = fd.writable_mut().await?;
                    guard.clear_ready();
                }
                PollStatus::Ok => unreachable!(),
            }
        }

        conn.set_nonblocking()?;

        Ok(Session {
            inner: Some(Inner { fd, conn }),
        })
    }

    /// Submit one statement and suspend until the server response has been
    /// fully consumed.
    ///
    /// Returns the row set or the affected-row count depending on `fetch`.
    /// A failed statement closes the session.
    pub async fn execute(
        &mut self,
        sql: &str,
        params: &[Option<&str>],
        fetch: Fetch,
    ) -> Result<Outcome> {
        let inner = self.inner.as_mut().ok_or(Error::SessionClosed)?;
        match inner.execute(sql, params, fetch).await {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                self.inner = None;
                Err(error)
            }
        }
    }

    /// Subscribe this session to a notification channel.
    ///
    /// `LISTEN` does not accept bind parameters, so the channel name is
    /// checked against a strict identifier whitelist before any SQL is
    /// built; semicolons, quotes and whitespace never reach the server.
    pub async fn listen(&mut self, channel: &str) -> Result<()> {
        if !is_valid_channel(channel) {
            return Err(Error::InvalidChannel(channel.into()));
        }

        self.execute(&format!(r#"LISTEN "{channel}""#), &[], Fetch::RowCount)
            .await?;
        Ok(())
    }

    /// Suspend until at least one notification is buffered on this session,
    /// then return everything buffered, in arrival order.
    ///
    /// Never returns an empty batch: a readiness wake that yields no
    /// notifications re-arms the read interest and keeps waiting.
    pub async fn drain_notifications(&mut self) -> Result<Vec<Notification>> {
        let inner = self.inner.as_mut().ok_or(Error::SessionClosed)?;
        match inner.drain_notifications().await {
            Ok(batch) => Ok(batch),
            Err(error) => {
                self.inner = None;
                Err(error)
            }
        }
    }

    /// Release the connection. Idempotent; also runs on drop, so every exit
    /// path deregisters the socket and closes the connection.
    pub fn close(&mut self) {
        self.inner = None;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }
}

impl Inner {
    async fn execute(
        &mut self,
        sql: &str,
        params: &[Option<&str>],
        fetch: Fetch,
    ) -> Result<Outcome> {
        self.conn.send_query_params(sql, params)?;

        loop {
            match self.conn.exec_poll()? {
                PollStatus::Ok => break,
                status => self.wait(status).await?,
            }
        }

        // the whole response is buffered locally at this point;
        // materialisation does not suspend
        self.collect(fetch)
    }

    async fn drain_notifications(&mut self) -> Result<Vec<Notification>> {
        loop {
            self.conn.consume_input()?;

            let mut batch = Vec::new();
            while let Some(notification) = self.conn.notifies() {
                batch.push(notification);
            }
            if !batch.is_empty() {
                return Ok(batch);
            }

            self.wait(PollStatus::WantRead).await?;
        }
    }

    async fn wait(&mut self, status: PollStatus) -> Result<()> {
        match status {
            PollStatus::Ok => {}
            PollStatus::WantRead => {
                let mut guard = self.fd.readable_mut().await?;
                guard.clear_ready();
            }
            PollStatus::WantWrite => {
                let mut guard = self.fd.writable_mut().await?;
                guard.clear_ready();
            }
        }
        Ok(())
    }

    fn collect(&mut self, fetch: Fetch) -> Result<Outcome> {
        let mut rows = Vec::new();
        let mut affected = 0;
        let mut failure: Option<Error> = None;

        // every result must be taken off the connection, even after an
        // error, or the session cannot accept the next statement
        while let Some(result) = self.conn.get_result() {
            match result.status() {
                ResultStatus::Rows => match fetch {
                    Fetch::All => materialise(&result, &mut rows),
                    Fetch::RowCount => affected = result.rows_affected(),
                },
                ResultStatus::Command => affected = result.rows_affected(),
                ResultStatus::Empty => {}
                ResultStatus::Failed => {
                    let message = result.error_message();
                    failure = Some(if message.is_empty() {
                        self.conn.error("statement failed")
                    } else {
                        Error::driver(message)
                    });
                }
            }
        }

        if let Some(error) = failure {
            return Err(error);
        }

        Ok(match fetch {
            Fetch::RowCount => Outcome::RowCount(affected),
            Fetch::All => Outcome::Rows(rows),
        })
    }
}

fn materialise(result: &PqResult, rows: &mut Vec<Row>) {
    let nfields = result.nfields();
    let columns: Arc<[Box<str>]> = (0..nfields)
        .map(|col| result.field_name(col).unwrap_or_default().into_boxed_str())
        .collect();

    for row in 0..result.ntuples() {
        let values = (0..nfields).map(|col| result.value(row, col)).collect();
        rows.push(Row {
            columns: Arc::clone(&columns),
            values,
        });
    }
}

/// Whitelist for notification channel names: an ASCII identifier, nothing
/// else. Deliberately narrower than what the server would accept.
fn is_valid_channel(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_identifiers() {
        assert!(is_valid_channel("task"));
        assert!(is_valid_channel("task_2"));
        assert!(is_valid_channel("_private"));
    }

    #[test]
    fn rejects_injection_attempts() {
        assert!(!is_valid_channel(""));
        assert!(!is_valid_channel("task; DROP TABLE jobs"));
        assert!(!is_valid_channel("task\"; --"));
        assert!(!is_valid_channel("task channel"));
        assert!(!is_valid_channel("task'"));
        assert!(!is_valid_channel("1task"));
        assert!(!is_valid_channel("task\n"));
    }

    #[test]
    fn row_access_by_position_and_name() {
        let columns: Arc<[Box<str>]> = ["id", "payload"]
            .iter()
            .map(|c| c.to_string().into_boxed_str())
            .collect();
        let row = Row {
            columns: Arc::clone(&columns),
            values: vec![Some("7".to_string()), None],
        };

        assert_eq!(row.get(0), Some("7"));
        assert_eq!(row.get(1), None);
        assert_eq!(row.get(2), None);
        assert_eq!(row.get_by_name("id"), Some("7"));
        assert_eq!(row.get_by_name("payload"), None);
        assert_eq!(row.get_by_name("missing"), None);
        assert_eq!(row.len(), 2);
        assert!(!row.is_empty());

        let names: Vec<&str> = row.columns().iter().map(|c| &**c).collect();
        assert_eq!(names, ["id", "payload"]);
    }
}
