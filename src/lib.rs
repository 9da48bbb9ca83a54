//! A database-driven task dispatcher.
//!
//! Subscribes to a PostgreSQL `LISTEN/NOTIFY` channel and fans the incoming
//! payloads out to a fixed pool of workers. Every worker owns a long-lived
//! non-blocking database session, so blocking server-side statements
//! overlap across connections instead of queueing behind one another, all
//! on a single-threaded cooperative scheduler.
//!
//! The interesting part is [`session`]: an async adapter over libpq's
//! tri-state (`Ok`/`WantRead`/`WantWrite`) poll protocol, suspending on
//! socket readiness through the reactor.

pub mod config;
pub mod error;
pub mod listener;
pub mod pq;
pub mod queue;
pub mod session;
pub mod supervisor;
pub mod worker;

pub use crate::config::Config;
pub use crate::error::{Error, Result};
pub use crate::pq::{Notification, PollStatus};
pub use crate::session::{Fetch, Outcome, Row, Session};
