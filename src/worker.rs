//! Workers: one session each, one item at a time.

use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::queue::QueueReceiver;
use crate::session::{Fetch, Session};

/// Placeholder per-item statement standing in for real business work;
/// deployments substitute their own statement here.
const WORK_STATEMENT: &str = "SELECT pg_sleep(5)";

pub struct Worker {
    id: usize,
    session: Session,
    queue: QueueReceiver,
}

impl Worker {
    /// Open this worker's dedicated session.
    pub async fn connect(id: usize, uri: &str, queue: QueueReceiver) -> Result<Self> {
        let session = Session::connect(uri).await?;
        Ok(Worker { id, session, queue })
    }

    /// Take items off the queue and run the per-item statement, serially on
    /// this worker's own session, until shutdown or end-of-stream.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        loop {
            let item = tokio::select! {
                _ = shutdown.cancelled() => break,
                item = self.queue.take() => match item {
                    Some(item) => item,
                    None => break,
                },
            };

            log::info!("worker-{}: received {:?}", self.id, item.payload);

            let mut interrupted = false;
            tokio::select! {
                _ = shutdown.cancelled() => interrupted = true,
                outcome = self.session.execute(WORK_STATEMENT, &[], Fetch::All) => {
                    outcome?;
                    log::info!("worker-{}: finished {:?}", self.id, item.payload);
                }
            }

            if interrupted {
                // the only way to interrupt an in-flight statement is to
                // close the connection; the server aborts the query
                self.session.close();
                break;
            }
        }

        log::info!("worker-{}: stopped", self.id);
        Ok(())
    }
}
