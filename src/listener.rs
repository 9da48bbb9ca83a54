//! The notification source: one session dedicated to `LISTEN`.

use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::queue::QueueSender;
use crate::session::Session;

/// Channel the dispatcher subscribes to.
pub const CHANNEL: &str = "task";

pub struct Listener {
    session: Session,
    queue: QueueSender,
}

impl Listener {
    /// Open the dedicated listener session.
    pub async fn connect(uri: &str, queue: QueueSender) -> Result<Self> {
        let session = Session::connect(uri).await?;
        Ok(Listener { session, queue })
    }

    /// Subscribe and pump notifications into the work queue until shutdown.
    ///
    /// Publishing never blocks: when the queue is full the notification is
    /// dropped, the drop counter incremented and a warning logged. The
    /// database retains nothing, so a drop is a real loss and is made
    /// visible as such.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        self.session.listen(CHANNEL).await?;
        log::info!("listener: subscribed to channel {CHANNEL:?}");

        loop {
            let batch = tokio::select! {
                _ = shutdown.cancelled() => break,
                batch = self.session.drain_notifications() => batch?,
            };

            log::debug!("listener: received {} notification(s)", batch.len());
            for notification in batch {
                let payload = notification.payload.clone();
                if !self.queue.offer(notification) {
                    log::warn!(
                        "listener: queue full, dropped notification {:?} ({} dropped so far)",
                        payload,
                        self.queue.dropped(),
                    );
                }
            }
        }

        // dropping self closes the session and, with it being the only
        // sender, the queue; workers drain what is left and stop
        log::info!("listener: stopped");
        Ok(())
    }
}
