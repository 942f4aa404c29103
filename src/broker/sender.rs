//! Sender worker pool
//!
//! ```text
//!  publish() ──► client queue ──► try_schedule() ──► ready channel
//!                                                        │
//!                          ┌─────────────┬───────────────┤
//!                          ▼             ▼               ▼
//!                      worker 0      worker 1   ...  worker N-1
//!                          │  drain one client until its queue is empty
//!                          ▼
//!                 ClientStream::deliver()
//! ```
//!
//! A client is drained by at most one worker at a time, which keeps its
//! packets in publish order. A slow client only occupies the worker
//! draining it, bounded by the send timeout.

use std::sync::Arc;

use super::client::{ClientStream, DetachReason};
use super::store::StreamBroker;

impl StreamBroker {
    /// Spawn the sender workers
    ///
    /// Returns handles that can be used to abort the tasks.
    pub fn spawn_senders(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        (0..self.config().sender_workers.max(1))
            .map(|worker| {
                let broker = Arc::clone(self);
                tokio::spawn(async move { broker.sender_loop(worker).await })
            })
            .collect()
    }

    async fn sender_loop(&self, worker: usize) {
        tracing::debug!(worker = worker, "Sender worker started");

        loop {
            let next = {
                let mut ready = self.ready_rx.lock().await;
                ready.recv().await
            };
            let Some(id) = next else {
                break;
            };

            // Detached since it was scheduled
            let Some(client) = self.client(id) else {
                continue;
            };
            self.drain(&client).await;
        }

        tracing::debug!(worker = worker, "Sender worker stopped");
    }

    async fn drain(&self, client: &Arc<ClientStream>) {
        let send_timeout = self.config().send_timeout;

        loop {
            let Some(packet) = client.pop() else {
                client.unschedule();
                // A publish may have raced with the unschedule
                if client.queued() > 0 && client.try_schedule() {
                    continue;
                }
                return;
            };

            let bytes = packet.len();
            let service = Arc::clone(&packet.service);

            match tokio::time::timeout(send_timeout, client.deliver(packet)).await {
                Ok(Ok(())) => self.stats().record_delivered(bytes),
                Ok(Err(e)) => {
                    tracing::warn!(
                        service = %service,
                        client = %client.id(),
                        bytes = bytes,
                        error = %e,
                        "Packet transmission failed"
                    );
                    self.fail(client);
                    return;
                }
                Err(_) => {
                    tracing::warn!(
                        service = %service,
                        client = %client.id(),
                        bytes = bytes,
                        timeout_ms = send_timeout.as_millis() as u64,
                        "Packet transmission timed out"
                    );
                    self.fail(client);
                    return;
                }
            }
        }
    }

    fn fail(&self, client: &ClientStream) {
        self.stats().record_send_failure();
        client.unschedule();
        self.detach(client.id(), DetachReason::SendFailed);
    }
}
