//! Event delivery from the agent loop to the SSE stream.
//!
//! The channel is bounded, so SSE backpressure propagates into the loop: a
//! send blocks while the client is slow. A send that stalls past the
//! configured ceiling cancels the run (the client is presumed gone even if
//! the socket has not errored yet).

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use dp_domain::step::{AgentEvent, StepEvent};

pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<AgentEvent>,
    cancel: CancellationToken,
    stall_ceiling: Duration,
}

impl EventSink {
    pub fn new(
        tx: mpsc::Sender<AgentEvent>,
        cancel: CancellationToken,
        stall_ceiling: Duration,
    ) -> Self {
        Self {
            tx,
            cancel,
            stall_ceiling,
        }
    }

    /// Deliver an event. Best-effort: a closed receiver or a stall past the
    /// ceiling cancels the run instead of erroring — the loop notices the
    /// token at its next suspension point.
    pub async fn send(&self, event: AgentEvent) {
        match tokio::time::timeout(self.stall_ceiling, self.tx.send(event)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                // Receiver dropped: client is gone.
                self.cancel.cancel();
            }
            Err(_) => {
                tracing::warn!(
                    stall_secs = self.stall_ceiling.as_secs(),
                    "no successful write within the stall ceiling, cancelling run"
                );
                self.cancel.cancel();
            }
        }
    }

    pub async fn step(&self, step: StepEvent) {
        self.send(AgentEvent::Step(step)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dp_domain::step::TokenBreakdown;

    #[tokio::test]
    async fn send_delivers_to_receiver() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = EventSink::new(tx, CancellationToken::new(), Duration::from_secs(1));
        sink.step(StepEvent::error(1, "x")).await;
        assert!(matches!(rx.recv().await, Some(AgentEvent::Step(_))));
    }

    #[tokio::test]
    async fn closed_receiver_cancels_run() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let cancel = CancellationToken::new();
        let sink = EventSink::new(tx, cancel.clone(), Duration::from_secs(1));
        sink.send(AgentEvent::Done {
            usage: TokenBreakdown::default(),
            commit: None,
            cancelled: false,
        })
        .await;
        assert!(cancel.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_receiver_cancels_after_ceiling() {
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let sink = EventSink::new(tx, cancel.clone(), Duration::from_millis(50));
        // Fill the channel, then stall on the second send.
        sink.step(StepEvent::error(1, "fill")).await;
        sink.step(StepEvent::error(2, "stall")).await;
        assert!(cancel.is_cancelled());
    }
}
