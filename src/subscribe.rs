//! Server change notifications as a single-consumer async stream.

use std::sync::Arc;

use async_stream::stream;
use futures_util::Stream;
use log::{debug, info};
use pulse_protocol::{EventMask, Notification};
use tokio::sync::mpsc;

use crate::client::{Phase, PulseClient, Shared};
use crate::error::{PulseError, Result};

/// Clears the subscriber slot and resets the server-side mask on every exit
/// path of the stream (normal end, error, or consumer cancellation).
struct SubscriberGuard {
    shared: Arc<Shared>,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.shared.subscriber.lock().unwrap().take();
        if self.shared.phase() == Phase::Ready {
            // Best-effort: skipped entirely when already disconnected, and a
            // rejected reset is only logged.
            let reset = self
                .shared
                .with_context(|ctx| ctx.set_event_mask(0, Box::new(|_| {})));
            if let Ok(Err(e)) = reset {
                debug!("subscription mask reset failed: {e}");
            }
        }
        debug!("event subscription ended");
    }
}

impl PulseClient {
    /// Subscribe to server notifications for the given categories and
    /// iterate them as they arrive.
    ///
    /// Only one subscription stream may be active per connection; starting a
    /// second one is a usage error. Dropping the stream (or breaking out of
    /// the iteration) unsubscribes and leaves the connection reusable. After
    /// a disconnect the stream yields the error once and ends.
    pub async fn subscribe_events(
        &self,
        masks: &[EventMask],
    ) -> Result<impl Stream<Item = Result<Notification>> + '_> {
        if masks.is_empty() {
            return Err(PulseError::Usage(
                "at least one event category selector is required".into(),
            ));
        }
        let mut rx = {
            let mut slot = self.shared.subscriber.lock().unwrap();
            if slot.is_some() {
                return Err(PulseError::Usage(
                    "only one event subscription may be active at a time".into(),
                ));
            }
            let (tx, rx) = mpsc::unbounded_channel();
            *slot = Some(tx);
            rx
        };
        let guard = SubscriberGuard {
            shared: Arc::clone(&self.shared),
        };
        let mask = EventMask::combine(masks);
        info!("subscribing to server events, mask {mask:#06x}");
        self.operation(move |ctx, done| ctx.set_event_mask(mask, done))
            .await?;
        Ok(stream! {
            let _guard = guard;
            loop {
                match self.race_disconnect(rx.recv()).await {
                    Ok(Some(event)) => yield Ok(event),
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        })
    }
}
