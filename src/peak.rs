//! Continuous level monitoring as a backpressured async stream.
//!
//! The native layer pushes raw sample buffers from its dispatch context; the
//! read callback decodes at most one scalar per push and enqueues it without
//! blocking. The consumer side drains the queue through the disconnect race.

use std::time::Duration;

use async_stream::stream;
use futures_util::{Stream, StreamExt};
use log::{debug, info};
use pulse_protocol::{RecordStream, RecordStreamSpec};
use tokio::sync::mpsc;

use crate::client::PulseClient;
use crate::error::{PulseError, Result};

/// Sample rate used by [`PulseClient::peak_over_window`].
const PEAK_WINDOW_RATE: u32 = 25;

/// Decode one level sample from a raw buffer.
///
/// Buffers shorter than one float are gap markers and yield nothing.
/// Decoded values are clamped into the 0..=1 level range.
fn decode_peak(buf: &[u8]) -> Option<f32> {
    if buf.len() < 4 {
        return None;
    }
    let raw = f32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if !raw.is_finite() {
        return None;
    }
    Some(raw.clamp(0.0, 1.0))
}

/// Disconnects the native stream exactly once, on every exit path.
struct StreamGuard {
    record: Option<Box<dyn RecordStream>>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if let Some(record) = self.record.take() {
            // The server may have removed the stream already; a redundant
            // teardown error is swallowed.
            if let Err(e) = record.disconnect() {
                debug!("record stream teardown: {e}");
            }
        }
    }
}

impl PulseClient {
    /// Monitor the level of a source (or the default source) as a stream of
    /// values in `0.0..=1.0`, `rate` measurements per second.
    ///
    /// Pass `monitor_of` to narrow a sink-monitor source down to a single
    /// upstream stream instead of the aggregate signal. With
    /// `allow_suspend`, the server may auto-suspend the device despite the
    /// monitor running. Dropping the stream tears the native stream down.
    pub fn subscribe_peak(
        &self,
        source: Option<&str>,
        rate: u32,
        monitor_of: Option<u32>,
        allow_suspend: bool,
    ) -> Result<impl Stream<Item = Result<f32>> + '_> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let spec = RecordStreamSpec {
            source: source.map(str::to_string),
            rate,
            monitor_of,
            allow_suspend,
        };
        info!(
            "opening peak monitor on {} at {rate} Hz",
            source.unwrap_or("default source")
        );
        let record = self
            .shared
            .with_context(|ctx| {
                ctx.open_record_stream(
                    spec,
                    Box::new(move |buf| {
                        if let Some(level) = decode_peak(buf) {
                            let _ = tx.send(level);
                        }
                    }),
                )
            })?
            .map_err(PulseError::from)?;
        let guard = StreamGuard {
            record: Some(record),
        };
        Ok(stream! {
            let _guard = guard;
            loop {
                match self.race_disconnect(rx.recv()).await {
                    Ok(Some(level)) => yield Ok(level),
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        })
    }

    /// Highest level observed on `source` within `window`, clamped to 1.0.
    ///
    /// Samples an internal 25 Hz monitor stream and tears it down when the
    /// window elapses or an error cuts the wait short.
    pub async fn peak_over_window(
        &self,
        source: Option<&str>,
        window: Duration,
        monitor_of: Option<u32>,
    ) -> Result<f32> {
        let samples = self.subscribe_peak(source, PEAK_WINDOW_RATE, monitor_of, false)?;
        tokio::pin!(samples);
        let deadline = tokio::time::sleep(window);
        tokio::pin!(deadline);
        let mut peak = 0.0f32;
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                sample = samples.next() => match sample {
                    Some(Ok(level)) => peak = peak.max(level),
                    Some(Err(e)) => return Err(e),
                    None => break,
                },
            }
        }
        Ok(peak.min(1.0))
    }
}
