//! Bridges "issue request, completion callback fires exactly once" into
//! "awaiting a future settles exactly once".
//!
//! Every in-flight operation is registered under a token so a disconnect can
//! fail the whole set at once. Registration and settlement both happen on
//! the scheduler thread (completion callbacks marshal through the loop), so
//! an operation started during a disconnect transition is either refused
//! up front by the caller or registered and then swept by `fail_all`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::debug;
use pulse_protocol::CompletionCallback;
use tokio::sync::oneshot;

use crate::error::{PulseError, Result};
use crate::mainloop::MainloopHandle;

struct Inner {
    next_token: u64,
    waiting: HashMap<u64, oneshot::Sender<Result<()>>>,
}

/// Registry of operations awaiting their completion callback.
#[derive(Clone)]
pub(crate) struct PendingOps {
    inner: Arc<Mutex<Inner>>,
    handle: MainloopHandle,
}

impl PendingOps {
    pub(crate) fn new(handle: MainloopHandle) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                next_token: 0,
                waiting: HashMap::new(),
            })),
            handle,
        }
    }

    /// Register a new operation.
    ///
    /// Returns the settlement receiver, a guard that deregisters the
    /// operation when the awaiting future goes away, and the completion
    /// callback to hand to the native layer. The callback may be invoked
    /// from any thread; it settles on the scheduler thread.
    pub(crate) fn begin(
        &self,
    ) -> (
        oneshot::Receiver<Result<()>>,
        PendingGuard,
        CompletionCallback,
    ) {
        let (tx, rx) = oneshot::channel();
        let token = {
            let mut inner = self.inner.lock().unwrap();
            inner.next_token += 1;
            let token = inner.next_token;
            inner.waiting.insert(token, tx);
            token
        };
        let guard = PendingGuard {
            inner: Arc::clone(&self.inner),
            token,
        };
        let cb: CompletionCallback = {
            let inner = Arc::clone(&self.inner);
            let handle = self.handle.clone();
            Box::new(move |success: bool| {
                handle.post(move || {
                    if let Some(tx) = inner.lock().unwrap().waiting.remove(&token) {
                        let result = if success {
                            Ok(())
                        } else {
                            Err(PulseError::OperationInvalid(
                                "request rejected by server".into(),
                            ))
                        };
                        let _ = tx.send(result);
                    }
                });
            })
        };
        (rx, guard, cb)
    }

    /// Settle every pending operation with a disconnect error.
    pub(crate) fn fail_all(&self) {
        let drained: Vec<_> = {
            let mut inner = self.inner.lock().unwrap();
            inner.waiting.drain().collect()
        };
        if !drained.is_empty() {
            debug!(
                "failing {} pending operation(s) after disconnect",
                drained.len()
            );
        }
        for (_, tx) in drained {
            let _ = tx.send(Err(PulseError::Disconnected));
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().unwrap().waiting.len()
    }
}

/// Deregisters the operation on drop, even when the awaiter is cancelled
/// before settlement.
pub(crate) struct PendingGuard {
    inner: Arc<Mutex<Inner>>,
    token: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.inner.lock().unwrap().waiting.remove(&self.token);
    }
}
