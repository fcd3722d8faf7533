//! Connection lifecycle: the user-facing client object, its phase machine
//! and the disconnect race every blocking wait goes through.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use pulse_protocol::{ConnectFlags, ContextState, NativeBackend, NativeContext, Notification};
use tokio::sync::{mpsc, watch};

use crate::bridge::PendingOps;
use crate::error::{PulseError, Result};
use crate::mainloop::Mainloop;

/// Connection lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Unconnected,
    Connecting,
    Ready,
    Failed,
    Terminated,
    Closed,
}

impl Phase {
    /// The level-triggered disconnection condition.
    pub fn is_down(self) -> bool {
        matches!(self, Phase::Failed | Phase::Terminated | Phase::Closed)
    }
}

/// Options for [`PulseClient::connect`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectOptions {
    /// Start a server instance if none is running.
    pub autospawn: bool,
    /// Keep the attempt open until a server appears instead of failing.
    pub wait_for_server: bool,
    /// Give up after this long.
    pub timeout: Option<Duration>,
}

pub(crate) struct Shared {
    pub(crate) name: String,
    pub(crate) server: Option<String>,
    backend: Arc<dyn NativeBackend>,
    pub(crate) context: Mutex<Option<Box<dyn NativeContext>>>,
    generation: AtomicU64,
    phase_tx: watch::Sender<Phase>,
    pub(crate) pending: PendingOps,
    /// Single active event-subscription slot.
    pub(crate) subscriber: Mutex<Option<mpsc::UnboundedSender<Notification>>>,
}

impl Shared {
    pub(crate) fn phase(&self) -> Phase {
        *self.phase_tx.borrow()
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        self.phase_tx.send_replace(phase);
    }

    pub(crate) fn watch_phase(&self) -> watch::Receiver<Phase> {
        self.phase_tx.subscribe()
    }

    /// Run a closure against the live native context.
    pub(crate) fn with_context<R>(&self, f: impl FnOnce(&dyn NativeContext) -> R) -> Result<R> {
        let slot = self.context.lock().unwrap();
        match slot.as_ref() {
            Some(ctx) => Ok(f(ctx.as_ref())),
            None => Err(PulseError::Disconnected),
        }
    }

    fn down(&self, phase: Phase) {
        self.set_phase(phase);
        self.pending.fail_all();
    }

    fn apply_native_state(&self, generation: u64, state: ContextState) {
        if generation != self.generation.load(Ordering::SeqCst) {
            debug!("ignoring state callback from a replaced context");
            return;
        }
        if self.phase() == Phase::Closed {
            return;
        }
        match state {
            ContextState::Ready => {
                debug!("native context is ready");
                self.set_phase(Phase::Ready);
            }
            ContextState::Failed => {
                warn!("native context failed");
                self.down(Phase::Failed);
            }
            ContextState::Terminated => {
                info!("native context terminated");
                self.down(Phase::Terminated);
            }
            ContextState::Connecting | ContextState::Authorizing | ContextState::SettingName => {
                if matches!(self.phase(), Phase::Unconnected | Phase::Connecting) {
                    self.set_phase(Phase::Connecting);
                }
            }
            ContextState::Unconnected => {}
        }
    }
}

/// Asynchronous client connection to the sound server.
///
/// Create, `connect`, run operations, `close` (or drop). A client whose
/// connection failed can be reused: `connect` reinitializes the native
/// handle before retrying.
pub struct PulseClient {
    pub(crate) shared: Arc<Shared>,
    mainloop: Mainloop,
}

impl PulseClient {
    /// Create a client for the given server (`None` = local default),
    /// without connecting yet.
    pub fn new(
        name: impl Into<String>,
        server: Option<String>,
        backend: Arc<dyn NativeBackend>,
    ) -> Result<Self> {
        let mainloop = Mainloop::spawn()?;
        let (phase_tx, _) = watch::channel(Phase::Unconnected);
        let shared = Arc::new(Shared {
            name: name.into(),
            server,
            backend,
            context: Mutex::new(None),
            generation: AtomicU64::new(0),
            phase_tx,
            pending: PendingOps::new(mainloop.handle()),
            subscriber: Mutex::new(None),
        });
        let client = Self { shared, mainloop };
        client.reinit();
        Ok(client)
    }

    /// Replace the native context with a fresh one.
    fn reinit(&self) {
        let mut slot = self.shared.context.lock().unwrap();
        if let Some(old) = slot.take() {
            debug!("releasing previous native context");
            old.disconnect();
        }
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let ctx = self
            .shared
            .backend
            .create_context(self.mainloop.api(), &self.shared.name);

        let weak = Arc::downgrade(&self.shared);
        let handle = self.mainloop.handle();
        ctx.set_state_callback(Box::new(move |state| {
            // State callbacks can fire on the native dispatch context; hop
            // onto the loop before touching shared state.
            let weak = weak.clone();
            handle.post(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.apply_native_state(generation, state);
                }
            });
        }));

        let weak = Arc::downgrade(&self.shared);
        ctx.set_event_callback(Box::new(move |event| {
            // The unbounded queue is the thread-safe crossing point here;
            // enqueueing never blocks the dispatch context.
            if let Some(shared) = weak.upgrade() {
                if let Some(tx) = shared.subscriber.lock().unwrap().as_ref() {
                    let _ = tx.send(event);
                }
            }
        }));

        *slot = Some(ctx);
        drop(slot);
        self.shared.set_phase(Phase::Unconnected);
    }

    /// Connect to the server, waiting until the connection is ready.
    pub async fn connect(&self, options: ConnectOptions) -> Result<()> {
        if !matches!(self.phase(), Phase::Unconnected | Phase::Connecting) {
            self.reinit();
        }
        info!(
            "connecting to {} as '{}'",
            self.shared.server.as_deref().unwrap_or("default server"),
            self.shared.name
        );
        let flags = ConnectFlags {
            autospawn: options.autospawn,
            wait_for_server: options.wait_for_server,
        };
        self.shared.set_phase(Phase::Connecting);
        let submitted = self
            .shared
            .with_context(|ctx| ctx.connect(self.shared.server.as_deref(), flags))?;
        if let Err(e) = submitted {
            self.shared.down(Phase::Failed);
            return Err(PulseError::Connection(e.to_string()));
        }

        let raced = match options.timeout {
            None => self.race_disconnect(self.wait_phase(Phase::Ready)).await,
            Some(limit) => {
                match tokio::time::timeout(limit, self.race_disconnect(self.wait_phase(Phase::Ready)))
                    .await
                {
                    Ok(raced) => raced,
                    Err(_) => {
                        warn!("connect timed out after {limit:?}, forcing disconnect");
                        self.disconnect();
                        self.wait_down().await;
                        return Err(PulseError::TimeoutExceeded(limit));
                    }
                }
            }
        };
        match raced {
            Ok(()) => {
                info!("connected to sound server");
                Ok(())
            }
            Err(PulseError::Disconnected) => Err(PulseError::Connection(
                "server refused or dropped the connection".into(),
            )),
            Err(e) => Err(e),
        }
    }

    pub fn phase(&self) -> Phase {
        self.shared.phase()
    }

    pub fn connected(&self) -> bool {
        self.phase() == Phase::Ready
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Ask the native layer to drop the connection; the phase follows once
    /// the state callback arrives.
    pub fn disconnect(&self) {
        if self.phase().is_down() {
            return;
        }
        if let Some(ctx) = self.shared.context.lock().unwrap().as_ref() {
            ctx.disconnect();
        }
    }

    /// Tear down the connection and release the native handle.
    ///
    /// Idempotent, and safe to call from any exit path; pending operations
    /// settle with a disconnect error.
    pub fn close(&self) {
        let ctx = self.shared.context.lock().unwrap().take();
        if let Some(ctx) = ctx {
            info!("closing connection '{}'", self.shared.name);
            ctx.disconnect();
        }
        self.shared.set_phase(Phase::Closed);
        self.shared.pending.fail_all();
    }

    /// Race a future against the disconnection signal.
    ///
    /// Returns the future's output if it completes first; raises
    /// `Disconnected` the moment the connection leaves the ready path. The
    /// losing branch is dropped, and cancelling the race from outside drops
    /// both. Every blocking wait in this crate passes through here.
    pub(crate) async fn race_disconnect<T>(&self, fut: impl Future<Output = T>) -> Result<T> {
        let mut rx = self.shared.watch_phase();
        tokio::select! {
            biased;
            value = fut => Ok(value),
            _ = rx.wait_for(|p| p.is_down()) => Err(PulseError::Disconnected),
        }
    }

    async fn wait_phase(&self, target: Phase) {
        let mut rx = self.shared.watch_phase();
        let _ = rx.wait_for(|p| *p == target).await;
    }

    async fn wait_down(&self) {
        let mut rx = self.shared.watch_phase();
        let _ = rx.wait_for(|p| p.is_down()).await;
    }
}

impl Drop for PulseClient {
    fn drop(&mut self) {
        self.close();
    }
}
