//! Asynchronous client interface for a PulseAudio-style sound server.
//!
//! The native connection layer is callback driven: requests complete through
//! completion callbacks, the server pushes notifications, and monitoring
//! streams deliver raw sample buffers, all potentially from an internal
//! dispatch context. This crate turns that into a cooperative, async
//! interface on a current-thread tokio runtime: operations are awaitables,
//! notifications and level samples are async streams, and a dropped
//! connection deterministically unblocks every outstanding wait.
//!
//! The native layer is reached through the traits in [`pulse_protocol`]; an
//! in-memory mock backend ships there for tests and development.
//!
//! ```no_run
//! use std::sync::Arc;
//! use pulse_async::{ConnectOptions, EntityKind, PulseClient};
//!
//! async fn raise_volumes(backend: Arc<dyn pulse_protocol::NativeBackend>)
//!     -> pulse_async::Result<()>
//! {
//!     let client = PulseClient::new("volume-increaser", None, backend)?;
//!     client.connect(ConnectOptions::default()).await?;
//!     for sink in client.sink_list().await? {
//!         client.volume_change_all(EntityKind::Sink, sink.index, 0.1).await?;
//!     }
//!     client.close();
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod error;
pub mod mainloop;

mod bridge;
mod ops;
mod peak;
mod subscribe;

pub use client::{ConnectOptions, Phase, PulseClient};
pub use error::{PulseError, Result};

pub use pulse_protocol::{
    CardInfo, ChannelVolume, ClientInfo, EntityKind, EventFacility, EventMask, EventType,
    ModuleInfo, Notification, ServerInfo, SinkInfo, SinkInputInfo, SourceInfo, SourceOutputInfo,
    StreamRestoreInfo, UpdateMode,
};
