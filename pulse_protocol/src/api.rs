//! Contract between the async client core and the native connection layer.
//!
//! The native layer is event driven: it registers callbacks and expects the
//! host to provide I/O readiness watching, timers and deferred callbacks.
//! Everything the client core needs from it goes through the traits in this
//! module, so the core never touches a wire protocol directly.

use std::fmt;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::types::{ChannelVolume, EntityInfo, Notification, StreamRestoreInfo, UpdateMode};

/// Errors reported by the native layer itself.
#[derive(Error, Debug)]
pub enum NativeError {
    #[error("context is not connected")]
    NotConnected,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("call failed: {0}")]
    Call(String),

    #[error("stream no longer exists")]
    StreamGone,
}

/// Interest for an fd watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoInterest {
    Read,
    Write,
    ReadWrite,
}

/// Event delivered to an fd watch callback.
#[derive(Debug)]
pub enum IoEvent {
    Readable,
    Writable,
    /// Watch setup or polling failed (e.g. invalid fd); the watch is dead.
    Failed(std::io::Error),
}

/// Timer schedule, relative to now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerSchedule {
    Once(Duration),
    Every(Duration),
}

pub type IoCallback = Box<dyn FnMut(IoEvent) + Send>;
pub type TimerCallback = Box<dyn FnMut() + Send>;
pub type DeferCallback = Box<dyn FnMut() + Send>;

/// Fd watch registration; dropping or cancelling stops delivery.
pub trait WatchGuard: Send {
    fn cancel(&self);
}

/// Timer registration; the deadline can be replaced while the guard lives.
pub trait TimerGuard: Send {
    fn restart(&self, schedule: TimerSchedule);
    fn cancel(&self);
}

/// Deferred-callback registration; runs every loop turn while enabled.
pub trait DeferGuard: Send {
    fn set_enabled(&self, enabled: bool);
    fn cancel(&self);
}

/// The primitives the native layer may request from its host loop.
///
/// `post` is the only member that is safe to call with work bound for the
/// scheduler thread from *any* thread; it is the marshalling point for every
/// callback that does not already originate on the loop.
pub trait MainloopApi: Send + Sync {
    /// Run a closure on the scheduler thread, in posting order.
    fn post(&self, f: Box<dyn FnOnce() + Send>);

    /// Watch an fd for readiness.
    fn io_watch(&self, fd: RawFd, interest: IoInterest, cb: IoCallback) -> Box<dyn WatchGuard>;

    /// Schedule a one-shot or periodic timer.
    fn timer(&self, schedule: TimerSchedule, cb: TimerCallback) -> Box<dyn TimerGuard>;

    /// Register a deferred callback, initially enabled.
    fn defer(&self, cb: DeferCallback) -> Box<dyn DeferGuard>;
}

/// Completion callback for one native operation; invoked exactly once with
/// a success flag, possibly from the native dispatch context.
pub type CompletionCallback = Box<dyn FnOnce(bool) + Send>;

/// Item callback for list/info queries.
pub type InfoCallback = Box<dyn FnMut(EntityInfo) + Send>;

/// Callback delivering a single index-like value (module index, db version).
pub type IndexCallback = Box<dyn FnOnce(u32) + Send>;

/// Connection state change callback.
pub type StateCallback = Box<dyn Fn(ContextState) + Send + Sync>;

/// Server notification callback.
pub type EventCallback = Box<dyn Fn(Notification) + Send + Sync>;

/// Raw sample data push callback. Buffers shorter than one sample are gap
/// markers.
pub type ReadCallback = Box<dyn FnMut(&[u8]) + Send>;

/// Native connection phases, as reported by the state callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Unconnected,
    Connecting,
    Authorizing,
    SettingName,
    Ready,
    Failed,
    Terminated,
}

/// Flags for the native connect call.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectFlags {
    /// Start a server instance if none is running.
    pub autospawn: bool,
    /// Keep trying until a server appears instead of failing.
    pub wait_for_server: bool,
}

/// Read-only operations, dispatched as a closed set.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    SinkList,
    SinkByIndex(u32),
    SinkByName(String),
    SourceList,
    SourceByIndex(u32),
    SourceByName(String),
    SinkInputList,
    SinkInputByIndex(u32),
    SourceOutputList,
    SourceOutputByIndex(u32),
    CardList,
    CardByIndex(u32),
    CardByName(String),
    ClientList,
    ClientByIndex(u32),
    ModuleList,
    ModuleByIndex(u32),
    ServerInfo,
    StreamRestoreList,
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::SinkList => write!(f, "sink list"),
            Query::SinkByIndex(i) => write!(f, "sink #{i}"),
            Query::SinkByName(n) => write!(f, "sink '{n}'"),
            Query::SourceList => write!(f, "source list"),
            Query::SourceByIndex(i) => write!(f, "source #{i}"),
            Query::SourceByName(n) => write!(f, "source '{n}'"),
            Query::SinkInputList => write!(f, "sink input list"),
            Query::SinkInputByIndex(i) => write!(f, "sink input #{i}"),
            Query::SourceOutputList => write!(f, "source output list"),
            Query::SourceOutputByIndex(i) => write!(f, "source output #{i}"),
            Query::CardList => write!(f, "card list"),
            Query::CardByIndex(i) => write!(f, "card #{i}"),
            Query::CardByName(n) => write!(f, "card '{n}'"),
            Query::ClientList => write!(f, "client list"),
            Query::ClientByIndex(i) => write!(f, "client #{i}"),
            Query::ModuleList => write!(f, "module list"),
            Query::ModuleByIndex(i) => write!(f, "module #{i}"),
            Query::ServerInfo => write!(f, "server info"),
            Query::StreamRestoreList => write!(f, "stream restore list"),
        }
    }
}

/// State-changing operations, dispatched as a closed set.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    SinkMute { index: u32, mute: bool },
    SourceMute { index: u32, mute: bool },
    SinkInputMute { index: u32, mute: bool },
    SourceOutputMute { index: u32, mute: bool },
    SinkVolume { index: u32, volume: ChannelVolume },
    SourceVolume { index: u32, volume: ChannelVolume },
    SinkInputVolume { index: u32, volume: ChannelVolume },
    SourceOutputVolume { index: u32, volume: ChannelVolume },
    SinkSuspend { index: u32, suspend: bool },
    SourceSuspend { index: u32, suspend: bool },
    SinkPort { index: u32, port: String },
    SourcePort { index: u32, port: String },
    MoveSinkInput { index: u32, sink: u32 },
    MoveSourceOutput { index: u32, source: u32 },
    DefaultSink { name: String },
    DefaultSource { name: String },
    CardProfile { index: u32, profile: String },
    PlaySample {
        name: String,
        sink: Option<String>,
        volume: f32,
        proplist: Option<String>,
    },
    UnloadModule { index: u32 },
    StreamRestoreWrite {
        entries: Vec<StreamRestoreInfo>,
        mode: UpdateMode,
        apply_immediately: bool,
    },
    StreamRestoreDelete { names: Vec<String> },
}

/// Parameters for a monitoring record stream.
#[derive(Debug, Clone, Default)]
pub struct RecordStreamSpec {
    /// Source to record from; `None` means the server default source.
    pub source: Option<String>,
    /// Measurements per second.
    pub rate: u32,
    /// Narrow monitoring to one upstream stream index instead of the
    /// aggregate signal.
    pub monitor_of: Option<u32>,
    /// Let the server auto-suspend the device despite the stream running.
    pub allow_suspend: bool,
}

/// A live monitoring stream. `disconnect` errors when the server already
/// removed the stream.
pub trait RecordStream: Send {
    fn disconnect(&self) -> Result<(), NativeError>;
}

/// One native connection handle.
///
/// All callbacks handed to these methods may be invoked from the native
/// dispatch context; implementations must route them through
/// [`MainloopApi::post`] unless they can prove the call site is already on
/// the scheduler thread.
pub trait NativeContext: Send {
    fn set_state_callback(&self, cb: StateCallback);
    fn set_event_callback(&self, cb: EventCallback);

    fn connect(&self, server: Option<&str>, flags: ConnectFlags) -> Result<(), NativeError>;
    fn disconnect(&self);

    fn query(
        &self,
        query: Query,
        on_item: InfoCallback,
        done: CompletionCallback,
    ) -> Result<(), NativeError>;

    fn mutate(&self, mutation: Mutation, done: CompletionCallback) -> Result<(), NativeError>;

    fn load_module(
        &self,
        name: &str,
        args: &str,
        on_index: IndexCallback,
        done: CompletionCallback,
    ) -> Result<(), NativeError>;

    fn stream_restore_test(
        &self,
        on_version: IndexCallback,
        done: CompletionCallback,
    ) -> Result<(), NativeError>;

    /// Enable server notifications for the given facility mask.
    fn set_event_mask(&self, mask: u32, done: CompletionCallback) -> Result<(), NativeError>;

    fn open_record_stream(
        &self,
        spec: RecordStreamSpec,
        on_data: ReadCallback,
    ) -> Result<Box<dyn RecordStream>, NativeError>;
}

/// Factory for native connection handles, used on every (re)connect.
pub trait NativeBackend: Send + Sync {
    fn create_context(&self, api: Arc<dyn MainloopApi>, client_name: &str)
        -> Box<dyn NativeContext>;
}
