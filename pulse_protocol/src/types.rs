use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Index value the server uses to signal "no such object".
pub const INVALID_INDEX: u32 = u32::MAX;

/// Per-channel volume in the 0.0..=1.0 range (1.0 = 100%, values above are
/// software boost).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelVolume {
    pub values: Vec<f32>,
}

impl ChannelVolume {
    /// Same level on every channel.
    pub fn flat(channels: usize, level: f32) -> Self {
        Self {
            values: vec![level.max(0.0); channels],
        }
    }

    /// Mean level across channels.
    pub fn value_flat(&self) -> f32 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f32>() / self.values.len() as f32
    }

    /// Set every channel to the given level.
    pub fn set_all(&mut self, level: f32) {
        for v in &mut self.values {
            *v = level.max(0.0);
        }
    }

    /// Shift every channel by `delta`, clamping at zero.
    pub fn change_all(&mut self, delta: f32) {
        for v in &mut self.values {
            *v = (*v + delta).max(0.0);
        }
    }

    pub fn channels(&self) -> usize {
        self.values.len()
    }
}

/// What happened to the entity a notification refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum EventType {
    New,
    Change,
    Remove,
}

/// Which entity table a notification refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum EventFacility {
    Sink,
    Source,
    SinkInput,
    SourceOutput,
    Module,
    Client,
    SampleCache,
    Server,
    Card,
}

impl EventFacility {
    /// Subscription mask bit for this facility.
    pub fn bit(self) -> u32 {
        match self {
            EventFacility::Sink => 0x0001,
            EventFacility::Source => 0x0002,
            EventFacility::SinkInput => 0x0004,
            EventFacility::SourceOutput => 0x0008,
            EventFacility::Module => 0x0010,
            EventFacility::Client => 0x0020,
            EventFacility::SampleCache => 0x0040,
            EventFacility::Server => 0x0080,
            EventFacility::Card => 0x0200,
        }
    }
}

/// Event category selector, as accepted by the subscription call.
///
/// Parses from the lowercase category name, e.g. `"sink_input".parse()`.
/// `All` and `Null` are the "everything" and "disable" shorthands.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
pub enum EventMask {
    Null,
    Sink,
    Source,
    SinkInput,
    SourceOutput,
    Module,
    Client,
    SampleCache,
    Server,
    Card,
    All,
}

impl EventMask {
    pub fn bits(self) -> u32 {
        match self {
            EventMask::Null => 0x0000,
            EventMask::Sink => 0x0001,
            EventMask::Source => 0x0002,
            EventMask::SinkInput => 0x0004,
            EventMask::SourceOutput => 0x0008,
            EventMask::Module => 0x0010,
            EventMask::Client => 0x0020,
            EventMask::SampleCache => 0x0040,
            EventMask::Server => 0x0080,
            EventMask::Card => 0x0200,
            EventMask::All => 0x02ff,
        }
    }

    /// Combined bits for a set of selectors.
    pub fn combine(masks: &[EventMask]) -> u32 {
        masks.iter().fold(0, |acc, m| acc | m.bits())
    }
}

/// A server-pushed change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: EventType,
    pub facility: EventFacility,
    pub index: u32,
}

/// Entity tag used to dispatch mutations at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum EntityKind {
    Sink,
    Source,
    SinkInput,
    SourceOutput,
    Card,
    Client,
    Module,
}

/// Update mode for stream-restore database writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum UpdateMode {
    /// Merge with the existing entry of the same name.
    Merge,
    /// Replace the existing entry of the same name.
    Replace,
    /// Replace the entire table.
    Set,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkInfo {
    pub index: u32,
    pub name: String,
    pub description: String,
    pub mute: bool,
    pub volume: ChannelVolume,
    pub monitor_source: u32,
    pub monitor_source_name: String,
    pub ports: Vec<String>,
    pub active_port: Option<String>,
    pub suspended: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub index: u32,
    pub name: String,
    pub description: String,
    pub mute: bool,
    pub volume: ChannelVolume,
    /// Set when this source is the monitor of a sink.
    pub monitor_of_sink: Option<u32>,
    pub ports: Vec<String>,
    pub active_port: Option<String>,
    pub suspended: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkInputInfo {
    pub index: u32,
    pub name: String,
    pub sink: u32,
    pub client: Option<u32>,
    pub mute: bool,
    pub volume: ChannelVolume,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceOutputInfo {
    pub index: u32,
    pub name: String,
    pub source: u32,
    pub client: Option<u32>,
    pub mute: bool,
    pub volume: ChannelVolume,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardInfo {
    pub index: u32,
    pub name: String,
    pub profiles: Vec<String>,
    pub active_profile: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub index: u32,
    pub name: String,
    pub driver: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub index: u32,
    pub name: String,
    pub argument: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub server_name: String,
    pub server_version: String,
    pub default_sink_name: String,
    pub default_source_name: String,
    pub sample_rate: u32,
}

/// One stream-restore database record, passed through unmodified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRestoreInfo {
    pub name: String,
    pub device: Option<String>,
    pub mute: bool,
    pub volume: ChannelVolume,
}

/// Tagged union of every query result kind.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityInfo {
    Sink(SinkInfo),
    Source(SourceInfo),
    SinkInput(SinkInputInfo),
    SourceOutput(SourceOutputInfo),
    Card(CardInfo),
    Client(ClientInfo),
    Module(ModuleInfo),
    Server(ServerInfo),
    StreamRestore(StreamRestoreInfo),
}

macro_rules! entity_accessor {
    ($fn_name:ident, $variant:ident, $ty:ty) => {
        pub fn $fn_name(self) -> Option<$ty> {
            match self {
                EntityInfo::$variant(info) => Some(info),
                _ => None,
            }
        }
    };
}

impl EntityInfo {
    entity_accessor!(into_sink, Sink, SinkInfo);
    entity_accessor!(into_source, Source, SourceInfo);
    entity_accessor!(into_sink_input, SinkInput, SinkInputInfo);
    entity_accessor!(into_source_output, SourceOutput, SourceOutputInfo);
    entity_accessor!(into_card, Card, CardInfo);
    entity_accessor!(into_client, Client, ClientInfo);
    entity_accessor!(into_module, Module, ModuleInfo);
    entity_accessor!(into_server, Server, ServerInfo);
    entity_accessor!(into_stream_restore, StreamRestore, StreamRestoreInfo);
}
