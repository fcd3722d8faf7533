//! In-memory implementation of the native contract, for tests and
//! development without a running sound server.
//!
//! Every callback is delivered from a worker thread and re-enters the
//! client's loop through [`MainloopApi::post`], so the foreign-thread
//! marshalling path is exercised exactly like it would be by a real
//! dispatch thread.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{mpsc, Arc, Mutex, Weak};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::api::{
    CompletionCallback, ConnectFlags, ContextState, EventCallback, IndexCallback, InfoCallback,
    MainloopApi, Mutation, NativeBackend, NativeContext, NativeError, Query, ReadCallback,
    RecordStream, RecordStreamSpec, StateCallback,
};
use crate::types::{
    CardInfo, ChannelVolume, ClientInfo, EntityInfo, EventFacility, EventType, ModuleInfo,
    Notification, ServerInfo, SinkInfo, SinkInputInfo, SourceInfo, SourceOutputInfo,
    StreamRestoreInfo, UpdateMode, INVALID_INDEX,
};

type Job = Box<dyn FnOnce() + Send>;

/// Mock audio server with a small set of seeded entities.
///
/// Clone-cheap handle; all contexts created through [`MockServer::backend`]
/// share the same entity tables.
#[derive(Clone)]
pub struct MockServer {
    state: Arc<Mutex<ServerState>>,
}

struct ServerState {
    reachable: bool,
    response_delay: Duration,
    sinks: Vec<SinkInfo>,
    sources: Vec<SourceInfo>,
    sink_inputs: Vec<SinkInputInfo>,
    source_outputs: Vec<SourceOutputInfo>,
    cards: Vec<CardInfo>,
    clients: Vec<ClientInfo>,
    modules: Vec<ModuleInfo>,
    server: ServerInfo,
    restore_db: BTreeMap<String, StreamRestoreInfo>,
    source_levels: HashMap<String, f32>,
    stream_levels: HashMap<u32, f32>,
    next_index: u32,
    contexts: Vec<Weak<CtxShared>>,
    live_record_streams: usize,
}

impl ServerState {
    fn seeded() -> Self {
        let sinks = vec![
            SinkInfo {
                index: 1,
                name: "alpha".into(),
                description: "Alpha analog output".into(),
                mute: false,
                volume: ChannelVolume::flat(2, 0.75),
                monitor_source: 101,
                monitor_source_name: "alpha.monitor".into(),
                ports: vec!["analog-output".into(), "headphones".into()],
                active_port: Some("analog-output".into()),
                suspended: false,
            },
            SinkInfo {
                index: 2,
                name: "beta".into(),
                description: "Beta HDMI output".into(),
                mute: false,
                volume: ChannelVolume::flat(2, 1.0),
                monitor_source: 102,
                monitor_source_name: "beta.monitor".into(),
                ports: vec!["hdmi-output".into()],
                active_port: Some("hdmi-output".into()),
                suspended: false,
            },
        ];
        let sources = vec![
            SourceInfo {
                index: 100,
                name: "mic".into(),
                description: "Internal microphone".into(),
                mute: false,
                volume: ChannelVolume::flat(1, 0.6),
                monitor_of_sink: None,
                ports: vec!["analog-input".into()],
                active_port: Some("analog-input".into()),
                suspended: false,
            },
            SourceInfo {
                index: 101,
                name: "alpha.monitor".into(),
                description: "Monitor of Alpha".into(),
                mute: false,
                volume: ChannelVolume::flat(2, 1.0),
                monitor_of_sink: Some(1),
                ports: vec![],
                active_port: None,
                suspended: false,
            },
            SourceInfo {
                index: 102,
                name: "beta.monitor".into(),
                description: "Monitor of Beta".into(),
                mute: false,
                volume: ChannelVolume::flat(2, 1.0),
                monitor_of_sink: Some(2),
                ports: vec![],
                active_port: None,
                suspended: false,
            },
        ];
        Self {
            reachable: true,
            response_delay: Duration::ZERO,
            sinks,
            sources,
            sink_inputs: vec![SinkInputInfo {
                index: 40,
                name: "music player".into(),
                sink: 1,
                client: Some(20),
                mute: false,
                volume: ChannelVolume::flat(2, 0.9),
            }],
            source_outputs: vec![SourceOutputInfo {
                index: 50,
                name: "recorder".into(),
                source: 100,
                client: Some(20),
                mute: false,
                volume: ChannelVolume::flat(1, 1.0),
            }],
            cards: vec![CardInfo {
                index: 10,
                name: "card0".into(),
                profiles: vec!["analog-stereo".into(), "off".into()],
                active_profile: Some("analog-stereo".into()),
            }],
            clients: vec![ClientInfo {
                index: 20,
                name: "mixer".into(),
                driver: Some("protocol-native".into()),
            }],
            modules: vec![ModuleInfo {
                index: 30,
                name: "module-stream-restore".into(),
                argument: String::new(),
            }],
            server: ServerInfo {
                server_name: "mock audio server".into(),
                server_version: "16.0".into(),
                default_sink_name: "alpha".into(),
                default_source_name: "mic".into(),
                sample_rate: 44100,
            },
            restore_db: BTreeMap::new(),
            source_levels: HashMap::new(),
            stream_levels: HashMap::new(),
            next_index: 1000,
            contexts: Vec::new(),
            live_record_streams: 0,
        }
    }

    fn apply_restore_write(
        &mut self,
        entries: &[StreamRestoreInfo],
        mode: UpdateMode,
    ) {
        if mode == UpdateMode::Set {
            self.restore_db.clear();
        }
        for entry in entries {
            // Merge and Replace both upsert the named entry; the difference
            // is a server-side detail for partial records.
            self.restore_db.insert(entry.name.clone(), entry.clone());
        }
    }
}

impl MockServer {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ServerState::seeded())),
        }
    }

    /// Backend handle to pass to the client under test.
    pub fn backend(&self) -> Arc<dyn NativeBackend> {
        Arc::new(MockBackend {
            state: Arc::clone(&self.state),
        })
    }

    /// Whether new connections succeed.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().unwrap().reachable = reachable;
    }

    /// Delay applied to every queued delivery (states, items, completions).
    pub fn set_response_delay(&self, delay: Duration) {
        self.state.lock().unwrap().response_delay = delay;
    }

    /// Constant level reported by the monitoring stream of a source.
    pub fn set_source_level(&self, source: &str, level: f32) {
        self.state
            .lock()
            .unwrap()
            .source_levels
            .insert(source.to_string(), level);
    }

    /// Constant level reported when monitoring a single upstream stream.
    pub fn set_stream_level(&self, stream_index: u32, level: f32) {
        self.state
            .lock()
            .unwrap()
            .stream_levels
            .insert(stream_index, level);
    }

    /// Fail every live connection immediately, as if the server died.
    pub fn drop_connections(&self) {
        let contexts: Vec<Arc<CtxShared>> = {
            let mut st = self.state.lock().unwrap();
            st.reachable = false;
            st.contexts.retain(|w| w.upgrade().is_some());
            st.contexts.iter().filter_map(Weak::upgrade).collect()
        };
        info!("mock: dropping {} connection(s)", contexts.len());
        for ctx in contexts {
            ctx.fail_now();
        }
    }

    /// Combined subscription mask over all live contexts.
    pub fn subscribed_mask(&self) -> u32 {
        let st = self.state.lock().unwrap();
        st.contexts
            .iter()
            .filter_map(Weak::upgrade)
            .fold(0, |acc, ctx| acc | ctx.mask.load(Ordering::SeqCst))
    }

    /// Number of record streams that have been opened and not yet torn down.
    pub fn live_record_streams(&self) -> usize {
        self.state.lock().unwrap().live_record_streams
    }

    /// Current sink state, for assertions.
    pub fn sink_by_name(&self, name: &str) -> Option<SinkInfo> {
        let st = self.state.lock().unwrap();
        st.sinks.iter().find(|s| s.name == name).cloned()
    }

    /// Current stream-restore table, for assertions.
    pub fn restore_entries(&self) -> Vec<StreamRestoreInfo> {
        let st = self.state.lock().unwrap();
        st.restore_db.values().cloned().collect()
    }
}

impl Default for MockServer {
    fn default() -> Self {
        Self::new()
    }
}

struct MockBackend {
    state: Arc<Mutex<ServerState>>,
}

impl NativeBackend for MockBackend {
    fn create_context(
        &self,
        api: Arc<dyn MainloopApi>,
        client_name: &str,
    ) -> Box<dyn NativeContext> {
        let (tx, rx) = mpsc::channel::<(Duration, Job)>();
        let shared = Arc::new(CtxShared {
            api: Arc::clone(&api),
            server: Arc::clone(&self.state),
            last_state: Mutex::new(ContextState::Unconnected),
            state_cb: Mutex::new(None),
            event_cb: Mutex::new(None),
            mask: AtomicU32::new(0),
            jobs: Mutex::new(Some(tx)),
        });
        // One ordered delivery worker per context; jobs hop back onto the
        // client loop through post().
        thread::spawn(move || {
            while let Ok((delay, job)) = rx.recv() {
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                api.post(job);
            }
        });
        debug!("mock: context created for '{client_name}'");
        self.state
            .lock()
            .unwrap()
            .contexts
            .push(Arc::downgrade(&shared));
        Box::new(MockContext { shared })
    }
}

struct CtxShared {
    api: Arc<dyn MainloopApi>,
    server: Arc<Mutex<ServerState>>,
    /// Last state handed to the delivery queue (not necessarily observed by
    /// the client yet).
    last_state: Mutex<ContextState>,
    state_cb: Mutex<Option<Arc<StateCallback>>>,
    event_cb: Mutex<Option<Arc<EventCallback>>>,
    mask: AtomicU32,
    jobs: Mutex<Option<mpsc::Sender<(Duration, Job)>>>,
}

impl CtxShared {
    fn deliver(&self, job: Job) {
        let delay = self.server.lock().unwrap().response_delay;
        if let Some(tx) = self.jobs.lock().unwrap().as_ref() {
            let _ = tx.send((delay, job));
        }
    }

    fn push_state(self: &Arc<Self>, state: ContextState) {
        *self.last_state.lock().unwrap() = state;
        let this = Arc::clone(self);
        self.deliver(Box::new(move || {
            if let Some(cb) = this.state_cb.lock().unwrap().clone() {
                (*cb)(state);
            }
        }));
    }

    /// Failure path that bypasses the ordered queue and any response delay.
    fn fail_now(self: &Arc<Self>) {
        *self.last_state.lock().unwrap() = ContextState::Failed;
        let this = Arc::clone(self);
        let api = Arc::clone(&self.api);
        thread::spawn(move || {
            api.post(Box::new(move || {
                if let Some(cb) = this.state_cb.lock().unwrap().clone() {
                    (*cb)(ContextState::Failed);
                }
            }));
        });
    }

    fn is_ready(&self) -> bool {
        *self.last_state.lock().unwrap() == ContextState::Ready
    }

    fn emit(self: &Arc<Self>, facility: EventFacility, kind: EventType, index: u32) {
        if self.mask.load(Ordering::SeqCst) & facility.bit() == 0 {
            return;
        }
        let this = Arc::clone(self);
        self.deliver(Box::new(move || {
            if let Some(cb) = this.event_cb.lock().unwrap().clone() {
                (*cb)(Notification {
                    kind,
                    facility,
                    index,
                });
            }
        }));
    }
}

pub struct MockContext {
    shared: Arc<CtxShared>,
}

impl NativeContext for MockContext {
    fn set_state_callback(&self, cb: StateCallback) {
        *self.shared.state_cb.lock().unwrap() = Some(Arc::new(cb));
    }

    fn set_event_callback(&self, cb: EventCallback) {
        *self.shared.event_cb.lock().unwrap() = Some(Arc::new(cb));
    }

    fn connect(&self, _server: Option<&str>, flags: ConnectFlags) -> Result<(), NativeError> {
        let reachable = {
            let mut st = self.shared.server.lock().unwrap();
            if !st.reachable && flags.autospawn {
                info!("mock: autospawning server for connect");
                st.reachable = true;
            }
            st.reachable
        };
        self.shared.push_state(ContextState::Connecting);
        if reachable {
            self.shared.push_state(ContextState::Authorizing);
            self.shared.push_state(ContextState::SettingName);
            self.shared.push_state(ContextState::Ready);
        } else if flags.wait_for_server {
            // Stay in Connecting until the server appears or the client
            // gives up.
            debug!("mock: no server, holding connection attempt open");
        } else {
            self.shared.push_state(ContextState::Failed);
        }
        Ok(())
    }

    fn disconnect(&self) {
        let last = *self.shared.last_state.lock().unwrap();
        if matches!(last, ContextState::Failed | ContextState::Terminated) {
            return;
        }
        self.shared.push_state(ContextState::Terminated);
    }

    fn query(
        &self,
        query: Query,
        mut on_item: InfoCallback,
        done: CompletionCallback,
    ) -> Result<(), NativeError> {
        if !self.shared.is_ready() {
            return Err(NativeError::NotConnected);
        }
        let items: Vec<EntityInfo> = {
            let st = self.shared.server.lock().unwrap();
            match &query {
                Query::SinkList => st.sinks.iter().cloned().map(EntityInfo::Sink).collect(),
                Query::SinkByIndex(i) => st
                    .sinks
                    .iter()
                    .filter(|s| s.index == *i)
                    .cloned()
                    .map(EntityInfo::Sink)
                    .collect(),
                Query::SinkByName(n) => st
                    .sinks
                    .iter()
                    .filter(|s| &s.name == n)
                    .cloned()
                    .map(EntityInfo::Sink)
                    .collect(),
                Query::SourceList => st.sources.iter().cloned().map(EntityInfo::Source).collect(),
                Query::SourceByIndex(i) => st
                    .sources
                    .iter()
                    .filter(|s| s.index == *i)
                    .cloned()
                    .map(EntityInfo::Source)
                    .collect(),
                Query::SourceByName(n) => st
                    .sources
                    .iter()
                    .filter(|s| &s.name == n)
                    .cloned()
                    .map(EntityInfo::Source)
                    .collect(),
                Query::SinkInputList => st
                    .sink_inputs
                    .iter()
                    .cloned()
                    .map(EntityInfo::SinkInput)
                    .collect(),
                Query::SinkInputByIndex(i) => st
                    .sink_inputs
                    .iter()
                    .filter(|s| s.index == *i)
                    .cloned()
                    .map(EntityInfo::SinkInput)
                    .collect(),
                Query::SourceOutputList => st
                    .source_outputs
                    .iter()
                    .cloned()
                    .map(EntityInfo::SourceOutput)
                    .collect(),
                Query::SourceOutputByIndex(i) => st
                    .source_outputs
                    .iter()
                    .filter(|s| s.index == *i)
                    .cloned()
                    .map(EntityInfo::SourceOutput)
                    .collect(),
                Query::CardList => st.cards.iter().cloned().map(EntityInfo::Card).collect(),
                Query::CardByIndex(i) => st
                    .cards
                    .iter()
                    .filter(|c| c.index == *i)
                    .cloned()
                    .map(EntityInfo::Card)
                    .collect(),
                Query::CardByName(n) => st
                    .cards
                    .iter()
                    .filter(|c| &c.name == n)
                    .cloned()
                    .map(EntityInfo::Card)
                    .collect(),
                Query::ClientList => st.clients.iter().cloned().map(EntityInfo::Client).collect(),
                Query::ClientByIndex(i) => st
                    .clients
                    .iter()
                    .filter(|c| c.index == *i)
                    .cloned()
                    .map(EntityInfo::Client)
                    .collect(),
                Query::ModuleList => st.modules.iter().cloned().map(EntityInfo::Module).collect(),
                Query::ModuleByIndex(i) => st
                    .modules
                    .iter()
                    .filter(|m| m.index == *i)
                    .cloned()
                    .map(EntityInfo::Module)
                    .collect(),
                Query::ServerInfo => vec![EntityInfo::Server(st.server.clone())],
                Query::StreamRestoreList => st
                    .restore_db
                    .values()
                    .cloned()
                    .map(EntityInfo::StreamRestore)
                    .collect(),
            }
        };
        self.shared.deliver(Box::new(move || {
            for item in items {
                on_item(item);
            }
            done(true);
        }));
        Ok(())
    }

    fn mutate(&self, mutation: Mutation, done: CompletionCallback) -> Result<(), NativeError> {
        if !self.shared.is_ready() {
            return Err(NativeError::NotConnected);
        }
        let mut event = None;
        let ok = {
            let mut st = self.shared.server.lock().unwrap();
            apply_mutation(&mut st, &mutation, &mut event)
        };
        if !ok {
            warn!("mock: rejected mutation {mutation:?}");
        }
        if let Some((facility, kind, index)) = event {
            self.shared.emit(facility, kind, index);
        }
        self.shared.deliver(Box::new(move || done(ok)));
        Ok(())
    }

    fn load_module(
        &self,
        name: &str,
        args: &str,
        on_index: IndexCallback,
        done: CompletionCallback,
    ) -> Result<(), NativeError> {
        if !self.shared.is_ready() {
            return Err(NativeError::NotConnected);
        }
        let index = {
            let mut st = self.shared.server.lock().unwrap();
            if name.starts_with("module-") {
                st.next_index += 1;
                let index = st.next_index;
                st.modules.push(ModuleInfo {
                    index,
                    name: name.to_string(),
                    argument: args.to_string(),
                });
                index
            } else {
                INVALID_INDEX
            }
        };
        if index != INVALID_INDEX {
            self.shared.emit(EventFacility::Module, EventType::New, index);
        }
        self.shared.deliver(Box::new(move || {
            on_index(index);
            done(true);
        }));
        Ok(())
    }

    fn stream_restore_test(
        &self,
        on_version: IndexCallback,
        done: CompletionCallback,
    ) -> Result<(), NativeError> {
        if !self.shared.is_ready() {
            return Err(NativeError::NotConnected);
        }
        self.shared.deliver(Box::new(move || {
            on_version(1);
            done(true);
        }));
        Ok(())
    }

    fn set_event_mask(&self, mask: u32, done: CompletionCallback) -> Result<(), NativeError> {
        if !self.shared.is_ready() {
            return Err(NativeError::NotConnected);
        }
        self.shared.mask.store(mask, Ordering::SeqCst);
        debug!("mock: subscription mask set to {mask:#x}");
        self.shared.deliver(Box::new(move || done(true)));
        Ok(())
    }

    fn open_record_stream(
        &self,
        spec: RecordStreamSpec,
        on_data: ReadCallback,
    ) -> Result<Box<dyn RecordStream>, NativeError> {
        if !self.shared.is_ready() {
            return Err(NativeError::NotConnected);
        }
        if spec.rate == 0 {
            return Err(NativeError::InvalidArgument("rate must be positive".into()));
        }
        let source = {
            let mut st = self.shared.server.lock().unwrap();
            st.live_record_streams += 1;
            spec.source
                .clone()
                .unwrap_or_else(|| st.server.default_source_name.clone())
        };
        info!(
            "mock: record stream opened on '{source}' at {} Hz{}",
            spec.rate,
            spec.monitor_of
                .map(|i| format!(", monitoring stream #{i}"))
                .unwrap_or_default()
        );
        let stop = Arc::new(AtomicBool::new(false));
        let api = Arc::clone(&self.shared.api);
        let server = Arc::clone(&self.shared.server);
        let on_data = Arc::new(Mutex::new(on_data));
        let period = Duration::from_secs_f64(1.0 / f64::from(spec.rate));
        let monitor_of = spec.monitor_of;
        let thread_stop = Arc::clone(&stop);
        thread::spawn(move || {
            // A short first buffer stands in for the "hole" markers a real
            // stream delivers around gaps.
            let gap = Arc::clone(&on_data);
            api.post(Box::new(move || (*gap.lock().unwrap())(&[0u8; 2])));
            loop {
                if thread_stop.load(Ordering::SeqCst) {
                    break;
                }
                let level = {
                    let st = server.lock().unwrap();
                    match monitor_of {
                        Some(idx) => st.stream_levels.get(&idx).copied(),
                        None => st.source_levels.get(&source).copied(),
                    }
                };
                if let Some(level) = level {
                    let cb = Arc::clone(&on_data);
                    api.post(Box::new(move || {
                        (*cb.lock().unwrap())(&level.to_ne_bytes())
                    }));
                }
                thread::sleep(period);
            }
            debug!("mock: record stream worker stopped");
        });
        Ok(Box::new(MockRecordStream {
            stop,
            server: Arc::clone(&self.shared.server),
            torn_down: AtomicBool::new(false),
        }))
    }
}

struct MockRecordStream {
    stop: Arc<AtomicBool>,
    server: Arc<Mutex<ServerState>>,
    torn_down: AtomicBool,
}

impl RecordStream for MockRecordStream {
    fn disconnect(&self) -> Result<(), NativeError> {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return Err(NativeError::StreamGone);
        }
        self.stop.store(true, Ordering::SeqCst);
        self.server.lock().unwrap().live_record_streams -= 1;
        Ok(())
    }
}

fn apply_mutation(
    st: &mut ServerState,
    mutation: &Mutation,
    event: &mut Option<(EventFacility, EventType, u32)>,
) -> bool {
    match mutation {
        Mutation::SinkMute { index, mute } => {
            match st.sinks.iter_mut().find(|s| s.index == *index) {
                Some(sink) => {
                    sink.mute = *mute;
                    *event = Some((EventFacility::Sink, EventType::Change, *index));
                    true
                }
                None => false,
            }
        }
        Mutation::SourceMute { index, mute } => {
            match st.sources.iter_mut().find(|s| s.index == *index) {
                Some(source) => {
                    source.mute = *mute;
                    *event = Some((EventFacility::Source, EventType::Change, *index));
                    true
                }
                None => false,
            }
        }
        Mutation::SinkInputMute { index, mute } => {
            match st.sink_inputs.iter_mut().find(|s| s.index == *index) {
                Some(input) => {
                    input.mute = *mute;
                    *event = Some((EventFacility::SinkInput, EventType::Change, *index));
                    true
                }
                None => false,
            }
        }
        Mutation::SourceOutputMute { index, mute } => {
            match st.source_outputs.iter_mut().find(|s| s.index == *index) {
                Some(output) => {
                    output.mute = *mute;
                    *event = Some((EventFacility::SourceOutput, EventType::Change, *index));
                    true
                }
                None => false,
            }
        }
        Mutation::SinkVolume { index, volume } => {
            match st.sinks.iter_mut().find(|s| s.index == *index) {
                Some(sink) => {
                    sink.volume = volume.clone();
                    *event = Some((EventFacility::Sink, EventType::Change, *index));
                    true
                }
                None => false,
            }
        }
        Mutation::SourceVolume { index, volume } => {
            match st.sources.iter_mut().find(|s| s.index == *index) {
                Some(source) => {
                    source.volume = volume.clone();
                    *event = Some((EventFacility::Source, EventType::Change, *index));
                    true
                }
                None => false,
            }
        }
        Mutation::SinkInputVolume { index, volume } => {
            match st.sink_inputs.iter_mut().find(|s| s.index == *index) {
                Some(input) => {
                    input.volume = volume.clone();
                    *event = Some((EventFacility::SinkInput, EventType::Change, *index));
                    true
                }
                None => false,
            }
        }
        Mutation::SourceOutputVolume { index, volume } => {
            match st.source_outputs.iter_mut().find(|s| s.index == *index) {
                Some(output) => {
                    output.volume = volume.clone();
                    *event = Some((EventFacility::SourceOutput, EventType::Change, *index));
                    true
                }
                None => false,
            }
        }
        Mutation::SinkSuspend { index, suspend } => {
            match st.sinks.iter_mut().find(|s| s.index == *index) {
                Some(sink) => {
                    sink.suspended = *suspend;
                    *event = Some((EventFacility::Sink, EventType::Change, *index));
                    true
                }
                None => false,
            }
        }
        Mutation::SourceSuspend { index, suspend } => {
            match st.sources.iter_mut().find(|s| s.index == *index) {
                Some(source) => {
                    source.suspended = *suspend;
                    *event = Some((EventFacility::Source, EventType::Change, *index));
                    true
                }
                None => false,
            }
        }
        Mutation::SinkPort { index, port } => {
            match st.sinks.iter_mut().find(|s| s.index == *index) {
                Some(sink) if sink.ports.contains(port) => {
                    sink.active_port = Some(port.clone());
                    *event = Some((EventFacility::Sink, EventType::Change, *index));
                    true
                }
                _ => false,
            }
        }
        Mutation::SourcePort { index, port } => {
            match st.sources.iter_mut().find(|s| s.index == *index) {
                Some(source) if source.ports.contains(port) => {
                    source.active_port = Some(port.clone());
                    *event = Some((EventFacility::Source, EventType::Change, *index));
                    true
                }
                _ => false,
            }
        }
        Mutation::MoveSinkInput { index, sink } => {
            let sink_exists = st.sinks.iter().any(|s| s.index == *sink);
            match st.sink_inputs.iter_mut().find(|s| s.index == *index) {
                Some(input) if sink_exists => {
                    input.sink = *sink;
                    *event = Some((EventFacility::SinkInput, EventType::Change, *index));
                    true
                }
                _ => false,
            }
        }
        Mutation::MoveSourceOutput { index, source } => {
            let source_exists = st.sources.iter().any(|s| s.index == *source);
            match st.source_outputs.iter_mut().find(|s| s.index == *index) {
                Some(output) if source_exists => {
                    output.source = *source;
                    *event = Some((EventFacility::SourceOutput, EventType::Change, *index));
                    true
                }
                _ => false,
            }
        }
        Mutation::DefaultSink { name } => {
            if st.sinks.iter().any(|s| &s.name == name) {
                st.server.default_sink_name = name.clone();
                *event = Some((EventFacility::Server, EventType::Change, INVALID_INDEX));
                true
            } else {
                false
            }
        }
        Mutation::DefaultSource { name } => {
            if st.sources.iter().any(|s| &s.name == name) {
                st.server.default_source_name = name.clone();
                *event = Some((EventFacility::Server, EventType::Change, INVALID_INDEX));
                true
            } else {
                false
            }
        }
        Mutation::CardProfile { index, profile } => {
            match st.cards.iter_mut().find(|c| c.index == *index) {
                Some(card) if card.profiles.contains(profile) => {
                    card.active_profile = Some(profile.clone());
                    *event = Some((EventFacility::Card, EventType::Change, *index));
                    true
                }
                _ => false,
            }
        }
        Mutation::PlaySample { name, .. } => !name.is_empty(),
        Mutation::UnloadModule { index } => {
            let before = st.modules.len();
            st.modules.retain(|m| m.index != *index);
            if st.modules.len() < before {
                *event = Some((EventFacility::Module, EventType::Remove, *index));
                true
            } else {
                false
            }
        }
        Mutation::StreamRestoreWrite { entries, mode, .. } => {
            st.apply_restore_write(entries, *mode);
            true
        }
        Mutation::StreamRestoreDelete { names } => {
            for name in names {
                st.restore_db.remove(name);
            }
            true
        }
    }
}
