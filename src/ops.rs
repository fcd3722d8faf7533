//! Query, mutation, module and stream-restore operations.
//!
//! Each method submits one native call through the pending-operation bridge
//! and awaits the completion raced against the disconnection signal.
//! Mutations are dispatched on an explicit [`EntityKind`] tag; passing a
//! kind an operation does not support is a usage error resolved at the call
//! site.

use std::sync::{Arc, Mutex};

use log::debug;
use pulse_protocol::{
    CardInfo, ChannelVolume, ClientInfo, CompletionCallback, EntityInfo, EntityKind, ModuleInfo,
    Mutation, NativeContext, NativeError, Query, ServerInfo, SinkInfo, SinkInputInfo, SourceInfo,
    SourceOutputInfo, StreamRestoreInfo, UpdateMode, INVALID_INDEX,
};

use crate::client::PulseClient;
use crate::error::{PulseError, Result};

fn unexpected_kind<T>(_info: EntityInfo) -> Result<T> {
    Err(PulseError::OperationInvalid(
        "server returned an unexpected entity kind".into(),
    ))
}

impl PulseClient {
    /// Submit one native call and await its completion.
    pub(crate) async fn operation<F>(&self, submit: F) -> Result<()>
    where
        F: FnOnce(&dyn NativeContext, CompletionCallback) -> std::result::Result<(), NativeError>,
    {
        if self.shared.phase().is_down() {
            return Err(PulseError::Disconnected);
        }
        let (rx, guard, cb) = self.shared.pending.begin();
        let submitted = self.shared.with_context(|ctx| submit(ctx, cb))?;
        if let Err(e) = submitted {
            drop(guard);
            return Err(e.into());
        }
        let settled = self.race_disconnect(rx).await;
        drop(guard);
        match settled {
            Ok(Ok(result)) => result,
            // The sender vanished without settling; only teardown does that.
            Ok(Err(_)) => Err(PulseError::Disconnected),
            Err(e) => Err(e),
        }
    }

    async fn query_collect(&self, query: Query) -> Result<Vec<EntityInfo>> {
        let items = Arc::new(Mutex::new(Vec::new()));
        let collector = {
            let items = Arc::clone(&items);
            Box::new(move |info: EntityInfo| items.lock().unwrap().push(info))
        };
        let label = query.to_string();
        self.operation(move |ctx, done| ctx.query(query, collector, done))
            .await?;
        let collected = std::mem::take(&mut *items.lock().unwrap());
        debug!("{label} returned {} item(s)", collected.len());
        Ok(collected)
    }

    async fn query_one(&self, query: Query) -> Result<EntityInfo> {
        let selector = query.to_string();
        let mut items = self.query_collect(query).await?;
        match items.len() {
            0 => Err(PulseError::IndexNotFound(selector)),
            1 => Ok(items.remove(0)),
            n => Err(PulseError::OperationInvalid(format!(
                "{selector} matched {n} entities"
            ))),
        }
    }

    pub async fn sink_list(&self) -> Result<Vec<SinkInfo>> {
        Ok(self
            .query_collect(Query::SinkList)
            .await?
            .into_iter()
            .filter_map(EntityInfo::into_sink)
            .collect())
    }

    pub async fn sink_info(&self, index: u32) -> Result<SinkInfo> {
        match self.query_one(Query::SinkByIndex(index)).await? {
            EntityInfo::Sink(info) => Ok(info),
            other => unexpected_kind(other),
        }
    }

    pub async fn get_sink_by_name(&self, name: &str) -> Result<SinkInfo> {
        match self.query_one(Query::SinkByName(name.to_string())).await? {
            EntityInfo::Sink(info) => Ok(info),
            other => unexpected_kind(other),
        }
    }

    pub async fn source_list(&self) -> Result<Vec<SourceInfo>> {
        Ok(self
            .query_collect(Query::SourceList)
            .await?
            .into_iter()
            .filter_map(EntityInfo::into_source)
            .collect())
    }

    pub async fn source_info(&self, index: u32) -> Result<SourceInfo> {
        match self.query_one(Query::SourceByIndex(index)).await? {
            EntityInfo::Source(info) => Ok(info),
            other => unexpected_kind(other),
        }
    }

    pub async fn get_source_by_name(&self, name: &str) -> Result<SourceInfo> {
        match self.query_one(Query::SourceByName(name.to_string())).await? {
            EntityInfo::Source(info) => Ok(info),
            other => unexpected_kind(other),
        }
    }

    pub async fn sink_input_list(&self) -> Result<Vec<SinkInputInfo>> {
        Ok(self
            .query_collect(Query::SinkInputList)
            .await?
            .into_iter()
            .filter_map(EntityInfo::into_sink_input)
            .collect())
    }

    pub async fn sink_input_info(&self, index: u32) -> Result<SinkInputInfo> {
        match self.query_one(Query::SinkInputByIndex(index)).await? {
            EntityInfo::SinkInput(info) => Ok(info),
            other => unexpected_kind(other),
        }
    }

    pub async fn source_output_list(&self) -> Result<Vec<SourceOutputInfo>> {
        Ok(self
            .query_collect(Query::SourceOutputList)
            .await?
            .into_iter()
            .filter_map(EntityInfo::into_source_output)
            .collect())
    }

    pub async fn source_output_info(&self, index: u32) -> Result<SourceOutputInfo> {
        match self.query_one(Query::SourceOutputByIndex(index)).await? {
            EntityInfo::SourceOutput(info) => Ok(info),
            other => unexpected_kind(other),
        }
    }

    pub async fn card_list(&self) -> Result<Vec<CardInfo>> {
        Ok(self
            .query_collect(Query::CardList)
            .await?
            .into_iter()
            .filter_map(EntityInfo::into_card)
            .collect())
    }

    pub async fn card_info(&self, index: u32) -> Result<CardInfo> {
        match self.query_one(Query::CardByIndex(index)).await? {
            EntityInfo::Card(info) => Ok(info),
            other => unexpected_kind(other),
        }
    }

    pub async fn get_card_by_name(&self, name: &str) -> Result<CardInfo> {
        match self.query_one(Query::CardByName(name.to_string())).await? {
            EntityInfo::Card(info) => Ok(info),
            other => unexpected_kind(other),
        }
    }

    pub async fn client_list(&self) -> Result<Vec<ClientInfo>> {
        Ok(self
            .query_collect(Query::ClientList)
            .await?
            .into_iter()
            .filter_map(EntityInfo::into_client)
            .collect())
    }

    pub async fn client_info(&self, index: u32) -> Result<ClientInfo> {
        match self.query_one(Query::ClientByIndex(index)).await? {
            EntityInfo::Client(info) => Ok(info),
            other => unexpected_kind(other),
        }
    }

    pub async fn module_list(&self) -> Result<Vec<ModuleInfo>> {
        Ok(self
            .query_collect(Query::ModuleList)
            .await?
            .into_iter()
            .filter_map(EntityInfo::into_module)
            .collect())
    }

    pub async fn module_info(&self, index: u32) -> Result<ModuleInfo> {
        match self.query_one(Query::ModuleByIndex(index)).await? {
            EntityInfo::Module(info) => Ok(info),
            other => unexpected_kind(other),
        }
    }

    pub async fn server_info(&self) -> Result<ServerInfo> {
        match self.query_one(Query::ServerInfo).await? {
            EntityInfo::Server(info) => Ok(info),
            other => unexpected_kind(other),
        }
    }

    async fn mutation(&self, mutation: Mutation) -> Result<()> {
        self.operation(move |ctx, done| ctx.mutate(mutation, done))
            .await
    }

    /// Mute or unmute a sink, source, sink input or source output.
    pub async fn mute(&self, kind: EntityKind, index: u32, mute: bool) -> Result<()> {
        let mutation = match kind {
            EntityKind::Sink => Mutation::SinkMute { index, mute },
            EntityKind::Source => Mutation::SourceMute { index, mute },
            EntityKind::SinkInput => Mutation::SinkInputMute { index, mute },
            EntityKind::SourceOutput => Mutation::SourceOutputMute { index, mute },
            other => return Err(PulseError::Usage(format!("{other} does not support mute"))),
        };
        self.mutation(mutation).await
    }

    /// Set the full per-channel volume of an entity.
    pub async fn volume_set(
        &self,
        kind: EntityKind,
        index: u32,
        volume: &ChannelVolume,
    ) -> Result<()> {
        let volume = volume.clone();
        let mutation = match kind {
            EntityKind::Sink => Mutation::SinkVolume { index, volume },
            EntityKind::Source => Mutation::SourceVolume { index, volume },
            EntityKind::SinkInput => Mutation::SinkInputVolume { index, volume },
            EntityKind::SourceOutput => Mutation::SourceOutputVolume { index, volume },
            other => return Err(PulseError::Usage(format!("{other} has no volume"))),
        };
        self.mutation(mutation).await
    }

    /// Set every channel of an entity to the same level.
    pub async fn volume_set_all(&self, kind: EntityKind, index: u32, level: f32) -> Result<()> {
        let mut volume = self.entity_volume(kind, index).await?;
        volume.set_all(level);
        self.volume_set(kind, index, &volume).await
    }

    /// Shift every channel of an entity by `delta`, clamping at zero.
    pub async fn volume_change_all(&self, kind: EntityKind, index: u32, delta: f32) -> Result<()> {
        let mut volume = self.entity_volume(kind, index).await?;
        volume.change_all(delta);
        self.volume_set(kind, index, &volume).await
    }

    async fn entity_volume(&self, kind: EntityKind, index: u32) -> Result<ChannelVolume> {
        match kind {
            EntityKind::Sink => Ok(self.sink_info(index).await?.volume),
            EntityKind::Source => Ok(self.source_info(index).await?.volume),
            EntityKind::SinkInput => Ok(self.sink_input_info(index).await?.volume),
            EntityKind::SourceOutput => Ok(self.source_output_info(index).await?.volume),
            other => Err(PulseError::Usage(format!("{other} has no volume"))),
        }
    }

    /// Make the named sink or source the server default.
    pub async fn set_default(&self, kind: EntityKind, name: &str) -> Result<()> {
        let name = name.to_string();
        let mutation = match kind {
            EntityKind::Sink => Mutation::DefaultSink { name },
            EntityKind::Source => Mutation::DefaultSource { name },
            other => {
                return Err(PulseError::Usage(format!(
                    "{other} cannot be a server default"
                )))
            }
        };
        self.mutation(mutation).await
    }

    /// Switch the active port of a sink or source.
    pub async fn set_port(&self, kind: EntityKind, index: u32, port: &str) -> Result<()> {
        let port = port.to_string();
        let mutation = match kind {
            EntityKind::Sink => Mutation::SinkPort { index, port },
            EntityKind::Source => Mutation::SourcePort { index, port },
            other => return Err(PulseError::Usage(format!("{other} has no ports"))),
        };
        self.mutation(mutation).await
    }

    /// Suspend or resume a sink or source.
    pub async fn suspend(&self, kind: EntityKind, index: u32, suspend: bool) -> Result<()> {
        let mutation = match kind {
            EntityKind::Sink => Mutation::SinkSuspend { index, suspend },
            EntityKind::Source => Mutation::SourceSuspend { index, suspend },
            other => {
                return Err(PulseError::Usage(format!("{other} cannot be suspended")))
            }
        };
        self.mutation(mutation).await
    }

    /// Move a playback or record stream to another device.
    pub async fn move_stream(&self, kind: EntityKind, index: u32, destination: u32) -> Result<()> {
        let mutation = match kind {
            EntityKind::SinkInput => Mutation::MoveSinkInput {
                index,
                sink: destination,
            },
            EntityKind::SourceOutput => Mutation::MoveSourceOutput {
                index,
                source: destination,
            },
            other => return Err(PulseError::Usage(format!("{other} cannot be moved"))),
        };
        self.mutation(mutation).await
    }

    /// Activate a card profile by name.
    pub async fn card_profile_set(&self, index: u32, profile: &str) -> Result<()> {
        self.mutation(Mutation::CardProfile {
            index,
            profile: profile.to_string(),
        })
        .await
    }

    /// Play a sample stored on the server, optionally on a specific sink.
    pub async fn play_sample(
        &self,
        name: &str,
        sink: Option<&str>,
        volume: f32,
        proplist: Option<&str>,
    ) -> Result<()> {
        self.mutation(Mutation::PlaySample {
            name: name.to_string(),
            sink: sink.map(str::to_string),
            volume,
            proplist: proplist.map(str::to_string),
        })
        .await
    }

    /// Load a module and return its index.
    pub async fn module_load(&self, name: &str, args: &str) -> Result<u32> {
        let slot: Arc<Mutex<Option<u32>>> = Arc::new(Mutex::new(None));
        let out = Arc::clone(&slot);
        let module = name.to_string();
        let args = args.to_string();
        self.operation(move |ctx, done| {
            ctx.load_module(
                &module,
                &args,
                Box::new(move |index| {
                    *out.lock().unwrap() = Some(index);
                }),
                done,
            )
        })
        .await?;
        let index = slot
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| PulseError::OperationInvalid("no module index returned".into()))?;
        if index == INVALID_INDEX {
            return Err(PulseError::OperationInvalid(format!(
                "failed to load module {name}"
            )));
        }
        debug!("loaded module {name} as #{index}");
        Ok(index)
    }

    pub async fn module_unload(&self, index: u32) -> Result<()> {
        self.mutation(Mutation::UnloadModule { index }).await
    }

    /// Version of the stream-restore database, or `None` when the module is
    /// unavailable.
    pub async fn stream_restore_test(&self) -> Result<Option<u32>> {
        let slot: Arc<Mutex<Option<u32>>> = Arc::new(Mutex::new(None));
        let out = Arc::clone(&slot);
        self.operation(move |ctx, done| {
            ctx.stream_restore_test(
                Box::new(move |version| {
                    *out.lock().unwrap() = Some(version);
                }),
                done,
            )
        })
        .await?;
        let version = slot.lock().unwrap().take();
        Ok(version.filter(|v| *v != INVALID_INDEX))
    }

    pub async fn stream_restore_list(&self) -> Result<Vec<StreamRestoreInfo>> {
        Ok(self
            .query_collect(Query::StreamRestoreList)
            .await?
            .into_iter()
            .filter_map(EntityInfo::into_stream_restore)
            .collect())
    }

    /// Write stream-restore records; the records pass through unmodified.
    pub async fn stream_restore_write(
        &self,
        entries: Vec<StreamRestoreInfo>,
        mode: UpdateMode,
        apply_immediately: bool,
    ) -> Result<()> {
        self.mutation(Mutation::StreamRestoreWrite {
            entries,
            mode,
            apply_immediately,
        })
        .await
    }

    pub async fn stream_restore_delete(&self, names: &[&str]) -> Result<()> {
        self.mutation(Mutation::StreamRestoreDelete {
            names: names.iter().map(|n| n.to_string()).collect(),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_protocol::mock::MockServer;

    #[tokio::test]
    async fn test_unsupported_kind_is_a_usage_error() {
        let server = MockServer::new();
        let client = PulseClient::new("ops-test", None, server.backend()).unwrap();
        match client.mute(EntityKind::Card, 10, true).await {
            Err(PulseError::Usage(_)) => {}
            other => panic!("expected usage error, got {other:?}"),
        }
        match client.move_stream(EntityKind::Sink, 1, 2).await {
            Err(PulseError::Usage(_)) => {}
            other => panic!("expected usage error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_operation_after_close_is_disconnected() {
        let server = MockServer::new();
        let client = PulseClient::new("ops-test", None, server.backend()).unwrap();
        client.close();
        match client.sink_list().await {
            Err(PulseError::Disconnected) => {}
            other => panic!("expected disconnect, got {other:?}"),
        }
    }
}
