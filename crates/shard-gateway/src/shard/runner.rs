//! Shard task
//!
//! One task per shard owns every piece of that shard's mutable state. Inbound frames,
//! heartbeat ticks, limiter refills, reconnect and handshake deadlines all wake the
//! same `select!` loop, so none of them can race.

use super::backoff::ReconnectBackoff;
use super::handle::{ReconnectMode, ShardCommand, ShardSnapshot, ShardStatus};
use super::heartbeat::HeartbeatState;
use super::ShardContext;
use crate::batch::{chunk_count, Batch, BatchKind, BulkRequestBatcher};
use crate::error::{GatewayError, GatewayResult};
use crate::events::LifecycleEvent;
use crate::pool::PoolMessage;
use crate::protocol::{
    CloseAction, CloseCode, DispatchEvent, GatewayMessage, GuildCreatePayload,
    GuildMembersChunkPayload, GuildSyncPayload, HelloPayload, IdentifyPayload,
    IdentifyProperties, OpCode, Presence, ReadyPayload, ReidentifyReason, ResumePayload,
    StatusUpdatePayload, NORMAL_CLOSURE, RESUME_CLOSURE,
};
use crate::ratelimit::RateLimiter;
use crate::transport::{CloseInfo, Transport, TransportError, TransportEvent, TransportMessage};
use serde::de::DeserializeOwned;
use shard_common::GatewayConfig;
use shard_core::{ShardInfo, Snowflake};
use std::collections::{HashSet, VecDeque};
use std::future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

/// Why the loop woke up
enum Wake {
    Heartbeat,
    ConnectTimeout,
    GuildCreateTimeout,
    Reconnect,
    Refill,
    Command(ShardCommand),
    HandlesDropped,
    Transport(TransportEvent),
}

pub(crate) struct Shard {
    info: ShardInfo,
    ctx: Arc<ShardContext>,
    pool: mpsc::UnboundedSender<PoolMessage>,
    commands: mpsc::UnboundedReceiver<ShardCommand>,
    /// Commands that arrived while a connect was in flight
    deferred: VecDeque<ShardCommand>,
    snapshot: watch::Sender<ShardSnapshot>,

    transport: Option<Box<dyn Transport>>,
    status: ShardStatus,
    connecting: bool,
    ready: bool,
    pre_ready: bool,
    stopped: bool,
    awaiting_start: bool,

    session_id: Option<String>,
    sequence: u64,
    trace: Vec<String>,
    is_bot: bool,
    presence: Option<Presence>,
    last_error: Option<GatewayError>,

    heartbeat: HeartbeatState,
    heartbeat_timer: Option<Interval>,
    backoff: ReconnectBackoff,
    connect_attempts: u32,

    reconnect_at: Option<Instant>,
    connect_deadline: Option<Instant>,
    guild_create_deadline: Option<Instant>,

    global_bucket: RateLimiter<GatewayMessage>,
    presence_bucket: RateLimiter<GatewayMessage>,
    guild_sync: BulkRequestBatcher,
    member_chunks: BulkRequestBatcher,
    unavailable_guilds: HashSet<Snowflake>,
}

impl Shard {
    pub(crate) fn new(
        info: ShardInfo,
        ctx: Arc<ShardContext>,
        pool: mpsc::UnboundedSender<PoolMessage>,
        commands: mpsc::UnboundedReceiver<ShardCommand>,
        snapshot: watch::Sender<ShardSnapshot>,
    ) -> Self {
        let config = &ctx.config;
        Self {
            info,
            pool,
            commands,
            deferred: VecDeque::new(),
            snapshot,
            transport: None,
            status: ShardStatus::Disconnected,
            connecting: false,
            ready: false,
            pre_ready: false,
            stopped: false,
            awaiting_start: false,
            session_id: None,
            sequence: 0,
            trace: Vec::new(),
            is_bot: true,
            presence: ctx.presence.clone(),
            last_error: None,
            heartbeat: HeartbeatState::new(),
            heartbeat_timer: None,
            backoff: ReconnectBackoff::new(&config.reconnect),
            connect_attempts: 0,
            reconnect_at: None,
            connect_deadline: None,
            guild_create_deadline: None,
            global_bucket: global_bucket(config),
            presence_bucket: presence_bucket(config),
            guild_sync: batcher(config, BatchKind::GuildSync),
            member_chunks: batcher(config, BatchKind::MemberChunk),
            unavailable_guilds: HashSet::new(),
            ctx,
        }
    }

    fn id(&self) -> u32 {
        self.info.id()
    }

    pub(crate) async fn run(mut self) {
        debug!(shard_id = self.id(), "Shard task started");

        while !self.stopped {
            let result = match self.next_wake().await {
                Wake::Heartbeat => self.heartbeat(true).await,
                Wake::ConnectTimeout => {
                    self.connect_deadline = None;
                    if self.connecting {
                        Err(GatewayError::ConnectionTimeout)
                    } else {
                        Ok(())
                    }
                }
                Wake::GuildCreateTimeout => {
                    self.guild_create_deadline = None;
                    self.check_ready().await
                }
                Wake::Reconnect => {
                    self.reconnect_at = None;
                    self.request_start();
                    Ok(())
                }
                Wake::Refill => self.drain_buckets().await,
                Wake::Command(command) => self.handle_command(command).await,
                Wake::HandlesDropped => {
                    self.disconnect(ReconnectMode::Never, None).await;
                    self.stopped = true;
                    Ok(())
                }
                Wake::Transport(event) => self.handle_transport_event(event).await,
            };

            if let Err(error) = result {
                warn!(shard_id = self.id(), error = %error, "Connection lost");
                self.disconnect(ReconnectMode::Auto, Some(error)).await;
            }
            self.publish();
        }

        debug!(shard_id = self.id(), "Shard task stopped");
    }

    async fn next_wake(&mut self) -> Wake {
        if let Some(command) = self.deferred.pop_front() {
            return Wake::Command(command);
        }

        let refill_at = earliest(
            self.global_bucket.next_refill(),
            self.presence_bucket.next_refill(),
        );

        // Timers first so a busy transport cannot starve the heartbeat
        tokio::select! {
            biased;
            () = tick(&mut self.heartbeat_timer) => Wake::Heartbeat,
            () = sleep_until(self.connect_deadline) => Wake::ConnectTimeout,
            () = sleep_until(self.guild_create_deadline) => Wake::GuildCreateTimeout,
            () = sleep_until(self.reconnect_at) => Wake::Reconnect,
            () = sleep_until(refill_at) => Wake::Refill,
            command = self.commands.recv() => match command {
                Some(command) => Wake::Command(command),
                None => Wake::HandlesDropped,
            },
            event = recv(&mut self.transport) => Wake::Transport(event),
        }
    }

    // === Commands ===

    async fn handle_command(&mut self, command: ShardCommand) -> GatewayResult<()> {
        match command {
            ShardCommand::Start => self.start().await,
            ShardCommand::Connect => {
                self.connect();
                Ok(())
            }
            ShardCommand::Disconnect(mode) => {
                self.disconnect(mode, None).await;
                Ok(())
            }
            ShardCommand::EditStatus(presence) => self.edit_status(presence).await,
            ShardCommand::RequestGuildMembers(request) => {
                self.send(GatewayMessage::request_guild_members(&request))
                    .await
            }
            ShardCommand::Shutdown(ack) => {
                self.shutdown().await;
                let _ = ack.send(());
                Ok(())
            }
        }
    }

    fn connect(&mut self) {
        if self.transport.is_some() {
            warn!(shard_id = self.id(), error = %GatewayError::AlreadyConnected, "Ignoring connect");
            return;
        }
        self.last_error = None;
        self.reconnect_at = None;
        self.request_start();
    }

    fn request_start(&mut self) {
        if self.awaiting_start {
            return;
        }
        self.awaiting_start = true;
        self.notify_pool(PoolMessage::RequestStart {
            shard_id: self.id(),
        });
    }

    /// Admission granted: open the transport
    async fn start(&mut self) -> GatewayResult<()> {
        if !self.awaiting_start || self.transport.is_some() {
            debug!(shard_id = self.id(), "Admission no longer needed");
            self.notify_pool(PoolMessage::StartDeclined {
                shard_id: self.id(),
            });
            return Ok(());
        }

        self.awaiting_start = false;
        self.connect_attempts += 1;
        self.connecting = true;
        self.status = ShardStatus::Connecting;
        self.emit(LifecycleEvent::Connecting);
        self.publish();

        let ctx = Arc::clone(&self.ctx);
        let timeout = ctx.config.timeouts.connection_timeout();
        let url = ctx.config.gateway.url.as_str();
        debug!(shard_id = self.id(), url = %url, attempt = self.connect_attempts, "Connecting");

        let connect = time::timeout(timeout, ctx.connector.connect(url));
        tokio::pin!(connect);

        // Keep serving commands; shutdown or disconnect abandons the attempt
        let transport = loop {
            tokio::select! {
                result = &mut connect => {
                    break result.map_err(|_| GatewayError::ConnectionTimeout)??;
                }
                command = self.commands.recv() => match command {
                    Some(ShardCommand::Shutdown(ack)) => {
                        debug!(shard_id = self.id(), "Connect abandoned for shutdown");
                        self.shutdown().await;
                        let _ = ack.send(());
                        return Ok(());
                    }
                    Some(ShardCommand::Disconnect(mode)) => {
                        debug!(shard_id = self.id(), ?mode, "Connect abandoned");
                        self.disconnect(mode, None).await;
                        return Ok(());
                    }
                    Some(command) => self.deferred.push_back(command),
                    None => {
                        self.disconnect(ReconnectMode::Never, None).await;
                        self.stopped = true;
                        return Ok(());
                    }
                },
            }
        };

        self.transport = Some(transport);
        self.status = ShardStatus::Handshaking;
        self.heartbeat.reset();
        self.connect_deadline = Some(Instant::now() + timeout);
        self.emit(LifecycleEvent::Connected);
        Ok(())
    }

    async fn edit_status(&mut self, presence: Presence) -> GatewayResult<()> {
        let payload = StatusUpdatePayload::from_presence(&presence, unix_millis());
        self.presence = Some(presence);
        self.send_status(GatewayMessage::status_update(&payload)).await
    }

    async fn shutdown(&mut self) {
        info!(shard_id = self.id(), "Shutting down");
        self.disconnect(ReconnectMode::Never, None).await;
        self.publish();

        let (ack, deregistered) = oneshot::channel();
        if self
            .pool
            .send(PoolMessage::Deregister {
                shard_id: self.id(),
                ack,
            })
            .is_ok()
        {
            let _ = deregistered.await;
        }
        self.stopped = true;
    }

    // === Inbound ===

    async fn handle_transport_event(&mut self, event: TransportEvent) -> GatewayResult<()> {
        match event {
            TransportEvent::Message(message) => self.handle_message(&message).await,
            TransportEvent::Closed(close) => {
                self.handle_close(close).await;
                Ok(())
            }
            TransportEvent::Error(error) => {
                self.transport = None;
                Err(error.into())
            }
        }
    }

    async fn handle_message(&mut self, raw: &TransportMessage) -> GatewayResult<()> {
        let message = match self.ctx.codec.decode(raw) {
            Ok(message) => message,
            Err(error) => {
                warn!(shard_id = self.id(), error = %error, "Dropping undecodable frame");
                return Ok(());
            }
        };
        trace!(shard_id = self.id(), message = %message, "Received frame");

        if let Some(sequence) = message.s {
            self.observe_sequence(sequence).await?;
        }

        match message.op {
            OpCode::Dispatch => {
                if let Some(event) = message.into_dispatch() {
                    self.handle_dispatch(event).await?;
                }
            }
            OpCode::Heartbeat => self.heartbeat(false).await?,
            OpCode::InvalidSession => {
                warn!(shard_id = self.id(), "Invalid session, reidentifying");
                self.session_id = None;
                self.sequence = 0;
                self.ready = false;
                self.pre_ready = false;
                self.guild_create_deadline = None;
                self.guild_sync.clear();
                self.member_chunks.clear();
                self.unavailable_guilds.clear();
                self.emit(LifecycleEvent::Invalidated);
                self.identify().await?;
            }
            OpCode::Reconnect => {
                info!(shard_id = self.id(), "Gateway requested a reconnect");
                self.disconnect(ReconnectMode::Auto, Some(GatewayError::ReconnectRequested))
                    .await;
            }
            OpCode::Hello => match message.as_hello() {
                Some(hello) => self.handle_hello(hello).await?,
                None => warn!(shard_id = self.id(), "Malformed HELLO"),
            },
            OpCode::HeartbeatAck => {
                self.heartbeat.ack(Instant::now());
                trace!(shard_id = self.id(), latency = ?self.heartbeat.latency(), "Heartbeat acknowledged");
            }
            op => warn!(shard_id = self.id(), op = %op, "Unexpected opcode"),
        }
        Ok(())
    }

    /// Advance the sequence; a gap means frames were lost, so resume from the new one
    async fn observe_sequence(&mut self, sequence: u64) -> GatewayResult<()> {
        if sequence <= self.sequence {
            return Ok(());
        }

        let expected = self.sequence + 1;
        self.sequence = sequence;

        if sequence > expected && self.session_id.is_some() && self.transport.is_some() {
            warn!(
                shard_id = self.id(),
                expected,
                received = sequence,
                "Non-consecutive sequence, requesting resume"
            );
            self.resume().await?;
        }
        Ok(())
    }

    async fn handle_hello(&mut self, hello: HelloPayload) -> GatewayResult<()> {
        if hello.heartbeat_interval > 0 {
            let period = Duration::from_millis(hello.heartbeat_interval);
            let mut timer = time::interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.heartbeat_timer = Some(timer);
        }

        self.trace = hello.trace;
        self.connecting = false;
        self.connect_deadline = None;
        self.status = ShardStatus::Connected;
        debug!(
            shard_id = self.id(),
            heartbeat_interval = hello.heartbeat_interval,
            trace = ?self.trace,
            "Received HELLO"
        );

        if self.session_id.is_some() {
            self.resume().await?;
        } else {
            self.identify().await?;
        }
        self.heartbeat(false).await
    }

    async fn handle_close(&mut self, close: Option<CloseInfo>) {
        // The peer already closed; nothing to send it
        self.transport = None;

        let code = close.as_ref().map(|c| c.code);
        let reason = close.map(|c| c.reason).unwrap_or_default();
        match code {
            Some(NORMAL_CLOSURE) => info!(shard_id = self.id(), reason = %reason, "Clean close"),
            Some(code) => match CloseCode::from_u16(code) {
                Some(known) => warn!(shard_id = self.id(), close = %known, reason = %reason, "Unclean close"),
                None => warn!(shard_id = self.id(), code, reason = %reason, "Unclean close"),
            },
            None => warn!(shard_id = self.id(), "Connection reset by peer"),
        }

        let error = match code {
            Some(NORMAL_CLOSURE) => None,
            Some(code) => Some(GatewayError::from_close(code, &reason)),
            None => Some(GatewayError::Transport(TransportError::Closed)),
        };

        match self.ctx.close_policy.classify(code) {
            CloseAction::Fatal => {
                let code = code.unwrap_or_default();
                let reason = if reason.is_empty() {
                    CloseCode::from_u16(code)
                        .map(|c| c.description().to_string())
                        .unwrap_or_default()
                } else {
                    reason
                };
                let error = GatewayError::FatalClose { code, reason };
                error!(shard_id = self.id(), error = %error, "Fatal close, not reconnecting");
                self.last_error = Some(error.clone());
                self.disconnect(ReconnectMode::Never, Some(error)).await;
            }
            CloseAction::Reidentify(why) => {
                let error = match why {
                    ReidentifyReason::SessionInvalidated => GatewayError::SessionInvalidated,
                    ReidentifyReason::SequenceReset => GatewayError::InvalidSequence(self.sequence),
                };
                self.invalidate_session();
                self.disconnect(ReconnectMode::Auto, Some(error)).await;
            }
            CloseAction::Resume => self.disconnect(ReconnectMode::Auto, error).await,
        }
    }

    // === Dispatch ===

    async fn handle_dispatch(&mut self, event: DispatchEvent) -> GatewayResult<()> {
        if !self.ctx.disabled_events.contains(&event.name) {
            self.ctx.dispatcher.on_frame(&event, self.id());
        }

        match event.name.as_str() {
            "READY" => self.handle_ready(&event).await,
            "RESUMED" => self.handle_resumed().await,
            "GUILD_CREATE" => self.handle_guild_create(&event).await,
            "GUILD_DELETE" => self.handle_guild_delete(&event).await,
            "GUILD_SYNC" => {
                if let Some(sync) = self.parse::<GuildSyncPayload>(&event) {
                    self.guild_sync.settle(sync.id);
                    self.check_ready().await?;
                }
                Ok(())
            }
            "GUILD_MEMBERS_CHUNK" => {
                if let Some(chunk) = self.parse::<GuildMembersChunkPayload>(&event) {
                    if self.member_chunks.settle(chunk.guild_id) {
                        self.check_ready().await?;
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn handle_ready(&mut self, event: &DispatchEvent) -> GatewayResult<()> {
        let Some(ready) = self.parse::<ReadyPayload>(event) else {
            return Ok(());
        };

        self.connect_attempts = 0;
        self.backoff.reset();
        self.connecting = false;
        self.status = ShardStatus::Connected;
        self.is_bot = ready.user.bot;
        if !ready.trace.is_empty() {
            self.trace = ready.trace;
        }
        info!(
            shard_id = self.id(),
            session_id = %ready.session_id,
            guilds = ready.guilds.len(),
            "Session ready"
        );
        self.session_id = Some(ready.session_id);

        let has_guilds = !ready.guilds.is_empty();
        for guild in &ready.guilds {
            if guild.unavailable {
                self.unavailable_guilds.insert(guild.id);
            } else {
                self.unavailable_guilds.remove(&guild.id);
                self.guild_available(guild).await?;
            }
        }

        self.pre_ready = true;
        self.emit(LifecycleEvent::PreReady);

        if has_guilds && !self.unavailable_guilds.is_empty() {
            self.restart_guild_create_timeout().await
        } else {
            self.check_ready().await
        }
    }

    async fn handle_resumed(&mut self) -> GatewayResult<()> {
        self.connect_attempts = 0;
        self.backoff.reset();
        self.connecting = false;
        self.status = ShardStatus::Connected;

        // Resumed in place while READY catch-up is still owed: readiness stays gated
        if self.catching_up() {
            info!(shard_id = self.id(), seq = self.sequence, "Session resumed, catch-up pending");
            return self.check_ready().await;
        }

        self.pre_ready = true;
        self.ready = true;
        info!(shard_id = self.id(), seq = self.sequence, "Session resumed");
        self.emit(LifecycleEvent::Resumed);
        Ok(())
    }

    fn catching_up(&self) -> bool {
        self.pre_ready
            && !self.ready
            && (self.guild_create_deadline.is_some()
                || !self.unavailable_guilds.is_empty()
                || !self.guild_sync.is_settled()
                || !self.member_chunks.is_settled())
    }

    async fn handle_guild_create(&mut self, event: &DispatchEvent) -> GatewayResult<()> {
        let Some(guild) = self.parse::<GuildCreatePayload>(event) else {
            return Ok(());
        };
        if guild.unavailable {
            return Ok(());
        }

        let was_unavailable = self.unavailable_guilds.remove(&guild.id);
        trace!(shard_id = self.id(), guild_id = %guild.id, was_unavailable, "Guild available");

        self.guild_available(&guild).await?;
        if !self.ready {
            self.restart_guild_create_timeout().await?;
        }
        Ok(())
    }

    async fn handle_guild_delete(&mut self, event: &DispatchEvent) -> GatewayResult<()> {
        let Some(guild) = self.parse::<GuildCreatePayload>(event) else {
            return Ok(());
        };
        // Guilds listed as unavailable in READY can be deleted before they ever arrive
        if self.unavailable_guilds.remove(&guild.id) && !self.ready {
            self.restart_guild_create_timeout().await?;
        }
        Ok(())
    }

    /// Queue the catch-up requests a newly available guild needs
    async fn guild_available(&mut self, guild: &GuildCreatePayload) -> GatewayResult<()> {
        if !self.is_bot {
            self.guild_sync.expect(guild.id, 1);
            let overflow = self.guild_sync.enqueue(guild.id);
            self.send_batch(overflow).await?;
            let immediate = self.guild_sync.flush_if_ready(self.ready);
            self.send_batch(immediate).await?;
        }

        let bulk = &self.ctx.config.bulk;
        if bulk.request_all_members && guild.is_incomplete() {
            let chunks = chunk_count(guild.member_count, bulk.members_per_chunk);
            self.member_chunks.expect(guild.id, chunks);
            let overflow = self.member_chunks.enqueue(guild.id);
            self.send_batch(overflow).await?;
            let immediate = self.member_chunks.flush_if_ready(self.ready);
            self.send_batch(immediate).await?;
        }
        Ok(())
    }

    async fn restart_guild_create_timeout(&mut self) -> GatewayResult<()> {
        self.guild_create_deadline = None;
        if self.ready {
            return Ok(());
        }
        if self.unavailable_guilds.is_empty() && self.guild_sync.outstanding() == 0 {
            return self.check_ready().await;
        }
        self.guild_create_deadline =
            Some(Instant::now() + self.ctx.config.timeouts.guild_create_timeout());
        Ok(())
    }

    /// Flush sync requests, wait for them, flush member requests, wait, then report ready
    async fn check_ready(&mut self) -> GatewayResult<()> {
        if self.ready || !self.pre_ready || self.guild_create_deadline.is_some() {
            return Ok(());
        }

        if let Some(batch) = self.guild_sync.flush() {
            return self.send_batch(Some(batch)).await;
        }
        if !self.guild_sync.is_settled() {
            return Ok(());
        }

        if let Some(batch) = self.member_chunks.flush() {
            return self.send_batch(Some(batch)).await;
        }
        if !self.member_chunks.is_settled() {
            return Ok(());
        }

        self.ready = true;
        self.last_error = None;
        info!(shard_id = self.id(), "Shard ready");
        self.emit(LifecycleEvent::Ready);
        Ok(())
    }

    fn parse<T: DeserializeOwned>(&self, event: &DispatchEvent) -> Option<T> {
        match event.parse() {
            Ok(payload) => Some(payload),
            Err(error) => {
                warn!(shard_id = self.id(), event = %event.name, error = %error, "Malformed dispatch payload");
                None
            }
        }
    }

    // === Outbound ===

    async fn identify(&mut self) -> GatewayResult<()> {
        let gateway = &self.ctx.config.gateway;
        let payload = IdentifyPayload {
            token: gateway.token.clone(),
            v: gateway.version,
            compress: gateway.compress,
            large_threshold: gateway.large_threshold,
            properties: IdentifyProperties::new(gateway.client_name.as_str()),
            shard: self.info.is_sharded().then_some(self.info),
            presence: self
                .presence
                .as_ref()
                .map(|presence| StatusUpdatePayload::from_presence(presence, unix_millis())),
        };
        info!(shard_id = self.id(), shard = %self.info, "Identifying");
        self.send(GatewayMessage::identify(&payload)).await
    }

    async fn resume(&mut self) -> GatewayResult<()> {
        let Some(session_id) = self.session_id.clone() else {
            return self.identify().await;
        };
        info!(shard_id = self.id(), session_id = %session_id, seq = self.sequence, "Resuming");
        let payload = ResumePayload {
            token: self.ctx.config.gateway.token.clone(),
            session_id,
            seq: self.sequence,
        };
        self.send(GatewayMessage::resume(&payload)).await
    }

    /// Heartbeat; a timer tick first checks the previous one was acknowledged
    async fn heartbeat(&mut self, scheduled: bool) -> GatewayResult<()> {
        if scheduled && !self.heartbeat.is_acked() {
            return Err(GatewayError::HeartbeatTimeout);
        }
        self.heartbeat.sent(Instant::now());
        let sequence = (self.sequence > 0).then_some(self.sequence);
        self.send(GatewayMessage::heartbeat(sequence)).await
    }

    async fn send_batch(&mut self, batch: Option<Batch>) -> GatewayResult<()> {
        let Some(batch) = batch else {
            return Ok(());
        };
        debug!(shard_id = self.id(), kind = ?batch.kind, guilds = batch.ids.len(), "Sending bulk request");
        self.send(batch.into_message()).await
    }

    /// Send through the global bucket
    async fn send(&mut self, message: GatewayMessage) -> GatewayResult<()> {
        if self.transport.is_none() {
            trace!(shard_id = self.id(), op = %message.op, "Not connected, dropping frame");
            return Ok(());
        }
        let released = self.global_bucket.queue(message, Instant::now());
        self.write_all(released).await
    }

    /// Send through the presence bucket, then the global one
    async fn send_status(&mut self, message: GatewayMessage) -> GatewayResult<()> {
        if self.transport.is_none() {
            trace!(shard_id = self.id(), "Not connected, dropping status update");
            return Ok(());
        }
        let now = Instant::now();
        let mut released = Vec::new();
        for message in self.presence_bucket.queue(message, now) {
            released.extend(self.global_bucket.queue(message, now));
        }
        self.write_all(released).await
    }

    async fn drain_buckets(&mut self) -> GatewayResult<()> {
        let now = Instant::now();
        let promoted = self.presence_bucket.release(now);
        let mut released = self.global_bucket.release(now);
        for message in promoted {
            released.extend(self.global_bucket.queue(message, now));
        }
        self.write_all(released).await
    }

    async fn write_all(&mut self, messages: Vec<GatewayMessage>) -> GatewayResult<()> {
        for message in messages {
            let frame = match self.ctx.codec.encode(&message) {
                Ok(frame) => frame,
                Err(error) => {
                    warn!(shard_id = self.id(), op = %message.op, error = %error, "Dropping unencodable frame");
                    continue;
                }
            };
            let Some(transport) = self.transport.as_mut() else {
                return Ok(());
            };
            trace!(shard_id = self.info.id(), message = %message, "Sending frame");
            transport.send(frame).await?;
        }
        Ok(())
    }

    // === Teardown ===

    async fn disconnect(&mut self, mode: ReconnectMode, error: Option<GatewayError>) {
        self.heartbeat_timer = None;
        self.connect_deadline = None;
        self.guild_create_deadline = None;
        self.reconnect_at = None;
        self.awaiting_start = false;

        if let Some(mut transport) = self.transport.take() {
            // Anything but 1000 keeps the session resumable on the gateway side
            let code = if mode != ReconnectMode::Never && self.session_id.is_some() {
                RESUME_CLOSURE
            } else {
                NORMAL_CLOSURE
            };
            if let Err(error) = transport.close(code, "").await {
                debug!(shard_id = self.id(), error = %error, "Transport close failed");
            }
        }

        let was_up = self.status != ShardStatus::Disconnected;
        self.reset();
        if was_up || error.is_some() {
            self.emit(LifecycleEvent::Disconnected(error));
        }

        match mode {
            ReconnectMode::Auto if self.ctx.config.reconnect.autoreconnect => {
                let delay = self.backoff.next_delay();
                debug!(
                    shard_id = self.id(),
                    delay_ms = delay.as_millis() as u64,
                    next_interval = ?self.backoff.interval(),
                    attempt = self.connect_attempts,
                    "Queueing reconnect"
                );
                self.reconnect_at = Some(Instant::now() + delay);
            }
            ReconnectMode::Never => self.hard_reset(),
            ReconnectMode::Auto | ReconnectMode::Later => {}
        }
    }

    /// Connection-scoped state; the session survives
    fn reset(&mut self) {
        self.status = ShardStatus::Disconnected;
        self.connecting = false;
        self.ready = false;
        self.pre_ready = false;
        self.heartbeat.reset();
        self.guild_sync.clear();
        self.member_chunks.clear();
        self.global_bucket.clear_queue();
        self.presence_bucket.clear_queue();
        self.unavailable_guilds.clear();
    }

    fn hard_reset(&mut self) {
        self.reset();
        self.invalidate_session();
        self.backoff.reset();
        self.connect_attempts = 0;
    }

    /// Drop the session and start over with fresh buckets and batchers
    fn invalidate_session(&mut self) {
        let config = &self.ctx.config;
        self.session_id = None;
        self.sequence = 0;
        self.global_bucket = global_bucket(config);
        self.presence_bucket = presence_bucket(config);
        self.guild_sync = batcher(config, BatchKind::GuildSync);
        self.member_chunks = batcher(config, BatchKind::MemberChunk);
    }

    // === Reporting ===

    fn emit(&self, event: LifecycleEvent) {
        trace!(shard_id = self.id(), event = event.name(), "Lifecycle");
        self.notify_pool(PoolMessage::Lifecycle {
            shard_id: self.id(),
            event,
        });
    }

    fn notify_pool(&self, message: PoolMessage) {
        if self.pool.send(message).is_err() {
            trace!(shard_id = self.id(), "Pool is gone");
        }
    }

    fn publish(&self) {
        let next = ShardSnapshot {
            status: self.status,
            ready: self.ready,
            pre_ready: self.pre_ready,
            session_id: self.session_id.clone(),
            sequence: self.sequence,
            latency: self.heartbeat.latency(),
            connect_attempts: self.connect_attempts,
            last_error: self.last_error.clone(),
        };
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

fn global_bucket(config: &GatewayConfig) -> RateLimiter<GatewayMessage> {
    let limits = &config.rate_limit;
    RateLimiter::new(limits.global_capacity, limits.global_window())
}

fn presence_bucket(config: &GatewayConfig) -> RateLimiter<GatewayMessage> {
    let limits = &config.rate_limit;
    RateLimiter::new(limits.presence_capacity, limits.presence_window())
}

fn batcher(config: &GatewayConfig, kind: BatchKind) -> BulkRequestBatcher {
    let budget = match kind {
        BatchKind::GuildSync => config.bulk.guild_sync_budget,
        BatchKind::MemberChunk => config.bulk.member_chunk_budget,
    };
    BulkRequestBatcher::with_budget(kind, budget)
}

fn unix_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}

fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}

async fn recv(transport: &mut Option<Box<dyn Transport>>) -> TransportEvent {
    match transport {
        Some(transport) => transport.recv().await,
        None => future::pending().await,
    }
}
