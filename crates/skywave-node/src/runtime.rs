//! The daemon runtime: tokio workers around the Sans-IO engine.
//!
//! One driver loop owns the mesh node and the chat client and is their
//! sole mutator, consuming the multiplexer's inbound queue and the timer
//! ticks (OGM beacon, chat/sync tick, expiry sweep, retention). Link I/O
//! tasks, the inbound listener, and the event dispatcher run as separate
//! workers, all answering to one shutdown signal.
//!
//! Shutdown ordering: the driver loop stops beaconing and syncing first,
//! drains the inbound queue for a bounded grace period, then the event
//! bus drains and links close.

use std::time::Duration;

use skywave_core::{
    ChatConfig, Environment, Event, LinkState, MeshConfig,
    chat::{ChatAction, ChatClient, SendTarget},
    node::{MeshNode, NodeAction},
    store::ChatStore,
};
use skywave_link::{
    InboundFrame, LinkHealth, Multiplexer,
    tcp::{run_listener, spawn_connector},
};
use skywave_proto::NodeId;
use tokio::sync::{mpsc, watch};

use crate::{
    DaemonError,
    config::DaemonSetup,
    event_bus::{EventBus, LogObserver},
    storage::SqliteStore,
    system_env::SystemEnv,
};

/// How long the driver keeps draining inbound frames after shutdown.
const DRAIN_GRACE: Duration = Duration::from_secs(2);
/// Chat/sync housekeeping cadence.
const CHAT_TICK: Duration = Duration::from_secs(5);
/// Retention check cadence.
const PRUNE_TICK: Duration = Duration::from_secs(3600);
/// Store busy-timeout: the brief retry before a write is dropped.
const STORE_BUSY_TIMEOUT: Duration = Duration::from_secs(2);

/// Operator commands into a running daemon.
#[derive(Debug, Clone)]
pub enum Command {
    /// Send a chat message.
    SendMessage {
        /// Channel (`#name` or `@CALLSIGN`).
        channel: String,
        /// Message text.
        text: String,
    },
}

/// Run the daemon until the shutdown signal fires.
///
/// # Errors
///
/// - [`DaemonError`] on fatal startup problems (store, listener bind);
///   once running, errors are handled internally.
pub async fn run(
    setup: DaemonSetup,
    commands: mpsc::Receiver<Command>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), DaemonError> {
    let env = SystemEnv;
    let id = NodeId::from_callsign(&setup.callsign);
    tracing::info!(callsign = %setup.callsign, node = %id, mode = setup.chat.node_mode.as_str(), "starting");

    let store = SqliteStore::open(&setup.db_path, STORE_BUSY_TIMEOUT)?;
    let mut mesh: MeshNode<std::time::Instant> =
        MeshNode::new(id, setup.mesh.clone(), env.unix_time() as u32);
    if let Some(key) = &setup.payload_key {
        mesh.enable_encryption(key);
        tracing::warn!("payload encryption enabled; not for amateur radio use");
    }
    let chat: ChatClient<SqliteStore, std::time::Instant> =
        ChatClient::new(id, &setup.chat, store.clone())?;

    let (mux, inbound_rx) = Multiplexer::new(256);
    let (bus, mut dispatcher) = EventBus::new(1024);
    dispatcher.register(Box::new(LogObserver));
    let dispatcher_handle = tokio::spawn(dispatcher.run());

    for link_config in setup.links.clone() {
        let handle = spawn_connector(link_config, mux.inbound_sender(), shutdown.clone());
        spawn_health_watcher(handle.health.clone(), handle.name.clone(), bus.clone(), shutdown.clone());
        mux.add_link(handle);
    }

    if let Some((listen, password)) = setup.listen.clone() {
        let listener_mux = mux.clone();
        let listener_shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(error) = run_listener(&listen, password, listener_mux, listener_shutdown).await {
                tracing::error!(%error, "mesh listener failed");
            }
        });
    }

    let mut driver = Driver {
        env,
        mesh,
        chat,
        mux,
        bus,
        store,
        mesh_config: setup.mesh,
        chat_config: setup.chat,
    };
    driver.run_loop(inbound_rx, commands, shutdown).await;

    // The driver has stopped publishing; dropping it releases the last
    // event bus sender so the dispatcher can drain and exit.
    drop(driver);
    let _ = tokio::time::timeout(DRAIN_GRACE, dispatcher_handle).await;
    tracing::info!("shutdown complete");
    Ok(())
}

fn spawn_health_watcher(
    mut health: watch::Receiver<LinkHealth>,
    name: String,
    bus: EventBus,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = health.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = match *health.borrow() {
                        LinkHealth::Connected => LinkState::Connected,
                        LinkHealth::Reconnecting => LinkState::Reconnecting,
                        LinkHealth::Closed => LinkState::Closed,
                    };
                    bus.publish(Event::LinkStateChange { link: name.clone(), state });
                    if state == LinkState::Closed {
                        break;
                    }
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                },
            }
        }
    });
}

struct Driver {
    env: SystemEnv,
    mesh: MeshNode<std::time::Instant>,
    chat: ChatClient<SqliteStore, std::time::Instant>,
    mux: Multiplexer,
    bus: EventBus,
    store: SqliteStore,
    mesh_config: MeshConfig,
    chat_config: ChatConfig,
}

impl Driver {
    async fn run_loop(
        &mut self,
        mut inbound: mpsc::Receiver<InboundFrame>,
        mut commands: mpsc::Receiver<Command>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let expiry_period = (self.mesh_config.neighbor_timeout / 4)
            .min(self.mesh_config.dedup_ttl / 4)
            .max(Duration::from_secs(5));
        let mut chat_tick = tokio::time::interval(CHAT_TICK);
        let mut expire_tick = tokio::time::interval(expiry_period);
        let mut prune_tick = tokio::time::interval(PRUNE_TICK);
        let mut ogm_deadline = tokio::time::Instant::now() + self.jittered_ogm_interval();
        let mut commands_open = true;

        loop {
            tokio::select! {
                frame = inbound.recv() => {
                    match frame {
                        Some(frame) => self.process_inbound(&frame),
                        None => break,
                    }
                },
                () = tokio::time::sleep_until(ogm_deadline) => {
                    let actions = self.mesh.ogm_tick(self.env.now());
                    self.execute_node_actions(actions);
                    ogm_deadline = tokio::time::Instant::now() + self.jittered_ogm_interval();
                },
                _ = chat_tick.tick() => {
                    let actions = self.chat.tick(self.env.now());
                    self.execute_chat_actions(actions);
                },
                _ = expire_tick.tick() => {
                    self.mesh.expire(self.env.now());
                    if self.chat_config.node_mode == skywave_core::NodeMode::Monitor {
                        self.log_diagnostics();
                    }
                },
                _ = prune_tick.tick() => {
                    self.run_retention();
                },
                command = commands.recv(), if commands_open => {
                    match command {
                        Some(command) => self.handle_command(command),
                        None => commands_open = false,
                    }
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                },
            }
        }

        // Bounded drain: frames already queued still get processed, but
        // nothing new is beaconed or requested.
        let drain_deadline = tokio::time::Instant::now() + DRAIN_GRACE;
        while let Ok(Some(frame)) =
            tokio::time::timeout_at(drain_deadline, inbound.recv()).await
        {
            self.process_inbound(&frame);
        }
    }

    fn process_inbound(&mut self, frame: &InboundFrame) {
        let dedup_before = self.mesh.metrics().dedup_drops;
        let actions = self.mesh.handle_frame(&frame.bytes, &frame.link, self.env.now());

        if self.mesh.metrics().dedup_drops > dedup_before {
            if let Some(metrics) = self.mux.link_metrics(&frame.link) {
                metrics.note_dedup_drop();
            }
        }
        self.execute_node_actions(actions);
    }

    fn execute_node_actions(&mut self, actions: Vec<NodeAction>) {
        for action in actions {
            match action {
                NodeAction::Broadcast(frame) => self.broadcast(&frame),
                NodeAction::Deliver { origin, seqno: _, flags, body } => {
                    let chat_actions = self.chat.handle_delivery(
                        origin,
                        flags,
                        &body,
                        self.mesh.cipher(),
                        self.env.now(),
                        self.env.unix_time(),
                    );
                    self.execute_chat_actions(chat_actions);
                },
            }
        }
    }

    fn execute_chat_actions(&mut self, actions: Vec<ChatAction>) {
        for action in actions {
            match action {
                ChatAction::Emit(event) => self.bus.publish(event),
                ChatAction::Send(outbound) => {
                    let destination = match outbound.target {
                        SendTarget::Direct(node) => node,
                        SendTarget::TowardOrigin(origin) => self
                            .mesh
                            .route_next_hop(&origin)
                            .unwrap_or(NodeId::BROADCAST),
                    };
                    match self.mesh.send_data(
                        destination,
                        outbound.data_seqno,
                        &outbound.payload,
                        self.env.now(),
                    ) {
                        Ok(actions) => {
                            for action in actions {
                                if let NodeAction::Broadcast(frame) = action {
                                    self.broadcast(&frame);
                                }
                            }
                        },
                        Err(error) => {
                            tracing::warn!(%error, "failed to transmit chat payload");
                        },
                    }
                },
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::SendMessage { channel, text } => {
                let created_ts = self.env.unix_time();
                let outbound = match self.chat.prepare_message(&channel, &text, created_ts) {
                    Ok(outbound) => outbound,
                    Err(error) => {
                        tracing::warn!(%error, %channel, "cannot send message");
                        return;
                    },
                };

                let destination = match outbound.target {
                    SendTarget::Direct(node) => node,
                    SendTarget::TowardOrigin(origin) => self
                        .mesh
                        .route_next_hop(&origin)
                        .unwrap_or(NodeId::BROADCAST),
                };
                match self.mesh.send_data(
                    destination,
                    outbound.data_seqno,
                    &outbound.payload,
                    self.env.now(),
                ) {
                    Ok(actions) => {
                        for action in actions {
                            if let NodeAction::Broadcast(frame) = action {
                                self.broadcast(&frame);
                            }
                        }
                        let events = self.chat.record_sent(
                            &channel,
                            &text,
                            created_ts,
                            outbound.data_seqno,
                            self.env.unix_time(),
                        );
                        self.execute_chat_actions(events);
                    },
                    Err(error) => {
                        tracing::warn!(%error, %channel, "message transmit failed");
                    },
                }
            },
        }
    }

    /// Monitor-mode diagnostics: node counters and per-link metrics.
    fn log_diagnostics(&self) {
        let metrics = self.mesh.metrics();
        tracing::info!(
            neighbors = self.mesh.neighbor_count(),
            forwarded = metrics.forwarded,
            delivered = metrics.delivered,
            dedup_drops = metrics.dedup_drops,
            malformed = metrics.malformed_frames,
            ttl_expired = metrics.ttl_expired,
            events_shed = self.bus.dropped_count(),
            "mesh diagnostics"
        );
        for link in self.mux.links() {
            let snap = link.metrics.snapshot();
            tracing::info!(
                link = %link.name,
                tx_frames = snap.tx_frames,
                tx_bytes = snap.tx_bytes,
                rx_frames = snap.rx_frames,
                rx_bytes = snap.rx_bytes,
                dedup_drops = snap.dedup_drops,
                connected_since = snap.connected_since_ts,
                "link diagnostics"
            );
        }
    }

    fn run_retention(&mut self) {
        if !self.chat_config.retention.enabled {
            return;
        }
        let cutoff = self
            .env
            .unix_time()
            .saturating_sub(u64::from(self.chat_config.retention.days) * 86_400);
        match self.store.prune_older_than(cutoff) {
            Ok(0) => {},
            Ok(removed_rows) => {
                self.bus.publish(Event::PruneExecuted { removed_rows });
            },
            Err(error) => {
                tracing::warn!(%error, "retention prune failed");
            },
        }
    }

    fn broadcast(&self, frame: &skywave_proto::Frame) {
        match frame.encode_to_vec() {
            Ok(bytes) => {
                if !self.mux.send(&bytes) {
                    tracing::debug!("frame not accepted by any link");
                }
            },
            Err(error) => {
                tracing::warn!(%error, "frame encode failed");
            },
        }
    }

    fn jittered_ogm_interval(&self) -> Duration {
        let base = self.mesh_config.ogm_interval.as_millis() as u64;
        let span = base * u64::from(self.mesh_config.ogm_jitter_pct) / 100;
        if span == 0 {
            return self.mesh_config.ogm_interval;
        }
        let offset = self.env.random_u64() % (2 * span + 1);
        Duration::from_millis(base - span + offset)
    }
}
