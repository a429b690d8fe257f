//! Reconnecting hub client.
//!
//! [`HubClient`] is a cheap handle onto one background task that owns the
//! socket, the pending-request table, the subscription registry, the retry
//! timer and the heartbeat. Handles talk to the task over a channel, so no
//! state is shared and nothing needs a lock.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use hearth_core::protocol::hub::encode_command;
use hearth_core::CloseCode;
use hearth_core::protocol::{HubEvent, HubMessage, StateChanged, parse_frame};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::events::{EventRegistry, SubscriptionId};
use crate::heartbeat::{Beat, Heartbeat};
use crate::mode::{ConnectionMode, ModeSignal};
use crate::pending::{CommandResult, Completion, PendingTable};
use crate::reconnect::{LinkAction, LinkEvent, LinkState, ReconnectMachine};
use crate::transport::{Link, Transport, TungsteniteTransport};

const REQUEST_BUFFER: usize = 64;

/// Raw events of one type.
pub struct EventSubscription {
    id: SubscriptionId,
    events: mpsc::UnboundedReceiver<HubEvent>,
}

impl EventSubscription {
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next event; `None` once the client task has stopped.
    pub async fn recv(&mut self) -> Option<HubEvent> {
        self.events.recv().await
    }
}

/// Decoded `state_changed` deltas for a set of entities.
pub struct EntitySubscription {
    id: SubscriptionId,
    changes: mpsc::UnboundedReceiver<StateChanged>,
}

impl EntitySubscription {
    pub const fn new(id: SubscriptionId, changes: mpsc::UnboundedReceiver<StateChanged>) -> Self {
        Self { id, changes }
    }

    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<StateChanged> {
        self.changes.recv().await
    }
}

/// What the state cache and its refresh strategies need from a hub link.
#[async_trait]
pub trait HubApi: Send + Sync + 'static {
    async fn send_command(
        &self,
        kind: &str,
        payload: Map<String, Value>,
    ) -> Result<CommandResult, ClientError>;

    /// Watch entities; an empty slice watches all of them.
    async fn subscribe_entities(
        &self,
        entity_ids: &[String],
    ) -> Result<EntitySubscription, ClientError>;

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), ClientError>;
}

enum Request {
    Connect(oneshot::Sender<Result<(), ClientError>>),
    Command {
        kind: String,
        payload: Map<String, Value>,
        completion: Completion,
    },
    SubscribeEvents {
        event_type: String,
        sink: mpsc::UnboundedSender<HubEvent>,
        reply: oneshot::Sender<SubscriptionId>,
    },
    SubscribeEntities {
        entity_ids: Vec<String>,
        sink: mpsc::UnboundedSender<StateChanged>,
        reply: oneshot::Sender<SubscriptionId>,
    },
    Unsubscribe(SubscriptionId),
    Close(oneshot::Sender<()>),
}

/// Handle to the hub client task. Clones share the same connection.
#[derive(Clone)]
pub struct HubClient {
    requests: mpsc::Sender<Request>,
    mode: ModeSignal,
}

impl HubClient {
    /// Spawn the client task. Nothing connects until [`connect`](Self::connect).
    pub fn spawn(config: ClientConfig, transport: Arc<dyn Transport>, mode: ModeSignal) -> Self {
        let (tx, rx) = mpsc::channel(REQUEST_BUFFER);
        let task = ClientTask::new(config, transport, mode.clone());
        tokio::spawn(task.run(rx));
        Self { requests: tx, mode }
    }

    /// Spawn a client over a real WebSocket.
    pub fn websocket(config: ClientConfig, mode: ModeSignal) -> Self {
        let transport = Arc::new(TungsteniteTransport::new(&config));
        Self::spawn(config, transport, mode)
    }

    /// Connect and authenticate.
    ///
    /// Resolves on `auth_ok`. Closed sockets are retried in the background
    /// with backoff. This fails on `auth_invalid`, on a relay refusal (HTTP
    /// 401/403 or a terminal close code), on exhausted attempts, or on
    /// [`close`](Self::close).
    pub async fn connect(&self) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        self.request(Request::Connect(tx)).await?;
        rx.await.map_err(|_| ClientError::Shutdown)?
    }

    /// Send `{id, type: kind, ..payload}` and wait for the matching result.
    ///
    /// Fails immediately with [`ClientError::NotConnected`] when the socket
    /// is not authenticated.
    pub async fn send_command(
        &self,
        kind: &str,
        payload: Map<String, Value>,
    ) -> Result<CommandResult, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.request(Request::Command {
            kind: kind.to_string(),
            payload,
            completion: tx,
        })
        .await?;
        rx.await.map_err(|_| ClientError::Shutdown)?
    }

    /// Listen for one event type. Survives reconnects.
    pub async fn subscribe_events(&self, event_type: &str) -> Result<EventSubscription, ClientError> {
        let (sink, events) = mpsc::unbounded_channel();
        let (tx, rx) = oneshot::channel();
        self.request(Request::SubscribeEvents {
            event_type: event_type.to_string(),
            sink,
            reply: tx,
        })
        .await?;
        let id = rx.await.map_err(|_| ClientError::Shutdown)?;
        Ok(EventSubscription { id, events })
    }

    /// Watch entity deltas. Survives reconnects.
    pub async fn subscribe_entities(
        &self,
        entity_ids: &[String],
    ) -> Result<EntitySubscription, ClientError> {
        let (sink, changes) = mpsc::unbounded_channel();
        let (tx, rx) = oneshot::channel();
        self.request(Request::SubscribeEntities {
            entity_ids: entity_ids.to_vec(),
            sink,
            reply: tx,
        })
        .await?;
        let id = rx.await.map_err(|_| ClientError::Shutdown)?;
        Ok(EntitySubscription::new(id, changes))
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), ClientError> {
        self.request(Request::Unsubscribe(id)).await
    }

    /// Close the socket and stop retrying. Pending commands fail with
    /// [`ClientError::Disconnected`]. A later `connect` starts over.
    pub async fn close(&self) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        self.request(Request::Close(tx)).await?;
        rx.await.map_err(|_| ClientError::Shutdown)
    }

    pub fn mode(&self) -> ConnectionMode {
        self.mode.get()
    }

    pub const fn mode_signal(&self) -> &ModeSignal {
        &self.mode
    }

    async fn request(&self, request: Request) -> Result<(), ClientError> {
        self.requests
            .send(request)
            .await
            .map_err(|_| ClientError::Shutdown)
    }
}

#[async_trait]
impl HubApi for HubClient {
    async fn send_command(
        &self,
        kind: &str,
        payload: Map<String, Value>,
    ) -> Result<CommandResult, ClientError> {
        Self::send_command(self, kind, payload).await
    }

    async fn subscribe_entities(
        &self,
        entity_ids: &[String],
    ) -> Result<EntitySubscription, ClientError> {
        Self::subscribe_entities(self, entity_ids).await
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), ClientError> {
        Self::unsubscribe(self, id).await
    }
}

struct ClientTask {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    machine: ReconnectMachine,
    pending: PendingTable,
    events: EventRegistry,
    heartbeat: Heartbeat,
    heartbeat_timer: Interval,
    mode: ModeSignal,
    link: Option<Link>,
    retry: Option<Pin<Box<Sleep>>>,
    connect_waiters: Vec<oneshot::Sender<Result<(), ClientError>>>,
    /// Event type -> id of its `subscribe_events` on the current link.
    hub_subscriptions: HashMap<String, u64>,
}

impl ClientTask {
    fn new(config: ClientConfig, transport: Arc<dyn Transport>, mode: ModeSignal) -> Self {
        let period = config.heartbeat.interval;
        let mut heartbeat_timer = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            machine: ReconnectMachine::new(config.reconnect.clone()),
            pending: PendingTable::new(config.request_timeout),
            events: EventRegistry::new(),
            heartbeat: Heartbeat::new(config.heartbeat.clone()),
            heartbeat_timer,
            mode,
            link: None,
            retry: None,
            connect_waiters: Vec::new(),
            hub_subscriptions: HashMap::new(),
            config,
            transport,
        }
    }

    async fn run(mut self, mut requests: mpsc::Receiver<Request>) {
        loop {
            let deadline = self.pending.next_deadline();
            let active = self.machine.state() == LinkState::Active;

            tokio::select! {
                request = requests.recv() => {
                    let Some(request) = request else {
                        self.apply(LinkEvent::Shutdown).await;
                        debug!("All client handles dropped");
                        return;
                    };
                    self.on_request(request).await;
                }
                frame = recv_frame(&mut self.link) => match frame {
                    Some(text) => self.on_frame(&text).await,
                    None => {
                        let code = self.link.take().and_then(|mut link| link.close_code());
                        info!(code = ?code, "Hub socket closed");
                        self.apply(close_event(code)).await;
                    }
                },
                () = wait_retry(&mut self.retry) => {
                    self.retry = None;
                    self.apply(LinkEvent::RetryTimerFired).await;
                }
                _ = self.heartbeat_timer.tick(), if active => self.on_heartbeat().await,
                () = wait_deadline(deadline) => {
                    let expired = self.pending.expire(Instant::now());
                    if !expired.is_empty() {
                        warn!(count = expired.len(), "Commands timed out");
                    }
                }
            }
        }
    }

    /// Feed an event through the state machine, performing its actions and
    /// any follow-up events they produce.
    async fn apply(&mut self, event: LinkEvent) {
        let mut queue = vec![event];
        while let Some(event) = queue.pop() {
            for action in self.machine.on_event(event) {
                if let Some(next) = self.perform(action).await {
                    queue.push(next);
                }
            }
        }
    }

    async fn perform(&mut self, action: LinkAction) -> Option<LinkEvent> {
        match action {
            LinkAction::OpenSocket => match self.transport.open().await {
                Ok(link) => {
                    self.link = Some(link);
                    return Some(LinkEvent::Opened);
                }
                Err(e) if e.is_terminal() => {
                    warn!(error = %e, "Relay refused the connection");
                    return Some(LinkEvent::Rejected(e));
                }
                Err(e) => {
                    warn!(error = %e, attempt = self.machine.attempt(), "Hub connection failed");
                    return Some(LinkEvent::Closed);
                }
            },
            LinkAction::CloseSocket => {
                self.link = None;
                self.hub_subscriptions.clear();
            }
            LinkAction::SendAuth => {
                let auth = HubMessage::Auth {
                    access_token: self.config.access_token.clone(),
                };
                match auth.encode() {
                    Ok(frame) => {
                        self.send_text(frame).await;
                    }
                    Err(e) => warn!(error = %e, "Failed to encode auth frame"),
                }
            }
            LinkAction::ResolveConnect => {
                info!("Hub connection authenticated");
                for waiter in self.connect_waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
            }
            LinkAction::RejectConnect(error) => {
                if !self.connect_waiters.is_empty() {
                    warn!(error = %error, "Connect failed");
                }
                for waiter in self.connect_waiters.drain(..) {
                    let _ = waiter.send(Err(error.clone()));
                }
            }
            LinkAction::FlushSubscriptions => {
                for event_type in self.events.event_types() {
                    self.subscribe_upstream(&event_type).await;
                }
            }
            LinkAction::FailPending => {
                let failed = self.pending.fail_all(&ClientError::Disconnected);
                if failed > 0 {
                    debug!(failed, "Failed pending commands on disconnect");
                }
            }
            LinkAction::ScheduleRetry(delay) => {
                info!(
                    attempt = self.machine.attempt(),
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Reconnecting"
                );
                self.retry = Some(Box::pin(tokio::time::sleep(delay)));
            }
            LinkAction::CancelRetry => self.retry = None,
            LinkAction::StartHeartbeat => {
                self.heartbeat.reset();
                self.heartbeat_timer.reset();
            }
            LinkAction::StopHeartbeat => self.heartbeat.reset(),
            LinkAction::SetMode(mode) => {
                if self.mode.set(mode) {
                    debug!(mode = %mode, "Connection mode changed");
                }
            }
        }
        None
    }

    async fn on_request(&mut self, request: Request) {
        let active = self.machine.state() == LinkState::Active;
        match request {
            Request::Connect(reply) => {
                if active {
                    let _ = reply.send(Ok(()));
                    return;
                }
                self.connect_waiters.push(reply);
                self.apply(LinkEvent::Connect).await;
            }
            Request::Command {
                kind,
                payload,
                completion,
            } => {
                if !active {
                    let _ = completion.send(Err(ClientError::NotConnected));
                    return;
                }
                let id = self.pending.register(completion);
                match encode_command(id, &kind, &payload) {
                    Ok(frame) => {
                        if !self.send_text(frame).await {
                            self.pending.resolve(id, Err(ClientError::Disconnected));
                        }
                    }
                    Err(e) => {
                        self.pending.resolve(id, Err(e.into()));
                    }
                }
            }
            Request::SubscribeEvents {
                event_type,
                sink,
                reply,
            } => {
                let (id, needed) = self.events.subscribe(&event_type, sink);
                if let Some(event_type) = needed.filter(|_| active) {
                    self.subscribe_upstream(&event_type).await;
                }
                let _ = reply.send(id);
            }
            Request::SubscribeEntities {
                entity_ids,
                sink,
                reply,
            } => {
                let (id, needed) = self.events.subscribe_entities(&entity_ids, sink);
                if let Some(event_type) = needed.filter(|_| active) {
                    self.subscribe_upstream(&event_type).await;
                }
                let _ = reply.send(id);
            }
            Request::Unsubscribe(id) => {
                if let Some(event_type) = self.events.unsubscribe(id).filter(|_| active) {
                    self.unsubscribe_upstream(&event_type).await;
                }
            }
            Request::Close(reply) => {
                self.apply(LinkEvent::Shutdown).await;
                let _ = reply.send(());
            }
        }
    }

    async fn on_frame(&mut self, text: &str) {
        let msg = match parse_frame(text) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(error = %e, "Ignoring malformed frame");
                return;
            }
        };

        match msg {
            HubMessage::AuthRequired { .. } => self.apply(LinkEvent::AuthRequired).await,
            HubMessage::AuthOk { .. } => self.apply(LinkEvent::AuthOk).await,
            HubMessage::AuthInvalid { message } => {
                let message = message.unwrap_or_default();
                warn!(message = %message, "Hub rejected authentication");
                self.apply(LinkEvent::Rejected(ClientError::AuthInvalid(message)))
                    .await;
            }
            HubMessage::Result {
                id,
                success,
                result,
                error,
            } => {
                let outcome = CommandResult {
                    success,
                    result,
                    error,
                };
                if !self.pending.resolve(id, Ok(outcome)) {
                    debug!(id, "Dropping result for unknown id");
                }
            }
            HubMessage::Event { event, .. } => {
                self.events.dispatch(&event);
            }
            HubMessage::Pong { id } => self.heartbeat.on_pong(id),
            HubMessage::Ping { id } => {
                if let Ok(frame) = (HubMessage::Pong { id }).encode() {
                    self.send_text(frame).await;
                }
            }
            HubMessage::Auth { .. } | HubMessage::Unknown { .. } => {}
        }
    }

    async fn on_heartbeat(&mut self) {
        match self.heartbeat.on_tick() {
            Beat::Ping => {
                let id = self.pending.next_id();
                self.heartbeat.sent(id);
                if let Ok(frame) = (HubMessage::Ping { id: Some(id) }).encode() {
                    self.send_text(frame).await;
                }
            }
            Beat::Dead { missed } => {
                warn!(missed, "Heartbeat lost, dropping socket");
                self.apply(LinkEvent::Closed).await;
            }
        }
    }

    async fn subscribe_upstream(&mut self, event_type: &str) {
        let id = self.pending.next_id();
        let mut payload = Map::new();
        payload.insert("event_type".into(), Value::from(event_type));
        match encode_command(id, "subscribe_events", &payload) {
            Ok(frame) => {
                if self.send_text(frame).await {
                    debug!(event_type, id, "Subscribed to hub events");
                    self.hub_subscriptions.insert(event_type.to_string(), id);
                }
            }
            Err(e) => warn!(error = %e, event_type, "Failed to encode subscribe_events"),
        }
    }

    async fn unsubscribe_upstream(&mut self, event_type: &str) {
        let Some(subscription) = self.hub_subscriptions.remove(event_type) else {
            return;
        };
        let id = self.pending.next_id();
        let mut payload = Map::new();
        payload.insert("subscription".into(), Value::from(subscription));
        match encode_command(id, "unsubscribe_events", &payload) {
            Ok(frame) => {
                self.send_text(frame).await;
            }
            Err(e) => warn!(error = %e, event_type, "Failed to encode unsubscribe_events"),
        }
    }

    /// Queue a frame on the current link. False when there is none.
    async fn send_text(&mut self, frame: String) -> bool {
        match &self.link {
            Some(link) => link.outbound.send(frame).await.is_ok(),
            None => false,
        }
    }
}

/// Terminal relay close codes end the session; everything else is retried.
fn close_event(code: Option<u16>) -> LinkEvent {
    match code.and_then(CloseCode::from_code) {
        Some(CloseCode::HubAuthFailed) => {
            LinkEvent::Rejected(ClientError::AuthInvalid(CloseCode::HubAuthFailed.to_string()))
        }
        Some(code) if code.is_terminal() => {
            LinkEvent::Rejected(ClientError::Rejected(code.to_string()))
        }
        _ => LinkEvent::Closed,
    }
}

async fn recv_frame(link: &mut Option<Link>) -> Option<String> {
    match link {
        Some(link) => link.inbound.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_retry(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
