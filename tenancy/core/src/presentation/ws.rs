// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! WebSocket message channel.
//!
//! Frames are JSON objects tagged by `type`:
//!
//! | Client | Server |
//! |--------|--------|
//! | `SUBSCRIBE {destination}` | `CONNECTED`, `SUBSCRIBED`, `UNSUBSCRIBED` |
//! | `UNSUBSCRIBE {destination}` | `RECEIPT`, `MESSAGE` |
//! | `SEND {destination, payload}` | `ERROR {message, destination?}` |
//!
//! The tenant is bound once at connect time from the authenticated principal.
//! Each inbound frame is processed as its own unit of work. A rejected frame
//! produces an `ERROR` frame and the connection stays open.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{IntoResponse, Response},
    routing::get,
    Extension, Router,
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::application::message_channel_guard::{ConnectionId, MessageChannelGuard};
use crate::domain::audit::AuditOperation;
use crate::domain::errors::TenancyError;
use crate::domain::principal::Principal;
use crate::domain::tenant::TenantId;
use crate::domain::tenant_context;
use crate::infrastructure::broker::{BrokerMessage, TopicBroker};

const OUTBOUND_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientFrame {
    Subscribe {
        destination: String,
    },
    Unsubscribe {
        destination: String,
    },
    Send {
        destination: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerFrame {
    Connected {
        connection_id: String,
        tenant_id: TenantId,
    },
    Subscribed {
        destination: String,
    },
    Unsubscribed {
        destination: String,
    },
    Receipt {
        destination: String,
    },
    Message {
        destination: String,
        sender: String,
        payload: serde_json::Value,
        published_at: DateTime<Utc>,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        destination: Option<String>,
    },
}

impl ServerFrame {
    fn rejected(error: &TenancyError, destination: Option<String>) -> Self {
        Self::Error {
            message: error.client_message().to_string(),
            destination,
        }
    }
}

#[derive(Clone)]
pub struct ChannelState {
    pub guard: Arc<MessageChannelGuard>,
    pub broker: Arc<TopicBroker>,
}

/// One bound connection: its subscriptions and outbound queue.
pub struct ChannelSession {
    state: ChannelState,
    connection_id: ConnectionId,
    outbound: mpsc::Sender<ServerFrame>,
    subscriptions: HashMap<String, JoinHandle<()>>,
}

impl ChannelSession {
    /// Bind the connection. Nothing is sent on failure.
    pub async fn open(
        state: ChannelState,
        principal: &Principal,
        outbound: mpsc::Sender<ServerFrame>,
    ) -> Result<Self, TenancyError> {
        let connection_id = ConnectionId::new();
        let binding = state.guard.on_connect(connection_id, principal).await?;

        let session = Self {
            state,
            connection_id,
            outbound,
            subscriptions: HashMap::new(),
        };
        session
            .send(ServerFrame::Connected {
                connection_id: connection_id.to_string(),
                tenant_id: binding.tenant_id,
            })
            .await;
        Ok(session)
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub async fn handle_text(&mut self, text: &str) {
        match serde_json::from_str::<ClientFrame>(text) {
            Ok(frame) => self.handle_frame(frame).await,
            Err(e) => {
                debug!(connection_id = %self.connection_id, error = %e, "malformed frame");
                self.send(ServerFrame::Error {
                    message: "malformed frame".to_string(),
                    destination: None,
                })
                .await;
            }
        }
    }

    pub async fn handle_frame(&mut self, frame: ClientFrame) {
        let guard = self.state.guard.clone();
        let connection_id = self.connection_id;
        let reply = match guard.dispatch(connection_id, self.apply(frame)).await {
            Ok(reply) => reply,
            Err(e) => ServerFrame::rejected(&e, None),
        };
        self.send(reply).await;
    }

    async fn apply(&mut self, frame: ClientFrame) -> ServerFrame {
        match frame {
            ClientFrame::Subscribe { destination } => {
                let authorized = match self.state.guard.authorize_destination(
                    self.connection_id,
                    &destination,
                    AuditOperation::Subscribe,
                ) {
                    Ok(authorized) => authorized,
                    Err(e) => return ServerFrame::rejected(&e, Some(destination)),
                };
                if !self.subscriptions.contains_key(&destination) {
                    let forwarder = spawn_forwarder(
                        self.connection_id,
                        self.state.broker.clone(),
                        authorized.routing_key,
                        destination.clone(),
                        self.outbound.clone(),
                    );
                    self.subscriptions.insert(destination.clone(), forwarder);
                }
                ServerFrame::Subscribed { destination }
            }
            ClientFrame::Unsubscribe { destination } => {
                if let Some(forwarder) = self.subscriptions.remove(&destination) {
                    forwarder.abort();
                }
                ServerFrame::Unsubscribed { destination }
            }
            ClientFrame::Send { destination, payload } => {
                let authorized = match self.state.guard.authorize_destination(
                    self.connection_id,
                    &destination,
                    AuditOperation::Publish,
                ) {
                    Ok(authorized) => authorized,
                    Err(e) => return ServerFrame::rejected(&e, Some(destination)),
                };
                let sender = self
                    .state
                    .guard
                    .binding(self.connection_id)
                    .map(|binding| binding.subject)
                    .unwrap_or_default();
                let delivered = self.state.broker.publish(BrokerMessage {
                    destination: authorized.routing_key,
                    sender,
                    payload,
                    published_at: Utc::now(),
                });
                debug!(
                    connection_id = %self.connection_id,
                    tenant_id = ?tenant_context::current_tenant(),
                    delivered,
                    "message published"
                );
                ServerFrame::Receipt { destination }
            }
        }
    }

    async fn send(&self, frame: ServerFrame) {
        if self.outbound.send(frame).await.is_err() {
            debug!(connection_id = %self.connection_id, "outbound queue closed");
        }
    }

    /// Stop all subscriptions and release the binding.
    pub fn close(mut self) {
        for (_, forwarder) in self.subscriptions.drain() {
            forwarder.abort();
        }
        self.state.guard.on_disconnect(self.connection_id);
    }
}

/// Forward one topic to the connection. The topic is released from the broker
/// when the forwarder ends, including when it is aborted.
fn spawn_forwarder(
    connection_id: ConnectionId,
    broker: Arc<TopicBroker>,
    routing_key: String,
    destination: String,
    outbound: mpsc::Sender<ServerFrame>,
) -> JoinHandle<()> {
    let receiver = broker.subscribe(&routing_key);
    tokio::spawn(async move {
        let mut receiver = scopeguard::guard(receiver, move |receiver| {
            drop(receiver);
            broker.release(&routing_key);
        });
        loop {
            match receiver.recv().await {
                Ok(message) => {
                    let frame = ServerFrame::Message {
                        destination: destination.clone(),
                        sender: message.sender,
                        payload: message.payload,
                        published_at: message.published_at,
                    };
                    if outbound.send(frame).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(connection_id = %connection_id, skipped, "subscriber lagged; messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

pub async fn ws_handler(
    State(state): State<ChannelState>,
    principal: Option<Extension<Principal>>,
    upgrade: WebSocketUpgrade,
) -> Response {
    let Some(Extension(principal)) = principal else {
        return TenancyError::MissingTenantContext.into_response();
    };
    upgrade.on_upgrade(move |socket| run_socket(state, socket, principal))
}

async fn run_socket(state: ChannelState, socket: WebSocket, principal: Principal) {
    let (mut sink, mut stream) = socket.split();
    let (outbound, mut queue) = mpsc::channel::<ServerFrame>(OUTBOUND_BUFFER);

    let writer = tokio::spawn(async move {
        while let Some(frame) = queue.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "failed to encode frame");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut session = match ChannelSession::open(state, &principal, outbound.clone()).await {
        Ok(session) => session,
        Err(e) => {
            let _ = outbound.send(ServerFrame::rejected(&e, None)).await;
            drop(outbound);
            let _ = writer.await;
            return;
        }
    };
    drop(outbound);

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => session.handle_text(text.as_str()).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(connection_id = %session.connection_id(), error = %e, "socket error");
                break;
            }
        }
    }

    session.close();
    let _ = writer.await;
}

/// `GET /ws`. Must sit behind the `authenticate` middleware.
pub fn channel_router(state: ChannelState) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::context_propagation::ContextPropagationFilter;
    use crate::domain::tenancy_config::ChannelConfig;
    use crate::domain::tenant::TenantStatus;
    use crate::infrastructure::audit::InMemoryAuditSink;
    use crate::infrastructure::tenant_directory::InMemoryTenantDirectory;
    use std::time::Duration;

    struct Fixture {
        state: ChannelState,
        audit: Arc<InMemoryAuditSink>,
        tenant_a: TenantId,
        tenant_b: TenantId,
        suspended: TenantId,
    }

    fn fixture() -> Fixture {
        let (tenant_a, tenant_b, suspended) = (TenantId::new(), TenantId::new(), TenantId::new());
        let directory = Arc::new(InMemoryTenantDirectory::new());
        directory.insert(tenant_a, "Lincoln High", TenantStatus::Active);
        directory.insert(tenant_b, "Oak Elementary", TenantStatus::Active);
        directory.insert(suspended, "Closed Campus", TenantStatus::Suspended);

        let audit = Arc::new(InMemoryAuditSink::new());
        let filter = Arc::new(ContextPropagationFilter::new(directory, audit.clone(), TenantId::new()));
        let guard = Arc::new(MessageChannelGuard::new(filter, audit.clone(), ChannelConfig::default()));
        Fixture {
            state: ChannelState {
                guard,
                broker: Arc::new(TopicBroker::default()),
            },
            audit,
            tenant_a,
            tenant_b,
            suspended,
        }
    }

    async fn open(state: &ChannelState, principal: Principal) -> (ChannelSession, mpsc::Receiver<ServerFrame>) {
        let (tx, mut rx) = mpsc::channel(16);
        let session = ChannelSession::open(state.clone(), &principal, tx).await.unwrap();
        assert!(matches!(next(&mut rx).await, ServerFrame::Connected { .. }));
        (session, rx)
    }

    async fn next(rx: &mut mpsc::Receiver<ServerFrame>) -> ServerFrame {
        tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap()
    }

    fn subscribe(destination: &str) -> ClientFrame {
        ClientFrame::Subscribe {
            destination: destination.to_string(),
        }
    }

    #[tokio::test]
    async fn test_tenant_topic_delivery_stays_within_tenant() {
        let f = fixture();
        let topic = format!("/topic/tenant/{}/work-orders", f.tenant_a);

        let (mut listener, mut listener_rx) = open(&f.state, Principal::human("alice", f.tenant_a)).await;
        listener.handle_frame(subscribe(&topic)).await;
        assert_eq!(next(&mut listener_rx).await, ServerFrame::Subscribed { destination: topic.clone() });

        let (mut publisher, mut publisher_rx) = open(&f.state, Principal::human("bob", f.tenant_a)).await;
        publisher
            .handle_text(&format!(r#"{{"type":"SEND","destination":"{topic}","payload":{{"id":7}}}}"#))
            .await;
        assert_eq!(next(&mut publisher_rx).await, ServerFrame::Receipt { destination: topic.clone() });

        match next(&mut listener_rx).await {
            ServerFrame::Message { destination, sender, payload, .. } => {
                assert_eq!(destination, topic);
                assert_eq!(sender, "bob");
                assert_eq!(payload, serde_json::json!({ "id": 7 }));
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_foreign_tenant_subscription_is_rejected_and_connection_survives() {
        let f = fixture();
        let (mut session, mut rx) = open(&f.state, Principal::human("alice", f.tenant_a)).await;

        let foreign = format!("/topic/tenant/{}/alerts", f.tenant_b);
        session.handle_frame(subscribe(&foreign)).await;
        assert_eq!(
            next(&mut rx).await,
            ServerFrame::Error {
                message: "access denied".to_string(),
                destination: Some(foreign),
            }
        );
        assert_eq!(session.subscription_count(), 0);

        let own = format!("/topic/tenant/{}/alerts", f.tenant_a);
        session.handle_frame(subscribe(&own)).await;
        assert_eq!(next(&mut rx).await, ServerFrame::Subscribed { destination: own });
        assert_eq!(session.subscription_count(), 1);
        assert!(!f.audit.denied().is_empty());
    }

    #[tokio::test]
    async fn test_foreign_send_is_not_delivered() {
        let f = fixture();
        let foreign = format!("/topic/tenant/{}/alerts", f.tenant_b);
        let (mut victim, mut victim_rx) = open(&f.state, Principal::human("carol", f.tenant_b)).await;
        victim.handle_frame(subscribe(&foreign)).await;
        assert!(matches!(next(&mut victim_rx).await, ServerFrame::Subscribed { .. }));

        let (mut attacker, mut attacker_rx) = open(&f.state, Principal::human("mallory", f.tenant_a)).await;
        attacker
            .handle_frame(ClientFrame::Send {
                destination: foreign,
                payload: serde_json::json!("spoof"),
            })
            .await;
        assert!(matches!(next(&mut attacker_rx).await, ServerFrame::Error { .. }));
        assert!(tokio::time::timeout(Duration::from_millis(100), victim_rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_other_users_private_queue_is_rejected() {
        let f = fixture();
        let (mut session, mut rx) = open(&f.state, Principal::human("alice", f.tenant_a)).await;

        session.handle_frame(subscribe("/user/bob/queue/notifications")).await;
        assert!(matches!(next(&mut rx).await, ServerFrame::Error { .. }));

        session.handle_frame(subscribe("/user/alice/queue/notifications")).await;
        assert!(matches!(next(&mut rx).await, ServerFrame::Subscribed { .. }));
    }

    #[tokio::test]
    async fn test_malformed_frame_gets_error() {
        let f = fixture();
        let (mut session, mut rx) = open(&f.state, Principal::human("alice", f.tenant_a)).await;
        session.handle_text("{\"type\":\"PING\"}").await;
        assert_eq!(
            next(&mut rx).await,
            ServerFrame::Error {
                message: "malformed frame".to_string(),
                destination: None,
            }
        );
    }

    #[tokio::test]
    async fn test_suspended_tenant_cannot_connect() {
        let f = fixture();
        let (tx, _rx) = mpsc::channel(4);
        let result = ChannelSession::open(f.state.clone(), &Principal::human("dave", f.suspended), tx).await;
        assert!(matches!(result, Err(TenancyError::InactiveTenant)));
        assert_eq!(f.state.guard.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_close_releases_binding() {
        let f = fixture();
        let (session, _rx) = open(&f.state, Principal::human("alice", f.tenant_a)).await;
        let id = session.connection_id();
        assert!(f.state.guard.binding(id).is_some());

        session.close();
        assert!(f.state.guard.binding(id).is_none());
    }

    async fn wait_for_topics(broker: &TopicBroker, expected: usize) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while broker.topic_count() != expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_user_queue_does_not_cross_tenants_for_equal_subjects() {
        let f = fixture();
        let queue = "/user/alice/queue/notifications";

        let (mut alice_a, mut alice_a_rx) = open(&f.state, Principal::human("alice", f.tenant_a)).await;
        let (mut alice_b, mut alice_b_rx) = open(&f.state, Principal::human("alice", f.tenant_b)).await;
        alice_a.handle_frame(subscribe(queue)).await;
        alice_b.handle_frame(subscribe(queue)).await;
        assert!(matches!(next(&mut alice_a_rx).await, ServerFrame::Subscribed { .. }));
        assert!(matches!(next(&mut alice_b_rx).await, ServerFrame::Subscribed { .. }));

        alice_a
            .handle_frame(ClientFrame::Send {
                destination: queue.to_string(),
                payload: serde_json::json!({ "work_order": 12 }),
            })
            .await;

        let mut seen_message = false;
        for _ in 0..2 {
            match next(&mut alice_a_rx).await {
                ServerFrame::Message { destination, .. } => {
                    assert_eq!(destination, queue);
                    seen_message = true;
                }
                ServerFrame::Receipt { .. } => {}
                other => panic!("unexpected frame {other:?}"),
            }
        }
        assert!(seen_message);
        assert!(tokio::time::timeout(Duration::from_millis(100), alice_b_rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_and_close_release_broker_topics() {
        let f = fixture();
        let (mut session, mut rx) = open(&f.state, Principal::human("alice", f.tenant_a)).await;

        for i in 0..3 {
            session.handle_frame(subscribe(&format!("/topic/broadcast/room-{i}"))).await;
            assert!(matches!(next(&mut rx).await, ServerFrame::Subscribed { .. }));
        }
        assert_eq!(f.state.broker.topic_count(), 3);

        session
            .handle_frame(ClientFrame::Unsubscribe {
                destination: "/topic/broadcast/room-0".to_string(),
            })
            .await;
        assert!(matches!(next(&mut rx).await, ServerFrame::Unsubscribed { .. }));
        wait_for_topics(&f.state.broker, 2).await;

        session.close();
        wait_for_topics(&f.state.broker, 0).await;
    }
}
