//! In-process reference adapters for the ports that have no
//! network-facing counterpart in this core (§1: transport adapters and
//! the cluster bus are external collaborators). These back the binary
//! entry point and the test suite; a real deployment swaps them for
//! the WebSocket/Redis/Kafka equivalents the surrounding service owns.

use crate::model::{RoomId, Session, Sid, UserId};
use crate::ports::{
    AuthPort, BroadcastEvent, BroadcastTransport, ExternalBus, InternalBus, PortResult, SessionStore,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use tracing::info;

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<UserId, Session>,
    sids: DashMap<UserId, Sid>,
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, user_id: &UserId) -> PortResult<Option<Session>> {
        Ok(self.sessions.get(user_id).map(|s| s.clone()))
    }

    async fn set(&self, user_id: &UserId, session: Session) -> PortResult<()> {
        self.sessions.insert(user_id.clone(), session);
        Ok(())
    }

    async fn remove(&self, user_id: &UserId) -> PortResult<()> {
        self.sessions.remove(user_id);
        self.sids.remove(user_id);
        Ok(())
    }

    async fn sid_for_user(&self, user_id: &UserId) -> PortResult<Option<Sid>> {
        Ok(self.sids.get(user_id).map(|s| s.clone()))
    }
}

/// Logs what it's asked to broadcast; every node "owns" nothing, so
/// paired with [`SqlitePersistenceStore::owns_locally`][crate::store::SqlitePersistenceStore]
/// this makes single-node deployments behave as if everything is local.
#[derive(Default)]
pub struct LoggingBroadcast;

#[async_trait]
impl BroadcastTransport for LoggingBroadcast {
    async fn emit_to_room(
        &self,
        room_id: &RoomId,
        namespace: &str,
        event: BroadcastEvent,
        payload: &str,
    ) -> PortResult<()> {
        info!(%room_id, namespace, event = event.as_str(), payload, "emit_to_room");
        Ok(())
    }

    async fn emit_to_user(
        &self,
        sid: &Sid,
        namespace: &str,
        event: BroadcastEvent,
        payload: &str,
    ) -> PortResult<()> {
        info!(%sid, namespace, event = event.as_str(), payload, "emit_to_user");
        Ok(())
    }

    async fn disconnect(&self, sid: &Sid) -> PortResult<()> {
        info!(%sid, "disconnect");
        Ok(())
    }
}

#[derive(Default)]
pub struct LoggingExternalBus;

#[async_trait]
impl ExternalBus for LoggingExternalBus {
    async fn publish(&self, topic: &str, payload: &str) -> PortResult<()> {
        info!(topic, payload, "external bus publish");
        Ok(())
    }
}

#[derive(Default)]
pub struct LoggingInternalBus;

#[async_trait]
impl InternalBus for LoggingInternalBus {
    async fn publish(&self, topic: &str, payload: &str) -> PortResult<()> {
        info!(topic, payload, "internal bus publish");
        Ok(())
    }
}

/// Accepts any non-empty token, granting no extra session fields.
/// Token issuance itself is an explicit non-goal (§1); real deployments
/// supply their own `AuthPort` backed by whatever issued the token.
#[derive(Default)]
pub struct PermissiveAuthPort;

#[async_trait]
impl AuthPort for PermissiveAuthPort {
    async fn validate_login(
        &self,
        _user_id: &UserId,
        token: &str,
    ) -> PortResult<Option<HashMap<String, String>>> {
        if token.is_empty() {
            Ok(None)
        } else {
            Ok(Some(HashMap::new()))
        }
    }
}
