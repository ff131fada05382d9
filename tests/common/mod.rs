//! Shared fakes for integration tests: one in-memory implementation per
//! port, built the same way the unit tests under `src/` mock them, but
//! exposed here so whole-crate scenarios don't need private-field access.

#![allow(dead_code)]

use async_trait::async_trait;
use dashmap::DashMap;
use dino_core::model::{AclAction, AclRule, Actor, Ban, Obj, Scope, Session, Sid, Target, UserId};
use dino_core::ports::{
    AuthPort, BroadcastEvent, BroadcastTransport, ExternalBus, InternalBus, PersistenceStore,
    PortResult, SessionStore,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Default)]
pub struct FakeSessions {
    pub sessions: DashMap<UserId, Session>,
    pub sids: DashMap<UserId, Sid>,
}

#[async_trait]
impl SessionStore for FakeSessions {
    async fn get(&self, user_id: &UserId) -> PortResult<Option<Session>> {
        Ok(self.sessions.get(user_id).map(|s| s.clone()))
    }
    async fn set(&self, user_id: &UserId, session: Session) -> PortResult<()> {
        self.sessions.insert(user_id.clone(), session);
        Ok(())
    }
    async fn remove(&self, user_id: &UserId) -> PortResult<()> {
        self.sessions.remove(user_id);
        Ok(())
    }
    async fn sid_for_user(&self, user_id: &UserId) -> PortResult<Option<Sid>> {
        Ok(self.sids.get(user_id).map(|s| s.clone()))
    }
}

#[derive(Default)]
pub struct FakePersistence {
    pub bans: DashMap<String, Ban>,
    pub rooms: DashMap<String, String>,
    pub channels: DashMap<String, ()>,
    pub owners: DashMap<(String, String), bool>,
    pub admins: DashMap<String, bool>,
    pub members: DashMap<String, Vec<String>>,
    pub rooms_by_user: DashMap<String, Vec<String>>,
    pub rooms_by_channel: DashMap<String, Vec<String>>,
    pub local_owner: AtomicBool,
    pub cache: DashMap<String, i64>,
    pub bans_inserted: AtomicUsize,
    pub offline_marks: AtomicUsize,
    pub memberships_removed: AtomicUsize,
    pub super_users: DashMap<String, bool>,
    pub messages_purged_rooms: DashMap<String, usize>,
}

#[async_trait]
impl PersistenceStore for FakePersistence {
    async fn is_banned(&self, user_id: &UserId, scope: Scope, scope_id: Option<&str>) -> PortResult<Option<Ban>> {
        let key = format!("{user_id}:{scope:?}:{scope_id:?}");
        Ok(self.bans.get(&key).map(|b| b.clone()))
    }
    async fn insert_ban(&self, ban: &Ban) -> PortResult<()> {
        let key = format!("{}:{:?}:{:?}", ban.banned_id, ban.scope, ban.scope_id);
        self.bans.insert(key, ban.clone());
        self.bans_inserted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    async fn acl_rules_for(&self, _scope_id: &str, _action: AclAction) -> PortResult<Vec<AclRule>> {
        Ok(vec![])
    }
    async fn set_acl_rule(&self, _rule: &AclRule) -> PortResult<()> {
        Ok(())
    }
    async fn room_exists(&self, room_id: &UserId) -> PortResult<bool> {
        Ok(self.rooms.contains_key(room_id))
    }
    async fn channel_exists(&self, channel_id: &UserId) -> PortResult<bool> {
        Ok(self.channels.contains_key(channel_id))
    }
    async fn room_name_exists(&self, _channel_id: &UserId, room_name: &str) -> PortResult<bool> {
        Ok(self.rooms.iter().any(|r| r.value() == room_name))
    }
    async fn is_owner(&self, user_id: &UserId, scope: Scope, scope_id: &str) -> PortResult<bool> {
        Ok(*self
            .owners
            .get(&(user_id.clone(), format!("{scope:?}:{scope_id}")))
            .as_deref()
            .unwrap_or(&false))
    }
    async fn is_moderator(&self, _user_id: &UserId, _room_id: &UserId) -> PortResult<bool> {
        Ok(false)
    }
    async fn is_admin(&self, user_id: &UserId) -> PortResult<bool> {
        Ok(*self.admins.get(user_id).as_deref().unwrap_or(&false))
    }
    async fn is_super_user(&self, user_id: &UserId) -> PortResult<bool> {
        Ok(*self.super_users.get(user_id).as_deref().unwrap_or(&false))
    }
    async fn is_message_author(&self, _user_id: &UserId, _message_id: &str) -> PortResult<bool> {
        Ok(false)
    }
    async fn users_in_room(&self, room_id: &UserId) -> PortResult<Vec<UserId>> {
        Ok(self.members.get(room_id).map(|m| m.clone()).unwrap_or_default())
    }
    async fn rooms_in_channel(&self, channel_id: &UserId) -> PortResult<Vec<UserId>> {
        Ok(self.rooms_by_channel.get(channel_id).map(|r| r.clone()).unwrap_or_default())
    }
    async fn rooms_for_user(&self, user_id: &UserId) -> PortResult<Vec<UserId>> {
        Ok(self.rooms_by_user.get(user_id).map(|r| r.clone()).unwrap_or_default())
    }
    async fn remove_user_from_room(&self, user_id: &UserId, room_id: &UserId) -> PortResult<()> {
        if let Some(mut members) = self.members.get_mut(room_id) {
            members.retain(|u| u != user_id);
        }
        self.memberships_removed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    async fn delete_room(&self, room_id: &UserId) -> PortResult<()> {
        self.rooms.remove(room_id);
        self.members.remove(room_id);
        Ok(())
    }
    async fn delete_undeleted_messages_for_user_in_room(
        &self,
        _user_id: &UserId,
        room_id: &UserId,
    ) -> PortResult<()> {
        *self.messages_purged_rooms.entry(room_id.clone()).or_insert(0) += 1;
        Ok(())
    }
    async fn mark_offline(&self, _user_id: &UserId) -> PortResult<()> {
        self.offline_marks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    async fn owns_locally(&self, _user_id: &UserId) -> PortResult<bool> {
        Ok(self.local_owner.load(Ordering::SeqCst))
    }
    async fn count_distinct_users_in_rooms(&self) -> PortResult<i64> {
        let mut all: Vec<String> = Vec::new();
        for entry in self.members.iter() {
            all.extend(entry.value().iter().cloned());
        }
        all.sort();
        all.dedup();
        Ok(all.len() as i64)
    }
    async fn write_cache(&self, key: &str, value: i64) -> PortResult<()> {
        self.cache.insert(key.to_string(), value);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeBroadcast {
    pub room_emits: AtomicUsize,
    pub user_emits: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub room_events: DashMap<&'static str, usize>,
    pub user_events: DashMap<&'static str, usize>,
}

#[async_trait]
impl BroadcastTransport for FakeBroadcast {
    async fn emit_to_room(
        &self,
        _room_id: &UserId,
        _namespace: &str,
        event: BroadcastEvent,
        _payload: &str,
    ) -> PortResult<()> {
        self.room_emits.fetch_add(1, Ordering::SeqCst);
        *self.room_events.entry(event.as_str()).or_insert(0) += 1;
        Ok(())
    }
    async fn emit_to_user(
        &self,
        _sid: &Sid,
        _namespace: &str,
        event: BroadcastEvent,
        _payload: &str,
    ) -> PortResult<()> {
        self.user_emits.fetch_add(1, Ordering::SeqCst);
        *self.user_events.entry(event.as_str()).or_insert(0) += 1;
        Ok(())
    }
    async fn disconnect(&self, _sid: &Sid) -> PortResult<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeBus {
    pub published: AtomicUsize,
    pub topics: DashMap<String, usize>,
}

#[async_trait]
impl ExternalBus for FakeBus {
    async fn publish(&self, topic: &str, _payload: &str) -> PortResult<()> {
        self.published.fetch_add(1, Ordering::SeqCst);
        *self.topics.entry(topic.to_string()).or_insert(0) += 1;
        Ok(())
    }
}

#[async_trait]
impl InternalBus for FakeBus {
    async fn publish(&self, topic: &str, _payload: &str) -> PortResult<()> {
        self.published.fetch_add(1, Ordering::SeqCst);
        *self.topics.entry(topic.to_string()).or_insert(0) += 1;
        Ok(())
    }
}

pub struct FakeAuth {
    pub valid_token: String,
}

impl Default for FakeAuth {
    fn default() -> Self {
        FakeAuth { valid_token: "good".to_string() }
    }
}

#[async_trait]
impl AuthPort for FakeAuth {
    async fn validate_login(&self, _user_id: &UserId, token: &str) -> PortResult<Option<HashMap<String, String>>> {
        if token == self.valid_token {
            Ok(Some(HashMap::new()))
        } else {
            Ok(None)
        }
    }
}

pub fn ban_activity(banned_id: &str, room: Option<&str>, object_type: Option<&str>, duration: &str) -> dino_core::model::ActivityEnvelope {
    dino_core::model::ActivityEnvelope {
        id: "ban-1".into(),
        actor: Actor { id: "mod1".into(), ..Default::default() },
        verb: "ban".into(),
        object: Obj {
            id: Some(banned_id.to_string()),
            summary: Some(duration.to_string()),
            ..Default::default()
        },
        target: Target {
            id: room.map(String::from),
            object_type: object_type.map(String::from),
            ..Default::default()
        },
        published: "".into(),
    }
}

pub fn envelope(verb: &str, actor_id: &str) -> dino_core::model::ActivityEnvelope {
    dino_core::model::ActivityEnvelope {
        id: "a1".into(),
        actor: Actor { id: actor_id.into(), ..Default::default() },
        verb: verb.into(),
        object: Obj::default(),
        target: Target::default(),
        published: "".into(),
    }
}

pub fn test_config() -> dino_core::config::Config {
    use dino_core::config::{AclAvailable, AclSection, CacheSection, Config, DatabaseSection, FormatSection, ServerSection, ValidationSpec};
    Config {
        server: ServerSection { sid: "n1".into(), display_name: None },
        acl: AclSection {
            room: HashMap::new(),
            available: AclAvailable { acls: vec!["gender".into(), "custom".into()] },
            validation: HashMap::from([
                ("gender".to_string(), ValidationSpec { kind: "str_in_csv".into(), value: Some("m,f".into()) }),
                ("custom".to_string(), ValidationSpec { kind: "accepted_pattern".into(), value: None }),
            ]),
        },
        database: DatabaseSection { url: "sqlite::memory:".into(), pool_size: 1 },
        cache: CacheSection { url: "redis://x".into() },
        format: FormatSection { date_format: "%Y".into() },
    }
}
