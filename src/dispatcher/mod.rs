//! Moderation event dispatcher (C8, §4.3): the distributed heart of the
//! system. Classifies inbound cluster events, deduplicates them, and
//! executes ban/kick/remove exactly once on the node that owns the
//! victim's session.
//!
//! Grounded on `dino/endpoint/queue.py`'s `QueueHandler` (`handle_local_node_events`,
//! `handle_ban`, `handle_kick`, `ban_globally`/`ban_channel`/`ban_room`,
//! `delete_for_user_in_room`) for the control flow; the dedup structure
//! itself is redesigned per spec §9 as [`dedup::BoundedIdSet`].

pub mod dedup;

use crate::error::Result;
use crate::model::{Actor, ActivityEnvelope, Ban, Obj, Scope, Target};
use crate::ports::{
    BroadcastEvent, BroadcastTransport, ExternalBus, InternalBus, PersistenceStore, SessionStore,
};
use dedup::BoundedIdSet;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct Dispatcher {
    pub sessions: Arc<dyn SessionStore>,
    pub persistence: Arc<dyn PersistenceStore>,
    pub broadcast: Arc<dyn BroadcastTransport>,
    pub external: Arc<dyn ExternalBus>,
    pub internal: Arc<dyn InternalBus>,
    recently_delegated: Mutex<BoundedIdSet>,
    recently_handled: Mutex<BoundedIdSet>,
}

/// Parse the ban duration grammar: an unsigned integer followed by one
/// of `{s, m, h, d}` (§6).
pub fn ban_duration_to_seconds(duration: &str) -> Option<i64> {
    let (digits, unit) = duration.split_at(duration.len().checked_sub(1)?);
    let n: i64 = digits.parse().ok()?;
    let multiplier = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86_400,
        _ => return None,
    };
    Some(n * multiplier)
}

impl Dispatcher {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        persistence: Arc<dyn PersistenceStore>,
        broadcast: Arc<dyn BroadcastTransport>,
        external: Arc<dyn ExternalBus>,
        internal: Arc<dyn InternalBus>,
    ) -> Self {
        Dispatcher {
            sessions,
            persistence,
            broadcast,
            external,
            internal,
            recently_delegated: Mutex::new(BoundedIdSet::new()),
            recently_handled: Mutex::new(BoundedIdSet::new()),
        }
    }

    #[cfg(test)]
    fn delegated_len(&self) -> usize {
        self.recently_delegated.lock().len()
    }

    #[cfg(test)]
    fn handled_len(&self) -> usize {
        self.recently_handled.lock().len()
    }

    /// Ingress entry point (§4.3 "Ingress"): called for every envelope
    /// arriving from C5.
    pub async fn handle_incoming(&self, raw: &str, activity: &ActivityEnvelope) -> Result<()> {
        {
            let delegated = self.recently_delegated.lock();
            if delegated.contains(&activity.id) {
                info!(activity_id = %activity.id, "ignoring event delegated from this node");
                return Ok(());
            }
        }
        {
            let handled = self.recently_handled.lock();
            if handled.contains(&activity.id) {
                info!(activity_id = %activity.id, "ignoring event already handled on this node");
                return Ok(());
            }
        }
        self.recently_handled.lock().insert(activity.id.clone());

        match activity.verb.as_str() {
            "ban" => {
                if let Err(e) = self.handle_ban(raw, activity).await {
                    error!(activity_id = %activity.id, error = %e, "could not handle ban");
                    return Err(e);
                }
            }
            "kick" => {
                if let Err(e) = self.handle_kick(activity).await {
                    error!(activity_id = %activity.id, error = %e, "could not handle kick");
                }
            }
            "remove" => {
                if let Err(e) = self.handle_remove(raw, activity).await {
                    error!(activity_id = %activity.id, error = %e, "could not handle remove");
                }
            }
            _ => {
                self.external
                    .publish("activity", raw)
                    .await
                    .map_err(crate::error::Error::TransientPortError)?;
            }
        }
        Ok(())
    }

    /// **ban** local-node handling (§4.3). Persistence precedes every
    /// broadcast (property 4); a persistence failure aborts so the
    /// caller can retry via redelivery (§7).
    async fn handle_ban(&self, raw: &str, activity: &ActivityEnvelope) -> Result<()> {
        let banned_id = activity.object.id.clone().ok_or_else(|| {
            crate::error::Error::InvalidRequest("ban activity missing object.id".into())
        })?;

        let victim_here = self
            .persistence
            .owns_locally(&banned_id)
            .await
            .map_err(crate::error::Error::TransientPortError)?;

        if !victim_here {
            info!(user_id = %banned_id, "victim not on this node, republishing");
            self.recently_delegated.lock().insert(activity.id.clone());
            self.internal
                .publish("moderation", raw)
                .await
                .map_err(crate::error::Error::TransientPortError)?;
        }

        let scope = Scope::from_object_type(activity.target.object_type.as_deref());
        let scope_id = activity.target.id.clone();
        let duration_text = activity.object.summary.clone().unwrap_or_default();
        let seconds = ban_duration_to_seconds(&duration_text).ok_or_else(|| {
            crate::error::Error::InvalidRequest(format!("malformed ban duration {duration_text:?}"))
        })?;
        let until_epoch = chrono::Utc::now().timestamp() + seconds;

        let ban = Ban {
            banned_id: banned_id.clone(),
            scope,
            scope_id: scope_id.clone(),
            until_epoch,
            duration_text: duration_text.clone(),
            reason: activity.object.content.clone(),
            banner_id: activity.actor.id.clone(),
        };

        // Persist before any propagation (property 4).
        self.persistence
            .insert_ban(&ban)
            .await
            .map_err(crate::error::Error::TransientPortError)?;

        let ban_envelope = build_ban_envelope(activity, scope);
        let ban_payload = serde_json::to_string(&ban_envelope).unwrap_or_default();
        self.external
            .publish("ban", &ban_payload)
            .await
            .map_err(crate::error::Error::TransientPortError)?;

        if !victim_here {
            return Ok(());
        }

        let namespace = activity.target.namespace().to_string();

        let rooms = match scope {
            Scope::Global => self
                .persistence
                .rooms_for_user(&banned_id)
                .await
                .unwrap_or_default(),
            Scope::Channel => {
                let channel_id = scope_id.clone().unwrap_or_default();
                self.persistence
                    .rooms_in_channel(&channel_id)
                    .await
                    .unwrap_or_default()
            }
            Scope::Room => scope_id.clone().into_iter().collect(),
        };

        for room_id in &rooms {
            if let Err(e) = self
                .broadcast
                .emit_to_room(room_id, &namespace, BroadcastEvent::UserBanned, &ban_payload)
                .await
            {
                warn!(room_id = %room_id, error = %e, "could not broadcast ban to room");
            }
            if let Err(e) = self.kick_from_room(&banned_id, room_id, &namespace).await {
                warn!(room_id = %room_id, error = %e, "could not kick banned user from room");
            }
        }

        if scope == Scope::Global {
            if let Err(e) = self.persistence.mark_offline(&banned_id).await {
                warn!(user_id = %banned_id, error = %e, "could not mark user offline");
            }
            let disconnect = format!("{{\"verb\":\"disconnect\",\"actor\":{{\"id\":{banned_id:?}}}}}");
            if let Err(e) = self.external.publish("disconnect", &disconnect).await {
                warn!(error = %e, "could not publish disconnect event");
            }
        }

        if let Some(sid) = self
            .sessions
            .sid_for_user(&banned_id)
            .await
            .map_err(crate::error::Error::TransientPortError)?
        {
            let ban_for_victim = serde_json::to_string(&ban_envelope).unwrap_or_default();
            if let Err(e) = self
                .broadcast
                .emit_to_user(&sid, &namespace, BroadcastEvent::Banned, &ban_for_victim)
                .await
            {
                warn!(sid = %sid, error = %e, "could not emit ban directly to victim");
            }
        }

        Ok(())
    }

    /// Shared tail of `ban_room`/`ban_channel`/`ban_globally`: broadcast
    /// the kick, leave the room if the victim is locally connected, and
    /// purge undeleted messages (errors per-room/message are absorbed,
    /// §4.3 "Failure semantics").
    async fn kick_from_room(&self, user_id: &str, room_id: &str, namespace: &str) -> Result<()> {
        let kicked_payload = format!(
            "{{\"verb\":\"kick\",\"target\":{{\"id\":{room_id:?}}},\"object\":{{\"id\":{user_id:?}}}}}"
        );
        self.broadcast
            .emit_to_room(room_id, namespace, BroadcastEvent::UserKicked, &kicked_payload)
            .await
            .map_err(crate::error::Error::TransientPortError)?;

        if let Some(sid) = self.sessions.sid_for_user(&user_id.to_string()).await.unwrap_or(None) {
            if let Err(e) = self.broadcast.disconnect(&sid).await {
                warn!(sid = %sid, error = %e, "could not disconnect kicked user");
            }
        }
        if let Err(e) = self
            .persistence
            .remove_user_from_room(&user_id.to_string(), &room_id.to_string())
            .await
        {
            warn!(room_id = %room_id, error = %e, "could not remove membership in db");
        }
        if let Err(e) = self
            .persistence
            .delete_undeleted_messages_for_user_in_room(&user_id.to_string(), &room_id.to_string())
            .await
        {
            warn!(room_id = %room_id, error = %e, "could not purge messages for kicked user");
        }

        Ok(())
    }

    /// **kick** local-node handling (§4.3).
    async fn handle_kick(&self, activity: &ActivityEnvelope) -> Result<()> {
        let Some(victim_id) = activity.target.display_name.clone() else {
            return Err(crate::error::Error::InvalidRequest(
                "kick activity missing target.displayName".into(),
            ));
        };
        let namespace = activity.target.namespace().to_string();

        let rooms = match &activity.target.id {
            Some(room_id) => vec![room_id.clone()],
            None => self
                .persistence
                .rooms_for_user(&victim_id)
                .await
                .unwrap_or_default(),
        };

        for room_id in &rooms {
            let mut copy = activity.clone();
            copy.target = Target {
                id: Some(room_id.clone()),
                ..Target::default()
            };
            let payload = serde_json::to_string(&copy).unwrap_or_default();
            if let Err(e) = self
                .broadcast
                .emit_to_room(room_id, &namespace, BroadcastEvent::UserKicked, &payload)
                .await
            {
                warn!(room_id = %room_id, error = %e, "could not broadcast kick");
            }
            self.external
                .publish("kick", &payload)
                .await
                .map_err(crate::error::Error::TransientPortError)?;
            if let Err(e) = self.kick_from_room(&victim_id, room_id, &namespace).await {
                warn!(room_id = %room_id, error = %e, "could not complete kick");
            }
        }
        Ok(())
    }

    /// **remove**: a bare room-removal broadcast, no further effect
    /// (the deletion itself is handled by the originating admin path).
    async fn handle_remove(&self, raw: &str, activity: &ActivityEnvelope) -> Result<()> {
        let namespace = activity.target.namespace().to_string();
        self.broadcast
            .emit_to_room(
                activity.target.id.as_deref().unwrap_or_default(),
                &namespace,
                BroadcastEvent::RoomRemoved,
                raw,
            )
            .await
            .map_err(crate::error::Error::TransientPortError)
    }
}

fn build_ban_envelope(activity: &ActivityEnvelope, scope: Scope) -> ActivityEnvelope {
    let object_type = match scope {
        Scope::Global => "global",
        Scope::Channel => "channel",
        Scope::Room => "room",
    };
    ActivityEnvelope {
        id: uuid::Uuid::new_v4().to_string(),
        actor: Actor {
            id: activity.actor.id.clone(),
            display_name: activity.actor.display_name.clone(),
            ..Actor::default()
        },
        verb: "ban".to_string(),
        object: Obj {
            id: activity.object.id.clone(),
            content: activity.object.content.clone(),
            summary: activity.object.summary.clone(),
            updated: activity.object.updated.clone(),
            ..Obj::default()
        },
        target: Target {
            id: activity.target.id.clone(),
            display_name: activity.target.display_name.clone(),
            object_type: Some(object_type.to_string()),
            url: activity.target.url.clone(),
        },
        published: activity.published.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AclAction, AclRule, Session, Sid};
    use async_trait::async_trait;
    use dashmap::DashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct MockSessions {
        sids: DashMap<String, String>,
    }

    #[async_trait]
    impl SessionStore for MockSessions {
        async fn get(&self, _user_id: &String) -> crate::ports::PortResult<Option<Session>> {
            Ok(None)
        }
        async fn set(&self, _user_id: &String, _session: Session) -> crate::ports::PortResult<()> {
            Ok(())
        }
        async fn remove(&self, _user_id: &String) -> crate::ports::PortResult<()> {
            Ok(())
        }
        async fn sid_for_user(&self, user_id: &String) -> crate::ports::PortResult<Option<Sid>> {
            Ok(self.sids.get(user_id).map(|s| s.clone()))
        }
    }

    #[derive(Default)]
    struct MockPersistence {
        bans_inserted: AtomicUsize,
        local_owner: std::sync::atomic::AtomicBool,
        rooms_for_user: DashMap<String, Vec<String>>,
        offline_marks: AtomicUsize,
        messages_purged: AtomicUsize,
    }

    #[async_trait]
    impl PersistenceStore for MockPersistence {
        async fn is_banned(&self, _user_id: &String, _scope: Scope, _scope_id: Option<&str>) -> crate::ports::PortResult<Option<Ban>> {
            Ok(None)
        }
        async fn insert_ban(&self, _ban: &Ban) -> crate::ports::PortResult<()> {
            self.bans_inserted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn acl_rules_for(&self, _scope_id: &str, _action: AclAction) -> crate::ports::PortResult<Vec<AclRule>> {
            Ok(vec![])
        }
        async fn set_acl_rule(&self, _rule: &AclRule) -> crate::ports::PortResult<()> {
            Ok(())
        }
        async fn room_exists(&self, _room_id: &String) -> crate::ports::PortResult<bool> {
            Ok(true)
        }
        async fn channel_exists(&self, _channel_id: &String) -> crate::ports::PortResult<bool> {
            Ok(true)
        }
        async fn room_name_exists(&self, _channel_id: &String, _room_name: &str) -> crate::ports::PortResult<bool> {
            Ok(false)
        }
        async fn is_owner(&self, _user_id: &String, _scope: Scope, _scope_id: &str) -> crate::ports::PortResult<bool> {
            Ok(false)
        }
        async fn is_moderator(&self, _user_id: &String, _room_id: &String) -> crate::ports::PortResult<bool> {
            Ok(false)
        }
        async fn is_admin(&self, _user_id: &String) -> crate::ports::PortResult<bool> {
            Ok(false)
        }
        async fn is_super_user(&self, _user_id: &String) -> crate::ports::PortResult<bool> {
            Ok(false)
        }
        async fn is_message_author(&self, _user_id: &String, _message_id: &str) -> crate::ports::PortResult<bool> {
            Ok(false)
        }
        async fn users_in_room(&self, _room_id: &String) -> crate::ports::PortResult<Vec<String>> {
            Ok(vec![])
        }
        async fn rooms_in_channel(&self, _channel_id: &String) -> crate::ports::PortResult<Vec<String>> {
            Ok(vec![])
        }
        async fn remove_user_from_room(&self, _user_id: &String, _room_id: &String) -> crate::ports::PortResult<()> {
            Ok(())
        }
        async fn delete_room(&self, _room_id: &String) -> crate::ports::PortResult<()> {
            Ok(())
        }
        async fn delete_undeleted_messages_for_user_in_room(
            &self,
            _user_id: &String,
            _room_id: &String,
        ) -> crate::ports::PortResult<()> {
            self.messages_purged.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn mark_offline(&self, _user_id: &String) -> crate::ports::PortResult<()> {
            self.offline_marks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn owns_locally(&self, _user_id: &String) -> crate::ports::PortResult<bool> {
            Ok(self.local_owner.load(Ordering::SeqCst))
        }
        async fn rooms_for_user(&self, user_id: &String) -> crate::ports::PortResult<Vec<String>> {
            Ok(self.rooms_for_user.get(user_id).map(|v| v.clone()).unwrap_or_default())
        }
        async fn count_distinct_users_in_rooms(&self) -> crate::ports::PortResult<i64> {
            Ok(0)
        }
        async fn write_cache(&self, _key: &str, _value: i64) -> crate::ports::PortResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockBroadcast {
        emitted_rooms: AtomicUsize,
        room_events: Mutex<Vec<&'static str>>,
        user_events: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl BroadcastTransport for MockBroadcast {
        async fn emit_to_room(
            &self,
            _room_id: &String,
            _namespace: &str,
            event: crate::ports::BroadcastEvent,
            _payload: &str,
        ) -> crate::ports::PortResult<()> {
            self.emitted_rooms.fetch_add(1, Ordering::SeqCst);
            self.room_events.lock().push(event.as_str());
            Ok(())
        }
        async fn emit_to_user(
            &self,
            _sid: &String,
            _namespace: &str,
            event: crate::ports::BroadcastEvent,
            _payload: &str,
        ) -> crate::ports::PortResult<()> {
            self.user_events.lock().push(event.as_str());
            Ok(())
        }
        async fn disconnect(&self, _sid: &String) -> crate::ports::PortResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockBus {
        published: AtomicUsize,
    }

    #[async_trait]
    impl ExternalBus for MockBus {
        async fn publish(&self, _topic: &str, _payload: &str) -> crate::ports::PortResult<()> {
            self.published.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl InternalBus for MockBus {
        async fn publish(&self, _topic: &str, _payload: &str) -> crate::ports::PortResult<()> {
            self.published.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn ban_activity(room: Option<&str>, object_type: Option<&str>) -> ActivityEnvelope {
        ActivityEnvelope {
            id: "ban-1".into(),
            actor: Actor { id: "mod1".into(), ..Default::default() },
            verb: "ban".into(),
            object: Obj {
                id: Some("victim".into()),
                summary: Some("1h".into()),
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

    fn dispatcher(local_owner: bool) -> (Dispatcher, Arc<MockPersistence>, Arc<MockBroadcast>) {
        let persistence = Arc::new(MockPersistence::default());
        persistence.local_owner.store(local_owner, Ordering::SeqCst);
        let broadcast = Arc::new(MockBroadcast::default());
        let bus = Arc::new(MockBus::default());
        let d = Dispatcher::new(
            Arc::new(MockSessions::default()),
            persistence.clone(),
            broadcast.clone(),
            bus.clone(),
            bus,
        );
        (d, persistence, broadcast)
    }

    #[test]
    fn ban_duration_grammar_parses_units() {
        assert_eq!(ban_duration_to_seconds("30s"), Some(30));
        assert_eq!(ban_duration_to_seconds("1m"), Some(60));
        assert_eq!(ban_duration_to_seconds("2h"), Some(7200));
        assert_eq!(ban_duration_to_seconds("1d"), Some(86400));
        assert_eq!(ban_duration_to_seconds("1x"), None);
        assert_eq!(ban_duration_to_seconds(""), None);
    }

    #[tokio::test]
    async fn ban_persists_before_any_broadcast_when_victim_is_local() {
        let (d, persistence, broadcast) = dispatcher(true);
        let activity = ban_activity(Some("room-1"), Some("room"));
        d.handle_incoming("{}", &activity).await.unwrap();
        assert_eq!(persistence.bans_inserted.load(Ordering::SeqCst), 1);
        assert!(broadcast.emitted_rooms.load(Ordering::SeqCst) >= 1);
        assert_eq!(
            broadcast.room_events.lock().as_slice(),
            ["gn_user_banned", "gn_user_kicked"]
        );
        assert_eq!(broadcast.user_events.lock().as_slice(), ["gn_banned"]);
        assert_eq!(persistence.messages_purged.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn kick_purges_messages_and_emits_the_named_event_exactly_once() {
        let (d, persistence, broadcast) = dispatcher(true);
        d.kick_from_room("victim", "room-1", "/ns").await.unwrap();
        assert_eq!(broadcast.room_events.lock().as_slice(), ["gn_user_kicked"]);
        assert_eq!(persistence.messages_purged.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn global_ban_without_local_owner_skips_offline_mark() {
        let (d, persistence, _broadcast) = dispatcher(false);
        let activity = ban_activity(None, None);
        d.handle_incoming("{}", &activity).await.unwrap();
        assert_eq!(persistence.bans_inserted.load(Ordering::SeqCst), 1);
        assert_eq!(persistence.offline_marks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn duplicate_delivery_is_idempotent() {
        let (d, persistence, _broadcast) = dispatcher(true);
        let activity = ban_activity(Some("room-1"), Some("room"));
        for _ in 0..5 {
            d.handle_incoming("{}", &activity).await.ok();
        }
        // only the first delivery actually runs the ban branch; the rest
        // are short-circuited by `recently_handled`.
        assert_eq!(persistence.bans_inserted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dedup_sets_are_bounded() {
        let (d, _p, _b) = dispatcher(true);
        for i in 0..150 {
            d.recently_handled.lock().insert(format!("id-{i}"));
            d.recently_delegated.lock().insert(format!("id-{i}"));
        }
        assert!(d.handled_len() <= 100);
        assert!(d.delegated_len() <= 100);
    }
}
