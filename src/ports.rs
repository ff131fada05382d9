//! Hexagonal ports (C1–C5, §5): everything the core needs from the
//! surrounding cluster, expressed as async traits so the validator and
//! dispatcher never depend on a concrete transport or store.
//!
//! Grounded on the teacher's `services/traits.rs` `#[async_trait] pub
//! trait Service` shape and `db/mod.rs`'s pattern of a per-port leaf
//! error that `#[from]`s into the umbrella `PortError`.

use crate::error::PortError;
use crate::model::{AclRule, Ban, ChannelId, RoomId, Scope, Session, Sid, UserId};
use async_trait::async_trait;

pub type PortResult<T> = std::result::Result<T, PortError>;

/// C1: read/write access to a user's established session attributes.
///
/// The authoritative session lives wherever the client connected; other
/// nodes reach it only through this port.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, user_id: &UserId) -> PortResult<Option<Session>>;
    async fn set(&self, user_id: &UserId, session: Session) -> PortResult<()>;
    async fn remove(&self, user_id: &UserId) -> PortResult<()>;

    /// The connection handle currently associated with `user_id`, if any.
    async fn sid_for_user(&self, user_id: &UserId) -> PortResult<Option<Sid>>;
}

/// C2: durable state — channels, rooms, memberships, bans, acl rules.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn is_banned(
        &self,
        user_id: &UserId,
        scope: Scope,
        scope_id: Option<&str>,
    ) -> PortResult<Option<Ban>>;

    async fn insert_ban(&self, ban: &Ban) -> PortResult<()>;

    async fn acl_rules_for(
        &self,
        scope_id: &str,
        action: crate::model::AclAction,
    ) -> PortResult<Vec<AclRule>>;

    async fn set_acl_rule(&self, rule: &AclRule) -> PortResult<()>;

    async fn room_exists(&self, room_id: &RoomId) -> PortResult<bool>;
    async fn channel_exists(&self, channel_id: &ChannelId) -> PortResult<bool>;
    async fn room_name_exists(&self, channel_id: &ChannelId, room_name: &str) -> PortResult<bool>;

    async fn is_owner(&self, user_id: &UserId, scope: Scope, scope_id: &str) -> PortResult<bool>;
    async fn is_moderator(&self, user_id: &UserId, room_id: &RoomId) -> PortResult<bool>;
    async fn is_admin(&self, user_id: &UserId) -> PortResult<bool>;
    /// Distinct from `is_admin` (§4.1's `is_super_user` pseudo-attribute
    /// names its own role tier, one above global admin).
    async fn is_super_user(&self, user_id: &UserId) -> PortResult<bool>;
    async fn is_message_author(&self, user_id: &UserId, message_id: &str) -> PortResult<bool>;

    async fn users_in_room(&self, room_id: &RoomId) -> PortResult<Vec<UserId>>;
    async fn rooms_in_channel(&self, channel_id: &ChannelId) -> PortResult<Vec<RoomId>>;
    async fn rooms_for_user(&self, user_id: &UserId) -> PortResult<Vec<RoomId>>;

    async fn remove_user_from_room(&self, user_id: &UserId, room_id: &RoomId) -> PortResult<()>;
    async fn delete_room(&self, room_id: &RoomId) -> PortResult<()>;

    /// Purge `user_id`'s undeleted messages in `room_id` (§4.3 step 5),
    /// the moderation-side half of the `messages (CRUD contract only)`
    /// persistence surface — this core carries no message storage
    /// format of its own (§1 Non-goals), only the deletion contract a
    /// ban/kick must invoke.
    async fn delete_undeleted_messages_for_user_in_room(
        &self,
        user_id: &UserId,
        room_id: &RoomId,
    ) -> PortResult<()>;

    async fn mark_offline(&self, user_id: &UserId) -> PortResult<()>;
    async fn owns_locally(&self, user_id: &UserId) -> PortResult<bool>;

    /// Distinct `user_id` count across all room memberships (§6, the
    /// `count_users_in_rooms` operational CLI's sole query).
    async fn count_distinct_users_in_rooms(&self) -> PortResult<i64>;

    /// Write an integer to the shared key-value cache (§6); the CLI's
    /// only consumer is the `users:online:inrooms` key.
    async fn write_cache(&self, key: &str, value: i64) -> PortResult<()>;
}

/// The four named moderation events (§6) a broadcast can carry. Kept as
/// a closed enum rather than a bare `&str` so the event name a handler
/// means to send and the one a transport actually emits can't drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastEvent {
    /// A room-wide notice that a user was banned from it.
    UserBanned,
    /// A room-wide notice that a user was kicked from it.
    UserKicked,
    /// Sent directly to the banned user's own connection.
    Banned,
    /// A room-wide notice that the room itself was removed.
    RoomRemoved,
}

impl BroadcastEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            BroadcastEvent::UserBanned => "gn_user_banned",
            BroadcastEvent::UserKicked => "gn_user_kicked",
            BroadcastEvent::Banned => "gn_banned",
            BroadcastEvent::RoomRemoved => "gn_room_removed",
        }
    }
}

/// C3: push an activity to the connected clients in a namespace.
#[async_trait]
pub trait BroadcastTransport: Send + Sync {
    async fn emit_to_room(
        &self,
        room_id: &RoomId,
        namespace: &str,
        event: BroadcastEvent,
        payload: &str,
    ) -> PortResult<()>;
    async fn emit_to_user(
        &self,
        sid: &Sid,
        namespace: &str,
        event: BroadcastEvent,
        payload: &str,
    ) -> PortResult<()>;
    async fn disconnect(&self, sid: &Sid) -> PortResult<()>;
}

/// C4: cross-node moderation event fan-out (the cluster-wide bus).
#[async_trait]
pub trait ExternalBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: &str) -> PortResult<()>;
}

/// C5: same-node task handoff (e.g. deferred deletes, local worker queues).
#[async_trait]
pub trait InternalBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: &str) -> PortResult<()>;
}

/// Token-issuance boundary the validator consumes but never produces
/// (§1 Non-goals: "the core only consumes tokens"). Not one of C1–C5
/// in the component table, but required by the `login` verb's contract
/// in §4.2 and so given its own narrow port rather than folded into
/// `SessionStore`.
#[async_trait]
pub trait AuthPort: Send + Sync {
    /// Validate `(user_id, token)`, returning extra session fields to
    /// merge on success.
    async fn validate_login(
        &self,
        user_id: &UserId,
        token: &str,
    ) -> PortResult<Option<std::collections::HashMap<String, String>>>;
}
