//! Core entity types (§3).
//!
//! Plain data structs with `Option<T>` marking genuinely absent fields,
//! following the teacher's `state::channel`/`state::user` shape rather
//! than the original Python's `hasattr`-based optional-attribute checks
//! (see DESIGN NOTES in SPEC_FULL.md §9).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type ChannelId = String;
pub type RoomId = String;
pub type UserId = String;
pub type Sid = String;

/// A channel: container of rooms, with a set of channel-level owners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub owners: Vec<UserId>,
}

/// A room: holds users and messages, scoped to exactly one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub channel_id: ChannelId,
    pub owners: Vec<UserId>,
    pub moderators: Vec<UserId>,
}

/// Session attribute keys the ACL engine and validator know about.
pub const SESSION_ATTRS: &[&str] = &[
    "user_id",
    "user_name",
    "age",
    "gender",
    "membership",
    "country",
    "city",
    "image",
    "has_webcam",
    "fake_checked",
    "token",
];

/// A user's established session: attribute name -> string value.
///
/// The authoritative source for ACL checks (§3); created at login,
/// mutated only there.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session(pub HashMap<String, String>);

impl Session {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn has_token(&self) -> bool {
        self.get("token").is_some_and(|t| !t.is_empty())
    }
}

/// A user: identity plus cluster-wide presence state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub rooms: Vec<RoomId>,
    pub online: bool,
}

/// Roles are mutually additive; checks short-circuit on first match
/// (§3) in the order: admin, owner-channel, owner-room, moderator-room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    GlobalAdmin,
    OwnerChannel,
    OwnerRoom,
    ModeratorRoom,
}

/// Ban scope granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Global,
    Channel,
    Room,
}

impl Scope {
    /// Maps from an activity's `target.objectType`, defaulting to
    /// `Global` when no target scope is present (§4.3 step 2).
    pub fn from_object_type(object_type: Option<&str>) -> Self {
        match object_type {
            Some("room") => Scope::Room,
            Some("channel") => Scope::Channel,
            _ => Scope::Global,
        }
    }
}

/// A persisted ban. `(banned_id, scope, scope_id)` is unique (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ban {
    pub banned_id: UserId,
    pub scope: Scope,
    pub scope_id: Option<String>,
    pub until_epoch: i64,
    pub duration_text: String,
    pub reason: Option<String>,
    pub banner_id: UserId,
}

/// An ACL action a rule can gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AclAction {
    Join,
    Message,
    Crossroom,
    List,
    History,
    Setacl,
    Kick,
    Ban,
}

/// A stored ACL rule: one attribute's expression for a given scope/action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclRule {
    pub scope_id: String,
    pub action: AclAction,
    pub attribute: String,
    pub expression: String,
}

/// The activity-streams actor: who is performing the verb.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// An attachment on `object`: one ACL attribute's session value, or one
/// ACL attribute name + expression pair for `set_acl`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub object_type: String,
    pub content: String,
}

/// The activity-streams object: the thing the verb acts upon.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Obj {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// The activity-streams target: where the verb is directed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Target {
    /// The broadcast namespace for this target, defaulting to `/ws` (§6).
    pub fn namespace(&self) -> &str {
        self.url.as_deref().unwrap_or("/ws")
    }
}

/// An activity-streams envelope (§3): the unit of transport between the
/// client, the internal bus, the external bus, and the dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEnvelope {
    pub id: String,
    pub actor: Actor,
    pub verb: String,
    #[serde(default)]
    pub object: Obj,
    #[serde(default)]
    pub target: Target,
    pub published: String,
}

/// Verbs that may be issued without a validated `token` in the session (§3).
pub const TOKEN_EXEMPT_VERBS: &[&str] = &[
    "list",
    "login",
    "leave",
    "get_acl",
    "list_channels",
    "users_in_room",
];
