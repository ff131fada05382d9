//! Request validator (C7, §4.2): per-verb precondition checks.
//!
//! Grounded on `dino/validation/request_validator.py`'s `on_<verb>`
//! methods, redesigned per spec as a static dispatch table rather than
//! dynamic method-name lookup (§9).

use crate::acl::{self, validators::AttributeValidator, EvalFacts};
use crate::config::Config;
use crate::model::{AclAction, ActivityEnvelope, Scope, Session, TOKEN_EXEMPT_VERBS};
use crate::ports::{AuthPort, PersistenceStore, SessionStore};
use std::collections::HashMap;
use std::sync::Arc;

/// The validator's response contract: `(ok, code, message)` (§4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub ok: bool,
    pub code: i32,
    pub message: String,
}

impl Verdict {
    pub fn ok() -> Self {
        Verdict {
            ok: true,
            code: 0,
            message: String::new(),
        }
    }

    pub fn reject(code: i32, message: impl Into<String>) -> Self {
        Verdict {
            ok: false,
            code,
            message: message.into(),
        }
    }
}

/// Shared state a verb handler needs: the ports plus the parsed ACL
/// configuration used to build attribute validators on demand.
pub struct ValidatorContext {
    pub sessions: Arc<dyn SessionStore>,
    pub persistence: Arc<dyn PersistenceStore>,
    pub auth: Arc<dyn AuthPort>,
    pub config: Config,
}

impl ValidatorContext {
    fn validator_for(&self, attribute: &str) -> Option<Box<dyn AttributeValidator>> {
        self.config.validator_for(attribute)
    }

    /// Role/membership facts (§4.1's `is_admin`, `is_super_user`,
    /// `same_room`, `same_channel` pseudo-attributes) for `actor_id`
    /// against the scope a rule is being checked for. `scope_id` may
    /// name either a room or a channel depending on the calling verb;
    /// membership is checked against both interpretations since a
    /// client's session can never be trusted to say which.
    async fn facts_for(&self, actor_id: &str, scope_id: &str) -> crate::error::Result<EvalFacts> {
        let is_admin = self.persistence.is_admin(&actor_id.to_string()).await?;
        let is_super_user = self.persistence.is_super_user(&actor_id.to_string()).await?;
        let actor_rooms = self.persistence.rooms_for_user(&actor_id.to_string()).await?;
        let same_room = actor_rooms.iter().any(|r| r == scope_id);
        let channel_rooms = self.persistence.rooms_in_channel(&scope_id.to_string()).await?;
        let same_channel = actor_rooms.iter().any(|r| channel_rooms.contains(r));
        Ok(EvalFacts { is_admin, is_super_user, same_room, same_channel })
    }

    /// Entry point 2 of the ACL engine (§4.1): check an activity's
    /// session against every rule stored for `(scope_id, action)`.
    async fn check_acls(
        &self,
        actor_id: &str,
        scope_id: &str,
        action: AclAction,
        session: &Session,
    ) -> crate::error::Result<Verdict> {
        let rules = self.persistence.acl_rules_for(scope_id, action).await?;
        if rules.is_empty() {
            return Ok(Verdict::ok());
        }
        let facts = self.facts_for(actor_id, scope_id).await?;
        for rule in rules {
            let expr = acl::parse(&rule.expression)
                .map_err(|_| crate::error::Error::Fatal(format!(
                    "stored acl expression {:?} is malformed", rule.expression
                )))?;
            if !acl::eval(&expr, session, &facts) {
                return Ok(Verdict::reject(
                    403,
                    format!("acl check failed for attribute {:?}", rule.attribute),
                ));
            }
        }
        Ok(Verdict::ok())
    }
}

fn blank(s: &Option<String>) -> bool {
    s.as_deref().map(str::trim).unwrap_or("").is_empty()
}

/// Dispatch table entry: each verb is a plain async fn pointer taking
/// the shared context plus the envelope.
type Handler = for<'a> fn(
    &'a ValidatorContext,
    &'a ActivityEnvelope,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = crate::error::Result<Verdict>> + Send + 'a>>;

macro_rules! handler {
    ($name:ident, $body:expr) => {
        fn $name<'a>(
            ctx: &'a ValidatorContext,
            activity: &'a ActivityEnvelope,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = crate::error::Result<Verdict>> + Send + 'a>>
        {
            Box::pin(async move { $body(ctx, activity).await })
        }
    };
}

handler!(on_message, |ctx: &ValidatorContext, activity: &ActivityEnvelope| async move {
    let room_id = &activity.target.id;
    if blank(room_id) {
        return Ok(Verdict::reject(400, "no room id specified when sending message"));
    }
    let room_id = room_id.clone().unwrap();

    if activity.target.object_type.as_deref() == Some("group") {
        let channel_id = &activity.object.url;
        if blank(channel_id) {
            return Ok(Verdict::reject(400, "no channel id specified when sending message"));
        }
        let channel_id = channel_id.clone().unwrap();

        if !ctx.persistence.channel_exists(&channel_id).await? {
            return Ok(Verdict::reject(400, format!("channel {channel_id} does not exist")));
        }
        if !ctx.persistence.room_exists(&room_id).await? {
            return Ok(Verdict::reject(400, format!("target room {room_id} does not exist")));
        }

        let from_room_id = activity.actor.url.clone();
        if let Some(from) = &from_room_id {
            if from != &room_id && !ctx.persistence.room_exists(from).await? {
                return Ok(Verdict::reject(400, format!("origin room {from} does not exist")));
            }
        }

        let in_room = ctx
            .persistence
            .users_in_room(&room_id)
            .await?
            .contains(&activity.actor.id);
        if !in_room {
            // Cross-room permission is itself expressed as a `crossroom` acl.
            let session = ctx.sessions.get(&activity.actor.id).await?.unwrap_or_default();
            let verdict = ctx.check_acls(&activity.actor.id, &room_id, AclAction::Crossroom, &session).await?;
            if !verdict.ok {
                return Ok(Verdict::reject(
                    400,
                    format!(
                        "user not allowed to send cross-group msg from {:?} to {room_id}",
                        from_room_id
                    ),
                ));
            }
        }
    }

    Ok(Verdict::ok())
});

handler!(on_delete, |ctx: &ValidatorContext, activity: &ActivityEnvelope| async move {
    let user_id = &activity.actor.id;
    let Some(room_id) = &activity.target.id else {
        return Ok(Verdict::reject(400, "no room id specified when deleting message"));
    };
    let allowed = ctx.persistence.is_owner(user_id, Scope::Room, room_id).await?
        || ctx.persistence.is_moderator(user_id, room_id).await?
        || ctx.persistence.is_admin(user_id).await?
        || match &activity.object.id {
            Some(message_id) => ctx.persistence.is_message_author(user_id, message_id).await?,
            None => false,
        };
    if !allowed {
        return Ok(Verdict::reject(400, format!("not allowed to remove message in room {room_id}")));
    }
    Ok(Verdict::ok())
});

handler!(on_login, |ctx: &ValidatorContext, activity: &ActivityEnvelope| async move {
    let user_id = activity.actor.id.clone();

    if let Some(ban) = ctx.persistence.is_banned(&user_id, Scope::Global, None).await? {
        let remaining = ban.until_epoch - chrono::Utc::now().timestamp();
        return Ok(Verdict::reject(400, format!("user is banned from chatting for: {}s", remaining.max(0))));
    }

    let mut session = ctx.sessions.get(&user_id).await?.unwrap_or_default();
    for attachment in &activity.object.attachments {
        session.set(attachment.object_type.clone(), attachment.content.clone());
    }

    if !session.has_token() {
        return Ok(Verdict::reject(400, "no token in session"));
    }
    let token = session.get("token").unwrap().to_string();

    let extra = ctx.auth.validate_login(&user_id, &token).await?;
    let Some(extra) = extra else {
        return Ok(Verdict::reject(400, "invalid token"));
    };
    for (k, v) in extra {
        session.set(k, v);
    }

    ctx.sessions.set(&user_id, session).await?;
    Ok(Verdict::ok())
});

handler!(on_ban, |ctx: &ValidatorContext, activity: &ActivityEnvelope| async move {
    let room_id = activity.target.id.clone();
    let user_id = activity.actor.id.clone();
    let kicked_id = activity.object.id.clone();

    if blank(&kicked_id) {
        return Ok(Verdict::reject(400, "got blank user id, can not ban"));
    }

    let is_global_ban = blank(&room_id);

    if !is_global_ban {
        let room_id = room_id.clone().unwrap();
        if !ctx.persistence.room_exists(&room_id).await? {
            return Ok(Verdict::reject(400, format!("no room with id {room_id:?} exists")));
        }
        if !ctx.persistence.is_owner(&user_id, Scope::Room, &room_id).await? {
            return Ok(Verdict::reject(400, "only owners can ban"));
        }
    } else if !ctx.persistence.is_admin(&user_id).await? {
        return Ok(Verdict::reject(400, "only admins can do global bans"));
    }

    Ok(Verdict::ok())
});

handler!(on_set_acl, |ctx: &ValidatorContext, activity: &ActivityEnvelope| async move {
    let user_id = &activity.actor.id;
    let Some(room_id) = &activity.target.id else {
        return Ok(Verdict::reject(400, "user not an owner of room"));
    };
    if !ctx.persistence.is_owner(user_id, Scope::Room, room_id).await? {
        return Ok(Verdict::reject(400, "user not an owner of room"));
    }

    for attachment in &activity.object.attachments {
        let Some(validator) = ctx.validator_for(&attachment.object_type) else {
            return Ok(Verdict::reject(400, format!("invalid acl type {:?}", attachment.object_type)));
        };
        if acl::parse(&attachment.content).is_err()
            || validator.validate_new_acl(&attachment.content).is_err()
        {
            return Ok(Verdict::reject(
                400,
                format!("invalid acl value {:?} for type {:?}", attachment.content, attachment.object_type),
            ));
        }
    }

    Ok(Verdict::ok())
});

handler!(on_join, |ctx: &ValidatorContext, activity: &ActivityEnvelope| async move {
    let Some(room_id) = activity.target.id.clone() else {
        return Ok(Verdict::reject(400, "no room id specified when joining"));
    };
    let user_id = activity.actor.id.clone();

    let session = ctx.sessions.get(&user_id).await?.unwrap_or_default();
    let verdict = ctx.check_acls(&user_id, &room_id, AclAction::Join, &session).await?;
    if !verdict.ok {
        return Ok(verdict);
    }

    if let Some(ban) = ctx.persistence.is_banned(&user_id, Scope::Room, Some(&room_id)).await? {
        let remaining = ban.until_epoch - chrono::Utc::now().timestamp();
        return Ok(Verdict::reject(400, format!("user is banned from joining room for: {}s", remaining.max(0))));
    }

    Ok(Verdict::ok())
});

handler!(on_leave, |_ctx: &ValidatorContext, activity: &ActivityEnvelope| async move {
    if activity.target.id.is_none() {
        return Ok(Verdict::reject(400, "room_id is None when trying to leave room"));
    }
    Ok(Verdict::ok())
});

handler!(on_list_channels, |_ctx: &ValidatorContext, _activity: &ActivityEnvelope| async move {
    Ok(Verdict::ok())
});

handler!(on_list_rooms, |_ctx: &ValidatorContext, activity: &ActivityEnvelope| async move {
    if blank(&activity.object.url) {
        return Ok(Verdict::reject(400, "need channel ID to list rooms"));
    }
    Ok(Verdict::ok())
});

handler!(on_users_in_room, |_ctx: &ValidatorContext, _activity: &ActivityEnvelope| async move {
    Ok(Verdict::ok())
});

handler!(on_history, |ctx: &ValidatorContext, activity: &ActivityEnvelope| async move {
    let Some(room_id) = &activity.target.id else {
        return Ok(Verdict::reject(400, "invalid target id"));
    };
    if room_id.trim().is_empty() {
        return Ok(Verdict::reject(400, "invalid target id"));
    }

    let session = ctx.sessions.get(&activity.actor.id).await?.unwrap_or_default();
    ctx.check_acls(&activity.actor.id, room_id, AclAction::History, &session).await
});

handler!(on_status, |ctx: &ValidatorContext, activity: &ActivityEnvelope| async move {
    let session = ctx.sessions.get(&activity.actor.id).await?.unwrap_or_default();
    if session.get("user_name").is_none() {
        return Ok(Verdict::reject(400, "no user name in session"));
    }
    match activity.verb.as_str() {
        "online" | "offline" | "invisible" => Ok(Verdict::ok()),
        other => Ok(Verdict::reject(400, format!("invalid status {other}"))),
    }
});

handler!(on_get_acl, |_ctx: &ValidatorContext, _activity: &ActivityEnvelope| async move {
    Ok(Verdict::ok())
});

handler!(on_kick, |ctx: &ValidatorContext, activity: &ActivityEnvelope| async move {
    let room_id = activity.target.id.clone();
    let channel_id = activity.object.url.clone();
    let user_id = activity.target.display_name.clone();

    if blank(&channel_id) {
        return Ok(Verdict::reject(400, "got blank channel id, can not kick"));
    }
    if blank(&room_id) {
        return Ok(Verdict::reject(400, "got blank room id, can not kick"));
    }
    if blank(&user_id) {
        return Ok(Verdict::reject(400, "got blank user id, can not kick"));
    }
    let room_id = room_id.unwrap();
    let channel_id = channel_id.unwrap();
    let user_id = user_id.unwrap();

    if !ctx.persistence.room_exists(&room_id).await? {
        return Ok(Verdict::reject(400, format!("no room with id {room_id:?} exists")));
    }

    if ctx.persistence.is_owner(&user_id, Scope::Room, &room_id).await?
        || ctx.persistence.is_owner(&user_id, Scope::Channel, &channel_id).await?
        || ctx.persistence.is_moderator(&user_id, &room_id).await?
        || ctx.persistence.is_admin(&user_id).await?
    {
        return Ok(Verdict::ok());
    }

    Ok(Verdict::reject(400, "only owners/admins/moderators can kick"))
});

handler!(on_create, |ctx: &ValidatorContext, activity: &ActivityEnvelope| async move {
    let room_name = activity.target.display_name.clone();
    let channel_id = activity.object.url.clone();

    if blank(&room_name) {
        return Ok(Verdict::reject(400, "got blank room name, can not create"));
    }
    let room_name = room_name.unwrap();
    let Some(channel_id) = channel_id else {
        return Ok(Verdict::reject(400, "channel does not exist"));
    };

    if !ctx.persistence.channel_exists(&channel_id).await? {
        return Ok(Verdict::reject(400, "channel does not exist"));
    }
    if ctx.persistence.room_name_exists(&channel_id, &room_name).await? {
        return Ok(Verdict::reject(400, "a room with that name already exists"));
    }

    Ok(Verdict::ok())
});

fn dispatch_table() -> HashMap<&'static str, Handler> {
    let mut table: HashMap<&'static str, Handler> = HashMap::new();
    table.insert("message", on_message);
    table.insert("delete", on_delete);
    table.insert("login", on_login);
    table.insert("ban", on_ban);
    table.insert("set_acl", on_set_acl);
    table.insert("join", on_join);
    table.insert("leave", on_leave);
    table.insert("list_channels", on_list_channels);
    table.insert("list_rooms", on_list_rooms);
    table.insert("users_in_room", on_users_in_room);
    table.insert("history", on_history);
    table.insert("status", on_status);
    table.insert("offline", on_status);
    table.insert("online", on_status);
    table.insert("invisible", on_status);
    table.insert("get_acl", on_get_acl);
    table.insert("kick", on_kick);
    table.insert("create", on_create);
    table
}

/// Validate one activity against its verb's preconditions (§4.2).
///
/// Unknown verbs are `InvalidRequest`, the static-table analogue of the
/// teacher's fallback when no `on_<verb>` method exists.
pub async fn validate(ctx: &ValidatorContext, activity: &ActivityEnvelope) -> crate::error::Result<Verdict> {
    let verb = activity.verb.as_str();
    if !TOKEN_EXEMPT_VERBS.contains(&verb) {
        let session = ctx.sessions.get(&activity.actor.id).await?;
        let has_token = session.map(|s| s.has_token()).unwrap_or(false);
        if !has_token {
            return Ok(Verdict::reject(403, "session has no validated token for this verb"));
        }
    }

    let table = dispatch_table();
    match table.get(verb) {
        Some(handler) => handler(ctx, activity).await,
        None => Ok(Verdict::reject(400, format!("unknown verb {:?}", activity.verb))),
    }
}
