//! Scenario 5: a `set_acl` submission with an unbalanced parenthesis is
//! rejected by the validator before anything is ever handed to storage.

mod common;

use common::{envelope, test_config, FakeAuth, FakePersistence, FakeSessions};
use dino_core::model::Attachment;
use dino_core::validator::{validate, ValidatorContext};
use std::sync::Arc;

#[tokio::test]
async fn malformed_paren_in_a_custom_acl_value_is_rejected() {
    let persistence = Arc::new(FakePersistence::default());
    persistence.rooms.insert("r1".into(), "lobby".into());
    persistence
        .owners
        .insert(("u1".to_string(), "Room:r1".to_string()), true);

    let ctx = ValidatorContext {
        sessions: Arc::new(FakeSessions::default()),
        persistence: persistence.clone(),
        auth: Arc::new(FakeAuth::default()),
        config: test_config(),
    };

    let mut activity = envelope("set_acl", "u1");
    activity.target.id = Some("r1".into());
    activity.object.attachments.push(Attachment {
        object_type: "custom".into(),
        content: "gender=f(".into(),
    });

    let verdict = validate(&ctx, &activity).await.unwrap();

    assert!(!verdict.ok);
    assert_eq!(verdict.code, 400);
    assert!(verdict.message.contains("invalid acl value"));
}

#[tokio::test]
async fn a_well_formed_acl_value_from_a_room_owner_is_accepted() {
    let persistence = Arc::new(FakePersistence::default());
    persistence.rooms.insert("r1".into(), "lobby".into());
    persistence
        .owners
        .insert(("u1".to_string(), "Room:r1".to_string()), true);

    let ctx = ValidatorContext {
        sessions: Arc::new(FakeSessions::default()),
        persistence,
        auth: Arc::new(FakeAuth::default()),
        config: test_config(),
    };

    let mut activity = envelope("set_acl", "u1");
    activity.target.id = Some("r1".into());
    activity.object.attachments.push(Attachment {
        object_type: "custom".into(),
        content: "tg_p".into(),
    });

    let verdict = validate(&ctx, &activity).await.unwrap();
    assert!(verdict.ok);
}
