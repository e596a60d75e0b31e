//! Integration tests for the mirror.

use async_trait::async_trait;
use parking_lot::Mutex;
use program_mirror::{
    BindingState, ChannelEventBus, Clock, CollectionPath, Document, FixedClock, MemoryIdentity,
    MemoryRemote, Mirror, MirrorConfig, MirrorParts, ProgramId, Result, Session, SignInOutcome,
    SignupCompleted, Timestamp, TokenEndpoint, UserId, WatchTargets,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct EchoEndpoint;

#[async_trait]
impl TokenEndpoint for EchoEndpoint {
    async fn exchange(&self, program_id: &ProgramId, _id_token: &str) -> Result<String> {
        Ok(format!("token-{program_id}"))
    }
}

struct Fixture {
    remote: MemoryRemote,
    identity: Arc<MemoryIdentity>,
    bus: Arc<ChannelEventBus>,
    clock: Arc<FixedClock>,
    mirror: Mirror,
}

fn fixture(exchange_tokens: bool) -> Fixture {
    init_tracing();
    let remote = MemoryRemote::new();
    let identity = Arc::new(MemoryIdentity::new());
    let bus = Arc::new(ChannelEventBus::new());
    let clock = Arc::new(FixedClock::new(Timestamp::from_millis(1_700_000_000_000)));
    let config = MirrorConfig {
        exchange_tokens_on_bind: exchange_tokens,
        ..Default::default()
    };
    let mirror = Mirror::from_parts(
        config,
        MirrorParts {
            remote: Arc::new(remote.clone()),
            identity: identity.clone(),
            endpoint: Arc::new(EchoEndpoint),
            bus: bus.clone(),
            clock: clock.clone(),
        },
    );
    Fixture {
        remote,
        identity,
        bus,
        clock,
        mirror,
    }
}

fn doc(v: Value) -> Document {
    v.as_object().cloned().unwrap()
}

fn targets() -> WatchTargets {
    WatchTargets::default()
}

fn seed_programs(remote: &MemoryRemote, ids: &[&str]) {
    for id in ids {
        remote.put(
            &targets().programs().doc(*id),
            doc(json!({"programId": id, "title": format!("Program {id}")})),
        );
    }
}

// --- Startup ---

#[tokio::test]
async fn test_initialize_without_session() {
    let f = fixture(false);
    seed_programs(&f.remote, &["p1", "p2"]);

    let initial = f.mirror.initialize().await.unwrap();

    assert!(initial.initialized);
    assert!(initial.user.is_none());
    assert_eq!(initial.programs.len(), 2);
    assert_eq!(f.mirror.binding_state(), BindingState::Unbound);

    // Only the shared program watch.
    assert_eq!(f.remote.active_listeners(), 1);
    assert_eq!(f.mirror.snapshot().programs.len(), 2);
}

#[tokio::test]
async fn test_initialize_with_existing_session() {
    let f = fixture(false);
    seed_programs(&f.remote, &["p1"]);
    f.remote.put(
        &targets().user_document(&"u1".into()),
        doc(json!({"onboarded": true, "name": "Ada"})),
    );
    f.identity.set_session(Some(Session::new("u1")));

    let initial = f.mirror.initialize().await.unwrap();

    let user = initial.user.unwrap();
    assert_eq!(user.id, UserId::from("u1"));
    assert_eq!(user.data["name"], "Ada");
    assert_eq!(f.mirror.binding_state(), BindingState::Bound("u1".into()));
    assert_eq!(f.remote.active_listeners(), 3);

    let state = f.mirror.snapshot();
    assert!(state.onboarded);
    assert_eq!(state.programs.len(), 1);
}

#[tokio::test]
async fn test_initialize_twice_is_harmless() {
    let f = fixture(false);
    f.mirror.initialize().await.unwrap();
    f.mirror.initialize().await.unwrap();
    assert_eq!(f.remote.active_listeners(), 1);
}

// --- Session transitions ---

#[tokio::test]
async fn test_sign_in_establishes_watches_and_notifies_per_push() {
    let f = fixture(false);
    seed_programs(&f.remote, &["p1"]);
    f.remote.put(
        &targets().user_document(&"u1".into()),
        doc(json!({"onboarded": false})),
    );

    let pushes = Arc::new(Mutex::new(0));
    let p = Arc::clone(&pushes);
    f.mirror.on_next_state(move |_| *p.lock() += 1);

    assert_eq!(*pushes.lock(), 0);

    f.mirror
        .bridge()
        .handle_transition(Some(Session::new("u1")))
        .await
        .unwrap();

    // User document, enrollments, programs.
    assert_eq!(f.remote.active_listeners(), 3);
    assert_eq!(*pushes.lock(), 3);

    f.remote.put(
        &targets().enrollment_document(&"u1".into(), &"p1".into()),
        doc(json!({"programId": "p1", "enrolled": true})),
    );
    assert_eq!(*pushes.lock(), 4);
    assert!(f.mirror.snapshot().is_enrolled(&"p1".into()));
}

#[tokio::test]
async fn test_identity_transitions_drive_binding() {
    let f = fixture(false);
    f.mirror.initialize().await.unwrap();
    let mut processed = f.mirror.bridge().processed();

    f.identity.set_session(Some(Session::new("u1")));
    processed.wait_for(|n| *n >= 2).await.unwrap();
    assert_eq!(f.mirror.binding_state(), BindingState::Bound("u1".into()));

    f.identity.set_session(Some(Session::new("u2")));
    processed.wait_for(|n| *n >= 3).await.unwrap();
    assert_eq!(f.mirror.binding_state(), BindingState::Bound("u2".into()));
    assert_eq!(f.remote.active_listeners(), 3);

    f.identity.set_session(None);
    processed.wait_for(|n| *n >= 4).await.unwrap();
    assert_eq!(f.mirror.binding_state(), BindingState::Unbound);
    assert_eq!(f.remote.active_listeners(), 1);
}

#[tokio::test]
async fn test_account_switch_isolates_users() {
    let f = fixture(false);
    let u1 = UserId::from("u1");
    let u2 = UserId::from("u2");
    f.remote.put(&targets().user_document(&u1), doc(json!({"name": "one"})));
    f.remote.put(&targets().user_document(&u2), doc(json!({"name": "two"})));

    let bridge = f.mirror.bridge();
    bridge.handle_transition(Some(Session::new("u1"))).await.unwrap();
    bridge.handle_transition(Some(Session::new("u2"))).await.unwrap();

    // Writes to the previous user's document never reach the mirror.
    f.remote.put(&targets().user_document(&u1), doc(json!({"name": "one again"})));

    let state = f.mirror.snapshot();
    let user = state.user.as_ref().unwrap();
    assert_eq!(user.id, u2);
    assert_eq!(user.data["name"], "two");
}

#[tokio::test]
async fn test_auth_subscribers_in_registration_order() {
    let f = fixture(false);
    let seen = Arc::new(Mutex::new(Vec::new()));
    for name in ["A", "B", "C"] {
        let s = Arc::clone(&seen);
        f.mirror.on_auth_change(move |session| {
            s.lock().push(format!("{name}:{}", session.is_some()));
        });
    }

    f.mirror.initialize().await.unwrap();
    let mut processed = f.mirror.bridge().processed();
    f.identity.set_session(Some(Session::new("u1")));
    processed.wait_for(|n| *n >= 2).await.unwrap();

    assert_eq!(
        *seen.lock(),
        vec!["A:false", "B:false", "C:false", "A:true", "B:true", "C:true"]
    );
}

#[tokio::test]
async fn test_removed_state_listener_stops_receiving() {
    let f = fixture(false);
    let count = Arc::new(Mutex::new(0));
    let c = Arc::clone(&count);
    let id = f.mirror.on_next_state(move |_| *c.lock() += 1);

    f.mirror.initialize().await.unwrap();
    let before = *count.lock();
    assert!(f.mirror.remove_state_listener(id));

    seed_programs(&f.remote, &["p9"]);
    assert_eq!(*count.lock(), before);
    assert_eq!(f.mirror.snapshot().programs.len(), 1);
}

// --- Enrollment ---

#[tokio::test]
async fn test_enroll_round_trip_through_watch() {
    let f = fixture(false);
    let u1 = UserId::from("u1");
    let p1 = ProgramId::from("p1");
    f.remote.put(
        &targets().enrollment_document(&u1, &p1),
        doc(json!({"programId": "p1", "enrolled": false})),
    );
    f.identity.set_session(Some(Session::new("u1")));
    f.mirror.initialize().await.unwrap();
    assert!(!f.mirror.snapshot().is_enrolled(&p1));

    assert!(f.mirror.set_enrollment(&p1, true).await.unwrap());

    let now = f.clock.now();
    let stored = f.remote.document(&targets().enrollment_document(&u1, &p1)).unwrap();
    assert_eq!(
        Value::Object(stored),
        json!({"programId": "p1", "enrolled": true, "joinedOn": now.0})
    );

    let state = f.mirror.snapshot();
    let record = state.enrollment(&p1).unwrap();
    assert!(record.enrolled);
    assert_eq!(record.joined_on, Some(now));
}

#[tokio::test]
async fn test_withdraw_keeps_join_time() {
    let f = fixture(false);
    let p1 = ProgramId::from("p1");
    f.identity.set_session(Some(Session::new("u1")));
    f.mirror.initialize().await.unwrap();

    f.mirror.set_enrollment(&p1, true).await.unwrap();
    let joined = f.mirror.snapshot().enrollment(&p1).unwrap().joined_on;

    f.clock.advance(5_000_000);
    f.mirror.set_enrollment(&p1, true).await.unwrap();
    assert_eq!(f.mirror.snapshot().enrollment(&p1).unwrap().joined_on, joined);

    f.clock.advance(5_000_000);
    f.mirror.set_enrollment(&p1, false).await.unwrap();
    let state = f.mirror.snapshot();
    let record = state.enrollment(&p1).unwrap();
    assert!(!record.enrolled);
    assert_eq!(record.joined_on, joined);
}

#[tokio::test]
async fn test_enrollment_map_tracks_latest_collection() {
    let f = fixture(false);
    let u1 = UserId::from("u1");
    f.identity.set_session(Some(Session::new("u1")));
    f.mirror.initialize().await.unwrap();

    for id in ["p1", "p2"] {
        f.mirror.set_enrollment(&id.into(), true).await.unwrap();
    }
    assert_eq!(f.mirror.snapshot().user_enrollments.len(), 2);

    f.remote.remove(&targets().enrollment_document(&u1, &"p1".into()));

    let state = f.mirror.snapshot();
    let keys: Vec<_> = state.user_enrollments.keys().cloned().collect();
    assert_eq!(keys, vec![ProgramId::from("p2")]);
}

// --- User document updates ---

#[tokio::test]
async fn test_user_document_updates_merge() {
    let f = fixture(false);
    let u1 = UserId::from("u1");
    f.remote.put(&targets().user_document(&u1), doc(json!({"name": "Ada"})));
    f.identity.set_session(Some(Session::new("u1")));
    f.mirror.initialize().await.unwrap();
    assert!(!f.mirror.snapshot().onboarded);

    f.mirror.update_onboarded_status(true).await.unwrap();
    f.mirror.update_platform_enrollment(true).await.unwrap();
    f.mirror
        .update_demographic_survey(json!({"age": 30}))
        .await
        .unwrap();

    let stored = f.remote.document(&targets().user_document(&u1)).unwrap();
    assert_eq!(
        Value::Object(stored),
        json!({
            "name": "Ada",
            "onboarded": true,
            "enrolled": true,
            "demographicsData": {"age": 30}
        })
    );
    assert!(f.mirror.snapshot().onboarded);
}

// --- Tokens ---

#[tokio::test]
async fn test_sign_in_broadcasts_program_tokens() {
    let f = fixture(true);
    seed_programs(&f.remote, &["p1", "p2"]);
    let events = f.bus.subscribe();

    f.mirror
        .bridge()
        .handle_transition(Some(Session::new("u1")))
        .await
        .unwrap();
    let result = f.mirror.wait_for_token_sweep().await;

    assert!(matches!(result, Some(Ok(2))));
    let received: Vec<SignupCompleted> = events.try_iter().collect();
    let ids: Vec<_> = received.iter().map(|e| e.program_id.as_str()).collect();
    assert_eq!(ids, vec!["p1", "p2"]);
    assert_eq!(received[0].token, "token-p1");
}

// --- Sign-in ---

#[tokio::test]
async fn test_host_provider_message_signs_in() {
    let f = fixture(false);
    f.identity
        .add_provider_session("google", Session::new("g1"));
    f.mirror.initialize().await.unwrap();
    let mut processed = f.mirror.bridge().processed();

    let reply = f
        .mirror
        .handle_host_message(&json!({"provider": "google"}))
        .await;
    assert!(reply.is_none());

    processed.wait_for(|n| *n >= 2).await.unwrap();
    assert_eq!(f.mirror.binding_state(), BindingState::Bound("g1".into()));
}

#[tokio::test]
async fn test_unverified_password_sign_in_stays_unbound() {
    let f = fixture(false);
    f.identity.add_account("new@example.com", "pw", "u7", false);
    f.mirror.initialize().await.unwrap();
    let mut processed = f.mirror.bridge().processed();

    let outcome = f
        .mirror
        .sign_in()
        .sign_in_with_password("new@example.com", "pw")
        .await
        .unwrap();

    assert!(matches!(outcome, SignInOutcome::VerificationSent { .. }));
    processed.wait_for(|n| *n >= 2).await.unwrap();
    assert_eq!(f.mirror.binding_state(), BindingState::Unbound);
    assert_eq!(f.identity.verification_emails(), vec!["new@example.com"]);
}

#[tokio::test]
async fn test_sign_out_clears_user_state() {
    let f = fixture(false);
    let u1 = UserId::from("u1");
    f.remote.put(&targets().user_document(&u1), doc(json!({"onboarded": true})));
    f.identity.set_session(Some(Session::new("u1")));
    f.mirror.initialize().await.unwrap();
    assert!(f.mirror.snapshot().user.is_some());
    let mut processed = f.mirror.bridge().processed();

    f.mirror.sign_in().sign_out().await.unwrap();
    processed.wait_for(|n| *n >= 2).await.unwrap();

    let state = f.mirror.snapshot();
    assert!(state.user.is_none());
    assert!(state.user_enrollments.is_empty());
    assert!(!state.onboarded);
}

#[test]
fn test_custom_collections() {
    let config = MirrorConfig {
        users_collection: "members".to_string(),
        ..Default::default()
    };
    assert_eq!(
        config.targets().user_document(&"u1".into()).parent(),
        CollectionPath::root("members")
    );
}
