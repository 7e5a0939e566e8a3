//! Session cache behaviour against the in-memory backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use adapters::memory::InMemoryBackend;
use adapters::{AuthEvent, BackendEndpoint, BackendFactory, FactoryProbe, Identity, Record};
use async_trait::async_trait;
use portal::auth::acquisition::ReadinessPolicy;
use portal::auth::errors::AuthError;
use portal::auth::mirror::{MemoryStore, PersistedSnapshot, PersistenceMirror};
use portal::auth::models::{Session, SessionPhase};
use portal::auth::observers::ObserverResult;
use portal::auth::service::SessionCache;
use rstest::{fixture, rstest};
use serde_json::{json, Value};
use tokio::sync::mpsc;

fn record(value: Value) -> Record {
    value.as_object().cloned().expect("object")
}

fn jane() -> Identity {
    Identity::new("u1", Some("a@b.com"))
}

fn jane_profile() -> Record {
    record(json!({"admin_full_name": "Jane Doe"}))
}

#[fixture]
fn mirror() -> PersistenceMirror {
    PersistenceMirror::new(Arc::new(MemoryStore::default()))
}

fn backend_with_jane() -> Arc<InMemoryBackend> {
    let backend = Arc::new(InMemoryBackend::new().with_account(jane(), "hunter22"));
    backend.seed(
        "schools",
        vec![record(json!({
            "user_id": "u1",
            "admin_full_name": "Jane Doe",
            "region": "Central"
        }))],
    );
    backend
}

fn cache_over(backend: &Arc<InMemoryBackend>, mirror: &PersistenceMirror) -> Arc<SessionCache> {
    Arc::new(SessionCache::with_backend(backend.clone(), mirror.clone()))
}

#[rstest]
#[tokio::test]
async fn authenticated_user_is_cached_and_mirrored(mirror: PersistenceMirror) {
    let backend = backend_with_jane();
    backend.set_current(Some(jane()));
    let cache = cache_over(&backend, &mirror);

    let session = cache.refresh().await.expect("refresh");

    assert!(session.authenticated);
    assert_eq!(session.user.as_ref().map(|u| u.id.as_str()), Some("u1"));
    assert_eq!(session.profile, Some(jane_profile()));
    assert_eq!(cache.phase(), SessionPhase::Authenticated);
    assert_eq!(
        mirror.load(),
        Some(PersistedSnapshot {
            user: Some(jane()),
            profile: Some(jane_profile()),
        })
    );
}

#[rstest]
#[tokio::test]
async fn absent_user_clears_cache_and_mirror(mirror: PersistenceMirror) {
    mirror.save(&PersistedSnapshot {
        user: Some(jane()),
        profile: Some(jane_profile()),
    });
    let backend = backend_with_jane();
    let cache = cache_over(&backend, &mirror);

    let session = cache.refresh().await.expect("refresh");

    assert_eq!(session, Session::signed_out());
    assert_eq!(cache.phase(), SessionPhase::Unauthenticated);
    assert!(mirror.load().is_none());
}

#[rstest]
#[tokio::test]
async fn missing_profile_keeps_user_authenticated(mirror: PersistenceMirror) {
    let backend = backend_with_jane();
    backend.fail_reads("schools");
    backend.set_current(Some(jane()));
    let cache = cache_over(&backend, &mirror);

    let session = cache.refresh().await.expect("refresh");

    assert!(session.is_signed_in());
    assert!(session.profile.is_none());
}

#[rstest]
#[tokio::test]
async fn rejected_sign_out_leaves_session_untouched(mirror: PersistenceMirror) {
    let backend = backend_with_jane();
    backend.set_current(Some(jane()));
    let cache = cache_over(&backend, &mirror);
    let before = cache.refresh().await.expect("refresh");

    backend.fail_next_sign_out("network down");
    let err = cache.sign_out().await.expect_err("sign out rejected");

    assert!(matches!(err, AuthError::Backend(_)));
    assert_eq!(cache.snapshot(), before);
    assert_eq!(cache.phase(), SessionPhase::Authenticated);
    assert!(mirror.load().is_some());
}

#[rstest]
#[tokio::test]
async fn identity_failure_keeps_state_and_marks_loaded(mirror: PersistenceMirror) {
    let backend = backend_with_jane();
    backend.fail_identity(Some("connection reset"));
    let cache = cache_over(&backend, &mirror);

    assert!(cache.refresh().await.is_err());
    assert!(cache.is_loaded());
    assert_eq!(cache.snapshot(), Session::signed_out());
}

#[rstest]
#[case::sign_in_only(&["in"], true)]
#[case::sign_in_then_out(&["in", "out"], false)]
#[case::out_then_refresh(&["out", "refresh"], true)]
#[case::refresh_then_out(&["in", "refresh", "out"], false)]
#[case::repeated_sign_in(&["in", "in"], true)]
#[case::out_twice(&["in", "out", "out"], false)]
#[tokio::test]
async fn latest_event_decides_authentication(
    mirror: PersistenceMirror,
    #[case] events: &[&str],
    #[case] expected: bool,
    #[values(false, true)] profile_fails: bool,
) {
    let backend = backend_with_jane();
    if profile_fails {
        backend.fail_reads("schools");
    }
    let cache = cache_over(&backend, &mirror);

    for name in events {
        let event = match *name {
            "in" => AuthEvent::SignedIn(jane()),
            "refresh" => AuthEvent::TokenRefreshed(jane()),
            _ => AuthEvent::SignedOut,
        };
        backend.set_current(event.identity().cloned());
        cache.apply_event(event).await;
    }

    assert_eq!(cache.snapshot().authenticated, expected);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn concurrent_refreshes_share_one_backend_call(mirror: PersistenceMirror) {
    let backend = backend_with_jane();
    backend.set_current(Some(jane()));
    backend.set_identity_latency(Duration::from_millis(50));
    let cache = cache_over(&backend, &mirror);

    let (first, second, third) = tokio::join!(cache.refresh(), cache.refresh(), cache.refresh());

    assert_eq!(backend.identity_calls(), 1);
    let first = first.expect("first");
    assert_eq!(second.expect("second"), first);
    assert_eq!(third.expect("third"), first);
}

#[rstest]
#[tokio::test]
async fn late_subscriber_receives_current_session(mirror: PersistenceMirror) {
    let backend = backend_with_jane();
    backend.set_current(Some(jane()));
    let cache = cache_over(&backend, &mirror);

    let calls = Arc::new(AtomicUsize::new(0));
    let early = calls.clone();
    cache.subscribe(Arc::new(move |_: &Session| -> ObserverResult {
        early.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    cache.refresh().await.expect("refresh");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let seen = Arc::new(std::sync::Mutex::new(None));
    let sink = seen.clone();
    cache.subscribe(Arc::new(move |session: &Session| -> ObserverResult {
        *sink.lock().expect("lock") = Some(session.display_name());
        Ok(())
    }));
    assert_eq!(seen.lock().expect("lock").as_deref(), Some("Jane Doe"));
}

#[rstest]
#[tokio::test]
async fn unique_subscription_is_notified_once(mirror: PersistenceMirror) {
    let backend = backend_with_jane();
    let cache = cache_over(&backend, &mirror);

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let observer: Arc<dyn portal::auth::observers::SessionObserver> =
        Arc::new(move |_: &Session| -> ObserverResult {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

    let first = cache.subscribe_unique(observer.clone());
    let second = cache.subscribe_unique(observer.clone());
    assert_eq!(first, second);

    cache.apply_event(AuthEvent::SignedOut).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    cache.subscribe(observer);
    cache.refresh().await.expect("refresh");
    // The plain subscription replayed once on registration, then both entries fired.
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[rstest]
#[tokio::test]
async fn sign_in_and_out_round_trip(mirror: PersistenceMirror) {
    let backend = backend_with_jane();
    let cache = cache_over(&backend, &mirror);

    let err = cache
        .sign_in("a@b.com", "wrong")
        .await
        .expect_err("bad password");
    assert_eq!(err.to_string(), "Invalid email or password. Please check your credentials and try again.");

    let session = cache.sign_in(" A@B.com ", "hunter22").await.expect("sign in");
    assert!(session.is_signed_in());
    assert_eq!(session.navigation().display_name.as_deref(), Some("Jane Doe"));

    let session = cache.sign_out().await.expect("sign out");
    assert!(!session.authenticated);
    assert!(mirror.load().is_none());
}

#[rstest]
#[tokio::test]
async fn pushed_events_reach_observers(mirror: PersistenceMirror) {
    let backend = backend_with_jane();
    let cache = cache_over(&backend, &mirror);
    let pump = cache.listen().expect("event pump");

    let (tx, mut rx) = mpsc::unbounded_channel();
    cache.subscribe(Arc::new(move |session: &Session| -> ObserverResult {
        tx.send(session.authenticated)?;
        Ok(())
    }));

    backend.set_current(Some(jane()));
    backend.push_event(AuthEvent::SignedIn(jane()));
    assert_eq!(rx.recv().await, Some(true));
    backend.set_current(None);
    backend.push_event(AuthEvent::SignedOut);
    assert_eq!(rx.recv().await, Some(false));

    drop(cache);
    pump.abort();
}

fn recording_observer(cache: &SessionCache) -> Arc<std::sync::Mutex<Vec<bool>>> {
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = seen.clone();
    cache.subscribe(Arc::new(move |session: &Session| -> ObserverResult {
        sink.lock().expect("lock").push(session.authenticated);
        Ok(())
    }));
    seen
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn queued_sign_in_event_does_not_revive_signed_out_session(mirror: PersistenceMirror) {
    let backend = backend_with_jane();
    let cache = cache_over(&backend, &mirror);
    let pump = cache.listen().expect("event pump");
    let seen = recording_observer(&cache);

    cache.sign_in("a@b.com", "hunter22").await.expect("sign in");
    cache.sign_out().await.expect("sign out");
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(*seen.lock().expect("lock"), vec![true, false]);
    assert!(!cache.snapshot().authenticated);
    assert_eq!(cache.phase(), SessionPhase::Unauthenticated);
    assert!(mirror.load().is_none());

    drop(cache);
    pump.abort();
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn queued_sign_out_event_does_not_end_newer_session(mirror: PersistenceMirror) {
    let backend = backend_with_jane();
    let cache = cache_over(&backend, &mirror);
    let pump = cache.listen().expect("event pump");

    cache.sign_in("a@b.com", "hunter22").await.expect("sign in");
    cache.sign_out().await.expect("sign out");
    cache.sign_in("a@b.com", "hunter22").await.expect("sign in again");
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(cache.snapshot().is_signed_in());
    assert!(mirror.load().is_some());

    drop(cache);
    pump.abort();
}

#[rstest]
#[tokio::test]
async fn unconfirmed_pushed_sign_in_is_dropped(mirror: PersistenceMirror) {
    let backend = backend_with_jane();
    let cache = cache_over(&backend, &mirror);

    let session = cache.apply_event(AuthEvent::SignedIn(jane())).await;
    assert!(!session.authenticated);

    backend.set_current(Some(Identity::new("u2", Some("c@d.com"))));
    let session = cache.apply_event(AuthEvent::TokenRefreshed(jane())).await;
    assert!(!session.authenticated);
    assert!(mirror.load().is_none());
}

#[rstest]
#[tokio::test]
async fn sign_up_without_session_keeps_current_user(mirror: PersistenceMirror) {
    let backend = backend_with_jane();
    let cache = cache_over(&backend, &mirror);
    cache.sign_in("a@b.com", "hunter22").await.expect("sign in");

    let outcome = cache
        .sign_up("new@school.ug", "longenough", Record::new())
        .await
        .expect("sign up");

    assert!(!outcome.session_issued);
    assert_eq!(outcome.identity.map(|user| user.email), Some(Some("new@school.ug".to_owned())));
    let session = cache.snapshot();
    assert_eq!(session.user.map(|user| user.id), Some("u1".to_owned()));
}

#[rstest]
#[tokio::test]
async fn confirmed_sign_up_becomes_the_session(mirror: PersistenceMirror) {
    let backend = backend_with_jane();
    backend.set_auto_confirm(true);
    let cache = cache_over(&backend, &mirror);

    let outcome = cache
        .sign_up("new@school.ug", "longenough", Record::new())
        .await
        .expect("sign up");

    assert!(outcome.session_issued);
    let session = cache.snapshot();
    assert!(session.is_signed_in());
    assert_eq!(session.user, outcome.identity);
    assert_eq!(cache.phase(), SessionPhase::Authenticated);
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn late_subscribers_end_on_the_latest_session(mirror: PersistenceMirror) {
    let cache = Arc::new(SessionCache::new(mirror));
    cache.apply_event(AuthEvent::SignedOut).await;

    let toggler = {
        let cache = cache.clone();
        tokio::spawn(async move {
            for round in 0..200 {
                let event = if round % 2 == 0 {
                    AuthEvent::SignedOut
                } else {
                    AuthEvent::SignedIn(jane())
                };
                cache.apply_event(event).await;
            }
        })
    };
    let subscriber = {
        let cache = cache.clone();
        tokio::task::spawn_blocking(move || {
            (0..50).map(|_| recording_observer(&cache)).collect::<Vec<_>>()
        })
    };

    toggler.await.expect("toggler");
    let observers = subscriber.await.expect("subscriber");

    let latest = cache.snapshot().authenticated;
    assert!(latest);
    for seen in observers {
        assert_eq!(seen.lock().expect("lock").last(), Some(&latest));
    }
}

#[rstest]
#[tokio::test]
async fn offline_refresh_marks_cache_degraded(mirror: PersistenceMirror) {
    mirror.save(&PersistedSnapshot {
        user: Some(jane()),
        profile: None,
    });
    let cache = SessionCache::new(mirror);
    assert_eq!(cache.phase(), SessionPhase::Uninitialized);

    let session = cache.refresh().await.expect("refresh");

    assert!(session.advisory);
    assert_eq!(cache.phase(), SessionPhase::Degraded);
}

struct NeverReady;

#[async_trait]
impl FactoryProbe for NeverReady {
    async fn probe(&self) -> Option<Arc<dyn BackendFactory>> {
        None
    }
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn unavailable_backend_serves_advisory_mirror(mirror: PersistenceMirror) {
    mirror.save(&PersistedSnapshot {
        user: Some(jane()),
        profile: Some(jane_profile()),
    });
    let cache = Arc::new(SessionCache::new(mirror.clone()));
    let endpoint = BackendEndpoint::new(
        "https://backend.invalid".parse().expect("url"),
        "public-key",
    );
    let policy = ReadinessPolicy {
        max_attempts: 3,
        interval: Duration::from_millis(100),
    };

    let phase = cache
        .bootstrap(&NeverReady, &endpoint, policy)
        .await
        .expect("bootstrap");

    assert_eq!(phase, SessionPhase::Degraded);
    let session = cache.snapshot();
    assert!(session.advisory);
    assert!(!session.is_signed_in());
    assert_eq!(session.display_name(), "Jane Doe");
    assert!(matches!(
        cache.sign_in("a@b.com", "hunter22").await,
        Err(AuthError::Offline)
    ));
}
