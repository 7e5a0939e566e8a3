//! Core business logic for the session cache.
//!
//! A single `SessionCache` is constructed at startup and shared by reference with
//! every consumer. It owns the backend handle once acquisition succeeds, the
//! current session snapshot, the persistence mirror and the observer list.
//!
//! Refreshes, pushed auth events and sign-out are serialised through one async
//! guard. Concurrent `refresh` callers share the result of the refresh that was in
//! flight when they arrived instead of issuing their own. A pushed event is checked
//! against the backend's current identity before it is applied, so an event
//! delivered after a newer sign-in or sign-out is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use adapters::{
    AdapterError, AuthEvent, BackendAdapter, BackendEndpoint, BackendHandle, Credentials,
    FactoryProbe, Filter, Identity, Record, RecordQuery, SignUpOutcome, SignUpRequest,
};
use once_cell::sync::OnceCell;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::acquisition::{acquire_backend_handle, Acquisition, AcquisitionError, ReadinessPolicy};
use super::errors::AuthError;
use super::mirror::PersistenceMirror;
use super::models::{Session, SessionPhase};
use super::observers::{notify, ObserverList, SessionObserver, SubscriptionId};

pub const PROFILE_TABLE: &str = "schools";
pub const PROFILE_COLUMNS: &str = "school_name, admin_full_name, profile_photo_url";

#[derive(Default)]
struct CacheState {
    session: Session,
    phase: SessionPhase,
    /// Set once the first refresh has completed, successfully or not.
    loaded: bool,
}

pub struct SessionCache {
    backend: OnceCell<BackendHandle>,
    mirror: PersistenceMirror,
    state: RwLock<CacheState>,
    observers: Mutex<ObserverList>,
    /// Held while a session is stored and delivered, so deliveries never reorder.
    delivery: Mutex<()>,
    flight: tokio::sync::Mutex<()>,
    refreshes: AtomicU64,
}

impl SessionCache {
    /// A cache with no backend yet; call [`SessionCache::bootstrap`] to acquire one.
    pub fn new(mirror: PersistenceMirror) -> Self {
        Self {
            backend: OnceCell::new(),
            mirror,
            state: RwLock::new(CacheState::default()),
            observers: Mutex::new(ObserverList::default()),
            delivery: Mutex::new(()),
            flight: tokio::sync::Mutex::new(()),
            refreshes: AtomicU64::new(0),
        }
    }

    /// A cache bound to an already constructed backend.
    pub fn with_backend(backend: BackendHandle, mirror: PersistenceMirror) -> Self {
        let cache = Self::new(mirror);
        cache.install(backend);
        cache
    }

    pub fn backend(&self) -> Option<BackendHandle> {
        self.backend.get().cloned()
    }

    pub fn snapshot(&self) -> Session {
        self.read_state().session.clone()
    }

    pub fn phase(&self) -> SessionPhase {
        self.read_state().phase
    }

    pub fn is_loaded(&self) -> bool {
        self.read_state().loaded
    }

    /// Acquires the backend, starts the auth event pump and runs the first refresh.
    ///
    /// Only a construction failure is returned; an unavailable backend leaves the
    /// cache in [`SessionPhase::Degraded`] serving mirror data.
    pub async fn bootstrap(
        self: &Arc<Self>,
        probe: &dyn FactoryProbe,
        endpoint: &BackendEndpoint,
        policy: ReadinessPolicy,
    ) -> Result<SessionPhase, AcquisitionError> {
        self.set_phase(SessionPhase::Acquiring);

        match acquire_backend_handle(probe, endpoint, policy).await {
            Ok(Acquisition::Ready(handle)) => {
                self.install(handle);
                self.listen();
            }
            Ok(Acquisition::Degraded { attempts }) => {
                warn!(attempts, "session cache running in offline mode");
                self.set_phase(SessionPhase::Degraded);
            }
            Err(err) => {
                self.set_phase(SessionPhase::Degraded);
                return Err(err);
            }
        }

        if let Err(err) = self.refresh().await {
            warn!(error = %err, "initial session check failed");
        }
        Ok(self.phase())
    }

    fn install(&self, backend: BackendHandle) {
        if self.backend.set(backend).is_err() {
            warn!("backend handle already installed, keeping the first one");
            return;
        }
        self.set_phase(SessionPhase::Ready);
    }

    /// Spawns the task that applies auth events pushed by the backend.
    ///
    /// The task holds a weak reference and ends when the cache is dropped or the
    /// backend closes its event stream.
    pub fn listen(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut events = self.backend()?.auth_events();
        let cache: Weak<Self> = Arc::downgrade(self);

        Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let Some(cache) = cache.upgrade() else { break };
                        cache.apply_event(event).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "auth events dropped, re-checking session");
                        let Some(cache) = cache.upgrade() else { break };
                        if let Err(err) = cache.refresh().await {
                            warn!(error = %err, "session re-check failed");
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("auth event pump stopped");
        }))
    }

    /// Re-reads the current identity from the backend.
    ///
    /// Without a backend the mirror is loaded as an advisory hint; the result is
    /// never authenticated.
    pub async fn refresh(&self) -> Result<Session, AuthError> {
        let observed = self.refreshes.load(Ordering::Acquire);
        let _flight = self.flight.lock().await;
        if self.refreshes.load(Ordering::Acquire) != observed {
            debug!("joined in-flight session refresh");
            return Ok(self.snapshot());
        }

        let result = self.refresh_locked().await;
        if result.is_ok() {
            self.refreshes.fetch_add(1, Ordering::AcqRel);
        }
        result
    }

    async fn refresh_locked(&self) -> Result<Session, AuthError> {
        let Some(backend) = self.backend() else {
            return Ok(self.restore_from_mirror());
        };

        match backend.current_identity().await {
            Ok(Some(identity)) => {
                info!(user = %identity.id, "user authenticated");
                Ok(self.establish(backend.as_ref(), identity).await)
            }
            Ok(None) => {
                info!("no authenticated user");
                Ok(self.clear())
            }
            Err(err) => {
                error!(error = %err, "error checking auth status");
                self.write_state().loaded = true;
                Err(AuthError::from_adapter(err))
            }
        }
    }

    /// Applies a pushed auth event and returns the resulting session.
    ///
    /// Events that no longer match the backend's current identity are dropped.
    pub async fn apply_event(&self, event: AuthEvent) -> Session {
        let _flight = self.flight.lock().await;
        info!(event = event.name(), "auth state changed");

        let Some(backend) = self.backend() else {
            return match event {
                AuthEvent::SignedIn(identity) | AuthEvent::TokenRefreshed(identity) => {
                    self.commit(Session::confirmed(identity, None), SessionPhase::Authenticated)
                }
                AuthEvent::SignedOut => self.clear(),
            };
        };

        match event {
            AuthEvent::SignedIn(identity) if self.is_current_user(&identity) => {
                debug!(user = %identity.id, "sign-in already reflected in session");
                self.snapshot()
            }
            AuthEvent::SignedIn(identity) | AuthEvent::TokenRefreshed(identity) => {
                match backend.current_identity().await {
                    Ok(Some(current)) if current.id == identity.id => {
                        self.establish(backend.as_ref(), current).await
                    }
                    Ok(_) => {
                        debug!(user = %identity.id, "dropping superseded sign-in event");
                        self.snapshot()
                    }
                    Err(err) => {
                        warn!(error = %err, "could not confirm pushed sign-in, ignoring it");
                        self.snapshot()
                    }
                }
            }
            AuthEvent::SignedOut if self.is_cleared() => {
                debug!("sign-out already reflected in session");
                self.snapshot()
            }
            AuthEvent::SignedOut => match backend.current_identity().await {
                Ok(Some(current)) => {
                    debug!(user = %current.id, "dropping superseded sign-out event");
                    self.snapshot()
                }
                Ok(None) => self.clear(),
                Err(err) => {
                    warn!(error = %err, "could not confirm pushed sign-out, clearing session");
                    self.clear()
                }
            },
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let backend = self.backend().ok_or(AuthError::Offline)?;
        let credentials = Credentials::new(email, password);

        let identity = backend.sign_in(&credentials).await.map_err(|err| {
            warn!(error = %err, "sign in failed");
            AuthError::from_adapter(err)
        })?;

        let _flight = self.flight.lock().await;
        info!(user = %identity.id, "user signed in");
        Ok(self.establish(backend.as_ref(), identity).await)
    }

    /// Creates an account. When the service confirms it on creation and issues a
    /// session, that session becomes the cached one.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Record,
    ) -> Result<SignUpOutcome, AuthError> {
        let backend = self.backend().ok_or(AuthError::Offline)?;
        let request = SignUpRequest {
            credentials: Credentials::new(email, password),
            metadata,
        };

        let outcome = backend.sign_up(&request).await.map_err(|err| {
            warn!(error = %err, "sign up failed");
            AuthError::from_adapter(err)
        })?;
        info!(
            email = %request.credentials.email,
            signed_in = outcome.session_issued,
            "account created"
        );

        if let (true, Some(identity)) = (outcome.session_issued, outcome.identity.clone()) {
            let _flight = self.flight.lock().await;
            self.establish(backend.as_ref(), identity).await;
        }
        Ok(outcome)
    }

    /// Invalidates the session. On failure the cached session is left untouched so
    /// the caller can offer a retry.
    pub async fn sign_out(&self) -> Result<Session, AuthError> {
        let _flight = self.flight.lock().await;

        if let Some(backend) = self.backend() {
            if let Err(err) = backend.sign_out().await {
                error!(error = %err, "logout failed");
                return Err(AuthError::from_adapter(err));
            }
        }

        info!("user logged out");
        Ok(self.clear())
    }

    pub async fn request_password_reset(&self, email: &str, redirect_to: &str) -> Result<(), AuthError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(AuthError::Rejected {
                message: "Please enter your email address first".to_owned(),
            });
        }
        let backend = self.backend().ok_or(AuthError::Offline)?;
        backend
            .reset_password(email, redirect_to)
            .await
            .map_err(AuthError::from_adapter)?;
        info!("password reset email requested");
        Ok(())
    }

    /// Registers `observer`; if the first refresh already completed it is invoked
    /// immediately with the current session.
    pub fn subscribe(&self, observer: Arc<dyn SessionObserver>) -> SubscriptionId {
        let _delivery = self.lock_delivery();
        let id = self.lock_observers().subscribe(Arc::clone(&observer));
        self.replay(observer);
        id
    }

    /// Like [`SessionCache::subscribe`], but an `Arc` that is already registered is
    /// neither added again nor replayed.
    pub fn subscribe_unique(&self, observer: Arc<dyn SessionObserver>) -> SubscriptionId {
        let _delivery = self.lock_delivery();
        let (id, created) = self.lock_observers().subscribe_unique(Arc::clone(&observer));
        if created {
            self.replay(observer);
        }
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.lock_observers().unsubscribe(id)
    }

    /// Caller holds the delivery lock.
    fn replay(&self, observer: Arc<dyn SessionObserver>) {
        let current = {
            let state = self.read_state();
            state.loaded.then(|| state.session.clone())
        };
        if let Some(session) = current {
            notify(&[observer], &session);
        }
    }

    async fn establish(&self, backend: &dyn BackendAdapter, identity: Identity) -> Session {
        let profile = fetch_profile(backend, &identity.id).await;
        let session = Session::confirmed(identity, profile);
        self.mirror.save(&session.persisted());
        self.commit(session, SessionPhase::Authenticated)
    }

    fn clear(&self) -> Session {
        self.mirror.clear();
        self.commit(Session::signed_out(), SessionPhase::Unauthenticated)
    }

    fn restore_from_mirror(&self) -> Session {
        let session = match self.mirror.load() {
            Some(snapshot) => {
                warn!("backend unavailable, showing saved session as a hint");
                Session::advisory(snapshot)
            }
            None => Session::signed_out(),
        };
        self.commit(session, SessionPhase::Degraded)
    }

    /// Stores `session` and notifies observers outside the state and observer
    /// locks. Observers must not call back into the cache.
    fn commit(&self, session: Session, phase: SessionPhase) -> Session {
        let _delivery = self.lock_delivery();
        {
            let mut state = self.write_state();
            state.session = session.clone();
            state.phase = match self.backend.get() {
                Some(_) => phase,
                None => SessionPhase::Degraded,
            };
            state.loaded = true;
        }
        let observers = self.lock_observers().snapshot();
        notify(&observers, &session);
        session
    }

    fn is_current_user(&self, identity: &Identity) -> bool {
        let state = self.read_state();
        state.session.is_signed_in()
            && state
                .session
                .user
                .as_ref()
                .is_some_and(|user| user.id == identity.id)
    }

    /// The first load finished and nobody, not even an advisory user, is shown.
    fn is_cleared(&self) -> bool {
        let state = self.read_state();
        state.loaded && !state.session.authenticated && state.session.user.is_none()
    }

    fn set_phase(&self, phase: SessionPhase) {
        self.write_state().phase = phase;
    }

    fn read_state(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_delivery(&self) -> MutexGuard<'_, ()> {
        self.delivery.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_observers(&self) -> MutexGuard<'_, ObserverList> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Best-effort profile lookup; failures leave the profile absent.
async fn fetch_profile(backend: &dyn BackendAdapter, user_id: &str) -> Option<Record> {
    let query = RecordQuery::table(PROFILE_TABLE)
        .columns(PROFILE_COLUMNS)
        .filter(Filter::eq("user_id", user_id))
        .single();

    match backend.select(&query).await {
        Ok(mut rows) => rows.pop(),
        Err(AdapterError::NotFound { .. }) => {
            debug!(user = user_id, "no profile record for user");
            None
        }
        Err(err) => {
            warn!(user = user_id, error = %err, "could not fetch user profile");
            None
        }
    }
}
