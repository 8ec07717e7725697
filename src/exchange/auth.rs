//! Credential injection and refresh.
//!
//! # Session states
//!
//! ```text
//! Anonymous --sign_in--> Valid --(expired | auth failure)--> Refreshing
//!                          ^                                   |    |
//!                          +------------- ok ------------------+    |
//!                                                       failed      v
//!                                                               Invalid
//! ```
//!
//! `Invalid` is terminal until [`Session::sign_in`] seeds a new credential.
//! Only this module moves a session into `Refreshing`, `Valid` (after a
//! refresh) or `Invalid`.
//!
//! # Refresh
//!
//! At most one refresh is outstanding per session. The refresh future is
//! stored in the session state as a [`Shared`] future; operations arriving
//! while it runs await the same future and are released together once it
//! resolves.
//!
//! An operation that comes back with an authentication error triggers one
//! refresh and is replayed once with the new credential. Whatever the replay
//! returns is final. When the refresh fails, the original error is returned.
//! A failure observed with a credential that has already been replaced by a
//! concurrent refresh replays straight away without refreshing again.

use super::{deferred, first_result, from_future, once, Exchange, Next, ResultStream};
use crate::error::ExchangeError;
use crate::operation::{Operation, OperationKind, OperationResult, ResultSource};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

type SharedRefresh = Shared<BoxFuture<'static, Option<Credential>>>;

/// Access token plus what is needed to renew it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Whether the credential expires within `leeway` of `now`.
    pub fn is_expired(&self, now: DateTime<Utc>, leeway: chrono::Duration) -> bool {
        self.expires_at
            .map(|expires_at| expires_at - leeway <= now)
            .unwrap_or(false)
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

// Tokens stay out of logs
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    #[error("refresh token rejected: {0}")]
    Rejected(String),

    #[error("refresh request failed: {0}")]
    Unavailable(String),
}

/// Backend that trades a stale credential for a fresh one.
#[async_trait]
pub trait CredentialRefresher: Send + Sync + 'static {
    async fn refresh(&self, stale: Credential) -> Result<Credential, RefreshError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Anonymous,
    Valid,
    Refreshing,
    Invalid,
}

enum SessionState {
    Anonymous,
    Valid(Credential),
    Refreshing(SharedRefresh),
    Invalid,
}

struct SessionInner {
    state: SessionState,
    /// Bumped by every external sign-in / sign-out so that a refresh started
    /// before it cannot overwrite the newer state.
    generation: u64,
}

/// Shared handle to the signed-in user's credential.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Mutex<SessionInner>>,
}

impl Session {
    pub fn anonymous() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionInner {
                state: SessionState::Anonymous,
                generation: 0,
            })),
        }
    }

    pub fn signed_in(credential: Credential) -> Self {
        let session = Self::anonymous();
        session.sign_in(credential);
        session
    }

    /// Seed a credential, leaving any `Invalid` or `Refreshing` state behind.
    pub fn sign_in(&self, credential: Credential) {
        let mut inner = self.lock();
        inner.state = SessionState::Valid(credential);
        inner.generation += 1;
        info!("Session signed in");
    }

    pub fn sign_out(&self) {
        let mut inner = self.lock();
        inner.state = SessionState::Anonymous;
        inner.generation += 1;
        info!("Session signed out");
    }

    pub fn status(&self) -> SessionStatus {
        match self.lock().state {
            SessionState::Anonymous => SessionStatus::Anonymous,
            SessionState::Valid(_) => SessionStatus::Valid,
            SessionState::Refreshing(_) => SessionStatus::Refreshing,
            SessionState::Invalid => SessionStatus::Invalid,
        }
    }

    /// The current credential, if the session is `Valid`.
    pub fn credential(&self) -> Option<Credential> {
        match &self.lock().state {
            SessionState::Valid(credential) => Some(credential.clone()),
            _ => None,
        }
    }

    // State is replaced wholesale under the lock, so a poisoned guard
    // still holds a consistent value.
    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::anonymous()
    }
}

/// What to do with operations issued while the session is `Invalid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvalidPolicy {
    /// Send without credentials and let the API decide.
    #[default]
    ProceedUnauthenticated,
    /// Answer with an authentication error without touching the network.
    FailFast,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub invalid_policy: InvalidPolicy,
    /// Refresh credentials this long before they actually expire.
    pub expiry_leeway: chrono::Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            invalid_policy: InvalidPolicy::default(),
            expiry_leeway: chrono::Duration::seconds(30),
        }
    }
}

enum Acquired {
    Token(Credential),
    Anonymous,
    Invalid,
}

struct AuthInner {
    session: Session,
    refresher: Arc<dyn CredentialRefresher>,
    config: AuthConfig,
}

impl AuthInner {
    /// Wait for a usable credential, refreshing an expired one first.
    async fn acquire(&self) -> Acquired {
        let pending = {
            let mut inner = self.session.lock();
            match &inner.state {
                SessionState::Anonymous => return Acquired::Anonymous,
                SessionState::Invalid => return Acquired::Invalid,
                SessionState::Refreshing(pending) => pending.clone(),
                SessionState::Valid(credential) => {
                    if !credential.is_expired(Utc::now(), self.config.expiry_leeway) {
                        return Acquired::Token(credential.clone());
                    }
                    debug!("Credential expired, refreshing before sending");
                    let stale = credential.clone();
                    self.start_refresh(&mut inner, stale)
                }
            }
        };

        match pending.await {
            Some(credential) => Acquired::Token(credential),
            None => Acquired::Invalid,
        }
    }

    /// Refresh after `failed` was rejected, unless someone already did.
    async fn refresh_after_failure(&self, failed: &Credential) -> Option<Credential> {
        let pending = {
            let mut inner = self.session.lock();
            match &inner.state {
                SessionState::Anonymous | SessionState::Invalid => return None,
                SessionState::Refreshing(pending) => pending.clone(),
                SessionState::Valid(current) if current.access_token != failed.access_token => {
                    debug!("Credential already refreshed by another operation");
                    return Some(current.clone());
                }
                SessionState::Valid(current) => {
                    let stale = current.clone();
                    self.start_refresh(&mut inner, stale)
                }
            }
        };
        pending.await
    }

    /// Move the session into `Refreshing`. Must be called with the lock held.
    fn start_refresh(&self, inner: &mut SessionInner, stale: Credential) -> SharedRefresh {
        let generation = inner.generation;
        let session = self.session.clone();
        let refresher = Arc::clone(&self.refresher);

        let pending = async move {
            info!("Refreshing credential");
            let outcome = refresher.refresh(stale).await;

            let mut inner = session.lock();
            if inner.generation != generation {
                debug!("Session changed during refresh, keeping the newer state");
                return match &inner.state {
                    SessionState::Valid(current) => Some(current.clone()),
                    _ => None,
                };
            }

            match outcome {
                Ok(fresh) => {
                    info!("Credential refreshed");
                    inner.state = SessionState::Valid(fresh.clone());
                    Some(fresh)
                }
                Err(e) => {
                    warn!("Credential refresh failed, session is now invalid: {}", e);
                    inner.state = SessionState::Invalid;
                    None
                }
            }
        }
        .boxed()
        .shared();

        inner.state = SessionState::Refreshing(pending.clone());
        pending
    }

    fn fail_fast(operation: &Operation) -> OperationResult {
        OperationResult::from_error(
            operation,
            ExchangeError::authentication("session is invalid, sign in again"),
            ResultSource::Synthesized,
        )
    }
}

fn authorize(operation: &Operation, credential: &Credential) -> Operation {
    operation
        .clone()
        .with_header("Authorization", credential.bearer())
}

#[derive(Clone)]
pub struct AuthExchange {
    inner: Arc<AuthInner>,
}

impl AuthExchange {
    pub fn new(session: Session, refresher: Arc<dyn CredentialRefresher>, config: AuthConfig) -> Self {
        Self {
            inner: Arc::new(AuthInner {
                session,
                refresher,
                config,
            }),
        }
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    fn subscribe(&self, operation: Operation, next: Next) -> ResultStream {
        let inner = Arc::clone(&self.inner);
        deferred(async move {
            match inner.acquire().await {
                Acquired::Token(credential) => next.run(authorize(&operation, &credential)),
                Acquired::Invalid if inner.config.invalid_policy == InvalidPolicy::FailFast => {
                    once(AuthInner::fail_fast(&operation))
                }
                Acquired::Invalid | Acquired::Anonymous => next.run(operation),
            }
        })
    }

    fn request(&self, operation: Operation, next: Next) -> ResultStream {
        let inner = Arc::clone(&self.inner);
        from_future(async move {
            let credential = match inner.acquire().await {
                Acquired::Token(credential) => credential,
                Acquired::Anonymous => return first_result(next.run(operation.clone()), &operation).await,
                Acquired::Invalid => {
                    return match inner.config.invalid_policy {
                        InvalidPolicy::FailFast => AuthInner::fail_fast(&operation),
                        InvalidPolicy::ProceedUnauthenticated => {
                            first_result(next.run(operation.clone()), &operation).await
                        }
                    };
                }
            };

            let result =
                first_result(next.clone().run(authorize(&operation, &credential)), &operation).await;
            if !result.is_auth_error() {
                return result;
            }

            warn!(key = %operation.key(), "Operation was rejected, refreshing credential once");
            match inner.refresh_after_failure(&credential).await {
                Some(fresh) => {
                    info!(key = %operation.key(), "Replaying operation with refreshed credential");
                    first_result(next.run(authorize(&operation, &fresh)), &operation).await
                }
                None => result,
            }
        })
    }
}

impl Exchange for AuthExchange {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn call(&self, operation: Operation, next: Next) -> ResultStream {
        match operation.kind() {
            OperationKind::Subscription => self.subscribe(operation, next),
            OperationKind::Query | OperationKind::Mutation => self.request(operation, next),
        }
    }
}
