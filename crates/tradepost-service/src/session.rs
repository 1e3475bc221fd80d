//! The session gate every protected view composes with.

use tradepost_api::{ApiError, User};

use crate::caching::{CacheKey, CacheStatus, CachedData, QueryCoordinator, QuerySnapshot, Subscription};

/// Authentication state, derived from the reserved session cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No probe has been issued yet.
    Unknown,
    /// The probe is in flight; protected views must not render yet.
    Probing,
    /// The probe resolved to an authenticated user.
    Authenticated(User),
    /// The probe resolved: nobody is logged in.
    ///
    /// This includes probe failures classified as "not logged in"
    /// (see [`ApiError::is_unauthorized`]), which are an expected outcome.
    Anonymous,
    /// The probe itself failed for a non-auth reason.
    ///
    /// The only state with a retry affordance; every other state is terminal
    /// until a session-changing mutation invalidates the entry.
    ProbeFailed(ApiError),
}

impl SessionState {
    /// The authenticated user, if any.
    pub fn user(&self) -> Option<&User> {
        match self {
            SessionState::Authenticated(user) => Some(user),
            _ => None,
        }
    }

    /// Whether the caller may render admin views.
    pub fn is_admin(&self) -> bool {
        self.user().is_some_and(|user| user.is_admin)
    }
}

/// Decides, before any protected view renders, whether the caller is
/// authenticated.
///
/// The gate is a state machine over the reserved session key of the cache:
/// `Unknown` until the first probe, `Probing` while one is in flight, then
/// `Authenticated`, `Anonymous` or `ProbeFailed`. Session-changing mutations
/// (login, logout, register, profile update) invalidate the entry and the
/// gate re-probes on its next resolve.
///
/// Views receive the gate by reference from whichever composition mounted
/// it; the dependency is declared, not ambient.
#[derive(Debug, Clone)]
pub struct SessionGate {
    queries: QueryCoordinator,
}

impl SessionGate {
    pub fn new(queries: QueryCoordinator) -> Self {
        SessionGate { queries }
    }

    /// The current state, without issuing a probe.
    pub fn state(&self) -> SessionState {
        Self::from_snapshot(
            self.queries
                .peek(&CacheKey::Session)
                .map_data(CachedData::into_session),
        )
    }

    /// Resolves the gate, probing if the session was never fetched or was
    /// invalidated by a session-changing mutation.
    ///
    /// Unlike product reads, session reads never serve stale data; the
    /// resolve awaits the probe so protected views only ever render against
    /// the authoritative state.
    pub async fn resolve(&self) -> SessionState {
        metric!(counter("session.probe") += 1);
        Self::from_snapshot(self.queries.session().await)
    }

    /// Re-issues a failed probe.
    ///
    /// Only meaningful from [`SessionState::ProbeFailed`]; in every other
    /// state this returns the current state unchanged.
    pub async fn retry(&self) -> SessionState {
        match self.state() {
            SessionState::ProbeFailed(_) => {
                tracing::debug!("Retrying failed session probe");
                Self::from_snapshot(
                    self.queries
                        .refetch(CacheKey::Session)
                        .await
                        .map_data(CachedData::into_session),
                )
            }
            other => other,
        }
    }

    /// Mounts a subscription on the session key, so a shell view can react
    /// to state changes caused by mutations elsewhere.
    pub fn subscribe(&self) -> Subscription {
        self.queries.subscribe(CacheKey::Session)
    }

    fn from_snapshot(snapshot: QuerySnapshot<Option<User>>) -> SessionState {
        match snapshot.status {
            CacheStatus::Idle => SessionState::Unknown,
            CacheStatus::Loading => SessionState::Probing,
            CacheStatus::Success => match snapshot.data.flatten() {
                Some(user) => SessionState::Authenticated(user),
                None => SessionState::Anonymous,
            },
            CacheStatus::Error => snapshot
                .error
                .map(SessionState::ProbeFailed)
                // entries uphold "Error implies error present"; this arm is
                // unreachable in practice
                .unwrap_or(SessionState::Unknown),
        }
    }
}
