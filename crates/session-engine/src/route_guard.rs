//! Render-or-redirect decision for protected views.

use crate::models::User;
use crate::session::SessionSnapshot;
use tokio::sync::watch;

/// What a protected view should show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Session state not settled yet.
    Loading,
    /// No session: send the user to the login view.
    RedirectToLogin {
        login_path: String,
        /// The path originally requested, to return to after login.
        return_to: Option<String>,
    },
    /// Session present: render the protected content.
    Render { user: User },
}

impl RouteDecision {
    pub fn is_render(&self) -> bool {
        matches!(self, RouteDecision::Render { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardOptions {
    pub login_path: String,
    /// Carry the requested path along with the redirect.
    pub remember_location: bool,
}

impl Default for GuardOptions {
    fn default() -> Self {
        Self {
            login_path: "/login".to_string(),
            remember_location: true,
        }
    }
}

/// Decide from a snapshot alone.
pub fn evaluate(snapshot: &SessionSnapshot, options: &GuardOptions, requested_path: &str) -> RouteDecision {
    if snapshot.is_loading {
        return RouteDecision::Loading;
    }
    match &snapshot.user {
        Some(user) => RouteDecision::Render { user: user.clone() },
        None => RouteDecision::RedirectToLogin {
            login_path: options.login_path.clone(),
            return_to: options
                .remember_location
                .then(|| requested_path.to_string()),
        },
    }
}

/// Guard bound to a live session.
///
/// Every decision is computed from the latest snapshot; nothing is cached.
pub struct RouteGuard {
    receiver: watch::Receiver<SessionSnapshot>,
    options: GuardOptions,
    requested_path: String,
}

impl RouteGuard {
    pub fn new(
        receiver: watch::Receiver<SessionSnapshot>,
        options: GuardOptions,
        requested_path: impl Into<String>,
    ) -> Self {
        Self {
            receiver,
            options,
            requested_path: requested_path.into(),
        }
    }

    pub fn requested_path(&self) -> &str {
        &self.requested_path
    }

    /// Decision for the current session state.
    pub fn decision(&self) -> RouteDecision {
        evaluate(&self.receiver.borrow(), &self.options, &self.requested_path)
    }

    /// Wait for the next session change and return the new decision.
    /// Returns `None` once the session manager is gone.
    pub async fn changed(&mut self) -> Option<RouteDecision> {
        self.receiver.changed().await.ok()?;
        let snapshot = self.receiver.borrow_and_update().clone();
        Some(evaluate(&snapshot, &self.options, &self.requested_path))
    }

    /// Wait until the session is no longer loading, then decide.
    pub async fn settled(&mut self) -> RouteDecision {
        let waited = self
            .receiver
            .wait_for(|snapshot| !snapshot.is_loading)
            .await
            .map(|snapshot| snapshot.clone());
        // A closed channel still holds the last published state
        let snapshot = match waited {
            Ok(snapshot) => snapshot,
            Err(_) => self.receiver.borrow().clone(),
        };
        evaluate(&snapshot, &self.options, &self.requested_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth_fsm::SessionPhase;
    use crate::models::UserRole;

    fn user() -> User {
        User {
            id: 7,
            username: "demo".to_string(),
            email: "demo@pganalytics.local".to_string(),
            full_name: "Demo User".to_string(),
            role: UserRole::Admin,
            is_active: true,
            is_verified: true,
            created_at: None,
            last_login: None,
        }
    }

    fn snapshot(phase: SessionPhase, user: Option<User>) -> SessionSnapshot {
        SessionSnapshot {
            phase,
            user,
            is_loading: phase.is_loading(),
        }
    }

    #[test]
    fn test_loading_while_initializing() {
        let decision = evaluate(
            &snapshot(SessionPhase::Initializing, None),
            &GuardOptions::default(),
            "/dashboard",
        );
        assert_eq!(decision, RouteDecision::Loading);
    }

    #[test]
    fn test_redirect_carries_requested_path() {
        let decision = evaluate(
            &snapshot(SessionPhase::Anonymous, None),
            &GuardOptions::default(),
            "/settings",
        );
        assert_eq!(
            decision,
            RouteDecision::RedirectToLogin {
                login_path: "/login".to_string(),
                return_to: Some("/settings".to_string()),
            }
        );
    }

    #[test]
    fn test_redirect_without_remembering_location() {
        let options = GuardOptions {
            remember_location: false,
            ..GuardOptions::default()
        };
        let decision = evaluate(&snapshot(SessionPhase::Anonymous, None), &options, "/settings");
        assert!(matches!(
            decision,
            RouteDecision::RedirectToLogin { return_to: None, .. }
        ));
    }

    #[test]
    fn test_render_when_authenticated() {
        let decision = evaluate(
            &snapshot(SessionPhase::Authenticated, Some(user())),
            &GuardOptions::default(),
            "/dashboard",
        );
        assert!(decision.is_render());
    }

    #[tokio::test]
    async fn test_guard_follows_session_changes() {
        let (tx, rx) = watch::channel(snapshot(SessionPhase::Authenticated, Some(user())));
        let mut guard = RouteGuard::new(rx, GuardOptions::default(), "/dashboard");
        assert!(guard.decision().is_render());

        tx.send_replace(snapshot(SessionPhase::Anonymous, None));

        // No stale render after the session is gone
        assert!(matches!(guard.decision(), RouteDecision::RedirectToLogin { .. }));
        assert!(matches!(
            guard.changed().await,
            Some(RouteDecision::RedirectToLogin { .. })
        ));

        drop(tx);
        assert_eq!(guard.changed().await, None);
    }

    #[tokio::test]
    async fn test_settled_waits_for_loading_to_finish() {
        let (tx, rx) = watch::channel(snapshot(SessionPhase::Initializing, None));
        let mut guard = RouteGuard::new(rx, GuardOptions::default(), "/dashboard");

        let waiter = tokio::spawn(async move { guard.settled().await });
        tx.send_replace(snapshot(SessionPhase::Authenticated, Some(user())));

        assert!(waiter.await.unwrap().is_render());
    }

    #[tokio::test]
    async fn test_settled_after_session_manager_dropped() {
        let (tx, rx) = watch::channel(snapshot(SessionPhase::Initializing, None));
        let mut guard = RouteGuard::new(rx, GuardOptions::default(), "/dashboard");

        drop(tx);

        assert_eq!(guard.settled().await, RouteDecision::Loading);
    }
}
