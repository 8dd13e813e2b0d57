/// Shown to the user when the backend rejects the stored credential.
pub const SESSION_EXPIRED_MESSAGE: &str = "Login expired, please login again";

/// UI-side reaction to an expired session.
///
/// Implementations must be Send + Sync (called from tokio tasks).
pub trait SessionNotifier: Send + Sync {
    /// Drop in-memory login state (user profile, logged-in flag).
    fn force_logout(&self);
    fn navigate_to_login(&self);
    fn notify_user(&self, message: &str);
}

/// Notifier for headless shells: records the expiry in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSessionNotifier;

impl SessionNotifier for TracingSessionNotifier {
    fn force_logout(&self) {
        tracing::info!("session: forced logout");
    }

    fn navigate_to_login(&self) {
        tracing::info!("session: navigating to login");
    }

    fn notify_user(&self, message: &str) {
        tracing::warn!("session: {message}");
    }
}
