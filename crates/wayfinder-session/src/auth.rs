//! Authentication hook for validating device identity.
//!
//! Wayfinder doesn't implement authentication itself; it defines the
//! [`Authenticator`] trait and calls it during the ready handshake.
//! Production deployments validate a signed token against their identity
//! provider, development and tests plug in permissive implementations.

use crate::SessionError;

/// The identity an authenticator vouches for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthClaims {
    pub user_id: String,
    pub username: String,
}

/// Validates a device's credentials during the ready handshake.
///
/// `Send + Sync + 'static` because the authenticator is shared across
/// connection-handler tasks for the life of the server.
pub trait Authenticator: Send + Sync + 'static {
    /// Validates `token` for the claimed `user_id`.
    ///
    /// # Returns
    /// - `Ok(AuthClaims)` — the caller is who they say they are
    /// - `Err(SessionError::AuthFailed)` — credentials rejected
    fn authenticate(
        &self,
        user_id: &str,
        token: &str,
    ) -> impl std::future::Future<Output = Result<AuthClaims, SessionError>> + Send;
}
