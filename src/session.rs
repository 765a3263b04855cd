//! Admin Session Gate.
//!
//! Each browser session carries one fact: whether it has authenticated as the
//! site administrator. Sessions live in an in-process registry keyed by a
//! random token that travels in an HttpOnly cookie. Mutating operations take
//! an [`Authenticated`] proof, which only [`AdminGate::check`] can produce.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::error::{ReelError, ReelResult};
use crate::security::{session_token, verify_password};
use crate::store::VideoStore;

pub const SESSION_COOKIE: &str = "reel_session";

/// Proof that the current request belongs to an authenticated session.
#[derive(Debug)]
pub struct Authenticated {
    _private: (),
}

#[cfg(test)]
impl Authenticated {
    pub(crate) fn for_tests() -> Self {
        Self { _private: () }
    }
}

/// Token -> expiry for every authenticated session.
#[derive(Debug)]
pub struct SessionRegistry {
    ttl: Duration,
    sessions: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl SessionRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn issue(&self) -> String {
        let token = session_token();
        self.sessions
            .write()
            .insert(token.clone(), Utc::now() + self.ttl);
        token
    }

    /// Expired entries are dropped the first time they are looked up.
    pub fn is_authenticated(&self, token: &str) -> bool {
        let now = Utc::now();
        let expiry = self.sessions.read().get(token).copied();
        match expiry {
            Some(expires_at) if now < expires_at => true,
            Some(_) => {
                self.sessions.write().remove(token);
                false
            }
            None => false,
        }
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.sessions.write().remove(token).is_some()
    }

    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, expires_at| now < *expires_at);
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Validates the single stored credential and guards admin operations.
#[derive(Debug)]
pub struct AdminGate {
    store: VideoStore,
    sessions: SessionRegistry,
}

impl AdminGate {
    pub fn new(store: VideoStore, ttl: Duration) -> Self {
        Self {
            store,
            sessions: SessionRegistry::new(ttl),
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Checks the credentials and opens a new authenticated session,
    /// returning its token.
    pub fn login(&self, username: &str, password: &str) -> ReelResult<String> {
        let credential = self
            .store
            .admin_credential()?
            .ok_or(ReelError::CredentialNotConfigured)?;

        let password_ok = verify_password(password, &credential.password_hash)?;
        if !password_ok || credential.username != username {
            warn!(username, "rejected admin login");
            return Err(ReelError::AuthRejected);
        }

        self.sessions.purge_expired();
        info!(username, "admin logged in");
        Ok(self.sessions.issue())
    }

    pub fn logout(&self, token: Option<&str>) {
        if let Some(token) = token {
            if self.sessions.revoke(token) {
                info!("admin logged out");
            }
        }
    }

    pub fn check(&self, token: Option<&str>) -> ReelResult<Authenticated> {
        match token {
            Some(token) if self.sessions.is_authenticated(token) => {
                Ok(Authenticated { _private: () })
            }
            _ => Err(ReelError::AuthRejected),
        }
    }
}

/// Pulls the session token out of a `Cookie` request header.
pub fn token_from_cookie_header(header: &str) -> Option<&str> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim_matches('"'))
        .filter(|value| !value.is_empty())
}

pub fn session_cookie(token: &str, ttl: Duration) -> String {
    format!(
        "{SESSION_COOKIE}={token}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
        ttl.num_seconds().max(0)
    )
}

pub fn expired_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::hash_password;
    use anyhow::Result;
    use tempfile::{TempDir, tempdir};

    const PASSWORD: &str = "a-long-enough-secret";

    fn gate_with_credential(ttl: Duration) -> Result<(TempDir, AdminGate)> {
        let dir = tempdir()?;
        let store = VideoStore::open(dir.path().join("reel.db"))?;
        store.set_admin_credential("admin", &hash_password(PASSWORD)?)?;
        Ok((dir, AdminGate::new(store, ttl)))
    }

    #[test]
    fn login_without_credential_is_refused() -> Result<()> {
        let dir = tempdir()?;
        let store = VideoStore::open(dir.path().join("reel.db"))?;
        let gate = AdminGate::new(store, Duration::hours(1));
        assert!(matches!(
            gate.login("admin", "admin123"),
            Err(ReelError::CredentialNotConfigured)
        ));
        assert!(gate.sessions().is_empty());
        Ok(())
    }

    #[test]
    fn login_rejects_wrong_password_or_username() -> Result<()> {
        let (_dir, gate) = gate_with_credential(Duration::hours(1))?;
        assert!(matches!(gate.login("admin", "nope"), Err(ReelError::AuthRejected)));
        assert!(matches!(gate.login("root", PASSWORD), Err(ReelError::AuthRejected)));
        assert!(gate.sessions().is_empty());
        Ok(())
    }

    #[test]
    fn login_check_logout_cycle() -> Result<()> {
        let (_dir, gate) = gate_with_credential(Duration::hours(1))?;
        assert!(matches!(gate.check(None), Err(ReelError::AuthRejected)));

        let token = gate.login("admin", PASSWORD)?;
        assert!(gate.check(Some(&token)).is_ok());
        assert!(gate.check(Some("forged")).is_err());

        gate.logout(Some(&token));
        assert!(matches!(gate.check(Some(&token)), Err(ReelError::AuthRejected)));
        Ok(())
    }

    #[test]
    fn expired_sessions_are_dropped() -> Result<()> {
        let (_dir, gate) = gate_with_credential(Duration::zero())?;
        let token = gate.login("admin", PASSWORD)?;
        assert_eq!(gate.sessions().len(), 1);
        assert!(gate.check(Some(&token)).is_err());
        assert!(gate.sessions().is_empty());
        Ok(())
    }

    #[test]
    fn purge_removes_only_expired_entries() {
        let registry = SessionRegistry::new(Duration::zero());
        registry.issue();
        registry.issue();
        assert_eq!(registry.purge_expired(), 2);

        let registry = SessionRegistry::new(Duration::hours(1));
        let token = registry.issue();
        assert_eq!(registry.purge_expired(), 0);
        assert!(registry.is_authenticated(&token));
    }

    #[test]
    fn cookie_header_parsing() {
        assert_eq!(
            token_from_cookie_header("theme=dark; reel_session=abc123; other=1"),
            Some("abc123")
        );
        assert_eq!(token_from_cookie_header("reel_session=\"quoted\""), Some("quoted"));
        assert_eq!(token_from_cookie_header("reel_session="), None);
        assert_eq!(token_from_cookie_header("reel_sessionx=abc"), None);
        assert_eq!(token_from_cookie_header(""), None);
    }

    #[test]
    fn cookies_are_http_only() {
        let cookie = session_cookie("tok", Duration::hours(2));
        assert!(cookie.starts_with("reel_session=tok;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.ends_with("Max-Age=7200"));
        assert!(expired_session_cookie().ends_with("Max-Age=0"));
    }
}
