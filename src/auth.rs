//! Users, password hashing, and session tokens
//!
//! Passwords are stored as hex HMAC-SHA256 keyed with the server secret over
//! `salt || password`. Sessions are opaque UUID v4 bearer tokens.

use crate::error::{Result, TraderError};
use crate::storage::Database;
use crate::types::User;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{info, warn};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub const MAX_USERNAME_LEN: usize = 150;
pub const DEFAULT_SESSION_TTL_HOURS: u32 = 24 * 7;

fn keyed_mac(secret: &str, salt: &str, password: &str) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| TraderError::InvalidInput(format!("auth secret: {}", e)))?;
    mac.update(salt.as_bytes());
    mac.update(password.as_bytes());
    Ok(mac)
}

pub fn generate_salt() -> String {
    let salt: [u8; 16] = rand::random();
    hex::encode(salt)
}

pub fn hash_password(secret: &str, salt: &str, password: &str) -> Result<String> {
    Ok(hex::encode(keyed_mac(secret, salt, password)?.finalize().into_bytes()))
}

/// Constant-time check of `password` against a stored hash
pub fn verify_password(secret: &str, salt: &str, password: &str, stored_hash: &str) -> bool {
    match (hex::decode(stored_hash), keyed_mac(secret, salt, password)) {
        (Ok(expected), Ok(mac)) => mac.verify_slice(&expected).is_ok(),
        _ => false,
    }
}

#[derive(Clone)]
pub struct Authenticator {
    db: Database,
    secret: String,
    session_ttl: Duration,
}

impl Authenticator {
    pub fn new(db: Database, secret: impl Into<String>) -> Self {
        Self {
            db,
            secret: secret.into(),
            session_ttl: Duration::hours(i64::from(DEFAULT_SESSION_TTL_HOURS)),
        }
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Oldest session creation time still accepted
    fn session_cutoff(&self) -> DateTime<Utc> {
        Utc::now()
            .checked_sub_signed(self.session_ttl)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<User> {
        let username = username.trim();
        if username.is_empty() || username.len() > MAX_USERNAME_LEN {
            return Err(TraderError::InvalidInput(format!(
                "username must be 1-{} characters",
                MAX_USERNAME_LEN
            )));
        }
        if password.is_empty() {
            return Err(TraderError::InvalidInput("password must not be empty".to_string()));
        }

        let salt = generate_salt();
        let hash = hash_password(&self.secret, &salt, password)?;
        let user = self.db.create_user(username, &hash, &salt).await?;
        info!("Registered user {} (id {})", user.username, user.id);
        Ok(user)
    }

    /// Check credentials and open a session; returns the bearer token
    pub async fn login(&self, username: &str, password: &str) -> Result<(User, String)> {
        let creds = match self.db.find_credentials(username.trim()).await? {
            Some(c) => c,
            None => {
                warn!("Login attempt for unknown user {}", username);
                return Err(TraderError::InvalidCredentials);
            }
        };

        if !verify_password(&self.secret, &creds.salt, password, &creds.password_hash) {
            warn!("Bad password for {}", creds.user.username);
            return Err(TraderError::InvalidCredentials);
        }

        let purged = self.db.purge_sessions_before(self.session_cutoff()).await?;
        if purged > 0 {
            info!("Purged {} expired sessions", purged);
        }

        let token = Uuid::new_v4().to_string();
        self.db.create_session(&token, creds.user.id).await?;
        info!("{} logged in", creds.user.username);
        Ok((creds.user, token))
    }

    pub async fn logout(&self, token: &str) -> Result<bool> {
        self.db.delete_session(token).await
    }

    /// Resolve a bearer token to its user
    pub async fn authenticate(&self, token: &str) -> Result<User> {
        self.db
            .user_for_session(token, self.session_cutoff())
            .await?
            .ok_or(TraderError::Unauthorized)
    }
}
