use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration as StdDuration, Instant},
};

use anyhow::Result as AnyResult;
use argon2::password_hash::{
    rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::Argon2;
use backend_api::{new_document_id, AuthProvider, AuthSession, AuthUser, BackendError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use parking_lot::Mutex;
use rand::RngCore;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};

use crate::db::DbPool;
use crate::store::{pool_err, sql_err};

pub const MIN_PASSWORD_LEN: usize = 6;

/// Hash a password using argon2id.
pub fn hash_password(password: &str) -> AnyResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!(e))?
        .to_string();
    Ok(hash)
}

/// Verify a password against an encoded hash.
pub fn verify_password(password: &str, hash: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    } else {
        false
    }
}

/// Claims stored within issued session tokens.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub exp: usize,
}

pub fn issue_jwt(secret: &[u8], user: &AuthUser, valid_for: Duration) -> AnyResult<String> {
    let exp = (OffsetDateTime::now_utc() + valid_for).unix_timestamp() as usize;
    let claims = Claims {
        sub: user.uid.clone(),
        email: user.email.clone(),
        exp,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret),
    )?;
    Ok(token)
}

pub fn verify_jwt(secret: &[u8], token: &str) -> AnyResult<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)?;
    if data.claims.exp < OffsetDateTime::now_utc().unix_timestamp() as usize {
        anyhow::bail!("expired");
    }
    Ok(data.claims)
}

/// Sliding-window limiter for sign-in attempts per email.
#[derive(Clone)]
pub struct LoginRateLimiter {
    inner: Arc<Mutex<HashMap<String, Vec<Instant>>>>,
    max: usize,
    window: StdDuration,
}

impl LoginRateLimiter {
    pub fn new(max: usize, window: StdDuration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            max,
            window,
        }
    }

    /// Returns true if the attempt is allowed, false if rate limited.
    pub fn check(&self, key: &str) -> bool {
        let mut guard = self.inner.lock();
        let now = Instant::now();
        let entry = guard.entry(key.to_string()).or_default();
        entry.retain(|t| now.duration_since(*t) < self.window);
        if entry.len() >= self.max {
            return false;
        }
        entry.push(now);
        true
    }
}

/// Email/password accounts stored next to the documents.
pub struct SqliteAuth {
    pool: DbPool,
    secret: Vec<u8>,
    token_ttl: Duration,
    limiter: LoginRateLimiter,
}

impl SqliteAuth {
    pub fn new(pool: DbPool, token_ttl: Duration) -> AnyResult<Self> {
        let secret = load_or_create_secret(&pool)?;
        Ok(Self {
            pool,
            secret,
            token_ttl,
            limiter: LoginRateLimiter::new(5, StdDuration::from_secs(60)),
        })
    }
}

fn load_or_create_secret(pool: &DbPool) -> AnyResult<Vec<u8>> {
    let conn = pool.get()?;
    let existing: Option<String> = conn
        .query_row(
            "SELECT jwt_secret FROM auth_config WHERE id = 1",
            [],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(encoded) = existing {
        return Ok(STANDARD.decode(encoded)?);
    }
    let mut secret = vec![0u8; 32];
    rand::thread_rng().fill_bytes(&mut secret);
    conn.execute(
        "INSERT OR IGNORE INTO auth_config (id, jwt_secret, created_at) VALUES (1, ?1, ?2)",
        params![
            STANDARD.encode(&secret),
            OffsetDateTime::now_utc().unix_timestamp()
        ],
    )?;
    // another process may have won the insert race
    let stored: String =
        conn.query_row("SELECT jwt_secret FROM auth_config WHERE id = 1", [], |row| {
            row.get(0)
        })?;
    Ok(STANDARD.decode(stored)?)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl AuthProvider for SqliteAuth {
    fn create_user(&self, email: &str, password: &str) -> Result<AuthUser> {
        let email = normalize_email(email);
        if email.is_empty() {
            return Err(BackendError::InvalidArgument("missing_email".into()));
        }
        if password.len() < MIN_PASSWORD_LEN {
            return Err(BackendError::InvalidArgument("weak_password".into()));
        }
        let hash = hash_password(password).map_err(BackendError::internal)?;
        let uid = new_document_id();
        let conn = self.pool.get().map_err(pool_err)?;
        let res = conn.execute(
            "INSERT INTO auth_users (uid, email, password_hash, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![uid, email, hash, OffsetDateTime::now_utc().unix_timestamp()],
        );
        match res {
            Ok(_) => {
                info!(uid = %uid, "auth account created");
                Ok(AuthUser { uid, email })
            }
            Err(e)
                if matches!(
                    e.sqlite_error_code(),
                    Some(rusqlite::ErrorCode::ConstraintViolation)
                ) =>
            {
                Err(BackendError::AlreadyExists("email_in_use".into()))
            }
            Err(e) => Err(sql_err(e)),
        }
    }

    fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession> {
        let email = normalize_email(email);
        if !self.limiter.check(&email) {
            warn!(email = %email, "sign-in rate limited");
            return Err(BackendError::PermissionDenied("rate_limited".into()));
        }
        let conn = self.pool.get().map_err(pool_err)?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT uid, password_hash FROM auth_users WHERE email = ?1",
                [&email],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(sql_err)?;
        let Some((uid, hash)) = row else {
            return Err(BackendError::InvalidCredentials);
        };
        if !verify_password(password, &hash) {
            return Err(BackendError::InvalidCredentials);
        }
        let user = AuthUser { uid, email };
        let token =
            issue_jwt(&self.secret, &user, self.token_ttl).map_err(BackendError::internal)?;
        Ok(AuthSession { user, token })
    }

    fn verify_token(&self, token: &str) -> Result<AuthUser> {
        let claims =
            verify_jwt(&self.secret, token).map_err(|_| BackendError::Unauthenticated)?;
        let conn = self.pool.get().map_err(pool_err)?;
        let email: Option<String> = conn
            .query_row(
                "SELECT email FROM auth_users WHERE uid = ?1",
                [&claims.sub],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_err)?;
        match email {
            Some(email) => Ok(AuthUser {
                uid: claims.sub,
                email,
            }),
            None => Err(BackendError::Unauthenticated),
        }
    }

    fn delete_user(&self, uid: &str) -> Result<()> {
        let conn = self.pool.get().map_err(pool_err)?;
        let changed = conn
            .execute("DELETE FROM auth_users WHERE uid = ?1", [uid])
            .map_err(sql_err)?;
        if changed == 0 {
            return Err(BackendError::not_found("auth_users", uid));
        }
        info!(uid = %uid, "auth account deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn auth() -> (SqliteAuth, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let pool = db::open_pool(tmp.path().join("auth.db")).unwrap();
        (SqliteAuth::new(pool, Duration::hours(1)).unwrap(), tmp)
    }

    #[test]
    fn hash_and_verify() {
        let hash = hash_password("secret").unwrap();
        assert!(verify_password("secret", &hash));
        assert!(!verify_password("bad", &hash));
    }

    #[test]
    fn jwt_issue_and_verify() {
        let user = AuthUser {
            uid: "u1".into(),
            email: "a@example.com".into(),
        };
        let token = issue_jwt(b"secret", &user, Duration::seconds(60)).unwrap();
        let claims = verify_jwt(b"secret", &token).unwrap();
        assert_eq!(claims.sub, "u1");
        assert!(verify_jwt(b"other", &token).is_err());
    }

    #[test]
    fn jwt_expiry() {
        let user = AuthUser {
            uid: "u1".into(),
            email: "a@example.com".into(),
        };
        let token = issue_jwt(b"secret", &user, Duration::seconds(-10)).unwrap();
        assert!(verify_jwt(b"secret", &token).is_err());
    }

    #[test]
    fn rate_limiter_blocks() {
        let limiter = LoginRateLimiter::new(2, StdDuration::from_secs(60));
        assert!(limiter.check("u"));
        assert!(limiter.check("u"));
        assert!(!limiter.check("u"));
        assert!(limiter.check("v"));
    }

    #[test]
    fn sign_up_sign_in_and_delete() {
        let (auth, _tmp) = auth();
        let user = auth.create_user("Alice@Example.com ", "hunter22").unwrap();
        assert_eq!(user.email, "alice@example.com");
        assert_eq!(
            auth.create_user("alice@example.com", "another1").unwrap_err(),
            BackendError::AlreadyExists("email_in_use".into())
        );
        assert_eq!(
            auth.sign_in("alice@example.com", "wrong-pass").unwrap_err(),
            BackendError::InvalidCredentials
        );
        let session = auth.sign_in("alice@example.com", "hunter22").unwrap();
        assert_eq!(session.user, user);
        assert_eq!(auth.verify_token(&session.token).unwrap(), user);

        auth.delete_user(&user.uid).unwrap();
        assert_eq!(
            auth.verify_token(&session.token).unwrap_err(),
            BackendError::Unauthenticated
        );
    }

    #[test]
    fn weak_passwords_are_rejected() {
        let (auth, _tmp) = auth();
        assert!(matches!(
            auth.create_user("bob@example.com", "123"),
            Err(BackendError::InvalidArgument(_))
        ));
    }
}
