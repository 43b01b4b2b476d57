//! Session-token authentication.
//!
//! Tokens are opaque strings stored in the `sessions` table with an expiry;
//! clients send them back as `Authorization: Bearer <token>` or a `session`
//! cookie. Handlers call `require_user` / `require_admin` explicitly with
//! the request headers — there is no ambient request state.

use axum::http::{header, HeaderMap, StatusCode};
use axum::Json;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

use crate::models::{ApiResponse, User};

type HmacSha256 = Hmac<Sha256>;

pub type AuthError = (StatusCode, Json<ApiResponse<()>>);

// ── Credentials ──

/// Salted SHA-256 of a password, hex encoded.
pub fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn verify_password(password: &str, salt: &str, expected_hash: &str) -> bool {
    hash_password(password, salt) == expected_hash
}

/// HMAC-SHA256 over `message` keyed with the server secret, hex encoded.
fn keyed_digest(secret: &str, message: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn now_nanos() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0)
}

/// Fresh per-user password salt.
pub fn generate_salt(secret: &str) -> String {
    keyed_digest(secret, &format!("salt:{}", now_nanos()))[..32].to_string()
}

/// Mint an opaque session token for `user_id`.
pub fn mint_token(secret: &str, user_id: i64) -> String {
    keyed_digest(secret, &format!("session:{}:{}", user_id, now_nanos()))
}

// ── Session store ──

/// Create a session row valid for 7 days and return its token.
pub async fn create_session(
    db: &SqlitePool,
    secret: &str,
    user_id: i64,
) -> Result<String, sqlx::Error> {
    let token = mint_token(secret, user_id);
    sqlx::query(
        "INSERT INTO sessions (user_id, token, expires_at) VALUES (?, ?, datetime('now', '+7 days'))",
    )
    .bind(user_id)
    .bind(&token)
    .execute(db)
    .await?;
    Ok(token)
}

pub async fn delete_session(db: &SqlitePool, token: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM sessions WHERE token = ?")
        .bind(token)
        .execute(db)
        .await?;
    Ok(())
}

/// Remove expired session rows. Called periodically from a background task.
pub async fn purge_expired_sessions(db: &SqlitePool) {
    match sqlx::query("DELETE FROM sessions WHERE expires_at <= datetime('now')")
        .execute(db)
        .await
    {
        Ok(result) if result.rows_affected() > 0 => {
            tracing::debug!("purged {} expired sessions", result.rows_affected());
        }
        Ok(_) => {}
        Err(e) => tracing::error!("session purge failed: {}", e),
    }
}

// ── Request extraction ──

/// Token from `Authorization: Bearer <token>` or the `session` cookie.
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    if let Some(auth) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(token) = auth.strip_prefix("Bearer ") {
            return Some(token.trim().to_string());
        }
    }

    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == "session").then(|| value.to_string())
    })
}

async fn user_for_token(db: &SqlitePool, token: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(
        "SELECT u.id, u.full_name, u.email, u.phone, u.password_salt, u.password_hash,
                u.is_admin, u.created_at
         FROM users u
         JOIN sessions s ON s.user_id = u.id
         WHERE s.token = ? AND s.expires_at > datetime('now')",
    )
    .bind(token)
    .fetch_optional(db)
    .await
}

fn unauthorized(msg: &str) -> AuthError {
    (StatusCode::UNAUTHORIZED, Json(ApiResponse::error(msg)))
}

/// Resolve the authenticated user or fail with 401/500.
pub async fn require_user(db: &SqlitePool, headers: &HeaderMap) -> Result<User, AuthError> {
    let token =
        token_from_headers(headers).ok_or_else(|| unauthorized("Missing session token"))?;
    match user_for_token(db, &token).await {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(unauthorized("Invalid or expired session")),
        Err(e) => {
            tracing::error!("session lookup: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error("DB error")),
            ))
        }
    }
}

/// Like `require_user`, additionally demanding the admin flag.
pub async fn require_admin(db: &SqlitePool, headers: &HeaderMap) -> Result<User, AuthError> {
    let user = require_user(db, headers).await?;
    if !user.is_admin {
        return Err((
            StatusCode::FORBIDDEN,
            Json(ApiResponse::error("Access denied")),
        ));
    }
    Ok(user)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_password_is_deterministic() {
        let a = hash_password("hunter2", "salt");
        let b = hash_password("hunter2", "salt");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64); // hex sha256
    }

    #[test]
    fn test_hash_password_varies_with_salt() {
        assert_ne!(
            hash_password("hunter2", "salt-a"),
            hash_password("hunter2", "salt-b")
        );
    }

    #[test]
    fn test_verify_password() {
        let salt = "abcdef";
        let hash = hash_password("correct horse", salt);
        assert!(verify_password("correct horse", salt, &hash));
        assert!(!verify_password("wrong", salt, &hash));
    }

    #[test]
    fn test_mint_token_unique_per_call() {
        let a = mint_token("secret", 1);
        let b = mint_token("secret", 1);
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_generate_salt_length() {
        assert_eq!(generate_salt("secret").len(), 32);
    }

    #[test]
    fn test_token_from_bearer_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer abc123".parse().unwrap());
        assert_eq!(token_from_headers(&headers), Some("abc123".to_string()));
    }

    #[test]
    fn test_token_from_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, "theme=dark; session=tok42".parse().unwrap());
        assert_eq!(token_from_headers(&headers), Some("tok42".to_string()));
    }

    #[test]
    fn test_bearer_takes_priority_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer bearer-tok".parse().unwrap());
        headers.insert(header::COOKIE, "session=cookie-tok".parse().unwrap());
        assert_eq!(token_from_headers(&headers), Some("bearer-tok".to_string()));
    }

    #[test]
    fn test_missing_token() {
        let headers = HeaderMap::new();
        assert_eq!(token_from_headers(&headers), None);
    }
}
