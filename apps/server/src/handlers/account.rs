use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use std::sync::Arc;

use crate::{
    auth,
    handlers::client::{internal_error, HandlerError},
    models::*,
    AppState,
};

fn bad_request(msg: &str) -> HandlerError {
    (StatusCode::BAD_REQUEST, Json(ApiResponse::error(msg)))
}

/// POST /api/auth/signup — create an account and open a session.
pub async fn signup(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SignupRequest>,
) -> Result<Json<ApiResponse<SessionResponse>>, HandlerError> {
    let email = body.email.trim().to_lowercase();
    if !email.contains('@') || email.len() < 5 {
        return Err(bad_request("Invalid email address"));
    }
    if body.password.len() < 8 {
        return Err(bad_request("Password must be at least 8 characters"));
    }
    if body.full_name.trim().is_empty() {
        return Err(bad_request("Name is required"));
    }

    let taken: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM users WHERE email = ?")
        .bind(&email)
        .fetch_one(&state.db)
        .await
        .map_err(|e| internal_error("signup: email check", e))?;
    if taken {
        return Err((
            StatusCode::CONFLICT,
            Json(ApiResponse::error("An account with this email already exists")),
        ));
    }

    let salt = auth::generate_salt(&state.session_secret);
    let hash = auth::hash_password(&body.password, &salt);

    let user_id = sqlx::query(
        "INSERT INTO users (full_name, email, phone, password_salt, password_hash)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(body.full_name.trim())
    .bind(&email)
    .bind(&body.phone)
    .bind(&salt)
    .bind(&hash)
    .execute(&state.db)
    .await
    .map_err(|e| internal_error("signup: insert", e))?
    .last_insert_rowid();

    let token = auth::create_session(&state.db, &state.session_secret, user_id)
        .await
        .map_err(|e| internal_error("signup: session", e))?;

    tracing::info!(user_id, "New account registered");

    Ok(Json(ApiResponse::success(SessionResponse {
        token,
        user: UserProfile {
            id: user_id,
            full_name: body.full_name.trim().to_string(),
            email,
            phone: body.phone,
            is_admin: false,
        },
    })))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<ApiResponse<SessionResponse>>, HandlerError> {
    let email = body.email.trim().to_lowercase();

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(&state.db)
        .await
        .map_err(|e| internal_error("login: lookup", e))?;

    // Same error for unknown email and wrong password.
    let user = match user {
        Some(u) if auth::verify_password(&body.password, &u.password_salt, &u.password_hash) => u,
        _ => {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(ApiResponse::error("Invalid email or password")),
            ));
        }
    };

    let token = auth::create_session(&state.db, &state.session_secret, user.id)
        .await
        .map_err(|e| internal_error("login: session", e))?;

    Ok(Json(ApiResponse::success(SessionResponse {
        user: UserProfile::from(&user),
        token,
    })))
}

/// POST /api/auth/logout — drop the presented session; no-op without one.
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<&'static str>>, HandlerError> {
    if let Some(token) = auth::token_from_headers(&headers) {
        auth::delete_session(&state.db, &token)
            .await
            .map_err(|e| internal_error("logout", e))?;
    }
    Ok(Json(ApiResponse::success("Logged out")))
}

/// GET /api/auth/me
pub async fn me(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<UserProfile>>, HandlerError> {
    let user = auth::require_user(&state.db, &headers).await?;
    Ok(Json(ApiResponse::success(UserProfile::from(&user))))
}
