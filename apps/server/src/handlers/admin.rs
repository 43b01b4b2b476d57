use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use std::sync::Arc;

use crate::{
    auth, availability,
    handlers::client::{internal_error, HandlerError, BOOKING_DETAIL_SELECT},
    models::*,
    AppState,
};

fn bad_request(msg: &str) -> HandlerError {
    (StatusCode::BAD_REQUEST, Json(ApiResponse::error(msg)))
}

fn not_found(msg: &str) -> HandlerError {
    (StatusCode::NOT_FOUND, Json(ApiResponse::error(msg)))
}

// ── Bookings ──

/// GET /api/admin/bookings — all statuses; filter by ?date= or ?from=&to=.
pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<BookingsQuery>,
) -> Result<Json<ApiResponse<Vec<BookingDetail>>>, HandlerError> {
    auth::require_admin(&state.db, &headers).await?;

    let bookings = if let Some(date) = &query.date {
        let sql = format!(
            "{} WHERE b.booking_date = ? ORDER BY b.booking_time ASC",
            BOOKING_DETAIL_SELECT
        );
        sqlx::query_as::<_, BookingDetail>(&sql)
            .bind(date)
            .fetch_all(&state.db)
            .await
    } else if let (Some(from), Some(to)) = (&query.from, &query.to) {
        let sql = format!(
            "{} WHERE b.booking_date BETWEEN ? AND ?
             ORDER BY b.booking_date ASC, b.booking_time ASC",
            BOOKING_DETAIL_SELECT
        );
        sqlx::query_as::<_, BookingDetail>(&sql)
            .bind(from)
            .bind(to)
            .fetch_all(&state.db)
            .await
    } else {
        let sql = format!(
            "{} ORDER BY b.booking_date DESC, b.booking_time DESC LIMIT 200",
            BOOKING_DETAIL_SELECT
        );
        sqlx::query_as::<_, BookingDetail>(&sql)
            .fetch_all(&state.db)
            .await
    }
    .map_err(|e| internal_error("admin list_bookings", e))?;

    Ok(Json(ApiResponse::success(bookings)))
}

/// Transition a booking's status, guarded by the set of allowed current
/// statuses. Returns false when no row matched.
async fn set_booking_status(
    db: &sqlx::SqlitePool,
    id: i64,
    allowed_from: &[&str],
    to: &str,
    stamp_column: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let placeholders = vec!["?"; allowed_from.len()].join(", ");
    let stamp = stamp_column
        .map(|c| format!(", {} = datetime('now')", c))
        .unwrap_or_default();
    let sql = format!(
        "UPDATE bookings SET status = ?, updated_at = datetime('now'){} WHERE id = ? AND status IN ({})",
        stamp, placeholders
    );

    let mut q = sqlx::query(&sql).bind(to).bind(id);
    for status in allowed_from {
        q = q.bind(*status);
    }
    Ok(q.execute(db).await?.rows_affected() > 0)
}

/// POST /api/admin/bookings/:id/confirm — pending → confirmed.
///
/// From this point on the booking occupies calendar slots.
pub async fn confirm_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<&'static str>>, HandlerError> {
    auth::require_admin(&state.db, &headers).await?;

    let updated = set_booking_status(
        &state.db,
        id,
        &["pending"],
        "confirmed",
        Some("confirmed_at"),
    )
    .await
    .map_err(|e| internal_error("confirm_booking", e))?;

    if !updated {
        return Err(not_found("Booking not found or not pending"));
    }
    Ok(Json(ApiResponse::success("Booking confirmed")))
}

/// POST /api/admin/bookings/:id/complete — confirmed → completed.
pub async fn complete_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<&'static str>>, HandlerError> {
    auth::require_admin(&state.db, &headers).await?;

    let updated = set_booking_status(&state.db, id, &["confirmed"], "completed", None)
        .await
        .map_err(|e| internal_error("complete_booking", e))?;

    if !updated {
        return Err(not_found("Booking not found or not confirmed"));
    }
    Ok(Json(ApiResponse::success("Booking completed")))
}

/// POST /api/admin/bookings/:id/cancel — pending/confirmed → cancelled.
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<&'static str>>, HandlerError> {
    auth::require_admin(&state.db, &headers).await?;

    let updated = set_booking_status(
        &state.db,
        id,
        &["pending", "confirmed"],
        "cancelled",
        Some("cancelled_at"),
    )
    .await
    .map_err(|e| internal_error("admin cancel_booking", e))?;

    if !updated {
        return Err(not_found("Booking not found"));
    }
    Ok(Json(ApiResponse::success("Booking cancelled")))
}

// ── Working hours ──

/// GET /api/admin/working-hours — all seven weekday rows.
pub async fn list_working_hours(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Vec<WorkingHours>>>, HandlerError> {
    auth::require_admin(&state.db, &headers).await?;

    let hours = sqlx::query_as::<_, WorkingHours>(
        "SELECT day_of_week, start_time, end_time, is_active
         FROM working_hours ORDER BY day_of_week ASC",
    )
    .fetch_all(&state.db)
    .await
    .map_err(|e| internal_error("list_working_hours", e))?;

    Ok(Json(ApiResponse::success(hours)))
}

/// PUT /api/admin/working-hours/:day — update one weekday (0=Sunday..6).
pub async fn update_working_hours(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(day): Path<i64>,
    Json(body): Json<UpdateWorkingHoursRequest>,
) -> Result<Json<ApiResponse<WorkingHours>>, HandlerError> {
    auth::require_admin(&state.db, &headers).await?;

    if !(0..=6).contains(&day) {
        return Err(bad_request("day_of_week must be 0..6"));
    }
    let (start, end) = match (
        availability::minute_of_day(&body.start_time),
        availability::minute_of_day(&body.end_time),
    ) {
        (Some(s), Some(e)) => (s, e),
        _ => return Err(bad_request("Invalid time, expected HH:MM")),
    };
    if start >= end {
        return Err(bad_request("start_time must be before end_time"));
    }

    sqlx::query(
        "UPDATE working_hours SET start_time = ?, end_time = ?, is_active = ?
         WHERE day_of_week = ?",
    )
    .bind(availability::format_minute(start))
    .bind(availability::format_minute(end))
    .bind(body.is_active)
    .bind(day)
    .execute(&state.db)
    .await
    .map_err(|e| internal_error("update_working_hours", e))?;

    let row = sqlx::query_as::<_, WorkingHours>(
        "SELECT day_of_week, start_time, end_time, is_active
         FROM working_hours WHERE day_of_week = ?",
    )
    .bind(day)
    .fetch_one(&state.db)
    .await
    .map_err(|e| internal_error("update_working_hours: reload", e))?;

    Ok(Json(ApiResponse::success(row)))
}

// ── Vacations ──

/// GET /api/admin/vacations — current and future ranges.
pub async fn list_vacations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Vec<Vacation>>>, HandlerError> {
    auth::require_admin(&state.db, &headers).await?;

    let vacations = sqlx::query_as::<_, Vacation>(
        "SELECT id, start_date, end_date, reason FROM vacations
         WHERE end_date >= date('now') ORDER BY start_date ASC",
    )
    .fetch_all(&state.db)
    .await
    .map_err(|e| internal_error("list_vacations", e))?;

    Ok(Json(ApiResponse::success(vacations)))
}

/// POST /api/admin/vacations — add an inclusive closed range.
pub async fn create_vacation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateVacationRequest>,
) -> Result<Json<ApiResponse<Vacation>>, HandlerError> {
    auth::require_admin(&state.db, &headers).await?;

    let start = chrono::NaiveDate::parse_from_str(&body.start_date, "%Y-%m-%d");
    let end = chrono::NaiveDate::parse_from_str(&body.end_date, "%Y-%m-%d");
    match (start, end) {
        (Ok(s), Ok(e)) if s <= e => {}
        (Ok(_), Ok(_)) => return Err(bad_request("start_date must not be after end_date")),
        _ => return Err(bad_request("Invalid date, expected YYYY-MM-DD")),
    }

    let id = sqlx::query("INSERT INTO vacations (start_date, end_date, reason) VALUES (?, ?, ?)")
        .bind(&body.start_date)
        .bind(&body.end_date)
        .bind(&body.reason)
        .execute(&state.db)
        .await
        .map_err(|e| internal_error("create_vacation", e))?
        .last_insert_rowid();

    Ok(Json(ApiResponse::success(Vacation {
        id,
        start_date: body.start_date,
        end_date: body.end_date,
        reason: body.reason,
    })))
}

/// DELETE /api/admin/vacations/:id
pub async fn delete_vacation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<&'static str>>, HandlerError> {
    auth::require_admin(&state.db, &headers).await?;

    let result = sqlx::query("DELETE FROM vacations WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await
        .map_err(|e| internal_error("delete_vacation", e))?;

    if result.rows_affected() == 0 {
        return Err(not_found("Vacation not found"));
    }
    Ok(Json(ApiResponse::success("Vacation deleted")))
}

// ── Blocked days ──

/// GET /api/admin/blocked-days — today and later.
pub async fn list_blocked_days(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Vec<BlockedDay>>>, HandlerError> {
    auth::require_admin(&state.db, &headers).await?;

    let days = sqlx::query_as::<_, BlockedDay>(
        "SELECT id, date, reason FROM blocked_days
         WHERE date >= date('now') ORDER BY date ASC",
    )
    .fetch_all(&state.db)
    .await
    .map_err(|e| internal_error("list_blocked_days", e))?;

    Ok(Json(ApiResponse::success(days)))
}

/// POST /api/admin/blocked-days — block a single date (upsert on the date).
pub async fn create_blocked_day(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateBlockedDayRequest>,
) -> Result<Json<ApiResponse<BlockedDay>>, HandlerError> {
    auth::require_admin(&state.db, &headers).await?;

    if chrono::NaiveDate::parse_from_str(&body.date, "%Y-%m-%d").is_err() {
        return Err(bad_request("Invalid date, expected YYYY-MM-DD"));
    }

    sqlx::query(
        "INSERT INTO blocked_days (date, reason) VALUES (?, ?)
         ON CONFLICT(date) DO UPDATE SET reason = excluded.reason",
    )
    .bind(&body.date)
    .bind(&body.reason)
    .execute(&state.db)
    .await
    .map_err(|e| internal_error("create_blocked_day", e))?;

    let row = sqlx::query_as::<_, BlockedDay>(
        "SELECT id, date, reason FROM blocked_days WHERE date = ?",
    )
    .bind(&body.date)
    .fetch_one(&state.db)
    .await
    .map_err(|e| internal_error("create_blocked_day: reload", e))?;

    Ok(Json(ApiResponse::success(row)))
}

/// DELETE /api/admin/blocked-days/:id
pub async fn delete_blocked_day(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<&'static str>>, HandlerError> {
    auth::require_admin(&state.db, &headers).await?;

    let result = sqlx::query("DELETE FROM blocked_days WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await
        .map_err(|e| internal_error("delete_blocked_day", e))?;

    if result.rows_affected() == 0 {
        return Err(not_found("Blocked day not found"));
    }
    Ok(Json(ApiResponse::success("Blocked day removed")))
}

// ── Services ──

/// GET /api/admin/services — all services including inactive.
pub async fn list_all_services(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Vec<Service>>>, HandlerError> {
    auth::require_admin(&state.db, &headers).await?;

    let services = sqlx::query_as::<_, Service>(
        "SELECT id, name, description, price, duration_minutes, is_active, sort_order
         FROM services ORDER BY sort_order ASC",
    )
    .fetch_all(&state.db)
    .await
    .map_err(|e| internal_error("list_all_services", e))?;

    Ok(Json(ApiResponse::success(services)))
}

/// POST /api/admin/services — create a service.
pub async fn create_service(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateServiceRequest>,
) -> Result<Json<ApiResponse<Service>>, HandlerError> {
    auth::require_admin(&state.db, &headers).await?;

    if body.duration_minutes <= 0 {
        return Err(bad_request("duration_minutes must be positive"));
    }

    let id = sqlx::query(
        "INSERT INTO services (name, description, price, duration_minutes, sort_order)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&body.name)
    .bind(body.description.as_deref().unwrap_or(""))
    .bind(body.price)
    .bind(body.duration_minutes)
    .bind(body.sort_order.unwrap_or(0))
    .execute(&state.db)
    .await
    .map_err(|e| internal_error("create_service", e))?
    .last_insert_rowid();

    let service = sqlx::query_as::<_, Service>(
        "SELECT id, name, description, price, duration_minutes, is_active, sort_order
         FROM services WHERE id = ?",
    )
    .bind(id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| internal_error("create_service: reload", e))?;

    Ok(Json(ApiResponse::success(service)))
}

/// PUT /api/admin/services/:id — partial update.
pub async fn update_service(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<UpdateServiceRequest>,
) -> Result<Json<ApiResponse<Service>>, HandlerError> {
    auth::require_admin(&state.db, &headers).await?;

    if let Some(name) = &body.name {
        sqlx::query("UPDATE services SET name = ? WHERE id = ?")
            .bind(name)
            .bind(id)
            .execute(&state.db)
            .await
            .ok();
    }
    if let Some(desc) = &body.description {
        sqlx::query("UPDATE services SET description = ? WHERE id = ?")
            .bind(desc)
            .bind(id)
            .execute(&state.db)
            .await
            .ok();
    }
    if let Some(price) = body.price {
        sqlx::query("UPDATE services SET price = ? WHERE id = ?")
            .bind(price)
            .bind(id)
            .execute(&state.db)
            .await
            .ok();
    }
    if let Some(duration) = body.duration_minutes {
        if duration <= 0 {
            return Err(bad_request("duration_minutes must be positive"));
        }
        sqlx::query("UPDATE services SET duration_minutes = ? WHERE id = ?")
            .bind(duration)
            .bind(id)
            .execute(&state.db)
            .await
            .ok();
    }
    if let Some(active) = body.is_active {
        sqlx::query("UPDATE services SET is_active = ? WHERE id = ?")
            .bind(active)
            .bind(id)
            .execute(&state.db)
            .await
            .ok();
    }
    if let Some(order) = body.sort_order {
        sqlx::query("UPDATE services SET sort_order = ? WHERE id = ?")
            .bind(order)
            .bind(id)
            .execute(&state.db)
            .await
            .ok();
    }

    let service = sqlx::query_as::<_, Service>(
        "SELECT id, name, description, price, duration_minutes, is_active, sort_order
         FROM services WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| internal_error("update_service", e))?
    .ok_or_else(|| not_found("Service not found"))?;

    Ok(Json(ApiResponse::success(service)))
}
