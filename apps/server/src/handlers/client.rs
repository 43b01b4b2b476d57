use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    auth,
    availability::{self, DayAvailability},
    models::*,
    AppState,
};

pub type HandlerError = (StatusCode, Json<ApiResponse<()>>);

// ── Shared error helpers ──

/// Log the underlying error, surface a generic 500 to the caller.
pub fn internal_error(context: &str, e: impl std::fmt::Display) -> HandlerError {
    tracing::error!("{}: {}", context, e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::error("DB error")),
    )
}

fn bad_request(msg: &str) -> HandlerError {
    (StatusCode::BAD_REQUEST, Json(ApiResponse::error(msg)))
}

// ── Shared queries ──

/// The shared SELECT columns for booking detail queries (used by admin too).
pub const BOOKING_DETAIL_SELECT: &str =
    "SELECT b.id, b.booking_date, b.booking_time,
            COALESCE(b.duration_minutes, s.duration_minutes, 60) as duration_minutes,
            b.status, b.notes, b.created_at,
            s.name as service_name, s.price as service_price,
            u.full_name as client_name, u.email as client_email, u.phone as client_phone
     FROM bookings b
     JOIN services s ON s.id = b.service_id
     JOIN users u ON u.id = b.user_id";

/// Schedule configuration the engine reads.
pub struct ScheduleConfig {
    pub working_hours: Vec<WorkingHours>,
    pub vacations: Vec<Vacation>,
    pub blocked_days: Vec<BlockedDay>,
}

/// Load working hours plus the vacations/blocked days that can affect the
/// `[from, to]` date window.
pub async fn load_schedule(
    db: &sqlx::SqlitePool,
    from: &str,
    to: &str,
) -> Result<ScheduleConfig, sqlx::Error> {
    let working_hours = sqlx::query_as::<_, WorkingHours>(
        "SELECT day_of_week, start_time, end_time, is_active
         FROM working_hours ORDER BY day_of_week ASC",
    )
    .fetch_all(db)
    .await?;

    let vacations = sqlx::query_as::<_, Vacation>(
        "SELECT id, start_date, end_date, reason FROM vacations
         WHERE end_date >= ? AND start_date <= ?",
    )
    .bind(from)
    .bind(to)
    .fetch_all(db)
    .await?;

    let blocked_days = sqlx::query_as::<_, BlockedDay>(
        "SELECT id, date, reason FROM blocked_days WHERE date BETWEEN ? AND ?",
    )
    .bind(from)
    .bind(to)
    .fetch_all(db)
    .await?;

    Ok(ScheduleConfig {
        working_hours,
        vacations,
        blocked_days,
    })
}

/// Occupying bookings for one date, filtered with the canonical status set.
pub async fn occupying_bookings_for_date(
    db: &sqlx::SqlitePool,
    date: &str,
) -> Result<Vec<OccupyingBooking>, sqlx::Error> {
    let query = format!(
        "SELECT b.booking_time,
                COALESCE(b.duration_minutes, s.duration_minutes, {default}) as duration_minutes
         FROM bookings b
         LEFT JOIN services s ON s.id = b.service_id
         WHERE b.booking_date = ? AND b.status IN {statuses}",
        default = availability::DEFAULT_DURATION_MIN,
        statuses = availability::OCCUPYING_STATUS_SQL,
    );
    sqlx::query_as::<_, OccupyingBooking>(&query)
        .bind(date)
        .fetch_all(db)
        .await
}

/// Requested service duration, falling back to the default when the service
/// is missing, inactive or not given.
async fn service_duration(
    db: &sqlx::SqlitePool,
    service_id: Option<i64>,
) -> Result<i64, sqlx::Error> {
    let Some(id) = service_id else {
        return Ok(availability::DEFAULT_DURATION_MIN);
    };
    let duration: Option<i64> = sqlx::query_scalar(
        "SELECT duration_minutes FROM services WHERE id = ? AND is_active = 1",
    )
    .bind(id)
    .fetch_optional(db)
    .await?;
    Ok(duration.unwrap_or(availability::DEFAULT_DURATION_MIN))
}

// ── Endpoints ──

/// GET /api/services — list active services.
pub async fn list_services(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<Service>>>, HandlerError> {
    let services = sqlx::query_as::<_, Service>(
        "SELECT id, name, description, price, duration_minutes, is_active, sort_order
         FROM services WHERE is_active = 1 ORDER BY sort_order ASC",
    )
    .fetch_all(&state.db)
    .await
    .map_err(|e| internal_error("list_services", e))?;

    Ok(Json(ApiResponse::success(services)))
}

/// GET /api/availability?date=YYYY-MM-DD&service_id=N — bookable start times.
pub async fn availability(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<DayAvailability>, HandlerError> {
    let date_str = query.date.ok_or_else(|| bad_request("Date is required"))?;
    let date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
        .map_err(|_| bad_request("Invalid date, expected YYYY-MM-DD"))?;

    let duration = service_duration(&state.db, query.service_id)
        .await
        .map_err(|e| internal_error("availability: service lookup", e))?;

    let schedule = load_schedule(&state.db, &date_str, &date_str)
        .await
        .map_err(|e| internal_error("availability: schedule", e))?;

    let bookings = occupying_bookings_for_date(&state.db, &date_str)
        .await
        .map_err(|e| internal_error("availability: bookings", e))?;

    Ok(Json(availability::compute_availability(
        date,
        duration,
        &schedule.working_hours,
        &schedule.vacations,
        &schedule.blocked_days,
        &bookings,
    )))
}

/// GET /api/calendar?year=2026&month=3&service_id=N — month view.
///
/// Fetches the month's occupying bookings in a single query, then runs the
/// engine once per remaining day.
pub async fn calendar(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CalendarQuery>,
) -> Result<Json<ApiResponse<Vec<CalendarDay>>>, HandlerError> {
    if !(1..=12).contains(&query.month) {
        return Err(bad_request("Invalid month"));
    }

    let duration = service_duration(&state.db, query.service_id)
        .await
        .map_err(|e| internal_error("calendar: service lookup", e))?;

    let first = NaiveDate::from_ymd_opt(query.year, query.month, 1)
        .ok_or_else(|| bad_request("Invalid year/month"))?;
    let next_month = if query.month == 12 {
        NaiveDate::from_ymd_opt(query.year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(query.year, query.month + 1, 1)
    };
    let last = next_month
        .and_then(|d| d.pred_opt())
        .ok_or_else(|| bad_request("Invalid year/month"))?;

    let month_start = first.format("%Y-%m-%d").to_string();
    let month_end = last.format("%Y-%m-%d").to_string();

    let schedule = load_schedule(&state.db, &month_start, &month_end)
        .await
        .map_err(|e| internal_error("calendar: schedule", e))?;

    // One query for the whole month, grouped by date afterwards.
    let rows_query = format!(
        "SELECT b.booking_date, b.booking_time,
                COALESCE(b.duration_minutes, s.duration_minutes, {default}) as duration_minutes
         FROM bookings b
         LEFT JOIN services s ON s.id = b.service_id
         WHERE b.booking_date BETWEEN ? AND ? AND b.status IN {statuses}",
        default = availability::DEFAULT_DURATION_MIN,
        statuses = availability::OCCUPYING_STATUS_SQL,
    );
    let rows: Vec<(String, String, i64)> = sqlx::query_as(&rows_query)
        .bind(&month_start)
        .bind(&month_end)
        .fetch_all(&state.db)
        .await
        .map_err(|e| internal_error("calendar: bookings", e))?;

    let mut bookings_by_date: HashMap<String, Vec<OccupyingBooking>> = HashMap::new();
    for (date, time, duration_minutes) in rows {
        bookings_by_date.entry(date).or_default().push(OccupyingBooking {
            booking_time: time,
            duration_minutes,
        });
    }

    let today = chrono::Utc::now().date_naive();
    let mut days = Vec::new();
    let mut day = first;
    while day <= last {
        if day >= today {
            let date_str = day.format("%Y-%m-%d").to_string();
            let empty = Vec::new();
            let bookings = bookings_by_date.get(&date_str).unwrap_or(&empty);
            let result = availability::compute_availability(
                day,
                duration,
                &schedule.working_hours,
                &schedule.vacations,
                &schedule.blocked_days,
                bookings,
            );
            days.push(CalendarDay {
                date: date_str,
                available: result.available,
                free_slots: result.slots.len() as i64,
                reason: result.reason,
            });
        }
        day = match day.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }

    Ok(Json(ApiResponse::success(days)))
}

/// POST /api/bookings — create a booking as `pending`.
///
/// Best-effort recheck: availability is recomputed through the engine and
/// the requested start must be a member of the slot set. A concurrent
/// request can still win the race between this read and the INSERT.
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateBookingRequest>,
) -> Result<Json<ApiResponse<CreateBookingResponse>>, HandlerError> {
    let user = auth::require_user(&state.db, &headers).await?;

    let date = NaiveDate::parse_from_str(&body.date, "%Y-%m-%d")
        .map_err(|_| bad_request("Invalid date, expected YYYY-MM-DD"))?;
    let start_min = availability::minute_of_day(&body.time)
        .ok_or_else(|| bad_request("Invalid time, expected HH:MM"))?;
    let start_time = availability::format_minute(start_min);

    let service = sqlx::query_as::<_, Service>(
        "SELECT id, name, description, price, duration_minutes, is_active, sort_order
         FROM services WHERE id = ? AND is_active = 1",
    )
    .bind(body.service_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| internal_error("create_booking: service", e))?
    .ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error("Service not found")),
        )
    })?;

    let schedule = load_schedule(&state.db, &body.date, &body.date)
        .await
        .map_err(|e| internal_error("create_booking: schedule", e))?;
    let occupying = occupying_bookings_for_date(&state.db, &body.date)
        .await
        .map_err(|e| internal_error("create_booking: bookings", e))?;

    let day = availability::compute_availability(
        date,
        service.duration_minutes,
        &schedule.working_hours,
        &schedule.vacations,
        &schedule.blocked_days,
        &occupying,
    );
    if !availability::is_start_bookable(&day, &start_time) {
        return Err((
            StatusCode::CONFLICT,
            Json(ApiResponse::error("This slot is no longer available")),
        ));
    }

    let booking_id = sqlx::query(
        "INSERT INTO bookings (user_id, service_id, booking_date, booking_time,
                               duration_minutes, notes, status)
         VALUES (?, ?, ?, ?, ?, ?, 'pending')",
    )
    .bind(user.id)
    .bind(service.id)
    .bind(&body.date)
    .bind(&start_time)
    .bind(service.duration_minutes)
    .bind(body.notes.as_deref().filter(|n| !n.is_empty()))
    .execute(&state.db)
    .await
    .map_err(|e| internal_error("create_booking: insert", e))?
    .last_insert_rowid();

    let detail_query = format!("{} WHERE b.id = ?", BOOKING_DETAIL_SELECT);
    let detail = sqlx::query_as::<_, BookingDetail>(&detail_query)
        .bind(booking_id)
        .fetch_one(&state.db)
        .await
        .map_err(|e| internal_error("create_booking: detail", e))?;

    let whatsapp_url = whatsapp_booking_url(
        &state.whatsapp_phone,
        &user,
        &service.name,
        &body.date,
        &start_time,
        body.notes.as_deref(),
    );

    Ok(Json(ApiResponse::success(CreateBookingResponse {
        booking: detail,
        whatsapp_url,
    })))
}

/// GET /api/bookings/my — the caller's upcoming, non-cancelled bookings.
pub async fn my_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Vec<BookingDetail>>>, HandlerError> {
    let user = auth::require_user(&state.db, &headers).await?;

    let query = format!(
        "{} WHERE b.user_id = ? AND b.status IN ('pending', 'confirmed')
         AND b.booking_date >= date('now')
         ORDER BY b.booking_date ASC, b.booking_time ASC",
        BOOKING_DETAIL_SELECT
    );
    let bookings = sqlx::query_as::<_, BookingDetail>(&query)
        .bind(user.id)
        .fetch_all(&state.db)
        .await
        .map_err(|e| internal_error("my_bookings", e))?;

    Ok(Json(ApiResponse::success(bookings)))
}

/// DELETE /api/bookings/:id — cancel one of the caller's own bookings.
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<&'static str>>, HandlerError> {
    let user = auth::require_user(&state.db, &headers).await?;

    let result = sqlx::query(
        "UPDATE bookings
         SET status = 'cancelled', cancelled_at = datetime('now'), updated_at = datetime('now')
         WHERE id = ? AND user_id = ? AND status IN ('pending', 'confirmed')",
    )
    .bind(id)
    .bind(user.id)
    .execute(&state.db)
    .await
    .map_err(|e| internal_error("cancel_booking", e))?;

    if result.rows_affected() == 0 {
        return Err((
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error("Booking not found")),
        ));
    }

    Ok(Json(ApiResponse::success("Booking cancelled")))
}

// ── WhatsApp deep link ──

/// Builds a wa.me link that opens WhatsApp with a pre-filled message so the
/// client can notify the owner of a new booking request.
fn whatsapp_booking_url(
    owner_phone: &str,
    user: &User,
    service_name: &str,
    date: &str,
    time: &str,
    notes: Option<&str>,
) -> String {
    let notes_line = notes
        .filter(|n| !n.is_empty())
        .map(|n| format!("Notes: {}\n", n))
        .unwrap_or_default();
    let message = format!(
        "New booking request!\n\nClient: {}\nPhone: {}\nService: {}\nDate: {}\nTime: {}\n{}Please confirm or reject this booking.",
        user.full_name,
        user.phone.as_deref().unwrap_or("Not provided"),
        service_name,
        date,
        time,
        notes_line,
    );
    let encoded: String = url::form_urlencoded::byte_serialize(message.as_bytes()).collect();
    format!("https://wa.me/{}?text={}", owner_phone, encoded)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn make_user(name: &str, phone: Option<&str>) -> User {
        User {
            id: 1,
            full_name: name.to_string(),
            email: "client@example.com".into(),
            phone: phone.map(|p| p.to_string()),
            password_salt: String::new(),
            password_hash: String::new(),
            is_admin: false,
            created_at: "2026-01-01 00:00:00".into(),
        }
    }

    #[test]
    fn test_whatsapp_url_shape() {
        let user = make_user("Asha Rao", Some("23051234567"));
        let url = whatsapp_booking_url(
            "23057654321",
            &user,
            "Gel Manicure",
            "2026-03-02",
            "10:00",
            None,
        );
        assert!(url.starts_with("https://wa.me/23057654321?text="));
        assert!(url.contains("Asha+Rao"));
        assert!(url.contains("Gel+Manicure"));
        assert!(url.contains("2026-03-02"));
        assert!(!url.contains("Notes"));
    }

    #[test]
    fn test_whatsapp_url_includes_notes() {
        let user = make_user("Asha Rao", None);
        let url = whatsapp_booking_url(
            "23057654321",
            &user,
            "Nail Art",
            "2026-03-02",
            "10:00",
            Some("french tips"),
        );
        assert!(url.contains("Notes"));
        assert!(url.contains("french+tips"));
        assert!(url.contains("Not+provided"));
    }

    #[test]
    fn test_booking_detail_select_names_all_columns() {
        // Keep the shared SELECT in sync with BookingDetail's fields.
        for column in [
            "b.id",
            "booking_date",
            "booking_time",
            "duration_minutes",
            "b.status",
            "b.notes",
            "b.created_at",
            "service_name",
            "service_price",
            "client_name",
            "client_email",
            "client_phone",
        ] {
            assert!(BOOKING_DETAIL_SELECT.contains(column), "{}", column);
        }
    }
}
