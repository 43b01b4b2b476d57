use serde::{Deserialize, Serialize};

// ── Database models ──

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Service {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub price: i64,
    pub duration_minutes: i64,
    pub is_active: bool,
    pub sort_order: i64,
}

/// One row per weekday, 0 = Sunday .. 6 = Saturday.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WorkingHours {
    pub day_of_week: i64,
    pub start_time: String,
    pub end_time: String,
    pub is_active: bool,
}

/// Inclusive closed date range.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Vacation {
    pub id: i64,
    pub start_date: String,
    pub end_date: String,
    pub reason: Option<String>,
}

/// Single date closed regardless of the weekday pattern.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BlockedDay {
    pub id: i64,
    pub date: String,
    pub reason: Option<String>,
}

/// The slice of a booking the availability engine needs: start time plus
/// effective duration. Rows are pre-filtered to occupying statuses.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OccupyingBooking {
    pub booking_time: String,
    pub duration_minutes: i64,
}

/// Not serializable: carries credential material.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub password_salt: String,
    pub password_hash: String,
    pub is_admin: bool,
    pub created_at: String,
}

// ── API request/response types ──

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub date: Option<String>,
    pub service_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CalendarQuery {
    pub year: i32,
    pub month: u32,
    pub service_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CalendarDay {
    pub date: String,
    pub available: bool,
    pub free_slots: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<crate::availability::ClosedReason>,
}

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub service_id: i64,
    pub date: String,
    pub time: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct BookingDetail {
    pub id: i64,
    pub booking_date: String,
    pub booking_time: String,
    pub duration_minutes: i64,
    pub status: String,
    pub notes: Option<String>,
    pub created_at: String,
    pub service_name: String,
    pub service_price: i64,
    pub client_name: String,
    pub client_email: String,
    pub client_phone: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateBookingResponse {
    pub booking: BookingDetail,
    /// Deep link that opens WhatsApp with a pre-filled message to the owner.
    pub whatsapp_url: String,
}

#[derive(Debug, Deserialize)]
pub struct BookingsQuery {
    pub date: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateWorkingHoursRequest {
    pub start_time: String,
    pub end_time: String,
    pub is_active: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateVacationRequest {
    pub start_date: String,
    pub end_date: String,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateBlockedDayRequest {
    pub date: String,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateServiceRequest {
    pub name: String,
    pub description: Option<String>,
    pub price: i64,
    pub duration_minutes: i64,
    pub sort_order: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateServiceRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<i64>,
    pub duration_minutes: Option<i64>,
    pub is_active: Option<bool>,
    pub sort_order: Option<i64>,
}

// ── Account types ──

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub id: i64,
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub is_admin: bool,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            full_name: user.full_name.clone(),
            email: user.email.clone(),
            phone: user.phone.clone(),
            is_admin: user.is_admin,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub token: String,
    pub user: UserProfile,
}

// ── Response envelope ──

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}
