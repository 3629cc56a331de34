use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ── Database models ──

/// Lifecycle of a booking.
///
/// `tentative` rows do not hold the date exclusively; only a confirmed
/// deposit takes the date off the calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Tentative,
    DepositConfirmed,
    Finalized,
    Completed,
    Cancelled,
}

impl BookingStatus {
    /// States that exclude the booking's date from the offerable calendar.
    pub const DATE_HOLDING: [BookingStatus; 3] = [
        BookingStatus::DepositConfirmed,
        BookingStatus::Finalized,
        BookingStatus::Completed,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    Deposit,
    Final,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
    Canceled,
    Refunded,
}

impl PaymentStatus {
    /// A terminal payment must never transition again.
    pub fn is_terminal(self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct WorkDay {
    pub id: i64,
    pub work_date: NaiveDate,
    pub is_available: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Booking {
    pub id: i64,
    pub user_id: i64,
    pub username: Option<String>,
    pub display_name: String,
    pub booking_date: NaiveDate,
    pub status: BookingStatus,
    pub deposit_paid: bool,
    pub final_paid: bool,
    pub brief_completed: bool,
    pub delivered_parts: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PaymentIntent {
    pub id: i64,
    /// Gateway-assigned opaque id; unique, the reconciliation key.
    pub payment_id: String,
    pub user_id: i64,
    pub kind: PaymentKind,
    pub amount: i64,
    pub status: PaymentStatus,
    pub booking_date: NaiveDate,
    pub created_at: String,
}

// ── API request/response types ──

#[derive(Debug, Deserialize)]
pub struct ReserveRequest {
    pub date: NaiveDate,
}

#[derive(Debug, Serialize)]
pub struct ReserveResponse {
    pub booking: Booking,
    pub payment_url: String,
    pub deposit_amount: i64,
}

#[derive(Debug, Serialize)]
pub struct FinalPaymentResponse {
    pub booking_date: NaiveDate,
    pub payment_url: String,
    pub amount: i64,
}

/// Offerable dates grouped by month for menu rendering.
#[derive(Debug, Serialize, PartialEq)]
pub struct MonthDates {
    /// "YYYY-MM"
    pub month: String,
    pub dates: Vec<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct AddWorkDayRequest {
    pub date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct ExpandMonthRequest {
    pub year: i32,
    pub month: u32,
}

#[derive(Debug, Deserialize)]
pub struct RemoveWorkDayRequest {
    pub date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct BookingsQuery {
    pub date: Option<NaiveDate>,
    pub status: Option<BookingStatus>,
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub amount: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct DeliveryRequest {
    /// Text handed to the client together with the part number.
    pub message: String,
}

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

// ── Telegram auth ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

impl TelegramUser {
    /// Name shown to the operator in notifications and the mirror.
    pub fn display_name(&self) -> String {
        match &self.last_name {
            Some(last) => format!("{} {}", self.first_name, last),
            None => self.first_name.clone(),
        }
    }
}
