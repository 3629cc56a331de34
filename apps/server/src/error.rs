use axum::http::StatusCode;
use chrono::NaiveDate;

/// Errors surfaced by the core booking/payment operations.
///
/// Best-effort collaborators (mirror, notifications) never produce these at
/// the operation boundary; their failures are logged and swallowed at the
/// call site. Anything here aborts the operation that raised it.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("date {0} is not open for booking")]
    DateUnavailable(NaiveDate),

    #[error("user already holds a reservation for {0}")]
    AlreadyReserved(NaiveDate),

    #[error("confirmed bookings still reference {0}")]
    DateStillBooked(NaiveDate),

    #[error("payment gateway error: {0}")]
    Gateway(String),

    #[error("final payment has not been confirmed")]
    FinalPaymentRequired,

    #[error("delivery is already complete")]
    AlreadyCompleted,

    #[error("booking not found")]
    BookingNotFound,

    #[error("payment not found")]
    PaymentNotFound,

    #[error("mirror unavailable: {0}")]
    MirrorUnavailable(String),

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl CoreError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            CoreError::DateUnavailable(_) | CoreError::AlreadyReserved(_) => StatusCode::CONFLICT,
            CoreError::DateStillBooked(_) | CoreError::AlreadyCompleted => StatusCode::CONFLICT,
            CoreError::FinalPaymentRequired => StatusCode::PRECONDITION_FAILED,
            CoreError::BookingNotFound | CoreError::PaymentNotFound => StatusCode::NOT_FOUND,
            CoreError::Gateway(_) => StatusCode::BAD_GATEWAY,
            CoreError::MirrorUnavailable(_) | CoreError::Db(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Client-facing text (the bot relays these verbatim).
    pub fn user_message(&self) -> String {
        match self {
            CoreError::DateUnavailable(d) => {
                format!("Дата {} уже занята. Выберите другую.", d.format("%d.%m.%Y"))
            }
            CoreError::AlreadyReserved(d) => {
                format!("У вас уже есть бронь на {}.", d.format("%d.%m.%Y"))
            }
            CoreError::DateStillBooked(_) => "На эту дату есть активные бронирования".into(),
            CoreError::Gateway(_) => "Ошибка создания платежа. Попробуйте позже.".into(),
            CoreError::FinalPaymentRequired => "Финальная оплата еще не получена".into(),
            CoreError::AlreadyCompleted => "Проект уже завершен".into(),
            CoreError::BookingNotFound => "Бронирование не найдено".into(),
            CoreError::PaymentNotFound => "Платеж не найден".into(),
            CoreError::MirrorUnavailable(_) | CoreError::Db(_) => "Внутренняя ошибка".into(),
        }
    }
}
