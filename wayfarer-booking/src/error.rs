use wayfarer_core::payment::GatewayError;
use wayfarer_core::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Not enough seats available: requested {requested}, available {available}")]
    CapacityExceeded { requested: u32, available: u32 },

    #[error("{0}")]
    StateConflict(String),

    #[error("Invalid payment signature")]
    InvalidSignature,

    #[error("Payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Payment was genuine but the booking could not be honoured; the money
    /// went back automatically.
    #[error("Booking could not be completed ({reason}); payment {payment_id} was refunded")]
    PaymentRefunded { payment_id: String, reason: String },

    /// Payment was genuine, the booking could not be honoured and the refund
    /// call failed too. Needs an operator.
    #[error("Booking could not be completed ({reason}) and refunding payment {payment_id} failed")]
    CompensationFailed { payment_id: String, reason: String },
}

impl From<StoreError> for BookingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => BookingError::NotFound(what),
            StoreError::CapacityExceeded { requested, available, .. } => {
                BookingError::CapacityExceeded { requested, available }
            }
            other => BookingError::Persistence(other.to_string()),
        }
    }
}

pub type BookingResult<T> = Result<T, BookingError>;
