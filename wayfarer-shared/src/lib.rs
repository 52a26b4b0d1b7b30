pub mod pii;
pub mod models;

pub use models::BookingChangeEvent;
pub use pii::Masked;
