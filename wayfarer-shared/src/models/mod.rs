pub mod events;

pub use events::BookingChangeEvent;
