pub mod error;
pub mod pricing;
pub mod context;
pub mod orchestrator;
pub mod refund;
pub mod payout;
pub mod reconciliation;
pub mod mock;

pub use context::{BookingContext, BookingRules};
pub use error::BookingError;
pub use orchestrator::BookingOrchestrator;
pub use payout::PayoutProcessor;
pub use reconciliation::WebhookReconciler;
pub use refund::{RefundEngine, RefundPolicy};
pub use mock::MockPaymentGateway;
