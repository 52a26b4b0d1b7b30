use std::sync::Arc;

use wayfarer_booking::{
    BookingContext, BookingOrchestrator, PayoutProcessor, RefundEngine, WebhookReconciler,
};
use wayfarer_core::DepartureRepository;
use wayfarer_store::RedisClient;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
}

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: BookingOrchestrator,
    pub refunds: RefundEngine,
    pub payouts: PayoutProcessor,
    pub reconciler: WebhookReconciler,
    pub departures: Arc<dyn DepartureRepository>,
    /// Rate limiting is off without Redis.
    pub redis: Option<Arc<RedisClient>>,
    pub auth: AuthConfig,
    pub rate_limit_per_minute: i64,
}

impl AppState {
    pub fn new(
        ctx: BookingContext,
        webhook_secret: &str,
        auth: AuthConfig,
        redis: Option<Arc<RedisClient>>,
        rate_limit_per_minute: i64,
    ) -> Self {
        Self {
            departures: ctx.departures.clone(),
            orchestrator: BookingOrchestrator::new(ctx.clone()),
            refunds: RefundEngine::new(ctx.clone()),
            payouts: PayoutProcessor::new(ctx.clone()),
            reconciler: WebhookReconciler::new(ctx, webhook_secret),
            redis,
            auth,
            rate_limit_per_minute,
        }
    }
}
