use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wayfarer_api::{app, AppState, AuthConfig};
use wayfarer_booking::{BookingContext, BookingRules, MockPaymentGateway};
use wayfarer_core::payment::PaymentGateway;
use wayfarer_core::{BookingRepository, DepartureRepository, PlanRepository, VendorRepository};
use wayfarer_store::app_config::Config;
use wayfarer_store::{
    DbClient, MemoryStore, PgBookingRepository, PgDepartureRepository, PgPlanRepository,
    RazorpayGateway, RedisClient,
};

type Repositories = (
    Arc<dyn PlanRepository>,
    Arc<dyn DepartureRepository>,
    Arc<dyn BookingRepository>,
    Arc<dyn VendorRepository>,
);

async fn repositories(config: &Config) -> anyhow::Result<Repositories> {
    match &config.database.url {
        Some(url) => {
            let db = DbClient::new(url).await.context("Failed to connect to Postgres")?;
            db.migrate().await.context("Failed to run migrations")?;
            let plan_repo = Arc::new(PgPlanRepository::new(db.pool.clone()));
            let plans: Arc<dyn PlanRepository> = plan_repo.clone();
            let vendors: Arc<dyn VendorRepository> = plan_repo;
            let departures: Arc<dyn DepartureRepository> = Arc::new(PgDepartureRepository::new(db.pool.clone()));
            let bookings: Arc<dyn BookingRepository> = Arc::new(PgBookingRepository::new(db.pool.clone()));
            Ok((plans, departures, bookings, vendors))
        }
        None => {
            tracing::warn!("No database configured; bookings are kept in memory");
            let store = Arc::new(MemoryStore::new());
            let plans: Arc<dyn PlanRepository> = store.clone();
            let departures: Arc<dyn DepartureRepository> = store.clone();
            let bookings: Arc<dyn BookingRepository> = store.clone();
            let vendors: Arc<dyn VendorRepository> = store;
            Ok((plans, departures, bookings, vendors))
        }
    }
}

fn gateway(config: &Config) -> anyhow::Result<Arc<dyn PaymentGateway>> {
    let gw = &config.gateway;
    if gw.mock {
        tracing::warn!("Using the mock payment gateway");
        return Ok(Arc::new(MockPaymentGateway::new(gw.key_id.clone(), gw.key_secret.clone())));
    }
    let razorpay = RazorpayGateway::new(&gw.base_url, &gw.key_id, &gw.key_secret)
        .context("Failed to build payment gateway client")?;
    Ok(Arc::new(razorpay))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wayfarer_api=debug,wayfarer_booking=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Wayfarer API on port {}", config.server.port);

    let (plans, departures, bookings, vendors) = repositories(&config).await?;

    let redis = match &config.redis.url {
        Some(url) => Some(Arc::new(RedisClient::new(url).await.context("Failed to open Redis client")?)),
        None => {
            tracing::info!("No Redis configured; rate limiting disabled");
            None
        }
    };

    let rules = &config.business_rules;
    let ctx = BookingContext {
        plans,
        departures,
        bookings,
        vendors,
        gateway: gateway(&config)?,
        rules: BookingRules {
            default_vendor_cut_percent: rules.default_vendor_cut_percent,
            platform_fee_percent: rules.platform_fee_percent,
            currency: config.gateway.currency.clone(),
            amount_tolerance: rules.amount_tolerance,
            max_people: rules.max_people,
        },
    };

    let app_state = AppState::new(
        ctx,
        &config.gateway.webhook_secret,
        AuthConfig { secret: config.auth.jwt_secret.clone() },
        redis,
        rules.rate_limit_per_minute,
    );

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}
