pub mod app_config;
pub mod database;
pub mod departure_repo;
pub mod booking_repo;
pub mod plan_repo;
pub mod memory;
pub mod razorpay;
pub mod redis_repo;

pub use booking_repo::PgBookingRepository;
pub use database::DbClient;
pub use departure_repo::PgDepartureRepository;
pub use memory::MemoryStore;
pub use plan_repo::PgPlanRepository;
pub use razorpay::RazorpayGateway;
pub use redis_repo::RedisClient;
