pub mod announcement_repository;
pub mod config;
pub mod database;
pub mod health_repository;
pub mod run_repository;
pub mod source_repository;
pub mod stats_repository;

pub use announcement_repository::AnnouncementRepository;
pub use config::DatabaseConfig;
pub use database::Database;
pub use health_repository::HealthRepository;
pub use run_repository::RunRepository;
pub use source_repository::SourceRepository;
pub use stats_repository::StatsRepository;
