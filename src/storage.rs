pub mod database;
pub mod error;
pub mod memory;
pub mod migrations;
pub mod models;
pub mod repository;

pub use database::{get_db_pool, health_check, init_pool, DatabasePool};
pub use error::{StorageError, StorageResult};
pub use memory::InMemoryMarketStore;
pub use migrations::{migration_status, run_migrations};
pub use repository::{
    BarTransaction, DailyBarStore, DbExecutor, HotRankStore, InstrumentRegistry, PgDailyBarStore,
    PgHotRankStore, PgInstrumentRegistry,
};
