pub mod hot_rank;
pub mod instrument;
pub mod market_data;

pub use hot_rank::HotRankRecord;
pub use instrument::InstrumentRecord;
pub use market_data::{DailyBarRecord, DerivedBarRecord};
