pub mod asset_types;
pub mod calendar;
pub mod data_point;
pub mod instrument;
pub mod types;
pub mod window;

pub use asset_types::InstrumentKind;
pub use calendar::TradingCalendar;
pub use data_point::{DailyBar, DerivedBar};
pub use instrument::{HotRank, Instrument, INDEX_MEMBERSHIP_YEARS};
pub use types::{DomainError, Result};
pub use window::DateWindow;
