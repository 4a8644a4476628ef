// utils.rs - 公共工具模組

pub mod serde_helpers;
pub mod time_utils;

pub use time_utils::{is_weekend, parse_flexible_date, to_compact_date, today};
