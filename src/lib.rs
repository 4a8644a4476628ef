// 模組定義
pub mod config;
pub mod domain_types;
pub mod monitor;
pub mod source;
pub mod storage;
pub mod sync;
pub mod utils;
