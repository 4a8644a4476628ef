/// 配置管理模組
///
/// 負責加載、驗證和管理系統配置，依 `STOCK_SYNC_ENV` 選擇開發或生產配置。
pub mod loader;
pub mod manager;
pub mod types;
pub mod validation;

pub use loader::{ConfigExt, ConfigLoader, Environment};
pub use manager::{get_config, init_config};
pub use types::*;
pub use validation::{validate_config, ValidationError, ValidationUtils, Validator};
