use crate::domain_types::DailyBar;
use crate::source::SourceError;

/// 日線記錄驗證器
///
/// 價格必須為有限值、成交量不得為負、最高價不得低於最低價。
/// 空值視為合法（佔位數據）。
#[derive(Debug, Clone)]
pub struct BarValidator {
    /// 最大價格
    max_price: f64,
}

impl Default for BarValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl BarValidator {
    pub fn new() -> Self {
        Self { max_price: 1e12 }
    }

    pub fn validate(&self, bar: &DailyBar) -> Result<(), SourceError> {
        for (name, value) in bar.float_fields() {
            if let Some(v) = value {
                if !v.is_finite() {
                    return Err(SourceError::DataInvalid(format!(
                        "{} {} 的 {} 不是有限數值: {}",
                        bar.symbol, bar.date, name, v
                    )));
                }
            }
        }

        for (name, value) in [
            ("open", bar.open),
            ("close", bar.close),
            ("high", bar.high),
            ("low", bar.low),
        ] {
            if let Some(v) = value {
                if v.abs() > self.max_price {
                    return Err(SourceError::DataInvalid(format!(
                        "{} {} 的 {} 超出範圍: {}",
                        bar.symbol, bar.date, name, v
                    )));
                }
            }
        }

        if let Some(volume) = bar.volume {
            if volume < 0 {
                return Err(SourceError::DataInvalid(format!(
                    "{} {} 成交量為負: {}",
                    bar.symbol, bar.date, volume
                )));
            }
        }

        if let (Some(high), Some(low)) = (bar.high, bar.low) {
            if high < low {
                return Err(SourceError::DataInvalid(format!(
                    "{} {} 最高價 ({}) 低於最低價 ({})",
                    bar.symbol, bar.date, high, low
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::NaiveDate;
    use rstest::rstest;

    fn valid_bar() -> DailyBar {
        DailyBar::ohlcv(
            "sz000001",
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            10.0,
            11.0,
            9.0,
            10.5,
            1000,
        )
    }

    #[test]
    fn test_valid_and_placeholder_bars_pass() {
        let validator = BarValidator::new();
        assert!(validator.validate(&valid_bar()).is_ok());
        assert!(validator.validate(&DailyBar::empty("sz000001", valid_bar().date)).is_ok());
    }

    #[rstest]
    #[case::high_below_low(DailyBar { high: Some(8.0), ..valid_bar() })]
    #[case::negative_volume(DailyBar { volume: Some(-1), ..valid_bar() })]
    #[case::infinite_close(DailyBar { close: Some(f64::INFINITY), ..valid_bar() })]
    #[case::nan_amount(DailyBar { amount: Some(f64::NAN), ..valid_bar() })]
    #[case::absurd_price(DailyBar { open: Some(1e13), ..valid_bar() })]
    fn test_invalid_bars_rejected(#[case] bar: DailyBar) {
        assert_matches!(BarValidator::new().validate(&bar), Err(SourceError::DataInvalid(_)));
    }
}
