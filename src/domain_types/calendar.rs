use chrono::NaiveDate;
use std::collections::BTreeSet;

use crate::domain_types::DateWindow;
use crate::utils::is_weekend;

/// 交易日曆
///
/// 上游日曆涵蓋的日期以日曆為準，涵蓋範圍以外（或沒有取得日曆時）
/// 以週一至週五為交易日。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TradingCalendar {
    days: BTreeSet<NaiveDate>,
}

impl TradingCalendar {
    /// 只依星期判斷的日曆
    pub fn weekdays() -> Self {
        Self::default()
    }

    pub fn from_days<I: IntoIterator<Item = NaiveDate>>(days: I) -> Self {
        Self {
            days: days.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    fn covers(&self, date: NaiveDate) -> bool {
        match (self.days.first(), self.days.last()) {
            (Some(first), Some(last)) => *first <= date && date <= *last,
            _ => false,
        }
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        if self.covers(date) {
            self.days.contains(&date)
        } else {
            !is_weekend(date)
        }
    }

    /// 區間內是否至少有一個交易日
    pub fn has_trading_day(&self, window: &DateWindow) -> bool {
        window.iter_days().any(|date| self.is_trading_day(date))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, day).unwrap()
    }

    #[test]
    fn test_weekdays_fallback() {
        let calendar = TradingCalendar::weekdays();
        assert!(calendar.is_empty());
        assert!(calendar.is_trading_day(d(2, 12)));
        assert!(!calendar.is_trading_day(d(2, 10)));
    }

    #[test]
    fn test_calendar_excludes_holidays_inside_range() {
        // 2024 春節休市 02-09 至 02-16
        let calendar = TradingCalendar::from_days([d(2, 7), d(2, 8), d(2, 19), d(2, 20)]);
        assert!(!calendar.is_trading_day(d(2, 12)));
        assert!(calendar.is_trading_day(d(2, 19)));
        assert!(!calendar.has_trading_day(&DateWindow::new(d(2, 9), d(2, 18)).unwrap()));

        // 日曆範圍以外退回星期判斷
        assert!(calendar.is_trading_day(d(3, 1)));
        assert!(!calendar.is_trading_day(d(3, 2)));
    }
}
