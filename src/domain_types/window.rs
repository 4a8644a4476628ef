//! 日期區間

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::types::{DomainError, Result};

/// 閉區間 `[start, end]`，建構時保證 `start <= end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateWindow {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(DomainError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// 單日區間
    pub fn single(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// 區間包含的天數（含首尾）
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// 兩個區間的交集
    pub fn intersect(&self, other: &DateWindow) -> Option<DateWindow> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        DateWindow::new(start, end).ok()
    }

    /// 逐日迭代
    pub fn iter_days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }

    /// 兩區間之間相隔不超過 `max_gap_days` 天時合併
    pub fn merge_if_close(&self, other: &DateWindow, max_gap_days: u64) -> Option<DateWindow> {
        let (first, second) = if self.start <= other.start {
            (self, other)
        } else {
            (other, self)
        };
        let reach = first
            .end
            .checked_add_days(Days::new(max_gap_days.saturating_add(1)))
            .unwrap_or(NaiveDate::MAX);
        if second.start <= reach {
            Some(DateWindow {
                start: first.start,
                end: first.end.max(second.end),
            })
        } else {
            None
        }
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}
