use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::ItemId;
use crate::errors::ServiceError;

/// Prediction horizon. Each granularity has its own model artifact.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Granularity {
    Daily,
    Monthly,
}

impl Granularity {
    pub const ALL: [Granularity; 2] = [Granularity::Daily, Granularity::Monthly];

    /// First day of the period containing `date`.
    pub fn period_start(self, date: NaiveDate) -> NaiveDate {
        match self {
            Granularity::Daily => date,
            Granularity::Monthly => {
                NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date)
            }
        }
    }

    /// Start of the period following `period`.
    pub fn next(self, period: NaiveDate) -> NaiveDate {
        self.shift_forward(period, 1)
    }

    /// Exclusive end of `period`.
    pub fn period_end(self, period: NaiveDate) -> NaiveDate {
        self.next(self.period_start(period))
    }

    pub fn shift_forward(self, period: NaiveDate, n: u32) -> NaiveDate {
        let shifted = match self {
            Granularity::Daily => period.checked_add_days(Days::new(u64::from(n))),
            Granularity::Monthly => period.checked_add_months(Months::new(n)),
        };
        shifted.unwrap_or(NaiveDate::MAX)
    }

    pub fn shift_back(self, period: NaiveDate, n: u32) -> NaiveDate {
        let shifted = match self {
            Granularity::Daily => period.checked_sub_days(Days::new(u64::from(n))),
            Granularity::Monthly => period.checked_sub_months(Months::new(n)),
        };
        shifted.unwrap_or(NaiveDate::MIN)
    }

    /// Signed number of whole periods from `from` to `to` (both period starts).
    pub fn periods_between(self, from: NaiveDate, to: NaiveDate) -> i64 {
        match self {
            Granularity::Daily => (to - from).num_days(),
            Granularity::Monthly => month_index(to) - month_index(from),
        }
    }

    /// Period starts overlapping `range`, in order.
    pub fn periods_in(self, range: &DateRange) -> Vec<NaiveDate> {
        let mut periods = Vec::new();
        if range.is_empty() {
            return periods;
        }
        let mut current = self.period_start(range.start);
        while current < range.end {
            periods.push(current);
            let next = self.next(current);
            if next <= current {
                break;
            }
            current = next;
        }
        periods
    }
}

fn month_index(date: NaiveDate) -> i64 {
    i64::from(date.year()) * 12 + i64::from(date.month0())
}

/// Half-open date interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ServiceError> {
        if start > end {
            return Err(ServiceError::InvalidInput(format!(
                "date range start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Everything strictly before `end`.
    pub fn until(end: NaiveDate) -> Self {
        Self {
            start: NaiveDate::MIN,
            end,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// Demand total of one item over one period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AggregatedPeriod {
    pub item_id: ItemId,
    pub period_start: NaiveDate,
    pub total_quantity: u64,
}

/// Contiguous, zero-filled per-item series starting at `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemSeries {
    pub item_id: ItemId,
    pub granularity: Granularity,
    pub start: NaiveDate,
    pub totals: Vec<u64>,
}

impl ItemSeries {
    pub fn zeros(item_id: ItemId, granularity: Granularity, range: &DateRange) -> Self {
        let periods = granularity.periods_in(range);
        Self {
            item_id,
            granularity,
            start: granularity.period_start(range.start),
            totals: vec![0; periods.len()],
        }
    }

    /// Total for `period`; zero for anything outside the series.
    pub fn total_at(&self, period: NaiveDate) -> u64 {
        let offset = self
            .granularity
            .periods_between(self.start, self.granularity.period_start(period));
        usize::try_from(offset)
            .ok()
            .and_then(|idx| self.totals.get(idx).copied())
            .unwrap_or(0)
    }

    pub(crate) fn add(&mut self, period: NaiveDate, quantity: u64) {
        let offset = self
            .granularity
            .periods_between(self.start, self.granularity.period_start(period));
        if let Some(slot) = usize::try_from(offset)
            .ok()
            .and_then(|idx| self.totals.get_mut(idx))
        {
            *slot = slot.saturating_add(quantity);
        }
    }

    pub fn period_at(&self, index: usize) -> NaiveDate {
        self.granularity
            .shift_forward(self.start, u32::try_from(index).unwrap_or(u32::MAX))
    }

    /// Exclusive end of the series.
    pub fn end(&self) -> NaiveDate {
        self.period_at(self.totals.len())
    }

    pub fn len(&self) -> usize {
        self.totals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }

    pub fn first_active_period(&self) -> Option<NaiveDate> {
        self.totals
            .iter()
            .position(|&total| total > 0)
            .map(|idx| self.period_at(idx))
    }

    pub fn periods(&self) -> impl Iterator<Item = AggregatedPeriod> + '_ {
        self.totals
            .iter()
            .enumerate()
            .map(move |(idx, &total_quantity)| AggregatedPeriod {
                item_id: self.item_id,
                period_start: self.period_at(idx),
                total_quantity,
            })
    }
}
