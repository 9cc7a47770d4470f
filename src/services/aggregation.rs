use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::errors::ServiceError;
use crate::models::{
    AggregatedPeriod, DateRange, Direction, Granularity, ItemId, ItemSeries, TransactionRecord,
};
use crate::repositories::TransactionSource;

/// Buckets `records` into one contiguous, zero-filled series per item.
///
/// Every id in `items` gets a series even without records; records for other
/// items get one too. Records outside `range` are ignored.
pub fn aggregate_records<'a>(
    records: impl IntoIterator<Item = &'a TransactionRecord>,
    items: impl IntoIterator<Item = ItemId>,
    granularity: Granularity,
    range: &DateRange,
) -> BTreeMap<ItemId, ItemSeries> {
    let mut series: BTreeMap<ItemId, ItemSeries> = items
        .into_iter()
        .map(|id| (id, ItemSeries::zeros(id, granularity, range)))
        .collect();

    for record in records {
        if !range.contains(record.occurred_on) {
            continue;
        }
        series
            .entry(record.item_id)
            .or_insert_with(|| ItemSeries::zeros(record.item_id, granularity, range))
            .add(record.occurred_on, record.quantity);
    }
    series
}

/// Reads the host ledger and turns it into per-period demand totals.
#[derive(Clone)]
pub struct TransactionAggregator {
    source: Arc<dyn TransactionSource>,
    direction: Direction,
}

impl TransactionAggregator {
    /// Aggregates outbound (demand) movements.
    pub fn new(source: Arc<dyn TransactionSource>) -> Self {
        Self {
            source,
            direction: Direction::Outbound,
        }
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Series for one item over `range`; all zeros when it never moved.
    #[instrument(skip(self))]
    pub async fn series_for_item(
        &self,
        item_id: ItemId,
        granularity: Granularity,
        range: DateRange,
    ) -> Result<ItemSeries, ServiceError> {
        let records = self
            .source
            .list_transactions(Some(item_id), Some(range), self.direction)
            .await?;
        let mut series = aggregate_records(&records, [item_id], granularity, &range);
        Ok(series
            .remove(&item_id)
            .unwrap_or_else(|| ItemSeries::zeros(item_id, granularity, &range)))
    }

    /// One row per item per period in `range`, zero-filled. `items` are
    /// always present, even with an empty ledger.
    #[instrument(skip(self, items))]
    pub async fn aggregate(
        &self,
        range: DateRange,
        granularity: Granularity,
        items: &[ItemId],
    ) -> Result<Vec<AggregatedPeriod>, ServiceError> {
        let records = self
            .source
            .list_transactions(None, Some(range), self.direction)
            .await?;
        let series = aggregate_records(&records, items.iter().copied(), granularity, &range);
        debug!(
            items = series.len(),
            records = records.len(),
            "aggregated ledger"
        );
        Ok(series.values().flat_map(|s| s.periods()).collect())
    }

    /// Full series per item for every period strictly before `until`, starting
    /// at the earliest recorded movement.
    #[instrument(skip(self))]
    pub async fn history(
        &self,
        granularity: Granularity,
        until: NaiveDate,
    ) -> Result<BTreeMap<ItemId, ItemSeries>, ServiceError> {
        let records: Vec<TransactionRecord> = self
            .source
            .list_transactions(None, None, self.direction)
            .await?
            .into_iter()
            .filter(|r| r.occurred_on < until)
            .collect();

        let Some(earliest) = records.iter().map(|r| r.occurred_on).min() else {
            return Ok(BTreeMap::new());
        };
        let range = DateRange::new(granularity.period_start(earliest), until)?;
        Ok(aggregate_records(&records, [], granularity, &range))
    }
}
