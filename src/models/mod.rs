//! Domain types shared by the aggregation, forecasting and mining layers.

pub mod association;
pub mod period;
pub mod prediction;
pub mod training;
pub mod transaction;

pub use association::{AssociationRule, Basket};
pub use period::{AggregatedPeriod, DateRange, Granularity, ItemSeries};
pub use prediction::{accuracy_percent, Bias, FallbackReason, Prediction, PredictionSource};
pub use training::{TrainingState, TrainingStatus};
pub use transaction::{Direction, Item, ItemId, TransactionRecord};
