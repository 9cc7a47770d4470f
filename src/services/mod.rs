//! Demand services: aggregation, prediction with heuristic fallback,
//! training, backfill, accuracy reporting and association mining.

pub mod aggregation;
pub mod associations;
pub mod backfill;
pub mod prediction;
pub mod report;
pub mod training;

pub use aggregation::TransactionAggregator;
pub use associations::{AlgorithmComparison, AssociationService, MiningReport, MiningSummary};
pub use backfill::{BackfillRequest, BackfillService, BackfillSummary};
pub use prediction::{BatchPredictionResponse, PredictionRequest, PredictionService};
pub use report::{PredictionReport, ReportQuery, ReportService};
pub use training::TrainingService;
