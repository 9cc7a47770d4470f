/*!
 * # Machine Learning Module
 *
 * Pure algorithms behind the demand services: feature extraction, the
 * regression forest and its persisted artifact, the model runner boundary,
 * and association-rule mining.
 */

/// Frequent itemsets and association rules (Apriori, FP-Growth)
pub mod association;

/// Versioned on-disk model artifacts and the in-memory registry
pub mod artifact;

/// Demand model: training, inference and confidence
pub mod demand_model;

/// Lag / previous-period feature extraction
pub mod features;

pub mod random_forest;

/// In-process and subprocess model runners
pub mod runner;

/// `RESULT:` line protocol spoken by the model worker
pub mod worker;

pub use demand_model::{ModelOutput, ModelSummary, TrainedModel};
pub use features::{FeatureBuilder, FeatureSchema, FeatureVector, TrainingSet};
pub use runner::{DemandPredictor, DemandTrainer, InProcessRunner, SubprocessRunner};
