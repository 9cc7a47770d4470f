pub mod associations;
pub mod backfill;
pub mod health;
pub mod models;
pub mod predictions;

use validator::ValidationErrors;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Flattens validator output into `field: message` strings for `ApiResponse::validation_errors`.
pub(crate) fn validation_messages(errors: &ValidationErrors) -> Vec<String> {
    let mut messages: Vec<String> = errors
        .field_errors()
        .iter()
        .flat_map(|(field, errors)| {
            errors.iter().map(move |error| {
                format!(
                    "{}: {}",
                    field,
                    error
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| error.code.to_string())
                )
            })
        })
        .collect();
    messages.sort();
    messages
}
