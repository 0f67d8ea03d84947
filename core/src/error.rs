use chrono::NaiveDate;
use thiserror::Error;

/// Failures raised while reading or reconciling an import file.
///
/// None of these are retryable: the file has to be corrected first.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Import file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Page #{index} in the import file is null")]
    MissingPage { index: usize },

    #[error("Page {date} has no notes list")]
    MissingNotes { date: NaiveDate },

    #[error("Product '{product}' not found")]
    UnknownProduct { product: String },

    #[error("Quantity {quantity} of '{product}' must be greater than 0")]
    InvalidQuantity { product: String, quantity: f64 },

    #[error("Date {date} appears more than once in the import file")]
    DuplicateDate { date: NaiveDate },
}
