//! Error Classification
//!
//! Raw failures from every component are mapped to [`ClassifiedError`]s by the
//! [`ErrorClassifier`] and surfaced through the process-wide
//! [`GlobalErrorRegistry`].

pub mod classifier;
pub mod registry;

pub use classifier::{
    ClassifiedError, ErrorCategory, ErrorClassifier, ErrorSeverity, FALLBACK_ACTION,
};
pub use registry::{ErrorEvent, GlobalErrorRegistry, DEFAULT_ERROR_HISTORY};
