//! Error Classifier
//!
//! Maps raw failures onto [`ClassifiedError`]s: a category, a severity, a
//! message fit for users and a non-empty list of suggested actions.
//!
//! Classification walks the `source()` chain and stops at the first error type
//! it recognizes, so wrapped failures (an `anyhow::Error` around a
//! `TransportError`, a `RetryError` around a `ServiceError`) classify the same
//! as the bare error.

use std::error::Error;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::health::ServiceError;
use crate::pairing::DecodeError;
use crate::profiles::StoreError;
use crate::transport::TransportError;

/// Suggested action used when nothing more specific applies
pub const FALLBACK_ACTION: &str = "Retry";

/// How bad a failure is
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Degraded but usable
    Warning,
    /// Operation failed
    Error,
    /// The client cannot work until this is resolved
    Critical,
}

/// What kind of thing failed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Connectivity to the agent server
    Network,
    /// A dependent service reported a problem
    Service,
    /// Malformed input or payloads
    Data,
    /// Invalid user action
    Ui,
    /// Everything else
    System,
}

impl ErrorCategory {
    /// Lowercase name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Service => "service",
            Self::Data => "data",
            Self::Ui => "ui",
            Self::System => "system",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        })
    }
}

/// A categorized, severity-ranked failure ready for display
///
/// Created once at classification time and never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedError {
    /// Short headline
    pub title: String,
    /// One-line description
    pub message: String,
    /// Severity tier
    pub severity: ErrorSeverity,
    /// Failure category
    pub category: ErrorCategory,
    /// Operation that was running when the failure happened
    pub context: String,
    /// What the user is shown
    pub user_facing_message: String,
    /// Raw error chain for logs and bug reports
    pub technical_details: String,
    /// Never empty
    pub suggested_actions: Vec<String>,
    /// Service the failure belongs to, for service-category errors
    pub service: Option<String>,
    /// When the error was classified
    pub occurred_at: DateTime<Utc>,
    /// Whether repeating the operation may help
    pub retryable: bool,
}

impl ClassifiedError {
    /// Create an error with fallback text and actions
    pub fn new(
        title: impl Into<String>,
        message: impl Into<String>,
        severity: ErrorSeverity,
        category: ErrorCategory,
    ) -> Self {
        let message = message.into();
        Self {
            title: title.into(),
            user_facing_message: message.clone(),
            technical_details: message.clone(),
            message,
            severity,
            category,
            context: String::new(),
            suggested_actions: vec![FALLBACK_ACTION.to_string()],
            service: None,
            occurred_at: Utc::now(),
            retryable: false,
        }
    }

    /// Set the operation context
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Set the text shown to users
    #[must_use]
    pub fn with_user_message(mut self, text: impl Into<String>) -> Self {
        self.user_facing_message = text.into();
        self
    }

    /// Set the technical details
    #[must_use]
    pub fn with_technical_details(mut self, details: impl Into<String>) -> Self {
        self.technical_details = details.into();
        self
    }

    /// Replace the suggested actions; an empty list keeps the fallback
    #[must_use]
    pub fn with_actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let actions: Vec<String> = actions.into_iter().map(Into::into).collect();
        if !actions.is_empty() {
            self.suggested_actions = actions;
        }
        self
    }

    /// Attach the service name
    #[must_use]
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Mark as retryable or not
    #[must_use]
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Whether repeating the failed operation may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Whether this error should switch the client to offline mode
    #[must_use]
    pub fn forces_offline(&self) -> bool {
        self.severity == ErrorSeverity::Critical && self.category == ErrorCategory::Network
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.title, self.message)
    }
}

impl Error for ClassifiedError {}

/// Stateless failure classifier
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Create a classifier
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Classify a failure
    ///
    /// `context` names the operation that failed (e.g. `"connect"`).
    #[must_use]
    pub fn classify(&self, err: &(dyn Error + 'static), context: Option<&str>) -> ClassifiedError {
        let already_classified = std::iter::successors(Some(err), |&e| e.source())
            .find_map(|e| e.downcast_ref::<ClassifiedError>());
        if let Some(existing) = already_classified {
            let mut classified = existing.clone();
            if let Some(context) = context {
                classified.context = context.to_string();
            }
            return classified;
        }

        let details = chain_text(err);
        let classified = std::iter::successors(Some(err), |&e| e.source())
            .find_map(recognize)
            .unwrap_or_else(|| {
                ClassifiedError::new(
                    "Unexpected Error",
                    err.to_string(),
                    ErrorSeverity::Error,
                    ErrorCategory::System,
                )
                .with_user_message("Something went wrong.")
                .with_actions([FALLBACK_ACTION, "Restart the app if the problem persists"])
            });

        classified
            .with_context(context.unwrap_or_default())
            .with_technical_details(details)
    }
}

fn chain_text(err: &(dyn Error + 'static)) -> String {
    std::iter::successors(Some(err), |&e| e.source())
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(": ")
}

fn recognize(err: &(dyn Error + 'static)) -> Option<ClassifiedError> {
    if let Some(e) = err.downcast_ref::<TransportError>() {
        return Some(classify_transport(e));
    }
    if let Some(e) = err.downcast_ref::<DecodeError>() {
        return Some(classify_decode(e));
    }
    if let Some(e) = err.downcast_ref::<ServiceError>() {
        return Some(classify_service(e));
    }
    if let Some(e) = err.downcast_ref::<StoreError>() {
        return Some(
            ClassifiedError::new(
                "Storage Error",
                e.to_string(),
                ErrorSeverity::Error,
                ErrorCategory::System,
            )
            .with_user_message("Saved servers could not be read or written.")
            .with_actions(["Check available disk space", FALLBACK_ACTION]),
        );
    }
    if let Some(e) = err.downcast_ref::<std::io::Error>() {
        return Some(classify_io(e));
    }
    if let Some(e) = err.downcast_ref::<serde_json::Error>() {
        return Some(
            ClassifiedError::new(
                "Invalid Data",
                e.to_string(),
                ErrorSeverity::Error,
                ErrorCategory::Data,
            )
            .with_user_message("Received data could not be understood."),
        );
    }
    if err.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
        return Some(
            ClassifiedError::new(
                "Operation Timed Out",
                err.to_string(),
                ErrorSeverity::Error,
                ErrorCategory::Network,
            )
            .with_user_message("The server took too long to respond.")
            .with_retryable(true),
        );
    }
    None
}

fn classify_transport(err: &TransportError) -> ClassifiedError {
    let message = err.to_string();
    let network = |title: &str, severity: ErrorSeverity| {
        ClassifiedError::new(title, message.clone(), severity, ErrorCategory::Network)
            .with_retryable(err.is_transient())
    };

    match err {
        TransportError::Timeout(_) => network("Connection Timed Out", ErrorSeverity::Error)
            .with_user_message("The server took too long to respond.")
            .with_actions(["Check that the server is running", FALLBACK_ACTION]),
        TransportError::HandshakeFailed(_) => network("Handshake Failed", ErrorSeverity::Error)
            .with_user_message("The server refused the connection.")
            .with_actions(["Check the server address and path", FALLBACK_ACTION]),
        TransportError::NotConnected => network("Not Connected", ErrorSeverity::Warning)
            .with_user_message("You are not connected to a server.")
            .with_actions(["Connect to a server"]),
        TransportError::ConnectionFailed(_) => network("Cannot Connect", ErrorSeverity::Error)
            .with_user_message("Could not reach the server.")
            .with_actions([
                "Check that the server is running",
                "Make sure both devices are on the same network",
                FALLBACK_ACTION,
            ]),
        TransportError::NetworkUnavailable(_) => {
            network("No Network Connection", ErrorSeverity::Critical)
                .with_user_message("You appear to be offline.")
                .with_actions(["Check your network connection", "Retry when back online"])
        }
        TransportError::ConnectionLost => network("Connection Lost", ErrorSeverity::Error)
            .with_user_message("The connection to the server was lost.")
            .with_actions(["Reconnect"]),
        TransportError::SendFailed(_) => network("Message Not Sent", ErrorSeverity::Error)
            .with_user_message("Your message could not be delivered.")
            .with_actions(["Resend the message"]),
        TransportError::Cancelled => network("Connection Cancelled", ErrorSeverity::Warning)
            .with_user_message("The connection attempt was cancelled."),
        TransportError::Unauthorized(_) => ClassifiedError::new(
            "Access Denied",
            message.clone(),
            ErrorSeverity::Error,
            ErrorCategory::Service,
        )
        .with_user_message("The server denied access.")
        .with_actions(["Pair with the server again"]),
        TransportError::NotFound(_) => ClassifiedError::new(
            "Endpoint Not Found",
            message.clone(),
            ErrorSeverity::Error,
            ErrorCategory::Service,
        )
        .with_user_message("The server has no agent endpoint at that address.")
        .with_actions(["Check the server path", "Pair with the server again"]),
        TransportError::Serialization(_) => ClassifiedError::new(
            "Invalid Message",
            message.clone(),
            ErrorSeverity::Warning,
            ErrorCategory::Data,
        )
        .with_user_message("A message from the server could not be read."),
        TransportError::NoProfile => ClassifiedError::new(
            "No Saved Server",
            message.clone(),
            ErrorSeverity::Warning,
            ErrorCategory::Ui,
        )
        .with_user_message("There is no saved server to connect to.")
        .with_actions(["Scan a pairing code"]),
    }
}

fn classify_decode(err: &DecodeError) -> ClassifiedError {
    let user = match err {
        DecodeError::Malformed(_) => "This pairing code is not valid.",
        DecodeError::MissingFields(_) => "This pairing code is incomplete.",
    };
    ClassifiedError::new(
        "Invalid Pairing Code",
        err.to_string(),
        ErrorSeverity::Error,
        ErrorCategory::Data,
    )
    .with_user_message(user)
    .with_actions([
        "Scan the pairing code again",
        "Generate a new pairing code on the server",
    ])
}

fn classify_service(err: &ServiceError) -> ClassifiedError {
    let message = err.to_string();
    match err {
        ServiceError::Unregistered(name) => ClassifiedError::new(
            "Unknown Service",
            message,
            ErrorSeverity::Warning,
            ErrorCategory::Service,
        )
        .with_service(name.clone()),
        ServiceError::Unavailable { service, .. } => ClassifiedError::new(
            "Service Unavailable",
            message,
            ErrorSeverity::Error,
            ErrorCategory::Service,
        )
        .with_service(service.clone())
        .with_user_message(format!("{service} is currently unavailable."))
        .with_actions(["Try again in a moment"])
        .with_retryable(true),
        ServiceError::Timeout { service, .. } => ClassifiedError::new(
            "Service Timed Out",
            message,
            ErrorSeverity::Error,
            ErrorCategory::Service,
        )
        .with_service(service.clone())
        .with_user_message(format!("{service} is not responding."))
        .with_actions(["Try again in a moment"])
        .with_retryable(true),
    }
}

fn classify_io(err: &std::io::Error) -> ClassifiedError {
    use std::io::ErrorKind;

    match crate::transport::map_connect_io_error(err) {
        transport @ TransportError::NetworkUnavailable(_) => classify_transport(&transport),
        transport => match err.kind() {
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
            | ErrorKind::AddrNotAvailable
            | ErrorKind::TimedOut
            | ErrorKind::UnexpectedEof => classify_transport(&transport),
            _ => ClassifiedError::new(
                "System Error",
                err.to_string(),
                ErrorSeverity::Error,
                ErrorCategory::System,
            )
            .with_user_message("A system operation failed."),
        },
    }
}
