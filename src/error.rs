use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use thiserror::Error;

use crate::approval::ApprovalError;

#[derive(Error, Debug)]
pub enum ClosingError {
    #[error("{message}")]
    Validation { message: String, details: Value },

    #[error("{message}")]
    NotFound { message: String, details: Value },

    #[error("{message}")]
    NoContractResolved { message: String, details: Value },

    #[error("{message}")]
    ContractExpired { message: String, details: Value },

    #[error("{message}")]
    SelfemployedNoReceipt { message: String, details: Value },

    #[error("{message}")]
    UniqueViolation { message: String, details: Value },

    #[error(transparent)]
    Approval(#[from] ApprovalError),

    #[error("Failed to render document: {0}")]
    Render(String),

    #[error("Config directory not found at {0}. Run 'closing init' to create it.")]
    ConfigNotFound(PathBuf),

    #[error("Config directory already exists at {0}")]
    AlreadyInitialized(PathBuf),

    #[error("Failed to parse {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to read store {path}: {source}")]
    StateParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Typst not found. Install it from https://typst.app/ or set output.format to \"typst\"")]
    TypstNotFound,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wire shape of an error: `{code, message, details}`.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub code: &'static str,
    pub message: String,
    pub details: Value,
}

impl ClosingError {
    pub fn validation(message: impl Into<String>, details: Value) -> Self {
        Self::Validation {
            message: message.into(),
            details,
        }
    }

    pub fn not_found(message: impl Into<String>, details: Value) -> Self {
        Self::NotFound {
            message: message.into(),
            details,
        }
    }

    pub fn no_contract(message: impl Into<String>, details: Value) -> Self {
        Self::NoContractResolved {
            message: message.into(),
            details,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } | Self::Approval(_) => "validation_failed",
            Self::NotFound { .. } => "not_found",
            Self::NoContractResolved { .. } => "no_contract_resolved",
            Self::ContractExpired { .. } => "contract_expired",
            Self::SelfemployedNoReceipt { .. } => "selfemployed_no_receipt",
            Self::UniqueViolation { .. } => "unique_violation",
            Self::Render(_) | Self::TypstNotFound => "render_failed",
            Self::ConfigNotFound(_)
            | Self::AlreadyInitialized(_)
            | Self::ConfigParse { .. }
            | Self::StateParse { .. }
            | Self::Io(_) => "io_error",
        }
    }

    pub fn details(&self) -> Value {
        match self {
            Self::Validation { details, .. }
            | Self::NotFound { details, .. }
            | Self::NoContractResolved { details, .. }
            | Self::ContractExpired { details, .. }
            | Self::SelfemployedNoReceipt { details, .. }
            | Self::UniqueViolation { details, .. } => details.clone(),
            Self::Approval(err) => err.details(),
            Self::ConfigParse { path, .. } | Self::StateParse { path, .. } => {
                json!({ "path": path.display().to_string() })
            }
            _ => Value::Null,
        }
    }

    pub fn payload(&self) -> ErrorPayload {
        ErrorPayload {
            code: self.code(),
            message: self.to_string(),
            details: self.details(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClosingError>;
