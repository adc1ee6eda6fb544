//! # Error Handling
//!
//! Unified error taxonomy for the sync pipeline. Every external call maps its
//! failure into [`SyncError`] so batch loops can decide between skipping,
//! counting a failure, and scheduling a retry.

use sea_orm::DbErr;
use serde_json::json;
use thiserror::Error;

use crate::models::external_source_link::SourceKind;

/// Errors raised while fetching, merging or persisting catalog data.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The source has no record for the requested id. Terminal.
    #[error("{origin} has no record for id {id}")]
    NotFound { origin: SourceKind, id: String },

    /// Transport failure, timeout, non-2xx status or undecodable body. Retryable.
    #[error("{origin} request failed: {message}")]
    Upstream {
        origin: SourceKind,
        status: Option<u16>,
        message: String,
    },

    /// The source asked us to slow down. Retryable with a longer backoff.
    #[error("{origin} rate limited the request")]
    RateLimited {
        origin: SourceKind,
        retry_after_secs: Option<u64>,
    },

    /// Malformed input detected before any network call. Terminal.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(#[from] DbErr),
}

impl SyncError {
    pub fn upstream<S: Into<String>>(origin: SourceKind, message: S) -> Self {
        Self::Upstream {
            origin,
            status: None,
            message: message.into(),
        }
    }

    pub fn not_found<S: ToString>(origin: SourceKind, id: S) -> Self {
        Self::NotFound {
            origin,
            id: id.to_string(),
        }
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation(message.into())
    }

    /// Source that produced the error, if any.
    pub fn origin(&self) -> Option<SourceKind> {
        match self {
            Self::NotFound { origin, .. }
            | Self::Upstream { origin, .. }
            | Self::RateLimited { origin, .. } => Some(*origin),
            Self::Validation(_) | Self::Database(_) => None,
        }
    }

    /// Whether a later attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Upstream { .. } | Self::RateLimited { .. } | Self::Database(_)
        )
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }

    /// Short stable label used for metrics and persisted error details.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Upstream { .. } => "upstream",
            Self::RateLimited { .. } => "rate_limited",
            Self::Validation(_) => "validation",
            Self::Database(_) => "database",
        }
    }

    /// Structured representation stored alongside failed jobs.
    pub fn to_details(&self) -> serde_json::Value {
        let mut details = json!({
            "type": self.kind_label(),
            "message": self.to_string(),
        });
        if let Some(origin) = self.origin() {
            details["source"] = json!(origin.as_str());
        }
        if let Self::Upstream {
            status: Some(status),
            ..
        } = self
        {
            details["status"] = json!(status);
        }
        if let Some(retry_after) = self.retry_after_secs() {
            details["retry_after_secs"] = json!(retry_after);
        }
        details
    }
}

/// Returns true when the database rejected a write because of a unique index.
pub fn is_unique_violation(error: &DbErr) -> bool {
    use sea_orm::RuntimeErr;

    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    let runtime_err = match error {
        DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    db_error
        .code()
        .is_some_and(|code| code == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code.as_ref()))
}
