//! Typed errors for resource resolution and cache lookups.

use crate::{PartialResourceId, ResourceId};

/// Errors surfaced by the locator, the watch cache and the query gateway.
#[derive(Debug, thiserror::Error)]
pub enum GlintError {
    #[error("invalid resource token {token:?}: {reason}")]
    TokenParse { token: String, reason: String },
    #[error("unknown resource {0:?}")]
    ResourceNotFound(String),
    #[error("resource {0} is not tracked")]
    KindNotTracked(ResourceId),
    #[error("object {0} not found")]
    ObjectNotFound(String),
    #[error("index lookup failed: {0}")]
    UpstreamIndex(String),
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("resolving {token:?}: {source}")]
    Resolve {
        token: String,
        #[source]
        source: anyhow::Error,
    },
}

pub type GlintResult<T> = Result<T, GlintError>;

impl GlintError {
    pub(crate) fn token(token: &str, reason: impl Into<String>) -> Self {
        Self::TokenParse { token: token.to_string(), reason: reason.into() }
    }

    pub fn invalid_path(path: &str, reason: impl Into<String>) -> Self {
        Self::InvalidPath { path: path.to_string(), reason: reason.into() }
    }

    /// True for errors caused by the caller's input rather than server state.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::UpstreamIndex(_))
    }
}

/// Failure reported by a metadata resolver.
#[derive(Debug, thiserror::Error)]
pub enum MapperError {
    /// The cluster exposes no resource matching the guess.
    #[error("no matches for {0}")]
    NoMatch(PartialResourceId),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
