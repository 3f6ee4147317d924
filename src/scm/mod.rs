//! Source-control hosting abstraction.
//!
//! The rest of the crate talks to [`ScmAdapter`] only. Lookups that have a
//! defined meaning for "does not exist" return `Ok(None)`; everything else
//! that goes wrong upstream is an [`ScmError`].

pub mod github;
pub mod retry;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Commit, Ref, RefKind, Repository};

pub use github::GithubAdapter;
pub use retry::Retrier;

#[derive(Debug, Error)]
pub enum ScmError {
    #[error("rate limited by hosting API (HTTP {status}): {message}")]
    RateLimited { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("hosting API returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("malformed response from hosting API: {0}")]
    Decode(String),

    #[error("invalid hosting API URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("operation cancelled")]
    Cancelled,
}

impl ScmError {
    /// Whether the retrier should try again after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, ScmError::RateLimited { .. } | ScmError::Transport(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ScmError::Cancelled)
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ScmError::RateLimited { status, .. } | ScmError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type ScmResult<T> = Result<T, ScmError>;

/// Read-only view of a hosting provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScmAdapter: Send + Sync {
    /// All repositories visible to `user` (empty = the authenticated user).
    async fn list_repositories(&self, user: &str) -> ScmResult<Vec<Repository>>;

    /// Resolve a tag or branch by name; `None` when it does not exist.
    async fn resolve_ref(
        &self,
        owner: &str,
        repo: &str,
        name: &str,
        kind: RefKind,
    ) -> ScmResult<Option<Ref>>;

    /// Raw file content at `commit_hash`; `None` when the path is absent.
    async fn get_file_at_commit(
        &self,
        owner: &str,
        repo: &str,
        commit_hash: &str,
        path: &str,
    ) -> ScmResult<Option<Vec<u8>>>;

    /// Commits reachable from `to_hash` but not from `from_hash`, oldest first.
    async fn compare_commits(
        &self,
        owner: &str,
        repo: &str,
        from_hash: &str,
        to_hash: &str,
    ) -> ScmResult<Vec<Commit>>;

    /// Every commit reachable from `hash`, newest first.
    async fn list_commits_reachable_from(
        &self,
        owner: &str,
        repo: &str,
        hash: &str,
    ) -> ScmResult<Vec<Commit>>;

    /// The root end of the history reachable from `hash`, i.e. the last
    /// element of [`list_commits_reachable_from`](Self::list_commits_reachable_from)
    /// without walking every page. `None` for an empty repository.
    async fn oldest_commit_reachable_from(
        &self,
        owner: &str,
        repo: &str,
        hash: &str,
    ) -> ScmResult<Option<Commit>>;
}
