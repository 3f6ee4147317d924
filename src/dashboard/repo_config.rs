use std::sync::Arc;

use super::DashboardError;
use crate::models::{RefKind, RepoConfig};
use crate::scm::ScmAdapter;

pub const DEFAULT_CONFIG_PATH: &str = ".releasedash.yml";

/// Locates and parses a repository's dashboard config at its default branch.
pub struct RepoConfigResolver {
    scm: Arc<dyn ScmAdapter>,
    config_path: String,
}

impl RepoConfigResolver {
    pub fn new(scm: Arc<dyn ScmAdapter>, config_path: impl Into<String>) -> Self {
        Self {
            scm,
            config_path: config_path.into(),
        }
    }

    pub fn config_path(&self) -> &str {
        &self.config_path
    }

    /// `Ok(None)` when the repository does not take part in the dashboard.
    pub async fn resolve(
        &self,
        owner: &str,
        repo: &str,
        default_branch: &str,
    ) -> Result<Option<RepoConfig>, DashboardError> {
        let Some(branch) = self
            .scm
            .resolve_ref(owner, repo, default_branch, RefKind::Branches)
            .await?
        else {
            tracing::debug!(owner, repo, branch = default_branch, "Default branch not found");
            return Ok(None);
        };

        let Some(raw) = self
            .scm
            .get_file_at_commit(owner, repo, &branch.current_hash, &self.config_path)
            .await?
        else {
            return Ok(None);
        };

        let config = parse_repo_config(&raw).map_err(|source| DashboardError::InvalidRepoConfig {
            owner: owner.to_string(),
            repo: repo.to_string(),
            source,
        })?;

        if config.environment_refs.is_empty() {
            tracing::debug!(owner, repo, "Config lists no environment refs");
            return Ok(None);
        }

        Ok(Some(config))
    }
}

/// Parse config file content; a blank file yields the defaults.
pub fn parse_repo_config(raw: &[u8]) -> Result<RepoConfig, serde_yaml::Error> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(RepoConfig::default());
    }
    serde_yaml::from_slice(raw)
}
