//! Repository discovery and changelog refresh cycles.
//!
//! Two independent cycles publish into the [`Cache`]:
//!
//! - discovery lists every repository, keeps the ones with a dashboard
//!   config and publishes them sorted by name under [`DASHBOARD_REPOS_KEY`];
//! - the changelog cycle reads that published set and publishes one
//!   [`RepoChangelog`] per repository under [`DASHBOARD_CHANGELOGS_KEY`].
//!
//! Each cycle holds its own lock for the duration of a run, so a slow run
//! never overlaps the next tick of the same cycle.

pub mod changelog;
pub mod repo_config;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::{Cache, CachedValue, Expiration, DASHBOARD_CHANGELOGS_KEY, DASHBOARD_REPOS_KEY};
use crate::models::{DashboardRepo, RepoChangelog};
use crate::scm::{ScmAdapter, ScmError};

pub use changelog::ChangelogComputer;
pub use repo_config::{RepoConfigResolver, DEFAULT_CONFIG_PATH};

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error(transparent)]
    Scm(#[from] ScmError),

    #[error("invalid dashboard config in {owner}/{repo}: {source}")]
    InvalidRepoConfig {
        owner: String,
        repo: String,
        #[source]
        source: serde_yaml::Error,
    },
}

impl DashboardError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DashboardError::Scm(err) if err.is_cancelled())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshKind {
    Repos,
    Changelogs,
}

impl fmt::Display for RefreshKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshKind::Repos => f.write_str("repos"),
            RefreshKind::Changelogs => f.write_str("changelogs"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new value was published holding this many items.
    Published(usize),
    /// Nothing to do yet; the previous value (if any) is untouched.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct DashboardOptions {
    /// Whose repositories to list; empty means the authenticated user.
    pub user: String,
    pub config_path: String,
}

impl Default for DashboardOptions {
    fn default() -> Self {
        Self {
            user: String::new(),
            config_path: DEFAULT_CONFIG_PATH.to_string(),
        }
    }
}

pub struct Dashboard {
    scm: Arc<dyn ScmAdapter>,
    cache: Arc<dyn Cache>,
    resolver: RepoConfigResolver,
    changelogs: ChangelogComputer,
    user: String,
    shutdown: CancellationToken,
    repos_lock: Mutex<()>,
    changelogs_lock: Mutex<()>,
}

impl Dashboard {
    pub fn new(
        scm: Arc<dyn ScmAdapter>,
        cache: Arc<dyn Cache>,
        options: DashboardOptions,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            resolver: RepoConfigResolver::new(scm.clone(), options.config_path),
            changelogs: ChangelogComputer::new(scm.clone()),
            scm,
            cache,
            user: options.user,
            shutdown,
            repos_lock: Mutex::new(()),
            changelogs_lock: Mutex::new(()),
        }
    }

    /// List every repository and keep the configured ones, sorted by name.
    ///
    /// Fails only when the listing itself fails or the run is cancelled;
    /// per-repository problems are logged and the repository left out.
    pub async fn discover_repos(&self) -> Result<Vec<DashboardRepo>, DashboardError> {
        let repositories = self.scm.list_repositories(&self.user).await?;
        tracing::debug!(count = repositories.len(), "Listed repositories");

        let mut dashboard_repos = Vec::new();
        for repository in repositories {
            if self.shutdown.is_cancelled() {
                return Err(ScmError::Cancelled.into());
            }

            let resolved = self
                .resolver
                .resolve(
                    &repository.owner_name,
                    &repository.name,
                    &repository.default_branch,
                )
                .await;

            match resolved {
                Ok(Some(config)) => dashboard_repos.push(DashboardRepo { repository, config }),
                Ok(None) => {}
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err @ DashboardError::InvalidRepoConfig { .. }) => {
                    tracing::error!(
                        repo = %repository.full_name(),
                        config_path = self.resolver.config_path(),
                        error = %err,
                        "Malformed dashboard config, skipping repository"
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        repo = %repository.full_name(),
                        error = %err,
                        "Could not resolve dashboard config, skipping repository"
                    );
                }
            }
        }

        dashboard_repos.sort_by(|a, b| a.repository.name.cmp(&b.repository.name));
        Ok(dashboard_repos)
    }

    pub async fn compute_changelogs(&self, repos: &[DashboardRepo]) -> Vec<RepoChangelog> {
        let mut changelogs = Vec::with_capacity(repos.len());

        for dashboard_repo in repos {
            if self.shutdown.is_cancelled() {
                break;
            }

            let repository = &dashboard_repo.repository;
            let entries = self
                .changelogs
                .compute(
                    &repository.owner_name,
                    &repository.name,
                    &dashboard_repo.config.environment_refs,
                    dashboard_repo.config.ref_kind,
                )
                .await;

            changelogs.push(RepoChangelog {
                repository: repository.clone(),
                display_name: dashboard_repo.display_name().to_string(),
                entries,
            });
        }

        changelogs
    }

    /// Run one discovery cycle and publish the result.
    pub async fn refresh_repos(&self) -> Result<RefreshOutcome, DashboardError> {
        let _guard = self.repos_lock.lock().await;
        tracing::info!("Dashboard repos fetching");

        let repos = self.discover_repos().await?;
        let count = repos.len();
        self.cache.set(
            DASHBOARD_REPOS_KEY,
            CachedValue::Repos(Arc::new(repos)),
            Expiration::Never,
        );

        tracing::info!(count, "Dashboard repos refreshed");
        Ok(RefreshOutcome::Published(count))
    }

    /// Run one changelog cycle over the last published repository set.
    pub async fn refresh_changelogs(&self) -> RefreshOutcome {
        let _guard = self.changelogs_lock.lock().await;

        let Some(repos) = self.cached_repos() else {
            tracing::info!("No dashboard repos published yet, skipping changelog refresh");
            return RefreshOutcome::Skipped;
        };

        tracing::info!(repos = repos.len(), "Dashboard changelogs fetching");
        let changelogs = self.compute_changelogs(&repos).await;
        if self.shutdown.is_cancelled() {
            return RefreshOutcome::Skipped;
        }

        let count = changelogs.len();
        self.cache.set(
            DASHBOARD_CHANGELOGS_KEY,
            CachedValue::Changelogs(Arc::new(changelogs)),
            Expiration::Never,
        );

        tracing::info!(count, "Dashboard changelogs refreshed");
        RefreshOutcome::Published(count)
    }

    pub fn cached_repos(&self) -> Option<Arc<Vec<DashboardRepo>>> {
        match self.cache.get(DASHBOARD_REPOS_KEY)? {
            CachedValue::Repos(repos) => Some(repos),
            _ => None,
        }
    }

    pub fn cached_changelogs(&self) -> Option<Arc<Vec<RepoChangelog>>> {
        match self.cache.get(DASHBOARD_CHANGELOGS_KEY)? {
            CachedValue::Changelogs(changelogs) => Some(changelogs),
            _ => None,
        }
    }

    /// Run the given cycle every `period` until shutdown. The first run
    /// starts immediately.
    pub fn spawn_refresh_loop(self: &Arc<Self>, kind: RefreshKind, period: Duration) -> JoinHandle<()> {
        let dashboard = Arc::clone(self);
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match kind {
                    RefreshKind::Repos => {
                        if let Err(err) = dashboard.refresh_repos().await {
                            if !err.is_cancelled() {
                                tracing::error!(error = %err, "Dashboard repos refresh failed");
                            }
                        }
                    }
                    RefreshKind::Changelogs => {
                        dashboard.refresh_changelogs().await;
                    }
                }
            }

            tracing::info!(%kind, "Refresh loop stopped");
        })
    }
}
