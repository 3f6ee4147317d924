use std::sync::Arc;

use crate::models::{ChangelogEntry, RefKind};
use crate::scm::{ScmAdapter, ScmResult};

/// Computes the commit delta between adjacent environment refs.
pub struct ChangelogComputer {
    scm: Arc<dyn ScmAdapter>,
}

impl ChangelogComputer {
    pub fn new(scm: Arc<dyn ScmAdapter>) -> Self {
        Self { scm }
    }

    /// One entry per adjacent pair `(refs[i], refs[i + 1])`, newest first.
    ///
    /// Never fails as a whole: a pair whose refs cannot be resolved or
    /// compared is logged and left out.
    pub async fn compute(
        &self,
        owner: &str,
        repo: &str,
        refs: &[String],
        kind: RefKind,
    ) -> Vec<ChangelogEntry> {
        let mut entries = Vec::new();

        for pair in refs.windows(2) {
            let (to_ref, from_ref) = (&pair[0], &pair[1]);
            match self.compute_pair(owner, repo, from_ref, to_ref, kind).await {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                Err(err) if err.is_cancelled() => {
                    tracing::debug!(owner, repo, "Changelog computation cancelled");
                    break;
                }
                Err(err) => {
                    tracing::warn!(
                        owner,
                        repo,
                        from = %from_ref,
                        to = %to_ref,
                        error = %err,
                        "Could not compute changelog, skipping pair"
                    );
                }
            }
        }

        entries
    }

    async fn compute_pair(
        &self,
        owner: &str,
        repo: &str,
        from_ref: &str,
        to_ref: &str,
        kind: RefKind,
    ) -> ScmResult<Option<ChangelogEntry>> {
        let Some(to) = self.scm.resolve_ref(owner, repo, to_ref, kind).await? else {
            tracing::debug!(owner, repo, to = to_ref, "Environment has never been deployed");
            return Ok(None);
        };

        let from_hash = match self.scm.resolve_ref(owner, repo, from_ref, kind).await? {
            Some(from) => from.current_hash,
            None => {
                // Compare from the start of history instead.
                let oldest = self
                    .scm
                    .oldest_commit_reachable_from(owner, repo, &to.current_hash)
                    .await?;
                match oldest {
                    Some(oldest) => oldest.hash,
                    None => {
                        tracing::debug!(owner, repo, "Repository has no commits");
                        return Ok(None);
                    }
                }
            }
        };

        let commits = self
            .scm
            .compare_commits(owner, repo, &from_hash, &to.current_hash)
            .await?;

        Ok(Some(ChangelogEntry {
            from_ref: from_ref.to_string(),
            to_ref: to_ref.to_string(),
            commits,
        }))
    }
}
