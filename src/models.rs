use std::fmt;

use serde::{Deserialize, Serialize};

/// A repository as returned by the discovery listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub owner_name: String,
    pub name: String,
    pub default_branch: String,
    pub html_url: String,
}

impl Repository {
    /// `owner/name`, used in log lines.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner_name, self.name)
    }
}

/// Which namespace the environment references live in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefKind {
    #[default]
    #[serde(alias = "tag")]
    Tags,
    #[serde(alias = "branch", alias = "heads")]
    Branches,
}

impl RefKind {
    /// Path segment under `refs/` for this kind.
    pub fn namespace(self) -> &'static str {
        match self {
            RefKind::Tags => "tags",
            RefKind::Branches => "heads",
        }
    }
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefKind::Tags => f.write_str("tag"),
            RefKind::Branches => f.write_str("branch"),
        }
    }
}

/// A tag or branch resolved to a commit at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ref {
    pub name: String,
    pub current_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub hash: String,
    pub author_avatar_url: String,
    pub message: String,
    pub html_url: String,
}

impl Commit {
    pub fn title(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }
}

/// Parsed contents of a repository's dashboard config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    #[serde(default)]
    pub name: String,
    /// Ordered newest first: index 0 is compared against index 1, and so on.
    #[serde(default, rename = "environment_refs", alias = "environment_tags")]
    pub environment_refs: Vec<String>,
    #[serde(default, rename = "ref_type", alias = "ref_kind")]
    pub ref_kind: RefKind,
}

/// A repository that opted into the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardRepo {
    pub repository: Repository,
    pub config: RepoConfig,
}

impl DashboardRepo {
    pub fn display_name(&self) -> &str {
        if self.config.name.is_empty() {
            &self.repository.name
        } else {
            &self.config.name
        }
    }
}

/// Commits present in `to_ref` but not in `from_ref`, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangelogEntry {
    pub from_ref: String,
    pub to_ref: String,
    pub commits: Vec<Commit>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoChangelog {
    pub repository: Repository,
    pub display_name: String,
    pub entries: Vec<ChangelogEntry>,
}
