use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, Response, StatusCode};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use super::{Retrier, ScmAdapter, ScmError, ScmResult};
use crate::models::{Commit, Ref, RefKind, Repository};

const PAGE_SIZE: &str = "100";
const API_VERSION: &str = "2022-11-28";

static LINK_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<([^>]+)>\s*;\s*rel="([^"]+)""#).expect("link header regex is valid")
});

/// [`ScmAdapter`] backed by the GitHub REST API (v3).
pub struct GithubAdapter {
    http: Client,
    base_url: Url,
    token: Option<String>,
    retrier: Retrier,
}

impl GithubAdapter {
    pub fn new(
        base_url: &str,
        token: &str,
        request_timeout: Duration,
        retrier: Retrier,
    ) -> ScmResult<Self> {
        let base_url = Url::parse(base_url.trim())?;
        if base_url.cannot_be_a_base() {
            return Err(url::ParseError::RelativeUrlWithCannotBeABaseBase.into());
        }

        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(ScmError::Transport)?;

        let token = Some(token.trim())
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        Ok(Self {
            http,
            base_url,
            token,
            retrier,
        })
    }

    /// Append `segments` to the base URL. Each segment is percent-encoded,
    /// so `#`, `%` and `?` in ref names or paths stay part of the path.
    fn endpoint<'a, I>(&self, segments: I) -> ScmResult<Url>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn commits_url(&self, owner: &str, repo: &str, hash: &str) -> ScmResult<Url> {
        let mut url = self.endpoint(["repos", owner, repo, "commits"])?;
        url.query_pairs_mut()
            .append_pair("sha", hash)
            .append_pair("per_page", PAGE_SIZE);
        Ok(url)
    }

    async fn send(&self, url: Url) -> ScmResult<Response> {
        let mut request = self
            .http
            .get(url)
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, "release-dash")
            .header("X-GitHub-Api-Version", API_VERSION);

        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = request.send().await.map_err(ScmError::Transport)?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status, &headers, &body))
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> ScmResult<T> {
        let bytes = response.bytes().await.map_err(ScmError::Transport)?;
        serde_json::from_slice(&bytes).map_err(|e| ScmError::Decode(e.to_string()))
    }

    async fn get_json<T: DeserializeOwned>(&self, operation: &str, url: Url) -> ScmResult<T> {
        self.retrier
            .run(operation, || {
                let url = url.clone();
                async move {
                    let response = self.send(url).await?;
                    Self::decode(response).await
                }
            })
            .await
    }

    /// Like [`get_json`](Self::get_json) but maps "does not exist" to `None`.
    async fn get_optional_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        url: Url,
    ) -> ScmResult<Option<T>> {
        match self.get_json(operation, url).await {
            Ok(value) => Ok(Some(value)),
            Err(err) if is_absent(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn get_page<T: DeserializeOwned>(&self, operation: &str, url: Url) -> ScmResult<Page<T>> {
        self.retrier
            .run(operation, || {
                let url = url.clone();
                async move {
                    let response = self.send(url).await?;
                    let next = link_url(response.headers(), "next");
                    let last = link_url(response.headers(), "last");
                    let items: Vec<T> = Self::decode(response).await?;
                    Ok::<_, ScmError>(Page { items, next, last })
                }
            })
            .await
    }

    /// Follows `Link: rel="next"` until the listing is exhausted.
    async fn get_paginated<T: DeserializeOwned>(
        &self,
        operation: &str,
        first_page: Url,
    ) -> ScmResult<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(first_page);
        let mut page = 0;

        while let Some(url) = next.take() {
            page += 1;
            let batch = self.get_page::<T>(operation, url).await?;
            tracing::debug!(operation, page, count = batch.items.len(), "Fetched page");
            items.extend(batch.items);
            next = batch.next;
        }

        Ok(items)
    }

    async fn fetch_content(
        &self,
        owner: &str,
        repo: &str,
        commit_hash: &str,
        path: &str,
    ) -> ScmResult<Option<Vec<u8>>> {
        let segments = ["repos", owner, repo, "contents"]
            .into_iter()
            .chain(path.split('/'));
        let mut url = self.endpoint(segments)?;
        url.query_pairs_mut().append_pair("ref", commit_hash);

        let Some(content) = self
            .get_optional_json::<ApiContent>("get_contents", url)
            .await?
        else {
            return Ok(None);
        };

        if content.encoding != "base64" {
            return Err(ScmError::Decode(format!(
                "unsupported content encoding '{}' for {}",
                content.encoding, path
            )));
        }

        let packed: String = content
            .content
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let raw = base64::engine::general_purpose::STANDARD
            .decode(packed)
            .map_err(|e| ScmError::Decode(format!("could not decode {}: {}", path, e)))?;

        Ok(Some(raw))
    }
}

#[async_trait]
impl ScmAdapter for GithubAdapter {
    async fn list_repositories(&self, user: &str) -> ScmResult<Vec<Repository>> {
        let mut url = if user.is_empty() {
            self.endpoint(["user", "repos"])?
        } else {
            self.endpoint(["users", user, "repos"])?
        };
        url.query_pairs_mut().append_pair("per_page", PAGE_SIZE);

        let repos: Vec<ApiRepository> = self.get_paginated("list_repositories", url).await?;

        Ok(repos
            .into_iter()
            .map(|repo| Repository {
                owner_name: repo.owner.login,
                name: repo.name,
                default_branch: repo.default_branch.unwrap_or_else(|| "main".to_string()),
                html_url: repo.html_url,
            })
            .collect())
    }

    async fn resolve_ref(
        &self,
        owner: &str,
        repo: &str,
        name: &str,
        kind: RefKind,
    ) -> ScmResult<Option<Ref>> {
        // Ref names may contain '/', which GitHub expects unescaped.
        let segments = ["repos", owner, repo, "git", "ref", kind.namespace()]
            .into_iter()
            .chain(name.split('/'));
        let url = self.endpoint(segments)?;

        let found: Option<ApiRef> = self.get_optional_json("resolve_ref", url).await?;
        if found.is_none() {
            tracing::debug!(owner, repo, name, kind = %kind, "Ref does not exist");
        }

        Ok(found.map(|r| Ref {
            name: name.to_string(),
            current_hash: r.object.sha,
        }))
    }

    async fn get_file_at_commit(
        &self,
        owner: &str,
        repo: &str,
        commit_hash: &str,
        path: &str,
    ) -> ScmResult<Option<Vec<u8>>> {
        let mut url = self.endpoint(["repos", owner, repo, "git", "trees", commit_hash])?;
        url.query_pairs_mut().append_pair("recursive", "1");

        let Some(tree) = self.get_optional_json::<ApiTree>("get_tree", url).await? else {
            return Ok(None);
        };

        let listed = tree
            .tree
            .iter()
            .any(|entry| entry.path == path && entry.kind == "blob");

        // A truncated tree may simply not list the file; ask for it directly.
        if !listed && !tree.truncated {
            tracing::debug!(owner, repo, path, "File not present in tree");
            return Ok(None);
        }

        self.fetch_content(owner, repo, commit_hash, path).await
    }

    async fn compare_commits(
        &self,
        owner: &str,
        repo: &str,
        from_hash: &str,
        to_hash: &str,
    ) -> ScmResult<Vec<Commit>> {
        let range = format!("{}...{}", from_hash, to_hash);
        let url = self.endpoint(["repos", owner, repo, "compare", range.as_str()])?;

        let comparison: ApiComparison = self.get_json("compare_commits", url).await?;
        Ok(comparison.commits.into_iter().map(Commit::from).collect())
    }

    async fn list_commits_reachable_from(
        &self,
        owner: &str,
        repo: &str,
        hash: &str,
    ) -> ScmResult<Vec<Commit>> {
        let url = self.commits_url(owner, repo, hash)?;

        match self.get_paginated::<ApiCommit>("list_commits", url).await {
            Ok(commits) => Ok(commits.into_iter().map(Commit::from).collect()),
            Err(err) if is_absent(&err) => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    async fn oldest_commit_reachable_from(
        &self,
        owner: &str,
        repo: &str,
        hash: &str,
    ) -> ScmResult<Option<Commit>> {
        let url = self.commits_url(owner, repo, hash)?;

        let mut page = match self.get_page::<ApiCommit>("oldest_commit", url).await {
            Ok(page) => page,
            Err(err) if is_absent(&err) => return Ok(None),
            Err(err) => return Err(err),
        };

        if let Some(last) = page.last.take() {
            page = self.get_page("oldest_commit", last).await?;
        }
        // Without a `last` relation, walk forward.
        while let Some(next) = page.next.take() {
            page = self.get_page("oldest_commit", next).await?;
        }

        Ok(page.items.pop().map(Commit::from))
    }
}

/// 404 is a missing object; 409 is GitHub's answer for an empty repository.
fn is_absent(err: &ScmError) -> bool {
    matches!(err.status(), Some(404) | Some(409))
}

fn classify_failure(status: StatusCode, headers: &HeaderMap, body: &str) -> ScmError {
    let message = serde_json::from_str::<ApiMessage>(body)
        .map(|m| m.message)
        .unwrap_or_else(|_| body.trim().to_string());

    let quota_exhausted = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim() == "0")
        .unwrap_or(false);
    let mentions_limit = message.to_lowercase().contains("rate limit");

    let rate_limited = status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN && (quota_exhausted || mentions_limit));

    if rate_limited {
        ScmError::RateLimited {
            status: status.as_u16(),
            message,
        }
    } else {
        ScmError::Api {
            status: status.as_u16(),
            message,
        }
    }
}

/// URL of the `rel` relation in a `Link` header, if present.
fn link_url(headers: &HeaderMap, rel: &str) -> Option<Url> {
    let link = headers.get("link")?.to_str().ok()?;
    LINK_REGEX
        .captures_iter(link)
        .find(|captures| &captures[2] == rel)
        .and_then(|captures| Url::parse(&captures[1]).ok())
}

struct Page<T> {
    items: Vec<T>,
    next: Option<Url>,
    last: Option<Url>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ApiOwner {
    login: String,
}

#[derive(Debug, Deserialize)]
struct ApiRepository {
    name: String,
    html_url: String,
    default_branch: Option<String>,
    owner: ApiOwner,
}

#[derive(Debug, Deserialize)]
struct ApiObject {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct ApiRef {
    object: ApiObject,
}

#[derive(Debug, Deserialize)]
struct ApiTreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct ApiTree {
    tree: Vec<ApiTreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct ApiContent {
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: String,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    avatar_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiCommitDetail {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ApiCommit {
    sha: String,
    html_url: String,
    commit: ApiCommitDetail,
    author: Option<ApiUser>,
}

impl From<ApiCommit> for Commit {
    fn from(commit: ApiCommit) -> Self {
        Commit {
            hash: commit.sha,
            author_avatar_url: commit.author.map(|a| a.avatar_url).unwrap_or_default(),
            message: commit.commit.message,
            html_url: commit.html_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiComparison {
    commits: Vec<ApiCommit>,
}
