//! In-process stand-in for the GitHub REST API.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use base64::Engine;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use release_dash::scm::{GithubAdapter, Retrier};

pub const TOKEN: &str = "test-token";

pub const CONFIG_A: &str = "name: Service A\nenvironment_tags:\n  - to-tag\n  - from-tag\n";
pub const CONFIG_B: &str = "environment_tags: [dev, prd]\n";

pub struct MockGithub {
    pub base_url: String,
    hits: Mutex<HashMap<String, u32>>,
    flaky_failures: AtomicU32,
    authorization: Mutex<Vec<String>>,
}

impl MockGithub {
    pub fn hits(&self, key: &str) -> u32 {
        self.hits.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    pub fn authorization_headers(&self) -> Vec<String> {
        self.authorization.lock().unwrap().clone()
    }

    fn record(&self, key: String, headers: &HeaderMap) {
        *self.hits.lock().unwrap().entry(key).or_insert(0) += 1;
        if let Some(value) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
            self.authorization.lock().unwrap().push(value.to_string());
        }
    }
}

/// Start the mock on an ephemeral port. `flaky_failures` is how many
/// rate-limited responses the `flaky` repository returns before succeeding.
pub async fn spawn_mock_github(flaky_failures: u32) -> Arc<MockGithub> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind to ephemeral port");
    let addr = listener.local_addr().expect("local addr");

    let mock = Arc::new(MockGithub {
        base_url: format!("http://{}/api-v3/", addr),
        hits: Mutex::new(HashMap::new()),
        flaky_failures: AtomicU32::new(flaky_failures),
        authorization: Mutex::new(Vec::new()),
    });

    let app = Router::new()
        .route("/api-v3/user/repos", get(list_repos))
        .route("/api-v3/repos/:owner/:repo/git/ref/*reference", get(get_ref))
        .route("/api-v3/repos/:owner/:repo/git/trees/:sha", get(get_tree))
        .route("/api-v3/repos/:owner/:repo/contents/*path", get(get_contents))
        .route("/api-v3/repos/:owner/:repo/compare/:spec", get(compare))
        .route("/api-v3/repos/:owner/:repo/commits", get(list_commits))
        .with_state(mock.clone());

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("mock github server");
    });

    mock
}

pub fn adapter(mock: &MockGithub, max_attempts: u32) -> GithubAdapter {
    adapter_with_shutdown(mock, max_attempts, CancellationToken::new())
}

pub fn adapter_with_shutdown(
    mock: &MockGithub,
    max_attempts: u32,
    shutdown: CancellationToken,
) -> GithubAdapter {
    let retrier = Retrier::new(
        max_attempts,
        Duration::from_millis(1),
        Duration::from_millis(5),
        shutdown,
    );
    GithubAdapter::new(&mock.base_url, TOKEN, Duration::from_secs(5), retrier)
        .expect("adapter")
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "message": "Not Found" }))).into_response()
}

fn repo_json(name: &str) -> Value {
    json!({
        "name": name,
        "html_url": format!("https://github.com/o/{}", name),
        "default_branch": "main",
        "owner": { "login": "o" },
    })
}

fn commit_json(sha: &str, message: &str, with_author: bool) -> Value {
    let author = if with_author {
        json!({ "login": "dev", "avatar_url": format!("https://avatars/{}", sha) })
    } else {
        Value::Null
    };
    json!({
        "sha": sha,
        "html_url": format!("https://github.com/o/commit/{}", sha),
        "commit": { "message": message },
        "author": author,
    })
}

fn with_links(body: Value, next: Option<String>, last: Option<String>) -> Response {
    let links: Vec<String> = [("next", next), ("last", last)]
        .into_iter()
        .filter_map(|(rel, url)| url.map(|url| format!("<{}>; rel=\"{}\"", url, rel)))
        .collect();
    if links.is_empty() {
        return Json(body).into_response();
    }
    ([("link", links.join(", "))], Json(body)).into_response()
}

async fn list_repos(
    State(mock): State<Arc<MockGithub>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let page = query.get("page").map(String::as_str).unwrap_or("1");
    mock.record(format!("list_repos:{}", page), &headers);
    assert_eq!(query.get("per_page").map(String::as_str), Some("100"));

    match page {
        "1" => with_links(
            json!([repo_json("b"), repo_json("c")]),
            Some(format!("{}user/repos?per_page=100&page=2", mock.base_url)),
            None,
        ),
        _ => with_links(json!([repo_json("a")]), None, None),
    }
}

async fn get_ref(
    State(mock): State<Arc<MockGithub>>,
    Path((_owner, repo, reference)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Response {
    let reference = reference.trim_start_matches('/').to_string();
    mock.record(format!("ref:{}:{}", repo, reference), &headers);

    if repo == "broken" {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "message": "Server Error" })),
        )
            .into_response();
    }

    if repo == "flaky" {
        let remaining = mock.flaky_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            mock.flaky_failures.store(remaining - 1, Ordering::SeqCst);
            return (
                StatusCode::FORBIDDEN,
                [("x-ratelimit-remaining", "0")],
                Json(json!({ "message": "API rate limit exceeded" })),
            )
                .into_response();
        }
    }

    let sha = match (repo.as_str(), reference.as_str()) {
        (_, "heads/main") => format!("{}-main-sha", repo),
        ("a", "tags/to-tag") => "to-sha".to_string(),
        ("a", "tags/from-tag") => "from-sha".to_string(),
        ("a", "tags/release/1.0") => "release-sha".to_string(),
        ("b", "tags/dev") => "b-dev-sha".to_string(),
        ("flaky", _) => "flaky-sha".to_string(),
        _ => return not_found(),
    };

    Json(json!({
        "ref": format!("refs/{}", reference),
        "object": { "sha": sha, "type": "commit" },
    }))
    .into_response()
}

async fn get_tree(
    State(mock): State<Arc<MockGithub>>,
    Path((_owner, repo, sha)): Path<(String, String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    mock.record(format!("tree:{}", repo), &headers);
    assert_eq!(query.get("recursive").map(String::as_str), Some("1"));

    if sha != format!("{}-main-sha", repo) {
        return not_found();
    }

    let mut tree = vec![
        json!({ "path": "README.md", "type": "blob" }),
        json!({ "path": "src", "type": "tree" }),
    ];
    if repo == "a" || repo == "b" {
        tree.push(json!({ "path": ".releasedash.yml", "type": "blob" }));
    }

    Json(json!({ "sha": sha, "tree": tree, "truncated": false })).into_response()
}

async fn get_contents(
    State(mock): State<Arc<MockGithub>>,
    Path((_owner, repo, path)): Path<(String, String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    mock.record(format!("contents:{}", repo), &headers);

    let path = path.trim_start_matches('/');
    let expected_ref = format!("{}-main-sha", repo);
    if path != ".releasedash.yml" || query.get("ref") != Some(&expected_ref) {
        return not_found();
    }

    let raw = match repo.as_str() {
        "a" => CONFIG_A,
        "b" => CONFIG_B,
        _ => return not_found(),
    };

    // GitHub wraps base64 content at 60 columns.
    let encoded = base64::engine::general_purpose::STANDARD.encode(raw);
    let wrapped: Vec<String> = encoded
        .as_bytes()
        .chunks(60)
        .map(|chunk| String::from_utf8_lossy(chunk).to_string())
        .collect();

    Json(json!({
        "type": "file",
        "encoding": "base64",
        "content": wrapped.join("\n"),
    }))
    .into_response()
}

async fn compare(
    State(mock): State<Arc<MockGithub>>,
    Path((_owner, repo, spec)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Response {
    mock.record(format!("compare:{}:{}", repo, spec), &headers);

    let commits = match (repo.as_str(), spec.as_str()) {
        ("a", "from-sha...to-sha") => json!([
            commit_json("c1", "Add feature\n\nDetails", true),
            commit_json("c2", "Fix bug", false),
        ]),
        ("b", "b-root...b-dev-sha") => json!([
            commit_json("b-mid", "Initial work", true),
            commit_json("b-dev-sha", "Ship it", true),
        ]),
        _ => return not_found(),
    };

    Json(json!({ "status": "ahead", "commits": commits })).into_response()
}

async fn list_commits(
    State(mock): State<Arc<MockGithub>>,
    Path((_owner, repo)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let page = query.get("page").map(String::as_str).unwrap_or("1");
    mock.record(format!("commits:{}:{}", repo, page), &headers);

    if repo == "empty" {
        return (
            StatusCode::CONFLICT,
            Json(json!({ "message": "Git Repository is empty." })),
        )
            .into_response();
    }

    let page_url = |sha: &str, page: u32| {
        Some(format!(
            "{}repos/o/{}/commits?sha={}&per_page=100&page={}",
            mock.base_url, repo, sha, page
        ))
    };

    match (repo.as_str(), query.get("sha").map(String::as_str), page) {
        ("b", Some("b-dev-sha"), "1") => with_links(
            json!([
                commit_json("b-dev-sha", "Ship it", true),
                commit_json("b-mid", "Initial work", true),
            ]),
            page_url("b-dev-sha", 2),
            page_url("b-dev-sha", 2),
        ),
        ("b", Some("b-dev-sha"), _) => {
            with_links(json!([commit_json("b-root", "Root", true)]), None, None)
        }
        // Three pages of history; only the first links to the last page.
        ("long", Some("long-head"), "1") => with_links(
            json!([commit_json("long-head", "Head", true)]),
            page_url("long-head", 2),
            page_url("long-head", 3),
        ),
        ("long", Some("long-head"), "2") => with_links(
            json!([commit_json("long-mid", "Middle", true)]),
            page_url("long-head", 3),
            page_url("long-head", 3),
        ),
        ("long", Some("long-head"), _) => with_links(
            json!([
                commit_json("long-older", "Older", true),
                commit_json("long-root", "Root", true),
            ]),
            None,
            None,
        ),
        _ => not_found(),
    }
}
