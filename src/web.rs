//! HTTP surface. Handlers only ever read what the refresh loops published.

use std::fmt::Write;
use std::sync::Arc;

use axum::{extract::State, response::Html, response::IntoResponse, routing::get, Json, Router};
use tower_http::trace::TraceLayer;

use crate::dashboard::Dashboard;
use crate::models::{ChangelogEntry, RepoChangelog};

#[derive(Clone)]
pub struct AppState {
    pub dashboard: Arc<Dashboard>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(homepage))
        .route("/healthcheck", get(healthcheck))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn homepage(State(state): State<AppState>) -> Html<String> {
    match state.dashboard.cached_changelogs() {
        Some(changelogs) => Html(render_dashboard(&changelogs)),
        None => Html(render_loading()),
    }
}

async fn healthcheck() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "OK", "errors": [] }))
}

const PAGE_HEAD: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
"#;

const PAGE_STYLE: &str = r#"<style>
body { font-family: sans-serif; margin: 2rem; background: #f6f8fa; color: #24292f; }
section.repo { background: #fff; border: 1px solid #d0d7de; border-radius: 6px; padding: 1rem; margin-bottom: 1rem; }
h2 a { color: inherit; }
ul.commits { list-style: none; padding-left: 0; }
ul.commits li { display: flex; align-items: center; gap: 0.5rem; margin: 0.25rem 0; }
ul.commits img { width: 20px; height: 20px; border-radius: 50%; }
.empty { color: #57606a; font-style: italic; }
</style>
"#;

fn render_loading() -> String {
    let mut html = String::from(PAGE_HEAD);
    html.push_str("<meta http-equiv=\"refresh\" content=\"5\">\n");
    html.push_str("<title>Release Dash</title>\n");
    html.push_str(PAGE_STYLE);
    html.push_str("</head>\n<body>\n<h1>Release Dash</h1>\n");
    html.push_str("<p class=\"empty\">Dashboard data is loading, this page will refresh shortly.</p>\n");
    html.push_str("</body>\n</html>\n");
    html
}

fn render_dashboard(changelogs: &[RepoChangelog]) -> String {
    let mut html = String::from(PAGE_HEAD);
    html.push_str("<title>Release Dash</title>\n");
    html.push_str(PAGE_STYLE);
    html.push_str("</head>\n<body>\n<h1>Release Dash</h1>\n");

    if changelogs.is_empty() {
        html.push_str("<p class=\"empty\">No repositories are configured for the dashboard.</p>\n");
    }

    for changelog in changelogs {
        render_repo(&mut html, changelog);
    }

    html.push_str("</body>\n</html>\n");
    html
}

fn render_repo(html: &mut String, changelog: &RepoChangelog) {
    let _ = writeln!(
        html,
        "<section class=\"repo\">\n<h2><a href=\"{}\">{}</a></h2>",
        escape(&changelog.repository.html_url),
        escape(&changelog.display_name),
    );

    if changelog.entries.is_empty() {
        html.push_str("<p class=\"empty\">No environments deployed yet.</p>\n");
    }

    for entry in &changelog.entries {
        render_entry(html, entry);
    }

    html.push_str("</section>\n");
}

fn render_entry(html: &mut String, entry: &ChangelogEntry) {
    let _ = writeln!(
        html,
        "<h3>{} &larr; {}</h3>",
        escape(&entry.to_ref),
        escape(&entry.from_ref),
    );

    if entry.commits.is_empty() {
        html.push_str("<p class=\"empty\">No changes.</p>\n");
        return;
    }

    html.push_str("<ul class=\"commits\">\n");
    for commit in &entry.commits {
        html.push_str("<li>");
        if !commit.author_avatar_url.is_empty() {
            let _ = write!(
                html,
                "<img src=\"{}\" alt=\"\">",
                escape(&commit.author_avatar_url)
            );
        }
        let _ = writeln!(
            html,
            "<a href=\"{}\">{}</a></li>",
            escape(&commit.html_url),
            escape(commit.title()),
        );
    }
    html.push_str("</ul>\n");
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
