//! Code verification: GitHub repository probing, the tri-state verdict
//! ladder, and GitHub link extraction from abstracts and PDFs.

use std::collections::BTreeSet;
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::Engine;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use confradar_core::{CodeVerdict, RepoStatus};
use confradar_storage::{HttpFetcher, Store};
use futures::StreamExt;
use regex::Regex;
use reqwest::{header, StatusCode};
use serde_json::Value as JsonValue;
use tracing::warn;
use uuid::Uuid;

use crate::LanguageModel;

pub const GITHUB_API: &str = "https://api.github.com";

/// Root-listing extensions that count as real source code.
const SOURCE_EXTENSIONS: &[&str] = &[".py", ".ipynb", ".cc", ".cpp", ".cu", ".js", ".java"];
/// A last commit further than this from the paper date downgrades the verdict.
const RECENCY_WINDOW_DAYS: i64 = 180;
/// PDF pages scanned for repository links.
const PDF_SCAN_PAGES: usize = 3;
/// Concurrent repository verifications per paper.
const VERIFY_FANOUT: usize = 4;

fn github_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)https?://github\.com/[\w\-\.]+/[\w\-\.]+").expect("valid regex")
    })
}

/// GitHub repository URLs in `text`, deduplicated and deterministically
/// ordered.
pub fn extract_github_links(text: &str) -> BTreeSet<String> {
    github_pattern()
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// `(owner, repo)` from a repository URL.
pub fn repo_slug(url: &str) -> Option<(String, String)> {
    let (_, tail) = url.trim_end_matches('/').split_once("github.com/")?;
    let mut parts = tail.split('/');
    let owner = parts.next()?.to_string();
    let repo = parts.next()?.to_string();
    if owner.is_empty() || repo.is_empty() {
        return None;
    }
    Some((owner, repo))
}

/// Newline-tolerant base64, lossily decoded to UTF-8. Bad input is empty.
pub fn decode_base64_content(content: &str) -> String {
    let stripped: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    match base64::engine::general_purpose::STANDARD.decode(stripped) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(_) => String::new(),
    }
}

fn parse_flexible_datetime(raw: &str) -> Option<DateTime<FixedOffset>> {
    let s = raw.trim().replace('Z', "+00:00");
    if let Ok(dt) = DateTime::parse_from_rfc3339(&s) {
        return Some(dt);
    }
    let utc = FixedOffset::east_opt(0)?;
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&s, fmt) {
            return dt.and_local_timezone(utc).single();
        }
    }
    let date = NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()?;
    date.and_hms_opt(0, 0, 0)?.and_local_timezone(utc).single()
}

/// Baseline verdict before any downgrade: code plus a readme is `Verified`,
/// anything reachable but thinner is `Placeholder`.
pub fn baseline_status(has_code: bool, has_readme: bool) -> RepoStatus {
    if has_code && has_readme {
        RepoStatus::Verified
    } else {
        RepoStatus::Placeholder
    }
}

/// Whether the last commit sits within the recency window around the paper
/// date. `None` when either timestamp is unparseable (no downgrade applies).
pub fn commit_within_window(paper_date: &str, commit_date: &str) -> Option<bool> {
    let paper = parse_flexible_datetime(paper_date)?;
    let commit = parse_flexible_datetime(commit_date)?;
    Some((commit - paper).num_days().abs() <= RECENCY_WINDOW_DAYS)
}

pub struct GithubClient {
    http: reqwest::Client,
    token: Option<String>,
}

impl GithubClient {
    pub fn new(token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("confradar")
            .build()
            .context("building github http client")?;
        Ok(Self { http, token })
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .http
            .get(url)
            .header(header::ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        req
    }

    /// Non-200 and transport failures both collapse to `None`.
    async fn get_json(&self, url: &str) -> Option<JsonValue> {
        match self.get(url).send().await {
            Ok(resp) if resp.status() == StatusCode::OK => resp.json().await.ok(),
            Ok(resp) => {
                warn!(url, status = resp.status().as_u16(), "github api returned non-200");
                None
            }
            Err(err) => {
                warn!(url, %err, "github api call failed");
                None
            }
        }
    }

    pub async fn repo_metadata(&self, owner: &str, repo: &str) -> Option<JsonValue> {
        self.get_json(&format!("{GITHUB_API}/repos/{owner}/{repo}"))
            .await
    }

    pub async fn latest_commit_date(&self, owner: &str, repo: &str) -> Option<String> {
        let items = self
            .get_json(&format!("{GITHUB_API}/repos/{owner}/{repo}/commits?per_page=1"))
            .await?;
        items
            .as_array()?
            .first()?
            .get("commit")?
            .get("author")?
            .get("date")?
            .as_str()
            .map(ToString::to_string)
    }

    pub async fn readme(&self, owner: &str, repo: &str) -> String {
        let Some(body) = self
            .get_json(&format!("{GITHUB_API}/repos/{owner}/{repo}/readme"))
            .await
        else {
            return String::new();
        };
        let content = body.get("content").and_then(|v| v.as_str()).unwrap_or_default();
        decode_base64_content(content)
    }

    /// Any recognized source extension in the repository root listing.
    pub async fn has_code_files(&self, owner: &str, repo: &str) -> bool {
        let Some(items) = self
            .get_json(&format!("{GITHUB_API}/repos/{owner}/{repo}/contents"))
            .await
        else {
            return false;
        };
        items
            .as_array()
            .map(|arr| {
                arr.iter().any(|item| {
                    let name = item
                        .get("name")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_lowercase();
                    SOURCE_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
                })
            })
            .unwrap_or(false)
    }
}

/// The verdict ladder for one candidate URL. An unreachable repository is
/// terminal; otherwise the baseline is computed from the root listing and
/// readme presence, then the recency downgrade and the collaborator's
/// placeholder judgment apply. Downgrades never flip back upward.
pub async fn verify_repo(
    github: &GithubClient,
    llm: Option<&dyn LanguageModel>,
    url: &str,
    paper_date: Option<&str>,
) -> CodeVerdict {
    let Some((owner, repo)) = repo_slug(url) else {
        return CodeVerdict::unreachable();
    };
    let Some(meta) = github.repo_metadata(&owner, &repo).await else {
        return CodeVerdict::unreachable();
    };

    let has_readme = meta.get("size").and_then(|v| v.as_i64()).unwrap_or(0) > 0;
    let last_commit = match github.latest_commit_date(&owner, &repo).await {
        Some(date) => Some(date),
        None => meta
            .get("pushed_at")
            .and_then(|v| v.as_str())
            .map(ToString::to_string),
    };
    let has_code = github.has_code_files(&owner, &repo).await;
    let mut status = baseline_status(has_code, has_readme);

    if let (Some(paper), Some(commit)) = (paper_date, last_commit.as_deref()) {
        if commit_within_window(paper, commit) == Some(false) {
            status = RepoStatus::Placeholder;
        }
    }

    if let Some(llm) = llm {
        let readme = github.readme(&owner, &repo).await;
        if !readme.is_empty() && llm.readme_is_placeholder(&readme).await {
            status = RepoStatus::Placeholder;
        }
    }

    CodeVerdict {
        status,
        last_commit,
        has_readme,
        has_code,
    }
}

fn pdf_text_prefix(bytes: &[u8], max_pages: usize) -> Result<String> {
    let doc = lopdf::Document::load_mem(bytes).context("loading pdf")?;
    let pages: Vec<u32> = doc.get_pages().keys().copied().take(max_pages).collect();
    let mut parts = Vec::new();
    for page in pages {
        if let Ok(text) = doc.extract_text(&[page]) {
            parts.push(text);
        }
    }
    Ok(parts.join("\n"))
}

/// Repository links from the first pages of a paper's PDF. Any failure,
/// download or parse, yields an empty set.
pub async fn extract_github_from_pdf(
    http: &HttpFetcher,
    run_id: Uuid,
    pdf_url: &str,
) -> BTreeSet<String> {
    let bytes = match http.fetch_bytes(run_id, "pdf", pdf_url).await {
        Ok(resp) => resp.body,
        Err(err) => {
            warn!(pdf_url, %err, "pdf download failed");
            return BTreeSet::new();
        }
    };
    match pdf_text_prefix(&bytes, PDF_SCAN_PAGES) {
        Ok(text) => extract_github_links(&text),
        Err(err) => {
            warn!(pdf_url, %err, "pdf parse failed");
            BTreeSet::new()
        }
    }
}

/// Verify every candidate repository for every paper of a conference.
/// Candidates from the abstract and the PDF are unioned; verdicts for one
/// paper fan out with a bounded width and each is upserted per (paper, url).
pub async fn verify_conference(
    store: &Store,
    http: &HttpFetcher,
    github: &GithubClient,
    llm: Option<&dyn LanguageModel>,
    conference: &str,
    year: i32,
) -> Result<()> {
    let papers = store.fetch_papers(conference, year).await?;
    let run_id = Uuid::new_v4();

    for paper in papers {
        let mut links = extract_github_links(&paper.abstract_text);
        if let Some(pdf_url) = &paper.pdf_url {
            links.extend(extract_github_from_pdf(http, run_id, pdf_url).await);
        }
        if links.is_empty() {
            continue;
        }

        let paper_date = paper.created_at.as_deref();
        let verdicts: Vec<(String, CodeVerdict)> = futures::stream::iter(links)
            .map(|url| async move {
                let verdict = verify_repo(github, llm, &url, paper_date).await;
                (url, verdict)
            })
            .buffer_unordered(VERIFY_FANOUT)
            .collect()
            .await;

        for (url, verdict) in verdicts {
            store.save_code_link(paper.id, &url, &verdict).await?;
        }
    }
    Ok(())
}
