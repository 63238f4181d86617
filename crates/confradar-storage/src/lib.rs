//! SQLite persistence + HTTP fetch utilities for confradar.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use confradar_core::{CodeLink, CodeVerdict, ConferenceRow, PaperDigest, PaperRecord, StoredPaper};
use reqwest::StatusCode;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::info_span;
use uuid::Uuid;

pub const CRATE_NAME: &str = "confradar-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS conferences (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        year INTEGER NOT NULL,
        deadline TEXT,
        triggered_at TEXT,
        UNIQUE(name, year)
    )",
    "CREATE TABLE IF NOT EXISTS papers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        conference TEXT NOT NULL,
        year INTEGER NOT NULL,
        source TEXT,
        title TEXT NOT NULL,
        authors TEXT,
        affiliations TEXT,
        abstract TEXT,
        pdf_url TEXT,
        supplemental_url TEXT,
        arxiv_id TEXT,
        keywords TEXT,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    )",
    // NULL arxiv_ids must still collide on title, so the identity key is an
    // expression index rather than a plain UNIQUE constraint.
    "CREATE UNIQUE INDEX IF NOT EXISTS papers_identity
        ON papers(conference, year, IFNULL(arxiv_id, ''), title)",
    "CREATE TABLE IF NOT EXISTS summaries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        paper_id INTEGER NOT NULL,
        tldr_en TEXT,
        tldr_zh TEXT,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP,
        FOREIGN KEY(paper_id) REFERENCES papers(id) ON DELETE CASCADE,
        UNIQUE(paper_id)
    )",
    "CREATE TABLE IF NOT EXISTS clusters (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        conference TEXT NOT NULL,
        year INTEGER NOT NULL,
        label TEXT NOT NULL,
        paper_id INTEGER NOT NULL,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP,
        FOREIGN KEY(paper_id) REFERENCES papers(id) ON DELETE CASCADE
    )",
    "CREATE TABLE IF NOT EXISTS trends (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        conference TEXT NOT NULL,
        year INTEGER NOT NULL,
        summary TEXT NOT NULL,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP,
        UNIQUE(conference, year)
    )",
    "CREATE TABLE IF NOT EXISTS code_links (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        paper_id INTEGER NOT NULL,
        url TEXT NOT NULL,
        status TEXT NOT NULL,
        last_commit TEXT,
        has_readme INTEGER,
        has_code INTEGER,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP,
        FOREIGN KEY(paper_id) REFERENCES papers(id) ON DELETE CASCADE,
        UNIQUE(paper_id, url)
    )",
];

/// Sole owner of all persistent entities. Every component reads and writes
/// through this handle; connections are pool-scoped per operation.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the SQLite database at `path`.
    pub async fn open(path: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
            .with_context(|| format!("parsing sqlite path {path}"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .with_context(|| format!("opening sqlite database {path}"))?;
        Ok(Self { pool })
    }

    /// In-memory database on a single connection, for tests and dry runs.
    pub async fn in_memory() -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("opening in-memory sqlite database")?;
        Ok(Self { pool })
    }

    /// Idempotently create every table.
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Register a conference, refreshing its deadline on every run.
    /// `triggered_at` is never touched here.
    pub async fn upsert_conference(
        &self,
        name: &str,
        year: i32,
        deadline: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO conferences (name, year, deadline) VALUES (?, ?, ?)
             ON CONFLICT(name, year) DO UPDATE SET deadline = excluded.deadline",
        )
        .bind(name)
        .bind(year)
        .bind(deadline)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Register a conference if unknown. An existing row's deadline and
    /// trigger stamp are left untouched.
    pub async fn register_conference(&self, name: &str, year: i32) -> Result<(), StoreError> {
        sqlx::query("INSERT OR IGNORE INTO conferences (name, year) VALUES (?, ?)")
            .bind(name)
            .bind(year)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Stamp activation time, once. Returns false if the conference was
    /// already triggered (or unknown), making re-triggering a no-op.
    pub async fn mark_conference_triggered(
        &self,
        name: &str,
        year: i32,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE conferences SET triggered_at = ?
             WHERE name = ? AND year = ? AND triggered_at IS NULL",
        )
        .bind(Utc::now())
        .bind(name)
        .bind(year)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn conference_triggered_at(
        &self,
        name: &str,
        year: i32,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let row = sqlx::query("SELECT triggered_at FROM conferences WHERE name = ? AND year = ?")
            .bind(name)
            .bind(year)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|r| r.get::<Option<DateTime<Utc>>, _>("triggered_at")))
    }

    pub async fn list_conferences(&self) -> Result<Vec<ConferenceRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT name, year, deadline, triggered_at FROM conferences
             ORDER BY year DESC, name ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| ConferenceRow {
                name: r.get("name"),
                year: r.get("year"),
                deadline: r.get("deadline"),
                triggered_at: r.get("triggered_at"),
            })
            .collect())
    }

    /// Insert-if-absent on the (conference, year, arxiv_id, title) identity,
    /// with a missing arxiv_id treated as equal to another missing one.
    /// Returns how many records were actually new.
    pub async fn insert_papers(&self, records: &[PaperRecord]) -> Result<u64, StoreError> {
        let mut inserted = 0;
        for rec in records {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO papers (
                    conference, year, source, title, authors, affiliations, abstract,
                    pdf_url, supplemental_url, arxiv_id, keywords
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&rec.conference)
            .bind(rec.year)
            .bind(rec.source.as_str())
            .bind(&rec.draft.title)
            .bind(&rec.draft.authors)
            .bind(&rec.draft.affiliations)
            .bind(&rec.draft.abstract_text)
            .bind(&rec.draft.pdf_url)
            .bind(&rec.draft.supplemental_url)
            .bind(&rec.draft.arxiv_id)
            .bind(&rec.draft.keywords)
            .execute(&self.pool)
            .await?;
            inserted += result.rows_affected();
        }
        Ok(inserted)
    }

    /// Papers still lacking a summary, capped at `limit`. Papers with no
    /// abstract are never handed to the collaborator.
    pub async fn papers_without_summary(
        &self,
        conference: &str,
        year: i32,
        limit: i64,
    ) -> Result<Vec<PaperDigest>, StoreError> {
        let rows = sqlx::query(
            "SELECT p.id, p.title, p.abstract
             FROM papers p
             LEFT JOIN summaries s ON p.id = s.paper_id
             WHERE p.conference = ? AND p.year = ? AND s.id IS NULL AND p.abstract IS NOT NULL
             LIMIT ?",
        )
        .bind(conference)
        .bind(year)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| PaperDigest {
                id: r.get("id"),
                title: r.get("title"),
                abstract_text: r.get::<Option<String>, _>("abstract").unwrap_or_default(),
            })
            .collect())
    }

    pub async fn save_summaries(
        &self,
        summaries: &[(i64, String, String)],
    ) -> Result<(), StoreError> {
        for (paper_id, tldr_en, tldr_zh) in summaries {
            sqlx::query(
                "INSERT OR REPLACE INTO summaries (paper_id, tldr_en, tldr_zh) VALUES (?, ?, ?)",
            )
            .bind(paper_id)
            .bind(tldr_en)
            .bind(tldr_zh)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub async fn summary_for(
        &self,
        paper_id: i64,
    ) -> Result<Option<(String, String)>, StoreError> {
        let row = sqlx::query("SELECT tldr_en, tldr_zh FROM summaries WHERE paper_id = ?")
            .bind(paper_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| {
            (
                r.get::<Option<String>, _>("tldr_en").unwrap_or_default(),
                r.get::<Option<String>, _>("tldr_zh").unwrap_or_default(),
            )
        }))
    }

    /// Clustering is non-incremental: prior assignments for the scope are
    /// dropped and the new labeling written in a single transaction.
    pub async fn replace_clusters(
        &self,
        conference: &str,
        year: i32,
        assignments: &[(i64, String)],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM clusters WHERE conference = ? AND year = ?")
            .bind(conference)
            .bind(year)
            .execute(&mut *tx)
            .await?;
        for (paper_id, label) in assignments {
            sqlx::query("INSERT INTO clusters (conference, year, label, paper_id) VALUES (?, ?, ?, ?)")
                .bind(conference)
                .bind(year)
                .bind(label)
                .bind(paper_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn cluster_counts(
        &self,
        conference: &str,
        year: i32,
    ) -> Result<Vec<(String, i64)>, StoreError> {
        let rows = sqlx::query(
            "SELECT label, COUNT(*) AS n FROM clusters
             WHERE conference = ? AND year = ? GROUP BY label ORDER BY label",
        )
        .bind(conference)
        .bind(year)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| (r.get("label"), r.get("n"))).collect())
    }

    pub async fn save_trend(
        &self,
        conference: &str,
        year: i32,
        summary: &str,
    ) -> Result<(), StoreError> {
        sqlx::query("INSERT OR REPLACE INTO trends (conference, year, summary) VALUES (?, ?, ?)")
            .bind(conference)
            .bind(year)
            .bind(summary)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn trend_for(
        &self,
        conference: &str,
        year: i32,
    ) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT summary FROM trends WHERE conference = ? AND year = ?")
            .bind(conference)
            .bind(year)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("summary")))
    }

    pub async fn fetch_papers(
        &self,
        conference: &str,
        year: i32,
    ) -> Result<Vec<StoredPaper>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, conference, year, source, title, authors, affiliations, abstract,
                    pdf_url, supplemental_url, arxiv_id, keywords, created_at
             FROM papers WHERE conference = ? AND year = ?",
        )
        .bind(conference)
        .bind(year)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| StoredPaper {
                id: r.get("id"),
                conference: r.get("conference"),
                year: r.get("year"),
                source: r.get("source"),
                title: r.get("title"),
                authors: r.get::<Option<String>, _>("authors").unwrap_or_default(),
                affiliations: r.get::<Option<String>, _>("affiliations").unwrap_or_default(),
                abstract_text: r.get::<Option<String>, _>("abstract").unwrap_or_default(),
                pdf_url: r.get("pdf_url"),
                supplemental_url: r.get("supplemental_url"),
                arxiv_id: r.get("arxiv_id"),
                keywords: r.get::<Option<String>, _>("keywords").unwrap_or_default(),
                created_at: r.get("created_at"),
            })
            .collect())
    }

    /// A repository URL's verdict is overwritten on re-verification.
    pub async fn save_code_link(
        &self,
        paper_id: i64,
        url: &str,
        verdict: &CodeVerdict,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO code_links
                (paper_id, url, status, last_commit, has_readme, has_code)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(paper_id)
        .bind(url)
        .bind(verdict.status.as_str())
        .bind(&verdict.last_commit)
        .bind(verdict.has_readme)
        .bind(verdict.has_code)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn code_links(&self, paper_id: i64) -> Result<Vec<CodeLink>, StoreError> {
        let rows = sqlx::query(
            "SELECT url, status, last_commit, has_readme, has_code
             FROM code_links WHERE paper_id = ? ORDER BY url",
        )
        .bind(paper_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| CodeLink {
                paper_id,
                url: r.get("url"),
                verdict: CodeVerdict {
                    status: r
                        .get::<String, _>("status")
                        .parse()
                        .unwrap_or(confradar_core::RepoStatus::None),
                    last_commit: r.get("last_commit"),
                    has_readme: r.get::<Option<bool>, _>("has_readme").unwrap_or(false),
                    has_code: r.get::<Option<bool>, _>("has_code").unwrap_or(false),
                },
            })
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub per_source_concurrency: usize,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            global_concurrency: 16,
            per_source_concurrency: 4,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Retrying GET client shared by the source adapters and the PDF fetch
/// path. One semaphore bounds total in-flight requests, another bounds each
/// source key so a slow host cannot starve the rest.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    per_source_limit: usize,
    per_source: Mutex<HashMap<String, Arc<Semaphore>>>,
    backoff: BackoffPolicy,
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("invalid json from {url}: {source}")]
    Json {
        url: String,
        source: serde_json::Error,
    },
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            per_source_limit: config.per_source_concurrency.max(1),
            per_source: Mutex::new(HashMap::new()),
            backoff: config.backoff,
        })
    }

    async fn per_source_semaphore(&self, source_key: &str) -> Arc<Semaphore> {
        let mut map = self.per_source.lock().await;
        map.entry(source_key.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_source_limit)))
            .clone()
    }

    pub async fn fetch_bytes(
        &self,
        run_id: Uuid,
        source_key: &str,
        url: &str,
    ) -> Result<FetchedResponse, FetchError> {
        let _global = self.global_limit.acquire().await.expect("semaphore not closed");
        let per_source = self.per_source_semaphore(source_key).await;
        let _source = per_source.acquire().await.expect("semaphore not closed");

        let span = info_span!("http_fetch", %run_id, source_key, url);
        let _guard = span.enter();

        let mut last_request_error: Option<reqwest::Error> = None;

        for attempt in 0..=self.backoff.max_retries {
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        let body = resp.bytes().await?.to_vec();
                        return Ok(FetchedResponse {
                            status,
                            final_url,
                            body,
                        });
                    }

                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }

                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        last_request_error = Some(err);
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }

        Err(FetchError::Request(
            last_request_error.expect("retry loop should capture a request error"),
        ))
    }

    pub async fn fetch_text(
        &self,
        run_id: Uuid,
        source_key: &str,
        url: &str,
    ) -> Result<String, FetchError> {
        Ok(self.fetch_bytes(run_id, source_key, url).await?.text())
    }

    pub async fn fetch_json(
        &self,
        run_id: Uuid,
        source_key: &str,
        url: &str,
    ) -> Result<serde_json::Value, FetchError> {
        let resp = self.fetch_bytes(run_id, source_key, url).await?;
        serde_json::from_slice(&resp.body).map_err(|source| FetchError::Json {
            url: resp.final_url,
            source,
        })
    }
}
