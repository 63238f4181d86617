//! Pipeline orchestration: configuration, the deadline trigger engine, the
//! cascading multi-source collector, LLM enrichment, code verification, and
//! optional cron scheduling.

pub mod llm;
pub mod verify;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use confradar_adapters::{
    ArxivAdapter, FetchContext, OfficialSelectors, OfficialSiteAdapter, OpenReviewAdapter,
    SourceAdapter,
};
use confradar_core::{
    ClusterAssignment, PaperDigest, PaperRecord, PaperSource, StoredPaper, Summary,
};
use confradar_storage::{HttpClientConfig, HttpFetcher, Store};
use serde::Deserialize;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

pub use llm::LlmClient;
pub use verify::GithubClient;

pub const CRATE_NAME: &str = "confradar-pipeline";

pub const DEADLINE_REPO_URL: &str = "https://github.com/ccfddl/ccf-deadlines";
pub const DEADLINE_DATA_FILE: &str = "_data/conferences.yml";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub conferences: Vec<ConferenceConfig>,
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub secrets: SecretConfig,
    #[serde(default)]
    pub site: SiteConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConferenceConfig {
    pub name: String,
    pub year: i32,
    #[serde(default)]
    pub arxiv_categories: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub source_priority: Option<Vec<PaperSource>>,
    #[serde(default)]
    pub openreview: Option<OpenReviewConfig>,
    #[serde(default)]
    pub official_site: Option<OfficialSiteConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenReviewConfig {
    pub venue_id: Option<String>,
    #[serde(default = "default_openreview_limit")]
    pub limit: usize,
}

fn default_openreview_limit() -> usize {
    200
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OfficialSiteConfig {
    pub list_url: Option<String>,
    pub item_selector: Option<String>,
    pub title_selector: Option<String>,
    pub authors_selector: Option<String>,
    pub affiliations_selector: Option<String>,
    pub abstract_selector: Option<String>,
    pub pdf_selector: Option<String>,
    pub supplemental_selector: Option<String>,
}

impl OfficialSiteConfig {
    pub fn selectors(&self) -> OfficialSelectors {
        OfficialSelectors {
            item: self.item_selector.clone(),
            title: self.title_selector.clone(),
            authors: self.authors_selector.clone(),
            affiliations: self.affiliations_selector.clone(),
            abstract_text: self.abstract_selector.clone(),
            pdf: self.pdf_selector.clone(),
            supplemental: self.supplemental_selector.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    pub deadline_lag_days: i64,
    pub ccf_repo_dir: PathBuf,
    pub arxiv_max_results: usize,
    pub arxiv_batch_days: i64,
    #[serde(default)]
    pub scheduler_enabled: bool,
    #[serde(default = "default_run_cron")]
    pub run_cron: String,
}

// tokio-cron-scheduler expects the 6-field form with leading seconds
fn default_run_cron() -> String {
    "0 0 6 * * *".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: i64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            max_batch_size: default_max_batch_size(),
        }
    }
}

fn default_llm_provider() -> String {
    "deepseek".to_string()
}

fn default_llm_model() -> String {
    "deepseek-chat".to_string()
}

fn default_max_batch_size() -> i64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub db_path: String,
    pub site_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecretConfig {
    #[serde(default = "default_llm_key_env")]
    pub llm_api_key_env: String,
    #[serde(default = "default_github_token_env")]
    pub github_token_env: String,
}

impl Default for SecretConfig {
    fn default() -> Self {
        Self {
            llm_api_key_env: default_llm_key_env(),
            github_token_env: default_github_token_env(),
        }
    }
}

fn default_llm_key_env() -> String {
    "LLM_API_KEY".to_string()
}

fn default_github_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SiteConfig {
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub title: String,
}

pub async fn load_config(path: &str) -> Result<AppConfig> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading config file {path}"))?;
    serde_yaml::from_str(&raw).with_context(|| format!("parsing config file {path}"))
}

fn env_secret(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// Trigger engine
// ---------------------------------------------------------------------------

async fn run_git(args: &[&str]) {
    match tokio::process::Command::new("git").args(args).status().await {
        Ok(status) if status.success() => {}
        Ok(status) => warn!(?args, %status, "git command failed"),
        Err(err) => warn!(?args, %err, "git command could not be spawned"),
    }
}

/// Refresh the local deadline-feed clone. Failures are tolerated; a stale
/// clone (or none at all) just means no new activations this run.
pub async fn sync_deadline_repo(dir: &Path) {
    if dir.exists() {
        run_git(&["-C", &dir.display().to_string(), "pull"]).await;
    } else {
        if let Some(parent) = dir.parent() {
            if let Err(err) = tokio::fs::create_dir_all(parent).await {
                warn!(dir = %parent.display(), %err, "could not create deadline repo parent");
            }
        }
        run_git(&["clone", DEADLINE_REPO_URL, &dir.display().to_string()]).await;
    }
}

/// `acronym (uppercased) -> deadline string` from the feed's conference list.
/// Entries missing either field are skipped.
pub fn parse_deadline_feed(yaml: &str) -> HashMap<String, String> {
    let Ok(value) = serde_yaml::from_str::<serde_yaml::Value>(yaml) else {
        return HashMap::new();
    };
    let Some(entries) = value.as_sequence() else {
        return HashMap::new();
    };

    let mut result = HashMap::new();
    for entry in entries {
        let acronym = entry
            .get("conf_name")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_uppercase();
        if acronym.is_empty() {
            continue;
        }
        if let Some(deadline) = entry.get("deadline").and_then(|v| v.as_str()) {
            result.insert(acronym, deadline.to_string());
        }
    }
    result
}

pub async fn load_deadlines(dir: &Path) -> HashMap<String, String> {
    let data_path = dir.join(DEADLINE_DATA_FILE);
    match tokio::fs::read_to_string(&data_path).await {
        Ok(raw) => parse_deadline_feed(&raw),
        Err(_) => HashMap::new(),
    }
}

/// ISO-8601 date or datetime, with a trailing `Z` accepted. Malformed input
/// yields `None` and the conference is skipped rather than failing the run.
pub fn parse_deadline(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim().replace('Z', "+00:00");
    if let Ok(dt) = DateTime::<FixedOffset>::parse_from_rfc3339(&s) {
        return Some(dt.date_naive());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&s, fmt) {
            return Some(dt.date());
        }
    }
    NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()
}

/// A conference activates on the first day at or past deadline + lag.
pub fn activation_due(deadline: NaiveDate, lag_days: i64, today: NaiveDate) -> bool {
    today >= deadline + Duration::days(lag_days)
}

/// Upsert every configured conference (refreshing its deadline), then return
/// those that activate on this run. A conference already stamped with
/// `triggered_at` is never selected again.
pub async fn select_triggered(
    store: &Store,
    conferences: &[ConferenceConfig],
    deadlines: &HashMap<String, String>,
    lag_days: i64,
    today: NaiveDate,
) -> Result<Vec<ConferenceConfig>> {
    let mut triggered = Vec::new();
    for conf in conferences {
        let deadline_str = deadlines.get(&conf.name.to_uppercase());
        store
            .upsert_conference(&conf.name, conf.year, deadline_str.map(String::as_str))
            .await?;
        let Some(deadline) = deadline_str.and_then(|s| parse_deadline(s)) else {
            continue;
        };
        if activation_due(deadline, lag_days, today)
            && store.mark_conference_triggered(&conf.name, conf.year).await?
        {
            info!(conference = %conf.name, year = conf.year, "conference activated");
            triggered.push(conf.clone());
        }
    }
    Ok(triggered)
}

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

fn default_source_priority() -> Vec<PaperSource> {
    vec![PaperSource::OpenReview, PaperSource::Official, PaperSource::Arxiv]
}

fn adapter_for_source(
    conf: &ConferenceConfig,
    monitoring: &MonitoringConfig,
    source: PaperSource,
) -> Option<Box<dyn SourceAdapter>> {
    match source {
        PaperSource::OpenReview => {
            let cfg = conf.openreview.as_ref()?;
            let venue_id = cfg.venue_id.clone()?;
            Some(Box::new(OpenReviewAdapter {
                venue_id,
                limit: cfg.limit,
            }))
        }
        PaperSource::Official => {
            let cfg = conf.official_site.as_ref()?;
            let list_url = cfg.list_url.clone()?;
            Some(Box::new(OfficialSiteAdapter {
                list_url,
                selectors: cfg.selectors(),
                keywords: conf.keywords.clone(),
            }))
        }
        PaperSource::Arxiv => Some(Box::new(ArxivAdapter {
            conference: conf.name.clone(),
            year: conf.year,
            categories: conf.arxiv_categories.clone(),
            keywords: conf.keywords.clone(),
            max_results: monitoring.arxiv_max_results,
            window_days: monitoring.arxiv_batch_days,
        })),
    }
}

/// Cascade over the adapters in order, deduplicating on the case-folded
/// title. The first source to claim a title wins; later sources only add
/// titles not yet seen. An adapter failure degrades to an empty contribution.
pub async fn collect_from_adapters(
    conference: &str,
    year: i32,
    adapters: &[Box<dyn SourceAdapter>],
    http: &HttpFetcher,
    ctx: &FetchContext,
) -> Vec<PaperRecord> {
    let mut seen = HashSet::new();
    let mut records = Vec::new();

    for adapter in adapters {
        let source = adapter.source();
        let drafts = match adapter.fetch(http, ctx).await {
            Ok(drafts) => drafts,
            Err(err) => {
                warn!(conference, %source, %err, "source fetch failed, contributing nothing");
                Vec::new()
            }
        };
        for draft in drafts {
            let title_key = draft.title.to_lowercase();
            if title_key.is_empty() || !seen.insert(title_key) {
                continue;
            }
            records.push(PaperRecord {
                conference: conference.to_string(),
                year,
                source,
                draft,
            });
        }
    }
    records
}

pub async fn collect_papers(
    conf: &ConferenceConfig,
    monitoring: &MonitoringConfig,
    http: &HttpFetcher,
    ctx: &FetchContext,
) -> Vec<PaperRecord> {
    let priority = conf
        .source_priority
        .clone()
        .unwrap_or_else(default_source_priority);
    let adapters: Vec<Box<dyn SourceAdapter>> = priority
        .into_iter()
        .filter_map(|source| adapter_for_source(conf, monitoring, source))
        .collect();
    collect_from_adapters(&conf.name, conf.year, &adapters, http, ctx).await
}

// ---------------------------------------------------------------------------
// Enrichment
// ---------------------------------------------------------------------------

/// The LLM collaborator as the enrichment and verification code sees it.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn batch_summarize(&self, papers: &[PaperDigest]) -> Vec<Summary>;
    async fn cluster_papers(&self, papers: &[StoredPaper]) -> Vec<ClusterAssignment>;
    async fn summarize_trend(&self, clusters: &[(String, i64)]) -> Option<String>;
    async fn readme_is_placeholder(&self, readme: &str) -> bool;
}

/// Summaries, clusters, and trend for one conference. The summarization loop
/// drains the backlog in batches; if a pass leaves the backlog unchanged the
/// loop stops instead of spinning on a failing collaborator.
pub async fn enrich_conference(
    store: &Store,
    llm: &dyn LanguageModel,
    conference: &str,
    year: i32,
    max_batch_size: i64,
) -> Result<()> {
    let mut last_batch_ids: Vec<i64> = Vec::new();
    loop {
        let batch = store
            .papers_without_summary(conference, year, max_batch_size)
            .await?;
        if batch.is_empty() {
            break;
        }
        let batch_ids: Vec<i64> = batch.iter().map(|p| p.id).collect();
        if batch_ids == last_batch_ids {
            warn!(conference, year, "summarization made no progress, stopping");
            break;
        }
        last_batch_ids = batch_ids;

        let summaries = llm.batch_summarize(&batch).await;
        let rows: Vec<(i64, String, String)> = summaries
            .into_iter()
            .map(|s| (s.paper_id, s.tldr_en, s.tldr_zh))
            .collect();
        store.save_summaries(&rows).await?;
    }

    let papers = store.fetch_papers(conference, year).await?;
    let clusters = llm.cluster_papers(&papers).await;
    if clusters.is_empty() {
        warn!(conference, year, "clustering returned nothing, keeping prior labels");
    } else {
        let assignments: Vec<(i64, String)> = clusters
            .into_iter()
            .map(|c| (c.paper_id, c.label))
            .collect();
        store.replace_clusters(conference, year, &assignments).await?;
    }

    let counts = store.cluster_counts(conference, year).await?;
    if let Some(trend) = llm.summarize_trend(&counts).await {
        store.save_trend(conference, year, &trend).await?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// External rendering collaborator. The pipeline hands over the store and
/// site metadata; producing any output is entirely the renderer's concern.
#[async_trait]
pub trait SiteRenderer: Send + Sync {
    async fn render(&self, store: &Store, site: &SiteConfig, out_dir: &Path) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub triggered: Vec<String>,
    pub papers_inserted: u64,
}

pub struct Pipeline {
    config: AppConfig,
    store: Store,
    http: HttpFetcher,
    llm: Option<LlmClient>,
    github: GithubClient,
    renderer: Option<Box<dyn SiteRenderer>>,
}

impl Pipeline {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let store = Store::open(&config.storage.db_path).await?;
        store.init_schema().await?;
        let http = HttpFetcher::new(HttpClientConfig::default())?;

        let llm = match env_secret(&config.secrets.llm_api_key_env) {
            Some(api_key) => Some(LlmClient::new(&config.llm.provider, &config.llm.model, api_key)?),
            None => {
                warn!(
                    env = %config.secrets.llm_api_key_env,
                    "LLM API key not set, skipping summaries, clustering and trends"
                );
                None
            }
        };

        let github_token = env_secret(&config.secrets.github_token_env);
        if github_token.is_none() {
            warn!(
                env = %config.secrets.github_token_env,
                "GitHub token not set, using unauthenticated API calls"
            );
        }
        let github = GithubClient::new(github_token)?;

        Ok(Self {
            config,
            store,
            http,
            llm,
            github,
            renderer: None,
        })
    }

    pub fn with_renderer(mut self, renderer: Box<dyn SiteRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub async fn run(&self) -> Result<RunReport> {
        info!("starting pipeline run");
        sync_deadline_repo(&self.config.monitoring.ccf_repo_dir).await;
        let deadlines = load_deadlines(&self.config.monitoring.ccf_repo_dir).await;
        let triggered = select_triggered(
            &self.store,
            &self.config.conferences,
            &deadlines,
            self.config.monitoring.deadline_lag_days,
            Utc::now().date_naive(),
        )
        .await?;

        let mut report = RunReport::default();
        for conf in &triggered {
            report.papers_inserted += self.process_conference(conf).await?;
            report.triggered.push(conf.name.clone());
        }

        if let Some(renderer) = &self.renderer {
            if let Err(err) = renderer
                .render(&self.store, &self.config.site, &self.config.storage.site_dir)
                .await
            {
                warn!(%err, "site rendering failed");
            }
        }

        info!(
            triggered = report.triggered.len(),
            papers_inserted = report.papers_inserted,
            "pipeline run finished"
        );
        Ok(report)
    }

    async fn process_conference(&self, conf: &ConferenceConfig) -> Result<u64> {
        info!(conference = %conf.name, year = conf.year, "processing conference");
        let ctx = FetchContext::new();
        let records = collect_papers(conf, &self.config.monitoring, &self.http, &ctx).await;
        let inserted = self.store.insert_papers(&records).await?;
        info!(
            conference = %conf.name,
            collected = records.len(),
            inserted,
            "papers persisted"
        );

        if let Some(llm) = &self.llm {
            enrich_conference(
                &self.store,
                llm,
                &conf.name,
                conf.year,
                self.config.llm.max_batch_size,
            )
            .await?;
        }

        verify::verify_conference(
            &self.store,
            &self.http,
            &self.github,
            self.llm.as_ref().map(|c| c as &dyn LanguageModel),
            &conf.name,
            conf.year,
        )
        .await?;
        Ok(inserted)
    }

    /// Cron scheduling of full runs, gated by configuration.
    pub async fn maybe_build_scheduler(self: Arc<Self>) -> Result<Option<JobScheduler>> {
        if !self.config.monitoring.scheduler_enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let cron = self.config.monitoring.run_cron.clone();
        let pipeline = Arc::clone(&self);
        let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
            let pipeline = Arc::clone(&pipeline);
            Box::pin(async move {
                if let Err(err) = pipeline.run().await {
                    warn!(%err, "scheduled run failed");
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
        Ok(Some(sched))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confradar_adapters::AdapterError;
    use confradar_core::PaperDraft;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn config_parses_with_defaults() {
        let yaml = r#"
conferences:
  - name: NeurIPS
    year: 2024
    arxiv_categories: [cs.LG]
    keywords: [diffusion]
    openreview:
      venue_id: NeurIPS.cc/2024/Conference
    official_site:
      list_url: https://neurips.cc/papers
      item_selector: li.paper
      title_selector: h3
monitoring:
  deadline_lag_days: 7
  ccf_repo_dir: /tmp/ccf-deadlines
  arxiv_max_results: 100
  arxiv_batch_days: 30
storage:
  db_path: radar.db
  site_dir: site
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.conferences.len(), 1);
        let conf = &config.conferences[0];
        assert_eq!(conf.openreview.as_ref().unwrap().limit, 200);
        assert!(conf.source_priority.is_none());
        let selectors = conf.official_site.as_ref().unwrap().selectors();
        assert_eq!(selectors.item.as_deref(), Some("li.paper"));
        assert_eq!(selectors.title.as_deref(), Some("h3"));
        assert!(selectors.authors.is_none());
        assert_eq!(config.llm.provider, "deepseek");
        assert_eq!(config.llm.max_batch_size, 10);
        assert_eq!(config.secrets.llm_api_key_env, "LLM_API_KEY");
        assert!(!config.monitoring.scheduler_enabled);
    }

    #[tokio::test]
    async fn default_cron_expression_builds_a_job() {
        let job = Job::new_async(default_run_cron().as_str(), |_uuid, _lock| {
            Box::pin(async {})
        });
        assert!(job.is_ok());
    }

    #[test]
    fn source_priority_deserializes_from_lowercase_names() {
        let yaml = r#"
name: ICML
year: 2025
source_priority: [arxiv, openreview]
"#;
        let conf: ConferenceConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            conf.source_priority,
            Some(vec![PaperSource::Arxiv, PaperSource::OpenReview])
        );
    }

    #[test]
    fn deadline_feed_maps_uppercased_acronyms() {
        let yaml = r#"
- conf_name: NeurIPS
  deadline: "2024-05-22 20:00:00"
- conf_name: icml
  deadline: "2025-01-30"
- conf_name: ""
  deadline: "2024-01-01"
- conf_name: NoDeadline
"#;
        let map = parse_deadline_feed(yaml);
        assert_eq!(map.len(), 2);
        assert_eq!(map["NEURIPS"], "2024-05-22 20:00:00");
        assert_eq!(map["ICML"], "2025-01-30");
    }

    #[tokio::test]
    async fn deadlines_load_from_the_feed_clone_or_default_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_deadlines(dir.path()).await.is_empty());

        let data_dir = dir.path().join("_data");
        tokio::fs::create_dir_all(&data_dir).await.unwrap();
        tokio::fs::write(
            data_dir.join("conferences.yml"),
            "- conf_name: AAAI\n  deadline: \"2024-08-15\"\n",
        )
        .await
        .unwrap();

        let map = load_deadlines(dir.path()).await;
        assert_eq!(map.get("AAAI").map(String::as_str), Some("2024-08-15"));
    }

    #[test]
    fn deadline_parsing_accepts_common_shapes() {
        assert_eq!(parse_deadline("2024-01-15"), Some(date(2024, 1, 15)));
        assert_eq!(parse_deadline("2024-01-15T23:59:59"), Some(date(2024, 1, 15)));
        assert_eq!(parse_deadline("2024-01-15 23:59:59"), Some(date(2024, 1, 15)));
        assert_eq!(parse_deadline("2024-01-15T23:59:59Z"), Some(date(2024, 1, 15)));
        assert_eq!(parse_deadline("2024-01-15T23:59:59+08:00"), Some(date(2024, 1, 15)));
        assert_eq!(parse_deadline("next tuesday"), None);
        assert_eq!(parse_deadline(""), None);
    }

    #[test]
    fn activation_boundary_is_deadline_plus_lag() {
        let deadline = date(2024, 1, 15);
        assert!(!activation_due(deadline, 7, date(2024, 1, 21)));
        assert!(activation_due(deadline, 7, date(2024, 1, 22)));
        assert!(activation_due(deadline, 7, date(2024, 2, 1)));
    }

    fn conf(name: &str, year: i32) -> ConferenceConfig {
        ConferenceConfig {
            name: name.to_string(),
            year,
            arxiv_categories: Vec::new(),
            keywords: Vec::new(),
            source_priority: None,
            openreview: None,
            official_site: None,
        }
    }

    #[tokio::test]
    async fn triggered_conferences_are_not_selected_twice() {
        let store = Store::in_memory().await.unwrap();
        store.init_schema().await.unwrap();
        let confs = vec![conf("NeurIPS", 2024), conf("ICML", 2024)];
        let mut deadlines = HashMap::new();
        deadlines.insert("NEURIPS".to_string(), "2024-01-10".to_string());
        deadlines.insert("ICML".to_string(), "not a date".to_string());

        let today = date(2024, 2, 1);
        let first = select_triggered(&store, &confs, &deadlines, 7, today)
            .await
            .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].name, "NeurIPS");

        // second run: already stamped, malformed one still skipped
        let second = select_triggered(&store, &confs, &deadlines, 7, today)
            .await
            .unwrap();
        assert!(second.is_empty());

        // both conferences were registered regardless of activation
        assert_eq!(store.list_conferences().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn future_deadline_does_not_activate() {
        let store = Store::in_memory().await.unwrap();
        store.init_schema().await.unwrap();
        let confs = vec![conf("CVPR", 2025)];
        let mut deadlines = HashMap::new();
        deadlines.insert("CVPR".to_string(), "2025-11-15".to_string());

        let triggered = select_triggered(&store, &confs, &deadlines, 3, date(2025, 11, 17))
            .await
            .unwrap();
        assert!(triggered.is_empty());
        assert!(store
            .conference_triggered_at("CVPR", 2025)
            .await
            .unwrap()
            .is_none());
    }

    struct StubAdapter {
        source: PaperSource,
        titles: Vec<&'static str>,
        fail: bool,
    }

    #[async_trait]
    impl SourceAdapter for StubAdapter {
        fn source(&self) -> PaperSource {
            self.source
        }

        async fn fetch(
            &self,
            _http: &HttpFetcher,
            _ctx: &FetchContext,
        ) -> std::result::Result<Vec<PaperDraft>, AdapterError> {
            if self.fail {
                return Err(AdapterError::Message("stubbed outage".to_string()));
            }
            Ok(self
                .titles
                .iter()
                .map(|t| PaperDraft {
                    title: t.to_string(),
                    ..PaperDraft::default()
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn collector_dedup_is_case_insensitive_and_priority_ordered() {
        let adapters: Vec<Box<dyn SourceAdapter>> = vec![
            Box::new(StubAdapter {
                source: PaperSource::OpenReview,
                titles: vec!["Deep Ensembles", "Sparse Attention", ""],
                fail: false,
            }),
            Box::new(StubAdapter {
                source: PaperSource::Arxiv,
                titles: vec!["DEEP ENSEMBLES", "Neural ODEs"],
                fail: false,
            }),
        ];
        let http = HttpFetcher::new(HttpClientConfig::default()).unwrap();
        let ctx = FetchContext::new();
        let records = collect_from_adapters("NeurIPS", 2024, &adapters, &http, &ctx).await;

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].draft.title, "Deep Ensembles");
        assert_eq!(records[0].source, PaperSource::OpenReview);
        assert_eq!(records[1].draft.title, "Sparse Attention");
        assert_eq!(records[2].draft.title, "Neural ODEs");
        assert_eq!(records[2].source, PaperSource::Arxiv);
    }

    #[tokio::test]
    async fn failed_adapter_degrades_to_empty_contribution() {
        let adapters: Vec<Box<dyn SourceAdapter>> = vec![
            Box::new(StubAdapter {
                source: PaperSource::OpenReview,
                titles: vec![],
                fail: true,
            }),
            Box::new(StubAdapter {
                source: PaperSource::Arxiv,
                titles: vec!["Survivor Paper"],
                fail: false,
            }),
        ];
        let http = HttpFetcher::new(HttpClientConfig::default()).unwrap();
        let ctx = FetchContext::new();
        let records = collect_from_adapters("ICML", 2025, &adapters, &http, &ctx).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source, PaperSource::Arxiv);
    }

    struct CountingModel {
        summarize_calls: AtomicUsize,
    }

    #[async_trait]
    impl LanguageModel for CountingModel {
        async fn batch_summarize(&self, papers: &[PaperDigest]) -> Vec<Summary> {
            self.summarize_calls.fetch_add(1, Ordering::SeqCst);
            papers
                .iter()
                .map(|p| Summary {
                    paper_id: p.id,
                    tldr_en: format!("tldr for {}", p.title),
                    tldr_zh: "中文摘要".to_string(),
                })
                .collect()
        }

        async fn cluster_papers(&self, papers: &[StoredPaper]) -> Vec<ClusterAssignment> {
            papers
                .iter()
                .map(|p| ClusterAssignment {
                    paper_id: p.id,
                    label: "optimization".to_string(),
                })
                .collect()
        }

        async fn summarize_trend(&self, clusters: &[(String, i64)]) -> Option<String> {
            clusters.first().map(|(label, n)| format!("{n} papers on {label}"))
        }

        async fn readme_is_placeholder(&self, _readme: &str) -> bool {
            false
        }
    }

    struct StallingModel {
        summarize_calls: AtomicUsize,
    }

    #[async_trait]
    impl LanguageModel for StallingModel {
        async fn batch_summarize(&self, _papers: &[PaperDigest]) -> Vec<Summary> {
            self.summarize_calls.fetch_add(1, Ordering::SeqCst);
            Vec::new()
        }

        async fn cluster_papers(&self, _papers: &[StoredPaper]) -> Vec<ClusterAssignment> {
            Vec::new()
        }

        async fn summarize_trend(&self, _clusters: &[(String, i64)]) -> Option<String> {
            None
        }

        async fn readme_is_placeholder(&self, _readme: &str) -> bool {
            false
        }
    }

    async fn seeded_store(count: usize) -> Store {
        let store = Store::in_memory().await.unwrap();
        store.init_schema().await.unwrap();
        let records: Vec<PaperRecord> = (0..count)
            .map(|i| PaperRecord {
                conference: "NeurIPS".to_string(),
                year: 2024,
                source: PaperSource::Arxiv,
                draft: PaperDraft {
                    title: format!("Paper {i}"),
                    abstract_text: format!("Abstract {i}"),
                    ..PaperDraft::default()
                },
            })
            .collect();
        store.insert_papers(&records).await.unwrap();
        store
    }

    #[tokio::test]
    async fn backlog_of_25_with_batch_10_takes_three_calls() {
        let store = seeded_store(25).await;
        let model = CountingModel {
            summarize_calls: AtomicUsize::new(0),
        };
        enrich_conference(&store, &model, "NeurIPS", 2024, 10)
            .await
            .unwrap();

        assert_eq!(model.summarize_calls.load(Ordering::SeqCst), 3);
        let remaining = store
            .papers_without_summary("NeurIPS", 2024, 100)
            .await
            .unwrap();
        assert!(remaining.is_empty());

        // clustering and trend landed too
        let counts = store.cluster_counts("NeurIPS", 2024).await.unwrap();
        assert_eq!(counts, vec![("optimization".to_string(), 25)]);
        assert_eq!(
            store.trend_for("NeurIPS", 2024).await.unwrap().as_deref(),
            Some("25 papers on optimization")
        );
    }

    #[tokio::test]
    async fn stalling_collaborator_does_not_livelock_the_loop() {
        let store = seeded_store(5).await;
        let model = StallingModel {
            summarize_calls: AtomicUsize::new(0),
        };
        enrich_conference(&store, &model, "NeurIPS", 2024, 10)
            .await
            .unwrap();

        // one attempt, then the unchanged backlog stops the loop
        assert_eq!(model.summarize_calls.load(Ordering::SeqCst), 1);
        let remaining = store
            .papers_without_summary("NeurIPS", 2024, 100)
            .await
            .unwrap();
        assert_eq!(remaining.len(), 5);
    }
}
