//! Source adapter contracts + the arXiv / OpenReview / official-site adapters.
//!
//! Each adapter fetches raw candidate records from one external source and
//! normalizes them into [`PaperDraft`] before anything reaches the collector.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use confradar_core::{PaperDraft, PaperSource};
use confradar_storage::{FetchError, HttpFetcher};
use futures::StreamExt;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Reader;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "confradar-adapters";

pub const ARXIV_API: &str = "http://export.arxiv.org/api/query";
pub const OPENREVIEW_API: &str = "https://api.openreview.net";

/// How many OpenReview profile lookups may be in flight per note.
const AFFILIATION_FANOUT: usize = 8;

#[derive(Debug, Clone, Copy)]
pub struct FetchContext {
    pub run_id: Uuid,
    pub now: DateTime<Utc>,
}

impl FetchContext {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            now: Utc::now(),
        }
    }
}

impl Default for FetchContext {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("{0}")]
    Message(String),
}

/// One external paper source. `fetch` returns every candidate record the
/// source currently exposes; the caller decides how a failure degrades.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> PaperSource;

    async fn fetch(
        &self,
        http: &HttpFetcher,
        ctx: &FetchContext,
    ) -> Result<Vec<PaperDraft>, AdapterError>;
}

// ---------------------------------------------------------------------------
// arXiv
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ArxivAdapter {
    pub conference: String,
    pub year: i32,
    pub categories: Vec<String>,
    pub keywords: Vec<String>,
    pub max_results: usize,
    pub window_days: i64,
}

/// Boolean query ANDing the conference mention with category and keyword
/// OR-filters, e.g.
/// `(abs:"NeurIPS 2024" OR title:"NeurIPS 2024") AND (cat:cs.LG OR cat:cs.CV)`.
pub fn build_arxiv_query(
    conf_name: &str,
    year: i32,
    categories: &[String],
    keywords: &[String],
) -> String {
    let base_terms = format!("abs:\"{conf_name} {year}\" OR title:\"{conf_name} {year}\"");
    let mut parts = vec![format!("({base_terms})")];
    if !categories.is_empty() {
        let cats = categories
            .iter()
            .map(|c| format!("cat:{c}"))
            .collect::<Vec<_>>()
            .join(" OR ");
        parts.push(format!("({cats})"));
    }
    if !keywords.is_empty() {
        let kws = keywords
            .iter()
            .map(|kw| format!("abs:\"{kw}\""))
            .collect::<Vec<_>>()
            .join(" OR ");
        parts.push(format!("({kws})"));
    }
    parts.join(" AND ")
}

#[derive(Debug, Clone, Default)]
struct AtomLink {
    rel: String,
    title: String,
    content_type: String,
    href: String,
}

#[derive(Debug, Clone, Default)]
struct AtomAuthor {
    name: String,
    affiliations: Vec<String>,
}

/// Per-entry accumulator for the Atom parsing state machine.
#[derive(Debug, Default)]
struct EntryAccum {
    id: String,
    title: String,
    summary: String,
    published: String,
    authors: Vec<AtomAuthor>,
    links: Vec<AtomLink>,
}

impl EntryAccum {
    fn push_text(&mut self, tag: &str, text: &str, in_author: bool) {
        match tag {
            "id" => self.id.push_str(text),
            "title" => self.title.push_str(text),
            "summary" => self.summary.push_str(text),
            "published" => self.published.push_str(text),
            "name" if in_author => {
                if let Some(author) = self.authors.last_mut() {
                    author.name.push_str(text);
                }
            }
            "arxiv:affiliation" if in_author => {
                if let Some(author) = self.authors.last_mut() {
                    author.affiliations.push(text.to_string());
                }
            }
            _ => {}
        }
    }

    fn into_draft(self, keywords: &[String]) -> Option<PaperDraft> {
        if self.title.trim().is_empty() {
            return None;
        }

        // rel=related or a "supp*" titled link wins; a "doi" link is a
        // fallback that keeps scanning.
        let mut supplemental = None;
        for link in &self.links {
            if link.rel == "related" || link.title.to_lowercase().contains("supp") {
                supplemental = Some(link.href.clone());
                break;
            }
            if link.title.eq_ignore_ascii_case("doi") {
                supplemental = Some(link.href.clone());
            }
        }

        let pdf_url = self
            .links
            .iter()
            .find(|l| l.rel == "alternate" || l.content_type == "application/pdf")
            .map(|l| l.href.clone());

        let mut affiliations = Vec::new();
        for author in &self.authors {
            for aff in &author.affiliations {
                if !aff.is_empty() && !affiliations.contains(aff) {
                    affiliations.push(aff.clone());
                }
            }
        }

        let arxiv_id = self
            .id
            .rsplit("/abs/")
            .next()
            .unwrap_or(&self.id)
            .to_string();

        Some(PaperDraft {
            title: normalize_whitespace(&self.title),
            authors: self
                .authors
                .iter()
                .map(|a| a.name.trim().to_string())
                .filter(|n| !n.is_empty())
                .collect::<Vec<_>>()
                .join(", "),
            affiliations: affiliations.join("; "),
            abstract_text: self.summary.trim().to_string(),
            pdf_url,
            supplemental_url: supplemental,
            arxiv_id: if arxiv_id.is_empty() { None } else { Some(arxiv_id) },
            keywords: keywords.join(", "),
        })
    }
}

fn link_from_attrs(e: &BytesStart<'_>) -> AtomLink {
    let mut link = AtomLink::default();
    for attr in e.attributes().flatten() {
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let val = String::from_utf8_lossy(&attr.value).to_string();
        match key.as_str() {
            "rel" => link.rel = val,
            "title" => link.title = val,
            "type" => link.content_type = val,
            "href" => link.href = val,
            _ => {}
        }
    }
    link
}

/// Atom XML state machine for the arXiv query feed.
struct AtomParser {
    drafts: Vec<PaperDraft>,
    accum: EntryAccum,
    current_tag: String,
    in_entry: bool,
    in_author: bool,
    keywords: Vec<String>,
    /// Entries submitted before this `YYYYMMDD` day are dropped client-side.
    cutoff: String,
}

impl AtomParser {
    fn new(keywords: &[String], cutoff: &str) -> Self {
        Self {
            drafts: Vec::new(),
            accum: EntryAccum::default(),
            current_tag: String::new(),
            in_entry: false,
            in_author: false,
            keywords: keywords.to_vec(),
            cutoff: cutoff.to_string(),
        }
    }

    fn handle_start(&mut self, e: &BytesStart<'_>) {
        let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
        match tag.as_str() {
            "entry" => {
                self.in_entry = true;
                self.accum = EntryAccum::default();
            }
            "author" if self.in_entry => {
                self.in_author = true;
                self.accum.authors.push(AtomAuthor::default());
            }
            "link" if self.in_entry => self.accum.links.push(link_from_attrs(e)),
            _ if self.in_entry => self.current_tag = tag,
            _ => {}
        }
    }

    fn handle_empty(&mut self, e: &BytesStart<'_>) {
        if self.in_entry && e.name().as_ref() == b"link" {
            self.accum.links.push(link_from_attrs(e));
        }
    }

    fn handle_text(&mut self, e: &BytesText<'_>) {
        if !self.in_entry {
            return;
        }
        let Ok(text) = e.unescape() else {
            return;
        };
        let tag = self.current_tag.clone();
        self.accum.push_text(&tag, &text, self.in_author);
    }

    fn handle_end(&mut self, e: &BytesEnd<'_>) {
        match e.name().as_ref() {
            b"entry" => {
                let finished = std::mem::take(&mut self.accum);
                if submitted_on_or_after(&finished.published, &self.cutoff) {
                    if let Some(draft) = finished.into_draft(&self.keywords) {
                        self.drafts.push(draft);
                    }
                }
                self.in_entry = false;
                self.current_tag.clear();
            }
            b"author" => self.in_author = false,
            _ => self.current_tag.clear(),
        }
    }
}

fn submitted_on_or_after(published: &str, cutoff: &str) -> bool {
    if cutoff.is_empty() {
        return true;
    }
    let Some(day) = published.get(..10) else {
        return true;
    };
    day.replace('-', "").as_str() >= cutoff
}

/// Parse an arXiv Atom feed, dropping entries submitted before `cutoff`
/// (`YYYYMMDD`; empty disables the filter).
pub fn parse_arxiv_feed(xml: &str, keywords: &[String], cutoff: &str) -> Vec<PaperDraft> {
    let mut reader = Reader::from_str(xml);
    let mut parser = AtomParser::new(keywords, cutoff);

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => parser.handle_start(e),
            Ok(Event::Empty(ref e)) => parser.handle_empty(e),
            Ok(Event::Text(ref e)) => parser.handle_text(e),
            Ok(Event::End(ref e)) => parser.handle_end(e),
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }

    parser.drafts
}

fn normalize_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[async_trait]
impl SourceAdapter for ArxivAdapter {
    fn source(&self) -> PaperSource {
        PaperSource::Arxiv
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        ctx: &FetchContext,
    ) -> Result<Vec<PaperDraft>, AdapterError> {
        let query = build_arxiv_query(&self.conference, self.year, &self.categories, &self.keywords);
        let url = format!(
            "{ARXIV_API}?search_query=({})&sortBy=submittedDate&sortOrder=descending&max_results={}",
            urlencoding::encode(&query),
            self.max_results
        );
        debug!(%url, "querying arXiv");
        let xml = http.fetch_text(ctx.run_id, "arxiv", &url).await?;
        let cutoff = (ctx.now - Duration::days(self.window_days))
            .format("%Y%m%d")
            .to_string();
        Ok(parse_arxiv_feed(&xml, &self.keywords, &cutoff))
    }
}

// ---------------------------------------------------------------------------
// OpenReview
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OpenReviewAdapter {
    pub venue_id: String,
    pub limit: usize,
}

#[derive(Debug, Deserialize)]
struct NotesResponse {
    #[serde(default)]
    notes: Vec<Note>,
}

#[derive(Debug, Deserialize)]
struct Note {
    #[serde(default)]
    content: NoteContent,
}

#[derive(Debug, Default, Deserialize)]
struct NoteContent {
    #[serde(default)]
    title: String,
    #[serde(default)]
    authors: Vec<String>,
    #[serde(default)]
    authorids: Vec<String>,
    #[serde(default, rename = "abstract")]
    abstract_text: String,
    #[serde(default)]
    pdf: Option<String>,
    #[serde(default)]
    supplementary_material: Option<String>,
    #[serde(default)]
    keywords: Vec<String>,
}

/// Most recent history entry's institution from a profiles response.
/// The institution field is either `{name, domain}` or a bare string.
pub fn institution_from_profiles(value: &JsonValue) -> Option<String> {
    let history = value
        .get("profiles")?
        .as_array()?
        .first()?
        .get("content")?
        .get("history")?
        .as_array()?;
    let latest = history.last()?;
    match latest.get("institution")? {
        JsonValue::Object(map) => map
            .get("name")
            .or_else(|| map.get("domain"))
            .and_then(|v| v.as_str())
            .map(ToString::to_string),
        JsonValue::String(s) => Some(s.clone()),
        _ => None,
    }
}

impl OpenReviewAdapter {
    async fn author_affiliation(
        &self,
        http: &HttpFetcher,
        ctx: &FetchContext,
        author_id: &str,
    ) -> Option<String> {
        let url = format!(
            "{OPENREVIEW_API}/profiles?id={}",
            urlencoding::encode(author_id)
        );
        match http.fetch_json(ctx.run_id, "openreview", &url).await {
            Ok(value) => institution_from_profiles(&value),
            Err(err) => {
                debug!(author_id, %err, "OpenReview profile lookup failed");
                None
            }
        }
    }

    fn note_to_draft(content: NoteContent, affiliations: Vec<String>) -> PaperDraft {
        PaperDraft {
            title: content.title,
            authors: content.authors.join(", "),
            affiliations: affiliations.join("; "),
            abstract_text: content.abstract_text,
            pdf_url: content.pdf,
            supplemental_url: content.supplementary_material,
            arxiv_id: None,
            keywords: content.keywords.join(", "),
        }
    }
}

#[async_trait]
impl SourceAdapter for OpenReviewAdapter {
    fn source(&self) -> PaperSource {
        PaperSource::OpenReview
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        ctx: &FetchContext,
    ) -> Result<Vec<PaperDraft>, AdapterError> {
        let url = format!(
            "{OPENREVIEW_API}/notes?venueid={}&details=replyCount&limit={}",
            urlencoding::encode(&self.venue_id),
            self.limit
        );
        let value = http.fetch_json(ctx.run_id, "openreview", &url).await?;
        let response: NotesResponse = serde_json::from_value(value)
            .map_err(|e| AdapterError::Message(format!("unexpected notes payload: {e}")))?;

        let mut drafts = Vec::with_capacity(response.notes.len());
        for note in response.notes {
            // Per-author profile lookups dominate collector latency, so they
            // fan out with a bounded width while preserving author order.
            let affiliations: Vec<String> = futures::stream::iter(note.content.authorids.clone())
                .map(|aid| async move { self.author_affiliation(http, ctx, &aid).await })
                .buffered(AFFILIATION_FANOUT)
                .filter_map(|aff| async move { aff })
                .collect()
                .await;
            drafts.push(Self::note_to_draft(note.content, affiliations));
        }
        Ok(drafts)
    }
}

// ---------------------------------------------------------------------------
// Official listing page
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct OfficialSelectors {
    #[serde(default)]
    pub item: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub authors: Option<String>,
    #[serde(default)]
    pub affiliations: Option<String>,
    #[serde(default, rename = "abstract")]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub pdf: Option<String>,
    #[serde(default)]
    pub supplemental: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OfficialSiteAdapter {
    pub list_url: String,
    pub selectors: OfficialSelectors,
    pub keywords: Vec<String>,
}

fn parse_selector(raw: &str) -> Result<Selector, AdapterError> {
    Selector::parse(raw).map_err(|e| AdapterError::Message(format!("bad selector {raw:?}: {e}")))
}

fn element_text(el: ElementRef<'_>) -> String {
    normalize_whitespace(&el.text().collect::<Vec<_>>().join(" "))
}

fn select_first_text(item: ElementRef<'_>, selector: &str) -> Result<String, AdapterError> {
    let sel = parse_selector(selector)?;
    Ok(item.select(&sel).next().map(element_text).unwrap_or_default())
}

fn select_first_href(item: ElementRef<'_>, selector: &str) -> Result<Option<String>, AdapterError> {
    let sel = parse_selector(selector)?;
    Ok(item
        .select(&sel)
        .next()
        .and_then(|el| el.value().attr("href"))
        .map(ToString::to_string))
}

/// Selector text, falling back to an element attribute, then empty.
fn text_or_attr(
    item: ElementRef<'_>,
    selector: &Option<String>,
    attr: &str,
) -> Result<String, AdapterError> {
    match selector {
        Some(sel) => select_first_text(item, sel),
        None => Ok(item.value().attr(attr).unwrap_or_default().to_string()),
    }
}

/// Parse one listing page into drafts. Items with no extractable title are
/// dropped.
pub fn parse_official_listing(
    html: &str,
    selectors: &OfficialSelectors,
    keywords: &[String],
) -> Result<Vec<PaperDraft>, AdapterError> {
    let document = Html::parse_document(html);
    let item_sel = parse_selector(selectors.item.as_deref().unwrap_or("li"))?;

    let mut drafts = Vec::new();
    for item in document.select(&item_sel) {
        let title = match &selectors.title {
            Some(sel) => select_first_text(item, sel)?,
            None => element_text(item),
        };
        if title.is_empty() {
            continue;
        }

        let authors = text_or_attr(item, &selectors.authors, "data-authors")?;
        let abstract_text = text_or_attr(item, &selectors.abstract_text, "data-abstract")?;
        let affiliations = text_or_attr(item, &selectors.affiliations, "data-affiliations")?;
        let pdf_url = match &selectors.pdf {
            Some(sel) => select_first_href(item, sel)?,
            None => None,
        };
        let supplemental_url = match &selectors.supplemental {
            Some(sel) => select_first_href(item, sel)?,
            None => None,
        };

        drafts.push(PaperDraft {
            title,
            authors,
            affiliations,
            abstract_text,
            pdf_url,
            supplemental_url,
            arxiv_id: None,
            keywords: keywords.join(", "),
        });
    }
    Ok(drafts)
}

#[async_trait]
impl SourceAdapter for OfficialSiteAdapter {
    fn source(&self) -> PaperSource {
        PaperSource::Official
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        ctx: &FetchContext,
    ) -> Result<Vec<PaperDraft>, AdapterError> {
        let html = http.fetch_text(ctx.run_id, "official", &self.list_url).await?;
        let drafts = parse_official_listing(&html, &self.selectors, &self.keywords)?;
        if drafts.is_empty() {
            warn!(url = %self.list_url, "official listing yielded no items");
        }
        Ok(drafts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn arxiv_query_ands_conference_categories_and_keywords() {
        let query = build_arxiv_query(
            "NeurIPS",
            2024,
            &strings(&["cs.LG", "cs.CV"]),
            &strings(&["diffusion"]),
        );
        assert_eq!(
            query,
            "(abs:\"NeurIPS 2024\" OR title:\"NeurIPS 2024\") \
             AND (cat:cs.LG OR cat:cs.CV) AND (abs:\"diffusion\")"
        );
    }

    #[test]
    fn arxiv_query_without_filters_is_just_the_base_terms() {
        let query = build_arxiv_query("ICML", 2025, &[], &[]);
        assert_eq!(query, "(abs:\"ICML 2025\" OR title:\"ICML 2025\")");
    }

    const ATOM_FIXTURE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:arxiv="http://arxiv.org/schemas/atom">
  <entry>
    <id>http://arxiv.org/abs/2401.01234v2</id>
    <title>Efficient  Sparse
 Training</title>
    <summary>We train sparsely.</summary>
    <published>2024-01-20T12:00:00Z</published>
    <author>
      <name>Ada Lovelace</name>
      <arxiv:affiliation>Analytical Engine Lab</arxiv:affiliation>
    </author>
    <author>
      <name>Alan Turing</name>
      <arxiv:affiliation>Analytical Engine Lab</arxiv:affiliation>
    </author>
    <link rel="related" href="https://example.org/supp.zip"/>
    <link title="pdf" type="application/pdf" href="http://arxiv.org/pdf/2401.01234v2"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2312.00001v1</id>
    <title>Stale Result</title>
    <summary>Old.</summary>
    <published>2023-12-01T00:00:00Z</published>
    <author><name>Old Timer</name></author>
  </entry>
</feed>"#;

    #[test]
    fn atom_feed_parses_entry_metadata() {
        let drafts = parse_arxiv_feed(ATOM_FIXTURE, &strings(&["sparsity"]), "");
        assert_eq!(drafts.len(), 2);

        let first = &drafts[0];
        assert_eq!(first.title, "Efficient Sparse Training");
        assert_eq!(first.authors, "Ada Lovelace, Alan Turing");
        // duplicate affiliation collapsed
        assert_eq!(first.affiliations, "Analytical Engine Lab");
        assert_eq!(first.arxiv_id.as_deref(), Some("2401.01234v2"));
        assert_eq!(
            first.supplemental_url.as_deref(),
            Some("https://example.org/supp.zip")
        );
        assert_eq!(
            first.pdf_url.as_deref(),
            Some("http://arxiv.org/pdf/2401.01234v2")
        );
        assert_eq!(first.keywords, "sparsity");
    }

    #[test]
    fn atom_feed_drops_entries_before_cutoff() {
        let drafts = parse_arxiv_feed(ATOM_FIXTURE, &[], "20240101");
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].title, "Efficient Sparse Training");
    }

    #[test]
    fn doi_link_is_a_supplemental_fallback() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom"><entry>
            <id>http://arxiv.org/abs/1.1</id>
            <title>T</title>
            <published>2024-01-01T00:00:00Z</published>
            <link title="doi" href="https://doi.org/x"/>
        </entry></feed>"#;
        let drafts = parse_arxiv_feed(xml, &[], "");
        assert_eq!(drafts[0].supplemental_url.as_deref(), Some("https://doi.org/x"));
    }

    #[test]
    fn institution_prefers_name_then_domain_then_bare_string() {
        let with_name = json!({"profiles": [{"content": {"history": [
            {"institution": {"name": "Old U"}},
            {"institution": {"name": "MIT", "domain": "mit.edu"}}
        ]}}]});
        assert_eq!(institution_from_profiles(&with_name).as_deref(), Some("MIT"));

        let domain_only = json!({"profiles": [{"content": {"history": [
            {"institution": {"domain": "mit.edu"}}
        ]}}]});
        assert_eq!(
            institution_from_profiles(&domain_only).as_deref(),
            Some("mit.edu")
        );

        let bare = json!({"profiles": [{"content": {"history": [
            {"institution": "ETH Zurich"}
        ]}}]});
        assert_eq!(institution_from_profiles(&bare).as_deref(), Some("ETH Zurich"));

        let empty = json!({"profiles": [{"content": {"history": []}}]});
        assert_eq!(institution_from_profiles(&empty), None);
        assert_eq!(institution_from_profiles(&json!({"profiles": []})), None);
    }

    #[test]
    fn openreview_note_normalizes_to_draft() {
        let content: NoteContent = serde_json::from_value(json!({
            "title": "Bandits in the Wild",
            "authors": ["A. One", "B. Two"],
            "authorids": ["~a1", "~b2"],
            "abstract": "We explore.",
            "pdf": "/pdf/abc.pdf",
            "keywords": ["bandits", "rl"]
        }))
        .unwrap();
        let draft =
            OpenReviewAdapter::note_to_draft(content, vec!["CMU".into(), "Oxford".into()]);
        assert_eq!(draft.title, "Bandits in the Wild");
        assert_eq!(draft.authors, "A. One, B. Two");
        assert_eq!(draft.affiliations, "CMU; Oxford");
        assert_eq!(draft.pdf_url.as_deref(), Some("/pdf/abc.pdf"));
        assert_eq!(draft.keywords, "bandits, rl");
        assert!(draft.arxiv_id.is_none());
    }

    const LISTING_FIXTURE: &str = r#"<html><body><ul>
      <li class="paper" data-affiliations="Acme Labs">
        <h3>Robust Widgets</h3>
        <span class="authors">C. Three</span>
        <p class="abstract">Widgets that resist noise.</p>
        <a class="pdf" href="/papers/widgets.pdf">pdf</a>
        <a class="supp" href="/papers/widgets-supp.pdf">supp</a>
      </li>
      <li class="paper"><span class="authors">No Title</span></li>
    </ul></body></html>"#;

    #[test]
    fn official_listing_extracts_fields_and_drops_untitled_items() {
        let selectors = OfficialSelectors {
            item: Some("li.paper".into()),
            title: Some("h3".into()),
            authors: Some("span.authors".into()),
            abstract_text: Some("p.abstract".into()),
            pdf: Some("a.pdf".into()),
            supplemental: Some("a.supp".into()),
            affiliations: None,
        };
        let drafts =
            parse_official_listing(LISTING_FIXTURE, &selectors, &strings(&["widgets"])).unwrap();
        assert_eq!(drafts.len(), 1);
        let draft = &drafts[0];
        assert_eq!(draft.title, "Robust Widgets");
        assert_eq!(draft.authors, "C. Three");
        assert_eq!(draft.abstract_text, "Widgets that resist noise.");
        // no affiliations selector: falls back to the data- attribute
        assert_eq!(draft.affiliations, "Acme Labs");
        assert_eq!(draft.pdf_url.as_deref(), Some("/papers/widgets.pdf"));
        assert_eq!(
            draft.supplemental_url.as_deref(),
            Some("/papers/widgets-supp.pdf")
        );
        assert_eq!(draft.keywords, "widgets");
    }

    #[test]
    fn official_listing_attribute_fallbacks_apply_without_selectors() {
        let html = r#"<ul><li data-authors="D. Four" data-abstract="Terse.">
            <b>Attr Fallback Paper</b></li></ul>"#;
        let selectors = OfficialSelectors {
            item: Some("li".into()),
            title: Some("b".into()),
            ..OfficialSelectors::default()
        };
        let drafts = parse_official_listing(html, &selectors, &[]).unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].authors, "D. Four");
        assert_eq!(drafts[0].abstract_text, "Terse.");
        assert_eq!(drafts[0].affiliations, "");
    }

    #[test]
    fn bad_selector_is_reported_not_panicked() {
        let selectors = OfficialSelectors {
            item: Some(":::".into()),
            ..OfficialSelectors::default()
        };
        assert!(parse_official_listing("<ul></ul>", &selectors, &[]).is_err());
    }
}
