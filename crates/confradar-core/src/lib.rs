//! Core domain model for confradar.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const CRATE_NAME: &str = "confradar-core";

/// Where a harvested paper record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaperSource {
    OpenReview,
    Official,
    Arxiv,
}

impl PaperSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaperSource::OpenReview => "openreview",
            PaperSource::Official => "official",
            PaperSource::Arxiv => "arxiv",
        }
    }
}

impl fmt::Display for PaperSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaperSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openreview" => Ok(PaperSource::OpenReview),
            "official" => Ok(PaperSource::Official),
            "arxiv" => Ok(PaperSource::Arxiv),
            other => Err(format!("unknown paper source {other:?}")),
        }
    }
}

/// Normalized handoff contract from source adapters into the collector.
///
/// Every adapter converts its external record shape into this one type
/// before anything enters the merge/dedup pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PaperDraft {
    pub title: String,
    pub authors: String,
    pub affiliations: String,
    pub abstract_text: String,
    pub pdf_url: Option<String>,
    pub supplemental_url: Option<String>,
    pub arxiv_id: Option<String>,
    pub keywords: String,
}

/// A draft tagged with its conference/year/source, ready for storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperRecord {
    pub conference: String,
    pub year: i32,
    pub source: PaperSource,
    pub draft: PaperDraft,
}

/// A paper as persisted, with its storage id and insertion timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPaper {
    pub id: i64,
    pub conference: String,
    pub year: i32,
    pub source: Option<String>,
    pub title: String,
    pub authors: String,
    pub affiliations: String,
    pub abstract_text: String,
    pub pdf_url: Option<String>,
    pub supplemental_url: Option<String>,
    pub arxiv_id: Option<String>,
    pub keywords: String,
    pub created_at: Option<String>,
}

/// Minimal projection handed to the summarization collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperDigest {
    pub id: i64,
    pub title: String,
    pub abstract_text: String,
}

/// One-to-one enrichment of a paper: bilingual one-line summaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub paper_id: i64,
    pub tldr_en: String,
    pub tldr_zh: String,
}

/// Topic label assigned to a paper within one (conference, year) scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    pub paper_id: i64,
    pub label: String,
}

/// Tri-state credibility verdict for a linked code repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepoStatus {
    /// Repository unreachable or not found.
    None,
    /// Exists but looks empty, stub, or "code coming soon".
    Placeholder,
    /// Populated, recently active, plausibly the paper's code.
    Verified,
}

impl RepoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepoStatus::None => "None",
            RepoStatus::Placeholder => "Placeholder",
            RepoStatus::Verified => "Verified",
        }
    }
}

impl fmt::Display for RepoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RepoStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "None" => Ok(RepoStatus::None),
            "Placeholder" => Ok(RepoStatus::Placeholder),
            "Verified" => Ok(RepoStatus::Verified),
            other => Err(format!("unknown repo status {other:?}")),
        }
    }
}

/// Outcome of verifying one candidate repository URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeVerdict {
    pub status: RepoStatus,
    pub last_commit: Option<String>,
    pub has_readme: bool,
    pub has_code: bool,
}

impl CodeVerdict {
    /// Terminal verdict for an unreachable repository.
    pub fn unreachable() -> Self {
        Self {
            status: RepoStatus::None,
            last_commit: None,
            has_readme: false,
            has_code: false,
        }
    }
}

/// A verdict persisted against a (paper, url) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeLink {
    pub paper_id: i64,
    pub url: String,
    pub verdict: CodeVerdict,
}

/// A configured conference as persisted by the trigger engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConferenceRow {
    pub name: String,
    pub year: i32,
    pub deadline: Option<String>,
    pub triggered_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paper_source_round_trips_through_str() {
        for source in [PaperSource::OpenReview, PaperSource::Official, PaperSource::Arxiv] {
            assert_eq!(source.as_str().parse::<PaperSource>().unwrap(), source);
        }
        assert!("reddit".parse::<PaperSource>().is_err());
    }

    #[test]
    fn repo_status_strings_match_store_values() {
        assert_eq!(RepoStatus::None.as_str(), "None");
        assert_eq!(RepoStatus::Placeholder.as_str(), "Placeholder");
        assert_eq!(RepoStatus::Verified.as_str(), "Verified");
        assert_eq!("Verified".parse::<RepoStatus>().unwrap(), RepoStatus::Verified);
    }

    #[test]
    fn unreachable_verdict_carries_no_signals() {
        let verdict = CodeVerdict::unreachable();
        assert_eq!(verdict.status, RepoStatus::None);
        assert!(verdict.last_commit.is_none());
        assert!(!verdict.has_readme);
        assert!(!verdict.has_code);
    }
}
