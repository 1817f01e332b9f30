// crates/bfa-types/src/lib.rs
// Shared types for the build failure analyzer
// Pure data only: no storage, no regex, no async

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════
// INDICATIONS
// ═══════════════════════════════════════

/// What part of a build an indication looks at
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IndicationKind {
    /// Pattern must match one whole line of the build log
    BuildLog,
    /// Pattern is searched across the whole log text, spanning lines
    MultilineBuildLog,
    /// Pattern must match one whole line of a file produced by the build
    File,
    /// Kind tag not recognised by this version
    #[serde(other)]
    Unsupported,
}

impl IndicationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BuildLog => "build_log",
            Self::MultilineBuildLog => "multiline_build_log",
            Self::File => "file",
            Self::Unsupported => "unsupported",
        }
    }
}

/// One detection rule attached to a failure cause
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Indication {
    pub kind: IndicationKind,
    /// Regular expression
    pub pattern: String,
    /// Artifact path, only meaningful for `IndicationKind::File`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

impl Indication {
    pub fn build_log(pattern: impl Into<String>) -> Self {
        Self {
            kind: IndicationKind::BuildLog,
            pattern: pattern.into(),
            file_path: None,
        }
    }

    pub fn multiline_build_log(pattern: impl Into<String>) -> Self {
        Self {
            kind: IndicationKind::MultilineBuildLog,
            pattern: pattern.into(),
            file_path: None,
        }
    }

    pub fn file(path: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            kind: IndicationKind::File,
            pattern: pattern.into(),
            file_path: Some(path.into()),
        }
    }
}

// ═══════════════════════════════════════
// FAILURE CAUSES
// ═══════════════════════════════════════

/// A named, reusable description of a known failure mode
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FailureCause {
    /// Assigned by the knowledge base on first persistence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub last_occurred: Option<DateTime<Utc>>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub indications: Vec<Indication>,
}

impl FailureCause {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    /// Add a category, ignoring duplicates
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        let category = category.into();
        if !self.categories.contains(&category) {
            self.categories.push(category);
        }
        self
    }

    pub fn with_indication(mut self, indication: Indication) -> Self {
        self.indications.push(indication);
        self
    }

    /// The assigned id, or "" before first persistence
    pub fn id_str(&self) -> &str {
        self.id.as_deref().unwrap_or("")
    }

    pub fn has_id(&self) -> bool {
        self.id.as_deref().is_some_and(|id| !id.trim().is_empty())
    }
}

// ═══════════════════════════════════════
// SCAN RESULTS
// ═══════════════════════════════════════

/// An indication that matched, with the text it matched
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FoundIndication {
    pub indication: Indication,
    pub excerpt: String,
}

/// A failure cause that matched a specific build
///
/// Holds a snapshot of the cause so later edits in the knowledge base do
/// not rewrite history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FoundFailureCause {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub categories: Vec<String>,
    pub indications: Vec<FoundIndication>,
}

impl FoundFailureCause {
    pub fn from_cause(cause: &FailureCause, indications: Vec<FoundIndication>) -> Self {
        Self {
            id: cause.id_str().to_string(),
            name: cause.name.clone(),
            description: cause.description.clone(),
            categories: cause.categories.clone(),
            indications,
        }
    }
}

/// Outcome classification reported by the host for a finished build
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuildResult {
    Success,
    Unstable,
    Failure,
    NotBuilt,
    Aborted,
}

impl BuildResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Unstable => "unstable",
            Self::Failure => "failure",
            Self::NotBuilt => "not_built",
            Self::Aborted => "aborted",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "unstable" => Some(Self::Unstable),
            "failure" => Some(Self::Failure),
            "not_built" => Some(Self::NotBuilt),
            "aborted" => Some(Self::Aborted),
            _ => None,
        }
    }
}

/// One record per scan, for backends that keep statistics
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanStatistics {
    pub build_id: String,
    pub project_name: String,
    pub timestamp: DateTime<Utc>,
    pub result: Option<BuildResult>,
    pub cause_ids: Vec<String>,
}

// ═══════════════════════════════════════
// DISPLAY
// ═══════════════════════════════════════

/// Links to the project and build a display node describes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Links {
    pub project_url: String,
    pub project_name: String,
    pub build_url: String,
    pub build_name: String,
}

/// Found causes of one build plus the same data for its downstream builds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FailureCauseDisplayData {
    pub links: Option<Links>,
    pub found_failure_causes: Option<Vec<FoundFailureCause>>,
    #[serde(default)]
    pub downstream: Vec<FailureCauseDisplayData>,
}

impl FailureCauseDisplayData {
    pub fn new(links: Links) -> Self {
        Self {
            links: Some(links),
            ..Default::default()
        }
    }

    /// True if this node itself has at least one found cause
    pub fn has_direct_causes(&self) -> bool {
        self.found_failure_causes
            .as_ref()
            .is_some_and(|causes| !causes.is_empty())
    }

    /// True if neither this node nor anything downstream found a cause
    pub fn is_empty(&self) -> bool {
        !self.has_direct_causes() && self.downstream.iter().all(|d| d.is_empty())
    }
}
