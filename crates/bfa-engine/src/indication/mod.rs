// crates/bfa-engine/src/indication/mod.rs
// Evaluates one indication against one build's content
//
// Line kinds (build log, file) need the pattern to match a whole line and
// take the first such line as the excerpt. The multi-line kind searches
// the whole text and takes the first match.

mod content;

pub use content::BuildContent;

use crate::error::{BfaError, Result};
use bfa_types::{Indication, IndicationKind};
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Outcome of evaluating one indication
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MatchResult {
    pub excerpt: Option<String>,
}

impl MatchResult {
    pub fn no_match() -> Self {
        Self { excerpt: None }
    }

    pub fn matched(excerpt: impl Into<String>) -> Self {
        Self {
            excerpt: Some(excerpt.into()),
        }
    }

    pub fn is_match(&self) -> bool {
        self.excerpt.is_some()
    }
}

/// Compile the regex an indication will run with
pub fn compile_pattern(indication: &Indication) -> Result<Regex> {
    let source = match indication.kind {
        IndicationKind::BuildLog | IndicationKind::File => {
            format!("^(?:{})$", indication.pattern)
        }
        IndicationKind::MultilineBuildLog => format!("(?m){}", indication.pattern),
        IndicationKind::Unsupported => {
            return Err(BfaError::UnsupportedIndication(
                indication.kind.as_str().to_string(),
            ));
        }
    };
    Regex::new(&source).map_err(|e| BfaError::InvalidPattern {
        pattern: indication.pattern.clone(),
        reason: e.to_string(),
    })
}

/// First whole line of `text` matched by `regex`
fn first_matching_line(regex: &Regex, text: &str) -> Option<String> {
    text.lines()
        .find(|line| regex.is_match(line))
        .map(|line| line.to_string())
}

/// Indication matcher with a compiled-pattern cache
///
/// Shared by every scan; the cache is keyed by kind and pattern so two
/// causes using the same rule compile it once.
#[derive(Default)]
pub struct IndicationMatcher {
    compiled: Mutex<HashMap<(IndicationKind, String), Arc<Regex>>>,
}

impl IndicationMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn regex_for(&self, indication: &Indication) -> Result<Arc<Regex>> {
        let key = (indication.kind, indication.pattern.clone());
        if let Ok(cache) = self.compiled.lock()
            && let Some(regex) = cache.get(&key)
        {
            return Ok(regex.clone());
        }

        let regex = Arc::new(compile_pattern(indication)?);
        if let Ok(mut cache) = self.compiled.lock() {
            cache.insert(key, regex.clone());
        }
        Ok(regex)
    }

    /// Evaluate `indication` against the build behind `content`
    ///
    /// `Err` means the indication could not be evaluated at all
    /// (unsupported kind, malformed pattern, host read failure).
    pub async fn match_indication(
        &self,
        indication: &Indication,
        content: &mut BuildContent<'_>,
    ) -> Result<MatchResult> {
        let regex = self.regex_for(indication)?;

        match indication.kind {
            IndicationKind::BuildLog => {
                let Some(log) = content.log().await? else {
                    return Ok(MatchResult::no_match());
                };
                Ok(MatchResult {
                    excerpt: first_matching_line(&regex, &log),
                })
            }
            IndicationKind::MultilineBuildLog => {
                let Some(log) = content.log().await? else {
                    return Ok(MatchResult::no_match());
                };
                Ok(MatchResult {
                    excerpt: regex.find(&log).map(|m| m.as_str().to_string()),
                })
            }
            IndicationKind::File => {
                let path = indication
                    .file_path
                    .as_deref()
                    .filter(|p| !p.trim().is_empty())
                    .ok_or_else(|| {
                        BfaError::Validation("file indication without a path".to_string())
                    })?;
                let Some(text) = content.file(path).await? else {
                    return Ok(MatchResult::no_match());
                };
                Ok(MatchResult {
                    excerpt: first_matching_line(&regex, &text),
                })
            }
            IndicationKind::Unsupported => Err(BfaError::UnsupportedIndication(
                indication.kind.as_str().to_string(),
            )),
        }
    }
}
