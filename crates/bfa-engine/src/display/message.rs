// crates/bfa-engine/src/display/message.rs
// Build-completed message for review and notification tools

use bfa_types::FailureCauseDisplayData;

pub const DEFAULT_NO_CAUSES_TEXT: &str = "No failure causes found";

/// Join a host root and a relative build url with exactly one slash
pub fn join_url(base_url: &str, path: &str) -> String {
    if base_url.is_empty() {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[derive(Debug, Clone)]
pub struct MessageFormatter {
    base_url: String,
    no_causes_text: String,
}

impl MessageFormatter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            no_causes_text: DEFAULT_NO_CAUSES_TEXT.to_string(),
        }
    }

    pub fn with_no_causes_text(mut self, text: impl Into<String>) -> Self {
        self.no_causes_text = text.into();
        self
    }

    /// One entry per found cause, top-down, each with the link of the build
    /// it was found on. Falls back to the no-causes text for an empty tree.
    pub fn format(&self, data: &FailureCauseDisplayData) -> String {
        let mut entries = Vec::new();
        self.collect(data, &mut entries);
        if !entries.is_empty() {
            return entries.join("\n\n");
        }

        let top_url = data
            .links
            .as_ref()
            .map(|l| l.build_url.as_str())
            .unwrap_or_default();
        self.entry(&self.no_causes_text, top_url)
    }

    fn collect(&self, node: &FailureCauseDisplayData, entries: &mut Vec<String>) {
        let build_url = node
            .links
            .as_ref()
            .map(|l| l.build_url.as_str())
            .unwrap_or_default();
        for cause in node.found_failure_causes.iter().flatten() {
            entries.push(self.entry(&cause.description, build_url));
        }
        for downstream in &node.downstream {
            self.collect(downstream, entries);
        }
    }

    /// Single quotes in `text` become double quotes
    fn entry(&self, text: &str, build_url: &str) -> String {
        format!(
            "{} ( {} )",
            text.replace('\'', "\""),
            join_url(&self.base_url, build_url)
        )
    }
}

pub fn build_completed_message(data: &FailureCauseDisplayData, base_url: &str) -> String {
    MessageFormatter::new(base_url).format(data)
}
