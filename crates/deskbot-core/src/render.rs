//! Telegram message rendering for issue notifications.

use std::sync::LazyLock;

use regex::Regex;

use crate::messages::{Msg, render};

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static BR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").unwrap());
static BLOCK_END_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</(p|div|li|tr)>").unwrap());
static MULTI_NEWLINE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Issue fields ready for rendering.
#[derive(Debug, Clone, Default)]
pub struct IssueView<'a> {
    pub issue_id: &'a str,
    pub summary: &'a str,
    /// Plain-text description, already stripped of markup.
    pub description: &'a str,
    pub url: &'a str,
    pub author: Option<&'a str>,
    pub status: Option<&'a str>,
    pub assignee: Option<&'a str>,
}

/// Escape the characters Telegram HTML parse mode treats specially.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Convert tracker HTML to plain text: line breaks survive, tags do not.
pub fn strip_html(text: &str) -> String {
    let text = BR_RE.replace_all(text, "\n");
    let text = BLOCK_END_RE.replace_all(&text, "\n");
    let text = TAG_RE.replace_all(&text, "");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    MULTI_NEWLINE_RE.replace_all(&text, "\n\n").trim().to_string()
}

/// Collapse whitespace runs and substitute a placeholder for empty summaries.
pub fn normalize_issue_summary(summary: &str) -> String {
    let collapsed = WHITESPACE_RE.replace_all(summary.trim(), " ").to_string();
    if collapsed.is_empty() {
        render(Msg::SummaryMissing).to_string()
    } else {
        collapsed
    }
}

/// Cap a description at `max_len` characters, appending an ellipsis when cut.
pub fn truncate_description(description: &str, max_len: usize) -> String {
    if description.chars().count() <= max_len {
        return description.to_string();
    }
    let mut truncated: String = description.chars().take(max_len).collect();
    truncated.push('…');
    truncated
}

/// Browser URL for an issue, or a fallback label when none can be built.
pub fn build_issue_url(base_url: &str, issue_id: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.is_empty() || issue_id.trim().is_empty() {
        return render(Msg::IssueNoUrl).to_string();
    }
    format!("{base}/issue/{issue_id}")
}

/// Status marker shown before the issue id.
pub fn status_emoji(status: &str, target_status: &str) -> &'static str {
    let status = status.trim();
    if status.is_empty() {
        return "🟤";
    }
    if status.to_lowercase() == target_status.trim().to_lowercase() {
        return "🟡";
    }
    if status == render(Msg::StatusArchived) {
        return "⚪";
    }
    if status.eq_ignore_ascii_case("in progress") {
        return "🟢";
    }
    "🟤"
}

/// Render the full HTML notification message for an issue.
pub fn format_issue_message(view: &IssueView<'_>, target_status: &str, max_len: usize) -> String {
    let summary = escape_html(&normalize_issue_summary(view.summary));
    let description = escape_html(&truncate_description(view.description.trim(), max_len));
    let emoji = status_emoji(view.status.unwrap_or(""), target_status);

    let body = render(Msg::IssueBody)
        .replace("{issue_id}", &escape_html(view.issue_id))
        .replace("{summary}", &summary)
        .replace("{url}", view.url)
        .replace("{description}", &description);

    let mut text = format!("{emoji} {}", body.trim_end());

    if let Some(author) = trimmed(view.author) {
        text.push_str(&format!("\n\n👤 {}", escape_html(author)));
    }
    let assignee = trimmed(view.assignee).unwrap_or(render(Msg::NotAssigned));
    text.push_str(&format!("\n🔧 {}", escape_html(assignee)));
    if let Some(status) = trimmed(view.status) {
        text.push_str(&format!("\n📍 {}", escape_html(status)));
    }
    text
}

fn trimmed(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
