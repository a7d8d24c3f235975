//! Fixed catalog of user-facing message templates.
//!
//! Templates use `{name}` placeholders substituted by the renderer. The
//! placeholder sets are validated by a test, not on every render.

/// Message keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Msg {
    /// Issue message body.
    IssueBody,
    /// Assignee line value when nobody took the issue yet.
    NotAssigned,
    /// Status label shown on archived messages.
    StatusArchived,
    /// Shown in place of an empty issue summary.
    SummaryMissing,
    /// Shown in place of a URL when none can be built.
    IssueNoUrl,
    /// Toast after a successful (or duplicate) accept press.
    CallbackAccepted,
    /// Alert shown when the tracker refuses the assignment.
    CallbackAssignFailed,
}

impl Msg {
    pub const ALL: [Msg; 7] = [
        Msg::IssueBody,
        Msg::NotAssigned,
        Msg::StatusArchived,
        Msg::SummaryMissing,
        Msg::IssueNoUrl,
        Msg::CallbackAccepted,
        Msg::CallbackAssignFailed,
    ];

    /// Placeholders each template must contain, exactly.
    pub fn placeholders(self) -> &'static [&'static str] {
        match self {
            Msg::IssueBody => &["issue_id", "summary", "url", "description"],
            _ => &[],
        }
    }
}

/// Template text for a message key.
pub fn render(msg: Msg) -> &'static str {
    match msg {
        Msg::IssueBody => "<b>{issue_id}</b>: {summary}\n{url}\n\n{description}",
        Msg::NotAssigned => "Not assigned",
        Msg::StatusArchived => "Archived",
        Msg::SummaryMissing => "No subject",
        Msg::IssueNoUrl => "link unavailable",
        Msg::CallbackAccepted => "Issue accepted",
        Msg::CallbackAssignFailed => "Could not assign the issue, open the tracker",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn found_placeholders(template: &str) -> BTreeSet<String> {
        let re = regex::Regex::new(r"\{([a-z_]+)\}").unwrap();
        re.captures_iter(template)
            .map(|c| c[1].to_string())
            .collect()
    }

    #[test]
    fn every_template_has_exactly_its_declared_placeholders() {
        for msg in Msg::ALL {
            let expected: BTreeSet<String> =
                msg.placeholders().iter().map(|p| p.to_string()).collect();
            let found = found_placeholders(render(msg));
            assert_eq!(found, expected, "placeholder mismatch for {msg:?}");
        }
    }

    #[test]
    fn templates_are_non_empty() {
        for msg in Msg::ALL {
            assert!(!render(msg).is_empty(), "empty template for {msg:?}");
        }
    }
}
