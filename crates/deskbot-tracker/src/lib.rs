//! # DeskBot Tracker
//!
//! REST client for a YouTrack-compatible issue tracker. Implements the
//! [`TrackerApi`] seam plus the custom-field plumbing assignments need.

use async_trait::async_trait;
use serde_json::{Value, json};

use deskbot_core::traits::TrackerApi;
use deskbot_core::types::IssueDetails;
use deskbot_core::{DeskBotError, Result};

const MAX_ATTEMPTS: u32 = 3;
const RETRY_DELAY: std::time::Duration = std::time::Duration::from_secs(1);

const ISSUE_FIELDS: &str =
    "idReadable,summary,description,reporter(fullName,login),customFields(name,value(name,fullName,login))";
const CUSTOM_FIELD_FIELDS: &str =
    "id,name,projectCustomField(field(name),bundle(values(id,name)))";

pub struct TrackerClient {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

fn tracker_err(e: impl std::fmt::Display) -> DeskBotError {
    DeskBotError::Tracker(e.to_string())
}

impl TrackerClient {
    pub fn new(base_url: &str, token: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// GET a JSON document, retrying transient (network / 5xx) failures.
    /// `Ok(None)` means 404.
    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Option<Value>> {
        let url = format!("{}{path}", self.base_url);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let response = self
                .client
                .get(&url)
                .bearer_auth(&self.token)
                .header("Accept", "application/json")
                .query(query)
                .send()
                .await;
            let response = match response {
                Ok(r) => r,
                Err(e) if attempt < MAX_ATTEMPTS => {
                    tracing::warn!("Tracker GET {path} attempt {attempt} failed: {e}, retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                    continue;
                }
                Err(e) => return Err(tracker_err(format!("GET {path} failed: {e}"))),
            };

            let status = response.status();
            if status == reqwest::StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if status.is_server_error() && attempt < MAX_ATTEMPTS {
                tracing::warn!("Tracker GET {path} returned {status}, retrying");
                tokio::time::sleep(RETRY_DELAY).await;
                continue;
            }
            if !status.is_success() {
                return Err(tracker_err(format!("GET {path} returned {status}")));
            }
            let body: Value = response
                .json()
                .await
                .map_err(|e| tracker_err(format!("GET {path} returned bad JSON: {e}")))?;
            return Ok(Some(body));
        }
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<bool> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
            .query(&[("fields", "id")])
            .json(body)
            .send()
            .await
            .map_err(|e| tracker_err(format!("POST {path} failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            tracing::warn!("Tracker POST {path} returned {status}");
        }
        Ok(status.is_success())
    }

    /// Resolve a readable issue key (`DESK-1`) to the tracker's internal id.
    pub async fn resolve_issue_id(&self, readable_id: &str) -> Result<Option<String>> {
        let query = format!("issue id: {readable_id}");
        let body = self
            .get_json("/api/issues", &[("query", &query), ("fields", "id,idReadable")])
            .await?;
        let Some(body) = body else { return Ok(None) };
        let found = body.as_array().into_iter().flatten().find(|issue| {
            issue["idReadable"]
                .as_str()
                .is_some_and(|id| id.eq_ignore_ascii_case(readable_id))
        });
        Ok(found.and_then(|issue| issue["id"].as_str().map(String::from)))
    }

    /// Fetch a custom field of an issue, with its value bundle.
    pub async fn fetch_custom_field(
        &self,
        issue_id: &str,
        field_name: &str,
    ) -> Result<Option<Value>> {
        let body = self
            .get_json(
                &format!("/api/issues/{issue_id}/customFields"),
                &[("fields", CUSTOM_FIELD_FIELDS)],
            )
            .await?;
        let Some(body) = body else { return Ok(None) };
        let found = body.as_array().into_iter().flatten().find(|field| {
            field["name"].as_str() == Some(field_name)
                || field["projectCustomField"]["field"]["name"].as_str() == Some(field_name)
        });
        Ok(found.cloned())
    }

    /// Write a custom field value.
    pub async fn set_custom_field(
        &self,
        issue_id: &str,
        field_id: &str,
        value: Value,
    ) -> Result<bool> {
        self.post_json(
            &format!("/api/issues/{issue_id}/customFields/{field_id}"),
            &json!({ "value": value }),
        )
        .await
    }

    /// Move an issue to a named state, resolving the bundle value id first.
    pub async fn set_issue_state(&self, issue_id: &str, state_name: &str) -> Result<bool> {
        let Some(field) = self.fetch_custom_field(issue_id, "State").await? else {
            tracing::warn!("Issue {issue_id} has no State field");
            return Ok(false);
        };
        let Some(field_id) = field["id"].as_str() else { return Ok(false) };
        let Some(value_id) = resolve_state_value_id(&field, state_name) else {
            tracing::warn!("State '{state_name}' not found in the bundle of {issue_id}");
            return Ok(false);
        };
        self.set_custom_field(issue_id, field_id, json!({ "id": value_id })).await
    }
}

/// Find the bundle value id matching a display name, case-insensitively.
pub fn resolve_state_value_id(field: &Value, state_name: &str) -> Option<String> {
    let values = field["projectCustomField"]["bundle"]["values"].as_array()?;
    values
        .iter()
        .find(|v| {
            v["name"]
                .as_str()
                .is_some_and(|name| name.eq_ignore_ascii_case(state_name.trim()))
        })
        .and_then(|v| v["id"].as_str().map(String::from))
}

/// Map a raw issue document onto [`IssueDetails`].
pub fn parse_issue_details(body: &Value) -> IssueDetails {
    let mut details = IssueDetails {
        summary: body["summary"].as_str().unwrap_or("").to_string(),
        description: body["description"].as_str().map(String::from),
        author: person_name(&body["reporter"]),
        status: None,
        assignee: None,
    };
    for field in body["customFields"].as_array().into_iter().flatten() {
        match field["name"].as_str() {
            Some("State") | Some("Status") => {
                details.status = field["value"]["name"].as_str().map(String::from);
            }
            Some("Assignee") => {
                // Single-user fields hold an object, multi-user fields an array.
                details.assignee = person_name(&field["value"]).or_else(|| {
                    field["value"]
                        .as_array()
                        .and_then(|users| users.first())
                        .and_then(person_name)
                });
            }
            _ => {}
        }
    }
    details
}

fn person_name(value: &Value) -> Option<String> {
    value["fullName"]
        .as_str()
        .or_else(|| value["login"].as_str())
        .map(String::from)
}

#[async_trait]
impl TrackerApi for TrackerClient {
    async fn fetch_issue_details(&self, issue_id: &str) -> Result<Option<IssueDetails>> {
        let body = self
            .get_json(&format!("/api/issues/{issue_id}"), &[("fields", ISSUE_FIELDS)])
            .await?;
        Ok(body.as_ref().map(parse_issue_details))
    }

    async fn assign_issue(&self, issue_id: &str, login: &str) -> Result<bool> {
        let Some(internal_id) = self.resolve_issue_id(issue_id).await? else {
            tracing::warn!("Cannot assign {issue_id}: issue not found");
            return Ok(false);
        };
        let Some(field) = self.fetch_custom_field(&internal_id, "Assignee").await? else {
            tracing::warn!("Cannot assign {issue_id}: no Assignee field");
            return Ok(false);
        };
        let Some(field_id) = field["id"].as_str() else { return Ok(false) };
        self.set_custom_field(&internal_id, field_id, json!({ "login": login })).await
    }
}
