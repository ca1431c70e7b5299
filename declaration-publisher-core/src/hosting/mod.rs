//! Concrete [`HostingProvider`](crate::contract::HostingProvider) adapters
//! and the HTTP plumbing they share.

pub mod github;
pub mod gitlab;

pub use github::GitHubClient;
pub use gitlab::GitLabClient;

use reqwest::{Client, Response};
use serde_json::Value;

use crate::error::PublishError;

fn user_agent() -> String {
    format!("declaration-publisher/{}", env!("CARGO_PKG_VERSION"))
}

pub(crate) fn http_client() -> Result<Client, PublishError> {
    Ok(Client::builder().user_agent(user_agent()).build()?)
}

/// Percent-encodes each segment of a slash separated repository path.
pub(crate) fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Passes successful responses through and turns the others into a
/// [`PublishError`] using the adapter's classifier.
pub(crate) async fn check(
    response: Response,
    classify: fn(u16, &str) -> PublishError,
) -> Result<Response, PublishError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = error_message(&text);
    tracing::debug!(status = status.as_u16(), %message, "Hosting provider returned an error");
    Err(classify(status.as_u16(), &message))
}

/// Human readable message out of a provider error body.
///
/// Both providers answer with JSON, but the shape varies: a `message` string,
/// a `message` object of lists, an `errors` array of objects or an `error`
/// string.
pub(crate) fn error_message(body: &str) -> String {
    let Ok(json) = serde_json::from_str::<Value>(body) else {
        return body.trim().to_string();
    };
    let mut parts = Vec::new();
    for key in ["message", "errors", "error"] {
        if let Some(value) = json.get(key) {
            collect_messages(value, &mut parts);
        }
    }
    if parts.is_empty() {
        body.trim().to_string()
    } else {
        parts.join("; ")
    }
}

fn collect_messages(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => items.iter().for_each(|item| collect_messages(item, out)),
        Value::Object(map) => match map.get("message") {
            Some(message) => collect_messages(message, out),
            None => map.values().for_each(|item| collect_messages(item, out)),
        },
        _ => {}
    }
}

/// Title of the issue opened when a document stops being trackable.
pub(crate) fn failure_issue_title(service: &str, document_type: &str) -> String {
    format!("{service} \u{2027} {document_type} \u{2027} not tracked anymore")
}

/// Splits `https://host/<repo path><marker><commit id>[/...]`.
pub(crate) fn split_commit_url(url: &str, marker: &str) -> Result<crate::contract::CommitRef, PublishError> {
    let parsed = url::Url::parse(url).map_err(|e| PublishError::InvalidInput(format!("{url}: {e}")))?;
    let path = parsed.path().trim_start_matches('/');
    let (repo_path, rest) = path
        .split_once(marker)
        .ok_or_else(|| PublishError::InvalidInput(format!("{url} is not a commit URL")))?;
    let commit_id = rest.split('/').next().unwrap_or_default();
    if repo_path.is_empty() || commit_id.is_empty() {
        return Err(PublishError::InvalidInput(format!("{url} is not a commit URL")));
    }
    Ok(crate::contract::CommitRef {
        repo_path: repo_path.to_string(),
        commit_id: commit_id.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_reads_every_provider_shape() {
        assert_eq!(error_message(r#"{"message":"Reference already exists"}"#), "Reference already exists");
        assert_eq!(
            error_message(
                r#"{"message":"Validation Failed","errors":[{"resource":"PullRequest","code":"custom","message":"A pull request already exists for Org:add_acme."}]}"#
            ),
            "Validation Failed; A pull request already exists for Org:add_acme."
        );
        assert_eq!(
            error_message(r#"{"message":{"base":["Another open merge request already exists for this source branch: !4"]}}"#),
            "Another open merge request already exists for this source branch: !4"
        );
        assert_eq!(error_message(r#"{"error":"invalid_token"}"#), "invalid_token");
        assert_eq!(error_message("  502 Bad Gateway \n"), "502 Bad Gateway");
        assert_eq!(error_message("{}"), "{}");
    }

    #[test]
    fn encode_path_keeps_separators() {
        assert_eq!(encode_path("declarations/Cafe  Co..json"), "declarations/Cafe%20%20Co..json");
        assert_eq!(encode_path("Acme/Terms of Service.md"), "Acme/Terms%20of%20Service.md");
    }

    #[test]
    fn failure_issue_title_uses_the_tracking_format() {
        assert_eq!(
            failure_issue_title("Acme", "Terms of Service"),
            "Acme \u{2027} Terms of Service \u{2027} not tracked anymore"
        );
    }

    #[test]
    fn split_commit_url_rejects_other_pages() {
        let commit = split_commit_url("https://github.com/Org/app-versions/commit/c1", "/commit/").unwrap();
        assert_eq!(commit.repo_path, "Org/app-versions");
        assert_eq!(commit.commit_id, "c1");

        assert!(matches!(
            split_commit_url("https://github.com/Org/app-versions/pull/3", "/commit/"),
            Err(PublishError::InvalidInput(_))
        ));
        assert!(matches!(split_commit_url("not a url", "/commit/"), Err(PublishError::InvalidInput(_))));
    }
}
