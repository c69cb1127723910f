use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::models::UNKNOWN;

const GRAPH_URL: &str = "https://graph.microsoft.com/v1.0";

#[derive(Debug, Clone, PartialEq)]
pub struct ThreadSummary {
    pub id: String,
    pub topic: String,
    pub created: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentRef {
    pub id: String,
    pub name: Option<String>,
    pub content_type: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub body_html: String,
    /// Creation time exactly as the backend reported it.
    pub created: Option<String>,
    pub attachments: Vec<AttachmentRef>,
}

impl Message {
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created.as_deref().and_then(parse_timestamp)
    }
}

/// Read access to the shared mailbox.
pub trait MailBackend {
    /// Most recent threads first.
    fn list_threads(&self, top_n: usize) -> Result<Vec<ThreadSummary>>;
    fn list_messages(&self, thread_id: &str) -> Result<Vec<Message>>;
    fn fetch_attachment(&self, thread_id: &str, message_id: &str, attachment_id: &str)
        -> Result<Vec<u8>>;
}

/// A thread with its messages loaded. Lives for one pipeline pass.
#[derive(Debug, Clone)]
pub struct RawThread {
    pub id: String,
    pub subject: String,
    pub messages: Vec<Message>,
    /// First message's creation date as `MM-DD-YYYY`, or the unknown marker.
    pub date_sent: String,
}

impl RawThread {
    pub fn new(summary: &ThreadSummary, messages: Vec<Message>) -> Self {
        let date_sent = format_date_sent(&messages);
        let subject = if summary.topic.trim().is_empty() {
            UNKNOWN.to_string()
        } else {
            summary.topic.clone()
        };
        Self {
            id: summary.id.clone(),
            subject,
            messages,
            date_sent,
        }
    }

    /// Whether any message was created strictly after `watermark`.
    pub fn has_message_after(&self, watermark: DateTime<Utc>) -> bool {
        self.messages
            .iter()
            .filter_map(Message::created_at)
            .any(|created| created > watermark)
    }
}

/// Parse a backend timestamp. Values without a zone are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = raw.strip_suffix('Z').unwrap_or(raw);
    NaiveDateTime::parse_from_str(naive, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|dt| dt.and_utc())
}

pub fn format_date_sent(messages: &[Message]) -> String {
    messages
        .first()
        .and_then(Message::created_at)
        .map(|dt| dt.format("%m-%d-%Y").to_string())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

// --- Microsoft Graph group conversations ---

#[derive(Debug, Deserialize)]
struct Collection<T> {
    value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphThread {
    id: String,
    topic: Option<String>,
    last_delivered_date_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphBody {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphPost {
    id: String,
    body: Option<GraphBody>,
    created_date_time: Option<String>,
    #[serde(default)]
    has_attachments: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphAttachment {
    id: Option<String>,
    name: Option<String>,
    content_type: Option<String>,
}

pub struct GraphMailBackend {
    group_id: String,
    token: String,
    client: reqwest::blocking::Client,
}

impl GraphMailBackend {
    pub fn new(group_id: String, token: String) -> Result<Self> {
        if group_id.is_empty() {
            return Err(anyhow!("MS_GROUP_ID (or mail.group_id) is not set"));
        }
        Ok(Self {
            group_id,
            token,
            client: reqwest::blocking::Client::new(),
        })
    }

    fn thread_url(&self, thread_id: &str) -> String {
        format!("{}/groups/{}/threads/{}", GRAPH_URL, self.group_id, thread_id)
    }

    fn get(&self, url: &str) -> Result<reqwest::blocking::Response> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .with_context(|| format!("Failed to send request to {}", url))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            return Err(anyhow!(
                "Graph request {} failed with status {}: {}",
                url,
                status,
                error_text
            ));
        }
        Ok(response)
    }

    /// Follow `@odata.nextLink` until `limit` items are collected.
    fn get_collection<T: DeserializeOwned>(&self, url: &str, limit: usize) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(url.to_string());
        while let Some(url) = next.take() {
            let page: Collection<T> = self
                .get(&url)?
                .json()
                .context("Failed to parse Graph collection")?;
            items.extend(page.value);
            if items.len() >= limit {
                items.truncate(limit);
                break;
            }
            next = page.next_link;
        }
        Ok(items)
    }
}

impl MailBackend for GraphMailBackend {
    fn list_threads(&self, top_n: usize) -> Result<Vec<ThreadSummary>> {
        let url = format!(
            "{}/groups/{}/threads?$top={}",
            GRAPH_URL, self.group_id, top_n
        );
        let threads: Vec<GraphThread> = self.get_collection(&url, top_n)?;
        Ok(threads
            .into_iter()
            .map(|t| ThreadSummary {
                id: t.id,
                topic: t.topic.unwrap_or_default(),
                created: t.last_delivered_date_time,
            })
            .collect())
    }

    fn list_messages(&self, thread_id: &str) -> Result<Vec<Message>> {
        let url = format!("{}/posts", self.thread_url(thread_id));
        let posts: Vec<GraphPost> = self.get_collection(&url, usize::MAX)?;

        let mut messages = Vec::with_capacity(posts.len());
        for post in posts {
            let attachments = if post.has_attachments {
                let url = format!("{}/posts/{}/attachments", self.thread_url(thread_id), post.id);
                let listed: Vec<GraphAttachment> = self.get_collection(&url, usize::MAX)?;
                listed
                    .into_iter()
                    .filter_map(|a| {
                        Some(AttachmentRef {
                            id: a.id?,
                            name: a.name,
                            content_type: a.content_type.unwrap_or_default(),
                        })
                    })
                    .collect()
            } else {
                Vec::new()
            };

            messages.push(Message {
                id: post.id,
                body_html: post
                    .body
                    .and_then(|b| b.content)
                    .unwrap_or_else(|| UNKNOWN.to_string()),
                created: post.created_date_time,
                attachments,
            });
        }
        Ok(messages)
    }

    fn fetch_attachment(
        &self,
        thread_id: &str,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Vec<u8>> {
        let url = format!(
            "{}/posts/{}/attachments/{}/$value",
            self.thread_url(thread_id),
            message_id,
            attachment_id
        );
        let bytes = self.get(&url)?.bytes().context("Failed to read attachment body")?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn message(created: Option<&str>) -> Message {
        Message {
            id: "m".to_string(),
            body_html: String::new(),
            created: created.map(str::to_string),
            attachments: vec![],
        }
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 2, 14, 5, 0).unwrap();
        assert_eq!(parse_timestamp("2024-03-02T14:05:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-02T14:05:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-02T16:05:00+02:00"), Some(expected));
        assert!(parse_timestamp("2024-03-02T14:05:00.123Z").is_some());
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_format_date_sent_uses_first_message() {
        let messages = vec![
            message(Some("2024-03-02T14:05:00Z")),
            message(Some("2024-04-10T09:00:00Z")),
        ];
        assert_eq!(format_date_sent(&messages), "03-02-2024");
    }

    #[test]
    fn test_format_date_sent_unknown_on_bad_date() {
        assert_eq!(format_date_sent(&[message(Some("not a date"))]), UNKNOWN);
        assert_eq!(format_date_sent(&[message(None)]), UNKNOWN);
        assert_eq!(format_date_sent(&[]), UNKNOWN);
    }

    #[test]
    fn test_has_message_after_is_strict() {
        let summary = ThreadSummary {
            id: "t1".to_string(),
            topic: "Application".to_string(),
            created: None,
        };
        let thread = RawThread::new(
            &summary,
            vec![message(Some("2024-03-02T14:05:00Z")), message(Some("garbage"))],
        );
        let at = Utc.with_ymd_and_hms(2024, 3, 2, 14, 5, 0).unwrap();
        assert!(!thread.has_message_after(at));
        assert!(thread.has_message_after(at - chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_blank_topic_becomes_unknown() {
        let summary = ThreadSummary {
            id: "t1".to_string(),
            topic: "  ".to_string(),
            created: None,
        };
        assert_eq!(RawThread::new(&summary, vec![]).subject, UNKNOWN);
    }

    #[test]
    fn test_graph_backend_requires_group() {
        assert!(GraphMailBackend::new(String::new(), "token".to_string()).is_err());
    }
}
