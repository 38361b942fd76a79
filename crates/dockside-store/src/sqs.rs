//! SQS-compatible event queue client.
//!
//! Long-polls the queue with `ReceiveMessage` and decodes each message
//! body as an object-store event notification: a JSON `Records` array of
//! `s3:ObjectCreated:*` / `s3:ObjectRemoved:*` entries. Test events are
//! surfaced as messages with no work events so the coordinator can
//! acknowledge them immediately. Receiving never removes a message;
//! [`delete`](dockside_core::EventQueue::delete) by receipt handle does,
//! and only the outcome reducer calls it.

use async_trait::async_trait;
use chrono::Utc;
use dockside_core::{
    EventKind, EventOrigin, EventQueue, QueueError, QueueMessage, WorkEvent,
};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::sigv4::{
    extract_xml_value, hex_sha256, sign, uri_encode, xml_blocks, xml_unescape, AwsCredentials,
    SigningRequest,
};

/// Settings for [`SqsQueue`].
#[derive(Debug, Clone)]
pub struct SqsConfig {
    /// Full queue URL, e.g. `https://sqs.us-east-1.amazonaws.com/123/docs`.
    pub queue_url: String,
    pub region: String,
    /// Long-poll wait, at most 20 seconds.
    pub wait_time: Duration,
    /// Messages per receive, at most 10.
    pub max_messages: u32,
    /// Per-request timeout; must exceed the long-poll wait.
    pub timeout: Duration,
}

/// SigV4-signed SQS client implementing [`EventQueue`].
pub struct SqsQueue {
    client: reqwest::Client,
    config: SqsConfig,
    creds: AwsCredentials,
}

// S3 event notification payload, as delivered in the message body.

#[derive(Debug, Deserialize)]
struct NotificationBody {
    #[serde(rename = "Event", default)]
    event: Option<String>,
    #[serde(rename = "Records", default)]
    records: Vec<NotificationRecord>,
}

#[derive(Debug, Deserialize)]
struct NotificationRecord {
    #[serde(rename = "eventName", default)]
    event_name: String,
    s3: Option<S3Entity>,
}

#[derive(Debug, Deserialize)]
struct S3Entity {
    object: S3ObjectEntity,
}

#[derive(Debug, Deserialize)]
struct S3ObjectEntity {
    key: String,
}

impl SqsQueue {
    /// Build a client with credentials from the environment.
    pub fn new(config: SqsConfig) -> Result<Self, QueueError> {
        let creds = AwsCredentials::from_env()
            .map_err(|e| QueueError::Credentials(e.to_string()))?;
        Self::with_credentials(config, creds)
    }

    /// Build a client with explicit credentials.
    pub fn with_credentials(
        config: SqsConfig,
        creds: AwsCredentials,
    ) -> Result<Self, QueueError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| QueueError::Transport(format!("http client: {e}")))?;
        Ok(Self {
            client,
            config,
            creds,
        })
    }

    fn queue_parts(&self) -> Result<(String, String, String), QueueError> {
        let url = &self.config.queue_url;
        let rest = url
            .strip_prefix("https://")
            .map(|r| ("https", r))
            .or_else(|| url.strip_prefix("http://").map(|r| ("http", r)))
            .ok_or_else(|| QueueError::Credentials(format!("invalid queue url: {url}")))?;
        let (scheme, rest) = rest;
        let (host, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };
        Ok((scheme.to_string(), host.to_string(), path.to_string()))
    }

    async fn action(&self, params: &[(&str, String)]) -> Result<String, QueueError> {
        let (scheme, host, path) = self.queue_parts()?;

        let mut sorted: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        let body: String = sorted
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let payload_hash = hex_sha256(body.as_bytes());
        let headers = sign(
            &SigningRequest {
                method: "POST",
                host: &host,
                uri: &path,
                query: "",
                payload_hash: &payload_hash,
                region: &self.config.region,
                service: "sqs",
            },
            &self.creds,
            Utc::now(),
        );

        let mut request = self
            .client
            .post(format!("{scheme}://{host}{path}"))
            .header("content-type", "application/x-www-form-urlencoded")
            .body(body);
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| QueueError::Transport(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| QueueError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(QueueError::UnexpectedStatus {
                status: status.as_u16(),
                body: text.chars().take(500).collect(),
            });
        }
        Ok(text)
    }
}

#[async_trait]
impl EventQueue for SqsQueue {
    async fn receive(&self) -> Result<Vec<QueueMessage>, QueueError> {
        let xml = self
            .action(&[
                ("Action", "ReceiveMessage".to_string()),
                ("Version", "2012-11-05".to_string()),
                (
                    "MaxNumberOfMessages",
                    self.config.max_messages.min(10).to_string(),
                ),
                (
                    "WaitTimeSeconds",
                    self.config.wait_time.as_secs().min(20).to_string(),
                ),
                ("AttributeName.1", "ApproximateReceiveCount".to_string()),
            ])
            .await?;

        let mut messages = Vec::new();
        for block in xml_blocks(&xml, "Message") {
            let Some(receipt) = extract_xml_value(block, "ReceiptHandle") else {
                continue;
            };
            let receipt = xml_unescape(&receipt);
            let body = extract_xml_value(block, "Body")
                .map(|b| xml_unescape(&b))
                .unwrap_or_default();
            let receive_count = xml_blocks(block, "Attribute")
                .iter()
                .find(|attr| {
                    extract_xml_value(attr, "Name").as_deref() == Some("ApproximateReceiveCount")
                })
                .and_then(|attr| extract_xml_value(attr, "Value"))
                .and_then(|v| v.parse().ok())
                .unwrap_or(1);

            let events = match decode_notification(&body) {
                Ok(events) => events,
                Err(e) => {
                    // Malformed payloads should not wedge the queue; an
                    // empty event list lets the reducer acknowledge them.
                    warn!(error = %e, "dropping undecodable queue message");
                    Vec::new()
                }
            };

            messages.push(QueueMessage {
                receipt,
                receive_count,
                events,
            });
        }

        if !messages.is_empty() {
            debug!(messages = messages.len(), "received queue messages");
        }
        Ok(messages)
    }

    async fn delete(&self, receipt: &str) -> Result<(), QueueError> {
        self.action(&[
            ("Action", "DeleteMessage".to_string()),
            ("Version", "2012-11-05".to_string()),
            ("ReceiptHandle", receipt.to_string()),
        ])
        .await?;
        Ok(())
    }
}

/// Decode one message body into work events.
///
/// Test events and unrecognized-but-valid payloads decode to no events.
fn decode_notification(body: &str) -> Result<Vec<WorkEvent>, QueueError> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let notification: NotificationBody =
        serde_json::from_str(body).map_err(|e| QueueError::Decode(e.to_string()))?;

    if notification.event.as_deref() == Some("s3:TestEvent") {
        debug!("skipping s3:TestEvent");
        return Ok(Vec::new());
    }

    let mut events = Vec::new();
    for record in notification.records {
        let Some(s3) = record.s3 else { continue };
        let kind = if record.event_name.contains("ObjectRemoved") {
            EventKind::Delete
        } else if record.event_name.contains("ObjectCreated") {
            EventKind::Create
        } else {
            debug!(event = %record.event_name, "ignoring unrecognized event");
            continue;
        };
        events.push(WorkEvent::new(kind, s3.object.key, EventOrigin::Queue));
    }
    Ok(events)
}
