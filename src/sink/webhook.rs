// src/sink/webhook.rs
//! Renders views as messages through a chat webhook
//! (`POST ?wait=true`, `PATCH /messages/{id}`, `DELETE /messages/{id}`).
//! A query string already on the URL (`?thread_id=`) is kept on every call.

use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use serde_json::json;
use reqwest::Url;
use std::time::Duration;

use super::{PresentationSink, RenderHandle, ServerView, SinkError};

#[derive(Deserialize)]
struct PostedMessage {
    id: String,
}

pub struct WebhookSink {
    client: reqwest::Client,
    url: Url,
}

impl WebhookSink {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, SinkError> {
        let url = Url::parse(url.trim_end_matches('/'))
            .map_err(|e| SinkError::Transport(format!("invalid webhook url: {}", e)))?;
        if url.cannot_be_a_base() {
            return Err(SinkError::Transport(format!("invalid webhook url: {}", url)));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError::Transport(e.to_string()))?;
        Ok(Self { client, url })
    }

    fn post_url(&self) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut().append_pair("wait", "true");
        url
    }

    fn message_url(&self, handle: &RenderHandle) -> Url {
        let mut url = self.url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("messages").push(handle);
        }
        url
    }
}

fn body(view: &ServerView) -> serde_json::Value {
    json!({
        "content": view.to_text(),
        "allowed_mentions": { "parse": [] },
    })
}

fn check(response: reqwest::Response) -> Result<reqwest::Response, SinkError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(SinkError::EditFailed(format!("webhook answered {}", status)))
    }
}

#[async_trait]
impl PresentationSink for WebhookSink {
    fn name(&self) -> &'static str {
        "webhook"
    }

    // The webhook is bound to its own channel, so `target` is informational.
    async fn post(&self, target: u64, view: &ServerView) -> Result<RenderHandle, SinkError> {
        let response = self
            .client
            .post(self.post_url())
            .json(&body(view))
            .send()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;
        let message: PostedMessage = check(response)?
            .json()
            .await
            .map_err(|e| SinkError::EditFailed(format!("unexpected webhook reply: {}", e)))?;
        debug!("Posted message {} for target {}", message.id, target);
        Ok(message.id)
    }

    async fn edit(&self, handle: &RenderHandle, view: &ServerView) -> Result<(), SinkError> {
        let response = self
            .client
            .patch(self.message_url(handle))
            .json(&body(view))
            .send()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;
        check(response).map(|_| ())
    }

    async fn delete(&self, handle: &RenderHandle) -> Result<(), SinkError> {
        let response = self
            .client
            .delete(self.message_url(handle))
            .send()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;
        check(response).map(|_| ())
    }
}
