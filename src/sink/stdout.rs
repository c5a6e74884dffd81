// src/sink/stdout.rs
//! Sink that only logs views. Used when no webhook is configured.

use async_trait::async_trait;
use log::info;

use super::{PresentationSink, RenderHandle, ServerView, SinkError};

#[derive(Debug, Default)]
pub struct StdoutSink;

impl StdoutSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PresentationSink for StdoutSink {
    fn name(&self) -> &'static str {
        "stdout"
    }

    async fn post(&self, target: u64, view: &ServerView) -> Result<RenderHandle, SinkError> {
        let handle = uuid::Uuid::new_v4().to_string();
        info!("[{} -> {}] {}", handle, target, view.to_text().replace('\n', " | "));
        Ok(handle)
    }

    async fn edit(&self, handle: &RenderHandle, view: &ServerView) -> Result<(), SinkError> {
        info!("[{}] {}", handle, view.to_text().replace('\n', " | "));
        Ok(())
    }

    async fn delete(&self, handle: &RenderHandle) -> Result<(), SinkError> {
        info!("[{}] removed", handle);
        Ok(())
    }
}
