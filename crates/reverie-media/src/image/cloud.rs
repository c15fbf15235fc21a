//! Cloud text-to-image and image-edit models hosted on WaveSpeed.

use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use reverie_core::{ReverieError, ReverieResult};

use crate::artifact;
use crate::jobs::Poller;
use crate::wavespeed::WaveSpeedClient;

/// Model key exposed to the front-end.
pub const CLOUD_IMAGE_MODEL: &str = "qwen-image-2512";
const TEXT_TO_IMAGE_PATH: &str = "wavespeed-ai/qwen-image/text-to-image-2512";
const EDIT_PATH: &str = "wavespeed-ai/qwen-image/edit";
/// Portrait, matching the local preset's 896x1152.
const ASPECT_RATIO: &str = "3:4";

pub fn is_cloud_model(key: &str) -> bool {
    key == CLOUD_IMAGE_MODEL || key.starts_with("qwen-image")
}

#[derive(Debug, Clone)]
pub struct CloudImage {
    api: Arc<WaveSpeedClient>,
    client: reqwest::Client,
    poller: Poller,
}

impl CloudImage {
    pub fn new(api: Arc<WaveSpeedClient>) -> Self {
        Self {
            api,
            client: artifact::media_client(),
            poller: Poller::new(Duration::from_secs(2), Duration::from_secs(300)),
        }
    }

    pub fn with_poller(mut self, poller: Poller) -> Self {
        self.poller = poller;
        self
    }

    pub async fn generate(&self, prompt: &str, cancel: &CancellationToken) -> ReverieResult<Vec<u8>> {
        let payload = json!({
            "prompt": prompt,
            "aspect_ratio": ASPECT_RATIO,
            "output_format": "png",
            "seed": -1,
            "enable_base64_output": false,
        });
        self.run(TEXT_TO_IMAGE_PATH, &payload, cancel).await
    }

    /// Apply a natural-language edit to an existing image.
    pub async fn edit(
        &self,
        image: &Path,
        instruction: &str,
        cancel: &CancellationToken,
    ) -> ReverieResult<Vec<u8>> {
        if instruction.trim().is_empty() {
            return Err(ReverieError::PreconditionMissing("Edit instruction is empty".into()));
        }
        let payload = json!({
            "image": artifact::data_uri(image).await?,
            "prompt": instruction,
            "output_format": "png",
            "seed": -1,
            "enable_base64_output": false,
        });
        self.run(EDIT_PATH, &payload, cancel).await
    }

    async fn run(
        &self,
        model_path: &str,
        payload: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> ReverieResult<Vec<u8>> {
        let id = self.api.submit(model_path, payload).await?;
        let api = &self.api;
        let url = self
            .poller
            .wait(model_path, cancel, || api.result(&id), |_| {})
            .await?;
        tracing::info!(target: "reverie::image", model = model_path, %url, "Cloud image ready");
        artifact::download(&self.client, &url).await
    }
}
