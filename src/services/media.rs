//! Client for the external media provider (Cloudinary upload API).

use chrono::Utc;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use super::uploads::TempUpload;
use crate::api::error::ApiError;
use crate::config::MediaConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Image,
    Video,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Image => "image",
            ResourceType::Video => "video",
        }
    }
}

/// What the provider returns for a stored asset.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadedAsset {
    pub secure_url: String,
    pub public_id: String,
    #[serde(default)]
    pub duration: Option<f64>,
}

#[derive(Clone)]
pub struct MediaClient {
    http: reqwest::Client,
    config: MediaConfig,
}

impl MediaClient {
    pub fn new(config: MediaConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn endpoint(&self, resource: &str, action: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.config.api_base_url.trim_end_matches('/'),
            self.config.cloud_name,
            resource,
            action
        )
    }

    pub fn is_configured(&self) -> bool {
        !(self.config.cloud_name.is_empty()
            || self.config.api_key.is_empty()
            || self.config.api_secret.is_empty())
    }

    fn ensure_configured(&self) -> Result<(), ApiError> {
        if !self.is_configured() {
            return Err(ApiError::Media("Media storage is not configured".into()));
        }
        Ok(())
    }

    /// Uploads a spooled file. The local copy is removed when `file` is dropped,
    /// on success and on failure alike.
    pub async fn upload(&self, file: TempUpload) -> Result<UploadedAsset, ApiError> {
        self.ensure_configured()?;

        let bytes = tokio::fs::read(&file.path).await.map_err(|e| {
            log::error!("upload Error: cannot read {}: {}", file.path.display(), e);
            ApiError::Media("Failed to read uploaded file".into())
        })?;

        let timestamp = Utc::now().timestamp().to_string();
        let mut params = BTreeMap::new();
        params.insert("timestamp", timestamp.clone());
        let signature = sign_params(&params, &self.config.api_secret);

        let form = Form::new()
            .part("file", Part::bytes(bytes).file_name(file.file_name.clone()))
            .text("api_key", self.config.api_key.clone())
            .text("timestamp", timestamp)
            .text("signature", signature);

        let response = self
            .http
            .post(self.endpoint("auto", "upload"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                log::error!("upload Error: {}", e);
                ApiError::Media(format!("Failed to upload {}", file.file_name))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            log::error!("upload Error: provider answered {}: {}", status, body);
            return Err(ApiError::Media(format!("Failed to upload {}", file.file_name)));
        }

        response.json::<UploadedAsset>().await.map_err(|e| {
            log::error!("upload Error: unreadable provider response: {}", e);
            ApiError::Media(format!("Failed to upload {}", file.file_name))
        })
    }

    /// Removes an asset. Failures are logged and otherwise ignored.
    pub async fn delete(&self, public_id: &str, resource: ResourceType) {
        if public_id.is_empty() {
            return;
        }
        if let Err(e) = self.try_delete(public_id, resource).await {
            log::error!(
                "failed to delete {} asset {}: {}",
                resource.as_str(),
                public_id,
                e
            );
        }
    }

    async fn try_delete(&self, public_id: &str, resource: ResourceType) -> Result<(), ApiError> {
        self.ensure_configured()?;

        let timestamp = Utc::now().timestamp().to_string();
        let mut params = BTreeMap::new();
        params.insert("public_id", public_id.to_string());
        params.insert("timestamp", timestamp.clone());
        let signature = sign_params(&params, &self.config.api_secret);

        let response = self
            .http
            .post(self.endpoint(resource.as_str(), "destroy"))
            .form(&[
                ("public_id", public_id),
                ("timestamp", timestamp.as_str()),
                ("api_key", self.config.api_key.as_str()),
                ("signature", signature.as_str()),
            ])
            .send()
            .await
            .map_err(|e| ApiError::Media(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ApiError::Media(format!(
                "provider answered {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// Deletes assets uploaded for a write that then failed.
    pub async fn discard(&self, assets: &[(&UploadedAsset, ResourceType)]) {
        for (asset, resource) in assets {
            log::warn!("discarding orphaned asset {}", asset.public_id);
            self.delete(&asset.public_id, *resource).await;
        }
    }
}

/// Provider request signature: `k=v` pairs sorted by key, joined with `&`,
/// followed by the API secret, hashed with SHA-256.
pub fn sign_params(params: &BTreeMap<&str, String>, secret: &str) -> String {
    let joined = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");
    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}
