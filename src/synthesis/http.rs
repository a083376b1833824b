use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::Serialize;

use crate::config::RemoteConfig;

use super::remote::{FrameUpload, RemoteDelegate, RemoteError, RemoteStatus};

/// `RemoteDelegate` speaking JSON over HTTP.
///
/// - `POST {endpoint}/sessions/{id}/frames` multipart, one `frame` part per image
/// - `POST {endpoint}/sessions/{id}/synthesize` with `{targetFps, frameCount}`
/// - `GET  {endpoint}/sessions/{id}` for status
pub struct HttpDelegate {
    client: Client,
    endpoint: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeRequest {
    target_fps: u32,
    frame_count: usize,
}

impl HttpDelegate {
    pub fn new(endpoint: &str, config: &RemoteConfig) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn session_url(&self, session_id: &str) -> String {
        format!("{}/sessions/{}", self.endpoint, session_id)
    }

    async fn check(response: Response) -> Result<Response, RemoteError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_status(response: Response) -> Result<RemoteStatus, RemoteError> {
        Self::check(response)
            .await?
            .json::<RemoteStatus>()
            .await
            .map_err(|e| RemoteError::Protocol(format!("Failed to parse status: {}", e)))
    }
}

#[async_trait]
impl RemoteDelegate for HttpDelegate {
    async fn upload(&self, session_id: &str, batch: &[FrameUpload]) -> Result<(), RemoteError> {
        let mut form = Form::new();
        for frame in batch {
            let part = Part::bytes(frame.bytes.clone())
                .file_name(frame.file_name.clone())
                .mime_str("image/png")
                .map_err(|e| RemoteError::Protocol(e.to_string()))?;
            form = form.part("frame", part);
        }

        let response = self
            .client
            .post(format!("{}/frames", self.session_url(session_id)))
            .multipart(form)
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        Self::check(response).await.map(|_| ())
    }

    async fn synthesize(
        &self,
        session_id: &str,
        target_fps: u32,
        frame_count: usize,
    ) -> Result<RemoteStatus, RemoteError> {
        let response = self
            .client
            .post(format!("{}/synthesize", self.session_url(session_id)))
            .json(&SynthesizeRequest {
                target_fps,
                frame_count,
            })
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        Self::parse_status(response).await
    }

    async fn status(&self, session_id: &str) -> Result<RemoteStatus, RemoteError> {
        let response = self
            .client
            .get(self.session_url(session_id))
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        Self::parse_status(response).await
    }
}
