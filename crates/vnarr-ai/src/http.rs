//! HTTP client for the model service.
//!
//! Endpoints:
//! - `POST /v1/analyze`: videos and target scene count in, scenes out
//! - `POST /v1/script`: scene briefs and outline in, one line per scene out
//! - `POST /v1/speech`: text and voice in, audio bytes out; the length is
//!   reported in the `x-audio-duration-secs` header

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use vnarr_models::{SceneId, SceneTask, VoiceConfig, WorkflowSpec};

use crate::error::{AiError, AiResult};
use crate::traits::{NarrationWriter, SceneAnalyzer, SpeechSynthesizer};
use crate::types::{AnalysisVideo, AnalyzedScene, SynthesizedAudio};

const DURATION_HEADER: &str = "x-audio-duration-secs";

/// Client configuration.
#[derive(Debug, Clone)]
pub struct AiClientConfig {
    /// Service base URL
    pub base_url: String,
    /// Bearer token, if the service requires one
    pub api_key: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for AiClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            api_key: None,
            timeout: Duration::from_secs(120),
        }
    }
}

impl AiClientConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("AI_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
            api_key: std::env::var("AI_API_KEY").ok().filter(|k| !k.is_empty()),
            timeout: Duration::from_secs(
                std::env::var("AI_REQUEST_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(120),
            ),
        }
    }
}

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    videos: &'a [AnalysisVideo],
    target_scene_count: u32,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    scenes: Vec<AnalyzedScene>,
}

#[derive(Debug, Serialize)]
struct SceneBrief<'a> {
    id: SceneId,
    description: &'a str,
    duration: f64,
}

#[derive(Debug, Serialize)]
struct ScriptRequest<'a> {
    scenes: Vec<SceneBrief<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    outline: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ScriptResponse {
    lines: Vec<String>,
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    voice_id: &'a str,
    speed: f32,
}

/// Model service client implementing every AI trait.
#[derive(Clone)]
pub struct HttpAiClient {
    client: Client,
    config: AiClientConfig,
}

impl HttpAiClient {
    pub fn new(config: AiClientConfig) -> AiResult<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> AiResult<Self> {
        Self::new(AiClientConfig::from_env())
    }

    fn post(&self, endpoint: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), endpoint);
        let request = self.client.post(url);
        match &self.config.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// Turn non-success statuses into [`AiError::Status`].
    async fn check(response: Response) -> AiResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(AiError::Status {
            status: status.as_u16(),
            body: body.chars().take(500).collect(),
        })
    }
}

#[async_trait]
impl SceneAnalyzer for HttpAiClient {
    async fn analyze(
        &self,
        videos: &[AnalysisVideo],
        spec: &WorkflowSpec,
    ) -> AiResult<Vec<AnalyzedScene>> {
        if videos.is_empty() {
            return Err(AiError::invalid_input("no videos to analyze"));
        }

        info!(
            "Requesting scene analysis for {} video(s), target {} scenes",
            videos.len(),
            spec.target_scene_count
        );

        let response = self
            .post("v1/analyze")
            .json(&AnalyzeRequest {
                videos,
                target_scene_count: spec.target_scene_count,
            })
            .send()
            .await?;

        let parsed: AnalyzeResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| AiError::decode(format!("analysis response: {}", e)))?;

        if parsed.scenes.is_empty() {
            return Err(AiError::decode("analysis returned no scenes"));
        }
        debug!("Analyzer proposed {} scenes", parsed.scenes.len());
        Ok(parsed.scenes)
    }
}

#[async_trait]
impl NarrationWriter for HttpAiClient {
    async fn write_script(
        &self,
        scenes: &[SceneTask],
        outline: Option<&str>,
    ) -> AiResult<Vec<String>> {
        let request = ScriptRequest {
            scenes: scenes
                .iter()
                .map(|s| SceneBrief {
                    id: s.id,
                    description: &s.description,
                    duration: s.duration(),
                })
                .collect(),
            outline,
        };

        let response = self.post("v1/script").json(&request).send().await?;
        let parsed: ScriptResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| AiError::decode(format!("script response: {}", e)))?;

        if parsed.lines.len() != scenes.len() {
            return Err(AiError::decode(format!(
                "script has {} lines for {} scenes",
                parsed.lines.len(),
                scenes.len()
            )));
        }
        Ok(parsed.lines)
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpAiClient {
    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceConfig,
        out_path: &Path,
    ) -> AiResult<SynthesizedAudio> {
        if text.trim().is_empty() {
            return Err(AiError::invalid_input("empty narration text"));
        }

        let response = self
            .post("v1/speech")
            .json(&SpeechRequest {
                text,
                voice_id: &voice.voice_id,
                speed: voice.speed,
            })
            .send()
            .await?;
        let response = Self::check(response).await?;

        let duration = response
            .headers()
            .get(DURATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|d| *d > 0.0);

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(AiError::decode("speech response has no audio"));
        }

        if let Some(parent) = out_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(out_path, &bytes).await?;
        debug!("Wrote {} bytes of narration to {}", bytes.len(), out_path.display());

        Ok(SynthesizedAudio {
            path: out_path.to_path_buf(),
            duration,
        })
    }
}
