//! OpenAI-compatible streaming chat completions.

use super::lines::LineBuffer;
use super::{GenerationClient, GenerationError, GenerationRequest, SamplingOptions, TextStream};
use async_stream::try_stream;
use async_trait::async_trait;
use futures_core::Stream;
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

const DONE_SENTINEL: &str = "[DONE]";
const TRUNCATED: &str = "stream ended before completion";

/// Streaming generation against an OpenAI-compatible `chat/completions` endpoint.
pub struct OpenAiGenerator {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
    sampling: SamplingOptions,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// One decoded server-sent line.
#[derive(Debug, PartialEq)]
enum SseLine {
    Delta(String),
    Done,
    Skip,
}

impl OpenAiGenerator {
    /// Build a client for `model` at `base_url` (for example `https://api.openai.com/v1`).
    pub fn new(
        base_url: String,
        api_key: String,
        model: String,
        sampling: SamplingOptions,
    ) -> Result<Self, GenerationError> {
        let http = Client::builder()
            .user_agent("docchat/generate")
            .build()
            .map_err(|error| GenerationError::ProviderUnavailable(error.to_string()))?;
        Ok(Self {
            http,
            base_url,
            api_key,
            model,
            sampling,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

fn parse_line(line: &str) -> Result<SseLine, GenerationError> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseLine::Skip);
    };
    let data = data.trim();
    if data.is_empty() {
        return Ok(SseLine::Skip);
    }
    if data == DONE_SENTINEL {
        return Ok(SseLine::Done);
    }
    let chunk: CompletionChunk = serde_json::from_str(data).map_err(|error| {
        GenerationError::InvalidResponse(format!("failed to decode completion chunk: {error}"))
    })?;
    let content = chunk
        .choices
        .into_iter()
        .filter_map(|choice| choice.delta.content)
        .collect::<String>();
    if content.is_empty() {
        Ok(SseLine::Skip)
    } else {
        Ok(SseLine::Delta(content))
    }
}

/// Turn the raw event-stream body into text deltas, stopping at `[DONE]`.
///
/// A body that ends without `[DONE]` was cut off and ends the stream with an error.
fn read_deltas<S, B>(body: S) -> impl Stream<Item = Result<String, GenerationError>> + Send
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    try_stream! {
        let mut body = Box::pin(body);
        let mut buffer = LineBuffer::default();
        let mut finished = false;
        'read: while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|error| GenerationError::Stream(error.to_string()))?;
            for line in buffer.push(chunk.as_ref()) {
                match parse_line(&line)? {
                    SseLine::Delta(delta) => {
                        yield delta;
                    }
                    SseLine::Done => {
                        finished = true;
                        break 'read;
                    }
                    SseLine::Skip => {}
                }
            }
        }
        if !finished {
            if let Some(line) = buffer.finish() {
                match parse_line(&line)? {
                    SseLine::Delta(delta) => {
                        yield delta;
                    }
                    SseLine::Done => finished = true,
                    SseLine::Skip => {}
                }
            }
        }
        if !finished {
            Err::<(), _>(GenerationError::Stream(TRUNCATED.to_string()))?;
        }
    }
}

#[async_trait]
impl GenerationClient for OpenAiGenerator {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn stream(&self, request: GenerationRequest) -> Result<TextStream, GenerationError> {
        let payload = json!({
            "model": self.model,
            "stream": true,
            "temperature": self.sampling.temperature,
            "max_tokens": self.sampling.max_tokens,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.prompt },
            ],
        });

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                GenerationError::ProviderUnavailable(format!(
                    "failed to reach {}: {error}",
                    self.base_url
                ))
            })?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND => {
                let status = response.status();
                return Err(GenerationError::ProviderUnavailable(format!(
                    "{} returned {status}",
                    self.endpoint()
                )));
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                return Err(GenerationError::RequestFailed(format!(
                    "completion endpoint returned {status}: {body}"
                )));
            }
        }

        tracing::debug!(model = %self.model, "Completion stream opened");
        Ok(Box::pin(read_deltas(response.bytes_stream())))
    }
}
