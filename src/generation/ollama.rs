//! Ollama streaming text generation.

use super::lines::LineBuffer;
use super::{GenerationClient, GenerationError, GenerationRequest, SamplingOptions, TextStream};
use async_stream::try_stream;
use async_trait::async_trait;
use futures_core::Stream;
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

const TRUNCATED: &str = "stream ended before completion";

/// Streaming generation backed by Ollama's `/api/generate` endpoint.
///
/// Ollama answers with newline-delimited JSON objects, each carrying a `response` delta.
pub struct OllamaGenerator {
    http: Client,
    base_url: String,
    model: String,
    sampling: SamplingOptions,
}

#[derive(Debug, Deserialize)]
struct GenerateLine {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

impl OllamaGenerator {
    /// Build a client for `model` served at `base_url`.
    pub fn new(
        base_url: String,
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
            model,
            sampling,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url.trim_end_matches('/'))
    }
}

/// Decode one NDJSON record. Returns the delta and whether the model signalled completion.
fn parse_line(line: &str) -> Result<Option<(String, bool)>, GenerationError> {
    if line.trim().is_empty() {
        return Ok(None);
    }
    let parsed: GenerateLine = serde_json::from_str(line).map_err(|error| {
        GenerationError::InvalidResponse(format!("failed to decode Ollama stream line: {error}"))
    })?;
    if let Some(message) = parsed.error {
        return Err(GenerationError::Stream(message));
    }
    Ok(Some((parsed.response, parsed.done)))
}

#[async_trait]
impl GenerationClient for OllamaGenerator {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn stream(&self, request: GenerationRequest) -> Result<TextStream, GenerationError> {
        let payload = json!({
            "model": self.model,
            "system": request.system,
            "prompt": request.prompt,
            "stream": true,
            "options": {
                "temperature": self.sampling.temperature,
                "num_predict": self.sampling.max_tokens,
            }
        });

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                GenerationError::ProviderUnavailable(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(GenerationError::ProviderUnavailable(format!(
                "Ollama endpoint {} returned 404",
                self.endpoint()
            )));
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::RequestFailed(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        tracing::debug!(model = %self.model, "Ollama generation stream opened");
        Ok(Box::pin(read_deltas(response.bytes_stream())))
    }
}

/// Turn the raw NDJSON body into text deltas, stopping at the record flagged `done`.
///
/// A body that ends without such a record was cut off and ends the stream with an error.
fn read_deltas<S, B>(body: S) -> impl Stream<Item = Result<String, GenerationError>> + Send
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    try_stream! {
        let mut body = Box::pin(body);
        let mut buffer = LineBuffer::default();
        let mut finished = false;
        while !finished {
            let Some(chunk) = body.next().await else { break };
            let chunk = chunk.map_err(|error| GenerationError::Stream(error.to_string()))?;
            for line in buffer.push(chunk.as_ref()) {
                if let Some((delta, done)) = parse_line(&line)? {
                    if !delta.is_empty() {
                        yield delta;
                    }
                    if done {
                        finished = true;
                        break;
                    }
                }
            }
        }
        if !finished {
            if let Some(line) = buffer.finish() {
                if let Some((delta, done)) = parse_line(&line)? {
                    if !delta.is_empty() {
                        yield delta;
                    }
                    finished = done;
                }
            }
        }
        if !finished {
            Err::<(), _>(GenerationError::Stream(TRUNCATED.to_string()))?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    fn generator(base_url: String) -> OllamaGenerator {
        OllamaGenerator::new(base_url, "llama".into(), SamplingOptions::default()).expect("client")
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            system: "Be brief.".into(),
            prompt: "Say hello".into(),
        }
    }

    async fn collect(stream: TextStream) -> Vec<Result<String, GenerationError>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn streams_deltas_until_done() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/generate")
                    .json_body_partial(r#"{"model":"llama","stream":true}"#);
                then.status(200).body(concat!(
                    "{\"response\":\"Hel\",\"done\":false}\n",
                    "{\"response\":\"lo\",\"done\":false}\n",
                    "{\"response\":\"\",\"done\":true}\n",
                ));
            })
            .await;

        let stream = generator(server.base_url()).stream(request()).await.unwrap();
        let deltas: Vec<String> = collect(stream)
            .await
            .into_iter()
            .map(|delta| delta.unwrap())
            .collect();

        mock.assert_async().await;
        assert_eq!(deltas, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn error_status_fails_before_streaming() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(500).body("boom");
            })
            .await;

        let error = match generator(server.base_url()).stream(request()).await {
            Ok(_) => panic!("expected failure"),
            Err(error) => error,
        };
        assert!(matches!(error, GenerationError::RequestFailed(message) if message.contains("500")));
    }

    #[tokio::test]
    async fn inline_error_record_ends_stream_with_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(200).body(concat!(
                    "{\"response\":\"partial\",\"done\":false}\n",
                    "{\"error\":\"model crashed\"}\n",
                ));
            })
            .await;

        let stream = generator(server.base_url()).stream(request()).await.unwrap();
        let items = collect(stream).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_deref().ok(), Some("partial"));
        assert!(matches!(&items[1], Err(GenerationError::Stream(message)) if message == "model crashed"));
    }

    #[tokio::test]
    async fn records_split_across_chunks_are_reassembled() {
        let chunks: Vec<Result<&'static [u8], reqwest::Error>> = vec![
            Ok(b"{\"response\":\"caf".as_slice()),
            Ok("\u{e9}\",\"done\":false}\n{\"resp".as_bytes()),
            Ok(b"onse\":\"!\",\"done\":true}\n{\"response\":\"ignored\"}\n".as_slice()),
        ];
        let deltas: Vec<String> = read_deltas(futures_util::stream::iter(chunks))
            .map(|delta| delta.unwrap())
            .collect()
            .await;
        assert_eq!(deltas, vec!["caf\u{e9}", "!"]);
    }

    #[tokio::test]
    async fn body_without_done_record_ends_with_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(200)
                    .body("{\"response\":\"Half an \",\"done\":false}\n");
            })
            .await;

        let stream = generator(server.base_url()).stream(request()).await.unwrap();
        let items = collect(stream).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_deref().ok(), Some("Half an "));
        assert!(matches!(&items[1], Err(GenerationError::Stream(message)) if message == TRUNCATED));
    }

    #[tokio::test]
    async fn unterminated_final_record_is_parsed() {
        let chunks: Vec<Result<&'static [u8], reqwest::Error>> = vec![
            Ok(b"{\"response\":\"Hi\",\"done\":false}\n".as_slice()),
            Ok(b"{\"response\":\"!\",\"done\":true}".as_slice()),
        ];
        let deltas: Vec<String> = read_deltas(futures_util::stream::iter(chunks))
            .map(|delta| delta.unwrap())
            .collect()
            .await;
        assert_eq!(deltas, vec!["Hi", "!"]);
    }

    #[test]
    fn blank_lines_are_skipped() {
        assert!(parse_line("   ").unwrap().is_none());
        assert!(matches!(
            parse_line("not json"),
            Err(GenerationError::InvalidResponse(_))
        ));
    }
}
