//! Text generation sources.
//!
//! A [`GenerationSource`] turns one assembled prompt into a lazy stream of
//! text fragments. The gateway only relies on fragment order and on the
//! stream ending either cleanly or with a [`GenerationError`].

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Ordered fragments of one generation, ending at the first error or `None`.
pub type FragmentStream = BoxStream<'static, Result<String, GenerationError>>;

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Model API returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Malformed event payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Generation blocked: {0}")]
    Blocked(String),

    #[error("Generation interrupted: {0}")]
    Interrupted(String),
}

/// Something that can start a streamed generation for a prompt.
pub trait GenerationSource: Send + Sync {
    /// Starts generating. Errors returned here happen before any fragment
    /// exists; errors inside the stream happen mid-generation.
    fn start(&self, prompt: String) -> BoxFuture<'_, Result<FragmentStream, GenerationError>>;
}

/// Streams completions from the Gemini `streamGenerateContent` endpoint.
#[derive(Clone)]
pub struct GeminiSource {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiSource {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }
}

impl GeminiSource {
    async fn stream(&self, prompt: String) -> Result<FragmentStream, GenerationError> {
        let url = self.endpoint();
        debug!(url = %url, model = %self.model, "Starting streamed generation");

        let body = GenerateRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part { text: Some(prompt) }],
            }],
        };

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Model API rejected generation request");
            return Err(GenerationError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.bytes_stream().boxed();
        let fragments = stream::unfold(
            (body, SseDecoder::default(), false),
            |(mut body, mut decoder, finished)| async move {
                if finished {
                    return None;
                }
                match body.next().await {
                    Some(Ok(bytes)) => Some((decoder.push(&bytes), (body, decoder, false))),
                    Some(Err(e)) => Some((vec![Err(GenerationError::Transport(e))], (body, decoder, true))),
                    None => Some((decoder.finish(), (body, decoder, true))),
                }
            },
        )
        .flat_map(stream::iter);

        Ok(fragments.boxed())
    }
}

impl GenerationSource for GeminiSource {
    fn start(&self, prompt: String) -> BoxFuture<'_, Result<FragmentStream, GenerationError>> {
        Box::pin(self.stream(prompt))
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

/// Finish reasons the API uses when it withholds the rest of a response.
const BLOCKING_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "RECITATION",
    "LANGUAGE",
    "BLOCKLIST",
    "PROHIBITED_CONTENT",
    "SPII",
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
}

impl GenerateChunk {
    /// The text carried by this chunk, `None` if it carries nothing, or the
    /// error that ends the generation.
    fn into_fragment(self) -> Result<Option<String>, GenerationError> {
        if let Some(error) = self.error {
            return Err(GenerationError::Upstream {
                status: error.code,
                body: error.message,
            });
        }

        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(GenerationError::Blocked(format!("prompt blocked ({reason})")));
        }

        let Some(candidate) = self.candidates.into_iter().next() else {
            return Ok(None);
        };

        if let Some(reason) = candidate.finish_reason.as_deref() {
            if BLOCKING_FINISH_REASONS.contains(&reason) {
                return Err(GenerationError::Blocked(format!("response stopped ({reason})")));
            }
        }

        let text: String = candidate
            .content
            .map(|content| content.parts.into_iter().filter_map(|part| part.text).collect())
            .unwrap_or_default();

        Ok((!text.is_empty()).then_some(text))
    }
}

/// Incremental decoder for a server-sent event body.
///
/// Bytes may split lines (and UTF-8 sequences) anywhere, so incomplete lines
/// stay buffered until their newline arrives. The `data:` lines of one event
/// are joined and decoded when the blank line closing the event shows up.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<Result<String, GenerationError>> {
        self.buffer.extend_from_slice(bytes);

        let mut fragments = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            self.feed_line(line.trim_end_matches(['\n', '\r']), &mut fragments);
        }

        fragments
    }

    /// Flushes whatever is left once the body has ended.
    fn finish(&mut self) -> Vec<Result<String, GenerationError>> {
        let mut fragments = Vec::new();
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest);
            self.feed_line(line.trim_end_matches('\r'), &mut fragments);
        }
        self.dispatch(&mut fragments);
        fragments
    }

    fn feed_line(&mut self, line: &str, fragments: &mut Vec<Result<String, GenerationError>>) {
        if line.is_empty() {
            self.dispatch(fragments);
            return;
        }

        // Comments and other fields carry nothing we use.
        if let Some(value) = line.strip_prefix("data:") {
            self.data
                .push(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
    }

    fn dispatch(&mut self, fragments: &mut Vec<Result<String, GenerationError>>) {
        if self.data.is_empty() {
            return;
        }
        let payload = self.data.join("\n");
        self.data.clear();

        let payload = payload.trim();
        if payload.is_empty() || payload == "[DONE]" {
            return;
        }

        match serde_json::from_str::<GenerateChunk>(payload) {
            Ok(chunk) => match chunk.into_fragment() {
                Ok(Some(text)) => fragments.push(Ok(text)),
                Ok(None) => {}
                Err(e) => fragments.push(Err(e)),
            },
            Err(e) => fragments.push(Err(GenerationError::Decode(e))),
        }
    }
}
