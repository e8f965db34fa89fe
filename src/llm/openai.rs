use std::time::Duration;

use agent_core::{InferenceError, ModelClient, ModelTurn};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Generation stops at the closing tag; the envelope parser tolerates it
/// being absent.
const STOP_TOKENS: [&str; 3] = ["</tool_call>", "<|im_end|>", "<|endoftext|>"];

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: Option<f32>,
    pub timeout: Duration,
}

/// Chat-completions client for OpenAI-compatible servers (LM Studio,
/// vLLM, hosted APIs).
pub struct OpenAiClient {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self, InferenceError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| {
                InferenceError::transport(format!("failed to build HTTP client: {err}"))
            })?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn build_request(&self, system: &str, brief: &str, turn: &ModelTurn) -> ChatCompletionRequest {
        let mut parts = Vec::with_capacity(2);
        if let Some(image) = &turn.image {
            parts.push(ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: format!("data:image/png;base64,{}", STANDARD.encode(&image.png)),
                },
            });
        }
        parts.push(ContentPart::Text {
            text: turn.text.clone(),
        });

        ChatCompletionRequest {
            model: self.config.model.clone(),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            top_p: self.config.top_p,
            stop: STOP_TOKENS.iter().map(|s| s.to_string()).collect(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: MessageContent::Text(system.to_string()),
                },
                ChatMessage {
                    role: "user",
                    content: MessageContent::Text(brief.to_string()),
                },
                ChatMessage {
                    role: "user",
                    content: MessageContent::Parts(parts),
                },
            ],
        }
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn complete(
        &self,
        system: &str,
        brief: &str,
        turn: &ModelTurn,
    ) -> Result<String, InferenceError> {
        let body = self.build_request(system, brief, turn);
        debug!(
            target: "openai",
            model = %self.config.model,
            with_image = turn.image.is_some(),
            "chat completion request"
        );

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| InferenceError::transport(format!("request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "<response unavailable>".to_string());
            let err = classify_status(status, &text);
            warn!(target: "openai", %status, error = %err, "chat completion rejected");
            return Err(err);
        }

        let response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|err| InferenceError::transport(format!("response invalid: {err}")))?;
        if let Some(usage) = &response.usage {
            debug!(
                target: "openai",
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "chat completion usage"
            );
        }

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .and_then(|content| content.as_text())
            .filter(|text| !text.trim().is_empty())
            .ok_or(InferenceError::EmptyResponse)
    }
}

/// Rate limits and server errors are worth retrying; other client errors
/// are not.
fn classify_status(status: StatusCode, body: &str) -> InferenceError {
    let detail = error_message(body).unwrap_or_else(|| body.trim().to_string());
    let message = format!("{} {}", status.as_u16(), detail);
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        InferenceError::transport(message)
    } else {
        InferenceError::rejected(message)
    }
}

fn error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .map(|envelope| envelope.error.message)
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    stop: Vec<String>,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatCompletionChoice>,
    #[serde(default)]
    usage: Option<ChatCompletionUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionMessage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionMessage {
    #[serde(default)]
    content: Option<ChatCompletionContent>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ChatCompletionContent {
    Text(String),
    Parts(Vec<ChatCompletionPart>),
}

impl ChatCompletionContent {
    fn as_text(self) -> Option<String> {
        match self {
            ChatCompletionContent::Text(value) => Some(value),
            ChatCompletionContent::Parts(parts) => {
                let text = parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<Vec<_>>()
                    .join("\n");
                (!text.is_empty()).then_some(text)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorMessage,
}

#[derive(Debug, Deserialize)]
struct ErrorMessage {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::{ImageSize, PromptImage};
    use serde_json::{json, Value};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn config(base_url: &str) -> OpenAiConfig {
        OpenAiConfig {
            base_url: base_url.to_string(),
            api_key: "lm-studio".into(),
            model: "microsoft_fara-7b".into(),
            temperature: 0.1,
            max_tokens: 768,
            top_p: Some(0.85),
            timeout: Duration::from_secs(5),
        }
    }

    /// Serve one HTTP response and hand back the request body.
    async fn serve_once(status: u16, body: &'static str) -> (String, tokio::task::JoinHandle<Value>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 8192];
            let request_body = loop {
                let n = socket.read(&mut chunk).await.unwrap();
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf).to_string();
                if let Some((head, rest)) = text.split_once("\r\n\r\n") {
                    let length = head
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if rest.len() >= length {
                        break rest.to_string();
                    }
                }
            };
            let response = format!(
                "HTTP/1.1 {status} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            serde_json::from_str(&request_body).unwrap()
        });
        (format!("http://{addr}/v1"), handle)
    }

    #[test]
    fn request_carries_image_then_text() {
        let client = OpenAiClient::new(config("http://localhost:1234/v1")).unwrap();
        let turn = ModelTurn::text("Round 1").with_image(Some(PromptImage {
            png: vec![1, 2, 3],
            size: ImageSize::new(28, 28),
        }));
        let request = serde_json::to_value(client.build_request("sys", "brief", &turn)).unwrap();

        assert_eq!(request["top_p"], json!(0.85f32));
        assert_eq!(request["stop"][0], json!("</tool_call>"));
        assert_eq!(request["messages"][0]["content"], json!("sys"));
        assert_eq!(request["messages"][1]["content"], json!("brief"));
        let parts = &request["messages"][2]["content"];
        assert_eq!(parts[0]["type"], json!("image_url"));
        assert_eq!(parts[0]["image_url"]["url"], json!("data:image/png;base64,AQID"));
        assert_eq!(parts[1], json!({ "type": "text", "text": "Round 1" }));
    }

    #[test]
    fn top_p_is_omitted_when_unset() {
        let mut cfg = config("https://api.example.com/v1");
        cfg.top_p = None;
        let client = OpenAiClient::new(cfg).unwrap();
        let request =
            serde_json::to_value(client.build_request("s", "b", &ModelTurn::text("t"))).unwrap();
        assert!(request.get("top_p").is_none());
    }

    #[test]
    fn status_classification() {
        let limited = classify_status(
            StatusCode::TOO_MANY_REQUESTS,
            r#"{"error":{"message":"slow down"}}"#,
        );
        assert_eq!(limited, InferenceError::transport("429 slow down"));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, "upstream"),
            InferenceError::Transport(_)
        ));
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED, "bad key"),
            InferenceError::rejected("401 bad key")
        );
    }

    #[tokio::test]
    async fn returns_message_content() {
        let (base, server) = serve_once(
            200,
            r#"{"choices":[{"message":{"role":"assistant","content":"<tool_call>{}</tool_call>"}}],"usage":{"prompt_tokens":10,"completion_tokens":5}}"#,
        )
        .await;
        let client = OpenAiClient::new(config(&base)).unwrap();

        let reply = client
            .complete("sys", "brief", &ModelTurn::text("go"))
            .await
            .unwrap();
        assert_eq!(reply, "<tool_call>{}</tool_call>");
        let request = server.await.unwrap();
        assert_eq!(request["model"], json!("microsoft_fara-7b"));
        assert_eq!(request["max_tokens"], json!(768));
    }

    #[tokio::test]
    async fn null_content_is_an_empty_response() {
        let (base, _server) =
            serve_once(200, r#"{"choices":[{"message":{"content":null}}]}"#).await;
        let client = OpenAiClient::new(config(&base)).unwrap();

        let err = client
            .complete("sys", "brief", &ModelTurn::text("go"))
            .await
            .unwrap_err();
        assert_eq!(err, InferenceError::EmptyResponse);
    }

    #[tokio::test]
    async fn client_errors_are_rejected() {
        let (base, _server) =
            serve_once(400, r#"{"error":{"message":"model not loaded"}}"#).await;
        let client = OpenAiClient::new(config(&base)).unwrap();

        let err = client
            .complete("sys", "brief", &ModelTurn::text("go"))
            .await
            .unwrap_err();
        assert_eq!(err, InferenceError::rejected("400 model not loaded"));
    }
}
