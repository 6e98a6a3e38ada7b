//! OpenAI-compatible provider.
//!
//! Moderation scores and tags come from the chat completions endpoint in JSON
//! mode; vectors come from `/embeddings`. Works with OpenAI, Groq, OpenRouter,
//! vLLM and anything else speaking the same API.

use super::provider::{AiProvider, AnalysisInput, ProviderError};
use crate::content_store::{ModerationScores, TagSet, TagSuggestion};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const MODERATION_SYSTEM_PROMPT: &str = "\
You are an AI moderation system specializing in the detection of NSFW and toxic language across multiple languages, including English and Egyptian Arabic.
Analyze the given text and output the likelihood (a probability between 0 and 1) that it falls into each of these categories: \
Toxicity, SevereToxicity, Obscene, Threat, Insult, IdentityAttack, SexualExplicit.
Base your evaluation on meaning, intent and context, not on isolated words.
Respond with a single JSON object with exactly those seven numeric fields, rounded to five decimal places, and nothing else.";

const TAGGING_SYSTEM_PROMPT: &str = "\
You categorize posts on a professional social network whose users write in English, Egyptian Arabic, or a mix of both.
Detect the language of the post (one of English, Arabic, Mixed, Other) and produce between 3 and 6 lowercase tags.
Each tag has an EnglishName, an ArabicName (Egyptian Arabic) and a short English Description.
Respond with a single JSON object of the form {\"language\": ..., \"tags\": [{\"EnglishName\": ..., \"ArabicName\": ..., \"Description\": ...}]} and nothing else.";

pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    model: String,
    embedding_model: String,
    api_key: Option<String>,
    request_timeout: Duration,
}

impl OpenAiProvider {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        embedding_model: impl Into<String>,
        api_key: Option<String>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            embedding_model: embedding_model.into(),
            api_key,
            request_timeout,
        }
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("Authorization", format!("Bearer {}", key)),
            None => builder,
        }
    }

    async fn post_json<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp, ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .authorized(self.client.post(&url).json(body))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::Connection(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        response.json().await.map_err(|e| {
            ProviderError::MalformedResponse(format!("Failed to parse {} response: {}", path, e))
        })
    }

    async fn chat_json(&self, system_prompt: &str, user_prompt: String) -> Result<String, ProviderError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            temperature: 0.0,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };

        let response: ChatResponse = self.post_json("/chat/completions", &request).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::MalformedResponse("No content in chat response".into()))
    }
}

/// Parses the JSON body the moderation prompt asks for.
pub(crate) fn parse_scores(content: &str) -> Result<ModerationScores, ProviderError> {
    let raw: RawScores = serde_json::from_str(strip_code_fence(content))
        .map_err(|e| ProviderError::MalformedResponse(format!("Invalid scores JSON: {}", e)))?;
    Ok(ModerationScores {
        toxicity: raw.toxicity,
        severe_toxicity: raw.severe_toxicity,
        obscene: raw.obscene,
        threat: raw.threat,
        insult: raw.insult,
        identity_attack: raw.identity_attack,
        sexual_explicit: raw.sexual_explicit,
    })
}

/// Parses the JSON body the tagging prompt asks for.
pub(crate) fn parse_tags(content: &str) -> Result<TagSet, ProviderError> {
    let raw: RawTagSet = serde_json::from_str(strip_code_fence(content))
        .map_err(|e| ProviderError::MalformedResponse(format!("Invalid tags JSON: {}", e)))?;
    Ok(TagSet {
        language: raw.language,
        tags: raw
            .tags
            .into_iter()
            .map(|t| TagSuggestion {
                english: t.english_name.to_lowercase(),
                arabic: t.arabic_name,
                description: t.description,
            })
            .collect(),
    })
}

// Some models wrap JSON mode output in a markdown fence anyway
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

#[async_trait]
impl AiProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn score_toxicity(
        &self,
        input: &AnalysisInput,
    ) -> Result<ModerationScores, ProviderError> {
        debug!(content_id = %input.content_id, model = %self.model, "Requesting toxicity scores");
        let content = self
            .chat_json(
                MODERATION_SYSTEM_PROMPT,
                format!(
                    "Analyze the following text and return the classification.\nThe text is:\n{}",
                    input.prompt_text()
                ),
            )
            .await?;
        parse_scores(&content)
    }

    async fn suggest_tags(&self, input: &AnalysisInput) -> Result<TagSet, ProviderError> {
        debug!(content_id = %input.content_id, model = %self.model, "Requesting tags");
        let mut prompt = String::new();
        if let Some(title) = input.title.as_deref() {
            prompt.push_str(&format!("Title: {}\n", title));
        }
        prompt.push_str(&format!("Content: {}", input.content));
        let content = self.chat_json(TAGGING_SYSTEM_PROMPT, prompt).await?;
        parse_tags(&content)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let request = EmbeddingRequest {
            model: &self.embedding_model,
            input: text,
        };
        let response: EmbeddingResponse = self.post_json("/embeddings", &request).await?;
        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ProviderError::MalformedResponse("No data in embedding response".into()))
    }
}

// OpenAI API types

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct RawScores {
    #[serde(rename = "Toxicity", alias = "toxicity")]
    toxicity: f64,
    #[serde(rename = "SevereToxicity", alias = "severe_toxicity")]
    severe_toxicity: f64,
    #[serde(rename = "Obscene", alias = "obscene")]
    obscene: f64,
    #[serde(rename = "Threat", alias = "threat")]
    threat: f64,
    #[serde(rename = "Insult", alias = "insult")]
    insult: f64,
    #[serde(rename = "IdentityAttack", alias = "identity_attack")]
    identity_attack: f64,
    #[serde(rename = "SexualExplicit", alias = "sexual_explicit")]
    sexual_explicit: f64,
}

#[derive(Debug, Deserialize)]
struct RawTagSet {
    language: String,
    tags: Vec<RawTag>,
}

#[derive(Debug, Deserialize)]
struct RawTag {
    #[serde(rename = "EnglishName", alias = "english")]
    english_name: String,
    #[serde(rename = "ArabicName", alias = "arabic")]
    arabic_name: String,
    #[serde(rename = "Description", alias = "description")]
    description: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::json;

    #[test]
    fn test_parse_scores_accepts_both_casings() {
        let pascal = r#"{"Toxicity":0.9,"SevereToxicity":0.1,"Obscene":0,"Threat":0,"Insult":0.2,"IdentityAttack":0,"SexualExplicit":0}"#;
        let scores = parse_scores(pascal).unwrap();
        assert_eq!(scores.toxicity, 0.9);
        assert_eq!(scores.insult, 0.2);

        let snake = "```json\n{\"toxicity\":0.1,\"severe_toxicity\":0,\"obscene\":0,\"threat\":0,\"insult\":0,\"identity_attack\":0,\"sexual_explicit\":0.3}\n```";
        assert_eq!(parse_scores(snake).unwrap().sexual_explicit, 0.3);
    }

    #[test]
    fn test_parse_scores_rejects_missing_fields() {
        let err = parse_scores(r#"{"Toxicity":0.9}"#).unwrap_err();
        assert!(matches!(err, ProviderError::MalformedResponse(_)));
    }

    #[test]
    fn test_parse_tags_lowercases_english_names() {
        let content = json!({
            "language": "Mixed",
            "tags": [
                {"EnglishName": "Web Development", "ArabicName": "تطوير مواقع", "Description": "building websites"}
            ]
        })
        .to_string();
        let tags = parse_tags(&content).unwrap();
        assert_eq!(tags.language, "Mixed");
        assert_eq!(tags.tags[0].english, "web development");
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn provider(base_url: String) -> OpenAiProvider {
        OpenAiProvider::new(
            base_url,
            "test-model",
            "test-embed",
            Some("key".to_string()),
            Duration::from_secs(5),
        )
    }

    fn input() -> AnalysisInput {
        AnalysisInput {
            content_id: "p1".into(),
            title: Some("t".into()),
            content: "c".into(),
        }
    }

    #[tokio::test]
    async fn test_chat_completion_round_trip() {
        let router = Router::new().route(
            "/chat/completions",
            post(|| async {
                Json(json!({
                    "choices": [{"message": {"content": "{\"Toxicity\":0.05,\"SevereToxicity\":0,\"Obscene\":0,\"Threat\":0,\"Insult\":0,\"IdentityAttack\":0,\"SexualExplicit\":0}"}}]
                }))
            }),
        );
        let provider = provider(serve(router).await);
        let scores = provider.score_toxicity(&input()).await.unwrap();
        assert_eq!(scores.toxicity, 0.05);
    }

    #[tokio::test]
    async fn test_status_codes_map_to_errors() {
        let router = Router::new()
            .route(
                "/chat/completions",
                post(|| async { (StatusCode::TOO_MANY_REQUESTS, "slow down") }),
            )
            .route(
                "/embeddings",
                post(|| async { (StatusCode::UNAUTHORIZED, "bad key") }),
            );
        let provider = provider(serve(router).await);

        assert_eq!(
            provider.score_toxicity(&input()).await.unwrap_err(),
            ProviderError::RateLimited
        );
        let err = provider.embed("hello").await.unwrap_err();
        assert!(matches!(err, ProviderError::Api { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_embedding_response() {
        let router = Router::new().route(
            "/embeddings",
            post(|| async { Json(json!({"data": [{"embedding": [0.5, 0.25]}]})) }),
        );
        let provider = provider(serve(router).await);
        assert_eq!(provider.embed("hello").await.unwrap(), vec![0.5, 0.25]);
    }

    #[tokio::test]
    async fn test_connection_refused_is_connection_error() {
        let provider = provider("http://127.0.0.1:9".to_string());
        let err = provider.embed("hello").await.unwrap_err();
        assert!(matches!(
            err,
            ProviderError::Connection(_) | ProviderError::Timeout
        ));
    }
}
