use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;

use super::messages::{
    Content, GenerateContentRequest, GenerateContentResponse, GenerationConfig,
    history_to_contents,
};
use super::{ChatModel, GeminiError};
use crate::audio::InlineAudio;
use crate::config::{AiConfig, SpeechConfig};
use crate::protocol::ChatMessage;

/// `generateContent` client for chat replies and speech synthesis.
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    chat_model: String,
    system_prompt: String,
    tts_model: String,
    voice: String,
}

impl GeminiClient {
    pub fn new(ai: &AiConfig, speech: &SpeechConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(ai.timeout_ms))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_key: ai.api_key.trim().to_string(),
            base_url: ai.base_url.trim_end_matches('/').to_string(),
            chat_model: ai.model.clone(),
            system_prompt: ai.system_prompt.clone(),
            tts_model: speech.model.clone(),
            voice: speech.voice.clone(),
        })
    }

    async fn generate(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, GeminiError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        log::debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GeminiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<GenerateContentResponse>().await?)
    }
}

#[async_trait]
impl ChatModel for GeminiClient {
    async fn reply(&self, history: &[ChatMessage]) -> Result<String, GeminiError> {
        let contents = history_to_contents(history);
        if contents.is_empty() {
            return Err(GeminiError::EmptyConversation);
        }

        let system_instruction = if self.system_prompt.trim().is_empty() {
            None
        } else {
            Some(Content::text(None, self.system_prompt.clone()))
        };
        let request = GenerateContentRequest {
            contents,
            system_instruction,
            generation_config: None,
        };

        let response = self.generate(&self.chat_model, &request).await?;
        let text = response.text().ok_or(GeminiError::EmptyResponse)?;
        log::info!("AI reply received ({} chars)", text.chars().count());
        Ok(text)
    }

    async fn synthesize(&self, text: &str) -> Result<InlineAudio, GeminiError> {
        let request = GenerateContentRequest {
            contents: vec![Content::text(Some("user"), text)],
            system_instruction: None,
            generation_config: Some(GenerationConfig::audio(&self.voice)),
        };

        let response = self.generate(&self.tts_model, &request).await?;
        let audio = response.inline_audio().cloned().ok_or(GeminiError::NoAudio)?;
        log::info!(
            "Speech received: {} ({} base64 bytes)",
            audio.mime_type,
            audio.data.len()
        );
        Ok(audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::NewMessage;
    use chrono::Utc;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> GeminiClient {
        let ai = AiConfig {
            api_key: "test-key".to_string(),
            base_url: format!("{}/v1beta/", server.uri()),
            model: "chat-model".to_string(),
            system_prompt: "Be brief.".to_string(),
            ..AiConfig::default()
        };
        let speech = SpeechConfig {
            model: "tts-model".to_string(),
            voice: "Puck".to_string(),
            ..SpeechConfig::default()
        };
        GeminiClient::new(&ai, &speech).unwrap()
    }

    fn user_message(text: &str) -> ChatMessage {
        NewMessage {
            user_id: "u1".to_string(),
            nickname: "ada".to_string(),
            text: text.to_string(),
            is_ai: false,
        }
        .into_message("m1".to_string(), Utc::now())
    }

    #[tokio::test]
    async fn test_reply_sends_history_and_parses_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/chat-model:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .and(body_partial_json(json!({
                "contents": [{ "role": "user", "parts": [{ "text": "ada: what is rust?" }] }],
                "systemInstruction": { "parts": [{ "text": "Be brief." }] }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": { "role": "model", "parts": [{ "text": "A language." }] }
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let reply = client_for(&server)
            .reply(&[user_message("what is rust?")])
            .await
            .unwrap();
        assert_eq!(reply, "A language.");
    }

    #[tokio::test]
    async fn test_synthesize_returns_inline_audio() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/tts-model:generateContent"))
            .and(body_partial_json(json!({
                "generationConfig": {
                    "responseModalities": ["AUDIO"],
                    "speechConfig": { "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": "Puck" } } }
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": { "parts": [{
                        "inlineData": { "mimeType": "audio/L16;codec=pcm;rate=24000", "data": "AQACAA==" }
                    }] }
                }]
            })))
            .mount(&server)
            .await;

        let audio = client_for(&server).synthesize("hello").await.unwrap();
        assert_eq!(audio.data, "AQACAA==");
    }

    #[tokio::test]
    async fn test_http_error_keeps_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("quota exceeded"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .reply(&[user_message("hi")])
            .await
            .unwrap_err();
        match err {
            GeminiError::Status { status, body } => {
                assert_eq!(status, 429);
                assert_eq!(body, "quota exceeded");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_parts_are_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "candidates": [] })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert!(matches!(
            client.reply(&[user_message("hi")]).await,
            Err(GeminiError::EmptyResponse)
        ));
        assert!(matches!(client.synthesize("hi").await, Err(GeminiError::NoAudio)));
    }

    #[tokio::test]
    async fn test_history_without_user_turn_is_not_sent() {
        let server = MockServer::start().await;
        let client = client_for(&server);
        assert!(matches!(
            client.reply(&[]).await,
            Err(GeminiError::EmptyConversation)
        ));
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
