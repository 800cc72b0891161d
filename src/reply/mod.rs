//! Reply generation — turns a queued inbound message into reply text.
//!
//! `LlmReplyGenerator` calls the Anthropic messages API directly over
//! `reqwest`, with the conversation history as context.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::config::GeneratorConfig;
use crate::error::DeliveryError;
use crate::queue::job::{JobPayload, MessageKind};
use crate::store::traits::{ConversationMessage, ConversationRegistry, MessageDirection};

/// Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// How many stored messages are sent as context.
const HISTORY_LIMIT: usize = 20;

const SYSTEM_PROMPT: &str = "\
Você é o assistente de atendimento de uma plataforma que conecta corretores e \
imobiliárias a compradores e inquilinos. Responda em português do Brasil, de \
forma cordial, objetiva e curta (no máximo 3 frases). Não invente imóveis, \
preços ou condições. Quando faltar informação, faça uma pergunta clara.";

#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    /// Produce the reply for `content` in the given conversation.
    async fn generate(
        &self,
        conversation_id: Uuid,
        content: &str,
        payload: &JobPayload,
    ) -> Result<String, DeliveryError>;
}

/// A turn in the request sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatTurn {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: String,
    messages: Vec<ChatTurn>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

pub struct LlmReplyGenerator {
    config: GeneratorConfig,
    conversations: Arc<dyn ConversationRegistry>,
    client: reqwest::Client,
}

impl LlmReplyGenerator {
    pub fn new(config: GeneratorConfig, conversations: Arc<dyn ConversationRegistry>) -> Self {
        tracing::info!("Using Anthropic (model: {})", config.model);
        Self {
            config,
            conversations,
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ReplyGenerator for LlmReplyGenerator {
    async fn generate(
        &self,
        conversation_id: Uuid,
        content: &str,
        payload: &JobPayload,
    ) -> Result<String, DeliveryError> {
        let conversation = self.conversations.get_conversation(conversation_id).await?;
        let history = self
            .conversations
            .recent_messages(conversation_id, HISTORY_LIMIT)
            .await?;

        let display_name = conversation.as_ref().and_then(|c| c.display_name.as_deref());
        let request = MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            system: build_system_prompt(display_name, payload),
            messages: build_turns(&history, content),
        };

        debug!(
            %conversation_id,
            turns = request.messages.len(),
            "Requesting reply"
        );

        let resp = self
            .client
            .post(self.endpoint())
            .header("x-api-key", self.config.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| DeliveryError::transient(format!("reply request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DeliveryError::from_status(status, &body));
        }

        let body: MessagesResponse = resp
            .json()
            .await
            .map_err(|e| DeliveryError::permanent(format!("invalid reply response: {e}")))?;

        completion_text(&body)
            .ok_or_else(|| DeliveryError::permanent("model returned an empty reply"))
    }
}

/// System prompt with the counterparty name and media context, when known.
fn build_system_prompt(display_name: Option<&str>, payload: &JobPayload) -> String {
    let mut prompt = SYSTEM_PROMPT.to_string();
    if let Some(name) = display_name {
        prompt.push_str(&format!("\n\nVocê está conversando com: {name}."));
    }
    if payload.message_kind != MessageKind::Text {
        prompt.push_str(&format!(
            "\n\nA última mensagem do contato incluiu um arquivo do tipo {}.",
            payload.message_kind.as_str()
        ));
        if payload.enrichment.as_ref().is_some_and(|e| e.failed) {
            prompt.push_str(" O conteúdo do arquivo não pôde ser lido; peça um resumo por texto.");
        }
    }
    prompt
}

/// Map stored history to alternating user/assistant turns ending with `content`.
///
/// Consecutive messages from the same side are merged and leading assistant
/// turns dropped, since the API requires the first turn to be the user's.
fn build_turns(history: &[ConversationMessage], content: &str) -> Vec<ChatTurn> {
    let mut turns: Vec<ChatTurn> = Vec::new();

    let mut push = |role: &'static str, text: &str| {
        if text.trim().is_empty() {
            return;
        }
        if let Some(last) = turns.last_mut().filter(|t| t.role == role) {
            last.content.push_str("\n\n");
            last.content.push_str(text);
        } else if !(turns.is_empty() && role == "assistant") {
            turns.push(ChatTurn {
                role,
                content: text.to_string(),
            });
        }
    };

    for msg in history {
        let role = match msg.direction {
            MessageDirection::Incoming => "user",
            MessageDirection::Outgoing => "assistant",
        };
        push(role, &msg.content);
    }

    let already_last = history
        .last()
        .is_some_and(|m| m.direction == MessageDirection::Incoming && m.content == content);
    if !already_last {
        push("user", content);
    }

    turns
}

fn completion_text(body: &MessagesResponse) -> Option<String> {
    let text: String = body
        .content
        .iter()
        .filter(|b| b.kind == "text")
        .filter_map(|b| b.text.as_deref())
        .collect::<Vec<_>>()
        .join("");
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeliveryErrorKind;
    use crate::queue::job::EnrichmentSummary;
    use crate::store::LibSqlBackend;
    use crate::store::traits::CounterpartyStore;
    use axum::{Json, Router, http::HeaderMap, http::StatusCode, routing::post};
    use chrono::Utc;

    fn msg(direction: MessageDirection, content: &str) -> ConversationMessage {
        ConversationMessage {
            id: Uuid::new_v4(),
            conversation_id: Uuid::nil(),
            direction,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    fn config(base_url: String) -> GeneratorConfig {
        GeneratorConfig {
            api_key: secrecy::SecretString::from("test-key".to_string()),
            model: "claude-test".into(),
            base_url,
            max_tokens: 100,
            temperature: 0.4,
        }
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });
        format!("http://{addr}")
    }

    async fn conversation_with(db: &LibSqlBackend, text: &str) -> Uuid {
        let cp = db
            .create_counterparty("5511999990000", "Imobiliária Sol")
            .await
            .unwrap();
        let conv = db
            .find_or_create(cp.id, "5511999990000", Some("Imobiliária Sol"))
            .await
            .unwrap();
        db.append_message(conv.id, MessageDirection::Incoming, text)
            .await
            .unwrap();
        conv.id
    }

    #[test]
    fn turns_alternate_and_end_with_user() {
        let history = vec![
            msg(MessageDirection::Outgoing, "Olá!"),
            msg(MessageDirection::Incoming, "Sou corretor"),
            msg(MessageDirection::Incoming, "Tenho um apartamento"),
            msg(MessageDirection::Outgoing, "Que ótimo!"),
        ];
        let turns = build_turns(&history, "Qual o próximo passo?");

        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].role, "user");
        assert_eq!(turns[0].content, "Sou corretor\n\nTenho um apartamento");
        assert_eq!(turns[1].role, "assistant");
        assert_eq!(turns[2].role, "user");
        assert_eq!(turns[2].content, "Qual o próximo passo?");
    }

    #[test]
    fn current_message_not_duplicated() {
        let history = vec![msg(MessageDirection::Incoming, "Tenho casa para venda")];
        let turns = build_turns(&history, "Tenho casa para venda");
        assert_eq!(turns.len(), 1);
    }

    #[test]
    fn system_prompt_mentions_name_and_unreadable_media() {
        let payload = JobPayload {
            message_kind: MessageKind::Document,
            media_ref: Some("media/doc.pdf".into()),
            enrichment: Some(EnrichmentSummary {
                failed: true,
                ..Default::default()
            }),
        };
        let prompt = build_system_prompt(Some("Imobiliária Sol"), &payload);
        assert!(prompt.contains("Imobiliária Sol"));
        assert!(prompt.contains("document"));
        assert!(prompt.contains("não pôde ser lido"));

        let plain = build_system_prompt(None, &JobPayload::default());
        assert_eq!(plain, SYSTEM_PROMPT);
    }

    #[test]
    fn completion_text_joins_text_blocks() {
        let body: MessagesResponse = serde_json::from_value(serde_json::json!({
            "content": [
                {"type": "text", "text": "Olá! "},
                {"type": "tool_use", "id": "x"},
                {"type": "text", "text": "Como posso ajudar?"}
            ]
        }))
        .unwrap();
        assert_eq!(
            completion_text(&body).as_deref(),
            Some("Olá! Como posso ajudar?")
        );

        let empty: MessagesResponse =
            serde_json::from_value(serde_json::json!({"content": []})).unwrap();
        assert!(completion_text(&empty).is_none());
    }

    #[tokio::test]
    async fn generates_reply_from_api() {
        let app = Router::new().route(
            "/v1/messages",
            post(|headers: HeaderMap, Json(body): Json<serde_json::Value>| async move {
                assert_eq!(headers["x-api-key"], "test-key");
                assert_eq!(body["model"], "claude-test");
                assert_eq!(body["messages"][0]["role"], "user");
                Json(serde_json::json!({
                    "content": [{"type": "text", "text": "Olá! Pode enviar as fotos?"}]
                }))
            }),
        );
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let conv = conversation_with(&db, "Tenho apartamento disponível").await;
        let generator = LlmReplyGenerator::new(config(serve(app).await), db);

        let reply = generator
            .generate(conv, "Tenho apartamento disponível", &JobPayload::default())
            .await
            .unwrap();
        assert_eq!(reply, "Olá! Pode enviar as fotos?");
    }

    #[tokio::test]
    async fn overloaded_api_is_transient() {
        let app = Router::new().route(
            "/v1/messages",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "overloaded") }),
        );
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let conv = conversation_with(&db, "oi").await;
        let generator = LlmReplyGenerator::new(config(serve(app).await), db);

        let err = generator
            .generate(conv, "oi", &JobPayload::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, DeliveryErrorKind::Transient);
    }

    #[tokio::test]
    async fn empty_completion_is_permanent() {
        let app = Router::new().route(
            "/v1/messages",
            post(|| async { Json(serde_json::json!({"content": []})) }),
        );
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let conv = conversation_with(&db, "oi").await;
        let generator = LlmReplyGenerator::new(config(serve(app).await), db);

        let err = generator
            .generate(conv, "oi", &JobPayload::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, DeliveryErrorKind::Permanent);
    }
}
