//! Knowledge source backed by an Ollama-compatible `/api/chat` endpoint.

use std::time::Duration;

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};

use super::{ExpansionRequest, KnowledgePayload, KnowledgeSource, parse_payload};

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    format: &'a str,
}

#[derive(Deserialize)]
struct ChatReply {
    message: Option<ChatReplyMessage>,
}

#[derive(Deserialize)]
struct ChatReplyMessage {
    content: Option<String>,
}

pub struct OllamaSource {
    endpoint: String,
    model: String,
    client: reqwest::blocking::Client,
}

impl OllamaSource {
    pub fn new(endpoint: &str, model: &str) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(180))
            .build()?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
        })
    }

    fn system_prompt(request: &ExpansionRequest) -> String {
        match &request.path_context {
            None => format!(
                "Build a two-level knowledge map for the topic \"{topic}\". Reply with JSON only, shaped as \
                 {{\"root\": {{\"label\": \"{topic}\", \"desc\": \"...\"}}, \"children\": [{{\"label\": \"...\", \
                 \"desc\": \"...\", \"children\": [{{\"label\": \"...\", \"desc\": \"...\"}}]}}]}}. \
                 Give 4-5 first-level categories with 2-3 sub-categories each. Every desc is two or three sentences.",
                topic = request.topic
            ),
            Some(path) => format!(
                "Extend a knowledge map at the node \"{topic}\" (path: {path}). Reply with JSON only, shaped as \
                 {{\"nodes\": [{{\"label\": \"...\", \"desc\": \"...\", \"children\": [{{\"label\": \"...\", \
                 \"desc\": \"...\"}}]}}]}}. Give 3-5 sub-topics with 1-2 details each. Every desc is two or \
                 three sentences.",
                topic = request.topic,
                path = path
            ),
        }
    }
}

impl KnowledgeSource for OllamaSource {
    fn expand(&self, request: &ExpansionRequest) -> anyhow::Result<KnowledgePayload> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: Self::system_prompt(request) },
                ChatMessage { role: "user", content: format!("Map out {}", request.topic) },
            ],
            stream: false,
            format: "json",
        };
        let url = format!("{}/api/chat", self.endpoint);
        log::debug!("POST {} for '{}'", url, request.topic);

        let reply: ChatReply = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .with_context(|| format!("request to {} failed", url))?
            .error_for_status()?
            .json()?;
        let content = reply
            .message
            .and_then(|m| m.content)
            .ok_or_else(|| anyhow!("chat reply carries no message content"))?;
        Ok(parse_payload(&content)?)
    }
}
