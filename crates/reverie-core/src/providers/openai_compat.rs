//! OpenAI-compatible `/chat/completions` wire format shared by OpenRouter and LM Studio.

use serde::{Deserialize, Serialize};

use super::{model_id, ChatRequest, ChatRole};
use crate::error::{ReverieError, ReverieResult};

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Build the JSON body with the system prompt as the first message.
pub fn completion_body(request: &ChatRequest) -> serde_json::Value {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if !request.system.is_empty() {
        messages.push(WireMessage {
            role: ChatRole::System.as_str(),
            content: &request.system,
        });
    }
    messages.extend(request.messages.iter().map(|m| WireMessage {
        role: m.role.as_str(),
        content: &m.content,
    }));
    let body = CompletionRequest {
        model: model_id(&request.model),
        messages,
        temperature: request.temperature,
        max_tokens: request.max_tokens,
    };
    serde_json::to_value(body).unwrap_or_default()
}

/// Send a prepared request and pull `choices[0].message.content` out of the reply.
pub async fn send(builder: reqwest::RequestBuilder, body: &serde_json::Value) -> ReverieResult<String> {
    let response = builder.json(body).send().await?;
    if !response.status().is_success() {
        return Err(ReverieError::from_response(response).await);
    }
    let text = response.text().await?;
    extract_content(&text)
}

pub fn extract_content(raw: &str) -> ReverieResult<String> {
    let parsed: CompletionResponse =
        serde_json::from_str(raw).map_err(|e| ReverieError::Malformed(e.to_string()))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .map(|s| s.trim().to_string())
        .ok_or_else(|| ReverieError::Malformed("response has no choices[0].message.content".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ChatMessage;

    #[test]
    fn system_goes_first() {
        let request = ChatRequest {
            messages: vec![ChatMessage::user("hi")],
            system: "be nice".into(),
            model: "meta-llama/llama-3.3-70b-instruct (llama)".into(),
            max_tokens: 1024,
            temperature: 0.7,
        };
        let body = completion_body(&request);
        assert_eq!(body["model"], "meta-llama/llama-3.3-70b-instruct");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "be nice");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["max_tokens"], 1024);
    }

    #[test]
    fn missing_content_is_malformed() {
        let err = extract_content(r#"{"choices": []}"#).unwrap_err();
        assert!(matches!(err, ReverieError::Malformed(_)));
        let ok = extract_content(r#"{"choices":[{"message":{"content":" hey "}}]}"#).unwrap();
        assert_eq!(ok, "hey");
    }
}
