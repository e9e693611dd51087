//! Language model backend for everything the local intents don't cover.
//!
//! [`OllamaAgent`] sends the system prompt and the user's words to a
//! local model through [`ollama-rs`](https://crates.io/crates/ollama-rs)
//! and tidies the reply so it can be read aloud.

use async_trait::async_trait;
use ollama_rs::generation::chat::request::ChatMessageRequest;
use ollama_rs::generation::chat::ChatMessage;
use ollama_rs::Ollama;
use reqwest::Url;

use crate::error::BackendError;

#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat(&self, system_prompt: &str, user_text: &str) -> Result<String, BackendError>;
}

/// Chat client for a model served by a local Ollama instance.
pub struct OllamaAgent {
    client: Ollama,
    model: String,
}

impl OllamaAgent {
    /// `url` is the server root including the port, e.g.
    /// `http://localhost:11434`; `None` uses the client default.
    pub fn new(url: Option<Url>, model: &str) -> Self {
        Self {
            client: url.map(Ollama::from_url).unwrap_or_default(),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl ChatBackend for OllamaAgent {
    async fn chat(&self, system_prompt: &str, user_text: &str) -> Result<String, BackendError> {
        let request = ChatMessageRequest::new(
            self.model.clone(),
            vec![
                ChatMessage::system(system_prompt.to_string()),
                ChatMessage::user(user_text.to_string()),
            ],
        );
        log::debug!("LLM request ({}): {}", self.model, user_text);
        let response = self
            .client
            .send_chat_messages(request)
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;
        log::debug!("Raw LLM response: {}", response.message.content);
        Ok(clean_reply(&response.message.content))
    }
}

/// Make a model reply fit for speech: drop any `<think>` block, fenced
/// code and inline backticks. An empty result becomes a short request to
/// repeat.
pub fn clean_reply(raw: &str) -> String {
    let mut answer = raw.trim().to_string();

    if let (Some(start), Some(end)) = (answer.find("<think>"), answer.find("</think>")) {
        if start < end {
            let thought = answer[start + "<think>".len()..end].trim();
            log::debug!("Dropped think block: {}", thought);
            let before = &answer[..start];
            let after = &answer[end + "</think>".len()..];
            answer = format!("{}{}", before.trim_end(), after).trim().to_string();
        }
    }

    if answer.contains("```") {
        let mut cleaned = String::new();
        let mut in_code = false;
        for line in answer.lines() {
            if line.trim_start().starts_with("```") {
                in_code = !in_code;
                continue;
            }
            if !in_code {
                cleaned.push_str(line);
                cleaned.push('\n');
            }
        }
        answer = cleaned.trim().to_string();
    }

    if answer.contains('`') {
        answer = answer.replace('`', "");
    }

    if answer.trim().is_empty() {
        return "I didn't catch that. Could you repeat your command?".to_string();
    }
    answer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_think_block() {
        let raw = "<think>user wants a joke</think>\n\nWhy did the crab never share? Because he's shellfish.";
        assert_eq!(
            clean_reply(raw),
            "Why did the crab never share? Because he's shellfish."
        );
    }

    #[test]
    fn removes_code_fences_and_backticks() {
        let raw = "Use the `ls` command.\n```bash\nls -la\n```\nThat lists files.";
        assert_eq!(clean_reply(raw), "Use the ls command.\nThat lists files.");
    }

    #[test]
    fn empty_reply_asks_to_repeat() {
        assert_eq!(
            clean_reply("<think>hmm</think>"),
            "I didn't catch that. Could you repeat your command?"
        );
        assert_eq!(
            clean_reply("   "),
            "I didn't catch that. Could you repeat your command?"
        );
    }

    #[test]
    fn plain_reply_is_untouched() {
        assert_eq!(
            clean_reply("Quantum tunneling lets particles cross barriers."),
            "Quantum tunneling lets particles cross barriers."
        );
    }

    #[tokio::test]
    async fn unreachable_server_is_a_request_error() {
        // Port 9 (discard) is closed on test machines.
        let url = Url::parse("http://127.0.0.1:9").unwrap();
        let agent = OllamaAgent::new(Some(url), "none");
        let err = agent.chat("sys", "hello").await.unwrap_err();
        assert!(matches!(err, BackendError::Request(_)));
    }
}
