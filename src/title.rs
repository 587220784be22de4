// src/title.rs
use crate::errors::ChatError;
use crate::llm_client::CompletionModel;
use std::sync::Arc;

/// Generates a short conversation title from the first question of a chat.
/// Trivial and unsafe questions never reach the language model.
pub struct TitleGenerator {
    llm: Arc<dyn CompletionModel>,
    prompt: String,
    min_question_length: usize,
}

impl TitleGenerator {
    pub fn new(llm: Arc<dyn CompletionModel>, prompt: String, min_question_length: usize) -> Self {
        Self {
            llm,
            prompt,
            min_question_length,
        }
    }

    pub async fn generate_title(
        &self,
        question: &str,
        is_question_safe: bool,
    ) -> Result<String, ChatError> {
        let trimmed = question.trim();

        // An inappropriate question becomes its own (truncated) title rather
        // than being fed back to the model.
        if !is_question_safe {
            return Ok(truncate_chars(trimmed, self.min_question_length));
        }

        if trimmed.chars().count() <= self.min_question_length {
            return Ok(trimmed.to_string());
        }

        let prompt = self.prompt.replace("{question}", trimmed);
        let raw = self.llm.complete(&prompt).await?;
        Ok(strip_title(&raw))
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Models like to wrap titles in quotes and stray whitespace; strip one
/// symmetric quote layer.
fn strip_title(raw: &str) -> String {
    let trimmed = raw.trim();
    let chars: Vec<char> = trimmed.chars().collect();
    let quoted = chars.len() >= 2
        && ((chars[0] == '"' && chars[chars.len() - 1] == '"')
            || (chars[0] == '\'' && chars[chars.len() - 1] == '\''));
    if quoted {
        chars[1..chars.len() - 1].iter().collect::<String>().trim().to_string()
    } else {
        trimmed.to_string()
    }
}
