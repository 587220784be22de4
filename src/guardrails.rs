// src/guardrails.rs
//
// Content-policy gate over user questions. The classifier itself is the
// inference gateway; this layer only owns the verdict contract.
use crate::errors::ChatError;
use crate::llm_client::CompletionModel;
use async_trait::async_trait;
use std::sync::Arc;

const CLASSIFY_PROMPT: &str = "You are a content policy classifier for an enterprise support \
    assistant. Classify the question below. Reply with exactly one word: SAFE if the question \
    is an ordinary product or support question, UNSAFE if it requests harmful, dangerous, or \
    abusive content.\nQuestion: {question}";

#[async_trait]
pub trait GuardRails: Send + Sync {
    /// Ok when the question may proceed; `ChatError::GuardRails` when policy
    /// vetoes it.
    async fn validate_user_question(&self, question: &str) -> Result<(), ChatError>;
}

pub struct LlmGuardRails {
    llm: Arc<dyn CompletionModel>,
}

impl LlmGuardRails {
    pub fn new(llm: Arc<dyn CompletionModel>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl GuardRails for LlmGuardRails {
    async fn validate_user_question(&self, question: &str) -> Result<(), ChatError> {
        let prompt = CLASSIFY_PROMPT.replace("{question}", question);
        let verdict = self.llm.complete(&prompt).await?;
        if verdict.trim().to_uppercase().contains("UNSAFE") {
            tracing::warn!("guardrails rejected question");
            return Err(ChatError::GuardRails);
        }
        Ok(())
    }
}
