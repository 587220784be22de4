// src/workflow/agent.rs
//
// Production workflow: retrieval-augmented streaming answer from the
// inference gateway. Retrieval failures degrade to an uncited answer rather
// than failing the turn.
use crate::citations::{RetrievedSource, SourceMeta};
use crate::embeddings::EmbeddingsClient;
use crate::errors::ChatError;
use crate::llm_client::{GatewayMessage, LlmClient};
use crate::vector_store::{ScoredDocument, VectorStore};
use crate::workflow::{
    AgentWorkflow, HistoryMessage, WorkflowContext, WorkflowEvent, WorkflowHandle,
};
use async_trait::async_trait;
use futures::stream;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

const SYSTEM_PROMPT: &str = "You are a support assistant for the Nimbus infrastructure product \
    line. Answer using the documentation excerpts provided. If the excerpts do not cover the \
    question, say so instead of guessing.";

const RETRIEVAL_LIMIT: u64 = 5;

pub struct LlmAgentWorkflow {
    llm: Arc<LlmClient>,
    embeddings: Option<Arc<EmbeddingsClient>>,
    vector_store: Option<Arc<VectorStore>>,
    docs_collection: String,
}

impl LlmAgentWorkflow {
    pub fn new(
        llm: Arc<LlmClient>,
        embeddings: Option<Arc<EmbeddingsClient>>,
        vector_store: Option<Arc<VectorStore>>,
        docs_collection: String,
    ) -> Self {
        Self {
            llm,
            embeddings,
            vector_store,
            docs_collection,
        }
    }

    async fn retrieve_sources(
        &self,
        user_input: &str,
        context: &WorkflowContext,
    ) -> Vec<RetrievedSource> {
        let (Some(embeddings), Some(store)) = (&self.embeddings, &self.vector_store) else {
            return Vec::new();
        };

        let vector = match embeddings.generate_single_embedding(user_input.to_string()).await {
            Ok(vector) => vector,
            Err(e) => {
                tracing::warn!("doc retrieval skipped, embedding failed: {}", e);
                return Vec::new();
            }
        };

        let mut filters: Vec<(&str, String)> = Vec::new();
        if let Some(product) = context.products.first() {
            filters.push(("product", product.display_name().to_string()));
        }

        match store
            .search(&self.docs_collection, vector, RETRIEVAL_LIMIT, &filters)
            .await
        {
            Ok(documents) => documents.into_iter().map(source_from_document).collect(),
            Err(e) => {
                tracing::warn!("doc retrieval failed: {}", e);
                Vec::new()
            }
        }
    }
}

fn source_from_document(document: ScoredDocument) -> RetrievedSource {
    let text = document.payload["text"].as_str().unwrap_or_default().to_string();
    let meta: SourceMeta =
        serde_json::from_value(document.payload.clone()).unwrap_or_default();
    RetrievedSource {
        text,
        meta,
        score: document.score,
    }
}

fn build_messages(
    user_input: &str,
    chat_history: &[HistoryMessage],
    sources: &[RetrievedSource],
) -> Vec<GatewayMessage> {
    let mut system = SYSTEM_PROMPT.to_string();
    if !sources.is_empty() {
        system.push_str("\n\nDocumentation excerpts:\n");
        for source in sources {
            system.push_str("---\n");
            system.push_str(&source.text);
            system.push('\n');
        }
    }

    let mut messages = vec![GatewayMessage::system(system)];
    // History arrives newest-first from the store; the model wants
    // chronological order.
    for message in chat_history.iter().rev() {
        messages.push(GatewayMessage {
            role: message.role.as_str().to_string(),
            content: message.content.clone(),
        });
    }
    messages.push(GatewayMessage::user(user_input));
    messages
}

#[async_trait]
impl AgentWorkflow for LlmAgentWorkflow {
    async fn run(
        &self,
        user_input: &str,
        chat_history: Vec<HistoryMessage>,
        context: WorkflowContext,
    ) -> Result<WorkflowHandle, ChatError> {
        let sources = self.retrieve_sources(user_input, &context).await;
        let messages = build_messages(user_input, &chat_history, &sources);

        let mut deltas = self
            .llm
            .stream_chat(messages)
            .await
            .map_err(ChatError::Llm)?;

        let (event_tx, event_rx) = mpsc::channel::<WorkflowEvent>(16);
        let (result_tx, result_rx) = oneshot::channel();

        tokio::spawn(async move {
            if !sources.is_empty()
                && event_tx
                    .send(WorkflowEvent::Retrieval { sources })
                    .await
                    .is_err()
            {
                return;
            }

            while let Some(delta) = deltas.recv().await {
                match delta {
                    Ok(delta) => {
                        if event_tx
                            .send(WorkflowEvent::AgentDelta { delta })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = result_tx.send(Err(e));
                        return;
                    }
                }
            }
            let _ = result_tx.send(Ok(()));
        });

        let events = stream::unfold(event_rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });

        Ok(WorkflowHandle::new(Box::pin(events), result_rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::HistoryRole;

    #[test]
    fn test_build_messages_orders_history_chronologically() {
        // Store order is newest-first; the gateway gets oldest-first.
        let history = vec![
            HistoryMessage {
                role: HistoryRole::Assistant,
                content: "newest answer".to_string(),
            },
            HistoryMessage {
                role: HistoryRole::User,
                content: "oldest question".to_string(),
            },
        ];
        let messages = build_messages("next question", &history, &[]);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].content, "oldest question");
        assert_eq!(messages[2].content, "newest answer");
        assert_eq!(messages[3].content, "next question");
    }

    #[test]
    fn test_build_messages_embeds_doc_excerpts() {
        let sources = vec![RetrievedSource {
            text: "Expansion shelves require firmware 4.2.".to_string(),
            meta: Default::default(),
            score: 0.9,
        }];
        let messages = build_messages("How do I expand?", &[], &sources);
        assert!(messages[0]
            .content
            .contains("Expansion shelves require firmware 4.2."));
    }

    #[test]
    fn test_source_from_document_reads_payload_meta() {
        let document = ScoredDocument {
            id: "doc1".to_string(),
            score: 0.5,
            payload: serde_json::json!({
                "text": "chunk body",
                "filename": "kb42-array-health.md",
                "link": "https://kb.example.com/42",
                "modified_date": 1700000000
            }),
        };
        let source = source_from_document(document);
        assert_eq!(source.text, "chunk body");
        assert_eq!(source.meta.filename.as_deref(), Some("kb42-array-health.md"));
        assert_eq!(source.meta.modified_date, Some(1700000000));
        assert_eq!(source.score, 0.5);
    }
}
