// src/chat_service.rs
//
// The chat-turn orchestrator. One call to `chat()` owns one turn end to end:
// identity, intake checks, persistence, the agent workflow, and the ordered
// chunk stream the HTTP layer forwards as server-sent events.
//
// Chunk order per path:
//   streaming turn:  html* -> references -> metadata -> title? -> complete
//   degraded turn:   references(empty) -> html(fixed) -> metadata -> title? -> complete
// `title` appears only on turns that created the chat; `complete` is always
// the last chunk.
use crate::auth::AuthGateway;
use crate::citations::citation_from_source;
use crate::errors::ChatError;
use crate::guardrails::GuardRails;
use crate::models::chat::{
    AppMeta, AuthorRole, Chat, ChatMessage, ChatMessageResponse, ChatRequest, ChatUpdate,
    Citation, LlmMeta, LlmModel, MessageFeedback, MessageMeta, PaginatedMessagesResponse,
    PaginationMeta, Product,
};
use crate::models::sse::{
    MessageReferences, SseChunk, SseMetadataChunk, SseTitleChunk,
};
use crate::sanitize::{sanitize_question, scan_sensitive};
use crate::storage::{ChatStore, MessageOrder};
use crate::title::TitleGenerator;
use crate::workflow::{
    AgentWorkflow, HistoryMessage, HistoryRole, WorkflowContext, WorkflowEvent,
};
use futures::stream::{self, Stream};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;

pub const GUARDRAILS_MESSAGE: &str = "Submitted question contains potentially sensitive or \
    harmful information. Please rephrase and resubmit the question without this information.";

pub const MISSING_PRODUCT_MESSAGE: &str = "To provide the best answer to your question, please \
    provide the product name of your system. An example of a product name is \"NimbusStore\".";

#[derive(Debug, Clone)]
pub struct TurnConfig {
    pub chat_history_limit: i64,
    pub llm_model: LlmModel,
}

/// In-memory state of one turn's response while the workflow streams.
#[derive(Debug, Default)]
pub struct ResponseContext {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub layouts: Vec<serde_json::Value>,
}

/// Maps one workflow event to zero or more output chunks. The event schema
/// belongs to the workflow engine, so the mapping is substitutable.
pub trait EventTranslator: Send + Sync {
    fn handle_event(
        &self,
        event: WorkflowEvent,
        ctx: &mut ResponseContext,
    ) -> Result<Vec<SseChunk>, ChatError>;
}

/// Default translator: answer deltas become `<p>`-wrapped html fragments,
/// retrieval hits accumulate as citations, tool layouts ride along in the
/// response context, and an engine-side policy veto becomes `GuardRails`.
pub struct HtmlEventTranslator;

impl EventTranslator for HtmlEventTranslator {
    fn handle_event(
        &self,
        event: WorkflowEvent,
        ctx: &mut ResponseContext,
    ) -> Result<Vec<SseChunk>, ChatError> {
        match event {
            WorkflowEvent::AgentDelta { delta } => {
                ctx.answer.push_str(&delta);
                Ok(vec![SseChunk::Html(format!("<p>{}</p>", delta))])
            }
            WorkflowEvent::Retrieval { sources } => {
                ctx.citations
                    .extend(sources.iter().map(citation_from_source));
                Ok(vec![])
            }
            WorkflowEvent::ToolOutput { layout, .. } => {
                ctx.layouts.push(layout);
                Ok(vec![])
            }
            WorkflowEvent::GuardRailsTriggered { reason } => {
                tracing::warn!("workflow flagged policy violation: {}", reason);
                Err(ChatError::GuardRails)
            }
        }
    }
}

enum TurnAbort {
    /// Consumer stopped pulling; drop everything quietly.
    ConsumerGone,
    Failed(ChatError),
}

#[derive(Clone)]
pub struct ChatService {
    chat_store: Arc<dyn ChatStore>,
    auth: Arc<dyn AuthGateway>,
    guard_rails: Arc<dyn GuardRails>,
    workflow: Arc<dyn AgentWorkflow>,
    title_generator: Arc<TitleGenerator>,
    translator: Arc<dyn EventTranslator>,
    config: TurnConfig,
}

impl ChatService {
    pub fn new(
        chat_store: Arc<dyn ChatStore>,
        auth: Arc<dyn AuthGateway>,
        guard_rails: Arc<dyn GuardRails>,
        workflow: Arc<dyn AgentWorkflow>,
        title_generator: Arc<TitleGenerator>,
        config: TurnConfig,
    ) -> Self {
        Self {
            chat_store,
            auth,
            guard_rails,
            workflow,
            title_generator,
            translator: Arc::new(HtmlEventTranslator),
            config,
        }
    }

    /// Swaps the event translator; the default understands the production
    /// engine's event shapes.
    pub fn with_translator(mut self, translator: Arc<dyn EventTranslator>) -> Self {
        self.translator = translator;
        self
    }

    /// Runs one chat turn. Failures before the stream exists (unauthorized,
    /// sensitive data, empty question) return `Err` here; the returned
    /// stream then yields chunks until the terminal `complete`.
    ///
    /// The stream is single-producer and pull-based: the turn task blocks on
    /// a capacity-1 channel, so an idle consumer pauses production and a
    /// dropped consumer cancels the turn at the next emission.
    pub async fn chat(
        &self,
        request: ChatRequest,
        secure_permissions: &str,
    ) -> Result<impl Stream<Item = Result<SseChunk, ChatError>> + Send + 'static, ChatError> {
        let (user_id, tenant_id) = self.auth.get_user_details(secure_permissions)?;

        if let Some(chat_id) = &request.chat_id {
            self.auth
                .validate_chat_id(secure_permissions, chat_id)
                .await?;
        }

        let sanitized = sanitize_question(&request.text);
        if sanitized.is_empty() {
            return Err(ChatError::EmptyQuestion);
        }

        let scan = scan_sensitive(&sanitized);
        if !scan.is_safe() {
            self.chat_store
                .add_rejected_message(
                    request.chat_id.as_deref(),
                    &scan.redacted,
                    &user_id,
                    &tenant_id,
                    &scan.reasons,
                )
                .await?;
            return Err(ChatError::SensitiveData(scan.reasons));
        }

        let (tx, rx) = mpsc::channel::<Result<SseChunk, ChatError>>(1);
        let service = self.clone();
        tokio::spawn(async move {
            match service
                .run_turn(request, sanitized, user_id, tenant_id, &tx)
                .await
            {
                Ok(()) => {}
                Err(TurnAbort::ConsumerGone) => {
                    tracing::debug!("chat turn consumer disconnected, turn abandoned");
                }
                Err(TurnAbort::Failed(e)) => {
                    tracing::error!("chat turn failed: {}", e);
                    let _ = tx.send(Err(e)).await;
                }
            }
        });

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (chunk, rx))
        }))
    }

    async fn run_turn(
        &self,
        request: ChatRequest,
        sanitized: String,
        user_id: String,
        tenant_id: String,
        tx: &mpsc::Sender<Result<SseChunk, ChatError>>,
    ) -> Result<(), TurnAbort> {
        let is_new_chat = request.chat_id.is_none();

        // History is read before the turn's own question lands in the store.
        let chat_history: Vec<HistoryMessage> = match &request.chat_id {
            Some(chat_id) => self
                .chat_store
                .get_chat_messages(
                    chat_id,
                    self.config.chat_history_limit,
                    0,
                    MessageOrder::Desc,
                )
                .await
                .map_err(TurnAbort::Failed)?
                .into_iter()
                .map(history_message)
                .collect(),
            None => Vec::new(),
        };

        let chat_id = match &request.chat_id {
            Some(chat_id) => chat_id.clone(),
            None => self
                .chat_store
                .create_chat(&user_id, &tenant_id)
                .await
                .map_err(TurnAbort::Failed)?,
        };

        // The raw text is the user's message of record; only the model sees
        // the sanitized form.
        let question_message_id = self
            .chat_store
            .add_message(
                &chat_id,
                AuthorRole::User,
                &request.text,
                &MessageMeta::user_message(),
            )
            .await
            .map_err(TurnAbort::Failed)?;

        let products = requested_products(&request, &sanitized);

        let mut ctx = ResponseContext::default();
        let mut guardrails_hit = false;
        let mut fallback: Option<&'static str> = None;

        if products.is_empty() {
            // Nothing to scope the answer to; ask instead of guessing.
            fallback = Some(MISSING_PRODUCT_MESSAGE);
        } else {
            match self.guard_rails.validate_user_question(&sanitized).await {
                Ok(()) => {
                    let context = WorkflowContext {
                        user_id: user_id.clone(),
                        tenant_id: tenant_id.clone(),
                        products,
                    };
                    let mut handle = self
                        .workflow
                        .run(&sanitized, chat_history, context)
                        .await
                        .map_err(TurnAbort::Failed)?;

                    while let Some(event) = handle.events.next().await {
                        match self.translator.handle_event(event, &mut ctx) {
                            Ok(chunks) => {
                                for chunk in chunks {
                                    send(tx, chunk).await?;
                                }
                            }
                            Err(ChatError::GuardRails) => {
                                guardrails_hit = true;
                                break;
                            }
                            Err(e) => return Err(TurnAbort::Failed(e)),
                        }
                    }

                    if !guardrails_hit {
                        handle.result().await.map_err(TurnAbort::Failed)?;
                    }
                }
                Err(ChatError::GuardRails) => guardrails_hit = true,
                Err(e) => return Err(TurnAbort::Failed(e)),
            }

            if guardrails_hit {
                fallback = Some(GUARDRAILS_MESSAGE);
            }
        }

        if let Some(text) = fallback {
            // Degraded turn: the canned answer replaces whatever streamed,
            // and references go out first on this path.
            ctx.answer = text.to_string();
            ctx.citations.clear();
            ctx.layouts.clear();
            send(tx, SseChunk::References(MessageReferences::default())).await?;
            send(tx, SseChunk::Html(format!("<p>{}</p>", text))).await?;
        } else {
            // Streaming turn: citations are only complete once the event
            // stream has drained.
            send(
                tx,
                SseChunk::References(MessageReferences {
                    citations: ctx.citations.clone(),
                }),
            )
            .await?;
        }

        let metadata = MessageMeta {
            citations: Some(ctx.citations.clone()),
            llm: Some(LlmMeta {
                model: self.config.llm_model,
            }),
            app: Some(AppMeta::current()),
            question_message_id: Some(question_message_id.clone()),
            layouts: ctx.layouts.clone(),
        };
        let message_id = self
            .chat_store
            .add_message(&chat_id, AuthorRole::Ai, &ctx.answer, &metadata)
            .await
            .map_err(TurnAbort::Failed)?;

        send(
            tx,
            SseChunk::Metadata(SseMetadataChunk {
                chat_id: chat_id.clone(),
                message_id,
                question_message_id,
            }),
        )
        .await?;

        if is_new_chat {
            let title = self
                .title_generator
                .generate_title(&sanitized, !guardrails_hit)
                .await
                .map_err(TurnAbort::Failed)?;
            send(
                tx,
                SseChunk::Title(SseTitleChunk {
                    generated_title: title,
                }),
            )
            .await?;
        }

        send(tx, SseChunk::complete()).await?;
        Ok(())
    }

    pub async fn get_chats(&self, secure_permissions: &str) -> Result<Vec<Chat>, ChatError> {
        let (user_id, tenant_id) = self.auth.get_user_details(secure_permissions)?;
        self.chat_store.get_chats(&user_id, &tenant_id).await
    }

    pub async fn get_chat(
        &self,
        chat_id: &str,
        secure_permissions: &str,
    ) -> Result<Vec<Chat>, ChatError> {
        self.auth
            .validate_chat_id(secure_permissions, chat_id)
            .await?;
        self.chat_store.get_chat(chat_id).await
    }

    pub async fn update_chat(
        &self,
        chat_id: &str,
        chat: ChatUpdate,
        secure_permissions: &str,
    ) -> Result<(), ChatError> {
        self.auth
            .validate_chat_id(secure_permissions, chat_id)
            .await?;
        self.chat_store.rename_chat(chat_id, &chat.title).await
    }

    pub async fn delete_chat(
        &self,
        chat_id: &str,
        secure_permissions: &str,
    ) -> Result<(), ChatError> {
        self.auth
            .validate_chat_id(secure_permissions, chat_id)
            .await?;
        self.chat_store.soft_delete_chat(chat_id).await
    }

    pub async fn add_feedback(
        &self,
        chat_id: &str,
        message_id: &str,
        feedback: MessageFeedback,
        secure_permissions: &str,
    ) -> Result<(), ChatError> {
        self.auth
            .validate_chat_id(secure_permissions, chat_id)
            .await?;
        self.chat_store.upsert_feedback(message_id, &feedback).await
    }

    /// Paginated message listing in ascending order. `page = None` selects
    /// the last page, which is what a client opening a conversation wants.
    pub async fn get_messages(
        &self,
        chat_id: &str,
        page: Option<u32>,
        per_page: u32,
        secure_permissions: &str,
    ) -> Result<PaginatedMessagesResponse, ChatError> {
        self.auth
            .validate_chat_id(secure_permissions, chat_id)
            .await?;

        let total = self.chat_store.get_total_message_count(chat_id).await?;
        let page = page.unwrap_or_else(|| last_page(total, per_page)).max(1);
        let offset = (page as i64 - 1) * per_page as i64;

        let messages = self
            .chat_store
            .get_chat_messages(chat_id, per_page as i64, offset, MessageOrder::Asc)
            .await?;

        Ok(PaginatedMessagesResponse {
            messages: messages
                .into_iter()
                .map(ChatMessageResponse::from)
                .collect(),
            metadata: PaginationMeta {
                page,
                total_message_count: total,
            },
        })
    }

    pub async fn get_messages_by_id(
        &self,
        chat_id: &str,
        message_ids: &[String],
        secure_permissions: &str,
    ) -> Result<PaginatedMessagesResponse, ChatError> {
        self.auth
            .validate_chat_id(secure_permissions, chat_id)
            .await?;

        let messages = self
            .chat_store
            .get_chat_messages_by_id(chat_id, message_ids)
            .await?;
        let total = messages.len() as i64;

        Ok(PaginatedMessagesResponse {
            messages: messages
                .into_iter()
                .map(ChatMessageResponse::from)
                .collect(),
            metadata: PaginationMeta {
                page: 1,
                total_message_count: total,
            },
        })
    }
}

async fn send(
    tx: &mpsc::Sender<Result<SseChunk, ChatError>>,
    chunk: SseChunk,
) -> Result<(), TurnAbort> {
    tx.send(Ok(chunk))
        .await
        .map_err(|_| TurnAbort::ConsumerGone)
}

fn history_message(message: ChatMessage) -> HistoryMessage {
    HistoryMessage {
        role: match message.author.role {
            AuthorRole::Ai => HistoryRole::Assistant,
            AuthorRole::User => HistoryRole::User,
        },
        content: message.text,
    }
}

/// Product scope for the turn: the caller's declared intent wins, otherwise
/// products named in the question itself.
fn requested_products(request: &ChatRequest, sanitized: &str) -> Vec<Product> {
    if let Some(intent) = &request.intent_context {
        if !intent.products.is_empty() {
            return intent.products.clone();
        }
    }
    Product::mentioned_in(sanitized)
}

fn last_page(total: i64, per_page: u32) -> u32 {
    if total <= 0 || per_page == 0 {
        return 1;
    }
    ((total + per_page as i64 - 1) / per_page as i64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::citations::{RetrievedSource, SourceMeta};
    use crate::llm_client::CompletionModel;
    use crate::models::chat::{
        Author, FeedbackCategory, FeedbackRating, IntentContext, SensitiveDataType,
    };
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const TITLE_PROMPT: &str = "Title this question: {question}";
    const TITLE_MIN_QUESTION_LENGTH: usize = 30;

    #[derive(Debug, Clone, PartialEq)]
    struct AddedMessage {
        chat_id: String,
        role: AuthorRole,
        message: String,
        metadata: MessageMeta,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct RejectedRecord {
        chat_id: Option<String>,
        message: String,
        user_id: String,
        tenant_id: String,
        rejected_reason: Vec<SensitiveDataType>,
    }

    #[derive(Default)]
    struct MockChatStore {
        create_chat_result: Option<String>,
        add_message_ids: Mutex<VecDeque<String>>,
        history: Vec<ChatMessage>,
        total_message_count: i64,

        created_chats: Mutex<Vec<(String, String)>>,
        added_messages: Mutex<Vec<AddedMessage>>,
        rejected: Mutex<Vec<RejectedRecord>>,
        history_fetches: Mutex<Vec<(String, i64, i64, MessageOrder)>>,
        renames: Mutex<Vec<(String, String)>>,
        soft_deletes: Mutex<Vec<String>>,
        feedback: Mutex<Vec<(String, FeedbackRating)>>,
    }

    #[async_trait]
    impl ChatStore for MockChatStore {
        async fn create_chat(&self, user_id: &str, tenant_id: &str) -> Result<String, ChatError> {
            self.created_chats
                .lock()
                .unwrap()
                .push((user_id.to_string(), tenant_id.to_string()));
            Ok(self
                .create_chat_result
                .clone()
                .expect("create_chat not configured"))
        }

        async fn add_message(
            &self,
            chat_id: &str,
            role: AuthorRole,
            message: &str,
            metadata: &MessageMeta,
        ) -> Result<String, ChatError> {
            self.added_messages.lock().unwrap().push(AddedMessage {
                chat_id: chat_id.to_string(),
                role,
                message: message.to_string(),
                metadata: metadata.clone(),
            });
            Ok(self
                .add_message_ids
                .lock()
                .unwrap()
                .pop_front()
                .expect("add_message id not configured"))
        }

        async fn get_chats(&self, _: &str, _: &str) -> Result<Vec<Chat>, ChatError> {
            Ok(vec![])
        }

        async fn get_chat(&self, _: &str) -> Result<Vec<Chat>, ChatError> {
            Ok(vec![])
        }

        async fn get_chat_messages(
            &self,
            chat_id: &str,
            limit: i64,
            offset: i64,
            order: MessageOrder,
        ) -> Result<Vec<ChatMessage>, ChatError> {
            self.history_fetches.lock().unwrap().push((
                chat_id.to_string(),
                limit,
                offset,
                order,
            ));
            Ok(self.history.clone())
        }

        async fn get_chat_messages_by_id(
            &self,
            _: &str,
            _: &[String],
        ) -> Result<Vec<ChatMessage>, ChatError> {
            Ok(self.history.clone())
        }

        async fn get_total_message_count(&self, _: &str) -> Result<i64, ChatError> {
            Ok(self.total_message_count)
        }

        async fn rename_chat(&self, chat_id: &str, title: &str) -> Result<(), ChatError> {
            self.renames
                .lock()
                .unwrap()
                .push((chat_id.to_string(), title.to_string()));
            Ok(())
        }

        async fn soft_delete_chat(&self, chat_id: &str) -> Result<(), ChatError> {
            self.soft_deletes.lock().unwrap().push(chat_id.to_string());
            Ok(())
        }

        async fn upsert_feedback(
            &self,
            message_id: &str,
            feedback: &MessageFeedback,
        ) -> Result<(), ChatError> {
            self.feedback
                .lock()
                .unwrap()
                .push((message_id.to_string(), feedback.rating));
            Ok(())
        }

        async fn add_rejected_message(
            &self,
            chat_id: Option<&str>,
            message: &str,
            user_id: &str,
            tenant_id: &str,
            rejected_reason: &[SensitiveDataType],
        ) -> Result<(), ChatError> {
            self.rejected.lock().unwrap().push(RejectedRecord {
                chat_id: chat_id.map(|s| s.to_string()),
                message: message.to_string(),
                user_id: user_id.to_string(),
                tenant_id: tenant_id.to_string(),
                rejected_reason: rejected_reason.to_vec(),
            });
            Ok(())
        }

        async fn chat_owner(&self, _: &str) -> Result<Option<(String, String)>, ChatError> {
            Ok(Some(("user1".to_string(), "tenant1".to_string())))
        }
    }

    struct MockAuth {
        deny_chat_access: bool,
        validated: Mutex<Vec<String>>,
    }

    impl MockAuth {
        fn allowing() -> Self {
            Self {
                deny_chat_access: false,
                validated: Mutex::new(vec![]),
            }
        }

        fn denying() -> Self {
            Self {
                deny_chat_access: true,
                validated: Mutex::new(vec![]),
            }
        }
    }

    #[async_trait]
    impl AuthGateway for MockAuth {
        fn get_user_details(&self, _: &str) -> Result<(String, String), ChatError> {
            Ok(("user1".to_string(), "tenant1".to_string()))
        }

        async fn validate_chat_id(&self, _: &str, chat_id: &str) -> Result<(), ChatError> {
            if self.deny_chat_access {
                return Err(ChatError::Unauthorized);
            }
            self.validated.lock().unwrap().push(chat_id.to_string());
            Ok(())
        }
    }

    struct MockGuardRails {
        reject: bool,
        questions: Mutex<Vec<String>>,
    }

    impl MockGuardRails {
        fn passing() -> Self {
            Self {
                reject: false,
                questions: Mutex::new(vec![]),
            }
        }

        fn rejecting() -> Self {
            Self {
                reject: true,
                questions: Mutex::new(vec![]),
            }
        }
    }

    #[async_trait]
    impl GuardRails for MockGuardRails {
        async fn validate_user_question(&self, question: &str) -> Result<(), ChatError> {
            self.questions.lock().unwrap().push(question.to_string());
            if self.reject {
                return Err(ChatError::GuardRails);
            }
            Ok(())
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct RunRecord {
        user_input: String,
        chat_history: Vec<HistoryMessage>,
        context: WorkflowContext,
    }

    struct MockWorkflow {
        events: Vec<WorkflowEvent>,
        fail_with: Option<String>,
        runs: Mutex<Vec<RunRecord>>,
    }

    impl MockWorkflow {
        fn with_events(events: Vec<WorkflowEvent>) -> Self {
            Self {
                events,
                fail_with: None,
                runs: Mutex::new(vec![]),
            }
        }
    }

    #[async_trait]
    impl AgentWorkflow for MockWorkflow {
        async fn run(
            &self,
            user_input: &str,
            chat_history: Vec<HistoryMessage>,
            context: WorkflowContext,
        ) -> Result<crate::workflow::WorkflowHandle, ChatError> {
            self.runs.lock().unwrap().push(RunRecord {
                user_input: user_input.to_string(),
                chat_history,
                context,
            });
            match &self.fail_with {
                None => Ok(crate::workflow::WorkflowHandle::from_events(
                    self.events.clone(),
                )),
                Some(error) => {
                    let (tx, rx) = tokio::sync::oneshot::channel();
                    let _ = tx.send(Err(error.clone()));
                    Ok(crate::workflow::WorkflowHandle::new(
                        Box::pin(futures::stream::iter(self.events.clone())),
                        rx,
                    ))
                }
            }
        }
    }

    struct SilentModel;

    #[async_trait]
    impl CompletionModel for SilentModel {
        async fn complete(&self, _: &str) -> Result<String, ChatError> {
            panic!("completion model should not be called in this test");
        }
    }

    struct Harness {
        store: Arc<MockChatStore>,
        auth: Arc<MockAuth>,
        guard: Arc<MockGuardRails>,
        workflow: Arc<MockWorkflow>,
        service: ChatService,
    }

    fn harness(store: MockChatStore, auth: MockAuth, guard: MockGuardRails, events: Vec<WorkflowEvent>) -> Harness {
        let store = Arc::new(store);
        let auth = Arc::new(auth);
        let guard = Arc::new(guard);
        let workflow = Arc::new(MockWorkflow::with_events(events));
        let title_generator = Arc::new(TitleGenerator::new(
            Arc::new(SilentModel),
            TITLE_PROMPT.to_string(),
            TITLE_MIN_QUESTION_LENGTH,
        ));
        let service = ChatService::new(
            store.clone(),
            auth.clone(),
            guard.clone(),
            workflow.clone(),
            title_generator,
            TurnConfig {
                chat_history_limit: 20,
                llm_model: LlmModel::Llama3_8b,
            },
        );
        Harness {
            store,
            auth,
            guard,
            workflow,
            service,
        }
    }

    fn new_chat_store() -> MockChatStore {
        MockChatStore {
            create_chat_result: Some("chat_id1".to_string()),
            add_message_ids: Mutex::new(VecDeque::from([
                "question_message_id1".to_string(),
                "message_id1".to_string(),
            ])),
            ..Default::default()
        }
    }

    async fn collect_chunks(
        service: &ChatService,
        request: ChatRequest,
    ) -> Vec<SseChunk> {
        let stream = service
            .chat(request, "x.y.z")
            .await
            .expect("chat() should start streaming");
        stream
            .map(|item| item.expect("no mid-stream failure expected"))
            .collect()
            .await
    }

    fn expansion_source() -> RetrievedSource {
        RetrievedSource {
            text: "excerpt".to_string(),
            meta: SourceMeta {
                title: Some("Expansion Guide".to_string()),
                link: Some("https://kb.example.com/expansion".to_string()),
                modified_date: Some(0),
                ..Default::default()
            },
            score: 0.1,
        }
    }

    #[tokio::test]
    async fn test_chat_new_conversation_chunk_sequence() {
        let h = harness(
            new_chat_store(),
            MockAuth::allowing(),
            MockGuardRails::passing(),
            vec![
                WorkflowEvent::Retrieval {
                    sources: vec![expansion_source()],
                },
                WorkflowEvent::AgentDelta {
                    delta: "foo".to_string(),
                },
                WorkflowEvent::AgentDelta {
                    delta: " bar".to_string(),
                },
            ],
        );

        let question = "What is NimbusStore?";
        let chunks = collect_chunks(
            &h.service,
            ChatRequest {
                chat_id: None,
                text: question.to_string(),
                intent_context: None,
            },
        )
        .await;

        let expected_citation = Citation {
            title: "Expansion Guide".to_string(),
            link: "https://kb.example.com/expansion".to_string(),
            published_date: 0,
            score: 0.1,
        };
        assert_eq!(
            chunks,
            vec![
                SseChunk::Html("<p>foo</p>".to_string()),
                SseChunk::Html("<p> bar</p>".to_string()),
                SseChunk::References(MessageReferences {
                    citations: vec![expected_citation.clone()],
                }),
                SseChunk::Metadata(SseMetadataChunk {
                    chat_id: "chat_id1".to_string(),
                    message_id: "message_id1".to_string(),
                    question_message_id: "question_message_id1".to_string(),
                }),
                // Short first question becomes its own title.
                SseChunk::Title(SseTitleChunk {
                    generated_title: question.to_string(),
                }),
                SseChunk::complete(),
            ]
        );

        assert_eq!(
            h.store.created_chats.lock().unwrap().clone(),
            vec![("user1".to_string(), "tenant1".to_string())]
        );

        let added = h.store.added_messages.lock().unwrap().clone();
        assert_eq!(added.len(), 2);
        assert_eq!(added[0].role, AuthorRole::User);
        assert_eq!(added[0].message, question);
        assert_eq!(added[0].metadata, MessageMeta::user_message());
        assert_eq!(added[1].role, AuthorRole::Ai);
        assert_eq!(added[1].message, "foo bar");
        assert_eq!(
            added[1].metadata.citations,
            Some(vec![expected_citation])
        );
        assert_eq!(
            added[1].metadata.question_message_id.as_deref(),
            Some("question_message_id1")
        );
        assert_eq!(
            added[1].metadata.llm,
            Some(LlmMeta {
                model: LlmModel::Llama3_8b
            })
        );

        let runs = h.workflow.runs.lock().unwrap().clone();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].user_input, question);
        assert!(runs[0].chat_history.is_empty());
        assert_eq!(runs[0].context.products, vec![Product::NimbusStore]);
        assert_eq!(
            h.guard.questions.lock().unwrap().clone(),
            vec![question.to_string()]
        );
    }

    #[tokio::test]
    async fn test_chat_considers_chat_history() {
        let mut store = new_chat_store();
        store.history = vec![ChatMessage {
            chat_id: "chat_id1".to_string(),
            message_id: "msg0".to_string(),
            created_at: Utc::now(),
            author: Author {
                role: AuthorRole::Ai,
            },
            text: "old content".to_string(),
            metadata: MessageMeta::default(),
        }];
        let h = harness(
            store,
            MockAuth::allowing(),
            MockGuardRails::passing(),
            vec![WorkflowEvent::AgentDelta {
                delta: "answer".to_string(),
            }],
        );

        let chunks = collect_chunks(
            &h.service,
            ChatRequest {
                chat_id: Some("chat_id1".to_string()),
                text: "What is NimbusStore?".to_string(),
                intent_context: Some(IntentContext {
                    products: vec![Product::NimbusStore],
                    ..Default::default()
                }),
            },
        )
        .await;

        // Existing chat: no chat created, no title chunk.
        assert!(h.store.created_chats.lock().unwrap().is_empty());
        assert!(!chunks
            .iter()
            .any(|c| matches!(c, SseChunk::Title(_))));
        assert_eq!(chunks.last(), Some(&SseChunk::complete()));

        assert_eq!(
            h.auth.validated.lock().unwrap().clone(),
            vec!["chat_id1".to_string()]
        );
        assert_eq!(
            h.store.history_fetches.lock().unwrap().clone(),
            vec![("chat_id1".to_string(), 20, 0, MessageOrder::Desc)]
        );

        let runs = h.workflow.runs.lock().unwrap().clone();
        assert_eq!(runs.len(), 1);
        assert_eq!(
            runs[0].chat_history,
            vec![HistoryMessage {
                role: HistoryRole::Assistant,
                content: "old content".to_string(),
            }]
        );
        assert_eq!(runs[0].chat_history[0].role.as_str(), "assistant");
    }

    #[tokio::test]
    async fn test_chat_checks_question_for_sensitive_content() {
        let h = harness(
            MockChatStore::default(),
            MockAuth::allowing(),
            MockGuardRails::passing(),
            vec![],
        );

        let result = h
            .service
            .chat(
                ChatRequest {
                    chat_id: None,
                    text: "My social security number is 555-55-5555".to_string(),
                    intent_context: Some(IntentContext {
                        products: vec![Product::NimbusStore],
                        ..Default::default()
                    }),
                },
                "x.y.z",
            )
            .await;

        match result {
            Err(ChatError::SensitiveData(reasons)) => {
                assert_eq!(reasons, vec![SensitiveDataType::Ssn])
            }
            _ => panic!("expected SensitiveData error"),
        }

        assert_eq!(
            h.store.rejected.lock().unwrap().clone(),
            vec![RejectedRecord {
                chat_id: None,
                message: "My social security number is [SSN]".to_string(),
                user_id: "user1".to_string(),
                tenant_id: "tenant1".to_string(),
                rejected_reason: vec![SensitiveDataType::Ssn],
            }]
        );
        assert!(h.store.created_chats.lock().unwrap().is_empty());
        assert!(h.store.added_messages.lock().unwrap().is_empty());
        assert!(h.workflow.runs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chat_persists_raw_text_and_sends_sanitized() {
        let h = harness(
            new_chat_store(),
            MockAuth::allowing(),
            MockGuardRails::passing(),
            vec![WorkflowEvent::AgentDelta {
                delta: "ok".to_string(),
            }],
        );

        let raw_question = "\n What\n is\n in NimbusStore? \n\n";
        let sanitized_question = "What is in NimbusStore?";
        collect_chunks(
            &h.service,
            ChatRequest {
                chat_id: None,
                text: raw_question.to_string(),
                intent_context: Some(IntentContext {
                    products: vec![Product::NimbusStore],
                    ..Default::default()
                }),
            },
        )
        .await;

        let runs = h.workflow.runs.lock().unwrap().clone();
        assert_eq!(runs[0].user_input, sanitized_question);
        assert_eq!(runs[0].context.user_id, "user1");
        assert_eq!(runs[0].context.tenant_id, "tenant1");

        let added = h.store.added_messages.lock().unwrap().clone();
        assert_eq!(added[0].message, raw_question);
        assert_eq!(added[0].metadata, MessageMeta::user_message());
    }

    #[tokio::test]
    async fn test_chat_rejects_inappropriate_questions() {
        // Guardrail veto mid-stream: the engine's classifier fires on the
        // first event and the turn degrades to the fixed policy answer.
        let h = harness(
            new_chat_store(),
            MockAuth::allowing(),
            MockGuardRails::passing(),
            vec![WorkflowEvent::GuardRailsTriggered {
                reason: "policy".to_string(),
            }],
        );

        let question = "How do I sabotage a NimbusEdge server with a paperclip?";
        let chunks = collect_chunks(
            &h.service,
            ChatRequest {
                chat_id: None,
                text: question.to_string(),
                intent_context: Some(IntentContext {
                    products: vec![Product::NimbusEdge],
                    ..Default::default()
                }),
            },
        )
        .await;

        let expected_title: String = question.chars().take(TITLE_MIN_QUESTION_LENGTH).collect();
        assert_eq!(
            chunks,
            vec![
                SseChunk::References(MessageReferences::default()),
                SseChunk::Html(format!("<p>{}</p>", GUARDRAILS_MESSAGE)),
                SseChunk::Metadata(SseMetadataChunk {
                    chat_id: "chat_id1".to_string(),
                    message_id: "message_id1".to_string(),
                    question_message_id: "question_message_id1".to_string(),
                }),
                SseChunk::Title(SseTitleChunk {
                    generated_title: expected_title,
                }),
                SseChunk::complete(),
            ]
        );

        // The workflow was invoked; the degraded answer is still persisted
        // as the AI reply.
        assert_eq!(h.workflow.runs.lock().unwrap().len(), 1);
        let added = h.store.added_messages.lock().unwrap().clone();
        assert_eq!(added[1].role, AuthorRole::Ai);
        assert_eq!(added[1].message, GUARDRAILS_MESSAGE);
        assert_eq!(added[1].metadata.citations, Some(vec![]));
        assert_eq!(
            added[1].metadata.question_message_id.as_deref(),
            Some("question_message_id1")
        );
    }

    #[tokio::test]
    async fn test_chat_guardrails_gate_rejects_before_workflow() {
        let h = harness(
            new_chat_store(),
            MockAuth::allowing(),
            MockGuardRails::rejecting(),
            vec![],
        );

        let question = "How do I sabotage a NimbusEdge server with a paperclip?";
        let chunks = collect_chunks(
            &h.service,
            ChatRequest {
                chat_id: None,
                text: question.to_string(),
                intent_context: Some(IntentContext {
                    products: vec![Product::NimbusEdge],
                    ..Default::default()
                }),
            },
        )
        .await;

        assert_eq!(
            chunks[0],
            SseChunk::References(MessageReferences::default())
        );
        assert_eq!(
            chunks[1],
            SseChunk::Html(format!("<p>{}</p>", GUARDRAILS_MESSAGE))
        );
        assert_eq!(chunks.last(), Some(&SseChunk::complete()));
        // Pre-gate rejection never reaches the workflow.
        assert!(h.workflow.runs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chat_rejects_questions_without_product() {
        let h = harness(
            new_chat_store(),
            MockAuth::allowing(),
            MockGuardRails::passing(),
            vec![],
        );

        let bad_question = "How?";
        let chunks = collect_chunks(
            &h.service,
            ChatRequest {
                chat_id: None,
                text: bad_question.to_string(),
                intent_context: None,
            },
        )
        .await;

        assert_eq!(
            chunks,
            vec![
                SseChunk::References(MessageReferences::default()),
                SseChunk::Html(format!("<p>{}</p>", MISSING_PRODUCT_MESSAGE)),
                SseChunk::Metadata(SseMetadataChunk {
                    chat_id: "chat_id1".to_string(),
                    message_id: "message_id1".to_string(),
                    question_message_id: "question_message_id1".to_string(),
                }),
                SseChunk::Title(SseTitleChunk {
                    generated_title: bad_question.to_string(),
                }),
                SseChunk::complete(),
            ]
        );

        // The clarification path never consults guardrails or the workflow.
        assert!(h.workflow.runs.lock().unwrap().is_empty());
        assert!(h.guard.questions.lock().unwrap().is_empty());

        let added = h.store.added_messages.lock().unwrap().clone();
        assert_eq!(added[0].message, bad_question);
        assert_eq!(added[1].message, MISSING_PRODUCT_MESSAGE);
        assert_eq!(added[1].metadata.citations, Some(vec![]));
    }

    #[tokio::test]
    async fn test_chat_unauthorized_chat_id_has_no_side_effects() {
        let h = harness(
            MockChatStore::default(),
            MockAuth::denying(),
            MockGuardRails::passing(),
            vec![],
        );

        let result = h
            .service
            .chat(
                ChatRequest {
                    chat_id: Some("someone-elses-chat".to_string()),
                    text: "What is NimbusStore?".to_string(),
                    intent_context: None,
                },
                "x.y.z",
            )
            .await;

        assert!(matches!(result, Err(ChatError::Unauthorized)));
        assert!(h.store.created_chats.lock().unwrap().is_empty());
        assert!(h.store.added_messages.lock().unwrap().is_empty());
        assert!(h.store.rejected.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chat_rejects_empty_question() {
        let h = harness(
            MockChatStore::default(),
            MockAuth::allowing(),
            MockGuardRails::passing(),
            vec![],
        );

        let result = h
            .service
            .chat(
                ChatRequest {
                    chat_id: None,
                    text: " \n \n ".to_string(),
                    intent_context: None,
                },
                "x.y.z",
            )
            .await;
        assert!(matches!(result, Err(ChatError::EmptyQuestion)));
        assert!(h.store.added_messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chat_complete_is_last_and_unique() {
        let h = harness(
            new_chat_store(),
            MockAuth::allowing(),
            MockGuardRails::passing(),
            vec![WorkflowEvent::AgentDelta {
                delta: "answer".to_string(),
            }],
        );
        let chunks = collect_chunks(
            &h.service,
            ChatRequest {
                chat_id: None,
                text: "What is NimbusStore?".to_string(),
                intent_context: None,
            },
        )
        .await;

        let completes = chunks
            .iter()
            .filter(|c| matches!(c, SseChunk::Complete(_)))
            .count();
        assert_eq!(completes, 1);
        assert_eq!(chunks.last(), Some(&SseChunk::complete()));
    }

    #[tokio::test]
    async fn test_get_messages_defaults_to_last_page() {
        let mut store = MockChatStore::default();
        store.total_message_count = 13;
        store.history = vec![ChatMessage {
            chat_id: "chat_id1".to_string(),
            message_id: "msg1".to_string(),
            created_at: Utc::now(),
            author: Author {
                role: AuthorRole::Ai,
            },
            text: "foo bar".to_string(),
            metadata: MessageMeta::default(),
        }];
        let h = harness(store, MockAuth::allowing(), MockGuardRails::passing(), vec![]);

        let response = h
            .service
            .get_messages("chat_id1", None, 2, "x.y.z")
            .await
            .unwrap();

        assert_eq!(response.metadata.page, 7);
        assert_eq!(response.metadata.total_message_count, 13);
        assert_eq!(response.messages.len(), 1);
        assert_eq!(response.messages[0].text, "<p>foo bar</p>");
        assert!(response.messages[0].layouts.is_empty());

        assert_eq!(
            h.store.history_fetches.lock().unwrap().clone(),
            vec![("chat_id1".to_string(), 2, 12, MessageOrder::Asc)]
        );
    }

    #[tokio::test]
    async fn test_get_messages_by_id_is_single_page() {
        let mut store = MockChatStore::default();
        store.history = vec![ChatMessage {
            chat_id: "chat_id1".to_string(),
            message_id: "msg1".to_string(),
            created_at: Utc::now(),
            author: Author {
                role: AuthorRole::User,
            },
            text: "foo bar".to_string(),
            metadata: MessageMeta::default(),
        }];
        let h = harness(store, MockAuth::allowing(), MockGuardRails::passing(), vec![]);

        let response = h
            .service
            .get_messages_by_id("chat_id1", &["msg1".to_string()], "x.y.z")
            .await
            .unwrap();
        assert_eq!(response.metadata.page, 1);
        assert_eq!(response.metadata.total_message_count, 1);
        assert_eq!(response.messages[0].text, "<p>foo bar</p>");
    }

    #[tokio::test]
    async fn test_update_chat_checks_ownership_first() {
        let h = harness(
            MockChatStore::default(),
            MockAuth::denying(),
            MockGuardRails::passing(),
            vec![],
        );
        let result = h
            .service
            .update_chat(
                "chat1",
                ChatUpdate {
                    title: "new title".to_string(),
                },
                "x.y.z",
            )
            .await;
        assert!(matches!(result, Err(ChatError::Unauthorized)));
        assert!(h.store.renames.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_and_delete_chat() {
        let h = harness(
            MockChatStore::default(),
            MockAuth::allowing(),
            MockGuardRails::passing(),
            vec![],
        );
        h.service
            .update_chat(
                "chat1",
                ChatUpdate {
                    title: "new title".to_string(),
                },
                "x.y.z",
            )
            .await
            .unwrap();
        h.service.delete_chat("chat1", "x.y.z").await.unwrap();

        assert_eq!(
            h.store.renames.lock().unwrap().clone(),
            vec![("chat1".to_string(), "new title".to_string())]
        );
        assert_eq!(
            h.store.soft_deletes.lock().unwrap().clone(),
            vec!["chat1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_add_feedback() {
        let h = harness(
            MockChatStore::default(),
            MockAuth::allowing(),
            MockGuardRails::passing(),
            vec![],
        );
        h.service
            .add_feedback(
                "chat1",
                "msg1",
                MessageFeedback {
                    rating: FeedbackRating::ThumbsUp,
                    categories: vec![FeedbackCategory::Other],
                    text: Some("comment".to_string()),
                },
                "x.y.z",
            )
            .await
            .unwrap();
        assert_eq!(
            h.store.feedback.lock().unwrap().clone(),
            vec![("msg1".to_string(), FeedbackRating::ThumbsUp)]
        );
    }

    #[tokio::test]
    async fn test_chat_translator_is_substitutable() {
        struct UppercaseTranslator;

        impl EventTranslator for UppercaseTranslator {
            fn handle_event(
                &self,
                event: WorkflowEvent,
                ctx: &mut ResponseContext,
            ) -> Result<Vec<SseChunk>, ChatError> {
                match event {
                    WorkflowEvent::AgentDelta { delta } => {
                        ctx.answer.push_str(&delta);
                        Ok(vec![SseChunk::Html(format!(
                            "<p>{}</p>",
                            delta.to_uppercase()
                        ))])
                    }
                    _ => Ok(vec![]),
                }
            }
        }

        let h = harness(
            new_chat_store(),
            MockAuth::allowing(),
            MockGuardRails::passing(),
            vec![WorkflowEvent::AgentDelta {
                delta: "foo".to_string(),
            }],
        );
        let service = h.service.clone().with_translator(Arc::new(UppercaseTranslator));

        let chunks = collect_chunks(
            &service,
            ChatRequest {
                chat_id: None,
                text: "What is NimbusStore?".to_string(),
                intent_context: None,
            },
        )
        .await;

        assert_eq!(chunks[0], SseChunk::Html("<p>FOO</p>".to_string()));
        // The persisted answer keeps the translator's accumulated text.
        let added = h.store.added_messages.lock().unwrap().clone();
        assert_eq!(added[1].message, "foo");
    }

    #[tokio::test]
    async fn test_chat_workflow_failure_is_terminal_without_ai_message() {
        let store = MockChatStore {
            create_chat_result: Some("chat_id1".to_string()),
            add_message_ids: Mutex::new(VecDeque::from(["question_message_id1".to_string()])),
            ..Default::default()
        };
        let mut workflow = MockWorkflow::with_events(vec![WorkflowEvent::AgentDelta {
            delta: "partial".to_string(),
        }]);
        workflow.fail_with = Some("gateway unavailable".to_string());

        let store = Arc::new(store);
        let service = ChatService::new(
            store.clone(),
            Arc::new(MockAuth::allowing()),
            Arc::new(MockGuardRails::passing()),
            Arc::new(workflow),
            Arc::new(TitleGenerator::new(
                Arc::new(SilentModel),
                TITLE_PROMPT.to_string(),
                TITLE_MIN_QUESTION_LENGTH,
            )),
            TurnConfig {
                chat_history_limit: 20,
                llm_model: LlmModel::Llama3_8b,
            },
        );

        let stream = service
            .chat(
                ChatRequest {
                    chat_id: None,
                    text: "What is NimbusStore?".to_string(),
                    intent_context: None,
                },
                "x.y.z",
            )
            .await
            .unwrap();
        let items: Vec<Result<SseChunk, ChatError>> = stream.collect().await;

        // The partial fragment streamed, then the turn failed terminally.
        assert_eq!(
            items[0].as_ref().unwrap(),
            &SseChunk::Html("<p>partial</p>".to_string())
        );
        assert!(matches!(items.last(), Some(Err(ChatError::Workflow(_)))));
        assert!(!items
            .iter()
            .any(|i| matches!(i, Ok(SseChunk::Complete(_)))));

        // Only the user's question was persisted.
        let added = store.added_messages.lock().unwrap().clone();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].role, AuthorRole::User);
    }

    #[test]
    fn test_last_page_math() {
        assert_eq!(last_page(13, 2), 7);
        assert_eq!(last_page(12, 2), 6);
        assert_eq!(last_page(0, 2), 1);
        assert_eq!(last_page(1, 20), 1);
    }
}
