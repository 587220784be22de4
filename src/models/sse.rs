// src/models/sse.rs
//
// Typed units of the chat turn's output stream. Each chunk maps to one
// server-sent event: the variant is the event name, the payload is the data
// field. Ordering across a turn is owned by the orchestrator.
use crate::models::chat::Citation;
use axum::response::sse::Event;
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MessageReferences {
    pub citations: Vec<Citation>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SseMetadataChunk {
    pub chat_id: String,
    pub message_id: String,
    pub question_message_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SseTitleChunk {
    pub generated_title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SseCompleteChunk {
    pub http_status_code: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SseChunk {
    References(MessageReferences),
    Html(String),
    Metadata(SseMetadataChunk),
    Title(SseTitleChunk),
    Complete(SseCompleteChunk),
}

impl SseChunk {
    /// Terminal marker; every completing turn ends with exactly one of these.
    pub fn complete() -> SseChunk {
        SseChunk::Complete(SseCompleteChunk {
            http_status_code: 204,
        })
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            SseChunk::References(_) => "references",
            SseChunk::Html(_) => "html",
            SseChunk::Metadata(_) => "metadata",
            SseChunk::Title(_) => "title",
            SseChunk::Complete(_) => "complete",
        }
    }

    /// Wire form. HTML fragments go out verbatim; structured payloads as JSON.
    pub fn to_sse_event(&self) -> Result<Event, serde_json::Error> {
        let event = Event::default().event(self.event_name());
        Ok(match self {
            SseChunk::Html(fragment) => event.data(fragment.clone()),
            SseChunk::References(refs) => event.data(serde_json::to_string(refs)?),
            SseChunk::Metadata(meta) => event.data(serde_json::to_string(meta)?),
            SseChunk::Title(title) => event.data(serde_json::to_string(title)?),
            SseChunk::Complete(complete) => event.data(serde_json::to_string(complete)?),
        })
    }
}
