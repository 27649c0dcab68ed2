//! Transport Decoder.
//!
//! Turns raw frames into [`ClientEvent`]s while tracking the growing
//! answer. Classification precedence comes from
//! [`kbchat_core::protocol::classify`]: error prefix, status prefix, exact
//! EOF marker, then content before EOF or sources after it.

use kbchat_core::knowledge::Source;
use kbchat_core::protocol::{ProtocolFrame, classify};
use tracing::{debug, trace};

/// What the caller of a chat stream sees.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// New answer text; `answer` is everything received so far
    Chunk { delta: String, answer: String },
    /// Status line changed. `active` is false once content starts flowing.
    Status { text: String, active: bool },
    Sources(Vec<Source>),
    /// The exchange finished; always the last event on success
    Complete { first_message: bool },
    /// The exchange failed; always the last event on failure
    Error(String),
}

impl ClientEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error(_))
    }
}

#[derive(Debug, Default)]
pub struct FrameDecoder {
    answer: String,
    status_active: bool,
    past_eof: bool,
    finished: bool,
    first_message: bool,
}

impl FrameDecoder {
    /// `first_message` is reported back in [`ClientEvent::Complete`].
    pub fn new(first_message: bool) -> Self {
        Self {
            first_message,
            ..Self::default()
        }
    }

    pub fn answer(&self) -> &str {
        &self.answer
    }

    pub fn has_content(&self) -> bool {
        !self.answer.is_empty()
    }

    pub fn past_eof(&self) -> bool {
        self.past_eof
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Decode one raw frame. Frames after a terminal event are ignored.
    pub fn decode(&mut self, raw: &str) -> Vec<ClientEvent> {
        if self.finished {
            trace!("Frame after end of exchange ignored");
            return Vec::new();
        }
        let Some(frame) = classify(raw, self.past_eof) else {
            debug!("Ignoring out-of-band frame");
            return Vec::new();
        };

        match frame {
            ProtocolFrame::Error(message) => {
                self.finished = true;
                vec![ClientEvent::Error(message)]
            }
            ProtocolFrame::Status(text) => {
                self.status_active = true;
                vec![ClientEvent::Status { text, active: true }]
            }
            ProtocolFrame::EndOfStream => {
                self.past_eof = true;
                Vec::new()
            }
            ProtocolFrame::Content(delta) => {
                let mut events = Vec::with_capacity(2);
                if self.status_active {
                    self.status_active = false;
                    events.push(ClientEvent::Status {
                        text: String::new(),
                        active: false,
                    });
                }
                self.answer.push_str(&delta);
                events.push(ClientEvent::Chunk {
                    delta,
                    answer: self.answer.clone(),
                });
                events
            }
            ProtocolFrame::Sources(sources) => self.complete(sources),
        }
    }

    /// The connection ended. After EOF this completes with no sources;
    /// before it the exchange is incomplete.
    pub fn close(&mut self) -> Vec<ClientEvent> {
        if self.finished {
            return Vec::new();
        }
        if self.past_eof {
            return self.complete(Vec::new());
        }
        self.finished = true;
        vec![ClientEvent::Error(
            "The connection closed before the answer was complete. Please try again.".into(),
        )]
    }

    fn complete(&mut self, sources: Vec<Source>) -> Vec<ClientEvent> {
        self.finished = true;
        let sources = sources.into_iter().map(with_display_title).collect();
        vec![
            ClientEvent::Sources(sources),
            ClientEvent::Complete {
                first_message: self.first_message,
            },
        ]
    }
}

/// Untitled sources are named after the last path segment of their link.
fn with_display_title(mut source: Source) -> Source {
    if source.title.trim().is_empty() {
        let path = source.uri.split(['?', '#']).next().unwrap_or_default();
        source.title = path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
    }
    source
}
