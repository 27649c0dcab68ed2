//! # kbchat Core
//!
//! Domain types, wire protocol, collaborator traits, and error definitions
//! for the kbchat retrieval-augmented chat service. This crate has **no
//! framework dependencies**: it defines the model every other crate
//! implements against.
//!
//! Every external collaborator (LLM provider, knowledge base, link signer,
//! session store, metadata source, index endpoints, token check) is a trait
//! here. Implementations live in their respective crates, which keeps the
//! agent loop testable against scripted stand-ins.

pub mod error;
pub mod knowledge;
pub mod message;
pub mod protocol;
pub mod provider;
pub mod services;
pub mod session;
pub mod stream;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use knowledge::{KnowledgeBase, LinkSigner, RetrievedPassage, Source};
pub use message::{ContentBlock, HistoryPair, Role, Turn};
pub use protocol::{ChatRequest, ProtocolFrame};
pub use provider::{ChunkReceiver, Provider, ProviderRequest, RawChunk, ToolDefinition};
pub use services::{IndexQueryService, MetadataSource, TokenVerifier};
pub use session::{SessionRecord, SessionStore};
pub use stream::{StopReason, StreamEvent};
pub use tool::{Tool, ToolCall, ToolOutput, ToolRegistry};
