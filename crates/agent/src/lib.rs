//! The agent loop for kbchat.
//!
//! One exchange runs as a sequence of streaming model calls:
//!
//! 1. **Build the conversation** from the trailing history window and the
//!    new user message
//! 2. **Stream the model call**, forwarding text as it arrives
//! 3. **If the turn stops for a tool**: run it, append the tool-use and
//!    tool-result turns, and call the model again
//! 4. **Otherwise**: the exchange is done
//!
//! The loop also stops when the iteration limit or the exchange budget is
//! reached.

pub mod config;
pub mod loop_runner;
pub mod stream_event;
pub mod title;

pub use config::{AgentConfig, assemble_system_prompt, build_system_prompt};
pub use loop_runner::{AgentLoop, ExchangeError, ExchangeOutcome, LoopState};
pub use stream_event::AgentStreamEvent;
pub use title::generate_title;
