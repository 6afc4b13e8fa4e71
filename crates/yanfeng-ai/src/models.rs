//! These models represent the objects passed between the host chat log, the
//! orchestration loop and the ModelScope API.
//!
//! There are two related formats we need to interact with:
//! - the host chat log: an ordered, append-only sequence of conversation entries
//! - the OpenAI-compatible chat completion messages ModelScope accepts and returns
//!
//! We keep the chat log in the internal structs below and only convert to the
//! wire format when building a request (see `projector`) or reading a response
//! (see `providers::types`).
pub mod content;
pub mod message;
pub mod tool;
