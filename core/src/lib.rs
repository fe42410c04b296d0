//! AI orchestration core for the ASAgents construction-management platform.
//!
//! The modules map onto the main responsibilities:
//! - [`agents`] defines the provider contract, configuration, the registry and
//!   the HTTP vendor backends.
//! - [`conversation`] stores conversation histories in memory.
//! - [`model_manager`] routes messages to providers and records each exchange.
//! - [`multimodal`] classifies uploads and assembles multimodal requests.
//! - [`language`] detects languages and translates text.
//! - [`development`] fans code-completion requests out to several providers.
//! - [`facade`] wires everything into one [`facade::AiSystem`] for the host.
//! - [`errors`] keeps the error catalogue with codes and explanations.
//! - [`logging`] emits structured diagnostics through the `log` facade.

pub mod agents;
pub mod conversation;
pub mod development;
pub mod errors;
pub mod facade;
pub mod language;
pub mod logging;
pub mod model_manager;
pub mod multimodal;

#[cfg(test)]
mod testing;

pub use errors::{AiError, Result};
pub use facade::{AiSystem, ChatReply, SystemStatus};
