//! These models represent the objects passed around by the agent
//!
//! There are several different related formats we need to interact with:
//! - the internal conversation history owned by the agent
//! - openai messages/tools, sent from the agent to the LLM
//! - anthropic messages/tools, sent from the agent to the LLM
//! - tool registry requests, sent from the agent to the tool servers
//!
//! We always immediately convert the provider formats into the internal structs
//! using to/from helpers in `providers::utils`, so nothing outside the providers
//! module needs to know about wire shapes.
pub mod chunk;
pub mod message;
pub mod role;
pub mod tool;
