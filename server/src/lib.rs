//! # Sonar
//!
//! Perplexity Sonar compatible answer server
//!
//! ## Features
//! - 🔎 **Web search** with domain and recency filters for `sonar*` models
//! - 📚 **Citations** returned with every searched answer
//! - 🤖 **Pluggable LLMs**: Ollama, OpenAI, Anthropic
//! - 📡 **Streaming** completions as server-sent events
//! - 🛡️ **Bearer auth** and per-key rate limiting
//! - 🌐 **Response cache** with optional peer replication
//! - 🔌 **C ABI** entry points for embedding (`StartServerFromEnv`, `StartServer`)
//!
//! ## Quick Start
//!
//! ```no_run
//! use sonar::{Server, SonarConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), sonar::SonarError> {
//!     let config = SonarConfig::new()
//!         .port(8080)
//!         .auth_token("secret")
//!         .with_ollama("deepseek-r1:1.5b", "http://localhost:11434");
//!
//!     let mut server = Server::new(config);
//!     server.run().await
//! }
//! ```
//!
//! ## Talking to a server
//!
//! ```no_run
//! use sonar::SonarClient;
//! use sonar_core::{ChatCompletionRequest, Message};
//!
//! # async fn demo() -> Result<(), sonar::SonarError> {
//! let client = SonarClient::new("http://localhost:8080", "secret");
//! let completion = client
//!     .chat_completions(&ChatCompletionRequest {
//!         model: "sonar".to_string(),
//!         messages: vec![Message::user("What is Rust?")],
//!         ..Default::default()
//!     })
//!     .await?;
//! println!("{:?} {:?}", completion.content(), completion.citations);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod ffi;
pub mod handler;
pub mod logging;
pub mod middleware;
pub mod request;
pub mod response;
pub mod server;
pub mod state;

// Re-export main types for convenient use
pub use client::SonarClient;
pub use config::{EnvSource, SonarConfig};
pub use error::{SonarError, SonarResult};
pub use handler::{AsyncHandler, BoxedHandler, Handler};
pub use logging::{LogFormat, LogLevel};
pub use middleware::{Middleware, MiddlewareChain, MiddlewareResult};
pub use request::RequestData;
pub use response::{Json, SonarResponse};
pub use server::{Server, StopHandle};
pub use state::{ApiKeys, AppState};

// Re-export important types from core crate for convenience
pub use hyper::StatusCode;
pub use sonar_core::Method;
