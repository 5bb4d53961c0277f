//! # Observability
//!
//! Structured logging for test campaigns via `tracing`.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │   tracing::info!(tx_radio, rx_channel, ...)   │
//! └──────────────────────┬───────────────────────┘
//!                        │
//!                   EnvFilter (RUST_LOG / LogConfig::level)
//!                        │
//!          ┌─────────────┴─────────────┐
//!          ▼                           ▼
//!   console layer                file layer
//!   (pretty/compact/json)        (plain text, optional)
//! ```

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat, LogLevel, DEFAULT_LOG_FILE};
