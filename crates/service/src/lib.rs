//! Document question answering and interview booking over one chat surface.
//!
//! `RagService` is the entry point. Hosts build it from an `AppConfig`,
//! optionally swapping any external dependency through the builder, and
//! call `init_tracing` once at startup.

pub mod config;
pub mod error;
pub mod intent;
pub mod metrics;
pub mod orchestrator;
pub mod telemetry;

pub use config::{AppConfig, ConfigError};
pub use error::{ErrorCode, ErrorKind, ServiceError};
pub use intent::{Intent, IntentConfirmer, LlmIntentConfirmer, classify_intent, resolve_intent};
pub use metrics::{Metrics, MetricsSnapshot};
pub use orchestrator::{ChatReply, HealthReport, IngestReport, RagService, RagServiceBuilder, booking_reply};
pub use telemetry::{LogFormat, init_tracing};
