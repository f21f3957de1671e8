//! In-memory webhook inspector.
//!
//! Registered webhooks get an unguessable ingestion address (`/w/<publicId>`).
//! Every call to it is captured into a bounded, newest-first history of 100
//! events per webhook, which can be browsed over a JSON API and followed live
//! through a server-sent event stream.
//!
//! Nothing is persisted: history lives as long as the process.

pub mod buffer;
pub mod capture;
pub mod config;
pub mod error;
pub mod http_server;
pub mod store;
pub mod stream;
pub mod types;
pub mod verification;

pub use config::Config;
pub use error::{ApiError, StoreError};
pub use http_server::AppState;
pub use store::{SharedStore, WebhookStore};
