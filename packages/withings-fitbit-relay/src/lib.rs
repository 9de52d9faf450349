//! Withings → Fitbit relay.
//!
//! Links a Withings account to a Fitbit account through two OAuth2
//! handshakes, subscribes to Withings measurement notifications, and
//! forwards each new weight and body-fat reading to Fitbit.

pub mod api;
pub mod config;
pub mod error;
pub mod flow;
pub mod oauth;
pub mod relay;
pub mod state;
pub mod store;
pub mod tls;

pub use api::router;
pub use config::{Args, RelayConfig};
pub use error::RelayError;
pub use state::AppState;
pub use store::{JsonFileStore, Provider, TokenRecord, TokenStore};
