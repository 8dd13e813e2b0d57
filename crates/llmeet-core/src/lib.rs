//! LLMeet desktop client core.
//!
//! Network access layer shared by every screen: the authenticated
//! request gateway and the realtime event bus.

pub mod auth;
pub mod config;
pub mod credentials;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod meeting;
pub mod request;
pub mod session;

pub use auth::{AuthService, Credentials, Registration};
pub use config::{ClientConfig, ReconnectPolicy};
pub use credentials::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use errors::{LlmeetError, RequestError};
pub use events::{ConnectionState, EventBus, EventBusConfig, EventEnvelope, EventKind, EventListener};
pub use gateway::{GatewayConfig, RequestGateway};
pub use meeting::{MeetingInfo, MeetingService};
pub use request::{Method, Outcome, RequestSpec};
pub use session::{SessionNotifier, TracingSessionNotifier};
