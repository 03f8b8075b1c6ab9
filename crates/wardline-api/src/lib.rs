// wardline-api: authenticated data-access layer for the Wardline dashboard
//
// One shared session, many concurrent panels: the pieces here exist so
// that token expiry is recovered exactly once (single-flight refresh),
// requests are replayed at most once, and read-side caches refetch on
// server-pushed invalidation events.

pub mod auth;
pub mod credentials;
pub mod error;
pub mod realtime;
pub mod refresh;
pub mod resource;
pub mod transport;
pub mod types;

pub use credentials::{CredentialStore, Credentials, MemoryCredentialStore};
pub use error::Error;
pub use realtime::{InvalidationBridge, RealtimeEvent, SocketHandle, Subscription};
pub use refresh::{RefreshCoordinator, SessionEvent};
pub use resource::{AsyncResource, DepKey, ResourceOptions, ResourceState};
pub use transport::{ApiClient, ClientConfig, Payload, RequestDescriptor};
pub use types::{LoginResponse, RefreshResponse, SessionUser};
