#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! Authenticated HTTP client for the Beacon admin API.
//!
//! Layout:
//! - `client.rs`: request model, credential injection, refresh-and-replay protocol
//! - `refresh.rs`: single-flight refresh coordinator and waiter queue
//! - `session.rs`: session model and the store contract
//! - `endpoint.rs`: refresh and login token endpoints
//! - `navigation.rs`: redirect port for login and tenant selection
//! - `config.rs`: client settings and defaults
//! - `error.rs`: error taxonomy

pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod navigation;
pub mod refresh;
pub mod session;

pub use client::{ApiRequest, AuthenticatedClient, ClientBuilder, outgoing_headers};
pub use config::ClientConfig;
pub use endpoint::{HttpTokenRefresher, LoginCredentials, SharedRefresher, TokenRefresher};
pub use error::{ClientError, ClientResult, ErrorBody};
pub use navigation::{HeadlessNavigator, MemoryNavigator, Navigator, SharedNavigator};
pub use refresh::{PendingRefresh, RefreshCoordinator, RefreshLease, RefreshTicket};
pub use session::{
    InMemorySessionStore, Session, SessionStore, SessionUser, SharedSession, TenantSummary,
    TokenResponse,
};
