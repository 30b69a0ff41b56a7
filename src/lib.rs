//! # sunvoy-client
//!
//! Session-aware client for the Sunvoy challenge site.
//!
//! The crate keeps a cookie session alive across runs, logs in by scraping
//! the login form's nonce when the saved session no longer works, and signs
//! calls to the privileged settings API with a time-bound SHA-1 checkcode.
//!
//! ## Features
//!
//! - Flat cookie jar persisted to a JSON snapshot between runs
//! - Session probe and automatic re-login
//! - Regex or DOM-based scraping of hidden form inputs
//! - Configurable checkcode field order
//! - Pluggable transport (reqwest by default)
//!
//! ## Example
//!
//! ```no_run
//! use sunvoy_client::SunvoyClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = SunvoyClient::builder()
//!         .with_session_path("auth_credentials.json")
//!         .build()?;
//!     let report = client.run().await?;
//!     println!("saved {} users to {}", report.users, report.output_path.display());
//!     Ok(())
//! }
//! ```

mod client;

pub mod config;
pub mod events;
pub mod extract;
pub mod session;
pub mod signing;
pub mod transport;

pub use crate::client::{
    ClientBuilder,
    ClientError,
    ClientResult,
    RunReport,
    SunvoyClient,
    merge_current_user,
};

pub use crate::config::{ClientConfig, ConfigError, Credentials, Endpoints};

pub use crate::events::{
    ClientEvent,
    EventDispatcher,
    EventHandler,
    LoggingHandler,
    SessionTransition,
};

pub use crate::extract::{FieldExtractor, HtmlExtractor, RegexExtractor, is_login_page};

pub use crate::session::{
    CookieJar,
    CredentialStore,
    NonceSource,
    Session,
    SessionError,
    SessionManager,
    SessionSnapshot,
    SessionState,
    StoreError,
};

pub use crate::signing::{
    CheckcodeInput,
    CheckcodeLayout,
    RequestSigner,
    SignedPayload,
    SigningError,
    SigningField,
    SigningMaterial,
    compute_checkcode,
};

pub use crate::transport::{
    GatewayResponse,
    HttpGateway,
    HttpTransport,
    RawResponse,
    ReqwestTransport,
    RequestDescriptor,
    TransportError,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
