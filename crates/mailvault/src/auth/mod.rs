//! OAuth credential lifecycle.
//!
//! Connect-state CSRF payloads for the authorization round-trip and the
//! token manager that keeps stored access tokens usable.

pub mod error;
pub mod state;
pub mod tokens;

pub use error::AuthError;
pub use state::ConnectState;
pub use tokens::{TokenManager, REFRESH_BUFFER_SECS};
