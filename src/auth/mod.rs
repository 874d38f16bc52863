//! Authentication
//!
//! OAuth2 client flows for the local service actor, the signed session
//! cookie codec, and the request identity middleware.

pub mod middleware;
pub mod oauth;
pub mod session;

pub use middleware::{LoggedAccount, load_session, verify_signature_middleware};
pub use oauth::{Oauth2Config, TokenManager, hide_string};
pub use session::{SESSION_COOKIE, create_session_token, decode_session_token};
