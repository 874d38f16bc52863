//! Federation module
//!
//! Handles:
//! - Detached HTTP signatures (inbound verification, outbound signing)
//! - Signing key resolution against the account store
//! - Remote actor resolution and collection fetches

mod actor;
mod keys;
mod signature;

pub use actor::{ActorResolver, ObjectKind, RemoteActor, reference_hash};
pub use keys::{KEY_FRAGMENT, KeyResolver, ResolvedKey};
pub use signature::{
    ParsedSignature, REQUIRED_HEADERS, SignatureHeaders, challenge, parse_signature_header,
    sign_request, signature_header, verify_signature,
};
