//! Authentication and authorization
//!
//! - Tokens: stateless access tokens, MACed anti-forgery tokens, opaque
//!   single-use and refresh values
//! - Passwords: salted slow hashing with a self-describing encoding
//! - Session protocol: extraction, verification and the credential lifecycle
//! - Access: lens visibility and live-channel authorization

mod access;
mod password;
mod session;
mod tokens;

pub use access::{is_lens_owner, member_can_access_lens, AccessResolver};
pub use password::{hash_password, verify_password};
pub use session::{
    AuthContext, AuthError, SessionProtocol, SessionTokens, SignupOutcome, CSRF_HEADER,
};
pub use tokens::{
    create_access_token, decode_access_token, generate_opaque_token, hash_token, sign_csrf_token,
    verify_csrf_token, AccessClaims,
};
