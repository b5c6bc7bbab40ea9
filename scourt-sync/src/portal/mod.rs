//! Court portal protocol client
//!
//! Speaks the portal's WebSquare JSON protocol directly: session handshake,
//! captcha retrieval, case search and the captcha-free detail/progress calls
//! available once a case's encrypted number is bound to a browser identity.

pub mod client;
pub mod codes;
pub mod types;

pub use client::{PortalClient, PortalConfig};
pub use codes::{case_type_code, court_code};
pub use types::*;
