//! Identity and session pool
//!
//! The portal binds each case's encrypted number to the browser identity
//! (WMONID) that performed the original search, so cases are spread across a
//! bounded pool of profiles and stay sticky to the profile that first
//! searched them.

pub mod profiles;
pub mod wmonid;

pub use profiles::*;
pub use wmonid::*;
