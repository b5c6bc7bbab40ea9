//! Portal UI fragment handling
//!
//! The portal's detail page is assembled from XML UI fragments referenced
//! from the base document. This module resolves those references, caches
//! fragment content in the database, and performs the alias-tolerant
//! extraction of typed records from portal JSON documents.

pub mod extract;
pub mod resolver;

pub use extract::*;
pub use resolver::{fetch_fragment, resolve_fragment_paths, FragmentSource};
