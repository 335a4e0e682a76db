//! httpwall Core
//!
//! Types shared by every httpwall component.
//!
//! This crate provides:
//! - The buffered request and response shapes that rules inspect
//! - A narrow accessor onto the authenticated user of a request
//! - Error types and result handling

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{current_user, normalize_path, request_path, CurrentUser, InspectedRequest, RawResponse, SessionUser, UserContext};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::types::{
        current_user, normalize_path, request_path, CurrentUser, InspectedRequest, RawResponse, SessionUser, UserContext,
    };
}
