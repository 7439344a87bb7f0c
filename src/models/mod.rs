//! Data models for the lost & found board.
//!
//! Wire names are camelCase and dates are seconds since the epoch, matching the
//! documents the mobile clients read and write.

mod comment;
mod post;
mod relay;
pub mod timestamp;
mod user;

pub use comment::*;
pub use post::*;
pub use relay::*;
pub use user::*;
