//! Request handlers.

pub mod background;
pub mod health;
pub mod jobs;

pub use background::*;
pub use health::*;
pub use jobs::*;
