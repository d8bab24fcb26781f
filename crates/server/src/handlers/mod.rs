//! HTTP request handlers.

pub mod media;
pub mod peers;
pub mod status;

pub use media::*;
pub use peers::*;
pub use status::*;
