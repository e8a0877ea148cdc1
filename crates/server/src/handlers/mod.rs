//! HTTP request handlers.

pub mod health;
pub mod tiles;

pub use health::*;
pub use tiles::*;
