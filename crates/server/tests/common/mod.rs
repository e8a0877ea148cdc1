//! Common test utilities and fixtures.

pub mod fixtures;
pub mod queue;
pub mod server;

#[allow(unused_imports)]
pub use fixtures::*;
#[allow(unused_imports)]
pub use queue::*;
#[allow(unused_imports)]
pub use server::*;
