pub mod errors;
pub mod handlers;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub mod models;
pub mod store;
