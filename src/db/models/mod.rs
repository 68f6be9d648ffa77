//! Database entity and request models.

pub mod refresh_tokens;
pub mod users;
pub mod verification_tokens;
