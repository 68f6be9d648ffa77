//! PostgreSQL implementations of the store traits.

mod refresh_tokens;
mod users;
mod verification_tokens;

pub use refresh_tokens::PgRefreshTokenStore;
pub use users::PgUserStore;
pub use verification_tokens::PgVerificationTokenStore;
