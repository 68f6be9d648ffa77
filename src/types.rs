//! Shared identifier types.

/// Database identifier for a user.
pub type UserId = i64;

/// Database identifier for a role.
pub type RoleId = i64;
