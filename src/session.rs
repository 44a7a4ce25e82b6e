//! Keys under which the login flow stores the caller in the cookie session.

pub const USER_ID: &str = "user_id";
pub const USERNAME: &str = "username";
