pub mod auth;
pub mod auth_context;
pub mod rate_limit;
pub mod request_time;
pub mod role_auth;
pub mod sanitize;
pub mod security_headers;
