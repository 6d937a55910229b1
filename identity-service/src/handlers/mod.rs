pub mod credentials;
pub mod email;
pub mod health;
pub mod magic_link;
pub mod otp;
pub mod session;
pub mod tenant;

pub use session::REFRESH_TOKEN_HEADER;
