pub mod auth_method;
pub mod auth_token;
pub mod role;
pub mod tenant;
pub mod user;

pub use auth_method::{parse_auth_methods, AuthMethod, Credential};
pub use auth_token::{AuthToken, AuthTokenType};
pub use role::{DepartmentRole, ParseRoleError, Role};
pub use tenant::Tenant;
pub use user::{DeliveryChannel, Identifier, User, UserProfile};
