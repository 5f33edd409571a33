//! Services every host runs, loaded under the `platform/` id prefix.

pub mod health;
pub mod permissions;

pub use health::HealthService;
pub use permissions::PermissionsService;

pub const PLATFORM_PREFIX: &str = "platform/";
