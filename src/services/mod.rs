//! Business logic services layer

pub mod auth_guard;
pub mod error_handler;
pub mod feature_flags;
pub mod lockout_service;
pub mod maintenance;
pub mod rate_limiter;
pub mod security_logger;
pub mod token_service;

pub use auth_guard::AuthGuard;
pub use error_handler::{ErrorContext, ErrorHandler};
pub use feature_flags::{FeatureFlagService, FlagSource, StaticFlagSource};
pub use lockout_service::LockoutService;
pub use maintenance::{MaintenanceReport, MaintenanceService};
pub use rate_limiter::RateLimiter;
pub use security_logger::{SecurityEventParams, SecurityLogger};
pub use token_service::TokenService;
