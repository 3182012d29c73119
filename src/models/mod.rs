//! 领域模型

pub mod feature_flag;
pub mod lockout;
pub mod rate_limit;
pub mod security_event;
pub mod token;

pub use feature_flag::*;
pub use lockout::*;
pub use rate_limit::*;
pub use security_event::*;
pub use token::*;
