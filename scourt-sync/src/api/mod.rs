//! HTTP API
//!
//! Pull-based control surface: an external cron hits the trigger endpoints,
//! everything else is inspection and configuration.

pub mod health;
pub mod identities;
pub mod jobs;
pub mod settings;
pub mod triggers;

pub use health::health_routes;
pub use identities::identity_routes;
pub use jobs::job_routes;
pub use settings::settings_routes;
pub use triggers::trigger_routes;
