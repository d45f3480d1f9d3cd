//! # authflow-declarative
//!
//! Login, signup, reauth and account recovery flows assembled from an [`AppConfig`]. Each
//! configured step becomes an intent that reads its definition through a JSON pointer into
//! the flow config, so a persisted tree stays meaningful as long as the configuration it
//! was built from.
//!
//! Storage, credentials, hooks and bot verification are collaborators looked up from the
//! [`Bus`](authflow_core::bus::Bus); see [`deps`].

pub mod account_linking;
pub mod account_recovery;
pub mod amr;
pub mod authenticator;
pub mod blocked;
pub mod bot_protection;
pub mod config;
pub mod deps;
pub mod errors;
pub mod factory;
pub mod finish;
pub mod identity;
pub mod login;
pub mod milestones;
pub mod model;
pub mod reauth;
pub mod registry;
pub mod schemas;
pub mod signup;
pub mod steps;

pub use config::{AppConfig, ConfigError};
pub use factory::DeclarativeFlowFactory;
pub use registry::registry;

pub mod prelude {
    pub use crate::config::{AppConfig, ConfigError};
    pub use crate::deps::{
        AccountRecoveryService, AuthenticatorService, BotProtectionVerifier, BotVerification,
        CookieStore, DepsExt, EventService, IdentityService, MfaService, OAuthProviderService,
        RateLimit, RateLimiter, Reservation, UserService,
    };
    pub use crate::factory::DeclarativeFlowFactory;
    pub use crate::model::*;
    pub use crate::registry::registry;
}
