pub mod auth;
pub mod monitoring;
pub mod security;

pub use auth::{
    AccountLinks, AuthDependencies, AuthResponse, AuthService, LoginRequest, RegisterRequest,
    TwoFactorSetup,
};
pub use monitoring::MonitoringService;
pub use security::{SecurityService, SYSTEM_ACTOR};
