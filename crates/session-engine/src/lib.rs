//! Session and token lifecycle for the pgAnalytics client.
//!
//! This crate provides:
//! - `ApiClient`: shared HTTP client with outgoing/incoming interceptor slots
//! - `SessionManager`: login, registration, refresh-on-401, logout
//! - `RouteGuard`: render-or-redirect decisions from session state
//! - Client-side password checks for registration
//! - Explicit FSM-based session phase management

mod api_client;
mod auth_fsm;
mod error;
mod models;
mod password_policy;
mod route_guard;
mod session;

pub use api_client::{
    endpoints, ApiClient, ApiFailure, BearerTokenInterceptor, RequestInterceptor, RequestPolicy,
    ResponseInterceptor,
};
pub use auth_fsm::session_machine;
pub use auth_fsm::{SessionMachine, SessionMachineInput, SessionMachineState, SessionPhase};
pub use error::{AuthError, AuthResult, FieldError};
pub use models::{
    LoginRequest, PasswordChange, ProfileUpdate, RefreshRequest, RegisterResponse, TokenResponse,
    User, UserRole,
};
pub use password_policy::{PasswordPolicy, PasswordViolation, RegistrationForm};
pub use route_guard::{evaluate, GuardOptions, RouteDecision, RouteGuard};
pub use session::{SessionManager, SessionSnapshot};
