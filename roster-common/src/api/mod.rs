//! Account and session logic shared by the HTTP layer
//!
//! Framework-free: password hashing, bearer tokens and the register/login
//! flows. The server wraps these in axum handlers and middleware.

pub mod auth;

pub use auth::{
    authenticate, generate_session_token, hash_password, hash_session_token, login, register,
    validate_registration, verify_password, LoginRequest, LoginResponse, RegisterRequest,
};
