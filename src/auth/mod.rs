// 认证模块

pub mod captcha;
pub mod engine;
pub mod token_cache;

pub use engine::{AuthEngine, AuthState};
pub use token_cache::TokenCache;
