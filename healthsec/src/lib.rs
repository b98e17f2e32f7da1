pub mod config;
pub mod error;
pub mod response;

pub mod client {
    pub mod session;
}

pub mod server {
    pub mod cipher;
    pub mod hasher;
    pub mod pipeline;
    pub mod policy;
    pub mod sealer;
    pub mod tls;
    pub mod token;
}

pub use config::{SecurityConfig, SharedSecret};
pub use error::{SecurityError, SecurityResult};
pub use response::{ApiResponse, FieldError};
