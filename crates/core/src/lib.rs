pub mod config;
pub mod error;
pub mod message;
pub mod session;

pub use config::Config;
pub use error::*;
pub use message::*;
pub use session::*;
