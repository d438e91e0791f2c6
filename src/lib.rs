pub mod config;
pub mod dispatch;
pub mod error;
pub mod extract;
pub mod response;
pub mod server;
pub mod session;
pub mod tools;
