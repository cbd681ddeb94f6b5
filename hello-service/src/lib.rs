//! A service that announces itself to a service-discovery registry, answers a greeting
//! and a health endpoint, and leaves the registry again on SIGINT/SIGTERM.

pub mod config;
pub mod identity;
pub mod lifecycle;
pub mod prometheus;
pub mod router;
pub mod server;
pub mod signals;
