//! CityPulse Core Library
//!
//! This crate provides the proxy configuration and its error type.

pub mod config;
pub mod error;

pub use config::{NotificationConfig, PlaceholderMap, ProxyConfig};
pub use error::{CoreError, CoreResult};
