//! Wrapp Config provides a registry of configs that can be injected into a chain.
//!
//! Wrapp Config is split into two major parts:
//! 1. ConfigProvider: Used to create the registry of all configs
//! 2. Config<T>: The type providers ask for to receive a registered config
//!
//! Every registered config becomes a literal provider of `Config<T>` in
//! [ConfigProvider::collection](provider::ConfigProvider::collection), so it is available to
//! every provider of the chain before the first invocation.
//!
//! # Examples
//!
//! ```rust
//! use wrapp_config::provider::ConfigProvider;
//!
//! #[derive(Clone)]
//! struct AppConfig {
//!     host: String,
//!     port: u16,
//! }
//!
//! let mut config_provider = ConfigProvider::default();
//! config_provider
//!     .add_config(AppConfig {
//!         host: "localhost".to_string(),
//!         port: 8080_u16,
//!     })
//!     .unwrap();
//!
//! let retrieved = config_provider.require_config::<AppConfig>().unwrap();
//! assert_eq!(retrieved.host, "localhost");
//! assert_eq!(retrieved.port, 8080);
//! ```
//!
//! Wrapp Config consists of the following components:
//!
//! 1. Config - the injectable wrapper of a registered config
//! 2. Provider - for creating a registry of configs, adding and retrieving configs
//! 3. Errors - for config errors

pub mod config;
pub mod errors;
pub mod provider;
