// Configuration module
//
// This module contains all configuration-related functionality split into focused submodules:
// - types: Core configuration structures and forgiving deserializers
// - loader: Configuration file loading and saving
// - validator: Startup validation and conversion into policies

pub mod loader;
pub mod types;
pub mod validator;

pub use types::{Config, InboundTls, OutboundSettings};
