pub mod aop;
pub mod components;
pub mod config;
pub mod engine;
pub mod logging;
pub mod metrics;
pub mod service;
pub mod types;

pub use config::EngineConfig;
pub use engine::RuleEngine;
pub use service::RuleChainService;
pub use types::*;
