pub mod assets;
pub mod cancel;
pub mod config;
pub mod error;
pub mod guard;
pub mod logger;
pub mod matcher;
pub mod platform;
pub mod probe;
pub mod region;
pub mod stats;
pub mod types;
pub mod workflow;
