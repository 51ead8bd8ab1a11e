pub mod capability;
pub mod error;
pub mod job;
pub mod language;
pub mod provider_config;
pub mod settings;
pub mod transcript;
