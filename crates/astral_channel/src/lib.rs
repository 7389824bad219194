#![doc = include_str!("../README.md")]

pub mod character_manager;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod handlers;
pub mod persistence;
pub mod server;
pub mod world;

pub use character_manager::{CharacterManager, ItemChanges, ItemError};
pub use client::{ClientRegistry, ClientSession, ConnectionState, ItemBox};
pub use config::ChannelConfig;
pub use dispatch::{HandlerError, ParseOutcome};
pub use persistence::{ChangeSetStore, DatabaseChangeSet, ItemInstance, MemoryStore, Persisted};
pub use server::ChannelServer;
pub use world::WorldLink;

/// Installs the default tracing subscriber for server binaries.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
}
