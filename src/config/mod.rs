mod config;

pub use config::{IndexerSettings, MetadataSettings, PostgresSettings, Settings};
