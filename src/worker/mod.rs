pub mod balances;
pub mod classifier;
pub mod collections;
pub mod engine;
pub mod metadata;
pub mod parser;
pub mod worker;

pub use balances::{BalanceTracker, Direction};
pub use classifier::ContractClassifier;
pub use collections::CollectionFetcher;
pub use engine::ReconciliationEngine;
pub use metadata::MetadataResolver;
pub use worker::ChainWorker;
