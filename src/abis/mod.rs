pub mod erc721;

pub use erc721::{Transfer, IERC721};
