mod checkpoint;
mod collection;
mod owner;
mod token;
mod transfer;

pub use checkpoint::SyncCheckpoint;
pub use collection::Collection;
pub use owner::Owner;
pub use token::Token;
pub use transfer::Transfer;
