pub mod sled_store;
pub mod tx_store;

pub use sled_store::SledStore;
pub use tx_store::SledTransactionStore;
