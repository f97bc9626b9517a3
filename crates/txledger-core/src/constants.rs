pub const HASH_SIZE: usize = 32;
pub const HASH_HEX_SIZE: usize = HASH_SIZE * 2;
pub const DEFAULT_DIFFICULTY: usize = 2;
pub const CHAIN_STORAGE_KEY: &str = "qr_secure_blockchain";
pub const GENESIS_DATA: &str = "Genesis Block";
