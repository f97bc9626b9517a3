pub(crate) const DEFAULT_LISTEN: &str = "127.0.0.1:8080";
pub(crate) const DEFAULT_DATA_DIR: &str = "./data";
pub(crate) const PUBLIC_KEY_SIZE: usize = 32;
pub(crate) const SIGNATURE_SIZE: usize = 64;
