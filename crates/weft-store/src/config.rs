use serde::{Deserialize, Serialize};

use weft_kvdb::BackendKind;

/// Configuration for a [`Store`](crate::Store).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Key/value backend engine, selected at mount time.
    pub backend: BackendKind,
    /// Strip size in bytes for newly created objects. Existing objects keep
    /// the strip size they were created with.
    pub strip_size: u64,
    /// Number of worker threads applying batches.
    pub op_threads: usize,
    /// Lower bound on listing page size for internal paginated scans.
    pub ideal_list_min: usize,
    /// Upper bound on listing page size for internal paginated scans.
    pub ideal_list_max: usize,
    /// When `true`, collection splits re-scan both collections afterwards
    /// and fail if the hash partition does not hold.
    pub debug_verify_split: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            strip_size: 4096,
            op_threads: 2,
            ideal_list_min: 200,
            ideal_list_max: 1024,
            debug_verify_split: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = StoreConfig::default();
        assert!(config.strip_size > 0);
        assert!(config.op_threads > 0);
        assert!(config.ideal_list_min <= config.ideal_list_max);
    }

    #[test]
    fn serde_roundtrip() {
        let config = StoreConfig {
            strip_size: 8,
            ..StoreConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: StoreConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.strip_size, 8);
    }
}
