//! Prefixed random identifiers.

use alloy_primitives::hex;
use rand::RngExt;
use rand::rng;

/// Returns `<prefix>_<20 hex chars>`, e.g. `tkt_3f9a…`.
#[must_use]
pub fn random_id(prefix: &str) -> String {
    let bytes: [u8; 10] = rng().random();
    format!("{prefix}_{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_id_shape() {
        let id = random_id("pay");
        assert!(id.starts_with("pay_"));
        assert_eq!(id.len(), "pay_".len() + 20);
        assert_ne!(id, random_id("pay"));
    }
}
