use std::collections::BTreeMap;

/// Version tag baked into every chunk key.
pub const DATA_VERSION: u32 = 1;

/// Shared prefix of all chunk keys for [`DATA_VERSION`].
pub const CHUNK_PREFIX: &str = "v1-chunk-";

/// Number of chunk ids an actor's keyspace can hold (`000`..`fff`).
pub const CHUNK_ID_SPACE: u16 = 4096;

pub const ITEMS_PER_CHUNK: usize = 31;
pub const ITEM_PAYLOAD_LEN: usize = 100;

/// Item key -> payload. Sized to serialize to roughly 3.1 KB.
pub type Chunk = BTreeMap<String, String>;

/// Builds the storage key for a chunk id, e.g. `v1-chunk-0a3`.
///
/// Ids are zero-padded to three hex digits so that lexicographic key order
/// matches numeric id order.
pub fn chunk_key(chunk_id: u16) -> String {
    format!("{}{:03x}", CHUNK_PREFIX, chunk_id)
}

pub fn generate_chunk() -> Chunk {
    let payload = "x".repeat(ITEM_PAYLOAD_LEN);
    (0..ITEMS_PER_CHUNK)
        .map(|i| (format!("item{}", i), payload.clone()))
        .collect()
}

/// JSON-encoded byte size of a chunk. Informational only.
pub fn serialized_size(chunk: &Chunk) -> usize {
    serde_json::to_vec(chunk).map(|bytes| bytes.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_keys_are_padded_and_sort_numerically() {
        assert_eq!(chunk_key(0), "v1-chunk-000");
        assert_eq!(chunk_key(0xa3), "v1-chunk-0a3");
        assert_eq!(chunk_key(CHUNK_ID_SPACE - 1), "v1-chunk-fff");

        let keys: Vec<String> = (0..CHUNK_ID_SPACE).map(chunk_key).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn prefix_matches_data_version() {
        assert_eq!(CHUNK_PREFIX, format!("v{}-chunk-", DATA_VERSION));
    }

    #[test]
    fn generated_chunk_has_expected_shape() {
        let chunk = generate_chunk();
        assert_eq!(chunk.len(), ITEMS_PER_CHUNK);
        assert!(chunk.contains_key("item0"));
        assert!(chunk.contains_key("item30"));
        assert!(chunk.values().all(|v| v.len() == ITEM_PAYLOAD_LEN));

        let size = serialized_size(&chunk);
        assert!(size > 3_100 && size < 3_600, "unexpected chunk size {size}");
    }
}
