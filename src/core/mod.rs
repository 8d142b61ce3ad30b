pub mod error;
pub mod types;

pub use error::{ReproError, Result};
pub use types::{
    CHUNK_ID_SPACE, CHUNK_PREFIX, Chunk, DATA_VERSION, ITEM_PAYLOAD_LEN, ITEMS_PER_CHUNK,
    chunk_key, generate_chunk, serialized_size,
};
