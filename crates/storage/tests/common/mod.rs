pub mod fixtures;

#[allow(unused_imports)]
pub use fixtures::{TestStorage, seeded_bytes, sha256_hash, split_chunks};
