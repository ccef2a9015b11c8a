//! Signing keys: material helpers, the local key cache, the keyserver seam
//! and the per-run trusted key store

mod cache;
mod material;
mod server;
mod store;

pub use cache::{CachedKey, KeyCache, KeyCacheError, KEY_CACHE_FILENAME};
pub use material::{
    compute_key_fingerprint, decode_signing_key, decode_verifying_key, encode_signing_key,
    encode_verifying_key, generate_keypair, key_id_of, KeyMaterialError,
};
pub use server::{fetch_with_timeout, DirectoryKeyServer, KeyFetchError, KeyServer};
pub use store::{KeyOrigin, KeyResolution, ResolvedKey, TrustedKeyStore, DEFAULT_FETCH_TIMEOUT};
