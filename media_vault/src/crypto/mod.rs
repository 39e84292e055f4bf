//! Media Vault - Cryptographic Core
//!
//! AES-256-CBC containers for metadata and block-encrypted streams for
//! large media assets.

pub mod keys;
pub mod container;
pub mod block_stream;

pub use keys::*;
pub use container::{
    decrypt, decrypt_json, encrypt, encrypt_json, encrypt_with_method, EncryptionMethod,
};
pub use block_stream::{BlockDecryptReader, BlockEncryptWriter, BLOCK_SIZE};
