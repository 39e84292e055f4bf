//! # Media Vault
//!
//! Storage core of an encrypted, single-tenant media vault.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        VAULT                             │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────┐   │
//! │  │  SCANNER    │  │  TAG        │  │  MEDIA ASSET    │   │
//! │  │  all/any/   │  │  MANAGER    │  │  MANAGER        │   │
//! │  │  none of    │  │  tag_list   │  │  meta.pmv + pma │   │
//! │  └──────┬──────┘  └──────┬──────┘  └────────┬────────┘   │
//! │         │                │                  │            │
//! │  ┌──────┴────────────────┴──────┐  ┌────────┴────────┐   │
//! │  │  VAULT INDEX (main + tags)   │  │  CRYPTO         │   │
//! │  │  sorted u64 list, scratch    │  │  flat container │   │
//! │  │  copy + atomic rename        │  │  block stream   │   │
//! │  └──────────────┬───────────────┘  └─────────────────┘   │
//! │                 │                                        │
//! │  ┌──────────────┴───────────────┐  ┌─────────────────┐   │
//! │  │  TWO-PHASE READ/WRITE LOCK   │  │  TEMP FILES +   │   │
//! │  │  request → start → end       │  │  VAULT LOCK     │   │
//! │  └──────────────────────────────┘  └─────────────────┘   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Model
//!
//! - Metadata and tag catalog in AES-256-CBC containers, zlib-compressed
//! - Media assets in independently encrypted 5 MiB blocks for random access
//! - The vault key is passed per call and zeroized on drop
//! - Temp files are zero-overwritten before removal

pub mod crypto;
pub mod error;
pub mod index;
pub mod indexed_list;
pub mod lockfile;
pub mod maintenance;
pub mod media;
pub mod rw_lock;
pub mod scanner;
pub mod tags;
pub mod temp_files;
pub mod vault;

pub use crypto::VaultKey;
pub use error::{VaultError, VaultResult};
pub use index::VaultIndex;
pub use maintenance::SweepReport;
pub use media::{MediaMetadata, MediaType};
pub use rw_lock::ReadWriteLock;
pub use scanner::{ScanQuery, TagFilterMode, VaultScanner};
pub use tags::TagManager;
pub use vault::{SearchPage, Vault, VaultConfig, VaultStats};

/// Media Vault version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Media Vault signature
pub const SIGNATURE: &str = "MEDIA_VAULT_v1";
