//! WOPI host gateway
//!
//! The protocol and trust layer between browser office editors and a remote
//! storage back end: session-context tokens, proof-key verification, lock
//! lifecycle management and two-phase content transfer. The wire-level HTTP
//! surface lives in the companion `wopihost-server` crate; everything here
//! returns structured results and never touches HTTP status codes.

pub mod content;
pub mod context;
pub mod crypto;
pub mod error;
pub mod fileinfo;
pub mod lock;
pub mod proofkey;
pub mod storage;
pub mod token;

pub use content::{ByteStream, ContentTransfer};
pub use context::{FileReference, User, ViewMode, WopiContext};
pub use error::WopiError;
pub use fileinfo::{AppStyle, FileInfo};
pub use lock::{LockManager, WOPI_LOCK_DURATION};
pub use proofkey::{ProofKeyVerifier, VerificationError, DEFAULT_KEY_CACHE_TTL};
pub use storage::{
    FileLock, GatewayCode, GatewayError, StatInfo, StorageGateway, TransferEndpoint, UploadRequest,
};
pub use token::{file_reference_id, CodecConfig, SessionCodec, DEFAULT_TOKEN_TTL};
