//! Client-side upload orchestration.
//!
//! The orchestrator implements the retry/progress/cancellation contract
//! the protocol promises: it requests a grant, streams the payload
//! directly to storage, and confirms when the options require it.

pub mod api;
pub mod transport;
pub mod uploader;

pub use api::{GrantApi, GrantError, HttpGrantApi};
pub use transport::{HttpTransport, Transport, TransferError};
pub use uploader::{UploadEvent, UploadHandle, UploadInput, UploadedFile, Uploader};
