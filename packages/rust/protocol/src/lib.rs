//! Wire side of the mirror: request encoding, the HTTP service client,
//! the streaming response parser, and the session provider.
//!
//! This crate provides:
//! - [`ServiceRequest`]: XML request encoding
//! - [`ServiceClient`]: posts requests, streams responses
//! - [`RecordStream`]: incremental parser yielding [`Record`]s
//! - [`authenticate`]: obtains a [`Session`](assetmirror_shared::Session)

pub mod client;
pub mod parser;
pub mod records;
pub mod request;
pub mod session;

pub use client::ServiceClient;
pub use parser::{ASSET_ELEMENT, ByteStream, DIRECTORY_ELEMENT, RecordStream};
pub use records::{
    AssetRecord, ChildRef, DirectoryRecord, PageCursor, QueryPage, Record, XmlElement,
};
pub use request::{SERVICE_GET, SERVICE_LOGON, SERVICE_QUERY, ServiceRequest};
pub use session::{authenticate, parse_session_token};
