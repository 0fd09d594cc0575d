//! chunklog - an append-only log store keeping records in chunk files.
//!
//! Every log is an independently growing sequence of binary records keyed by
//! ULIDs. Records are appended to fixed-capacity chunk files on local disk,
//! while the list of chunks per log lives in a catalog. Reads walk a log's
//! chunks in ID order, forward or backward, optionally filtered by a small
//! condition language, and can merge many logs into one stream.
//!
//! # Architecture
//!
//! - **Chunk access**: a per-chunk state machine admits many readers, one
//!   writer or a pending deletion, never a mix.
//! - **Provider**: a bounded cache of open chunk files; handles are leased
//!   and only idle chunks are evicted.
//! - **LocalLog**: per-log append, query and count on top of the provider
//!   and the catalog.
//! - **Service**: log management and multi-log queries; what the HTTP
//!   server exposes.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use chunklog::{AppendRequest, CachedCatalog, Config, Cx, InMemoryCatalog, QueryRecordsRequest, Service};
//!
//! let catalog = Arc::new(CachedCatalog::new(InMemoryCatalog::new()));
//! let service = Service::open(&Config::default(), catalog)?;
//! service.create_log("orders", Default::default()).await?;
//!
//! let cx = Cx::background();
//! service
//!     .append_records(&cx, &AppendRequest {
//!         log_id: "orders".into(),
//!         payloads: vec![Bytes::from("order-123")],
//!         expand_ids: false,
//!     })
//!     .await?;
//!
//! let page = service
//!     .query_records(&cx, &QueryRecordsRequest {
//!         log_ids: vec!["orders".into()],
//!         ..Default::default()
//!     })
//!     .await?;
//! ```

mod catalog;
mod chunkfs;
mod config;
mod error;
mod id;
mod logfs;
mod model;
pub mod ql;
#[cfg(feature = "http-server")]
pub mod server;
mod service;

pub use catalog::{CachedCatalog, Catalog, ChunkCatalog, InMemoryCatalog, LogCatalog};
pub use chunkfs::{
    AccessMode, AppendOutcome, Chunk, ChunkAccessor, ChunkHandle, ChunkListener, ChunkReader,
    Provider, RawRecord,
};
pub use common::{Cx, CxError};
pub use config::{ChunkConfig, Config, LogConfig, ServiceConfig};
pub use error::{Error, Result};
pub use id::{IdMinter, next_id, parse_id, prev_id, time_of};
pub use logfs::LocalLog;
pub use model::{
    AppendRequest, AppendResult, ChunkInfo, CountResult, DeleteLogsResult, Id, Log, LogId,
    LogUpdate, QueryRecordsRequest, QueryRecordsResult, QueryRequest, QueryResult, Record,
};
pub use service::Service;
