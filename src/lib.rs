//! pan_share - Save externally shared cloud-storage links into your own storage.
//!
//! This library provides functionality to:
//! - Parse share links (and their extraction codes) out of free-form text
//! - Keep a login session alive: restore, QR login, invalidation, logout
//! - Save a share into a folder, optionally filtered, and wait for the backend task
//! - Run many shares as a bounded-concurrency batch
//! - Create, list and delete shares of the user's own files
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use pan_share::{
//!     parse_share_text, Config, ExtensionFilter, FileCredentialStore, HttpGateway, PanApi,
//!     QrLoginAcquirer, SaveOptions, SessionManager, ShareTransfer, TaskPoller,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(None)?;
//!     let session = Arc::new(SessionManager::new(
//!         Arc::new(QrLoginAcquirer::new(&config)?),
//!         Arc::new(FileCredentialStore::new(config.cookie_file())),
//!         config.qr_timeout(),
//!     ));
//!     let api = PanApi::new(Arc::new(HttpGateway::new(&config)?), session, config.page_size);
//!     let poller = TaskPoller::new(api.clone(), config.poll.clone());
//!     let transfer = ShareTransfer::new(api, poller, config.transfer.clone());
//!
//!     let share = parse_share_text("https://pan.quark.cn/s/abc123 提取码: x1y2")?;
//!     let options = SaveOptions::from_config(&config, "0").with_filter(ExtensionFilter::parse("mp4,mkv"));
//!     let outcome = transfer.save_share(&share, &options, &CancellationToken::new()).await;
//!     println!("{}", outcome);
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod auth;
pub mod batch;
pub mod client;
pub mod config;
pub mod error;
pub mod filter;
pub mod gateway;
pub mod login;
pub mod models;
pub mod poller;
pub mod store;
pub mod transfer;
pub mod url_parser;

// Re-exports for convenience
pub use api::PanApi;
pub use auth::{CredentialAcquirer, CredentialStore, SessionManager, SessionStatus};
pub use batch::{read_entries, BatchCoordinator, BatchEntry};
pub use client::HttpGateway;
pub use config::{Config, ConflictPolicy, ShareSettings};
pub use error::{ErrorKind, PanError, Result};
pub use filter::{AllOf, ExtensionFilter, FilterPredicate, GlobFilter, SizeFilter};
pub use gateway::{ApiHost, ApiRequest, Gateway};
pub use login::QrLoginAcquirer;
pub use models::{
    BatchResult, CreateShareOptions, CreatedShare, FileMetadata, MyShare, Outcome, ShareReference,
    TerminalStatus,
};
pub use poller::TaskPoller;
pub use store::FileCredentialStore;
pub use transfer::{SaveOptions, ShareTransfer};
pub use url_parser::parse_share_text;
