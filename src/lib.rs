//! # exif-strip
//!
//! Privacy metadata stripper for JPEG and PNG. Removes EXIF and XMP in place
//! while copying every other byte of the file unchanged, and keeps a
//! session-scoped backup of each original so a strip can be undone.
//!
//! ## Quick Start
//!
//! The [`queue`] module is the front door: it collects paths arriving in
//! bursts, debounces them into batches and runs one batch at a time:
//!
//! ```rust,no_run
//! use exif_strip::config::Config;
//! use exif_strip::pipeline::BatchEvent;
//! use exif_strip::queue::IngestQueue;
//! use exif_strip::undo::UndoSession;
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(Some("config.json".as_ref()))?;
//!     let undo = Arc::new(UndoSession::new(&config.backup_base())?);
//!
//!     let sink = Arc::new(|event: &BatchEvent| match event {
//!         BatchEvent::Processed(result) => println!("{result}"),
//!         BatchEvent::Finished(summary) => println!("{summary}"),
//!         _ => {}
//!     });
//!
//!     let queue = IngestQueue::new(config.debounce(), Some(Arc::clone(&undo)), sink);
//!     queue.enqueue(vec![PathBuf::from("./photos")]);
//!     queue.wait_idle().await;
//!     queue.shutdown().await;
//!
//!     // Put one file back the way it was
//!     undo.restore("./photos/IMG_0001.jpg".as_ref());
//!     Ok(())
//! }
//! ```
//!
//! ## Lower-Level Usage
//!
//! The strippers can be called directly on a single file:
//!
//! ```rust,no_run
//! use exif_strip::exif::strip_jpeg;
//! use std::path::Path;
//!
//! let changed = strip_jpeg(Path::new("photo.jpg"), None)?;
//! println!("rewritten: {changed}");
//! # Ok::<(), exif_strip::error::StripError>(())
//! ```
//!
//! ## Supported Formats
//!
//! | Format | Removed |
//! |--------|---------|
//! | JPEG (`.jpg`, `.jpeg`) | APP1 segments carrying EXIF or XMP |
//! | PNG (`.png`) | `eXIf` chunks |
//!
//! ## Modules
//!
//! - [`config`]: configuration types and loading/saving
//! - [`error`]: per-file strip errors
//! - [`exif`]: streaming JPEG/PNG strippers and the capture-time reader
//! - [`paths`]: path identity, common base and display helpers
//! - [`pipeline`]: path expansion, per-file outcomes and the batch runner
//! - [`queue`]: debounced, single-flight ingest queue
//! - [`undo`]: session backups and restore

pub mod config;
pub mod error;
pub mod exif;
pub mod paths;
pub mod pipeline;
pub mod queue;
pub mod undo;
