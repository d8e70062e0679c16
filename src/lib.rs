//! ziptab exposes ZIP archives to SQL query engines as read-only tables,
//! one row per entry:
//!
//! ```text
//! CREATE VIRTUAL TABLE t USING zipfile('foo.zip');
//! SELECT path, length, mtime FROM t WHERE path MATCH 'docs/*';
//! SELECT data FROM t WHERE path = 'docs/README';
//! ```
//!
//! A host registers everything with a single call to [`register`],
//! which also adds a handful of compression functions
//! (`crc32`, `inflate`, `deflate`, `compress`, `uncompress`).
//! The crate ships a small host of its own, good enough for tools and tests:
//!
//! ```no_run
//! # use ziptab::*;
//! # use ziptab::vtab::Column;
//! # use ziptab::host::Constraint;
//! let mut registry = Registry::new();
//! register(&mut registry)?;
//!
//! let table = registry.create_table("zipfile", "main", "t", &["'foo.zip'"])?;
//! let rows = ScanHost.select(
//!     &table,
//!     &[Column::Path, Column::Length],
//!     &[Constraint::matches(Column::Path, "docs/*")],
//!     true,
//! )?;
//! for row in &rows {
//!     println!("{} ({} bytes)", row.values[0], row.values[1]);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! The archive is memory-mapped and only its central directory is read up front.
//! Entry data is inflated when (and only when) a query asks for it,
//! and any number of cursors can read one table at once:
//!
//! ```no_run
//! # use rayon::prelude::*;
//! # use ziptab::*;
//! let archive = ZipArchive::open("foo.zip")?;
//! archive
//!     .entries()
//!     .par_iter()
//!     .try_for_each(|entry| {
//!         let data = archive.read(entry)?;
//!         println!("{}: {} bytes", archive.path_text(entry), data.len());
//!         Ok::<(), ZipError>(())
//!     })?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Only the classic ZIP format is understood: no ZIP64, no encryption,
//! no multi-disk archives, and entries are either stored or deflated.

mod arch;
pub mod compress;
pub mod extension;
pub mod host;
pub mod layout;
pub mod read;
pub mod result;
pub mod value;
pub mod vtab;

pub use extension::register;
pub use host::{Host, Registry, ScanHost};
pub use read::{CompressionMethod, DirectoryEntry, ZipArchive};
pub use result::{ZipError, ZipResult};
pub use value::Value;
pub use vtab::{ZipCursor, ZipModule, ZipTable};
