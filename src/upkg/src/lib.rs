//! # upkg
//!
//! Reader for Unreal Engine packages from the first engine generation to
//! the fourth, including the dialects of many licensed titles.
//!
//! This library provides functionality to:
//! - Attribute a package to a game from its version stamps
//! - Mount `.pak` and `.obb` containers, decrypting and decompressing entries
//! - Parse package summaries, name, import and export tables
//! - Materialize objects and decode their tagged properties against a
//!   [`TypeRegistry`]
//!
//! ## Example
//!
//! ```no_run
//! use upkg::{FileCatalog, Loader, TypeRegistry};
//!
//! # fn main() -> upkg::Result<()> {
//! let mut files = FileCatalog::new();
//! files.register_dir("Game/CookedPC")?;
//!
//! let loader = Loader::new(TypeRegistry::with_builtins(), files);
//! if let Some(package) = loader.load_package("Startup")? {
//!     loader.load_all(&package);
//! }
//! loader.objects_of_class("Object", |object| {
//!     println!("{}", object.borrow().full_name());
//! });
//! println!("{}", loader.stats().summary());
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod bulk;
pub mod chunked;
pub mod compression;
pub mod config;
pub mod crypto;
pub mod error;
pub mod game;
pub mod object;
pub mod package;
pub mod property;
pub mod stats;
pub mod vfs;

#[doc(inline)]
pub use archive::{Archive, ArchiveVersion, ArchiveWriter, FileReader, Guid, MemReader};
#[doc(inline)]
pub use bulk::BulkData;
#[doc(inline)]
pub use compression::Method;
#[doc(inline)]
pub use config::{Config, Settings};
#[doc(inline)]
pub use error::{Error, ErrorKind, Result, ResultExt};
#[doc(inline)]
pub use game::{detect_game, override_version, set_forced_game, set_forced_version, Engine, Game, GameCatalog};
#[doc(inline)]
pub use crypto::set_aes_key;
#[doc(inline)]
pub use object::{Object, ObjectHandle, ObjectRef, PropertyBag, Value};
#[doc(inline)]
pub use package::{Loader, Package, PackageSummary};
#[doc(inline)]
pub use property::{FieldType, PropertyDecoder, PropertyDescriptor, TypeDescriptor, TypeRegistry};
#[doc(inline)]
pub use stats::{RunStats, RunSummary};
#[doc(inline)]
pub use vfs::{FileCatalog, Vfs};
