pub mod area;
pub mod config;
pub mod error;
pub mod flash;
pub mod format;
pub mod fs;
pub mod id;
pub mod index;
pub mod object;
pub mod restore;

pub use area::{Area, AreaDesc};
pub use config::RestoreConfig;
pub use error::{FsError, Result};
pub use flash::{FileFlash, Flash, FlashError, MemFlash};
pub use format::format_full;
pub use fs::{DirEntry, FileSystem, FsSummary};
pub use index::{EntrySummary, Handle};
pub use restore::restore;
