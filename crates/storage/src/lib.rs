//! Image Store backed by opendal. Images live flat under one root and are addressed by
//! filename only.
mod error;
mod services;
mod traits;
mod utils;

pub use error::{StorageError, StorageResult};
pub use services::OpendalImageStore;
pub use traits::ImageStore;
pub use utils::sanitize_filename;
