mod opendal_store;

pub use opendal_store::OpendalImageStore;
