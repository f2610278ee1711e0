//! Client document storage gated by tenant lifecycle state.

mod purge;
mod service;
mod types;

pub use purge::FilePurger;
pub use service::FileService;
pub use types::{StoredFile, UploadRequest, object_key};
