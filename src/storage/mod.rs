//! Content storage: payload acquisition and publisher uploads

pub mod payload;
pub mod publisher;

pub use payload::{ImageChoice, ImageMode, PayloadLoader, PayloadSource};
pub use publisher::{
    BlobId, BlobStore, BlobUploader, HttpPublisher, PublisherResponse, PublisherTransport,
    StoredBlob, UploadPolicy,
};
