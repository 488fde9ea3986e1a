pub mod model;
pub mod s3;

pub use model::{ColonyFile, FileReference, S3Object, Snapshot};
pub use s3::{ObjectStorage, S3Driver};
