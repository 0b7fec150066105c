//! Artifact persistence: every generated image lands on disk as an image
//! file plus a JSON sidecar sharing its basename, optionally mirrored to S3.

mod artifact;
mod s3;

pub use artifact::{ArtifactMetadata, ArtifactRecord, ArtifactStore};
