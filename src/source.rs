//! Byte acquisition seam.
//!
//! Fetching, uploading and upstream processing live outside this crate. They
//! report one of three outcomes; only [`FetchOutcome::Bytes`] is ever decoded.

use std::future::Future;
use std::path::PathBuf;

use log::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Bytes(Vec<u8>),
    /// Upstream has not finished processing the scan yet.
    Processing { message: String },
    /// Upstream processing failed.
    Failed { message: String },
}

impl FetchOutcome {
    pub fn processing(message: impl Into<String>) -> Self {
        Self::Processing {
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

pub trait ByteSource {
    fn fetch(&mut self) -> impl Future<Output = FetchOutcome> + Send;
}

/// Reads a `.nii` / `.nii.gz` file from disk.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ByteSource for FileSource {
    async fn fetch(&mut self) -> FetchOutcome {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => FetchOutcome::Bytes(bytes),
            Err(err) => {
                warn!("could not read {}: {err}", self.path.display());
                FetchOutcome::failed(format!("could not read {}: {err}", self.path.display()))
            }
        }
    }
}

/// Hands out a fixed outcome, e.g. bytes that already arrived over the network.
#[derive(Debug, Clone)]
pub struct MemorySource {
    outcome: FetchOutcome,
}

impl MemorySource {
    pub fn new(outcome: FetchOutcome) -> Self {
        Self { outcome }
    }
}

impl ByteSource for MemorySource {
    async fn fetch(&mut self) -> FetchOutcome {
        self.outcome.clone()
    }
}
