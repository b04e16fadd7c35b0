mod external;
mod http;
mod parallel;

pub use external::ExternalDownloader;
pub use http::HttpDownloader;
pub use parallel::*;

use std::{collections::BTreeMap, future::Future, path::Path, path::PathBuf};

use crate::{
    error::{M3uaError, M3uaResult},
    fetch::Fetcher,
    tool::ResolvedTool,
};

/// Fetch one segment into a local file.
pub trait SegmentDownloader {
    /// Download `url` and store its body at `dest`.
    ///
    /// `dest` does not exist when this is called. Implementations must not
    /// touch any other path.
    fn download(&self, url: &str, dest: &Path) -> impl Future<Output = M3uaResult<()>> + Send;
}

impl<D> SegmentDownloader for std::sync::Arc<D>
where
    D: SegmentDownloader + Send + Sync,
{
    fn download(&self, url: &str, dest: &Path) -> impl Future<Output = M3uaResult<()>> + Send {
        self.as_ref().download(url, dest)
    }
}

/// Downloader selected from a [ResolvedTool].
pub enum AnyDownloader<F> {
    External(ExternalDownloader),
    Builtin(HttpDownloader<F>),
}

impl<F> AnyDownloader<F> {
    pub fn new(tool: ResolvedTool, fetcher: F, extra_args: Vec<String>) -> Self {
        match tool {
            ResolvedTool::External(tool) => {
                Self::External(ExternalDownloader::new(tool).with_args(extra_args))
            }
            ResolvedTool::Builtin => Self::Builtin(HttpDownloader::new(fetcher)),
        }
    }
}

impl<F> SegmentDownloader for AnyDownloader<F>
where
    F: Fetcher + Send + Sync,
{
    async fn download(&self, url: &str, dest: &Path) -> M3uaResult<()> {
        match self {
            Self::External(downloader) => downloader.download(url, dest).await,
            Self::Builtin(downloader) => downloader.download(url, dest).await,
        }
    }
}

/// Downloaded segments, keyed by their index in the playlist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentSet {
    total: usize,
    paths: BTreeMap<usize, PathBuf>,
}

impl SegmentSet {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            paths: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, index: usize, path: PathBuf) {
        debug_assert!(index < self.total);
        self.paths.insert(index, path);
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Every index in `0..total` has a file.
    pub fn is_complete(&self) -> bool {
        self.paths.len() == self.total && self.paths.keys().copied().eq(0..self.total)
    }

    /// Paths in playlist order. Fails unless the set is complete.
    pub fn into_ordered(self) -> M3uaResult<Vec<PathBuf>> {
        if !self.is_complete() {
            let missing = (0..self.total)
                .find(|i| !self.paths.contains_key(i))
                .unwrap_or(self.total);
            return Err(M3uaError::MissingSegment(missing));
        }
        Ok(self.paths.into_values().collect())
    }
}

/// Receives download progress. Purely informational.
pub trait ProgressSink: Send + Sync {
    fn started(&self, total: usize, concurrency: u32);

    fn segment_finished(&self, file_name: &str, finished: usize, total: usize);

    fn segment_failed(&self, file_name: &str, error: &M3uaError);

    fn finished(&self, total: usize);
}

/// [ProgressSink] writing to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn started(&self, total: usize, concurrency: u32) {
        tracing::info!("Download started: Downloading {total} items with {concurrency} thread(s).");
    }

    fn segment_finished(&self, file_name: &str, finished: usize, total: usize) {
        let percentage = if total == 0 {
            0.
        } else {
            finished as f32 / total as f32 * 100.
        };
        tracing::info!("Processing {file_name} finished. ({finished} / {total} or {percentage:.2}%)");
    }

    fn segment_failed(&self, file_name: &str, error: &M3uaError) {
        tracing::error!("Processing {file_name} failed, max retries exceed, drop. {error}");
    }

    fn finished(&self, total: usize) {
        tracing::info!("Download completed: Downloaded {total} items");
    }
}
