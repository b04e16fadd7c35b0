use std::{
    num::NonZeroU32,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use tokio::{sync::Semaphore, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{instrument::WithSubscriber, Instrument};

use super::{LogProgress, ProgressSink, SegmentDownloader, SegmentSet};
use crate::{
    error::{M3uaError, M3uaResult},
    fetch::resolve_url,
    util::path::segment_file_name,
};

pub const DEFAULT_CONCURRENCY: NonZeroU32 = match NonZeroU32::new(8) {
    Some(concurrency) => concurrency,
    None => unreachable!(),
};

/// Downloads all segments of a playlist with a bounded number of workers.
///
/// Workers finish in any order; the returned [SegmentSet] is keyed by playlist
/// index so the order never depends on completion time. The first segment
/// that fails after its retries stops the dispatch of new segments and
/// cancels the ones in flight.
pub struct ParallelDownloader<D> {
    downloader: Arc<D>,
    concurrency: NonZeroU32,
    retries: u32,
    progress: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
}

impl<D> ParallelDownloader<D>
where
    D: SegmentDownloader + Send + Sync + 'static,
{
    pub fn new(downloader: D) -> Self {
        ParallelDownloaderBuilder::new().build(downloader)
    }

    /// Download `segments` (addressed as `prefix + uri`) into `out_dir`.
    pub async fn download_all(
        &self,
        segments: &[String],
        prefix: &str,
        out_dir: &Path,
    ) -> M3uaResult<SegmentSet> {
        let total = segments.len();
        tokio::fs::create_dir_all(out_dir).await?;
        self.progress.started(total, self.concurrency.get());

        let permits = Arc::new(Semaphore::new(self.concurrency.get() as usize));
        let finished = Arc::new(AtomicUsize::new(0));
        let abort = self.cancel.child_token();
        let mut tasks = JoinSet::new();

        for (index, uri) in segments.iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = abort.cancelled() => break,
                permit = permits.clone().acquire_owned() => permit.map_err(|_| M3uaError::Cancelled)?,
            };

            let url = resolve_url(prefix, uri);
            let file_name = segment_file_name(index, uri);
            let dest = out_dir.join(&file_name);

            let downloader = self.downloader.clone();
            let progress = self.progress.clone();
            let finished = finished.clone();
            let abort = abort.clone();
            let retries = self.retries;

            let task = async move {
                // Workaround for `higher-ranked lifetime error`
                let result = assert_send(download_segment(
                    downloader.as_ref(),
                    &url,
                    &dest,
                    &file_name,
                    retries,
                    &abort,
                ))
                .await;

                // semaphore is only used to limit download concurrency, so drop it directly after fetching
                drop(permit);

                match result {
                    Ok(()) => {
                        let finished = finished.fetch_add(1, Ordering::Relaxed) + 1;
                        progress.segment_finished(&file_name, finished, total);
                        Ok((index, dest))
                    }
                    Err(e) => {
                        if !matches!(e, M3uaError::Cancelled) {
                            progress.segment_failed(&file_name, &e);
                            abort.cancel();
                        }
                        Err((index, url, e))
                    }
                }
            };
            tasks.spawn(task.in_current_span().with_current_subscriber());
        }

        let mut set = SegmentSet::new(total);
        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok((index, path))) => set.insert(index, path),
                Ok(Err(failure)) => failures.push(failure),
                Err(e) => {
                    abort.cancel();
                    failures.push((total, String::new(), M3uaError::IOError(e.into())));
                }
            }
        }

        if let Some((index, url, error)) = first_failure(failures) {
            if matches!(error, M3uaError::Cancelled) {
                return Err(M3uaError::Cancelled);
            }
            tracing::error!(
                "Failed to download {} of {total} segments.",
                total - set.len()
            );
            return Err(M3uaError::SegmentFailed {
                index,
                url,
                source: Box::new(error),
            });
        }
        if !set.is_complete() {
            // cancelled from outside before every segment was dispatched
            return Err(M3uaError::Cancelled);
        }

        self.progress.finished(total);
        Ok(set)
    }
}

async fn download_segment<D>(
    downloader: &D,
    url: &str,
    dest: &Path,
    file_name: &str,
    mut retries: u32,
    abort: &CancellationToken,
) -> M3uaResult<()>
where
    D: SegmentDownloader,
{
    loop {
        let result = tokio::select! {
            biased;
            _ = abort.cancelled() => Err(M3uaError::Cancelled),
            result = downloader.download(url, dest) => result,
        };

        if result.is_err() {
            remove_partial(dest).await;
        }
        match result {
            Ok(()) => return Ok(()),
            Err(M3uaError::Cancelled) => return Err(M3uaError::Cancelled),
            Err(e) if retries > 0 => {
                retries -= 1;
                tracing::warn!("Processing {file_name} failed, retry later. {e}");
            }
            Err(e) => return Err(e),
        }
    }
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Failed to remove {}: {e}", path.display());
        }
    }
}

/// Lowest failed index, preferring real failures over cancellations they caused.
fn first_failure(
    mut failures: Vec<(usize, String, M3uaError)>,
) -> Option<(usize, String, M3uaError)> {
    failures.sort_by_key(|(index, _, error)| (matches!(error, M3uaError::Cancelled), *index));
    failures.into_iter().next()
}

// https://github.com/rust-lang/rust/issues/102211#issuecomment-1371414544
// TODO: remove this when this issue is fixed
fn assert_send<'a, T>(
    fut: impl std::future::Future<Output = T> + Send + 'a,
) -> impl std::future::Future<Output = T> + Send + 'a {
    fut
}

pub struct ParallelDownloaderBuilder {
    concurrency: NonZeroU32,
    retries: u32,
    progress: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
}

impl ParallelDownloaderBuilder {
    pub fn new() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            retries: 0,
            progress: Arc::new(LogProgress),
            cancel: CancellationToken::new(),
        }
    }

    pub fn concurrency(mut self, concurrency: NonZeroU32) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Stop dispatching and cancel running downloads when `cancel` fires.
    pub fn cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn build<D>(self, downloader: D) -> ParallelDownloader<D>
    where
        D: SegmentDownloader + Send + Sync + 'static,
    {
        ParallelDownloader {
            downloader: Arc::new(downloader),
            concurrency: self.concurrency,
            retries: self.retries,
            progress: self.progress,
            cancel: self.cancel,
        }
    }
}

impl Default for ParallelDownloaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}
