use std::{
    fmt,
    num::NonZeroU32,
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{
    assemble::{DecryptParams, MediaAssembler},
    download::{
        AnyDownloader, LogProgress, ParallelDownloaderBuilder, ProgressSink, DEFAULT_CONCURRENCY,
    },
    error::{M3uaError, M3uaResult},
    fetch::Fetcher,
    key::KeyResolver,
    playlist,
    tool::{ToolConfig, ToolSet},
};

/// Settings of a single run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub playlist_url: String,
    /// Prepended to every relative uri in the playlist.
    pub prefix: String,
    pub output: PathBuf,
    /// Where segments and intermediate streams are written. Defaults to the
    /// directory of `output`.
    pub work_dir: Option<PathBuf>,
    pub tools: ToolConfig,
    pub concurrency: NonZeroU32,
    pub segment_retries: u32,
    /// Fetch the key from here instead of `prefix + uri`.
    pub key_url: Option<String>,
    /// Extra arguments for the external download tool.
    pub download_args: Vec<String>,
    /// Remove segments and intermediate streams after success.
    pub clean_up: bool,
}

impl PipelineConfig {
    pub fn new(playlist_url: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            playlist_url: playlist_url.into(),
            prefix: prefix.into(),
            output: PathBuf::from("./mp4/out.mp4"),
            work_dir: None,
            tools: ToolConfig::default(),
            concurrency: DEFAULT_CONCURRENCY,
            segment_retries: 3,
            key_url: None,
            download_args: Vec::new(),
            clean_up: false,
        }
    }

    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = output.into();
        self
    }

    pub fn with_work_dir(mut self, work_dir: Option<PathBuf>) -> Self {
        self.work_dir = work_dir;
        self
    }

    pub fn with_tools(mut self, tools: ToolConfig) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_concurrency(mut self, concurrency: NonZeroU32) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_segment_retries(mut self, retries: u32) -> Self {
        self.segment_retries = retries;
        self
    }

    pub fn with_key_url(mut self, key_url: Option<String>) -> Self {
        self.key_url = key_url;
        self
    }

    pub fn with_download_args(mut self, args: Vec<String>) -> Self {
        self.download_args = args;
        self
    }

    pub fn with_clean_up(mut self, clean_up: bool) -> Self {
        self.clean_up = clean_up;
        self
    }

    pub fn work_dir(&self) -> PathBuf {
        match &self.work_dir {
            Some(dir) => dir.clone(),
            None => match self.output.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    PlaylistFetched,
    PlaylistParsed,
    KeyResolved,
    Downloading,
    Downloaded,
    Assembling,
    Done,
    Failed {
        from: Box<PipelineState>,
        reason: String,
    },
}

impl PipelineState {
    /// The only state reachable from `self` on success.
    pub fn next(&self) -> Option<PipelineState> {
        Some(match self {
            Self::Init => Self::PlaylistFetched,
            Self::PlaylistFetched => Self::PlaylistParsed,
            Self::PlaylistParsed => Self::KeyResolved,
            Self::KeyResolved => Self::Downloading,
            Self::Downloading => Self::Downloaded,
            Self::Downloaded => Self::Assembling,
            Self::Assembling => Self::Done,
            Self::Done | Self::Failed { .. } => return None,
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed { .. })
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => f.write_str("init"),
            Self::PlaylistFetched => f.write_str("playlist fetched"),
            Self::PlaylistParsed => f.write_str("playlist parsed"),
            Self::KeyResolved => f.write_str("key resolved"),
            Self::Downloading => f.write_str("downloading"),
            Self::Downloaded => f.write_str("downloaded"),
            Self::Assembling => f.write_str("assembling"),
            Self::Done => f.write_str("done"),
            Self::Failed { from, reason } => write!(f, "failed while {from}: {reason}"),
        }
    }
}

/// Runs fetch → parse → tool check → key → download → assemble.
///
/// Every external tool the run needs is checked right after parsing, so a
/// missing tool aborts before the key or any segment is fetched.
pub struct Pipeline<F> {
    config: PipelineConfig,
    fetcher: Arc<F>,
    progress: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
    state: PipelineState,
    history: Vec<PipelineState>,
}

impl<F> Pipeline<F>
where
    F: Fetcher + Send + Sync + 'static,
{
    pub fn new(config: PipelineConfig, fetcher: F) -> Self {
        Self {
            config,
            fetcher: Arc::new(fetcher),
            progress: Arc::new(LogProgress),
            cancel: CancellationToken::new(),
            state: PipelineState::Init,
            history: vec![PipelineState::Init],
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// Every state this pipeline went through, starting with [PipelineState::Init].
    pub fn history(&self) -> &[PipelineState] {
        &self.history
    }

    /// Run the whole pipeline and return the path of the final file.
    pub async fn run(&mut self) -> M3uaResult<PathBuf> {
        self.state = PipelineState::Init;
        self.history = vec![PipelineState::Init];

        match self.run_stages().await {
            Ok(output) => Ok(output),
            Err(e) => {
                tracing::error!("abort: {e}");
                let from = Box::new(self.state.clone());
                self.set_state(PipelineState::Failed {
                    from,
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run_stages(&mut self) -> M3uaResult<PathBuf> {
        let config = self.config.clone();

        let document = self
            .fetcher
            .fetch_playlist(&config.playlist_url)
            .instrument(tracing::info_span!("fetch"))
            .await?;
        self.advance(PipelineState::PlaylistFetched);

        let playlist = playlist::parse(&document)?;
        if playlist.segments.is_empty() {
            return Err(M3uaError::MalformedPlaylist(
                "playlist contains no segments".to_string(),
            ));
        }
        if let Some(encryption) = &playlist.encryption {
            encryption.validate()?;
        }
        tracing::debug!(
            "M3U8 parsed: {} segments, encrypted: {}",
            playlist.segments.len(),
            playlist.is_encrypted()
        );
        self.advance(PipelineState::PlaylistParsed);

        let tools = ToolSet::resolve(
            &config.tools,
            playlist.segments.len(),
            playlist.is_encrypted(),
        )?;

        let key = KeyResolver::new(self.fetcher.clone())
            .with_key_url(config.key_url.clone())
            .resolve(playlist.encryption.as_ref(), &config.prefix)
            .instrument(tracing::info_span!("key"))
            .await?;
        let decryption = match (key, &playlist.encryption) {
            (Some(key), Some(encryption)) => Some(DecryptParams::new(
                key,
                encryption,
                playlist.media_sequence,
            )),
            _ => None,
        };
        self.advance(PipelineState::KeyResolved);

        self.advance(PipelineState::Downloading);
        let work_dir = config.work_dir();
        let downloader = AnyDownloader::new(
            tools.download.clone(),
            self.fetcher.clone(),
            config.download_args.clone(),
        );
        let segments = ParallelDownloaderBuilder::new()
            .concurrency(config.concurrency)
            .retries(config.segment_retries)
            .progress(self.progress.clone())
            .cancellation(self.cancel.clone())
            .build(downloader)
            .download_all(&playlist.segments, &config.prefix, &work_dir)
            .instrument(tracing::info_span!("download"))
            .await?;
        let files = segments.into_ordered()?;
        self.advance(PipelineState::Downloaded);

        self.advance(PipelineState::Assembling);
        let output = MediaAssembler::from_tools(&tools)
            .with_clean_up(config.clean_up)
            .assemble(&files, &config.output, decryption.as_ref())
            .instrument(tracing::info_span!("assemble"))
            .await?;

        if config.clean_up {
            remove_segments(&files, &output).await;
        }

        self.advance(PipelineState::Done);
        Ok(output)
    }

    fn advance(&mut self, next: PipelineState) {
        debug_assert_eq!(self.state.next().as_ref(), Some(&next));
        tracing::debug!("Pipeline: {} -> {next}", self.state);
        self.set_state(next);
    }

    fn set_state(&mut self, state: PipelineState) {
        self.history.push(state.clone());
        self.state = state;
    }
}

async fn remove_segments(files: &[PathBuf], output: &Path) {
    tracing::info!("Starting cleaning temporary files.");
    for file in files.iter().filter(|file| file.as_path() != output) {
        if let Err(e) = tokio::fs::remove_file(file).await {
            tracing::warn!("Failed to remove {}: {e}", file.display());
        }
    }
}
