use std::{num::NonZeroU32, path::PathBuf, str::FromStr, time::Duration};

use anyhow::Context;
use clap::Parser;
use fake_user_agent::get_chrome_rua;
use m3ua::{
    fetch::HttpFetcher,
    tool::{ToolChoice, ToolConfig},
    Pipeline, PipelineConfig,
};
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Client,
};
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing_subscriber::filter::LevelFilter;

#[derive(Parser, Debug, Clone)]
#[clap(name = "m3ua", about)]
struct M3uaArgs {
    /// URL of the M3U8 playlist
    url: String,

    /// Prepended to every relative uri in the playlist
    #[clap(short, long)]
    prefix: String,

    /// Output file path
    #[clap(short, long, default_value = "./mp4/out.mp4")]
    output: PathBuf,

    /// Directory for segments and intermediate files
    ///
    /// Defaults to the directory of the output file.
    #[clap(long, env = "M3UA_WORK_DIR")]
    work_dir: Option<PathBuf>,

    #[clap(flatten)]
    tools: ToolOptions,

    #[clap(flatten)]
    download: DownloadOptions,

    #[clap(flatten)]
    http: HttpOptions,

    /// Remove segments and intermediate files after success
    #[clap(long)]
    clean: bool,

    /// Debug output
    #[clap(short = 'V', long, alias = "debug")]
    verbose: bool,
}

#[derive(clap::Args, Debug, Clone)]
struct ToolOptions {
    /// Segment downloader, `builtin` to download in-process
    #[clap(long, default_value = "aria2c")]
    download_tool: ToolChoice,

    /// Segment concatenation tool, `builtin` to concatenate in-process
    #[clap(long, default_value = "cat")]
    concat_tool: ToolChoice,

    /// Decryption tool, `builtin` to decrypt in-process
    #[clap(long, default_value = "openssl")]
    decrypt_tool: ToolChoice,

    /// Transcoding tool, `builtin` to copy the stream as is
    #[clap(long, default_value = "ffmpeg")]
    transcode_tool: ToolChoice,
}

impl ToolOptions {
    fn into_config(self) -> ToolConfig {
        ToolConfig {
            download: self.download_tool,
            concat: self.concat_tool,
            decrypt: self.decrypt_tool,
            transcode: self.transcode_tool,
        }
    }
}

#[derive(clap::Args, Debug, Clone)]
struct DownloadOptions {
    /// Threads limit
    #[clap(long, default_value = "8")]
    threads: NonZeroU32,

    /// Retry limit of a single segment
    #[clap(long, default_value = "3")]
    segment_retries: u32,

    /// Retry limit of the playlist and key requests
    #[clap(long, default_value = "3")]
    manifest_retries: u32,

    /// Fetch the key from this URL instead of the one in the playlist
    #[clap(short = 'K', long)]
    key_url: Option<String>,

    /// Extra arguments passed to the download tool, e.g. "--max-tries=5"
    #[clap(long, allow_hyphen_values = true)]
    download_args: Option<String>,
}

impl DownloadOptions {
    fn download_args(&self) -> anyhow::Result<Vec<String>> {
        match &self.download_args {
            Some(args) => shlex::split(args)
                .with_context(|| format!("Invalid download arguments: {args}")),
            None => Ok(Vec::new()),
        }
    }
}

#[derive(clap::Args, Debug, Clone)]
struct HttpOptions {
    /// Additional HTTP headers, e.g. "Referer: https://example.com"
    #[clap(short = 'H', long = "header")]
    headers: Vec<String>,

    /// HTTP timeout, in seconds
    #[clap(short, long, default_value = "10")]
    timeout: u64,
}

impl HttpOptions {
    fn into_client(self) -> anyhow::Result<Client> {
        let mut headers = HeaderMap::new();

        for header in &self.headers {
            let (key, value) = header
                .split_once(':')
                .with_context(|| format!("Invalid header: {header}"))?;
            headers.insert(
                HeaderName::from_str(key.trim()).context("Invalid header name")?,
                HeaderValue::from_str(value.trim()).context("Invalid header value")?,
            );
        }

        Ok(Client::builder()
            .default_headers(headers)
            .user_agent(get_chrome_rua())
            .timeout(Duration::from_secs(self.timeout))
            .build()?)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = M3uaArgs::parse();

    let level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    let download_args = args.download.download_args()?;
    let fetcher = HttpFetcher::new(args.http.into_client()?)
        .with_retries(args.download.manifest_retries);

    let config = PipelineConfig::new(args.url, args.prefix)
        .with_output(args.output)
        .with_work_dir(args.work_dir)
        .with_tools(args.tools.into_config())
        .with_concurrency(args.download.threads)
        .with_segment_retries(args.download.segment_retries)
        .with_key_url(args.download.key_url)
        .with_download_args(download_args)
        .with_clean_up(args.clean);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    let mut pipeline = Pipeline::new(config, fetcher).with_cancellation(cancel);
    let output = pipeline.run().with_subscriber(subscriber).await?;
    println!("{}", output.display());

    Ok(())
}
