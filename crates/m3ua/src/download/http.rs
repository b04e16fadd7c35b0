use std::path::Path;

use tokio::io::AsyncWriteExt;

use super::SegmentDownloader;
use crate::{error::M3uaResult, fetch::Fetcher};

/// Download segments in-process through a [Fetcher].
pub struct HttpDownloader<F> {
    fetcher: F,
}

impl<F> HttpDownloader<F> {
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }
}

impl<F> SegmentDownloader for HttpDownloader<F>
where
    F: Fetcher + Send + Sync,
{
    async fn download(&self, url: &str, dest: &Path) -> M3uaResult<()> {
        let bytes = self.fetcher.fetch_resource(url).await?;

        let mut file = tokio::fs::File::create(dest).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        Ok(())
    }
}
