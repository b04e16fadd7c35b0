pub mod assemble;
pub mod download;
pub mod error;
pub mod fetch;
pub mod key;
pub mod pipeline;
pub mod playlist;
pub mod tool;
pub mod util;

pub use error::{M3uaError, M3uaResult};
pub use pipeline::{Pipeline, PipelineConfig, PipelineState};

/// ┌──────────────┐  parse   ┌──────────────┐  key   ┌──────────────┐
/// │   Playlist   ├──────────►   Segments   ├────────►  KeyMaterial │
/// └──────────────┘          └──────┬───────┘        └──────┬───────┘
///                                  │                       │
///                    ┌─────────────▼─────────────┐         │
///                    │    ParallelDownloader     │         │
///                    │  segment 0 ... segment N  │         │
///                    └─────────────┬─────────────┘         │
///                                  │ SegmentSet (ordered)  │
///                    ┌─────────────▼─────────────┐         │
///                    │       MediaAssembler      ◄─────────┘
///                    │ concat ► decrypt ► transcode
///                    └─────────────┬─────────────┘
///                                  ▼
///                               output
pub mod prelude {
    pub use crate::assemble::{DecryptParams, MediaAssembler};
    pub use crate::download::{ProgressSink, SegmentDownloader};
    pub use crate::fetch::{Fetcher, HttpFetcher};
    pub use crate::tool::{ToolChoice, ToolConfig};
    pub use crate::{M3uaError, M3uaResult, Pipeline, PipelineConfig, PipelineState};
}
