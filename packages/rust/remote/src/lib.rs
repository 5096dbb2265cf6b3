//! Client side of the remote processing service.
//!
//! The pipeline core only sees the [`RemoteProcessingService`] trait. The
//! production implementation, [`HttpProcessingService`], talks JSON over HTTP
//! to the harvesting service: `POST /api/stage1..3` for the three stages,
//! plus status, reset and artifact download routes used by the CLI.

mod http;

use async_trait::async_trait;
use docpipe_shared::{Artifacts, FetchOutput, MergeOutput, RemoteFailure, TransformOutput};
use url::Url;

pub use http::{HttpProcessingService, RemoteStatus};

/// The three remote operations a pipeline run drives, in order.
///
/// Implementations own their own timeouts; the orchestrator never cancels a
/// call once issued.
#[async_trait]
pub trait RemoteProcessingService: Send + Sync {
    /// Stage 1: download the raw source material behind `source`.
    async fn fetch_sources(&self, source: &Url) -> Result<FetchOutput, RemoteFailure>;

    /// Stage 2: clean the downloaded material and convert it.
    async fn transform(&self) -> Result<TransformOutput, RemoteFailure>;

    /// Stage 3: merge the converted output into the final dataset.
    async fn merge(&self) -> Result<MergeOutput, RemoteFailure>;

    /// Where the final artifacts can be downloaded once stage 3 succeeds.
    fn artifacts(&self) -> Artifacts;
}
