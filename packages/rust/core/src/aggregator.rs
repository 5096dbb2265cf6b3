//! Summary statistics over stage outputs.

use docpipe_shared::{AggregatedResult, FetchOutput, TransformOutput};

/// Combine stage 1 and stage 2 outputs into the run summary.
///
/// `doc_files` is a plain subtraction: inconsistent inputs surface as a
/// negative count instead of being clamped.
pub fn aggregate(fetch: &FetchOutput, transform: &TransformOutput) -> AggregatedResult {
    let total_files = fetch.downloaded_files;
    let api_files = transform.valid_files;
    AggregatedResult {
        total_files,
        api_files,
        doc_files: total_files - api_files,
    }
}
