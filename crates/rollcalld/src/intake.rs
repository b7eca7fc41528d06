//! Frame intake: one JSON object per line from the recognition pipeline.
//!
//! ```text
//! {"faces":[{"label":"Bob","distance":30.0}]}
//! {"faces":[]}
//! ```

use crate::engine::{EngineError, EngineHandle};
use rollcall_core::FaceObservation;
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Classifier output for one processed frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FrameReport {
    /// Empty when no face was detected.
    #[serde(default)]
    pub faces: Vec<FaceObservation>,
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse_frame_line(line: &str) -> Result<Option<FrameReport>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line).map(Some)
}

/// Forward every frame from `reader` to the engine until EOF.
///
/// Malformed lines are logged and skipped. Returns the number of frames submitted.
pub async fn pump<R>(reader: R, engine: &EngineHandle) -> Result<u64, EngineError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut line_no = 0u64;
    let mut submitted = 0u64;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        match parse_frame_line(&line) {
            Ok(Some(frame)) => {
                engine.submit_frame(frame.faces).await?;
                submitted += 1;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(line = line_no, error = %e, "skipping malformed frame report");
            }
        }
    }

    tracing::info!(frames = submitted, "frame input closed");
    Ok(submitted)
}
