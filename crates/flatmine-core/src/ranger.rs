//! Pagination cursor: which result pages this tact crawls.
//!
//! Each run covers a `step`-sized window of page indices, resuming from a
//! small JSON cursor file and wrapping back to the first page once the
//! source's discovered upper bound is reached.

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::fetcher::Fetcher;
use crate::source::{SourceConfig, SourceParser};
use crate::Result;

#[derive(Serialize, Deserialize)]
struct Cursor {
    start: u32,
}

pub struct Ranger {
    fetcher: Arc<Fetcher>,
    parser: Arc<dyn SourceParser>,
    stop_url: &'static str,
    step: u32,
    cursor_path: PathBuf,
}

impl Ranger {
    pub fn new(
        fetcher: Arc<Fetcher>,
        parser: Arc<dyn SourceParser>,
        config: &SourceConfig,
        cursor_dir: &Path,
    ) -> Self {
        Self {
            fetcher,
            parser,
            stop_url: config.stop_url,
            step: config.step,
            cursor_path: cursor_dir.join(format!("{}-cursor.json", config.name)),
        }
    }

    /// Page window for this tact. The next start is persisted before the
    /// range is handed out, so an aborted run skips its window instead of
    /// repeating it forever.
    pub async fn range(&self) -> Result<Range<u32>> {
        let Some(stop) = self.discover_stop().await else {
            warn!("pagination bound discovery failed, falling back to the head pages");
            return Ok(1..1 + self.step);
        };
        let (range, next) = advance(self.read_cursor(), self.step, stop);
        self.write_cursor(next)?;
        debug!(start = range.start, end = range.end, stop, "picked the page window");
        Ok(range)
    }

    async fn discover_stop(&self) -> Option<u32> {
        let markup = self.fetcher.get_text(self.stop_url).await?;
        self.parser.parse_stop(&markup)
    }

    /// Missing or unreadable cursor means the head of the listing.
    fn read_cursor(&self) -> u32 {
        std::fs::read_to_string(&self.cursor_path)
            .ok()
            .and_then(|text| serde_json::from_str::<Cursor>(&text).ok())
            .map(|cursor| cursor.start)
            .unwrap_or(1)
    }

    fn write_cursor(&self, start: u32) -> Result<()> {
        std::fs::write(&self.cursor_path, serde_json::to_string(&Cursor { start })?)?;
        Ok(())
    }
}

/// Window arithmetic: clamp the end to the discovered bound, wrap the next
/// start to 1 once the step would run past it.
fn advance(start: u32, step: u32, stop: u32) -> (Range<u32>, u32) {
    let start = if start > stop { 1 } else { start };
    let range = start..(start + step).min(stop);
    let next = if start + step > stop { 1 } else { start + step };
    (range, next)
}
