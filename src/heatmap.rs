use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::collection::ReadingCollection;
use crate::config::ChannelSettings;
use crate::error::PlateError;
use crate::render::{CancelToken, Renderer, heatmap_frames};

#[derive(Debug, Clone)]
pub struct HeatmapOptions {
    pub directory: PathBuf,
    pub extension: String,
    pub interval: Duration,
    pub channels: ChannelSettings,
}

/// Periodic batch view: every interval the directory is scanned from
/// scratch and each reading's heatmaps are shown one after another.
pub struct HeatmapLoop {
    options: HeatmapOptions,
}

impl HeatmapLoop {
    pub fn new(options: HeatmapOptions) -> Result<Self, PlateError> {
        if !options.directory.is_dir() {
            return Err(PlateError::DirectoryMissing(options.directory));
        }
        Ok(Self { options })
    }

    /// Renders one pass over the directory. Returns the number of heatmaps
    /// shown before the pass ended or `cancel` fired.
    pub fn run_once<R: Renderer>(
        &self,
        renderer: &R,
        cancel: &CancelToken,
    ) -> Result<usize, PlateError> {
        let collection = ReadingCollection::scan(&self.options.directory, &self.options.extension)?;
        let mut shown = 0;
        for reading in collection.ordered_by_time() {
            for frame in heatmap_frames(reading, &self.options.channels) {
                if cancel.is_cancelled() {
                    return Ok(shown);
                }
                if let Err(err) = renderer.heatmap(&frame, cancel) {
                    warn!(title = %frame.title, error = %err, "heatmap not rendered");
                    continue;
                }
                shown += 1;
            }
        }
        Ok(shown)
    }

    /// Repeats [`run_once`](Self::run_once) every interval until cancelled.
    pub fn run<R: Renderer>(&self, renderer: &R, cancel: &CancelToken) -> Result<(), PlateError> {
        self.run_until(renderer, cancel, |timeout| Ok(cancel.wait(timeout)))
    }

    /// Like [`run`](Self::run), but the time between passes is spent in
    /// `idle`, which is handed the time left until the next pass and
    /// returns `true` to stop. It may be called several times per interval.
    pub fn run_until<R, F>(
        &self,
        renderer: &R,
        cancel: &CancelToken,
        mut idle: F,
    ) -> Result<(), PlateError>
    where
        R: Renderer,
        F: FnMut(Duration) -> Result<bool, PlateError>,
    {
        let mut pass = 0u64;
        loop {
            pass += 1;
            let shown = self.run_once(renderer, cancel)?;
            info!(pass, shown, "heatmap pass finished");

            // An interval past the clock's range never elapses.
            let next_pass = Instant::now().checked_add(self.options.interval);
            loop {
                if cancel.is_cancelled() {
                    info!("heatmap loop stopped");
                    return Ok(());
                }
                let remaining = match next_pass {
                    Some(at) => at.saturating_duration_since(Instant::now()),
                    None => self.options.interval,
                };
                if remaining.is_zero() {
                    break;
                }
                if idle(remaining)? {
                    cancel.cancel();
                }
            }
        }
    }
}
