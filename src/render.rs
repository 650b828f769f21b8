use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use serde::Serialize;

use crate::channel::{ClipRange, HeatChannel, PlateTable, channel_table};
use crate::collection::Snapshot;
use crate::config::ChannelSettings;
use crate::domain::{Reading, SourceIdentity};
use crate::error::PlateError;

/// Shared cancellation flag. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, signal) = &*self.inner;
        if let Ok(mut cancelled) = flag.lock() {
            *cancelled = true;
        }
        signal.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.0.lock().map(|flag| *flag).unwrap_or(true)
    }

    /// Blocks for up to `timeout`, returning early on cancellation. Returns
    /// whether the token is cancelled.
    pub fn wait(&self, timeout: Duration) -> bool {
        let (flag, signal) = &*self.inner;
        let Ok(guard) = flag.lock() else {
            return true;
        };
        match signal.wait_timeout_while(guard, timeout, |cancelled| !*cancelled) {
            Ok((guard, _)) => *guard,
            Err(_) => true,
        }
    }
}

/// One scatter input: every distinct value of `dye` in `reading`, sorted.
#[derive(Debug, Clone, Serialize)]
pub struct ScatterSeries {
    #[serde(skip)]
    pub reading: Arc<Reading>,
    pub source: SourceIdentity,
    pub label: String,
    pub dye: String,
    pub values: Vec<f64>,
}

/// One heatmap input: a plate table, its title and the range to highlight.
#[derive(Debug, Clone, Serialize)]
pub struct HeatmapFrame {
    pub title: String,
    pub channel: HeatChannel,
    pub table: PlateTable,
    pub highlight: Option<ClipRange>,
}

/// Displays prepared inputs. Implementations never mutate readings.
pub trait Renderer: Send + Sync {
    /// Shows the scatter view and keeps it up until `cancel` fires.
    fn scatter(&self, series: &[ScatterSeries], cancel: &CancelToken) -> Result<(), PlateError>;

    /// Shows one heatmap and returns once it has been dismissed or `cancel`
    /// fires. Renderers that take input may cancel the token themselves to
    /// end the whole sequence.
    fn heatmap(&self, frame: &HeatmapFrame, cancel: &CancelToken) -> Result<(), PlateError>;
}

/// Builds the scatter inputs for a snapshot, readings in time order and
/// dyes in name order.
pub fn scatter_series(snapshot: &Snapshot) -> Vec<ScatterSeries> {
    snapshot
        .readings()
        .iter()
        .flat_map(|reading| {
            reading.dye_values().iter().map(move |(dye, values)| ScatterSeries {
                reading: Arc::clone(reading),
                source: reading.identity().clone(),
                label: reading.plot_label(),
                dye: dye.clone(),
                values: values.iter().map(|value| value.value()).collect(),
            })
        })
        .collect()
}

/// Builds the five heatmaps of one reading. Channels whose source dyes are
/// missing are skipped.
pub fn heatmap_frames(reading: &Reading, settings: &ChannelSettings) -> Vec<HeatmapFrame> {
    HeatChannel::ALL
        .into_iter()
        .filter_map(|channel| {
            let table = channel_table(reading, channel, settings.bounds(channel))
                .inspect_err(|err| tracing::debug!(error = %err, "channel skipped"))
                .ok()?;
            Some(HeatmapFrame {
                title: format!("Array {} {}", reading.array_label(), channel.title()),
                channel,
                table,
                highlight: settings.highlight(channel),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Instant;

    use super::*;
    use crate::collection::ReadingCollection;
    use crate::parser::RecordParser;

    fn collection() -> ReadingCollection {
        let mut collection = ReadingCollection::new();
        for (name, content) in [
            (
                "20230615101500_X_Y_LATE.csv",
                "Dye,ROX\nA,2000,2000\n\nDye,FAM\nA,8000,12000\n\nDye,VIC\nA,4000,5000\n",
            ),
            ("20230614101500_X_Y_EARLY.csv", "Dye,ROX\nA,300,100,300\n"),
        ] {
            let identity = SourceIdentity::new(format!("/data/{name}"));
            collection.add(RecordParser::parse_content(identity, content).unwrap());
        }
        collection
    }

    #[test]
    fn scatter_series_follow_time_order() {
        let series = scatter_series(&collection().snapshot());
        let keys = series
            .iter()
            .map(|s| (s.reading.array_label().to_string(), s.dye.clone()))
            .collect::<Vec<_>>();
        assert_eq!(
            keys,
            vec![
                ("EARLY".to_string(), "ROX".to_string()),
                ("LATE".to_string(), "FAM".to_string()),
                ("LATE".to_string(), "ROX".to_string()),
                ("LATE".to_string(), "VIC".to_string()),
            ]
        );
        assert_eq!(series[0].values, vec![100.0, 300.0]);
        assert_eq!(series[0].label, "EARLY 2023-06-14");
    }

    #[test]
    fn heatmap_frames_skip_missing_dyes() {
        let collection = collection();
        let settings = ChannelSettings::default();
        let readings = collection.ordered_by_time().collect::<Vec<_>>();

        let early = heatmap_frames(readings[0], &settings);
        assert_eq!(early.len(), 1);
        assert_eq!(early[0].title, "Array EARLY ROX values");

        let late = heatmap_frames(readings[1], &settings);
        assert_eq!(late.len(), 5);
        let fam = &late[3];
        assert_eq!(fam.channel, HeatChannel::NormalizedFam);
        assert_eq!(fam.table.at('A', 1), Some(4.0));
        assert_eq!(fam.table.at('A', 2), Some(6.0));
        assert_eq!(fam.highlight, Some(ClipRange::new(4.0, 8.0)));
    }

    #[test]
    fn cancel_wakes_waiters() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let started = Instant::now();
        let handle = thread::spawn(move || waiter.wait(Duration::from_secs(30)));
        thread::sleep(Duration::from_millis(20));
        token.cancel();

        assert!(handle.join().unwrap());
        assert!(started.elapsed() < Duration::from_secs(30));
        assert!(token.is_cancelled());
    }

    #[test]
    fn wait_times_out_uncancelled() {
        let token = CancelToken::new();
        assert!(!token.wait(Duration::from_millis(5)));
        assert!(!token.is_cancelled());
    }
}
