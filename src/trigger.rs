use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::collection::Snapshot;
use crate::error::PlateError;
use crate::render::{CancelToken, Renderer, scatter_series};

/// How long a cancelled render gets to return before it is left behind.
pub const STOP_GRACE: Duration = Duration::from_millis(200);
/// Longer allowance used when the trigger itself shuts down.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

struct RenderJob {
    id: u64,
    cancel: CancelToken,
    finished: CancelToken,
    handle: JoinHandle<Result<(), PlateError>>,
}

/// Marks the job finished when the worker returns or unwinds.
struct FinishGuard(CancelToken);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

impl RenderJob {
    /// Cancels the worker and waits up to `grace` for it to return. A worker
    /// still running after that is detached and reported.
    fn stop(self, grace: Duration) -> Result<(), PlateError> {
        self.cancel.cancel();
        if !self.finished.wait(grace) {
            return Err(PlateError::RenderDispatch(format!(
                "render worker {} ignored cancellation, left running",
                self.id
            )));
        }
        match self.handle.join() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                warn!(render = self.id, error = %err, "render worker failed");
                Ok(())
            }
            Err(_) => Err(PlateError::RenderDispatch(format!(
                "render worker {} panicked",
                self.id
            ))),
        }
    }
}

/// Keeps exactly one scatter render alive, bound to the latest snapshot.
pub struct RenderTrigger<R: Renderer + 'static> {
    renderer: Arc<R>,
    active: Option<RenderJob>,
    dispatched: u64,
}

impl<R: Renderer + 'static> RenderTrigger<R> {
    pub fn new(renderer: Arc<R>) -> Self {
        Self {
            renderer,
            active: None,
            dispatched: 0,
        }
    }

    /// Replaces the running render with one for `snapshot`. The caller is
    /// held for at most [`STOP_GRACE`]. Failures are logged; a fresh render
    /// is attempted regardless.
    pub fn refresh(&mut self, snapshot: Snapshot) {
        if let Some(job) = self.active.take() {
            if let Err(err) = job.stop(STOP_GRACE) {
                warn!(error = %err, "previous render could not be stopped");
            }
        }

        match self.spawn(snapshot) {
            Ok(job) => self.active = Some(job),
            Err(err) => warn!(error = %err, "render not started"),
        }
    }

    /// Number of renders started so far.
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    pub fn is_rendering(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|job| !job.handle.is_finished())
    }

    /// Cancels the active render, if any, and waits up to
    /// [`SHUTDOWN_GRACE`] for it.
    pub fn shutdown(&mut self) {
        if let Some(job) = self.active.take() {
            if let Err(err) = job.stop(SHUTDOWN_GRACE) {
                warn!(error = %err, "render worker left behind on shutdown");
            }
        }
    }

    fn spawn(&mut self, snapshot: Snapshot) -> Result<RenderJob, PlateError> {
        let id = self.dispatched + 1;
        let cancel = CancelToken::new();
        let renderer = Arc::clone(&self.renderer);
        let worker_cancel = cancel.clone();
        let finished = CancelToken::new();
        let guard = FinishGuard(finished.clone());

        let handle = thread::Builder::new()
            .name(format!("render-{id}"))
            .spawn(move || {
                let _guard = guard;
                let series = scatter_series(&snapshot);
                renderer.scatter(&series, &worker_cancel)
            })
            .map_err(|err| PlateError::RenderDispatch(err.to_string()))?;

        self.dispatched = id;
        debug!(render = id, "render started");
        Ok(RenderJob {
            id,
            cancel,
            finished,
            handle,
        })
    }
}

impl<R: Renderer + 'static> Drop for RenderTrigger<R> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::collection::ReadingCollection;
    use crate::domain::SourceIdentity;
    use crate::parser::RecordParser;
    use crate::render::HeatmapFrame;

    /// Records each scatter call, then holds the view until cancelled.
    #[derive(Default)]
    struct HoldingRenderer {
        calls: Mutex<Vec<usize>>,
        cancelled: Mutex<usize>,
    }

    impl Renderer for HoldingRenderer {
        fn scatter(
            &self,
            series: &[crate::render::ScatterSeries],
            cancel: &CancelToken,
        ) -> Result<(), PlateError> {
            self.calls.lock().unwrap().push(series.len());
            while !cancel.wait(Duration::from_millis(50)) {}
            *self.cancelled.lock().unwrap() += 1;
            Ok(())
        }

        fn heatmap(&self, _frame: &HeatmapFrame, _cancel: &CancelToken) -> Result<(), PlateError> {
            Ok(())
        }
    }

    struct PanickingRenderer;

    impl Renderer for PanickingRenderer {
        fn scatter(
            &self,
            _series: &[crate::render::ScatterSeries],
            _cancel: &CancelToken,
        ) -> Result<(), PlateError> {
            panic!("renderer crashed");
        }

        fn heatmap(&self, _frame: &HeatmapFrame, _cancel: &CancelToken) -> Result<(), PlateError> {
            Ok(())
        }
    }

    /// Blocks its first render for two seconds without looking at the token.
    #[derive(Default)]
    struct StubbornRenderer {
        calls: Mutex<usize>,
    }

    impl Renderer for StubbornRenderer {
        fn scatter(
            &self,
            _series: &[crate::render::ScatterSeries],
            _cancel: &CancelToken,
        ) -> Result<(), PlateError> {
            let first = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls == 1
            };
            if first {
                std::thread::sleep(Duration::from_secs(2));
            }
            Ok(())
        }

        fn heatmap(&self, _frame: &HeatmapFrame, _cancel: &CancelToken) -> Result<(), PlateError> {
            Ok(())
        }
    }

    fn snapshot(count: usize) -> Snapshot {
        let mut collection = ReadingCollection::new();
        for day in 0..count {
            let identity =
                SourceIdentity::new(format!("/data/202306{:02}101500_X_Y_A.csv", day + 1));
            collection.add(RecordParser::parse_content(identity, "Dye,ROX\nA,1\n").unwrap());
        }
        collection.snapshot()
    }

    #[test]
    fn refresh_replaces_running_render() {
        let renderer = Arc::new(HoldingRenderer::default());
        let mut trigger = RenderTrigger::new(Arc::clone(&renderer));

        trigger.refresh(snapshot(1));
        trigger.refresh(snapshot(2));
        trigger.refresh(snapshot(3));
        assert_eq!(trigger.dispatched(), 3);
        assert!(trigger.is_rendering());

        trigger.shutdown();
        assert!(!trigger.is_rendering());
        assert_eq!(*renderer.calls.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(*renderer.cancelled.lock().unwrap(), 3);
    }

    #[test]
    fn panicked_render_does_not_block_next() {
        let mut trigger = RenderTrigger::new(Arc::new(PanickingRenderer));
        trigger.refresh(snapshot(1));
        trigger.refresh(snapshot(1));
        assert_eq!(trigger.dispatched(), 2);
        trigger.shutdown();
    }

    #[test]
    fn unresponsive_render_is_left_behind() {
        let renderer = Arc::new(StubbornRenderer::default());
        let mut trigger = RenderTrigger::new(Arc::clone(&renderer));
        trigger.refresh(snapshot(1));
        std::thread::sleep(Duration::from_millis(20));

        let started = std::time::Instant::now();
        trigger.refresh(snapshot(2));
        assert!(started.elapsed() < STOP_GRACE + Duration::from_millis(300));
        assert_eq!(trigger.dispatched(), 2);

        trigger.shutdown();
        assert_eq!(*renderer.calls.lock().unwrap(), 2);
    }
}
