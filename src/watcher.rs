//! Directory watch loop.
//!
//! The `notify` callback only forwards raw events into a channel. A single
//! watcher thread drains that channel in delivery order, applies each event
//! to the [`ReadingCollection`] it owns and asks the [`RenderTrigger`] for a
//! fresh render whenever the collection changed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use notify::event::{CreateKind, RemoveKind};
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::collection::{ReadingCollection, has_extension};
use crate::domain::SourceIdentity;
use crate::error::PlateError;
use crate::parser::RecordParser;
use crate::render::Renderer;
use crate::trigger::RenderTrigger;

#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub directory: PathBuf,
    pub interval: Duration,
    pub extension: String,
}

/// Filesystem change relevant to the collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileChange {
    Created(PathBuf),
    Deleted(PathBuf),
}

impl FileChange {
    /// Extracts file-level creations and deletions. Directory events and
    /// every other kind of event yield nothing.
    pub fn from_event(event: &Event) -> Vec<FileChange> {
        match event.kind {
            EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => {
                Vec::new()
            }
            EventKind::Create(_) => event
                .paths
                .iter()
                .filter(|path| !path.is_dir())
                .cloned()
                .map(FileChange::Created)
                .collect(),
            EventKind::Remove(_) => event.paths.iter().cloned().map(FileChange::Deleted).collect(),
            _ => Vec::new(),
        }
    }
}

/// Live collection plus the render trigger bound to it. Owned by the watcher
/// thread while the loop runs.
pub struct WatchState<R: Renderer + 'static> {
    collection: ReadingCollection,
    trigger: RenderTrigger<R>,
    extension: String,
}

impl<R: Renderer + 'static> WatchState<R> {
    pub fn new(collection: ReadingCollection, trigger: RenderTrigger<R>, extension: &str) -> Self {
        Self {
            collection,
            trigger,
            extension: extension.to_string(),
        }
    }

    /// Applies every change carried by `event`, rendering once per change
    /// that altered the collection. Returns the number of such changes.
    pub fn handle(&mut self, event: &Event) -> usize {
        FileChange::from_event(event)
            .into_iter()
            .filter(|change| self.apply(change))
            .count()
    }

    /// Applies one change; returns whether the collection changed.
    pub fn apply(&mut self, change: &FileChange) -> bool {
        let changed = match change {
            FileChange::Created(path) => self.on_created(path),
            FileChange::Deleted(path) => self.on_deleted(path),
        };
        if changed {
            self.trigger.refresh(self.collection.snapshot());
        }
        changed
    }

    pub fn render(&mut self) {
        self.trigger.refresh(self.collection.snapshot());
    }

    pub fn collection(&self) -> &ReadingCollection {
        &self.collection
    }

    pub fn trigger(&self) -> &RenderTrigger<R> {
        &self.trigger
    }

    pub fn into_parts(self) -> (ReadingCollection, RenderTrigger<R>) {
        (self.collection, self.trigger)
    }

    fn on_created(&mut self, path: &Path) -> bool {
        if !has_extension(path, &self.extension) {
            return false;
        }
        match RecordParser::parse(path) {
            Ok(reading) => {
                info!(path = %path.display(), "reading added");
                self.collection.add(reading);
                true
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "file not added");
                false
            }
        }
    }

    fn on_deleted(&mut self, path: &Path) -> bool {
        let Ok(identity) = SourceIdentity::from_path(path) else {
            return false;
        };
        let removed = self.collection.remove(&identity).is_some();
        if removed {
            info!(path = %identity, "reading removed");
        }
        removed
    }
}

/// Watches a directory and keeps a live collection in sync with it.
pub struct ChangeWatcher<R: Renderer + 'static> {
    directory: PathBuf,
    watcher: Option<RecommendedWatcher>,
    stop_requested: Arc<AtomicBool>,
    thread: Option<JoinHandle<WatchState<R>>>,
    initial_count: usize,
}

impl<R: Renderer + 'static> ChangeWatcher<R> {
    /// Scans the directory, renders the initial state and starts the watcher
    /// thread. Any failure here is fatal: nothing is watched.
    pub fn start(options: WatchOptions, renderer: Arc<R>) -> Result<Self, PlateError> {
        let directory = options
            .directory
            .canonicalize()
            .map_err(|_| PlateError::DirectoryMissing(options.directory.clone()))?;
        if !directory.is_dir() {
            return Err(PlateError::DirectoryMissing(options.directory));
        }

        let collection = ReadingCollection::scan(&directory, &options.extension)?;
        let initial_count = collection.len();

        let (event_tx, event_rx) = mpsc::channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = event_tx.send(res);
            },
            NotifyConfig::default(),
        )
        .map_err(|err| PlateError::WatchSetup(err.to_string()))?;
        watcher
            .watch(&directory, RecursiveMode::Recursive)
            .map_err(|err| PlateError::WatchSetup(err.to_string()))?;

        let mut state = WatchState::new(
            collection,
            RenderTrigger::new(renderer),
            &options.extension,
        );
        state.render();

        let stop_requested = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&stop_requested);
        let interval = options.interval;
        let thread = thread::Builder::new()
            .name("plate-watcher".to_string())
            .spawn(move || process_events(event_rx, state, interval, stop))
            .map_err(|err| PlateError::WatchSetup(err.to_string()))?;

        info!(dir = %directory.display(), readings = initial_count, "watching directory");
        Ok(Self {
            directory,
            watcher: Some(watcher),
            stop_requested,
            thread: Some(thread),
            initial_count,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Number of readings found by the startup scan.
    pub fn initial_count(&self) -> usize {
        self.initial_count
    }

    /// Stops notification delivery, waits until the watcher thread has
    /// handled everything already queued, and hands back the final state.
    pub fn stop(mut self) -> Result<WatchState<R>, PlateError> {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.watcher.take();
        let thread = self
            .thread
            .take()
            .ok_or_else(|| PlateError::WatchSetup("watcher already stopped".to_string()))?;
        let state = thread
            .join()
            .map_err(|_| PlateError::WatchSetup("watcher thread panicked".to_string()))?;
        info!(dir = %self.directory.display(), "watcher stopped");
        Ok(state)
    }
}

impl<R: Renderer + 'static> Drop for ChangeWatcher<R> {
    fn drop(&mut self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.watcher.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn process_events<R: Renderer + 'static>(
    event_rx: Receiver<notify::Result<Event>>,
    mut state: WatchState<R>,
    interval: Duration,
    stop: Arc<AtomicBool>,
) -> WatchState<R> {
    let handle = |res: notify::Result<Event>, state: &mut WatchState<R>| match res {
        Ok(event) => {
            let changes = state.handle(&event);
            debug!(kind = ?event.kind, changes, "event handled");
        }
        Err(err) => warn!(error = %err, "watch error"),
    };

    loop {
        match event_rx.recv_timeout(interval) {
            Ok(res) => handle(res, &mut state),
            Err(RecvTimeoutError::Timeout) => {
                if stop.load(Ordering::SeqCst) {
                    while let Ok(res) = event_rx.try_recv() {
                        handle(res, &mut state);
                    }
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    state
}
