//! Ingestion controller.
//!
//! Drives a single forward pass over an [`EntitySource`], routing decoded
//! entities into the node store, the way buffer and the relation resolver,
//! and hands assembled features back through a pull interface. Work happens
//! one source chunk at a time so callers can report progress and cancel
//! between chunks.
//!
//! Two consumption modes exist. In sequential mode one layer is read at a
//! time and features for other layers are not built; asking for a different
//! layer restarts the pass. In interleaved mode every wanted layer is built
//! in the same pass and queued until read.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use camino::Utf8PathBuf;
use geo::Rect;
use log::{debug, info, warn};
use serde::Serialize;
use wayfold_core::{Feature, IngestConfig, IngestSummary, Layer, ReadingMode};
use wayfold_fs::ScratchSpace;
use wayfold_store::PolygonRules;

mod state;

use state::{LayerFilter, PassState};

use crate::error::IngestError;
use crate::source::{EntitySource, Progress};

/// Stage of an ingestion pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Nothing has been read.
    Init,
    /// The dataset header was read.
    Bounds,
    /// Nodes are being stored.
    Nodes,
    /// Ways are being buffered and resolved.
    Ways,
    /// Relations are being resolved.
    Relations,
    /// Buffers are being moved to disk after crossing the memory ceiling.
    Flush,
    /// The input is exhausted.
    Done,
}

impl Phase {
    const fn rank(self) -> u8 {
        match self {
            Self::Init => 0,
            Self::Bounds => 1,
            Self::Nodes | Self::Flush => 2,
            Self::Ways => 3,
            Self::Relations => 4,
            Self::Done => 5,
        }
    }
}

/// Shared flag that stops a pass at the next chunk boundary.
///
/// # Examples
///
/// ```
/// use wayfold_ingest::StopHandle;
///
/// let handle = StopHandle::default();
/// let remote = handle.clone();
/// remote.stop();
/// assert!(handle.is_stopped());
/// ```
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Request a stop.
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Outcome of a finished pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    /// Counters and bounds of the pass.
    pub summary: IngestSummary,
    /// Scratch files kept because retention was requested.
    pub retained: Vec<Utf8PathBuf>,
}

/// Drives ingestion of one source and serves the assembled features.
///
/// # Examples
///
/// ```
/// use wayfold_core::{IngestConfig, Layer, NodeNotice, WayNotice};
/// use wayfold_ingest::{IngestController, MemorySource};
///
/// # fn main() -> Result<(), wayfold_ingest::IngestError> {
/// let source = MemorySource::new()
///     .nodes(vec![NodeNotice::new(1, 0.0, 0.0), NodeNotice::new(2, 0.5, 0.5)])
///     .way(WayNotice::new(10, vec![1, 2]).with_tag("highway", "path"));
/// let mut controller = IngestController::new(source, IngestConfig::default())?;
/// let line = controller.next_feature(Layer::Lines)?.expect("one line");
/// assert_eq!(line.tag("highway"), Some("path"));
/// assert!(controller.next_feature(Layer::Lines)?.is_none());
/// # Ok(())
/// # }
/// ```
pub struct IngestController<S> {
    source: S,
    config: IngestConfig,
    rules: PolygonRules,
    scratch: ScratchSpace,
    state: PassState,
    interest: [bool; Layer::COUNT],
    stop: StopHandle,
    next_layer: usize,
}

impl<S: std::fmt::Debug> std::fmt::Debug for IngestController<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestController")
            .field("source", &self.source)
            .field("phase", &self.state.phase)
            .field("reading_mode", &self.config.reading_mode)
            .field("interest", &self.interest)
            .field("stopped", &self.stop.is_stopped())
            .finish_non_exhaustive()
    }
}

impl<S: EntitySource> IngestController<S> {
    /// Validate `config` and open the storage backend for a pass over
    /// `source`. Nothing is read until features are requested.
    ///
    /// # Errors
    /// Returns [`IngestError`] when the configuration is invalid or the
    /// scratch directory or backend cannot be prepared.
    pub fn new(source: S, config: IngestConfig) -> Result<Self, IngestError> {
        config.validate()?;
        let rules = PolygonRules::from_config(&config)?;
        let scratch = ScratchSpace::new(config.scratch_dir.as_deref()).map_err(|source| {
            IngestError::Scratch {
                dir: config.scratch_dir.clone(),
                source,
            }
        })?;
        let state = PassState::open(
            &config,
            rules.clone(),
            &scratch,
            source.size_hint(),
            LayerFilter::all(),
        )?;
        Ok(Self {
            source,
            config,
            rules,
            scratch,
            state,
            interest: [true; Layer::COUNT],
            stop: StopHandle::default(),
            next_layer: 0,
        })
    }

    /// Discard the current pass and rewind the source.
    ///
    /// # Errors
    /// Returns [`IngestError`] when the stores cannot be released, the
    /// source cannot rewind, or a new backend cannot be opened.
    pub fn reset_reading(&mut self) -> Result<(), IngestError> {
        self.state.close(false)?;
        self.source.rewind()?;
        self.state = PassState::open(
            &self.config,
            self.rules.clone(),
            &self.scratch,
            self.source.size_hint(),
            LayerFilter {
                interest: self.interest,
                target: None,
            },
        )?;
        self.stop.clear();
        self.next_layer = 0;
        debug!("reading reset");
        Ok(())
    }

    /// Decode one source chunk on behalf of `layer`.
    ///
    /// `progress` is called after the chunk; returning `false` cancels the
    /// pass. Returns whether more input remains.
    ///
    /// # Errors
    /// Returns [`IngestError::Cancelled`] when stopped, or the failure that
    /// ended the pass. Either way the stores of the pass are discarded.
    pub fn parse_next_chunk(
        &mut self,
        layer: Layer,
        progress: &mut dyn FnMut(Progress) -> bool,
    ) -> Result<bool, IngestError> {
        let target = self.target_for(Some(layer));
        self.pump(target, progress)
    }

    /// Next feature of `layer`, or `None` once the layer is exhausted.
    ///
    /// # Errors
    /// Returns [`IngestError`] when the pass fails or is cancelled.
    pub fn next_feature(&mut self, layer: Layer) -> Result<Option<Feature>, IngestError> {
        let target = self.target_for(Some(layer));
        self.select_target(target)?;
        loop {
            if let Some(feature) = self.state.pop(layer) {
                return Ok(Some(feature));
            }
            if self.state.phase == Phase::Done {
                return Ok(None);
            }
            self.pump(target, &mut |_| true)?;
        }
    }

    /// Next feature of any layer, taking layers in turn.
    ///
    /// # Errors
    /// Returns [`IngestError`] when the pass fails or is cancelled.
    pub fn next_any_feature(&mut self) -> Result<Option<(Layer, Feature)>, IngestError> {
        self.select_target(None)?;
        loop {
            if let Some(found) = self.pop_in_turn() {
                return Ok(Some(found));
            }
            if self.state.phase == Phase::Done {
                return Ok(None);
            }
            self.pump(None, &mut |_| true)?;
        }
    }

    /// Bounding box declared by the source header, or of all accepted
    /// nodes once the pass is complete.
    #[must_use]
    pub fn native_extent(&self) -> Option<Rect<f64>> {
        self.state.header_bounds.or_else(|| {
            (self.state.phase == Phase::Done)
                .then_some(self.state.summary.bounds)
                .flatten()
        })
    }

    /// Current phase of the pass.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.state.phase
    }

    /// Counters of the current pass.
    #[must_use]
    pub const fn summary(&self) -> &IngestSummary {
        &self.state.summary
    }

    /// Handle that stops the pass from elsewhere.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Declare whether features of `layer` should be built. Takes full
    /// effect from the next pass.
    pub fn set_layer_interest(&mut self, layer: Layer, interested: bool) {
        if let Some(slot) = self.interest.get_mut(layer.index()) {
            *slot = interested;
        }
        self.state.filter.interest = self.interest;
    }

    /// Release the stores and return the summary of the pass.
    ///
    /// # Errors
    /// Returns [`IngestError`] when a scratch file cannot be kept or
    /// removed.
    pub fn finish(mut self) -> Result<IngestReport, IngestError> {
        let retained = self.state.close(self.config.retain_scratch)?;
        for path in &retained {
            info!("retained scratch file {path}");
        }
        Ok(IngestReport {
            summary: std::mem::take(&mut self.state.summary),
            retained,
        })
    }

    const fn target_for(&self, layer: Option<Layer>) -> Option<Layer> {
        match self.config.reading_mode {
            ReadingMode::Sequential => layer,
            ReadingMode::Interleaved => None,
        }
    }

    fn select_target(&mut self, target: Option<Layer>) -> Result<(), IngestError> {
        if self.state.filter.target == target {
            return Ok(());
        }
        if self.state.chunks > 0 {
            debug!("restarting the pass for {target:?}");
            self.reset_reading()?;
        }
        self.state.filter.target = target;
        Ok(())
    }

    fn pump(
        &mut self,
        target: Option<Layer>,
        progress: &mut dyn FnMut(Progress) -> bool,
    ) -> Result<bool, IngestError> {
        self.select_target(target)?;
        if self.state.phase == Phase::Done {
            return Ok(false);
        }
        if self.stop.is_stopped() {
            return Err(self.abort(IngestError::Cancelled));
        }
        let more = match self.source.next_chunk(&mut self.state) {
            Ok(more) => more,
            Err(err) => return Err(self.abort(err.into())),
        };
        self.state.chunks += 1;
        if let Some(err) = self.state.failure.take() {
            return Err(self.abort(err));
        }
        if !more && let Err(err) = self.state.finish_pass() {
            return Err(self.abort(err));
        }
        let keep_going = progress(self.source.progress());
        if more && (!keep_going || self.stop.is_stopped()) {
            return Err(self.abort(IngestError::Cancelled));
        }
        Ok(more)
    }

    fn pop_in_turn(&mut self) -> Option<(Layer, Feature)> {
        for offset in 0..Layer::COUNT {
            let index = (self.next_layer + offset).rem_euclid(Layer::COUNT);
            let Some(layer) = Layer::ALL.get(index).copied() else {
                continue;
            };
            if let Some(feature) = self.state.pop(layer) {
                self.next_layer = index + 1;
                return Some((layer, feature));
            }
        }
        None
    }

    /// End the pass, discarding partial results and scratch files.
    fn abort(&mut self, err: IngestError) -> IngestError {
        match &err {
            IngestError::Cancelled => info!("ingestion cancelled"),
            other => warn!("ingestion failed: {other}"),
        }
        self.state.discard_features();
        if let Err(close_err) = self.state.close(false) {
            warn!("failed to discard scratch files: {close_err}");
        }
        self.state.phase = Phase::Done;
        err
    }
}
