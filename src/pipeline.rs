//! Merge-and-sign jobs
//!
//! A [`Job`] takes raw source buffers through parse, merge, overlay, and
//! serialize as an explicit state machine:
//!
//! ```text
//! Idle → Parsing(0) → … → Parsing(n-1) → Composited
//!      → Overlaying(0) → … → Overlaying(m-1) → Serialized → Done
//! ```
//!
//! Any stage can move to `Failed`; no stage is entered twice. Sources are
//! parsed one at a time and each parsed source is dropped once its pages
//! are copied, so a job holds at most one parsed source at any moment.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::error::{JobError, MergeError};
use crate::pdf::{
    apply_overlay, parse, serialize_with, BatchSummary, Compositor, Document, OverlayRequest,
    PageSelection, SignatureStamp, SourceSummary, WriteOptions,
};

/// Shared flag a caller raises to stop a running job
///
/// Checked between page copies and between overlays.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One input buffer and the pages to take from it
#[derive(Debug, Clone)]
pub struct SourceInput {
    /// Display name, usually the file name
    pub name: String,
    pub bytes: Vec<u8>,
    pub pages: PageSelection,
}

impl SourceInput {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
            pages: PageSelection::All,
        }
    }

    pub fn with_pages(mut self, pages: PageSelection) -> Self {
        self.pages = pages;
        self
    }
}

/// Something to draw on the merged document
#[derive(Debug, Clone)]
pub enum PageOverlay {
    Request(OverlayRequest),
    Stamp {
        page_index: usize,
        stamp: SignatureStamp,
    },
}

/// Where a job is in its lifecycle
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Idle,
    /// Source `i` has been parsed and its pages copied
    Parsing(usize),
    Composited,
    /// Overlay `j` has been applied
    Overlaying(usize),
    Serialized,
    Done,
    Failed(JobError),
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done | Stage::Failed(_))
    }
}

/// Point-in-time view of a job for progress display
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub stage: Stage,
    pub sources_done: usize,
    pub sources_total: usize,
    pub pages_copied: usize,
}

/// Result of a finished job
#[derive(Debug, Clone)]
pub struct JobOutput {
    pub bytes: Vec<u8>,
    pub page_count: usize,
    pub summary: BatchSummary,
}

/// A merge-and-sign job
pub struct Job {
    sources: Vec<SourceInput>,
    overlays: Vec<PageOverlay>,
    write: WriteOptions,
    skip_unparseable: bool,
    cancel: CancelFlag,
    stage: Stage,
    compositor: Option<Compositor>,
    document: Option<Document>,
    output: Option<Vec<u8>>,
    summary: BatchSummary,
    page_count: usize,
}

impl Job {
    pub fn new(sources: Vec<SourceInput>) -> Self {
        Self {
            sources,
            overlays: Vec::new(),
            write: WriteOptions::default(),
            skip_unparseable: false,
            cancel: CancelFlag::new(),
            stage: Stage::Idle,
            compositor: Some(Compositor::new()),
            document: None,
            output: None,
            summary: BatchSummary::default(),
            page_count: 0,
        }
    }

    /// Take output and error-handling settings from a config
    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        self.write.compress = config.compress;
        self.skip_unparseable = config.skip_unparseable;
        self
    }

    pub fn with_overlay(mut self, overlay: PageOverlay) -> Self {
        self.overlays.push(overlay);
        self
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    pub fn snapshot(&self) -> Snapshot {
        let sources_done = match self.stage {
            Stage::Idle => 0,
            Stage::Parsing(i) => i + 1,
            _ => self.sources.len(),
        };
        Snapshot {
            stage: self.stage.clone(),
            sources_done,
            sources_total: self.sources.len(),
            pages_copied: self.page_count,
        }
    }

    /// Advance by one stage
    pub fn step(&mut self) -> Result<&Stage, JobError> {
        if self.stage.is_terminal() {
            return Err(JobError::Finished);
        }
        match self.advance() {
            Ok(stage) => {
                debug!(?stage, "job advanced");
                self.stage = stage;
                Ok(&self.stage)
            }
            Err(e) => {
                warn!(error = %e, stage = ?self.stage, "job failed");
                self.compositor = None;
                self.document = None;
                self.output = None;
                self.stage = Stage::Failed(e.clone());
                Err(e)
            }
        }
    }

    /// Run to completion
    #[instrument(skip(self), fields(sources = self.sources.len(), overlays = self.overlays.len()))]
    pub fn run(mut self) -> Result<JobOutput, JobError> {
        while !self.stage.is_terminal() {
            self.step()?;
        }
        self.into_output()
    }

    /// Output of a job that reached `Done`
    pub fn into_output(self) -> Result<JobOutput, JobError> {
        match (self.stage, self.output) {
            (Stage::Done, Some(bytes)) => Ok(JobOutput {
                bytes,
                page_count: self.page_count,
                summary: self.summary,
            }),
            (Stage::Failed(e), _) => Err(e),
            _ => Err(JobError::Finished),
        }
    }

    fn check_cancel(&self) -> Result<(), JobError> {
        if self.cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        Ok(())
    }

    fn advance(&mut self) -> Result<Stage, JobError> {
        self.check_cancel()?;
        match self.stage {
            Stage::Idle if self.sources.is_empty() => self.composite(),
            Stage::Idle => self.parse_source(0),
            Stage::Parsing(i) if i + 1 < self.sources.len() => self.parse_source(i + 1),
            Stage::Parsing(_) => self.composite(),
            Stage::Composited if self.overlays.is_empty() => self.serialize(),
            Stage::Composited => self.overlay(0),
            Stage::Overlaying(j) if j + 1 < self.overlays.len() => self.overlay(j + 1),
            Stage::Overlaying(_) => self.serialize(),
            Stage::Serialized => Ok(Stage::Done),
            Stage::Done | Stage::Failed(_) => Err(JobError::Finished),
        }
    }

    fn parse_source(&mut self, index: usize) -> Result<Stage, JobError> {
        // Take the bytes so the buffer is freed with the parsed document
        let bytes = std::mem::take(&mut self.sources[index].bytes);
        let name = self.sources[index].name.clone();
        let source = match parse(&bytes) {
            Ok(doc) => doc,
            Err(e) if self.skip_unparseable => {
                warn!(source = %name, error = %e, "skipping unparseable source");
                self.summary.rejected.push((name, e.to_string()));
                return Ok(Stage::Parsing(index));
            }
            Err(e) => {
                return Err(MergeError::SourceUnparseable {
                    request: index,
                    source: e,
                }
                .into())
            }
        };

        let compositor = self.compositor.as_mut().ok_or(JobError::Finished)?;
        let mut session = compositor.begin_source(&source, &self.sources[index].pages)?;
        loop {
            if self.cancel.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            if !compositor.copy_next(&source, &mut session) {
                break;
            }
        }
        self.page_count = compositor.page_count();
        self.summary.sources.push(SourceSummary {
            name,
            byte_len: bytes.len(),
            page_count: source.page_count(),
        });
        debug!(source = index, pages = session.len(), "source composited");
        Ok(Stage::Parsing(index))
    }

    fn composite(&mut self) -> Result<Stage, JobError> {
        let compositor = self.compositor.take().ok_or(JobError::Finished)?;
        let document = compositor.finish()?;
        info!(pages = document.page_count(), "composited sources");
        self.document = Some(document);
        Ok(Stage::Composited)
    }

    fn overlay(&mut self, index: usize) -> Result<Stage, JobError> {
        let document = self.document.as_mut().ok_or(JobError::Finished)?;
        let result = match &self.overlays[index] {
            PageOverlay::Request(request) => apply_overlay(document, request),
            PageOverlay::Stamp { page_index, stamp } => stamp
                .overlay_for(document, *page_index)
                .and_then(|request| apply_overlay(document, &request)),
        };
        result.map_err(|source| JobError::Overlay {
            overlay: index,
            source,
        })?;
        Ok(Stage::Overlaying(index))
    }

    fn serialize(&mut self) -> Result<Stage, JobError> {
        let document = self.document.take().ok_or(JobError::Finished)?;
        let bytes = serialize_with(&document, &self.write)?;
        info!(bytes = bytes.len(), "serialized job output");
        self.output = Some(bytes);
        Ok(Stage::Serialized)
    }
}

/// Run independent jobs in parallel; results are in input order
pub fn run_jobs(jobs: Vec<Job>) -> Vec<Result<JobOutput, JobError>> {
    jobs.into_par_iter().map(Job::run).collect()
}
