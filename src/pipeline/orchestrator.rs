//! Pipeline orchestrator
//!
//! Sequences acquisition, parsing, classification and persistence into one
//! run. Runs are best-effort: a failed chunk commit is reported and the run
//! carries on, while an unavailable or malformed feed stops it before any
//! write. Only one run may be active per [`Pipeline`] at a time.

use indexmap::IndexMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock, broadcast};
use tracing::{debug, info, warn};

use super::report::{ChannelSchedule, DaySchedule, RunMode, RunReport};
use super::state::{PipelineProgress, PipelineState, RunStateTracker};
use crate::config::Config;
use crate::errors::{AppError, AppResult};
use crate::ingestor::{BatchWriter, EpgParser, FeedAcquirer, ParsedGuide, classify};
use crate::models::{Channel, DayKey, Program, ProgramDetail, ProgramView};
use crate::storage::{DocumentStore, ObjectStore};
use crate::utils::FeedSource;

const PROGRESS_CHANNEL_CAPACITY: usize = 256;

pub struct Pipeline {
    config: Config,
    acquirer: FeedAcquirer,
    parser: EpgParser,
    writer: BatchWriter,
    documents: Arc<dyn DocumentStore>,
    progress_tx: broadcast::Sender<PipelineProgress>,
    run_guard: Mutex<()>,
    last_report: RwLock<Option<RunReport>>,
}

impl Pipeline {
    pub fn new(
        config: Config,
        objects: Arc<dyn ObjectStore>,
        documents: Arc<dyn DocumentStore>,
        source: Arc<dyn FeedSource>,
    ) -> Self {
        let (progress_tx, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);
        Self {
            acquirer: FeedAcquirer::new(objects, source, config.feed.clone()),
            parser: EpgParser::new(config.pipeline.description_limit),
            writer: BatchWriter::new(documents.clone(), &config.pipeline),
            documents,
            progress_tx,
            run_guard: Mutex::new(()),
            last_report: RwLock::new(None),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn acquirer(&self) -> &FeedAcquirer {
        &self.acquirer
    }

    /// Receive every state transition of subsequent runs
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineProgress> {
        self.progress_tx.subscribe()
    }

    /// Report of the most recent run, including failed ones
    pub async fn last_report(&self) -> Option<RunReport> {
        self.last_report.read().await.clone()
    }

    pub fn is_running(&self) -> bool {
        self.run_guard.try_lock().is_err()
    }

    fn claim(&self, operation: &str, resource: String) -> AppResult<MutexGuard<'_, ()>> {
        self.run_guard.try_lock().map_err(|_| {
            warn!("Rejected {} of {}: another run is active", operation, resource);
            AppError::operation_in_progress(operation, resource)
        })
    }

    /// Incremental refresh: load `day` from cache or network and persist it
    pub async fn refresh_day(&self, day: DayKey) -> AppResult<RunReport> {
        let _guard = self.claim("refresh", day.to_string())?;

        let mut report = RunReport::new(RunMode::Refresh);
        report.days.push(day);
        let mut tracker = RunStateTracker::new(report.run_id, self.progress_tx.clone());
        info!("Starting refresh {} for {}", report.run_id, day);

        let outcome = self.run_refresh(day, &mut report, &mut tracker).await;
        self.finish(report, tracker, outcome).await
    }

    /// Full rebuild: purge every collection and reload from the canonical source
    pub async fn rebuild(&self) -> AppResult<RunReport> {
        let _guard = self.claim("rebuild", "all collections".to_string())?;

        let mut report = RunReport::new(RunMode::Rebuild);
        let mut tracker = RunStateTracker::new(report.run_id, self.progress_tx.clone());
        info!("Starting rebuild {}", report.run_id);

        let outcome = self.run_rebuild(&mut report, &mut tracker).await;
        self.finish(report, tracker, outcome).await
    }

    async fn run_refresh(
        &self,
        day: DayKey,
        report: &mut RunReport,
        tracker: &mut RunStateTracker,
    ) -> AppResult<()> {
        tracker.advance(PipelineState::Acquiring, format!("acquiring feed for {day}"))?;
        let feed = self.acquirer.acquire(day).await?;
        report.acquire = Some(feed.report);

        tracker.advance(
            PipelineState::Parsing,
            format!("parsing {} bytes", feed.xml.len()),
        )?;
        let guide = self.parser.parse(&feed.xml, day)?;
        drop(feed.xml);
        report.parse = Some(guide.report.clone());

        self.classify_and_write(guide, report, tracker).await
    }

    async fn run_rebuild(
        &self,
        report: &mut RunReport,
        tracker: &mut RunStateTracker,
    ) -> AppResult<()> {
        tracker.advance(
            PipelineState::Acquiring,
            "purging collections and streaming canonical feed",
        )?;
        for collection in self.config.pipeline.collections.all() {
            let deleted = self.writer.purge_collection(collection).await?;
            report.purged.insert(collection.to_string(), deleted);
        }
        let feed = self.acquirer.refresh_canonical().await?;
        report.acquire = Some(feed.report);

        tracker.advance(
            PipelineState::Parsing,
            format!("parsing {} bytes", feed.xml.len()),
        )?;
        let guide = self.parser.parse_all(&feed.xml)?;
        drop(feed.xml);
        report.parse = Some(guide.report.clone());
        report.days = guide.days();

        self.classify_and_write(guide, report, tracker).await?;

        if self.config.pipeline.curate_after_rebuild {
            report.curated = Some(self.writer.copy_curated().await?);
        }
        Ok(())
    }

    async fn classify_and_write(
        &self,
        guide: ParsedGuide,
        report: &mut RunReport,
        tracker: &mut RunStateTracker,
    ) -> AppResult<()> {
        tracker.advance(
            PipelineState::Classifying,
            format!("classifying {} feed channels", guide.channels.len()),
        )?;
        let channels = classify_channels(&guide, report.mode);

        tracker.advance(
            PipelineState::Writing,
            format!(
                "writing {} channels and {} programs",
                channels.len(),
                guide.program_count()
            ),
        )?;
        let channel_report = self.writer.write_channels(&channels).await?;
        let mut program_report = self
            .writer
            .write_programs(&channel_report.ids(), &guide.programs)
            .await;
        if report.mode == RunMode::Refresh {
            for &day in &report.days {
                program_report.absorb(self.writer.clear_day(day, &guide.programs).await?);
            }
        }
        report.channels = Some(channel_report);
        report.programs = Some(program_report);
        Ok(())
    }

    async fn finish(
        &self,
        mut report: RunReport,
        mut tracker: RunStateTracker,
        outcome: AppResult<()>,
    ) -> AppResult<RunReport> {
        let result =
            outcome.and_then(|()| tracker.advance(PipelineState::Done, "run complete"));

        if let Err(ref e) = result {
            tracker.fail(e);
            report.error = Some(e.to_string());
        }
        report.finish(tracker.current(), tracker.into_history());

        info!(
            "{} run {} finished as {} in {}ms ({} failed commits)",
            report.mode,
            report.run_id,
            report.state,
            report.duration_ms,
            report.failed_commits()
        );
        *self.last_report.write().await = Some(report.clone());

        result.map(|_| report)
    }

    /// Stored programs for `day`, refreshing first when nothing is stored yet
    pub async fn programs_for_day(&self, day: DayKey) -> AppResult<DaySchedule> {
        let schedule = self.read_day(day).await?;
        if !schedule.channels.is_empty() {
            return Ok(schedule);
        }

        info!("No stored programs for {}, refreshing", day);
        self.refresh_day(day).await?;
        let mut schedule = self.read_day(day).await?;
        schedule.refreshed = true;
        Ok(schedule)
    }

    /// Read the stored buckets for `day` without touching the feed
    pub async fn read_day(&self, day: DayKey) -> AppResult<DaySchedule> {
        let field = day.to_string();
        let collection = &self.config.pipeline.collections.programs;
        let mut channels = Vec::new();

        for channel in self.writer.existing_channels().await?.into_values() {
            let Some(document) = self.documents.get(collection, &channel.id).await? else {
                continue;
            };
            let Some(bucket) = document.fields.get(&field) else {
                continue;
            };
            if bucket.as_array().is_some_and(Vec::is_empty) {
                continue;
            }

            let programs: Vec<Program> = match serde_json::from_value(bucket.clone()) {
                Ok(programs) => programs,
                Err(e) => {
                    warn!(
                        "Skipping unreadable {} bucket for channel {}: {}",
                        field, channel.name, e
                    );
                    continue;
                }
            };
            let programs = programs
                .into_iter()
                .map(|program| ProgramView {
                    detail: ProgramDetail::for_program(&program),
                    program,
                })
                .collect();

            channels.push(ChannelSchedule {
                channel_id: channel.id.clone(),
                channel,
                programs,
            });
        }

        debug!("Read {} channel buckets for {}", channels.len(), day);
        Ok(DaySchedule {
            day,
            refreshed: false,
            channels,
        })
    }
}

/// One stored channel per feed channel, classified by display name. A refresh
/// only takes channels with programs on the requested day; a rebuild takes
/// every channel in the feed.
fn classify_channels(guide: &ParsedGuide, mode: RunMode) -> Vec<Channel> {
    let mut classified: IndexMap<String, Channel> = IndexMap::new();
    for feed_channel in guide.channels.values() {
        let name = feed_channel.display_name();
        if mode == RunMode::Refresh && !guide.programs.contains_key(name) {
            continue;
        }
        classified
            .entry(name.to_string())
            .or_insert_with(|| Channel::new(name, feed_channel.icon.clone(), classify(name)));
    }
    debug!(
        "Classified {} channels ({} known)",
        classified.len(),
        classified
            .values()
            .filter(|c| c.classification().is_known())
            .count()
    );
    classified.into_values().collect()
}
