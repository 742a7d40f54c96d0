//! Extraction driver: pages through the listing under job control.
//!
//! Control signals are only looked at between batches. A batch in flight
//! always finishes; pause blocks before the next one, stop ends the job
//! there with whatever was collected. The end of the last batch counts as
//! a boundary, so a stop sent during it still wins over completion.

use std::{
    collections::HashMap,
    sync::mpsc::{Receiver, TryRecvError},
    thread,
    time::Duration,
};

use tracing::{debug, info, warn};

use crate::config::ExtractionConfig;
use crate::extract::{Cursor, ExtractionError, Extractor};
use crate::job::{JobError, JobMachine};
use crate::model::{
    ControlSignal, IdentityKey, JobStatus, LogLevel, Observer, ProgressEvent, ResourceRecord,
};

/// Tuning for one extraction run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverSettings {
    /// Consecutive batches without a new identity before extraction ends.
    pub stall_threshold: u32,

    /// Pause between requests to the source.
    pub request_delay: Duration,

    /// Upper bound on batches per run.
    pub max_batches: u32,
}

impl From<&ExtractionConfig> for DriverSettings {
    fn from(config: &ExtractionConfig) -> Self {
        Self {
            stall_threshold: config.stall_threshold.max(1),
            request_delay: config.request_delay(),
            max_batches: config.max_batches,
        }
    }
}

/// Why extraction ended successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The source reported no further pages.
    Exhausted,

    /// Too many consecutive batches brought nothing new.
    Stalled,

    /// The batch limit was reached.
    BatchLimit,
}

#[derive(Debug)]
pub enum DriverOutcome {
    Completed {
        records: Vec<ResourceRecord>,
        reason: Completion,
    },
    Stopped {
        collected: u64,
    },
    Failed {
        error: ExtractionError,
        collected: u64,
    },
}

pub struct Driver<'a> {
    settings: DriverSettings,
    signals: &'a Receiver<ControlSignal>,
}

impl<'a> Driver<'a> {
    pub fn new(settings: DriverSettings, signals: &'a Receiver<ControlSignal>) -> Self {
        Self { settings, signals }
    }

    /// Runs extraction to completion, stop, or failure.
    ///
    /// Errors are reserved for failing to persist job state; extraction
    /// failures are an outcome.
    pub fn run(
        &self,
        extractor: &mut dyn Extractor,
        machine: &mut JobMachine,
        observer: &mut dyn Observer,
    ) -> Result<DriverOutcome, JobError> {
        let mut buffer = Collected::default();
        let mut cursor = Cursor::start();
        let mut total = None;
        let mut stalls = 0;
        let mut batches = 0;

        observer.on_event(&ProgressEvent::log(LogLevel::Info, "Starting extraction"));

        let reason = loop {
            if self.at_boundary(machine, observer)? {
                return Ok(stopped(buffer.len(), observer));
            }
            if batches >= self.settings.max_batches {
                break Completion::BatchLimit;
            }

            let page = match extractor.extract_page(cursor) {
                Ok(page) => page,
                Err(error) => {
                    observer.on_event(&ProgressEvent::log(
                        LogLevel::Error,
                        format!("Extraction failed on page {}: {error}", cursor.page()),
                    ));
                    return Ok(DriverOutcome::Failed {
                        error,
                        collected: buffer.len() as u64,
                    });
                }
            };
            batches += 1;
            total = page.total.or(total);

            let mut added = 0;
            let mut last_label = None;
            for raw in page.records {
                let record = raw.into_record();
                last_label = Some(record.label().to_string());
                if buffer.insert(record) {
                    added += 1;
                }
            }
            debug!(page = cursor.page(), added, collected = buffer.len(), "batch done");

            machine.update_progress(buffer.len() as u64, total, last_label.clone())?;
            observer.on_event(&ProgressEvent::progress(
                buffer.len() as u64,
                total,
                last_label,
            ));

            if added == 0 {
                stalls += 1;
                observer.on_event(&ProgressEvent::log(
                    LogLevel::Info,
                    format!(
                        "No new records (attempt {stalls}/{})",
                        self.settings.stall_threshold
                    ),
                ));
                if stalls >= self.settings.stall_threshold {
                    break Completion::Stalled;
                }
            } else {
                stalls = 0;
                observer.on_event(&ProgressEvent::log(
                    LogLevel::Info,
                    format!("Loaded {added} new records (total: {})", buffer.len()),
                ));
            }

            match page.next {
                Some(next) => cursor = next,
                None => break Completion::Exhausted,
            }

            if !self.settings.request_delay.is_zero() {
                thread::sleep(self.settings.request_delay);
            }
        };

        // The last batch is a boundary too.
        if self.at_boundary(machine, observer)? {
            return Ok(stopped(buffer.len(), observer));
        }

        info!(?reason, records = buffer.len(), batches, "extraction complete");
        observer.on_event(&ProgressEvent::log(
            LogLevel::Info,
            format!("Finished extraction with {} records", buffer.len()),
        ));
        Ok(DriverOutcome::Completed {
            records: buffer.records,
            reason,
        })
    }

    /// Consumes pending signals. Blocks while paused.
    ///
    /// Returns `true` when the job should stop here.
    fn at_boundary(
        &self,
        machine: &mut JobMachine,
        observer: &mut dyn Observer,
    ) -> Result<bool, JobError> {
        loop {
            loop {
                match self.signals.try_recv() {
                    Ok(signal) => apply(machine, signal, observer)?,
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        disconnected(machine, observer)?;
                        break;
                    }
                }
            }

            if machine.stop_requested() {
                return Ok(true);
            }
            if machine.status() != JobStatus::Paused {
                return Ok(false);
            }

            match self.signals.recv() {
                Ok(signal) => apply(machine, signal, observer)?,
                Err(_) => disconnected(machine, observer)?,
            }
        }
    }
}

fn stopped(collected: usize, observer: &mut dyn Observer) -> DriverOutcome {
    observer.on_event(&ProgressEvent::log(
        LogLevel::Warning,
        format!("Stopped by request after {collected} records"),
    ));
    DriverOutcome::Stopped {
        collected: collected as u64,
    }
}

fn apply(
    machine: &mut JobMachine,
    signal: ControlSignal,
    observer: &mut dyn Observer,
) -> Result<(), JobError> {
    match machine.apply(signal) {
        Ok(status) => {
            let message = match signal {
                ControlSignal::Pause => "Paused",
                ControlSignal::Resume => "Resumed",
                ControlSignal::Stop => "Stop requested",
                ControlSignal::Run => "Run ignored",
            };
            let level = if status == JobStatus::Running && signal != ControlSignal::Stop {
                LogLevel::Info
            } else {
                LogLevel::Warning
            };
            observer.on_event(&ProgressEvent::log(level, message));
            Ok(())
        }
        Err(JobError::Rejected(rejected)) => {
            warn!(%rejected, "control signal rejected");
            observer.on_event(&ProgressEvent::log(LogLevel::Warning, rejected.to_string()));
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Nobody can send signals any more, so nobody could resume either.
fn disconnected(machine: &mut JobMachine, observer: &mut dyn Observer) -> Result<(), JobError> {
    if !machine.stop_requested() {
        warn!("control channel closed, stopping job");
        apply(machine, ControlSignal::Stop, observer)?;
    }
    Ok(())
}

/// Records collected so far, unique by identity.
#[derive(Default)]
struct Collected {
    positions: HashMap<IdentityKey, usize>,
    records: Vec<ResourceRecord>,
}

impl Collected {
    /// Adds or replaces a record. Returns `true` if its identity is new.
    fn insert(&mut self, record: ResourceRecord) -> bool {
        let Some(key) = record.identity() else {
            warn!(url = %record.url, "dropping record with no identity");
            return false;
        };
        if let Some(&i) = self.positions.get(&key) {
            self.records[i] = record;
            return false;
        }
        self.positions.insert(key, self.records.len());
        self.records.push(record);
        true
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use std::{collections::VecDeque, sync::mpsc};

    use tempfile::TempDir;

    use crate::extract::{Page, RawRecord};
    use crate::model::{EventKind, Recorder};
    use crate::storage::Storage;

    /// Serves a fixed sequence of pages, then fails if asked for more.
    pub(crate) struct Scripted {
        pages: VecDeque<Result<Page, ExtractionError>>,
        pub(crate) calls: usize,
    }

    impl Scripted {
        pub(crate) fn new(pages: Vec<Result<Page, ExtractionError>>) -> Self {
            Self {
                pages: pages.into(),
                calls: 0,
            }
        }
    }

    impl Extractor for Scripted {
        fn extract_page(&mut self, _cursor: Cursor) -> Result<Page, ExtractionError> {
            self.calls += 1;
            self.pages
                .pop_front()
                .unwrap_or_else(|| Err(ExtractionError::Fetch("script exhausted".into())))
        }
    }

    /// Queues a stop request on every fetch, as a controller racing the
    /// job would.
    pub(crate) struct StopDuringFetch {
        pub(crate) inner: Scripted,
        pub(crate) signals: mpsc::Sender<ControlSignal>,
    }

    impl Extractor for StopDuringFetch {
        fn extract_page(&mut self, cursor: Cursor) -> Result<Page, ExtractionError> {
            let _ = self.signals.send(ControlSignal::Stop);
            self.inner.extract_page(cursor)
        }
    }

    pub(crate) fn raw(id: u32, version: &str) -> RawRecord {
        RawRecord {
            url: format!("https://example.com/exchange/{id}/overview"),
            title: Some(format!("Resource {id}")),
            version: Some(version.into()),
            updated_date: Some("01/01/2024".into()),
            ..RawRecord::default()
        }
    }

    pub(crate) fn page(ids: &[u32], more: bool) -> Result<Page, ExtractionError> {
        Ok(Page {
            records: ids.iter().map(|&id| raw(id, "1.0.0")).collect(),
            next: more.then(|| Cursor::start().next()),
            total: None,
        })
    }

    pub(crate) fn settings() -> DriverSettings {
        DriverSettings {
            stall_threshold: 3,
            request_delay: Duration::ZERO,
            max_batches: 100,
        }
    }

    fn test_storage() -> (TempDir, Storage) {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path().join("data")).unwrap();
        (dir, storage)
    }

    fn logs(recorder: &Recorder) -> Vec<String> {
        recorder
            .events
            .iter()
            .filter_map(|e| match &e.kind {
                EventKind::Log { message, .. } => Some(message.clone()),
                EventKind::Progress { .. } => None,
            })
            .collect()
    }

    #[test]
    fn runs_until_source_is_exhausted() {
        let (_dir, storage) = test_storage();
        let (_tx, rx) = mpsc::channel();
        let mut machine = JobMachine::start(storage.clone()).unwrap();
        let mut extractor = Scripted::new(vec![page(&[1, 2], true), page(&[3], false)]);
        let mut recorder = Recorder::default();

        let outcome = Driver::new(settings(), &rx)
            .run(&mut extractor, &mut machine, &mut recorder)
            .unwrap();

        let DriverOutcome::Completed { records, reason } = outcome else {
            panic!("expected completion");
        };
        assert_eq!(reason, Completion::Exhausted);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].version.as_deref(), Some("1.0.0"));
        assert_eq!(storage.load_job_state().progress.done, 3);
    }

    #[test]
    fn three_empty_batches_end_extraction_successfully() {
        let (_dir, storage) = test_storage();
        let (_tx, rx) = mpsc::channel();
        let mut machine = JobMachine::start(storage).unwrap();
        let mut extractor = Scripted::new(vec![
            page(&[1, 2], true),
            page(&[], true),
            page(&[2], true),
            page(&[], true),
            page(&[9], true),
        ]);
        let mut recorder = Recorder::default();

        let outcome = Driver::new(settings(), &rx)
            .run(&mut extractor, &mut machine, &mut recorder)
            .unwrap();

        let DriverOutcome::Completed { records, reason } = outcome else {
            panic!("expected completion");
        };
        assert_eq!(reason, Completion::Stalled);
        assert_eq!(records.len(), 2);
        assert_eq!(extractor.calls, 4);
        assert!(logs(&recorder).contains(&"No new records (attempt 3/3)".to_string()));
    }

    #[test]
    fn new_records_reset_the_stall_counter() {
        let (_dir, storage) = test_storage();
        let (_tx, rx) = mpsc::channel();
        let mut machine = JobMachine::start(storage).unwrap();
        let mut extractor = Scripted::new(vec![
            page(&[], true),
            page(&[], true),
            page(&[1], true),
            page(&[], true),
            page(&[], true),
            page(&[2], false),
        ]);

        let outcome = Driver::new(settings(), &rx)
            .run(&mut extractor, &mut machine, &mut Recorder::default())
            .unwrap();

        assert!(matches!(
            outcome,
            DriverOutcome::Completed {
                reason: Completion::Exhausted,
                ..
            }
        ));
    }

    #[test]
    fn stall_threshold_is_tunable() {
        let (_dir, storage) = test_storage();
        let (_tx, rx) = mpsc::channel();
        let mut machine = JobMachine::start(storage).unwrap();
        let mut extractor = Scripted::new(vec![page(&[1], true), page(&[], true)]);
        let settings = DriverSettings {
            stall_threshold: 1,
            ..settings()
        };

        let outcome = Driver::new(settings, &rx)
            .run(&mut extractor, &mut machine, &mut Recorder::default())
            .unwrap();

        assert!(matches!(
            outcome,
            DriverOutcome::Completed {
                reason: Completion::Stalled,
                ..
            }
        ));
        assert_eq!(extractor.calls, 2);
    }

    #[test]
    fn batch_limit_ends_extraction() {
        let (_dir, storage) = test_storage();
        let (_tx, rx) = mpsc::channel();
        let mut machine = JobMachine::start(storage).unwrap();
        let mut extractor = Scripted::new(vec![page(&[1], true), page(&[2], true), page(&[3], true)]);
        let settings = DriverSettings {
            max_batches: 2,
            ..settings()
        };

        let outcome = Driver::new(settings, &rx)
            .run(&mut extractor, &mut machine, &mut Recorder::default())
            .unwrap();

        let DriverOutcome::Completed { records, reason } = outcome else {
            panic!("expected completion");
        };
        assert_eq!(reason, Completion::BatchLimit);
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn extraction_error_fails_with_partial_count() {
        let (_dir, storage) = test_storage();
        let (_tx, rx) = mpsc::channel();
        let mut machine = JobMachine::start(storage).unwrap();
        let mut extractor = Scripted::new(vec![
            page(&[1, 2], true),
            Err(ExtractionError::Timeout {
                what: "page 2".into(),
                secs: 60,
            }),
        ]);

        let outcome = Driver::new(settings(), &rx)
            .run(&mut extractor, &mut machine, &mut Recorder::default())
            .unwrap();

        let DriverOutcome::Failed { error, collected } = outcome else {
            panic!("expected failure");
        };
        assert!(matches!(error, ExtractionError::Timeout { .. }));
        assert_eq!(collected, 2);
    }

    #[test]
    fn stop_takes_effect_at_next_boundary() {
        let (_dir, storage) = test_storage();
        let (tx, rx) = mpsc::channel();
        let mut machine = JobMachine::start(storage).unwrap();
        let mut extractor = Scripted::new(vec![page(&[1, 2], true), page(&[3], false)]);
        tx.send(ControlSignal::Stop).unwrap();

        let outcome = Driver::new(settings(), &rx)
            .run(&mut extractor, &mut machine, &mut Recorder::default())
            .unwrap();

        assert!(matches!(outcome, DriverOutcome::Stopped { collected: 0 }));
        assert_eq!(extractor.calls, 0);
    }

    #[test]
    fn stop_during_the_last_batch_wins_over_completion() {
        let (_dir, storage) = test_storage();
        let (tx, rx) = mpsc::channel();
        let mut machine = JobMachine::start(storage).unwrap();
        let mut extractor = StopDuringFetch {
            inner: Scripted::new(vec![page(&[1, 2], false)]),
            signals: tx,
        };

        let outcome = Driver::new(settings(), &rx)
            .run(&mut extractor, &mut machine, &mut Recorder::default())
            .unwrap();

        assert!(matches!(outcome, DriverOutcome::Stopped { collected: 2 }));
        assert_eq!(extractor.inner.calls, 1);
    }

    #[test]
    fn stop_during_a_stalled_batch_wins_over_completion() {
        let (_dir, storage) = test_storage();
        let (tx, rx) = mpsc::channel();
        let mut machine = JobMachine::start(storage).unwrap();
        let mut extractor = StopDuringFetch {
            inner: Scripted::new(vec![page(&[], true)]),
            signals: tx,
        };
        let settings = DriverSettings {
            stall_threshold: 1,
            ..settings()
        };

        let outcome = Driver::new(settings, &rx)
            .run(&mut extractor, &mut machine, &mut Recorder::default())
            .unwrap();

        assert!(matches!(outcome, DriverOutcome::Stopped { collected: 0 }));
    }

    #[test]
    fn pause_blocks_until_resume() {
        let (_dir, storage) = test_storage();
        let (tx, rx) = mpsc::channel();
        let mut machine = JobMachine::start(storage).unwrap();
        let mut extractor = Scripted::new(vec![page(&[1], false)]);
        let mut recorder = Recorder::default();
        tx.send(ControlSignal::Pause).unwrap();

        let resumer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            tx.send(ControlSignal::Resume).unwrap();
            tx
        });

        let outcome = Driver::new(settings(), &rx)
            .run(&mut extractor, &mut machine, &mut recorder)
            .unwrap();
        let _tx = resumer.join().unwrap();

        assert!(matches!(outcome, DriverOutcome::Completed { .. }));
        let logs = logs(&recorder);
        assert!(logs.contains(&"Paused".to_string()));
        assert!(logs.contains(&"Resumed".to_string()));
    }

    #[test]
    fn stop_while_paused_ends_job() {
        let (_dir, storage) = test_storage();
        let (tx, rx) = mpsc::channel();
        let mut machine = JobMachine::start(storage).unwrap();
        let mut extractor = Scripted::new(vec![page(&[1], false)]);
        tx.send(ControlSignal::Pause).unwrap();
        tx.send(ControlSignal::Stop).unwrap();

        let outcome = Driver::new(settings(), &rx)
            .run(&mut extractor, &mut machine, &mut Recorder::default())
            .unwrap();

        assert!(matches!(outcome, DriverOutcome::Stopped { .. }));
    }

    #[test]
    fn closed_channel_stops_the_job() {
        let (_dir, storage) = test_storage();
        let (tx, rx) = mpsc::channel::<ControlSignal>();
        drop(tx);
        let mut machine = JobMachine::start(storage).unwrap();
        let mut extractor = Scripted::new(vec![page(&[1], false)]);

        let outcome = Driver::new(settings(), &rx)
            .run(&mut extractor, &mut machine, &mut Recorder::default())
            .unwrap();

        assert!(matches!(outcome, DriverOutcome::Stopped { .. }));
    }

    #[test]
    fn rejected_signals_do_not_disturb_the_job() {
        let (_dir, storage) = test_storage();
        let (tx, rx) = mpsc::channel();
        let mut machine = JobMachine::start(storage).unwrap();
        let mut extractor = Scripted::new(vec![page(&[1], false)]);
        tx.send(ControlSignal::Run).unwrap();
        tx.send(ControlSignal::Resume).unwrap();

        let outcome = Driver::new(settings(), &rx)
            .run(&mut extractor, &mut machine, &mut Recorder::default())
            .unwrap();

        assert!(matches!(outcome, DriverOutcome::Completed { .. }));
    }

    #[test]
    fn duplicate_identities_do_not_count_as_new() {
        let (_dir, storage) = test_storage();
        let (_tx, rx) = mpsc::channel();
        let mut machine = JobMachine::start(storage).unwrap();
        let mut extractor = Scripted::new(vec![
            page(&[1], true),
            Ok(Page {
                records: vec![raw(1, "100040000")],
                next: None,
                total: None,
            }),
        ]);

        let outcome = Driver::new(settings(), &rx)
            .run(&mut extractor, &mut machine, &mut Recorder::default())
            .unwrap();

        let DriverOutcome::Completed { records, .. } = outcome else {
            panic!("expected completion");
        };
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].version.as_deref(), Some("1.4.0"));
    }
}
