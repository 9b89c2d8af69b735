use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::BufRead;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use camino::Utf8PathBuf;

use crate::domain::{JobConfig, Label, PdbId, UniprotId};
use crate::error::PdbFetchError;
use crate::layout::Layout;
use crate::rcsb::ArchiveClient;
use crate::sink::LogSink;
use crate::split::{SplitOptions, split_chains};
use crate::uniprot::UniprotClient;

/// Terminal outcome of one job. Written exactly once by the worker that ran
/// the job, observed by dependents through its [`Promise`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JobOutcome {
    pub succeeded: bool,
    pub overwritten: bool,
    pub skipped: bool,
}

/// Single-assignment completion signal. `set` fires exactly once; any
/// number of dependents may `wait` before or after that.
struct Promise {
    outcome: Mutex<Option<JobOutcome>>,
    ready: Condvar,
}

impl Promise {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn set(&self, outcome: JobOutcome) {
        let mut slot = self.outcome.lock().unwrap();
        debug_assert!(slot.is_none(), "job outcome set twice");
        *slot = Some(outcome);
        self.ready.notify_all();
    }

    fn wait(&self) -> JobOutcome {
        let mut slot = self.outcome.lock().unwrap();
        loop {
            if let Some(outcome) = *slot {
                return outcome;
            }
            slot = self.ready.wait(slot).unwrap();
        }
    }
}

/// End-of-run rendezvous. Starts at one (the input reader's own count),
/// gains one count per queued job, and releases `wait` only after the
/// reader and every job have signalled.
struct Countdown {
    remaining: Mutex<usize>,
    zero: Condvar,
}

impl Countdown {
    fn new() -> Self {
        Self {
            remaining: Mutex::new(1),
            zero: Condvar::new(),
        }
    }

    fn add(&self) {
        *self.remaining.lock().unwrap() += 1;
    }

    fn signal(&self) {
        let mut remaining = self.remaining.lock().unwrap();
        *remaining -= 1;
        if *remaining == 0 {
            self.zero.notify_all();
        }
    }

    fn wait(&self) {
        let mut remaining = self.remaining.lock().unwrap();
        while *remaining > 0 {
            remaining = self.zero.wait(remaining).unwrap();
        }
    }
}

/// Admission gate bounding concurrent archive transfers. Copy and split
/// jobs do not pass through it; this is the sole download limiter.
struct DownloadGate {
    permits: Mutex<usize>,
    available: Condvar,
}

struct GatePermit<'a> {
    gate: &'a DownloadGate,
}

impl DownloadGate {
    fn new(limit: usize) -> Self {
        Self {
            permits: Mutex::new(limit.max(1)),
            available: Condvar::new(),
        }
    }

    fn acquire(&self) -> GatePermit<'_> {
        let mut permits = self.permits.lock().unwrap();
        while *permits == 0 {
            permits = self.available.wait(permits).unwrap();
        }
        *permits -= 1;
        GatePermit { gate: self }
    }
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        *self.gate.permits.lock().unwrap() += 1;
        self.gate.available.notify_one();
    }
}

/// The first job queued for a PDB id. Every later occurrence of the same id
/// derives its output from this job's file after its promise fires.
struct PrimaryJob {
    config: JobConfig,
    done: Promise,
}

/// Everything a worker thread needs; shared by reference across jobs.
struct RunContext {
    layout: Layout,
    overwrite: bool,
    archive: Arc<dyn ArchiveClient>,
    sink: Arc<dyn LogSink>,
    countdown: Countdown,
    gate: DownloadGate,
}

/// Per-run dedup state. Insert-if-absent on these three maps is the only
/// synchronization between the reader and already-running jobs; no lock is
/// held across network or disk I/O.
#[derive(Default)]
struct DedupState {
    primaries: Mutex<HashMap<String, Arc<PrimaryJob>>>,
    copy_targets: Mutex<HashSet<Utf8PathBuf>>,
    split_targets: Mutex<HashSet<Utf8PathBuf>>,
}

pub struct Scheduler<U: UniprotClient> {
    layout: Layout,
    overwrite: bool,
    max_downloads: usize,
    archive: Arc<dyn ArchiveClient>,
    uniprot: U,
    sink: Arc<dyn LogSink>,
}

impl<U: UniprotClient> Scheduler<U> {
    pub fn new(
        layout: Layout,
        overwrite: bool,
        max_downloads: usize,
        archive: Arc<dyn ArchiveClient>,
        uniprot: U,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            layout,
            overwrite,
            max_downloads,
            archive,
            uniprot,
            sink,
        }
    }

    /// Consumes the input list, dispatching jobs as lines parse, and blocks
    /// until every queued job has signalled. Per-entry failures are logged
    /// and never fail the run; only setup errors do.
    pub fn run(&self, input: impl BufRead) -> Result<(), PdbFetchError> {
        fs::create_dir_all(self.layout.out_root().as_std_path()).map_err(|err| {
            PdbFetchError::Filesystem(format!(
                "create output directory {}: {err}",
                self.layout.out_root()
            ))
        })?;

        let ctx = Arc::new(RunContext {
            layout: self.layout.clone(),
            overwrite: self.overwrite,
            archive: self.archive.clone(),
            sink: self.sink.clone(),
            countdown: Countdown::new(),
            gate: DownloadGate::new(self.max_downloads),
        });
        let state = DedupState::default();

        for (index, line) in input.lines().enumerate() {
            let line =
                line.map_err(|err| PdbFetchError::Filesystem(format!("read input: {err}")))?;
            let line_num = index + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            self.process_line(trimmed, line_num, &ctx, &state);
        }

        ctx.countdown.signal();
        ctx.countdown.wait();
        Ok(())
    }

    fn process_line(&self, line: &str, line_num: usize, ctx: &Arc<RunContext>, state: &DedupState) {
        let (label, entries) = match line.split_once(':') {
            Some(_) if line.matches(':').count() > 1 => {
                self.sink
                    .error(&format!("Only one label is allowed (line {line_num})"));
                return;
            }
            Some((raw_label, rest)) => {
                let raw_label = raw_label.trim();
                if raw_label.is_empty() {
                    // A bare colon contributes no path segment.
                    (None, rest.trim_start())
                } else {
                    match raw_label.parse::<Label>() {
                        Ok(label) => (Some(label), rest.trim_start()),
                        Err(_) => {
                            self.sink.error(&format!(
                                "Label '{raw_label}' contains reserved characters (line {line_num})"
                            ));
                            return;
                        }
                    }
                }
            }
            None => (None, line),
        };

        let mut seen = HashSet::new();
        for token in entries.split_whitespace() {
            if !seen.insert(token) {
                continue;
            }
            self.process_token(token, &label, line_num, ctx, state);
        }
    }

    fn process_token(
        &self,
        token: &str,
        label: &Option<Label>,
        line_num: usize,
        ctx: &Arc<RunContext>,
        state: &DedupState,
    ) {
        let length = token.chars().count();
        if length == 4 {
            match token.parse::<PdbId>() {
                Ok(pdb) => {
                    self.try_queue(JobConfig::new(pdb, None, label.clone()), line_num, ctx, state);
                }
                Err(_) => self
                    .sink
                    .error(&format!("Invalid PDB entry '{token}' (line {line_num})")),
            }
        } else if (5..15).contains(&length) {
            let uniprot: UniprotId = match token.parse() {
                Ok(id) => id,
                Err(_) => {
                    self.sink
                        .error(&format!("Invalid UniProt entry '{token}' (line {line_num})"));
                    return;
                }
            };
            match self.uniprot.structures(&uniprot) {
                Ok(structures) if structures.is_empty() => self.sink.error(&format!(
                    "Unable to resolve UniProt entry '{token}' (line {line_num})"
                )),
                Ok(structures) => {
                    for structure in structures {
                        let config = JobConfig::new(
                            structure.pdb_id,
                            Some(uniprot.clone()),
                            label.clone(),
                        );
                        self.try_queue(config, line_num, ctx, state);
                    }
                }
                Err(err) => self.sink.error(&format!(
                    "Unable to resolve UniProt entry '{token}' (line {line_num}): {err}"
                )),
            }
        } else {
            self.sink
                .error(&format!("Unrecognized entry '{token}' (line {line_num})"));
        }
    }

    /// Dedups one config against everything queued so far and dispatches
    /// whatever jobs its canonical targets still require. Returns whether
    /// any job was queued.
    fn try_queue(
        &self,
        config: JobConfig,
        line_num: usize,
        ctx: &Arc<RunContext>,
        state: &DedupState,
    ) -> bool {
        let parent = {
            let mut primaries = state.primaries.lock().unwrap();
            match primaries.entry(config.pdb.as_str().to_string()) {
                Entry::Vacant(slot) => {
                    let primary = Arc::new(PrimaryJob {
                        config: config.clone(),
                        done: Promise::new(),
                    });
                    slot.insert(primary.clone());
                    drop(primaries);

                    ctx.countdown.add();
                    spawn_download(primary.clone(), line_num, ctx.clone());

                    // The first occurrence of a PDB id always splits.
                    if self.layout.split {
                        ctx.countdown.add();
                        spawn_split(config, line_num, primary, ctx.clone());
                    }
                    return true;
                }
                Entry::Occupied(slot) => slot.get().clone(),
            }
        };

        let target_fragment_dir = self.layout.resolve(&config, false, false, false);
        let target_original = self.layout.resolve(&config, true, false, true);
        let parent_fragment_dir = self.layout.resolve(&parent.config, false, false, false);
        let parent_original = self.layout.resolve(&parent.config, true, false, true);

        // The primary claims its own targets implicitly: an occurrence that
        // collapses onto the primary's outputs queues nothing. With split
        // enabled, an identical original path may still need its own split
        // when the fragment dirs differ, so only the non-split case exits
        // on the original-path match.
        if parent.config == config
            || parent_fragment_dir == target_fragment_dir
            || (!self.layout.split && parent_original == target_original)
        {
            return false;
        }

        let mut queued = false;

        if parent_original != target_original
            && state
                .copy_targets
                .lock()
                .unwrap()
                .insert(target_original.clone())
        {
            ctx.countdown.add();
            spawn_copy(config.clone(), line_num, parent.clone(), ctx.clone());
            queued = true;
        }

        if self.layout.split
            && state
                .split_targets
                .lock()
                .unwrap()
                .insert(target_fragment_dir)
        {
            ctx.countdown.add();
            spawn_split(config, line_num, parent, ctx.clone());
            queued = true;
        }

        queued
    }
}

fn spawn_download(primary: Arc<PrimaryJob>, line_num: usize, ctx: Arc<RunContext>) {
    thread::spawn(move || {
        let dir = ctx.layout.resolve(&primary.config, true, true, false);
        let file = dir.join(format!("{}.pdb", primary.config.pdb));
        let exists = file.as_std_path().exists();

        let outcome = if !ctx.overwrite && exists {
            ctx.sink
                .warn(&format!("Skipped existing '{file}' (line {line_num})"));
            JobOutcome {
                succeeded: true,
                overwritten: false,
                skipped: true,
            }
        } else {
            let fetched = (|| -> Result<(), PdbFetchError> {
                if !exists {
                    fs::create_dir_all(dir.as_std_path()).map_err(|err| {
                        PdbFetchError::Filesystem(format!("create {dir}: {err}"))
                    })?;
                }
                ctx.sink.info(&format!("Resolving {}", primary.config.pdb));
                let _permit = ctx.gate.acquire();
                ctx.archive.fetch_structure(&primary.config.pdb, &file)
            })();

            match fetched {
                Ok(()) => {
                    if exists {
                        ctx.sink
                            .warn(&format!("Overwrote '{file}' (line {line_num})"));
                    } else {
                        ctx.sink.info(&format!("Downloaded '{file}'"));
                    }
                    JobOutcome {
                        succeeded: true,
                        overwritten: exists,
                        skipped: false,
                    }
                }
                Err(err) => {
                    ctx.sink.error(&format!(
                        "Unable to download {}.pdb (line {line_num}): {err}",
                        primary.config.pdb
                    ));
                    JobOutcome::default()
                }
            }
        };

        primary.done.set(outcome);
        ctx.countdown.signal();
    });
}

fn spawn_copy(config: JobConfig, line_num: usize, parent: Arc<PrimaryJob>, ctx: Arc<RunContext>) {
    thread::spawn(move || {
        let dir = ctx.layout.resolve(&config, true, true, false);
        let file = dir.join(format!("{}.pdb", config.pdb));
        let exists = file.as_std_path().exists();

        if !ctx.overwrite && exists {
            ctx.sink
                .warn(&format!("Skipped existing '{file}' (line {line_num})"));
        } else if !parent.done.wait().succeeded {
            ctx.sink.warn(&format!(
                "Skipped '{file}' due to previous failure (line {line_num})"
            ));
        } else {
            let copied = (|| -> Result<(), PdbFetchError> {
                if !exists {
                    fs::create_dir_all(dir.as_std_path()).map_err(|err| {
                        PdbFetchError::Filesystem(format!("create {dir}: {err}"))
                    })?;
                }
                let source = ctx.layout.resolve(&parent.config, true, true, true);
                fs::copy(source.as_std_path(), file.as_std_path())
                    .map_err(|err| PdbFetchError::Filesystem(err.to_string()))?;
                Ok(())
            })();

            match copied {
                Ok(()) if exists => ctx
                    .sink
                    .warn(&format!("Overwrote '{file}' (line {line_num})")),
                Ok(()) => ctx.sink.info(&format!("Copied '{file}'")),
                Err(err) => ctx.sink.error(&format!(
                    "Unable to create '{file}' (line {line_num}): {err}"
                )),
            }
        }

        ctx.countdown.signal();
    });
}

fn spawn_split(config: JobConfig, line_num: usize, parent: Arc<PrimaryJob>, ctx: Arc<RunContext>) {
    thread::spawn(move || {
        if !parent.done.wait().succeeded {
            ctx.sink.warn(&format!(
                "Skipped splitting {}.pdb due to previous failure (line {line_num})",
                config.pdb
            ));
        } else {
            let source = ctx.layout.resolve(&parent.config, true, true, true);
            let fragment_dir = ctx.layout.resolve(&config, false, true, false);
            let options = SplitOptions {
                entry_prefix: false,
                overwrite: ctx.overwrite,
                copy_common_records: false,
            };

            let outcome = fs::create_dir_all(fragment_dir.as_std_path())
                .map_err(|err| PdbFetchError::Filesystem(format!("create {fragment_dir}: {err}")))
                .and_then(|_| {
                    split_chains(
                        config.pdb.as_str(),
                        &source,
                        &fragment_dir,
                        &options,
                        ctx.sink.as_ref(),
                    )
                });

            if let Err(err) = outcome {
                ctx.sink.error(&format!(
                    "Unsuccessful split of '{source}' (line {line_num}): {err}"
                ));
            }
        }

        ctx.countdown.signal();
    });
}
