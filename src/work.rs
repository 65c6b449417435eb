//! The production scheduler: resolves requested targets to a graph of jobs,
//! runs the jobs on the worker pool, and tracks files until every target is
//! complete or nothing more can be done.
//!
//! All graph state lives on the calling thread.  Workers only ever see a
//! `JobSpec` and hand back a `JobResult` through the pool.

use crate::config::Config;
use crate::db::{Db, Record};
use crate::env::Environment;
use crate::file::{FileError, FileId, Files};
use crate::hash::{stamp_fingerprint, Fingerprint};
use crate::job::{Job, JobId, JobOutput, JobSpec, JobState};
use crate::pool::{Finished, WorkerPool};
use crate::process::Termination;
use crate::producer::{ProducerId, Producers};
use crate::progress::{job_message, Progress};
use crate::trace;
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

/// Exit code when some job failed.
pub const EXIT_JOB_FAILED: i32 = 1;
/// Exit code when some target could not be resolved to jobs.
pub const EXIT_UNBUILDABLE: i32 = 2;
/// Exit code for a scheduler defect.
pub const EXIT_INTERNAL: i32 = 3;

/// Why a requested target was not completed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("don't know how to build {path}")]
    Unbuildable { path: String },
    #[error("dependency cycle: {}", .cycle.join(" -> "))]
    DependencyCycle { cycle: Vec<String> },
    #[error("more than one way to build {path}: {}", .producers.join(", "))]
    AmbiguousProducer { path: String, producers: Vec<String> },
    #[error("multiple producers for {path}: {first}, {second}")]
    MultipleProducers {
        path: String,
        first: String,
        second: String,
    },
    #[error("producer {producer} on {input}: {reason}")]
    ProducerConfig {
        producer: String,
        input: String,
        reason: String,
    },
    #[error("{job} failed{}", exit_suffix(.code))]
    JobFailed {
        job: String,
        output: String,
        code: Option<i32>,
    },
    #[error("{job} succeeded but did not produce {path}")]
    MissingOutput { job: String, path: String },
    #[error("{path}: {message}")]
    Environment { path: String, message: String },
    #[error("not attempted: build stopped after earlier failures")]
    Stopped,
    #[error("internal error: no progress possible toward {pending}")]
    Stalled { pending: String },
}

impl BuildError {
    pub fn exit_code(&self) -> i32 {
        match self {
            BuildError::JobFailed { .. }
            | BuildError::MissingOutput { .. }
            | BuildError::ProducerConfig { .. }
            | BuildError::Stopped => EXIT_JOB_FAILED,
            BuildError::Unbuildable { .. }
            | BuildError::DependencyCycle { .. }
            | BuildError::AmbiguousProducer { .. }
            | BuildError::MultipleProducers { .. }
            | BuildError::Environment { .. } => EXIT_UNBUILDABLE,
            BuildError::Stalled { .. } => EXIT_INTERNAL,
        }
    }
}

fn exit_suffix(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!(" (exit code {})", code),
        None => String::new(),
    }
}

fn file_error(path: &str, err: FileError) -> BuildError {
    match err {
        FileError::InvalidPath(path) => BuildError::Unbuildable { path },
        FileError::Io { path, source } => BuildError::Environment {
            path,
            message: source.to_string(),
        },
        FileError::Config(err) => BuildError::Environment {
            path: path.to_owned(),
            message: err.to_string(),
        },
        FileError::Missing(path) => BuildError::Environment {
            path,
            message: "missing".to_owned(),
        },
    }
}

/// Counts of jobs in each state, for progress display.
#[derive(Clone, Default, Debug)]
pub struct StateCounts([usize; 4]);

impl StateCounts {
    fn slot(state: JobState) -> usize {
        match state {
            JobState::Pending => 0,
            JobState::Running => 1,
            JobState::Succeeded => 2,
            JobState::Failed => 3,
        }
    }

    pub fn add(&mut self, state: JobState, delta: isize) {
        let slot = &mut self.0[Self::slot(state)];
        *slot = slot.wrapping_add_signed(delta);
    }

    pub fn get(&self, state: JobState) -> usize {
        self.0[Self::slot(state)]
    }

    pub fn total(&self) -> usize {
        self.0.iter().sum()
    }
}

#[derive(Debug, Clone)]
pub struct Options {
    pub workers: usize,
    /// Stop dispatching after this many job failures; 0 means never stop.
    pub keep_going: usize,
    /// Also build the result of every buildable test program.
    pub include_tests: bool,
    /// Source suffixes that mark a test program.
    pub test_suffixes: Vec<String>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            workers: std::thread::available_parallelism().map_or(1, usize::from),
            keep_going: 0,
            include_tests: false,
            test_suffixes: vec![".test.c".to_owned(), ".test.cc".to_owned()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetStatus {
    Complete,
    Failed(BuildError),
}

/// The outcome of a production run, one entry per requested target.
#[derive(Debug)]
pub struct ProductionReport {
    pub targets: Vec<(String, TargetStatus)>,
    /// Jobs handed to the worker pool.
    pub jobs_run: usize,
    /// Jobs skipped because their outputs were up to date.
    pub jobs_fresh: usize,
    pub jobs_failed: usize,
}

impl ProductionReport {
    pub fn success(&self) -> bool {
        self.targets
            .iter()
            .all(|(_, status)| *status == TargetStatus::Complete)
    }

    pub fn status(&self, target: &str) -> Option<&TargetStatus> {
        self.targets
            .iter()
            .find(|(name, _)| name == target)
            .map(|(_, status)| status)
    }

    pub fn errors(&self) -> impl Iterator<Item = (&str, &BuildError)> {
        self.targets.iter().filter_map(|(name, status)| match status {
            TargetStatus::Complete => None,
            TargetStatus::Failed(err) => Some((name.as_str(), err)),
        })
    }

    /// 0 if everything was built, otherwise the code of the most severe error.
    pub fn exit_code(&self) -> i32 {
        self.errors()
            .map(|(_, err)| err.exit_code())
            .max()
            .unwrap_or(0)
    }
}

/// What a worker hands back for a job.
struct JobResult {
    spec: JobSpec,
    input_stamp: Fingerprint,
    output: JobOutput,
}

type Choice = Option<(ProducerId, FileId)>;

pub struct Scheduler<'a> {
    env: Arc<dyn Environment>,
    producers: &'a Producers,
    db: &'a mut Db,
    progress: &'a mut dyn Progress,
    options: Options,
    pool: WorkerPool<JobResult>,
    files: Files,

    jobs: Vec<Job>,
    /// Job identity: at most one job per (producer, input).
    job_ids: FxHashMap<(ProducerId, FileId), JobId>,
    /// The job that will complete each wanted output.
    producer_of: FxHashMap<FileId, JobId>,
    /// Jobs blocked on each incomplete input.
    waiting: FxHashMap<FileId, Vec<JobId>>,
    /// Jobs whose input is complete, not yet dispatched.
    ready: VecDeque<JobId>,

    /// Memoized producer choice per file.
    choices: FxHashMap<FileId, Result<Choice, BuildError>>,
    /// Files whose producer choice is being computed, outermost first.
    resolving: Vec<FileId>,
    /// Lowest `resolving` position a cycle was detected against during the
    /// current choice.  Results that depend on an enclosing file being in
    /// progress are not memoized.
    cycle_floor: usize,

    file_errors: FxHashMap<FileId, BuildError>,
    job_errors: FxHashMap<JobId, BuildError>,

    counts: StateCounts,
    failures: usize,
    stopped: bool,
    jobs_run: usize,
    jobs_fresh: usize,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        env: Arc<dyn Environment>,
        producers: &'a Producers,
        db: &'a mut Db,
        progress: &'a mut dyn Progress,
        options: Options,
    ) -> Self {
        let files = Files::with_produced(db.outputs().map(str::to_owned));
        Scheduler {
            pool: WorkerPool::new(options.workers),
            env,
            producers,
            db,
            progress,
            options,
            files,
            jobs: Vec::new(),
            job_ids: FxHashMap::default(),
            producer_of: FxHashMap::default(),
            waiting: FxHashMap::default(),
            ready: VecDeque::new(),
            choices: FxHashMap::default(),
            resolving: Vec::new(),
            cycle_floor: usize::MAX,
            file_errors: FxHashMap::default(),
            job_errors: FxHashMap::default(),
            counts: StateCounts::default(),
            failures: 0,
            stopped: false,
            jobs_run: 0,
            jobs_fresh: 0,
        }
    }

    pub fn files(&self) -> &Files {
        &self.files
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    fn describe(&self, job: JobId) -> String {
        let job = &self.jobs[job.index()];
        format!(
            "{} {}",
            self.producers.get(job.producer).name,
            self.files.path(job.input)
        )
    }

    fn set_state(&mut self, job: JobId, state: JobState) {
        let job = &mut self.jobs[job.index()];
        self.counts.add(job.state, -1);
        job.state = state;
        self.counts.add(state, 1);
    }

    fn fail(&mut self, job: JobId, err: BuildError) {
        tracing::debug!(job = %self.describe(job), %err, "job failed");
        self.set_state(job, JobState::Failed);
        self.job_errors.insert(job, err);
        self.failures += 1;
        if self.options.keep_going > 0 && self.failures >= self.options.keep_going && !self.stopped
        {
            tracing::info!(failures = self.failures, "failure limit reached, stopping");
            self.stopped = true;
        }
    }

    /// Whether `path` could be built: it is on disk or some chain of
    /// producers leads to it from files that are.
    pub fn buildable(&mut self, path: &str) -> bool {
        match self.files.get(&*self.env, path) {
            Ok(id) => self.choose(id).is_ok(),
            Err(_) => false,
        }
    }

    /// Pick the job that would produce `id`.  None means no job is needed:
    /// the file is complete, or exists on disk with nothing to remake it.
    fn choose(&mut self, id: FileId) -> Result<Choice, BuildError> {
        if self.files.is_complete(id) {
            return Ok(None);
        }
        if let Some(choice) = self.choices.get(&id) {
            return choice.clone();
        }
        if let Some(pos) = self.resolving.iter().position(|&f| f == id) {
            self.cycle_floor = self.cycle_floor.min(pos);
            let mut cycle: Vec<String> = self.resolving[pos..]
                .iter()
                .map(|&f| self.files.path(f).to_owned())
                .collect();
            cycle.push(self.files.path(id).to_owned());
            return Err(BuildError::DependencyCycle { cycle });
        }

        let pos = self.resolving.len();
        let outer_floor = std::mem::replace(&mut self.cycle_floor, usize::MAX);
        self.resolving.push(id);
        let choice = self.choose_uncached(id);
        self.resolving.pop();
        let floor = self.cycle_floor;
        self.cycle_floor = outer_floor.min(floor);
        if floor >= pos {
            self.choices.insert(id, choice.clone());
        }
        choice
    }

    fn choose_uncached(&mut self, id: FileId) -> Result<Choice, BuildError> {
        let path = self.files.path(id).to_owned();
        let candidates = self.producers.candidates(&path);
        let mut errors = Vec::new();

        // Most specific first; within a group of equal specificity, only
        // producers whose input can itself be built are considered.
        let mut start = 0;
        while start < candidates.len() {
            let specificity = candidates[start].specificity;
            let end = candidates[start..]
                .iter()
                .position(|c| c.specificity != specificity)
                .map_or(candidates.len(), |n| start + n);
            let mut viable = Vec::new();
            for candidate in &candidates[start..end] {
                let input = match self.files.get(&*self.env, &candidate.input) {
                    Ok(input) => input,
                    Err(err) => {
                        errors.push(file_error(&candidate.input, err));
                        continue;
                    }
                };
                match self.choose(input) {
                    Ok(_) => viable.push((candidate.producer, input)),
                    Err(err) => errors.push(err),
                }
            }
            match viable.as_slice() {
                [] => start = end,
                [only] => {
                    tracing::debug!(
                        %path,
                        producer = %self.producers.get(only.0).name,
                        "chose producer"
                    );
                    return Ok(Some(*only));
                }
                _ => {
                    return Err(BuildError::AmbiguousProducer {
                        path,
                        producers: viable
                            .iter()
                            .map(|&(p, input)| {
                                format!("{} {}", self.producers.get(p).name, self.files.path(input))
                            })
                            .collect(),
                    })
                }
            }
        }

        // Nothing can make it.  A leftover output of an earlier build is
        // still usable as is.
        match self.env.exists(&path) {
            Ok(true) => return Ok(None),
            Ok(false) => {}
            Err(err) => {
                return Err(BuildError::Environment {
                    path,
                    message: err.to_string(),
                })
            }
        }
        if let Some(cycle) = errors
            .iter()
            .find(|e| matches!(e, BuildError::DependencyCycle { .. }))
        {
            return Err(cycle.clone());
        }
        if candidates.len() == 1 {
            if let Some(err) = errors.pop() {
                return Err(err);
            }
        }
        Err(BuildError::Unbuildable { path })
    }

    /// Resolve and expand a wanted file: find its job, then want the job's
    /// input, depth first.
    pub fn want(&mut self, id: FileId) -> Result<(), BuildError> {
        if self.files.is_complete(id) || self.producer_of.contains_key(&id) {
            return Ok(());
        }
        if let Some(err) = self.file_errors.get(&id) {
            return Err(err.clone());
        }
        let result = self.want_uncached(id);
        if let Err(err) = &result {
            tracing::debug!(path = self.files.path(id), %err, "cannot want");
            self.file_errors.insert(id, err.clone());
        }
        result
    }

    fn want_uncached(&mut self, id: FileId) -> Result<(), BuildError> {
        let (producer, input) = match self.choose(id)? {
            Some(choice) => choice,
            None => {
                if !self.files.is_complete(id) {
                    self.files.promote_to_source(id);
                }
                return Ok(());
            }
        };
        let job = self.add_job(producer, input, id)?;
        if self.jobs[job.index()].state == JobState::Failed {
            return Ok(());
        }
        // The input was shown buildable by choose(), so there's no cycle
        // left to run into here.
        self.want(input)?;
        if self.files.is_complete(input) {
            self.ready.push_back(job);
        } else {
            self.waiting.entry(input).or_default().push(job);
        }
        Ok(())
    }

    /// Create the job for (producer, input), which must produce `wanted`.
    fn add_job(
        &mut self,
        producer: ProducerId,
        input: FileId,
        wanted: FileId,
    ) -> Result<JobId, BuildError> {
        if let Some(&job) = self.job_ids.get(&(producer, input)) {
            if self.jobs[job.index()].state == JobState::Failed {
                // A misconfigured job; it fails every output asked of it.
                self.producer_of.insert(wanted, job);
                return Ok(job);
            }
            // Otherwise only reachable if `wanted` isn't among the job's
            // outputs.
            return Err(BuildError::ProducerConfig {
                producer: self.producers.get(producer).name.clone(),
                input: self.files.path(input).to_owned(),
                reason: format!(
                    "{} is not among the outputs of {}",
                    self.files.path(wanted),
                    self.describe(job)
                ),
            });
        }
        let producers = self.producers;
        let p = producers.get(producer);
        let input_path = self.files.path(input).to_owned();
        let id = JobId::from(self.jobs.len());

        let outputs = match p.outputs_for(&input_path) {
            Ok(outputs) => outputs,
            Err(err) => {
                // The job can never run; it fails without affecting any
                // other job.
                self.jobs.push(Job::new(producer, input, vec![wanted]));
                self.counts.add(JobState::Pending, 1);
                self.job_ids.insert((producer, input), id);
                self.producer_of.insert(wanted, id);
                self.fail(
                    id,
                    BuildError::ProducerConfig {
                        producer: err.producer,
                        input: input_path,
                        reason: err.reason,
                    },
                );
                return Ok(id);
            }
        };

        let second = format!("{} {}", p.name, input_path);
        let mut output_ids = Vec::with_capacity(outputs.len());
        for out in &outputs {
            let out_id = self
                .files
                .get(&*self.env, out)
                .map_err(|err| file_error(out, err))?;
            let first = match self.producer_of.get(&out_id) {
                Some(&other) => Some(self.describe(other)),
                None if self.files.file(out_id).is_source() => Some("source file".to_owned()),
                None => None,
            };
            if let Some(first) = first {
                return Err(BuildError::MultipleProducers {
                    path: out.clone(),
                    first,
                    second,
                });
            }
            output_ids.push(out_id);
        }
        if !output_ids.contains(&wanted) {
            return Err(BuildError::ProducerConfig {
                producer: p.name.clone(),
                input: input_path,
                reason: format!("does not produce {}", self.files.path(wanted)),
            });
        }

        for &out in &output_ids {
            self.producer_of.insert(out, id);
        }
        self.jobs.push(Job::new(producer, input, output_ids));
        self.job_ids.insert((producer, input), id);
        self.counts.add(JobState::Pending, 1);
        Ok(id)
    }

    fn dispatch_ready(&mut self) {
        while !self.stopped {
            let job = match self.ready.pop_front() {
                Some(job) => job,
                None => break,
            };
            self.dispatch(job);
        }
    }

    /// Run a job whose input is complete, unless its outputs are up to date.
    fn dispatch(&mut self, id: JobId) {
        let job = &self.jobs[id.index()];
        let outputs = job
            .outputs
            .iter()
            .map(|&out| self.files.path(out).to_owned())
            .collect();
        let spec = JobSpec::new(
            id,
            self.producers.get(job.producer),
            self.files.file(job.input),
            outputs,
        );

        let input_stamp = match self.env.stat(&spec.input) {
            Ok(stamp) => stamp_fingerprint(&spec.input, stamp),
            Err(err) => {
                let path = spec.input.clone();
                self.fail(
                    id,
                    BuildError::Environment {
                        path,
                        message: err.to_string(),
                    },
                );
                return;
            }
        };

        self.set_state(id, JobState::Running);
        match self.db.fresh(&*self.env, &spec, input_stamp) {
            Ok(Some(extras)) => {
                tracing::debug!(job = %job_message(&spec), "up to date");
                self.jobs_fresh += 1;
                self.complete_outputs(id, &spec, extras, None);
                return;
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(job = %job_message(&spec), %err, "freshness check failed");
            }
        }

        self.progress.job_started(id, &spec);
        self.jobs_run += 1;
        let env = self.env.clone();
        self.pool.queue(move || {
            let output = spec.run(&*env);
            JobResult {
                spec,
                input_stamp,
                output,
            }
        });
    }

    fn process(&mut self, finished: Finished<JobResult>) {
        let JobResult {
            spec,
            input_stamp,
            output,
        } = finished.value;
        trace::span(&job_message(&spec), finished.worker, finished.span);
        self.progress.job_finished(spec.id, &spec, &output);
        if !output.success() {
            let job = job_message(&spec);
            let interrupted = output.termination == Termination::Interrupted;
            let code = output.code;
            let output = String::from_utf8_lossy(&output.output).into_owned();
            self.fail(spec.id, BuildError::JobFailed { job, output, code });
            self.record_failed(&spec);
            if interrupted && !self.stopped {
                tracing::info!(job = %job_message(&spec), "interrupted, stopping");
                self.stopped = true;
            }
            return;
        }
        self.complete_outputs(spec.id, &spec, output.extra, Some(input_stamp));
    }

    /// Mark every output of a successful job complete, record it in the db
    /// if it actually ran, and unblock the jobs waiting on the outputs.
    fn complete_outputs(
        &mut self,
        id: JobId,
        spec: &JobSpec,
        extras: Vec<(String, Config)>,
        ran: Option<Fingerprint>,
    ) {
        let outputs = self.jobs[id.index()].outputs.clone();
        for &out in &outputs {
            let path = self.files.path(out).to_owned();
            match self.env.exists(&path) {
                Ok(true) => {}
                Ok(false) => {
                    let job = job_message(spec);
                    self.fail(id, BuildError::MissingOutput { job, path });
                    if ran.is_some() {
                        self.record_failed(spec);
                    }
                    return;
                }
                Err(err) => {
                    let message = err.to_string();
                    self.fail(id, BuildError::Environment { path, message });
                    return;
                }
            }
        }

        let config_id = spec.config_id();
        let dep_stamps = match ran {
            Some(_) => self.dep_stamps(spec, &extras),
            None => BTreeMap::new(),
        };
        for &out in &outputs {
            let path = self.files.path(out).to_owned();
            let extra = extras
                .iter()
                .find(|(p, _)| *p == path)
                .map(|(_, extra)| extra.clone())
                .unwrap_or_default();
            if let Err(err) = self.files.complete(&*self.env, out, Some(id), &extra) {
                let err = file_error(&path, err);
                self.fail(id, err);
                return;
            }
            let file = self.files.file(out);
            tracing::debug!(
                %path,
                job = ?file.producer(),
                config = ?file.config_fingerprint(),
                "complete"
            );
            if let Some(input_stamp) = ran {
                self.record(spec, &path, config_id, input_stamp, &dep_stamps, extra);
            }
            if let Some(unblocked) = self.waiting.remove(&out) {
                self.ready.extend(unblocked);
            }
        }
        self.set_state(id, JobState::Succeeded);
    }

    /// Stamps of the files a job read besides its input, as they are now.
    fn dep_stamps(
        &self,
        spec: &JobSpec,
        extras: &[(String, Config)],
    ) -> BTreeMap<String, Fingerprint> {
        let mut stamps = BTreeMap::new();
        for dep in self.db.dependencies(spec, extras) {
            match self.env.stat(&dep) {
                Ok(stamp) => {
                    let fp = stamp_fingerprint(&dep, stamp);
                    stamps.insert(dep, fp);
                }
                // Left out, so the next freshness check reruns the job.
                Err(err) => tracing::warn!(path = %dep, %err, "stat dependency"),
            }
        }
        stamps
    }

    fn record(
        &mut self,
        spec: &JobSpec,
        path: &str,
        config_id: Fingerprint,
        input_stamp: Fingerprint,
        dep_stamps: &BTreeMap<String, Fingerprint>,
        extra: Config,
    ) {
        let stamp = match self.env.stat(path) {
            Ok(stamp) => stamp,
            Err(err) => {
                tracing::warn!(path, %err, "not recording output");
                return;
            }
        };
        let record = Record {
            path: path.to_owned(),
            job: spec.name.clone(),
            input: spec.input.clone(),
            config_id,
            input_stamp,
            output_stamp: stamp_fingerprint(path, stamp),
            dep_stamps: dep_stamps.clone(),
            extra,
        };
        if let Err(err) = self.db.record(record) {
            tracing::warn!(path, %err, "not recording output");
        }
    }

    /// Whatever a failed job left behind is still a produced file, not a
    /// source.  Record it with stamps that never match so it gets rebuilt.
    fn record_failed(&mut self, spec: &JobSpec) {
        for out in &spec.outputs {
            if !matches!(self.env.exists(out), Ok(true)) {
                continue;
            }
            let record = Record {
                path: out.clone(),
                job: spec.name.clone(),
                input: spec.input.clone(),
                config_id: Fingerprint(0),
                input_stamp: Fingerprint(0),
                output_stamp: Fingerprint(0),
                dep_stamps: BTreeMap::new(),
                extra: Config::new(),
            };
            if let Err(err) = self.db.record(record) {
                tracing::warn!(path = %out, %err, "not recording output");
            }
        }
    }

    fn flush_db(&mut self) {
        if let Err(err) = self.db.flush(&*self.env) {
            tracing::warn!(%err, "writing build log");
            self.progress.log(&format!("jobgraph: warning: {}", err));
        }
    }

    /// Dispatch and drain until nothing more can happen.
    fn converge(&mut self) {
        loop {
            self.dispatch_ready();
            self.progress.update(&self.counts);
            if !self.pool.has_more_results() {
                break;
            }
            for finished in self.pool.pop() {
                self.process(finished);
            }
            self.flush_db();
            if self.pool.crashed_workers() > 0 && !self.stopped {
                tracing::error!("worker thread died, stopping");
                self.stopped = true;
            }
        }

        // Results that will never arrive.
        let lost: Vec<JobId> = (0..self.jobs.len())
            .map(JobId::from)
            .filter(|id| self.jobs[id.index()].state == JobState::Running)
            .collect();
        for id in lost {
            let job = self.describe(id);
            self.fail(
                id,
                BuildError::JobFailed {
                    job,
                    output: "worker thread exited abnormally".to_owned(),
                    code: None,
                },
            );
        }
        self.progress.update(&self.counts);
        self.flush_db();
    }

    /// Classify a target after convergence by walking down its chain of
    /// jobs to the first thing that went wrong.
    fn status(&self, target: FileId) -> TargetStatus {
        let stalled = || {
            TargetStatus::Failed(BuildError::Stalled {
                pending: self.files.path(target).to_owned(),
            })
        };
        let mut file = target;
        // Chains are acyclic, so this bound is never reached.
        for _ in 0..=self.files.len() {
            if self.files.is_complete(file) {
                if file == target {
                    return TargetStatus::Complete;
                }
                // The job consuming `file` never ran.
                if self.stopped {
                    return TargetStatus::Failed(BuildError::Stopped);
                }
                return stalled();
            }
            if let Some(err) = self.file_errors.get(&file) {
                return TargetStatus::Failed(err.clone());
            }
            let job = match self.producer_of.get(&file) {
                Some(&job) => job,
                None => return stalled(),
            };
            match self.jobs[job.index()].state {
                JobState::Failed => {
                    return match self.job_errors.get(&job) {
                        Some(err) => TargetStatus::Failed(err.clone()),
                        None => stalled(),
                    }
                }
                JobState::Pending => file = self.jobs[job.index()].input,
                JobState::Running | JobState::Succeeded => return stalled(),
            }
        }
        stalled()
    }

    /// Build `targets` and report the outcome of each.
    pub fn run(&mut self, targets: &[String]) -> ProductionReport {
        let mut wanted = Vec::with_capacity(targets.len());
        trace::scope("resolve", || {
            for name in targets {
                let id = self
                    .files
                    .get(&*self.env, name)
                    .map_err(|err| file_error(name, err));
                if let Ok(id) = &id {
                    // Errors are recorded against the file and reported below.
                    let _ = self.want(*id);
                }
                wanted.push((name.clone(), id));
            }
        });
        tracing::info!(
            targets = targets.len(),
            jobs = self.jobs.len(),
            ready = self.ready.len(),
            workers = self.pool.worker_count(),
            "resolved"
        );

        trace::scope("converge", || self.converge());

        let targets = wanted
            .into_iter()
            .map(|(name, id)| {
                let status = match id {
                    Ok(id) => self.status(id),
                    Err(err) => TargetStatus::Failed(err),
                };
                (name, status)
            })
            .collect();
        ProductionReport {
            targets,
            jobs_run: self.jobs_run,
            jobs_fresh: self.jobs_fresh,
            jobs_failed: self.counts.get(JobState::Failed),
        }
    }
}

/// The targets for every test program under the root that can be built.
fn test_targets(scheduler: &mut Scheduler, suffixes: &[String]) -> Vec<String> {
    let files = match scheduler.env.list_files() {
        Ok(files) => files,
        Err(err) => {
            tracing::warn!(%err, "listing files for tests");
            return Vec::new();
        }
    };
    let mut targets = Vec::new();
    for path in files {
        let stem = match suffixes.iter().find_map(|s| path.strip_suffix(s.as_str())) {
            Some(stem) if !stem.is_empty() => stem,
            _ => continue,
        };
        let target = format!("{}.test.result", stem);
        if scheduler.buildable(&target) {
            targets.push(target);
        } else {
            tracing::debug!(%path, "skipping test that can't be built");
        }
    }
    targets
}

/// Produce `targets`: build the job graph on demand, run jobs on a pool of
/// `options.workers` threads, and report the outcome per target.  With
/// `options.include_tests`, every buildable test program's result is
/// produced as well.
pub fn produce(
    env: Arc<dyn Environment>,
    producers: &Producers,
    db: &mut Db,
    progress: &mut dyn Progress,
    options: Options,
    targets: &[String],
) -> ProductionReport {
    let include_tests = options.include_tests;
    let suffixes = options.test_suffixes.clone();
    let mut scheduler = Scheduler::new(env, producers, db, progress, options);
    let mut targets = targets.to_vec();
    if include_tests {
        for test in test_targets(&mut scheduler, &suffixes) {
            if !targets.contains(&test) {
                targets.push(test);
            }
        }
    }
    scheduler.run(&targets)
}
