//! Build progress tracking and reporting, for the purpose of display to the
//! user.

use crate::job::{JobId, JobOutput, JobSpec, JobState};
use crate::process::Termination;
use crate::work::StateCounts;
use std::io::Write;

/// Compute the message to display on the console for a given job.
pub fn job_message(job: &JobSpec) -> String {
    format!("{} {}", job.name, job.input)
}

/// Trait for build progress notifications.
pub trait Progress {
    /// Called as jobs move through their states.
    fn update(&mut self, counts: &StateCounts);

    /// Called when a job is handed to the worker pool.
    fn job_started(&mut self, id: JobId, job: &JobSpec);

    /// Called when a job's result comes back from the pool.
    fn job_finished(&mut self, id: JobId, job: &JobSpec, result: &JobOutput);

    /// Log a line of output without corrupting the progress display.
    /// This line is persisted beyond further progress updates; for example
    /// a failed job's message must survive the work done after it.
    fn log(&mut self, msg: &str);
}

fn write_output(output: &[u8]) {
    let mut stdout = std::io::stdout().lock();
    // Console output is best effort.
    let _ = stdout.write_all(output);
    if !output.ends_with(b"\n") {
        let _ = stdout.write_all(b"\n");
    }
}

/// Shared handling of a finished job: failures always show their message
/// and output, successes only if they printed something.
fn report_finished(progress: &mut dyn Progress, job: &JobSpec, result: &JobOutput, quiet: bool) {
    match result.termination {
        Termination::Success => {
            if !result.output.is_empty() && !quiet {
                progress.log(&job_message(job));
            }
        }
        Termination::Interrupted => progress.log(&format!("interrupted: {}", job_message(job))),
        Termination::Failure => progress.log(&format!("failed: {}", job_message(job))),
    }
    if !result.output.is_empty() {
        write_output(&result.output);
    }
}

fn started_message(job: &JobSpec, verbose: bool) -> String {
    if verbose {
        if let Ok(cmd) = job.command_line() {
            return cmd.to_string();
        }
    }
    job_message(job)
}

/// Progress implementation for "dumb" console, without any overprinting.
#[derive(Default)]
pub struct DumbConsoleProgress {
    /// Whether to print command lines of started programs.
    verbose: bool,

    /// The id of the last job printed, used to avoid printing it twice
    /// when it finishes right after starting.
    last_started: Option<JobId>,
}

impl DumbConsoleProgress {
    pub fn new(verbose: bool) -> Self {
        DumbConsoleProgress {
            verbose,
            last_started: None,
        }
    }
}

impl Progress for DumbConsoleProgress {
    fn update(&mut self, _counts: &StateCounts) {
        // ignore
    }

    fn job_started(&mut self, id: JobId, job: &JobSpec) {
        self.log(&started_message(job, self.verbose));
        self.last_started = Some(id);
    }

    fn job_finished(&mut self, id: JobId, job: &JobSpec, result: &JobOutput) {
        let quiet = self.last_started == Some(id);
        report_finished(self, job, result, quiet);
    }

    fn log(&mut self, msg: &str) {
        println!("{}", msg);
    }
}

/// Progress implementation that keeps a single "[done/total] running: n"
/// status line at the bottom of a terminal, overprinting it on each update.
pub struct StatusLineProgress {
    verbose: bool,
    counts: StateCounts,
    /// Whether the status line is currently on screen.
    shown: bool,
}

impl StatusLineProgress {
    pub fn new(verbose: bool) -> Self {
        StatusLineProgress {
            verbose,
            counts: StateCounts::default(),
            shown: false,
        }
    }

    fn clear(&mut self) {
        if self.shown {
            print!("\r\x1b[K");
            self.shown = false;
        }
    }

    fn draw(&mut self) {
        self.clear();
        print!("{}", status_line(&self.counts));
        let _ = std::io::stdout().flush();
        self.shown = true;
    }
}

impl Progress for StatusLineProgress {
    fn update(&mut self, counts: &StateCounts) {
        self.counts = counts.clone();
        self.draw();
    }

    fn job_started(&mut self, _id: JobId, job: &JobSpec) {
        if self.verbose {
            self.log(&started_message(job, true));
        }
    }

    fn job_finished(&mut self, _id: JobId, job: &JobSpec, result: &JobOutput) {
        self.clear();
        report_finished(self, job, result, false);
        self.draw();
    }

    fn log(&mut self, msg: &str) {
        self.clear();
        println!("{}", msg);
        self.draw();
    }
}

impl Drop for StatusLineProgress {
    fn drop(&mut self) {
        if self.shown {
            println!();
        }
    }
}

fn status_line(counts: &StateCounts) -> String {
    let done = counts.get(JobState::Succeeded) + counts.get(JobState::Failed);
    let mut line = format!(
        "[{}/{}] running: {}",
        done,
        counts.total(),
        counts.get(JobState::Running)
    );
    let failed = counts.get(JobState::Failed);
    if failed > 0 {
        line.push_str(&format!(", failed: {}", failed));
    }
    line
}

/// Whether stdout is a terminal we can overprint on.
#[cfg(unix)]
pub fn use_status_line() -> bool {
    // Safety: isatty only inspects the descriptor.
    unsafe { libc::isatty(/* stdout */ 1) == 1 }
}

#[cfg(not(unix))]
pub fn use_status_line() -> bool {
    false
}
