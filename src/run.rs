//! Command-line entry point: loads the project, opens the build log and
//! produces the requested targets.

use crate::config::{ProjectConfig, PROJECT_CONFIG};
use crate::db::{Db, DB_FILE};
use crate::env::{Environment, RealEnvironment};
use crate::producer::Producers;
use crate::progress::{self, DumbConsoleProgress, Progress, StatusLineProgress};
use crate::work::{self, Options, ProductionReport};
use crate::{process, trace};
use anyhow::anyhow;
use std::path::Path;
use std::sync::{Arc, Once};

/// Environment variable holding a `tracing` filter, e.g. `jobgraph=debug`.
pub const LOG_ENV: &str = "JOBGRAPH_LOG";

static TRACING_INIT: Once = Once::new();

/// Install a log subscriber, but only if JOBGRAPH_LOG is set.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        if std::env::var(LOG_ENV).is_ok() {
            let filter = EnvFilter::from_env(LOG_ENV);
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_level(true).with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
    });
}

#[derive(argh::FromArgs)]
/// jobgraph, an incremental build job scheduler
struct Opts {
    /// chdir before running
    #[argh(option, short = 'C')]
    chdir: Option<String>,

    /// project config file [default=jobgraph.json]
    #[argh(option, short = 'f')]
    config: Option<String>,

    /// debugging tools
    #[argh(option, short = 'd')]
    debug: Option<String>,

    /// parallelism [default uses system thread count]
    #[argh(option, short = 'j')]
    parallelism: Option<usize>,

    /// stop after N failing jobs (0 means never) [default=0]
    #[argh(option, short = 'k')]
    keep_going: Option<usize>,

    /// also produce the result of every buildable test
    #[argh(switch, short = 't')]
    tests: bool,

    /// print executed command lines
    #[argh(switch, short = 'v')]
    verbose: bool,

    /// targets to produce
    #[argh(positional)]
    targets: Vec<String>,
}

fn print_report(report: &ProductionReport) {
    for (target, err) in report.errors() {
        println!("jobgraph: {}: {}", target, err);
    }
    if !report.success() {
        return;
    }
    match report.jobs_run {
        // Special case: don't print numbers when no work done.
        0 => println!("jobgraph: no work to do"),
        n => println!("jobgraph: ran {} jobs, now up to date", n),
    }
}

fn run_impl() -> anyhow::Result<i32> {
    let opts: Opts = argh::from_env();
    init_tracing();

    if let Some(dir) = &opts.chdir {
        let dir = Path::new(dir);
        std::env::set_current_dir(dir).map_err(|err| anyhow!("chdir {:?}: {}", dir, err))?;
    }
    let real = RealEnvironment::new(std::env::current_dir()?);

    if let Some(debug) = &opts.debug {
        match debug.as_str() {
            "list" => {
                println!("debug tools:");
                println!("  trace  generate json performance trace");
                return Ok(1);
            }
            "trace" => trace::open(&real.root().join("trace.json"))?,
            _ => anyhow::bail!("unknown -d {:?}, use -d list to list", debug),
        }
    }

    let env: Arc<dyn Environment> = Arc::new(real);
    let config_file = opts.config.as_deref().unwrap_or(PROJECT_CONFIG);
    let project = trace::scope("config::load", || ProjectConfig::load(&*env, config_file))?;
    let producers = Producers::from_project(&project)?;
    let mut db = trace::scope("db::open", || Db::open(&*env, DB_FILE))?;

    let defaulted = opts.targets.is_empty();
    let targets = if defaulted {
        project.targets.clone()
    } else {
        opts.targets.clone()
    };
    let include_tests = opts.tests || (defaulted && project.tests.build_with_default_targets);
    if targets.is_empty() && !include_tests {
        anyhow::bail!(
            "no targets specified and no default targets in {}",
            config_file
        );
    }

    let mut options = Options {
        include_tests,
        test_suffixes: project.tests.suffixes.clone(),
        ..Options::default()
    };
    if let Some(workers) = opts.parallelism.or(project.workers) {
        if workers == 0 {
            anyhow::bail!("invalid -j 0");
        }
        options.workers = workers;
    }
    if let Some(keep_going) = opts.keep_going.or(project.keep_going) {
        options.keep_going = keep_going;
    }

    process::register_sigint();
    let mut progress: Box<dyn Progress> = if progress::use_status_line() {
        Box::new(StatusLineProgress::new(opts.verbose))
    } else {
        Box::new(DumbConsoleProgress::new(opts.verbose))
    };
    let report = trace::scope("produce", || {
        work::produce(env, &producers, &mut db, progress.as_mut(), options, &targets)
    });
    // Takes the status line down before the summary.
    drop(progress);

    print_report(&report);
    Ok(report.exit_code())
}

pub fn run() -> anyhow::Result<i32> {
    let res = run_impl();
    if let Err(err) = trace::close() {
        tracing::warn!(%err, "closing trace");
    }
    res
}
