//! Chrome trace output.
//!
//! Load the resulting trace.json in chrome://tracing or Perfetto.  Scheduler
//! phases show up on track 0; jobs on one track per worker.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;

static TRACE: Mutex<Option<Trace>> = Mutex::new(None);

struct Event<'a> {
    name: &'a str,
    tid: usize,
    start: Instant,
    end: Instant,
}

struct Trace {
    start: Instant,
    w: BufWriter<File>,
}

impl Trace {
    fn new(path: &Path) -> std::io::Result<Self> {
        let mut w = BufWriter::new(File::create(path)?);
        writeln!(w, "[")?;
        Ok(Trace {
            start: Instant::now(),
            w,
        })
    }

    fn write_event(&mut self, event: &Event) -> std::io::Result<()> {
        write!(
            self.w,
            "{{ \"pid\": 0, \"tid\": {}, \"name\": {}, \"ts\": {}, \"ph\": \"X\", \"dur\": {} }}",
            event.tid,
            serde_json::Value::from(event.name),
            event.start.saturating_duration_since(self.start).as_micros(),
            event.end.saturating_duration_since(event.start).as_micros(),
        )
    }

    fn write(&mut self, event: &Event) -> std::io::Result<()> {
        self.write_event(event)?;
        writeln!(self.w, ",")
    }

    fn close(&mut self) -> std::io::Result<()> {
        self.write_event(&Event {
            name: "main",
            tid: 0,
            start: self.start,
            end: Instant::now(),
        })?;
        writeln!(self.w, "]")?;
        self.w.flush()
    }
}

fn with_trace(f: impl FnOnce(&mut Trace) -> std::io::Result<()>) {
    let mut trace = TRACE.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(t) = trace.as_mut() {
        if let Err(err) = f(t) {
            tracing::warn!(%err, "writing trace failed, disabling it");
            *trace = None;
        }
    }
}

pub fn open(path: &Path) -> std::io::Result<()> {
    let trace = Trace::new(path)?;
    *TRACE.lock().unwrap_or_else(|e| e.into_inner()) = Some(trace);
    Ok(())
}

pub fn enabled() -> bool {
    TRACE.lock().map(|t| t.is_some()).unwrap_or(false)
}

/// Run `f`, recording it as a span on the scheduler's track.
#[inline]
pub fn scope<T>(name: &'static str, f: impl FnOnce() -> T) -> T {
    if !enabled() {
        return f();
    }
    let start = Instant::now();
    let result = f();
    let end = Instant::now();
    with_trace(|t| {
        t.write(&Event {
            name,
            tid: 0,
            start,
            end,
        })
    });
    result
}

/// Record a span that already happened, e.g. a job on a worker thread.
/// Workers are numbered from 0 and land on track `worker + 1`.
pub fn span(name: &str, worker: usize, (start, end): (Instant, Instant)) {
    with_trace(|t| {
        t.write(&Event {
            name,
            tid: worker + 1,
            start,
            end,
        })
    });
}

pub fn close() -> std::io::Result<()> {
    let mut trace = TRACE.lock().unwrap_or_else(|e| e.into_inner());
    match trace.take() {
        Some(mut t) => t.close(),
        None => Ok(()),
    }
}
