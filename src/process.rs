//! Subprocess execution for jobs.

use std::io::Write;
use std::path::Path;

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Success,
    Interrupted,
    Failure,
}

/// A program plus its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        CommandLine {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// A command run through the platform shell.
    #[cfg(unix)]
    pub fn shell(cmdline: &str) -> Self {
        CommandLine::new("/bin/sh").arg("-c").arg(cmdline)
    }

    #[cfg(windows)]
    pub fn shell(cmdline: &str) -> Self {
        CommandLine::new("cmd").arg("/c").arg(cmdline)
    }

    /// The text a shell command was built from, if this is one.
    pub fn shell_text(&self) -> Option<&str> {
        match self.args.as_slice() {
            [flag, text] if flag == "-c" || flag == "/c" => Some(text),
            _ => None,
        }
    }
}

impl std::fmt::Display for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(text) = self.shell_text() {
            return f.write_str(text);
        }
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Result of running a process: how it ended plus interleaved console output.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub termination: Termination,
    /// Exit code, absent when the process was killed by a signal.
    pub code: Option<i32>,
    /// stdout followed by stderr.
    pub output: Vec<u8>,
    /// stdout alone, for jobs that parse what a tool prints.
    pub stdout: Vec<u8>,
}

/// Run a command in `dir`, capturing its output.
/// Returns an Err() only if we failed outside of the process itself.
pub fn run_command(dir: &Path, cmd: &CommandLine) -> std::io::Result<ProcessOutput> {
    let out = std::process::Command::new(&cmd.program)
        .args(&cmd.args)
        .current_dir(dir)
        .stdin(std::process::Stdio::null())
        .output()?;
    let mut output = out.stdout.clone();
    output.extend_from_slice(&out.stderr);

    let mut termination = Termination::Success;
    if !out.status.success() {
        termination = Termination::Failure;
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(sig) = out.status.signal() {
                if sig == libc::SIGINT {
                    write!(output, "interrupted")?;
                    termination = Termination::Interrupted;
                } else {
                    write!(output, "signal {}", sig)?;
                }
            }
        }
    }

    Ok(ProcessOutput {
        termination,
        code: out.status.code(),
        output,
        stdout: out.stdout,
    })
}

/// Let the first SIGINT reach child processes, which ought to fail their job
/// and let us report that properly; a second SIGINT kills us as usual.
#[cfg(unix)]
pub fn register_sigint() {
    extern "C" fn on_sigint(_sig: libc::c_int) {
        // Safety: sigaction is async-signal-safe.
        unsafe {
            let mut sa: libc::sigaction = std::mem::zeroed();
            sa.sa_sigaction = libc::SIG_DFL;
            libc::sigaction(libc::SIGINT, &sa, std::ptr::null_mut());
        }
    }
    // Safety: installing a handler that only resets the disposition.
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = on_sigint as extern "C" fn(libc::c_int) as libc::sighandler_t;
        libc::sigaction(libc::SIGINT, &sa, std::ptr::null_mut());
    }
}

#[cfg(not(unix))]
pub fn register_sigint() {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn captures_output_and_status() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let out = run_command(dir.path(), &CommandLine::shell("echo hi; echo err >&2"))?;
        assert_eq!(out.termination, Termination::Success);
        assert_eq!(out.stdout, b"hi\n");
        assert_eq!(out.output, b"hi\nerr\n");

        let out = run_command(dir.path(), &CommandLine::shell("exit 3"))?;
        assert_eq!(out.termination, Termination::Failure);
        assert_eq!(out.code, Some(3));
        Ok(())
    }

    #[test]
    fn display() {
        assert_eq!(CommandLine::shell("touch a b").to_string(), "touch a b");
        let cmd = CommandLine::new("cc").args(["-c", "a.c"]).arg("-o").arg("a.o");
        assert_eq!(cmd.to_string(), "cc -c a.c -o a.o");
    }
}
