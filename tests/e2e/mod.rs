//! Support code for e2e tests, which run jobgraph as a binary.

mod basic;
mod failures;
mod tests;

pub fn jobgraph_binary() -> std::path::PathBuf {
    std::env::current_exe()
        .expect("test binary path")
        .parent()
        .expect("test binary directory")
        .parent()
        .expect("binary directory")
        .join("jobgraph")
}

pub fn jobgraph_command(args: Vec<&str>) -> std::process::Command {
    let mut cmd = std::process::Command::new(jobgraph_binary());
    cmd.args(args);
    cmd
}

fn print_output(out: &std::process::Output) {
    // Gross: use print! instead of writing to stdout so Rust test
    // framework can capture it.
    print!("{}", std::str::from_utf8(&out.stdout).unwrap());
    print!("{}", std::str::from_utf8(&out.stderr).unwrap());
}

pub fn assert_output_contains(out: &std::process::Output, text: &str) {
    let out = std::str::from_utf8(&out.stdout).unwrap();
    if !out.contains(text) {
        panic!(
            "assertion failed; expected output to contain {:?} but got:\n{}",
            text, out
        );
    }
}

pub fn assert_output_not_contains(out: &std::process::Output, text: &str) {
    let out = std::str::from_utf8(&out.stdout).unwrap();
    if out.contains(text) {
        panic!(
            "assertion failed; expected output to not contain {:?} but got:\n{}",
            text, out
        );
    }
}

/// Manages a temporary directory for invoking jobgraph.
pub struct TestSpace {
    dir: tempfile::TempDir,
}
impl TestSpace {
    pub fn new() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        Ok(TestSpace { dir })
    }

    /// Write a file into the working space, creating directories as needed.
    pub fn write(&self, path: &str, content: &str) -> std::io::Result<()> {
        let path = self.dir.path().join(path);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, content)
    }

    /// Read a file from the working space.
    pub fn read(&self, path: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.dir.path().join(path))
    }

    pub fn metadata(&self, path: &str) -> std::io::Result<std::fs::Metadata> {
        std::fs::metadata(self.dir.path().join(path))
    }

    /// Move a file's mtime `secs` into the past, so that a later write is
    /// seen as a change even on coarse-grained file systems.
    pub fn age(&self, path: &str, secs: i64) -> anyhow::Result<()> {
        let mtime = filetime::FileTime::from_last_modification_time(&self.metadata(path)?);
        let aged = filetime::FileTime::from_unix_time(mtime.unix_seconds() - secs, 0);
        filetime::set_file_mtime(self.dir.path().join(path), aged)?;
        Ok(())
    }

    /// Invoke jobgraph, returning process output.
    pub fn run(&self, cmd: &mut std::process::Command) -> std::io::Result<std::process::Output> {
        cmd.current_dir(self.dir.path()).output()
    }

    /// Like run, but also print output if the build failed.
    pub fn run_expect(
        &self,
        cmd: &mut std::process::Command,
    ) -> anyhow::Result<std::process::Output> {
        let out = self.run(cmd)?;
        if !out.status.success() {
            print_output(&out);
            anyhow::bail!("build failed, status {}", out.status);
        }
        Ok(out)
    }

    /// Persist the temp dir locally and abort the test.  Debugging helper.
    #[allow(dead_code)]
    pub fn eject(self) -> ! {
        panic!("ejected at {:?}", self.dir.into_path());
    }
}

/// A project config with only the given command producers, each written as
/// `(name, input suffix, output suffixes, command)`.
pub fn project(producers: &[(&str, &str, &[&str], &str)]) -> String {
    let producers: Vec<serde_json::Value> = producers
        .iter()
        .map(|(name, input, outputs, command)| {
            serde_json::json!({
                "name": name,
                "input": input,
                "outputs": outputs,
                "command": command,
            })
        })
        .collect();
    serde_json::json!({
        "builtin_producers": false,
        "producers": producers,
    })
    .to_string()
}

/// `x.src -> x.gen` by touching the output.
pub fn touch_project() -> String {
    project(&[("gen", ".src", &[".gen"], "touch $out")])
}
