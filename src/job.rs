//! Jobs: one producer applied to one input file.
//!
//! The scheduler keeps a `Job` per (producer, input) pair in its graph.  When
//! a job is dispatched it is flattened into a `JobSpec`, which owns all the
//! data a worker thread needs and so never touches the registries.

use crate::config::Config;
use crate::depfile;
use crate::env::Environment;
use crate::file::{FileId, FileInfo};
use crate::hash::{Fingerprint, FingerprintBuilder};
use crate::process::{CommandLine, Termination};
use crate::producer::{expand_template, JobKind, Producer, ProducerId};
use serde_json::json;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct JobId(usize);
impl JobId {
    pub fn index(&self) -> usize {
        self.0
    }
}
impl From<usize> for JobId {
    fn from(u: usize) -> JobId {
        JobId(u)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum JobState {
    /// Waiting for its input to complete.
    Pending,
    /// Queued on the pool or running.
    Running,
    Succeeded,
    Failed,
}

/// A node in the job graph.
#[derive(Debug)]
pub struct Job {
    pub producer: ProducerId,
    pub input: FileId,
    pub outputs: Vec<FileId>,
    pub state: JobState,
}

impl Job {
    pub fn new(producer: ProducerId, input: FileId, outputs: Vec<FileId>) -> Self {
        Job {
            producer,
            input,
            outputs,
            state: JobState::Pending,
        }
    }
}

/// Everything needed to run a job, detached from the registries.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub id: JobId,
    /// Name of the producer, which doubles as the job kind's name.
    pub name: String,
    pub kind: JobKind,
    pub input: String,
    /// The input as a command line refers to it.
    pub input_cmd: String,
    pub outputs: Vec<String>,
    stem: String,
    recipe: Fingerprint,
    /// The input's source config with its computed config merged on top.
    pub config: Config,
}

/// What running a job produced.
#[derive(Debug)]
pub struct JobOutput {
    pub termination: Termination,
    /// Exit code of the job's process, if it ran and exited normally.
    pub code: Option<i32>,
    /// Captured console output, shown when the job fails.
    pub output: Vec<u8>,
    /// Extra completion data for outputs, by output path.
    pub extra: Vec<(String, Config)>,
}

impl JobOutput {
    fn failure(msg: impl Into<String>) -> Self {
        JobOutput {
            termination: Termination::Failure,
            code: None,
            output: msg.into().into_bytes(),
            extra: Vec::new(),
        }
    }

    pub fn success(&self) -> bool {
        self.termination == Termination::Success
    }
}

impl JobSpec {
    pub fn new(id: JobId, producer: &Producer, input: &FileInfo, outputs: Vec<String>) -> Self {
        let mut config = input.source_config().clone();
        config.merge(input.computed_config());
        let stem = input
            .path
            .strip_suffix(producer.input_suffix.as_str())
            .unwrap_or(&input.path)
            .to_owned();
        JobSpec {
            id,
            name: producer.name.clone(),
            kind: producer.kind.clone(),
            input: input.path.clone(),
            input_cmd: input.cmd_path.clone(),
            outputs,
            stem,
            recipe: producer.recipe(),
            config,
        }
    }

    /// Fingerprint of the job's recipe and of everything configured about its
    /// input.  Changes whenever the outputs could differ for the same input
    /// contents.
    pub fn config_id(&self) -> Fingerprint {
        FingerprintBuilder::new()
            .write_fingerprint(self.recipe)
            .write_fingerprint(self.config.fingerprint())
            .finish()
    }

    /// The dependency listing made from the same input, if this job reads
    /// headers that such a listing would name.
    pub fn deps_file(&self) -> Option<String> {
        match self.kind {
            JobKind::Compile { .. } => Some(format!("{}.d", self.input)),
            _ => None,
        }
    }

    /// The tool for a job kind: a per-file `cmd.<key>` entry overrides the
    /// producer's default.
    fn tool(&self, key: &str, default: &[String]) -> Result<CommandLine, String> {
        let tool = self
            .config
            .get_strings(&["cmd", key])
            .unwrap_or_else(|| default.to_vec());
        match tool.split_first() {
            Some((program, flags)) => Ok(CommandLine::new(program.as_str()).args(flags)),
            None => Err(format!("no {} tool configured", key)),
        }
    }

    /// The command this job runs.
    pub fn command_line(&self) -> Result<CommandLine, String> {
        let first_output = || {
            self.outputs
                .first()
                .cloned()
                .ok_or_else(|| format!("{} has no outputs", self.name))
        };
        Ok(match &self.kind {
            JobKind::Compile { lang, tool } => self
                .tool(lang.tool_key(), tool)?
                .args(["-c", self.input.as_str(), "-o"])
                .arg(first_output()?),
            JobKind::Link { tool } => self
                .tool("link", tool)?
                .arg(self.input.as_str())
                .arg("-o")
                .arg(first_output()?),
            JobKind::Deps { lang, tool } => self
                .tool(lang.tool_key(), tool)?
                .args(["-M", "-MG", self.input.as_str()]),
            JobKind::RunTest => CommandLine::new(self.input_cmd.as_str()),
            JobKind::Command { template } => {
                CommandLine::shell(&expand_template(template, &self.input, &self.outputs, &self.stem)?)
            }
        })
    }

    /// Run the job.  All side effects go through `env`; failures of any kind
    /// are reported in the returned output rather than as errors.
    pub fn run(&self, env: &dyn Environment) -> JobOutput {
        for out in &self.outputs {
            if let Err(err) = env.create_parent_dirs(out) {
                return JobOutput::failure(format!("mkdir for {}: {}", out, err));
            }
        }
        let cmd = match self.command_line() {
            Ok(cmd) => cmd,
            Err(msg) => return JobOutput::failure(msg),
        };
        tracing::debug!(job = %self.name, input = %self.input, %cmd, "run");
        let proc = match env.spawn(&cmd) {
            Ok(proc) => proc,
            Err(err) => return JobOutput::failure(format!("{}: {}", cmd.program, err)),
        };
        let mut result = JobOutput {
            termination: proc.termination,
            code: proc.code,
            output: proc.output,
            extra: Vec::new(),
        };
        if !result.success() {
            return result;
        }

        match &self.kind {
            JobKind::Deps { .. } => {
                let text = String::from_utf8_lossy(&proc.stdout);
                let deps = match depfile::parse(&text) {
                    Ok(deps) => deps,
                    Err(err) => return JobOutput::failure(format!("parse deps of {}: {}", self.input, err)),
                };
                if let Err(err) = self.write_outputs(env, &proc.stdout) {
                    return JobOutput::failure(err);
                }
                let extra = Config::from_value(json!({ "deps": deps.deps })).unwrap_or_default();
                result.extra = self.outputs.iter().map(|o| (o.clone(), extra.clone())).collect();
            }
            JobKind::RunTest => {
                if let Err(err) = self.write_outputs(env, &result.output) {
                    return JobOutput::failure(err);
                }
                let extra =
                    Config::from_value(json!({ "test": { "passed": true } })).unwrap_or_default();
                result.extra = self.outputs.iter().map(|o| (o.clone(), extra.clone())).collect();
            }
            _ => {}
        }
        result
    }

    fn write_outputs(&self, env: &dyn Environment, content: &[u8]) -> Result<(), String> {
        for out in &self.outputs {
            env.write(out, content)
                .map_err(|err| format!("write {}: {}", out, err))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolConfig;
    use crate::env::RealEnvironment;
    use crate::file::Files;
    use crate::producer::Lang;

    fn spec(env: &RealEnvironment, producer: &Producer, input: &str) -> anyhow::Result<JobSpec> {
        let mut files = Files::new();
        let id = files.get(env, input)?;
        let outputs = producer.outputs_for(input)?;
        Ok(JobSpec::new(JobId(0), producer, files.file(id), outputs))
    }

    #[test]
    fn compile_command() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let env = RealEnvironment::new(dir.path());
        let tools = ToolConfig {
            cc: vec!["gcc".into(), "-O2".into()],
            ..ToolConfig::default()
        };
        let job = spec(&env, &Producer::compile(Lang::C, &tools), "src/a.c")?;
        assert_eq!(
            job.command_line().unwrap().to_string(),
            "gcc -O2 -c src/a.c -o src/a.o"
        );
        Ok(())
    }

    #[test]
    fn sidecar_overrides_tool() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let env = RealEnvironment::new(dir.path());
        env.write("a.c", b"")?;
        let producer = Producer::compile(Lang::C, &ToolConfig::default());
        let before = spec(&env, &producer, "a.c")?;

        env.write("a.c.jg.json", br#"{"cmd": {"cc": ["clang", "-g"]}}"#)?;
        let after = spec(&env, &producer, "a.c")?;
        assert_eq!(
            after.command_line().unwrap().to_string(),
            "clang -g -c a.c -o a.o"
        );
        assert_ne!(before.config_id(), after.config_id());
        Ok(())
    }

    #[test]
    fn config_id_is_stable() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let env = RealEnvironment::new(dir.path());
        let producer = Producer::link(&ToolConfig::default());
        let a = spec(&env, &producer, "a.o")?;
        let b = spec(&env, &producer, "a.o")?;
        assert_eq!(a.config_id(), b.config_id());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn run_test_records_result() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let env = RealEnvironment::new(dir.path());
        let decl = crate::config::ProducerDecl {
            name: "fake_test".into(),
            input: ".test.sh".into(),
            outputs: vec![".test.log".into()],
            command: "sh $in > $out".into(),
        };
        env.write("t.test.sh", b"echo ok\n")?;
        let job = spec(&env, &Producer::command(&decl), "t.test.sh")?;
        let out = job.run(&env);
        assert!(out.success(), "{}", String::from_utf8_lossy(&out.output));
        assert_eq!(env.read("t.test.log")?, b"ok\n");

        std::fs::write(dir.path().join("t.test.out"), "#!/bin/sh\necho passed\n")?;
        {
            use std::os::unix::fs::PermissionsExt;
            let path = dir.path().join("t.test.out");
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
        }
        let job = spec(&env, &Producer::run_test(), "t.test.out")?;
        let out = job.run(&env);
        assert!(out.success(), "{}", String::from_utf8_lossy(&out.output));
        assert_eq!(env.read("t.test.result")?, b"passed\n");
        assert_eq!(out.extra.len(), 1);
        assert_eq!(out.extra[0].0, "t.test.result");
        assert_eq!(
            out.extra[0].1.get(&["test", "passed"]),
            Some(&serde_json::Value::Bool(true))
        );
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn failing_command() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let env = RealEnvironment::new(dir.path());
        let decl = crate::config::ProducerDecl {
            name: "fail".into(),
            input: ".x".into(),
            outputs: vec![".y".into()],
            command: "echo broken; exit 1".into(),
        };
        let job = spec(&env, &Producer::command(&decl), "a.x")?;
        let out = job.run(&env);
        assert_eq!(out.termination, Termination::Failure);
        assert_eq!(out.code, Some(1));
        assert_eq!(out.output, b"broken\n");
        assert!(out.extra.is_empty());
        Ok(())
    }
}
