//! Producers: rules mapping an output file back to the input it is made from,
//! and an input forward to the outputs its job creates.
//!
//! The set of job kinds is closed (`JobKind`); the set of producers is an
//! open list assembled at startup from the built-ins and the project config.

use crate::canon::canon_rel_path;
use crate::config::{ProducerDecl, ProjectConfig, ToolConfig};
use crate::hash::{Fingerprint, FingerprintBuilder};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("producer {producer}: {reason}")]
pub struct ProducerConfigError {
    pub producer: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lang {
    C,
    Cxx,
}

impl Lang {
    /// Key of the tool under `cmd` in project and file configs.
    pub fn tool_key(self) -> &'static str {
        match self {
            Lang::C => "cc",
            Lang::Cxx => "cxx",
        }
    }

    fn source_suffix(self) -> &'static str {
        match self {
            Lang::C => ".c",
            Lang::Cxx => ".cc",
        }
    }

    fn tool(self, tools: &ToolConfig) -> Vec<String> {
        match self {
            Lang::C => tools.cc.clone(),
            Lang::Cxx => tools.cxx.clone(),
        }
    }
}

/// What a job does when it runs.  `tool` vectors hold the program followed by
/// default flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobKind {
    Compile { lang: Lang, tool: Vec<String> },
    Link { tool: Vec<String> },
    /// Extract the headers a source includes.
    Deps { lang: Lang, tool: Vec<String> },
    RunTest,
    /// A shell command template.
    Command { template: String },
}

impl JobKind {
    fn recipe(&self, fp: &mut FingerprintBuilder) {
        match self {
            JobKind::Compile { lang, tool } => {
                fp.write_str("compile").write_str(lang.tool_key());
                fp.write_strs(tool.iter().map(String::as_str));
            }
            JobKind::Link { tool } => {
                fp.write_str("link").write_strs(tool.iter().map(String::as_str));
            }
            JobKind::Deps { lang, tool } => {
                fp.write_str("deps").write_str(lang.tool_key());
                fp.write_strs(tool.iter().map(String::as_str));
            }
            JobKind::RunTest => {
                fp.write_str("run_test");
            }
            JobKind::Command { template } => {
                fp.write_str("command").write_str(template);
            }
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ProducerId(usize);
impl ProducerId {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct Producer {
    pub name: String,
    pub kind: JobKind,
    pub input_suffix: String,
    pub output_suffixes: Vec<String>,
}

impl Producer {
    pub fn new(name: &str, kind: JobKind, input_suffix: &str, output_suffixes: &[&str]) -> Self {
        Producer {
            name: name.to_owned(),
            kind,
            input_suffix: input_suffix.to_owned(),
            output_suffixes: output_suffixes.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// `x.c -> x.o`.
    pub fn compile(lang: Lang, tools: &ToolConfig) -> Self {
        let name = match lang {
            Lang::C => "compile_c",
            Lang::Cxx => "compile_cc",
        };
        let kind = JobKind::Compile {
            lang,
            tool: lang.tool(tools),
        };
        Producer::new(name, kind, lang.source_suffix(), &[".o"])
    }

    /// `x.o -> x.out`.
    pub fn link(tools: &ToolConfig) -> Self {
        let kind = JobKind::Link {
            tool: tools.link.clone(),
        };
        Producer::new("link", kind, ".o", &[".out"])
    }

    /// `x.c -> x.c.d`.
    pub fn deps(lang: Lang, tools: &ToolConfig) -> Self {
        let (name, out) = match lang {
            Lang::C => ("deps_c", ".c.d"),
            Lang::Cxx => ("deps_cc", ".cc.d"),
        };
        let kind = JobKind::Deps {
            lang,
            tool: lang.tool(tools),
        };
        Producer::new(name, kind, lang.source_suffix(), &[out])
    }

    /// `x.test.out -> x.test.result`.
    pub fn run_test() -> Self {
        Producer::new("run_test", JobKind::RunTest, ".test.out", &[".test.result"])
    }

    pub fn command(decl: &ProducerDecl) -> Self {
        Producer {
            name: decl.name.clone(),
            kind: JobKind::Command {
                template: decl.command.clone(),
            },
            input_suffix: decl.input.clone(),
            output_suffixes: decl.outputs.clone(),
        }
    }

    fn error(&self, reason: String) -> ProducerConfigError {
        ProducerConfigError {
            producer: self.name.clone(),
            reason,
        }
    }

    /// If this producer can make `output`, the input path it would need and
    /// how specific the match is (the length of the matched suffix).
    pub fn input_for(&self, output: &str) -> Option<(String, usize)> {
        self.output_suffixes
            .iter()
            .filter(|suffix| !suffix.is_empty())
            .filter_map(|suffix| {
                let stem = output.strip_suffix(suffix.as_str())?;
                if stem.is_empty() || stem.ends_with('/') {
                    return None;
                }
                Some((format!("{}{}", stem, self.input_suffix), suffix.len()))
            })
            .max_by_key(|&(_, specificity)| specificity)
    }

    /// The outputs a job on `input` would create.
    pub fn outputs_for(&self, input: &str) -> Result<Vec<String>, ProducerConfigError> {
        let stem = input
            .strip_suffix(self.input_suffix.as_str())
            .filter(|stem| !stem.is_empty())
            .ok_or_else(|| {
                self.error(format!("input {} does not end in {:?}", input, self.input_suffix))
            })?;
        let mut outputs = Vec::with_capacity(self.output_suffixes.len());
        for suffix in &self.output_suffixes {
            let path = format!("{}{}", stem, suffix);
            let path = canon_rel_path(&path)
                .ok_or_else(|| self.error(format!("output {:?} is outside the root", path)))?;
            if path == input {
                return Err(self.error(format!("output {} is its own input", path)));
            }
            if outputs.contains(&path) {
                return Err(self.error(format!("output {} listed twice", path)));
            }
            outputs.push(path);
        }
        if let JobKind::Command { template } = &self.kind {
            expand_template(template, input, &outputs, stem).map_err(|reason| self.error(reason))?;
        }
        Ok(outputs)
    }

    /// Fingerprint of how this producer's jobs are run.
    pub fn recipe(&self) -> Fingerprint {
        let mut fp = FingerprintBuilder::new();
        fp.write_str(&self.name);
        self.kind.recipe(&mut fp);
        fp.finish()
    }
}

/// Expand `$in`, `$out`, `$stem` and `$$` in a command template.
pub fn expand_template(
    template: &str,
    input: &str,
    outputs: &[String],
    stem: &str,
) -> Result<String, String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let braced = matches!(chars.peek(), Some((_, '{')));
        if braced {
            chars.next();
        }
        if !braced && matches!(chars.peek(), Some((_, '$'))) {
            chars.next();
            out.push('$');
            continue;
        }
        let mut name = String::new();
        while let Some(&(_, c)) = chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                name.push(c);
                chars.next();
            } else {
                break;
            }
        }
        if braced && chars.next().map(|(_, c)| c) != Some('}') {
            return Err(format!("unterminated ${{ in {:?}", template));
        }
        match name.as_str() {
            "in" => out.push_str(input),
            "out" => out.push_str(&outputs.join(" ")),
            "stem" => out.push_str(stem),
            "" => return Err(format!("bad $ in {:?}", template)),
            _ => return Err(format!("unknown variable ${}", name)),
        }
    }
    Ok(out)
}

/// A producer able to make some output, with the input it would need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub producer: ProducerId,
    pub input: String,
    pub specificity: usize,
}

/// The registration table of producers.
#[derive(Default)]
pub struct Producers {
    producers: Vec<Producer>,
}

impl Producers {
    pub fn new() -> Self {
        Producers::default()
    }

    /// The compile, link, dependency-extraction and test-run producers.
    pub fn builtin(tools: &ToolConfig) -> Self {
        let mut producers = Producers::new();
        for p in [
            Producer::compile(Lang::C, tools),
            Producer::compile(Lang::Cxx, tools),
            Producer::link(tools),
            Producer::deps(Lang::C, tools),
            Producer::deps(Lang::Cxx, tools),
            Producer::run_test(),
        ] {
            producers.producers.push(p);
        }
        producers
    }

    pub fn from_project(project: &ProjectConfig) -> Result<Self, ProducerConfigError> {
        let mut producers = if project.builtin_producers {
            Producers::builtin(&project.cmd)
        } else {
            Producers::new()
        };
        for decl in &project.producers {
            producers.register(Producer::command(decl))?;
        }
        Ok(producers)
    }

    pub fn register(&mut self, producer: Producer) -> Result<ProducerId, ProducerConfigError> {
        if self.producers.iter().any(|p| p.name == producer.name) {
            return Err(producer.error("registered twice".to_owned()));
        }
        if producer.output_suffixes.is_empty() {
            return Err(producer.error("no outputs".to_owned()));
        }
        if producer.output_suffixes.iter().any(|s| s.is_empty()) {
            return Err(producer.error("empty output suffix".to_owned()));
        }
        let id = ProducerId(self.producers.len());
        self.producers.push(producer);
        Ok(id)
    }

    pub fn get(&self, id: ProducerId) -> &Producer {
        &self.producers[id.index()]
    }

    pub fn len(&self) -> usize {
        self.producers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.producers.is_empty()
    }

    /// All producers able to make `output`, most specific first.  Producers of
    /// equal specificity keep registration order, but callers must not let
    /// that order decide between them.
    pub fn candidates(&self, output: &str) -> Vec<Candidate> {
        let mut found: Vec<Candidate> = self
            .producers
            .iter()
            .enumerate()
            .filter_map(|(i, p)| {
                let (input, specificity) = p.input_for(output)?;
                Some(Candidate {
                    producer: ProducerId(i),
                    input: canon_rel_path(&input)?,
                    specificity,
                })
            })
            .collect();
        found.sort_by(|a, b| b.specificity.cmp(&a.specificity));
        found
    }
}
