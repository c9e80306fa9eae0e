//! Processing command templates
//!
//! The external processing command is described as a program plus an
//! argument list with placeholders. Rendering substitutes job values into
//! each argument separately; nothing is ever passed through a shell.
//!
//! Supported placeholders: `{input_root}`, `{manifest}`, `{output}`,
//! `{checkpoint}`, `{model}`, `{device}`, `{sample}`, `{sequence}`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::job::Job;

/// Template for the external processing command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTemplate {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Appended after `args` when the job resumes from a checkpoint
    pub resume_args: Vec<String>,
    /// Model selector substituted for `{model}`
    pub model: String,
    /// Redirect the process's stdout into the job output path
    pub stdout_to_output: bool,
}

impl Default for CommandTemplate {
    fn default() -> Self {
        Self {
            program: PathBuf::from("dorado"),
            args: [
                "basecaller",
                "{model}",
                "{input_root}",
                "--input-file-list",
                "{manifest}",
                "--device",
                "{device}",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            resume_args: vec!["--resume-from".to_string(), "{checkpoint}".to_string()],
            model: "sup,5mCG_5hmCG".to_string(),
            stdout_to_output: true,
        }
    }
}

impl CommandTemplate {
    /// Appends extra arguments after the template's own arguments
    pub fn with_extra_args(mut self, extra: impl IntoIterator<Item = String>) -> Self {
        self.args.extend(extra);
        self
    }

    /// Renders a concrete command for `job` running on `device`
    pub fn render(&self, job: &Job, device: &str) -> CommandSpec {
        let checkpoint = job
            .checkpoint_path
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        let sequence = job.sequence.to_string();
        let input_root = job.input_root.to_string_lossy();
        let manifest = job.manifest_path.to_string_lossy();
        let output = job.output_path.to_string_lossy();

        let substitute = |arg: &String| {
            arg.replace("{input_root}", &input_root)
                .replace("{manifest}", &manifest)
                .replace("{output}", &output)
                .replace("{checkpoint}", &checkpoint)
                .replace("{model}", &self.model)
                .replace("{device}", device)
                .replace("{sample}", &job.sample_id)
                .replace("{sequence}", &sequence)
        };

        let mut args: Vec<String> = self.args.iter().map(substitute).collect();
        if job.checkpoint_path.is_some() {
            args.extend(self.resume_args.iter().map(substitute));
        }

        CommandSpec {
            program: self.program.clone(),
            args,
            stdout_path: self.stdout_to_output.then(|| job.output_path.clone()),
        }
    }
}

/// A fully rendered command, ready to spawn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// File receiving stdout, if redirected
    pub stdout_path: Option<PathBuf>,
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        if let Some(path) = &self.stdout_path {
            write!(f, " > {}", path.display())?;
        }
        Ok(())
    }
}
