//! Run configuration templates.
//!
//! A run profile describes how a submission is launched inside the sandbox:
//! the command line template, extra environment entries and the syscall
//! filter profile. A separate template describes how the special judge is
//! launched. Templates carry named placeholders and are split into an argv
//! vector on whitespace after substitution.
//!

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, ErrorKind, Result};

/// Describes how to launch a judged submission.
#[derive(Clone, Debug, Deserialize)]
pub struct RunProfile {
    /// Command line template. Recognized placeholders: `{exe_path}` (the
    /// submission executable), `{exe_dir}` (its parent directory) and
    /// `{max_memory}` (the memory limit in kilobytes, for runtimes that
    /// take their heap size on the command line).
    pub command: String,

    /// Extra `KEY=VALUE` environment entries, appended after the inherited
    /// `PATH`.
    #[serde(default)]
    pub env: Vec<String>,

    /// Name of the syscall filter profile for the submission.
    #[serde(default)]
    pub seccomp_profile: Option<String>,

    /// Only check the memory limit against the final usage instead of
    /// killing the submission when it is exceeded.
    #[serde(default)]
    pub memory_check_only: bool,
}

impl RunProfile {
    /// Expand this profile's command template into an argv vector.
    pub fn expand(&self, exe_path: &Path, max_memory_kb: usize) -> Result<Vec<String>> {
        let exe_dir = exe_path.parent()
            .map(|dir| dir.to_string_lossy().into_owned())
            .unwrap_or_default();
        let command = self.command
            .replace("{exe_path}", &exe_path.to_string_lossy())
            .replace("{exe_dir}", &exe_dir)
            .replace("{max_memory}", &max_memory_kb.to_string());
        split_command(&self.command, command)
    }
}

impl Default for RunProfile {
    fn default() -> Self {
        RunProfile {
            command: String::from("{exe_path}"),
            env: Vec::new(),
            seccomp_profile: None,
            memory_check_only: false,
        }
    }
}

/// Describes how to launch the special judge of a test suite.
#[derive(Clone, Debug, Deserialize)]
pub struct SpecialJudgeConfig {
    /// Path to the special judge executable.
    pub executable: PathBuf,

    /// Command line template. Recognized placeholders: `{exe_path}` (the
    /// special judge executable), `{in_file}` (the test case input) and
    /// `{user_out_file}` (the submission's output).
    pub command: String,

    /// Name of the syscall filter profile for the special judge. Distinct
    /// from the submission's profile; the special judge is trusted code but
    /// still sandboxed.
    #[serde(default)]
    pub seccomp_profile: Option<String>,
}

impl SpecialJudgeConfig {
    /// Expand this configuration's command template into an argv vector.
    pub fn expand(&self, in_file: &Path, user_out_file: &Path) -> Result<Vec<String>> {
        let command = self.command
            .replace("{exe_path}", &self.executable.to_string_lossy())
            .replace("{in_file}", &in_file.to_string_lossy())
            .replace("{user_out_file}", &user_out_file.to_string_lossy());
        split_command(&self.command, command)
    }
}

fn split_command(template: &str, expanded: String) -> Result<Vec<String>> {
    let argv: Vec<String> = expanded.split_whitespace()
        .map(str::to_owned)
        .collect();
    if argv.is_empty() {
        return Err(Error::from(ErrorKind::InvalidCommandTemplate(template.to_owned())));
    }
    Ok(argv)
}
