//! This crate defines the contract between the judge and the sandbox
//! executor, the external primitive that runs an untrusted program under
//! enforced CPU/real time, memory, stack, output size and process count
//! limits, confined by a syscall filter and an unprivileged identity.
//!
//! The sandbox itself is not implemented here. This crate provides:
//!
//! * The request and report data model exchanged with the executor;
//!
//! * The `SandboxExecutor` trait through which the judge invokes it;
//!
//! * `BinarySandbox`, a bridge implementation that launches an external
//! sandbox binary and parses the JSON report it prints.
//!

use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};

error_chain::error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }

    foreign_links {
        Io(::std::io::Error);
    }

    errors {
        SandboxNotFound(path: std::path::PathBuf) {
            description("sandbox binary not found")
            display("sandbox binary not found: {}", path.display())
        }

        SandboxFailure(detail: String) {
            description("sandbox executor failed")
            display("sandbox executor failed: {}", detail)
        }

        MalformedReport(detail: String) {
            description("malformed sandbox report")
            display("malformed sandbox report: {}", detail)
        }
    }
}

/// Measurement of the size of a block of memory.
#[derive(Clone, Copy, Debug, Eq, Serialize, Deserialize)]
pub enum MemorySize {
    /// Measurement in bytes.
    Bytes(usize),

    /// Measurement in kilobytes.
    KiloBytes(usize),

    /// Measurement in megabytes.
    MegaBytes(usize),

    /// Measurement in gigabytes.
    GigaBytes(usize),
}

impl MemorySize {
    /// Convert the current measurement to memory size in bytes.
    pub fn bytes(&self) -> usize {
        match self {
            MemorySize::Bytes(s) => *s,
            MemorySize::KiloBytes(s) => s * 1024,
            MemorySize::MegaBytes(s) => s * 1024 * 1024,
            MemorySize::GigaBytes(s) => s * 1024 * 1024 * 1024,
        }
    }

    /// Convert the current measurement to memory size in kilobytes, rounding
    /// downwards.
    pub fn kilobytes(&self) -> usize {
        self.bytes() / 1024
    }
}

impl PartialEq for MemorySize {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl PartialOrd for MemorySize {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MemorySize {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bytes().cmp(&other.bytes())
    }
}

impl From<usize> for MemorySize {
    fn from(value: usize) -> MemorySize {
        MemorySize::Bytes(value)
    }
}

impl Display for MemorySize {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MemorySize::Bytes(s) => f.write_fmt(format_args!("{} B", s)),
            MemorySize::KiloBytes(s) => f.write_fmt(format_args!("{} KB", s)),
            MemorySize::MegaBytes(s) => f.write_fmt(format_args!("{} MB", s)),
            MemorySize::GigaBytes(s) => f.write_fmt(format_args!("{} GB", s)),
        }
    }
}

/// Resource limits applied to one sandboxed run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunLimits {
    /// Limit on CPU time available to the child process.
    pub max_cpu_time: Duration,

    /// Limit on wall clock time available to the child process.
    pub max_real_time: Duration,

    /// Limit on memory available to the child process.
    pub max_memory: MemorySize,

    /// Limit on the stack size of the child process.
    pub max_stack: MemorySize,

    /// Limit on the total number of bytes the child process may write to its
    /// output streams.
    pub max_output_size: MemorySize,

    /// Limit on the number of processes the child may spawn. `None` if no
    /// constraints are set.
    pub max_process_count: Option<u32>,
}

/// A fully specified request to execute one program inside the sandbox.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunRequest {
    /// Path to the executable file.
    pub executable: PathBuf,

    /// Arguments passed to the child process, not including the executable
    /// path itself.
    pub args: Vec<String>,

    /// Environment of the child process, as `KEY=VALUE` entries.
    pub env: Vec<String>,

    /// File the child's standard input is redirected from.
    pub input_file: PathBuf,

    /// File the child's standard output is redirected to.
    pub output_file: PathBuf,

    /// File the child's standard error is redirected to. This may name the
    /// same file as `output_file`.
    pub error_file: PathBuf,

    /// Resource limits enforced on the child process.
    pub limits: RunLimits,

    /// Name of the syscall filter profile applied to the child process, or
    /// `None` to run unfiltered.
    pub seccomp_profile: Option<String>,

    /// Effective user ID of the child process.
    pub uid: u32,

    /// Effective group ID of the child process.
    pub gid: u32,

    /// File the executor appends its own diagnostics to.
    pub log_file: PathBuf,

    /// Watch memory usage without killing the child when the memory limit is
    /// hit; the limit is then only checked against the final usage. Some
    /// runtimes reserve large address spaces up front and would die at
    /// startup otherwise.
    pub memory_check_only: bool,
}

/// Classification of a sandboxed run reported by the executor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// The child ran to completion without violating any constraint.
    Success,

    /// The child was killed after exceeding its CPU time limit.
    CpuTimeLimitExceeded,

    /// The child was killed after exceeding its wall clock time limit.
    RealTimeLimitExceeded,

    /// The child was killed after exceeding its memory limit.
    MemoryLimitExceeded,

    /// The child terminated abnormally: nonzero exit code or killed by the
    /// delivery of a signal.
    RuntimeError,

    /// The executor itself failed to run the child under the requested
    /// confinement.
    SystemError,
}

impl RunOutcome {
    /// Whether this outcome represents unconstrained successful completion.
    pub fn is_success(self) -> bool {
        self == RunOutcome::Success
    }
}

/// The structured result of one sandboxed run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReport {
    /// Classification of the run.
    #[serde(rename = "result")]
    pub outcome: RunOutcome,

    /// Exit code of the child process.
    pub exit_code: i32,

    /// Signal that terminated the child process, or 0 if the child was not
    /// killed by a signal.
    pub signal: i32,

    /// CPU time consumed by the child process.
    #[serde(with = "duration_ms")]
    pub cpu_time: Duration,

    /// Wall clock time consumed by the child process.
    #[serde(with = "duration_ms")]
    pub real_time: Duration,

    /// Peak memory usage of the child process, in bytes.
    pub memory: u64,

    /// Executor diagnostic attached to a `SystemError` outcome.
    #[serde(default)]
    pub error: Option<String>,
}

impl RunReport {
    /// Get the name of the signal that terminated the child process, if any.
    pub fn signal_name(&self) -> Option<String> {
        if self.signal == 0 {
            return None;
        }
        Signal::from_c_int(self.signal).ok().map(|s| format!("{:?}", s))
    }
}

/// Serialize `Duration` values as integral milliseconds on the wire.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
        where S: Serializer {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
        where D: Deserializer<'de> {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

/// Provide a trait for sandbox executors.
///
/// An executor runs the requested program synchronously under the full
/// confinement described by the request and reports the structured result.
/// The child never exceeds its CPU or memory caps without the corresponding
/// outcome being reported.
///
/// Implementors must be thread safe: the judge invokes the executor from
/// multiple worker threads concurrently.
pub trait SandboxExecutor: Send + Sync {
    /// Execute the given run request and wait for the child to finish.
    fn execute(&self, request: &RunRequest) -> Result<RunReport>;
}

/// A `SandboxExecutor` that launches an external sandbox binary.
///
/// The request is rendered into command line flags; the binary is expected
/// to print a `RunReport` JSON document on its standard output and to exit
/// with status 0 whenever it produced a report, including reports about
/// constraint violations of the child.
pub struct BinarySandbox {
    /// Path to the sandbox binary.
    binary: PathBuf,
}

impl BinarySandbox {
    /// Create a new `BinarySandbox` wrapping the sandbox binary at the given
    /// path.
    pub fn new<P>(binary: P) -> BinarySandbox
        where P: Into<PathBuf> {
        BinarySandbox {
            binary: binary.into(),
        }
    }

    /// Render the given request into an invocation of the sandbox binary.
    fn build_command(&self, request: &RunRequest) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .arg("--exe-path").arg(&request.executable)
            .arg("--input").arg(&request.input_file)
            .arg("--output").arg(&request.output_file)
            .arg("--error").arg(&request.error_file)
            .arg("--log").arg(&request.log_file)
            .arg("--max-cpu-time").arg(request.limits.max_cpu_time.as_millis().to_string())
            .arg("--max-real-time").arg(request.limits.max_real_time.as_millis().to_string())
            .arg("--max-memory").arg(request.limits.max_memory.bytes().to_string())
            .arg("--max-stack").arg(request.limits.max_stack.bytes().to_string())
            .arg("--max-output-size").arg(request.limits.max_output_size.bytes().to_string())
            .arg("--uid").arg(request.uid.to_string())
            .arg("--gid").arg(request.gid.to_string());

        if let Some(count) = request.limits.max_process_count {
            command.arg("--max-process-count").arg(count.to_string());
        }
        if let Some(profile) = &request.seccomp_profile {
            command.arg("--seccomp-profile").arg(profile);
        }
        if request.memory_check_only {
            command.arg("--memory-check-only");
        }
        for env in &request.env {
            command.arg("--env").arg(env);
        }
        if !request.args.is_empty() {
            command.arg("--");
            command.args(&request.args);
        }

        command
    }
}

impl SandboxExecutor for BinarySandbox {
    fn execute(&self, request: &RunRequest) -> Result<RunReport> {
        if !self.binary.exists() {
            return Err(Error::from(ErrorKind::SandboxNotFound(self.binary.clone())));
        }

        let mut command = self.build_command(request);
        log::trace!("Invoking sandbox: {:?}", command);

        let output = command.output()?;
        if !output.status.success() {
            let detail = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            return Err(Error::from(ErrorKind::SandboxFailure(detail)));
        }

        let report: RunReport = serde_json::from_slice(&output.stdout)
            .map_err(|e| Error::from(ErrorKind::MalformedReport(e.to_string())))?;
        log::trace!("Sandbox report: {:?}", report);

        Ok(report)
    }
}
