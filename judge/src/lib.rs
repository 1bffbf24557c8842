//! This crate implements the judging engine: it runs a compiled submission
//! against every test case of a catalog inside an external sandbox executor,
//! verifies the produced output either by checksum comparison or by invoking
//! a special judge program, and returns one verdict per test case in catalog
//! order.
//!
//! The sandbox executor itself is an external collaborator consumed through
//! the contract defined in the `sandbox` crate; this crate never trusts the
//! content or the behavior of the program being judged.
//!

pub mod catalog;
pub mod engine;
pub mod profile;

mod workers;

use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use sandbox::MemorySize;

error_chain::error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }

    links {
        Sandbox(::sandbox::Error, ::sandbox::ErrorKind);
    }

    foreign_links {
        Io(::std::io::Error);
        Json(::serde_json::Error);
        Yaml(::serde_yaml::Error);
    }

    errors {
        CatalogNotFound(dir: PathBuf) {
            description("test case catalog not found")
            display("test case catalog not found in: {}", dir.display())
        }

        CatalogCorrupt(detail: String) {
            description("test case catalog is corrupt")
            display("test case catalog is corrupt: {}", detail)
        }

        SpecialJudgeNotFound(path: PathBuf) {
            description("special judge binary not found")
            display("special judge binary not found: {}", path.display())
        }

        InvalidCommandTemplate(template: String) {
            description("invalid command template")
            display("invalid command template: \"{}\"", template)
        }

        InvalidWorkerCount {
            description("invalid number of workers")
        }

        WorkerPanicked(worker_id: usize) {
            description("worker thread panicked")
            display("worker thread #{} panicked", worker_id)
        }
    }
}

/// The classification of one test case's run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    /// The submission completed within its limits and its answer was
    /// accepted.
    Accepted,

    /// The submission completed within its limits but its answer was
    /// rejected.
    WrongAnswer,

    /// The submission exceeded its CPU or wall clock time limit.
    TimeLimitExceeded,

    /// The submission exceeded its memory limit.
    MemoryLimitExceeded,

    /// The submission terminated abnormally.
    RuntimeError,

    /// The judge could not grade the case for reasons not attributable to
    /// the submission.
    SystemError,
}

impl Verdict {
    /// Whether this verdict represents an accepted answer.
    pub fn is_accepted(self) -> bool {
        self == Verdict::Accepted
    }
}

impl Display for Verdict {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Verdict::Accepted => "Accepted",
            Verdict::WrongAnswer => "Wrong Answer",
            Verdict::TimeLimitExceeded => "Time Limit Exceeded",
            Verdict::MemoryLimitExceeded => "Memory Limit Exceeded",
            Verdict::RuntimeError => "Runtime Error",
            Verdict::SystemError => "System Error",
        };
        f.write_str(name)
    }
}

/// Resource limits granted to the submission for one judging session.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU time available to the submission on each test case.
    pub max_cpu_time: Duration,

    /// Memory available to the submission on each test case.
    pub max_memory: MemorySize,
}

impl ResourceLimits {
    /// Create a new `ResourceLimits` value.
    pub fn new(max_cpu_time: Duration, max_memory: MemorySize) -> Self {
        ResourceLimits {
            max_cpu_time,
            max_memory,
        }
    }

    /// Wall clock time available to the submission on each test case. The
    /// cap is three times the CPU time limit, generous enough to absorb
    /// scheduling jitter without masking real CPU time violations.
    pub fn max_real_time(&self) -> Duration {
        self.max_cpu_time * 3
    }
}

/// The verdict of one test case. Values of this type are terminal: they are
/// produced once per case per session and never mutated afterwards.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaseVerdict {
    /// Identifier of the test case within its catalog.
    pub case_id: String,

    /// Classification of the run.
    pub verdict: Verdict,

    /// CPU time consumed by the submission.
    pub cpu_time: Duration,

    /// Wall clock time consumed by the submission.
    pub real_time: Duration,

    /// Peak memory usage of the submission, in bytes.
    pub memory: u64,

    /// Exit code of the submission.
    pub exit_code: i32,

    /// Signal that terminated the submission, or 0.
    pub signal: i32,

    /// Checksum of the produced output. Only populated when checksum
    /// verification ran.
    pub output_checksum: Option<String>,

    /// The produced output itself. Only populated on request, best effort.
    pub output: Option<String>,
}

/// Describes one judging session: which executable to judge, against which
/// test case catalog, under which limits and run configuration.
#[derive(Clone, Debug)]
pub struct JudgeTaskDescriptor {
    /// Path to the submission's executable file.
    pub executable: PathBuf,

    /// Directory containing the test case catalog and its input files.
    pub test_case_dir: PathBuf,

    /// Directory the per-case output files are written to. Each case writes
    /// to its own `<case_id>.out` file, so concurrent workers never share a
    /// file.
    pub submission_dir: PathBuf,

    /// Resource limits granted to the submission.
    pub limits: ResourceLimits,

    /// How to launch the submission.
    pub run_profile: profile::RunProfile,

    /// How to launch the special judge, for catalogs that require one.
    pub special_judge: Option<profile::SpecialJudgeConfig>,

    /// Read the produced output back into each verdict.
    pub capture_output: bool,
}

impl JudgeTaskDescriptor {
    /// Create a new `JudgeTaskDescriptor` with the default run profile, no
    /// special judge and no output capture.
    pub fn new<P1, P2, P3>(
        executable: P1,
        test_case_dir: P2,
        submission_dir: P3,
        limits: ResourceLimits) -> Self
        where P1: Into<PathBuf>, P2: Into<PathBuf>, P3: Into<PathBuf> {
        JudgeTaskDescriptor {
            executable: executable.into(),
            test_case_dir: test_case_dir.into(),
            submission_dir: submission_dir.into(),
            limits,
            run_profile: profile::RunProfile::default(),
            special_judge: None,
            capture_output: false,
        }
    }
}
