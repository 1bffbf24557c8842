//! Special judge invocation.
//!
//! The special judge is a problem-supplied verifier program used when
//! correctness cannot be decided by checksum comparison. It is trusted code,
//! but it still runs through the sandbox executor, under a relaxed limit
//! envelope and its own syscall filter profile.
//!

use std::path::{Path, PathBuf};

use sandbox::{MemorySize, RunLimits, RunOutcome, RunReport, RunRequest};

use crate::profile::SpecialJudgeConfig;
use crate::Result;

use super::{inherited_path_env, Session, STACK_SIZE};

/// Headroom multiplier granted to the special judge relative to the
/// submission's CPU and memory limits. The wall clock cap is the square of
/// it, applied to the submission's CPU limit.
const LIMIT_MULTIPLIER: u32 = 3;

/// Output cap for the special judge.
const OUTPUT_CAP: MemorySize = MemorySize::GigaBytes(1);

/// The judgement reported by one special judge invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpjOutcome {
    /// The special judge accepted the submission's answer.
    Accepted,

    /// The special judge rejected the submission's answer.
    WrongAnswer,

    /// The special judge failed; the case cannot be graded.
    Error,
}

/// Run the session's special judge over one test case's input and the
/// submission's output for it.
pub(super) fn invoke(
    session: &Session,
    config: &SpecialJudgeConfig,
    input_file: &Path,
    user_output_file: &Path) -> Result<SpjOutcome> {
    let argv = config.expand(input_file, user_output_file)?;

    // The special judge's own output is captured per invocation and never
    // inspected; only its exit status carries the judgement.
    let spj_output = tempfile::NamedTempFile::new()?;

    let limits = &session.task.limits;
    let request = RunRequest {
        executable: PathBuf::from(&argv[0]),
        args: argv[1..].to_vec(),
        env: vec![inherited_path_env()],
        input_file: input_file.to_owned(),
        output_file: spj_output.path().to_owned(),
        error_file: spj_output.path().to_owned(),
        limits: RunLimits {
            max_cpu_time: limits.max_cpu_time * LIMIT_MULTIPLIER,
            max_real_time: limits.max_cpu_time * (LIMIT_MULTIPLIER * LIMIT_MULTIPLIER),
            max_memory: MemorySize::Bytes(
                limits.max_memory.bytes() * LIMIT_MULTIPLIER as usize),
            max_stack: STACK_SIZE,
            max_output_size: OUTPUT_CAP,
            max_process_count: None,
        },
        seccomp_profile: config.seccomp_profile.clone(),
        uid: session.config.run_uid,
        gid: session.config.run_gid,
        log_file: session.config.sandbox_log_file.clone(),
        memory_check_only: false,
    };

    let report = session.executor.execute(&request)?;
    log::trace!("Special judge report: {:?}", report);

    Ok(classify_exit(&report))
}

/// Map the special judge's own exit status to a judgement.
///
/// Exit code 0 accepts the answer and exit code 1 rejects it. A runtime
/// error report with no signal and one of those two exit codes is a
/// controlled exit and keeps the exit code's meaning; every other abnormal
/// termination means the verification itself broke.
pub(crate) fn classify_exit(report: &RunReport) -> SpjOutcome {
    match report.outcome {
        RunOutcome::Success => exit_code_outcome(report.exit_code),
        RunOutcome::RuntimeError
            if report.signal == 0 && (report.exit_code == 0 || report.exit_code == 1) =>
            exit_code_outcome(report.exit_code),
        _ => SpjOutcome::Error,
    }
}

fn exit_code_outcome(exit_code: i32) -> SpjOutcome {
    match exit_code {
        0 => SpjOutcome::Accepted,
        1 => SpjOutcome::WrongAnswer,
        _ => SpjOutcome::Error,
    }
}
