//! This module implements the core logic of the judge: for every test case
//! of a suite it runs the submission inside the sandbox executor, classifies
//! the low-level outcome into a verdict, and on unconstrained success hands
//! the produced output to the suite's verification path, either checksum
//! comparison or a special judge.
//!

pub mod checker;
pub mod spj;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use sandbox::{MemorySize, RunLimits, RunOutcome, RunRequest, SandboxExecutor};

use crate::catalog::{TestCase, TestSuite};
use crate::workers;
use crate::{CaseVerdict, Error, ErrorKind, JudgeTaskDescriptor, Result, Verdict};

use self::spj::SpjOutcome;

/// Stack size applied to every sandboxed run.
const STACK_SIZE: MemorySize = MemorySize::MegaBytes(128);

/// Floor of the per-case output capture cap. The actual cap is twice the
/// expected output size when that is larger, so legitimate large outputs are
/// never truncated while pathological ones stay bounded.
const MIN_OUTPUT_CAP: MemorySize = MemorySize::MegaBytes(16);

/// Configuration for a judge engine instance.
#[derive(Clone, Debug, Deserialize)]
pub struct JudgeEngineConfig {
    /// Effective user ID the submission and the special judge run under.
    pub run_uid: u32,

    /// Effective group ID the submission and the special judge run under.
    pub run_gid: u32,

    /// File the sandbox executor appends its diagnostics to.
    pub sandbox_log_file: PathBuf,

    /// Number of worker threads. `None` sizes the pool to the available
    /// CPU parallelism.
    #[serde(default)]
    pub workers: Option<usize>,
}

impl JudgeEngineConfig {
    /// Create a new `JudgeEngineConfig` with the unprivileged `nobody`
    /// identity and an auto-sized worker pool.
    pub fn new() -> Self {
        JudgeEngineConfig {
            run_uid: 65534,
            run_gid: 65534,
            sandbox_log_file: PathBuf::from("judge-run.log"),
            workers: None,
        }
    }
}

impl Default for JudgeEngineConfig {
    fn default() -> Self {
        JudgeEngineConfig::new()
    }
}

/// A judge engine instance.
pub struct JudgeEngine {
    /// The sandbox executor every run goes through.
    executor: Arc<dyn SandboxExecutor>,

    /// Configuration of the judge engine.
    pub config: JudgeEngineConfig,
}

impl JudgeEngine {
    /// Create a new `JudgeEngine` using the given sandbox executor and the
    /// default configuration.
    pub fn new(executor: Arc<dyn SandboxExecutor>) -> Self {
        JudgeEngine::with_config(executor, JudgeEngineConfig::new())
    }

    /// Create a new `JudgeEngine` using the given sandbox executor and
    /// configuration.
    pub fn with_config(executor: Arc<dyn SandboxExecutor>, config: JudgeEngineConfig) -> Self {
        JudgeEngine { executor, config }
    }

    /// Execute the given judge task and return one verdict per test case,
    /// in catalog order.
    ///
    /// The call either produces a verdict for every case of the suite or
    /// fails entirely: configuration and infrastructure failures propagate
    /// instead of degrading into verdicts.
    pub fn judge(&self, task: &JudgeTaskDescriptor) -> Result<Vec<CaseVerdict>> {
        let suite = TestSuite::load(&task.test_case_dir)?;

        // A special judge that is configured but not present on disk is a
        // configuration error; it fails the session before any run.
        if suite.special_judge {
            if let Some(config) = &task.special_judge {
                if !config.executable.exists() {
                    return Err(Error::from(
                        ErrorKind::SpecialJudgeNotFound(config.executable.clone())));
                }
            }
        }

        let worker_count = self.config.workers
            .unwrap_or_else(workers::default_worker_count);
        log::info!("Judging {} against {} test cases with {} workers",
            task.executable.display(), suite.cases.len(), worker_count);

        let session = Arc::new(Session {
            task: task.clone(),
            suite,
            config: self.config.clone(),
            executor: Arc::clone(&self.executor),
        });

        let worker_session = Arc::clone(&session);
        workers::dispatch(worker_count, session.suite.cases.len(),
            move |index| judge_one(&worker_session, index))
    }
}

/// Immutable context shared by all workers of one judging session.
pub(crate) struct Session {
    pub(crate) task: JudgeTaskDescriptor,
    pub(crate) suite: TestSuite,
    pub(crate) config: JudgeEngineConfig,
    pub(crate) executor: Arc<dyn SandboxExecutor>,
}

/// Judge the test case at the given catalog index.
fn judge_one(session: &Session, index: usize) -> Result<CaseVerdict> {
    let case = &session.suite.cases[index];
    log::debug!("Judging test case \"{}\"", case.id);

    let input_file = session.task.test_case_dir.join(&case.input_name);
    let user_output_file = session.task.submission_dir
        .join(format!("{}.out", case.id));

    let request = build_run_request(session, case, &input_file, &user_output_file)?;
    let report = session.executor.execute(&request)?;
    log::trace!("Sandbox report for case \"{}\": {:?}", case.id, report);

    let mut verdict = CaseVerdict {
        case_id: case.id.clone(),
        verdict: classify(report.outcome),
        cpu_time: report.cpu_time,
        real_time: report.real_time,
        memory: report.memory,
        exit_code: report.exit_code,
        signal: report.signal,
        output_checksum: None,
        output: None,
    };

    // Verification only runs against output of an unconstrained, complete
    // run; a violating run's output is not to be interpreted.
    if report.outcome.is_success() {
        if session.suite.special_judge {
            verdict.verdict = match &session.task.special_judge {
                Some(config) => {
                    match spj::invoke(session, config, &input_file, &user_output_file)? {
                        SpjOutcome::Accepted => Verdict::Accepted,
                        SpjOutcome::WrongAnswer => Verdict::WrongAnswer,
                        SpjOutcome::Error => Verdict::SystemError,
                    }
                },
                None => {
                    log::error!("Test suite \"{}\" requires a special judge but none is configured",
                        session.task.test_case_dir.display());
                    Verdict::SystemError
                }
            };
        } else {
            let (checksum, matched) = checker::compare(&user_output_file, &case.answer_checksum)?;
            if !matched {
                verdict.verdict = Verdict::WrongAnswer;
            }
            verdict.output_checksum = Some(checksum);
        }
    }

    if session.task.capture_output {
        // Diagnostic only; a failed read leaves the verdict untouched.
        verdict.output = fs::read_to_string(&user_output_file).ok();
    }

    Ok(verdict)
}

/// Build the sandbox run request for the submission on one test case.
fn build_run_request(
    session: &Session,
    case: &TestCase,
    input_file: &Path,
    user_output_file: &Path) -> Result<RunRequest> {
    let task = &session.task;

    let argv = task.run_profile.expand(
        &task.executable, task.limits.max_memory.kilobytes())?;

    let mut env = vec![inherited_path_env()];
    env.extend(task.run_profile.env.iter().cloned());

    let output_cap = MemorySize::Bytes(
        (case.answer_size.saturating_mul(2) as usize).max(MIN_OUTPUT_CAP.bytes()));

    Ok(RunRequest {
        executable: PathBuf::from(&argv[0]),
        args: argv[1..].to_vec(),
        env,
        input_file: input_file.to_owned(),
        output_file: user_output_file.to_owned(),
        error_file: user_output_file.to_owned(),
        limits: RunLimits {
            max_cpu_time: task.limits.max_cpu_time,
            max_real_time: task.limits.max_real_time(),
            max_memory: task.limits.max_memory,
            max_stack: STACK_SIZE,
            max_output_size: output_cap,
            max_process_count: None,
        },
        seccomp_profile: task.run_profile.seccomp_profile.clone(),
        uid: session.config.run_uid,
        gid: session.config.run_gid,
        log_file: session.config.sandbox_log_file.clone(),
        memory_check_only: task.run_profile.memory_check_only,
    })
}

/// Map a sandbox outcome to a verdict. `Success` maps to a provisional
/// `Accepted` that verification may still overturn.
fn classify(outcome: RunOutcome) -> Verdict {
    match outcome {
        RunOutcome::Success => Verdict::Accepted,
        RunOutcome::CpuTimeLimitExceeded
        | RunOutcome::RealTimeLimitExceeded => Verdict::TimeLimitExceeded,
        RunOutcome::MemoryLimitExceeded => Verdict::MemoryLimitExceeded,
        RunOutcome::RuntimeError => Verdict::RuntimeError,
        RunOutcome::SystemError => Verdict::SystemError,
    }
}

/// The `PATH` entry inherited from the judge's own environment.
fn inherited_path_env() -> String {
    format!("PATH={}", std::env::var("PATH").unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::fs::File;
    use std::io::Write;
    use std::sync::Mutex;
    use std::time::Duration;

    use sandbox::RunReport;

    use crate::profile::SpecialJudgeConfig;
    use crate::ResourceLimits;

    /// A scriptable sandbox executor: each invocation records the request
    /// and replays the next scripted run.
    struct MockSandbox {
        script: Mutex<VecDeque<MockRun>>,
        requests: Mutex<Vec<RunRequest>>,
    }

    struct MockRun {
        report: RunReport,
        /// Content the "submission" leaves in the request's output file.
        output: Option<String>,
    }

    impl MockSandbox {
        fn new(script: Vec<MockRun>) -> Arc<MockSandbox> {
            Arc::new(MockSandbox {
                script: Mutex::new(script.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<RunRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl SandboxExecutor for MockSandbox {
        fn execute(&self, request: &RunRequest) -> sandbox::Result<RunReport> {
            self.requests.lock().unwrap().push(request.clone());
            let run = self.script.lock().unwrap()
                .pop_front()
                .expect("sandbox invoked more often than scripted");
            if let Some(content) = &run.output {
                fs::write(&request.output_file, content).unwrap();
            }
            Ok(run.report)
        }
    }

    fn report(outcome: RunOutcome) -> RunReport {
        RunReport {
            outcome,
            exit_code: 0,
            signal: 0,
            cpu_time: Duration::from_millis(10),
            real_time: Duration::from_millis(20),
            memory: 4 * 1024 * 1024,
            error: None,
        }
    }

    fn spj_report(exit_code: i32) -> RunReport {
        RunReport {
            exit_code,
            ..report(RunOutcome::Success)
        }
    }

    fn success(output: &str) -> MockRun {
        MockRun {
            report: report(RunOutcome::Success),
            output: Some(output.to_owned()),
        }
    }

    fn failure(outcome: RunOutcome) -> MockRun {
        MockRun {
            report: report(outcome),
            output: None,
        }
    }

    fn silent(report: RunReport) -> MockRun {
        MockRun {
            report,
            output: None,
        }
    }

    /// Write a catalog document listing the given cases in order.
    fn write_catalog(dir: &Path, special_judge: bool, cases: &[(&str, &str, u64)]) {
        let entries: Vec<String> = cases.iter()
            .map(|(id, checksum, size)| format!(
                r#""{}": {{"input_name": "{}.in", "answer_checksum": "{}", "answer_size": {}}}"#,
                id, id, checksum, size))
            .collect();
        let document = format!(
            r#"{{"special_judge": {}, "test_cases": {{{}}}}}"#,
            special_judge, entries.join(","));
        let mut file = File::create(dir.join("info")).unwrap();
        file.write_all(document.as_bytes()).unwrap();
    }

    fn engine(mock: &Arc<MockSandbox>) -> JudgeEngine {
        let mut config = JudgeEngineConfig::new();
        // One worker keeps the scripted invocation order deterministic.
        config.workers = Some(1);
        let executor: Arc<dyn SandboxExecutor> = mock.clone();
        JudgeEngine::with_config(executor, config)
    }

    fn task(test_case_dir: &Path, submission_dir: &Path) -> JudgeTaskDescriptor {
        JudgeTaskDescriptor::new(
            "/opt/judge/solution",
            test_case_dir,
            submission_dir,
            ResourceLimits::new(Duration::from_millis(1000), MemorySize::MegaBytes(128)))
    }

    #[test]
    fn accepted_then_wrong_answer() {
        let tc_dir = tempfile::tempdir().unwrap();
        let sub_dir = tempfile::tempdir().unwrap();
        write_catalog(tc_dir.path(), false, &[
            ("1", &checker::checksum(b"first answer"), 16),
            ("2", &checker::checksum(b"second answer"), 16),
        ]);

        let mock = MockSandbox::new(vec![
            success("first answer\n"),
            success("something else\n"),
        ]);
        let verdicts = engine(&mock).judge(&task(tc_dir.path(), sub_dir.path())).unwrap();

        assert_eq!(2, verdicts.len());
        assert_eq!("1", verdicts[0].case_id);
        assert_eq!(Verdict::Accepted, verdicts[0].verdict);
        assert_eq!("2", verdicts[1].case_id);
        assert_eq!(Verdict::WrongAnswer, verdicts[1].verdict);

        // The produced checksum is reported either way and differs from the
        // expected one exactly when the answer was rejected.
        assert_eq!(Some(checker::checksum(b"first answer")),
            verdicts[0].output_checksum);
        let wrong = verdicts[1].output_checksum.as_ref().unwrap();
        assert_ne!(&checker::checksum(b"second answer"), wrong);
    }

    #[test]
    fn violations_map_directly_and_skip_verification() {
        let tc_dir = tempfile::tempdir().unwrap();
        let sub_dir = tempfile::tempdir().unwrap();
        write_catalog(tc_dir.path(), false, &[
            ("1", "aa", 1), ("2", "bb", 1), ("3", "cc", 1),
            ("4", "dd", 1), ("5", "ee", 1),
        ]);

        // None of these runs leaves an output file behind; reaching the
        // checksum verifier would fail the whole call.
        let mock = MockSandbox::new(vec![
            failure(RunOutcome::CpuTimeLimitExceeded),
            failure(RunOutcome::RealTimeLimitExceeded),
            failure(RunOutcome::MemoryLimitExceeded),
            failure(RunOutcome::RuntimeError),
            failure(RunOutcome::SystemError),
        ]);
        let verdicts = engine(&mock).judge(&task(tc_dir.path(), sub_dir.path())).unwrap();

        let expected = vec![
            Verdict::TimeLimitExceeded,
            Verdict::TimeLimitExceeded,
            Verdict::MemoryLimitExceeded,
            Verdict::RuntimeError,
            Verdict::SystemError,
        ];
        let actual: Vec<Verdict> = verdicts.iter().map(|v| v.verdict).collect();
        assert_eq!(expected, actual);
        assert!(verdicts.iter().all(|v| v.output_checksum.is_none()));
    }

    #[test]
    fn run_request_construction() {
        let tc_dir = tempfile::tempdir().unwrap();
        let sub_dir = tempfile::tempdir().unwrap();
        write_catalog(tc_dir.path(), false, &[
            ("7", &checker::checksum(b"x"), 4),
        ]);

        let mock = MockSandbox::new(vec![success("x")]);
        engine(&mock).judge(&task(tc_dir.path(), sub_dir.path())).unwrap();

        let requests = mock.requests();
        assert_eq!(1, requests.len());
        let request = &requests[0];

        assert_eq!(PathBuf::from("/opt/judge/solution"), request.executable);
        assert!(request.args.is_empty());
        assert!(request.env[0].starts_with("PATH="));
        assert_eq!(tc_dir.path().join("7.in"), request.input_file);
        assert_eq!(sub_dir.path().join("7.out"), request.output_file);
        assert_eq!(request.output_file, request.error_file);

        assert_eq!(Duration::from_millis(1000), request.limits.max_cpu_time);
        assert_eq!(Duration::from_millis(3000), request.limits.max_real_time);
        assert_eq!(MemorySize::MegaBytes(128), request.limits.max_memory);
        assert_eq!(MemorySize::MegaBytes(128), request.limits.max_stack);
        assert_eq!(MemorySize::MegaBytes(16), request.limits.max_output_size);
        assert_eq!(None, request.limits.max_process_count);

        assert_eq!(65534, request.uid);
        assert_eq!(65534, request.gid);
        assert!(!request.memory_check_only);
    }

    #[test]
    fn output_cap_follows_large_answers() {
        let tc_dir = tempfile::tempdir().unwrap();
        let sub_dir = tempfile::tempdir().unwrap();
        write_catalog(tc_dir.path(), false, &[
            ("1", &checker::checksum(b"x"), 20 * 1024 * 1024),
        ]);

        let mock = MockSandbox::new(vec![success("x")]);
        engine(&mock).judge(&task(tc_dir.path(), sub_dir.path())).unwrap();

        let requests = mock.requests();
        assert_eq!(MemorySize::Bytes(40 * 1024 * 1024),
            requests[0].limits.max_output_size);
    }

    #[test]
    fn special_judge_verdicts() {
        let tc_dir = tempfile::tempdir().unwrap();
        let sub_dir = tempfile::tempdir().unwrap();
        write_catalog(tc_dir.path(), true, &[
            ("1", "", 4), ("2", "", 4), ("3", "", 4),
        ]);
        let spj_exe = tc_dir.path().join("spj");
        fs::write(&spj_exe, b"").unwrap();

        let mock = MockSandbox::new(vec![
            success("answer 1\n"), silent(spj_report(0)),
            success("answer 2\n"), silent(spj_report(1)),
            success("answer 3\n"), silent(RunReport {
                outcome: RunOutcome::RuntimeError,
                signal: 11,
                ..spj_report(1)
            }),
        ]);

        let mut task = task(tc_dir.path(), sub_dir.path());
        task.special_judge = Some(SpecialJudgeConfig {
            executable: spj_exe.clone(),
            command: String::from("{exe_path} {in_file} {user_out_file}"),
            seccomp_profile: Some(String::from("general")),
        });

        let verdicts = engine(&mock).judge(&task).unwrap();
        let actual: Vec<Verdict> = verdicts.iter().map(|v| v.verdict).collect();
        assert_eq!(vec![
            Verdict::Accepted,
            Verdict::WrongAnswer,
            Verdict::SystemError,
        ], actual);
        assert!(verdicts.iter().all(|v| v.output_checksum.is_none()));

        // The special judge runs under the relaxed envelope with its own
        // filter profile.
        let requests = mock.requests();
        assert_eq!(6, requests.len());
        let spj_request = &requests[1];
        assert_eq!(spj_exe, spj_request.executable);
        assert_eq!(vec![
            tc_dir.path().join("1.in").to_string_lossy().into_owned(),
            sub_dir.path().join("1.out").to_string_lossy().into_owned(),
        ], spj_request.args);
        assert_eq!(Duration::from_millis(3000), spj_request.limits.max_cpu_time);
        assert_eq!(Duration::from_millis(9000), spj_request.limits.max_real_time);
        assert_eq!(MemorySize::Bytes(3 * 128 * 1024 * 1024),
            spj_request.limits.max_memory);
        assert_eq!(MemorySize::GigaBytes(1), spj_request.limits.max_output_size);
        assert_eq!(Some(String::from("general")), spj_request.seccomp_profile);
    }

    #[test]
    fn special_judge_required_but_not_configured() {
        let tc_dir = tempfile::tempdir().unwrap();
        let sub_dir = tempfile::tempdir().unwrap();
        write_catalog(tc_dir.path(), true, &[("1", "", 4), ("2", "", 4)]);

        let mock = MockSandbox::new(vec![
            success("answer 1\n"),
            success("answer 2\n"),
        ]);
        let verdicts = engine(&mock).judge(&task(tc_dir.path(), sub_dir.path())).unwrap();

        assert!(verdicts.iter().all(|v| v.verdict == Verdict::SystemError));
        // The submission ran once per case; the missing configuration is
        // detected without invoking the sandbox again.
        assert_eq!(2, mock.requests().len());
    }

    #[test]
    fn special_judge_binary_missing_fails_the_session() {
        let tc_dir = tempfile::tempdir().unwrap();
        let sub_dir = tempfile::tempdir().unwrap();
        write_catalog(tc_dir.path(), true, &[("1", "", 4)]);

        let mock = MockSandbox::new(vec![]);
        let mut task = task(tc_dir.path(), sub_dir.path());
        task.special_judge = Some(SpecialJudgeConfig {
            executable: tc_dir.path().join("missing-spj"),
            command: String::from("{exe_path} {in_file} {user_out_file}"),
            seccomp_profile: None,
        });

        match engine(&mock).judge(&task) {
            Err(Error(ErrorKind::SpecialJudgeNotFound(..), ..)) => (),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
        assert!(mock.requests().is_empty());
    }

    #[test]
    fn missing_catalog_fails_the_session() {
        let tc_dir = tempfile::tempdir().unwrap();
        let sub_dir = tempfile::tempdir().unwrap();

        let mock = MockSandbox::new(vec![]);
        match engine(&mock).judge(&task(tc_dir.path(), sub_dir.path())) {
            Err(Error(ErrorKind::CatalogNotFound(..), ..)) => (),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn capture_output_is_best_effort() {
        let tc_dir = tempfile::tempdir().unwrap();
        let sub_dir = tempfile::tempdir().unwrap();
        write_catalog(tc_dir.path(), false, &[
            ("1", &checker::checksum(b"hi"), 4),
            ("2", "bb", 1),
        ]);

        let mock = MockSandbox::new(vec![
            success("hi\n"),
            // No output file is produced; the read failure must not change
            // the verdict.
            failure(RunOutcome::RuntimeError),
        ]);
        let mut task = task(tc_dir.path(), sub_dir.path());
        task.capture_output = true;

        let verdicts = engine(&mock).judge(&task).unwrap();
        assert_eq!(Some(String::from("hi\n")), verdicts[0].output);
        assert_eq!(Verdict::RuntimeError, verdicts[1].verdict);
        assert_eq!(None, verdicts[1].output);
    }

    #[test]
    fn classification_is_deterministic() {
        let tc_dir = tempfile::tempdir().unwrap();
        write_catalog(tc_dir.path(), false, &[
            ("1", &checker::checksum(b"det"), 4),
            ("2", "bb", 1),
        ]);

        let mut rounds = Vec::new();
        for _ in 0..2 {
            let sub_dir = tempfile::tempdir().unwrap();
            let mock = MockSandbox::new(vec![
                success("det\n"),
                failure(RunOutcome::MemoryLimitExceeded),
            ]);
            let verdicts = engine(&mock)
                .judge(&task(tc_dir.path(), sub_dir.path()))
                .unwrap();
            rounds.push(verdicts.iter().map(|v| v.verdict).collect::<Vec<_>>());
        }
        assert_eq!(rounds[0], rounds[1]);
    }

    #[test]
    fn classify_outcomes() {
        assert_eq!(Verdict::Accepted, classify(RunOutcome::Success));
        assert_eq!(Verdict::TimeLimitExceeded,
            classify(RunOutcome::CpuTimeLimitExceeded));
        assert_eq!(Verdict::TimeLimitExceeded,
            classify(RunOutcome::RealTimeLimitExceeded));
        assert_eq!(Verdict::MemoryLimitExceeded,
            classify(RunOutcome::MemoryLimitExceeded));
        assert_eq!(Verdict::RuntimeError, classify(RunOutcome::RuntimeError));
        assert_eq!(Verdict::SystemError, classify(RunOutcome::SystemError));
    }
}
