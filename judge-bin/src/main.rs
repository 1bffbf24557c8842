//! A wrapper program for executing judging sessions in a CLI environment.
//!
//! The session configuration file (YAML) carries everything that describes
//! the environment rather than the single submission: the sandbox binary,
//! the run profile, the optional special judge and the engine identity.
//! Everything submission-specific comes in as command line arguments.
//!

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use error_chain::ChainedError;
use serde::Deserialize;

use judge::engine::{JudgeEngine, JudgeEngineConfig};
use judge::profile::{RunProfile, SpecialJudgeConfig};
use judge::{JudgeTaskDescriptor, ResourceLimits};
use sandbox::{BinarySandbox, MemorySize};

error_chain::error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }

    links {
        Judge(::judge::Error, ::judge::ErrorKind);
    }

    foreign_links {
        Io(::std::io::Error);
        Json(::serde_json::Error);
        Yaml(::serde_yaml::Error);
    }
}

/// The session configuration loaded from the `--config` file.
#[derive(Debug, Deserialize)]
struct SessionConfig {
    /// Path to the external sandbox binary.
    sandbox: PathBuf,

    /// How to launch the submission.
    run: RunProfile,

    /// How to launch the special judge, for catalogs that require one.
    #[serde(default)]
    special_judge: Option<SpecialJudgeConfig>,

    /// Engine identity and pool configuration.
    engine: JudgeEngineConfig,
}

impl SessionConfig {
    /// Load the session configuration from the given YAML file.
    fn from_file(path: &str) -> Result<SessionConfig> {
        let content = std::fs::read_to_string(path)
            .chain_err(|| format!("cannot read config file: \"{}\"", path))?;
        let config = serde_yaml::from_str(&content)
            .chain_err(|| format!("cannot parse config file: \"{}\"", path))?;
        Ok(config)
    }
}

fn get_arg_matches() -> clap::ArgMatches<'static> {
    clap::App::new("judge-bin")
        .version("0.1.0")
        .about("Judge a submission against a test case catalog.")
        .arg(clap::Arg::with_name("config")
            .short("c")
            .long("config")
            .required(true)
            .takes_value(true)
            .value_name("CONFIG_FILE")
            .help("path to the session configuration file"))
        .arg(clap::Arg::with_name("test_case_dir")
            .long("tc")
            .required(true)
            .takes_value(true)
            .value_name("TEST_CASE_DIR")
            .help("directory containing the test case catalog"))
        .arg(clap::Arg::with_name("submission_dir")
            .long("dir")
            .required(true)
            .takes_value(true)
            .value_name("SUBMISSION_DIR")
            .help("directory the per-case output files are written to"))
        .arg(clap::Arg::with_name("cpu_time_limit")
            .short("t")
            .long("cpu")
            .takes_value(true)
            .value_name("CPU_TIME_LIMIT")
            .default_value("1000")
            .help("CPU time limit, in milliseconds"))
        .arg(clap::Arg::with_name("memory_limit")
            .short("m")
            .long("memory")
            .takes_value(true)
            .value_name("MEMORY_LIMIT")
            .default_value("256")
            .help("memory limit, in megabytes"))
        .arg(clap::Arg::with_name("capture_output")
            .long("capture-output")
            .help("read the produced output back into each verdict"))
        .arg(clap::Arg::with_name("verbosity")
            .short("v")
            .multiple(true)
            .help("increase log verbosity"))
        .arg(clap::Arg::with_name("program")
            .required(true)
            .takes_value(true)
            .value_name("PROGRAM")
            .help("path to the submission executable to be judged"))
        .get_matches()
}

/// Parse an integral command line argument.
fn parse_arg<T>(matches: &clap::ArgMatches<'_>, name: &str) -> Result<T>
    where T: FromStr, T::Err: std::fmt::Display {
    let value = matches.value_of(name)
        .expect("missing command line argument with a default value");
    value.parse()
        .map_err(|e| Error::from(format!("invalid value for {}: \"{}\": {}", name, value, e)))
}

fn do_main() -> Result<()> {
    let matches = get_arg_matches();

    stderrlog::new()
        .verbosity(matches.occurrences_of("verbosity") as usize)
        .init()
        .expect("failed to initialize logging");

    let config = SessionConfig::from_file(
        matches.value_of("config").expect("missing config argument"))?;

    let cpu_time_limit: u64 = parse_arg(&matches, "cpu_time_limit")?;
    let memory_limit: usize = parse_arg(&matches, "memory_limit")?;
    let limits = ResourceLimits::new(
        Duration::from_millis(cpu_time_limit),
        MemorySize::MegaBytes(memory_limit));

    let mut task = JudgeTaskDescriptor::new(
        matches.value_of("program").expect("missing program argument"),
        matches.value_of("test_case_dir").expect("missing test case directory argument"),
        matches.value_of("submission_dir").expect("missing submission directory argument"),
        limits);
    task.run_profile = config.run;
    task.special_judge = config.special_judge;
    task.capture_output = matches.is_present("capture_output");

    let executor = Arc::new(BinarySandbox::new(config.sandbox));
    let engine = JudgeEngine::with_config(executor, config.engine);

    let verdicts = engine.judge(&task)?;
    println!("{}", serde_json::to_string_pretty(&verdicts)?);

    Ok(())
}

fn main() -> Result<()> {
    match do_main() {
        Ok(()) => Ok(()),
        Err(e) => {
            eprintln!("error: {}", e.display_chain().to_string());
            Err(e)
        }
    }
}
