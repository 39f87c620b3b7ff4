use std::{path::PathBuf, time::Duration};

use anyhow::{Result, bail};
use clap::{Parser, error::ErrorKind};
use omics_run_engine::{GENERIC_FAILURE_EXIT_CODE, WorkflowNaming};
use omics_run_types::{CacheBehavior, RetentionMode, RunOptions, StorageType};
use omics_run_wdl::InputArgs;

/// Submit a WDL workflow to AWS HealthOmics and start a run.
///
/// The workflow (and a version per distinct source digest) is created on
/// first use and reused afterwards.
#[derive(Parser, Debug)]
#[command(name = "omics-run", version, about)]
pub struct Args {
    /// WDL document filename
    #[arg(value_name = "MAIN_WDL")]
    pub wdl: PathBuf,

    /// Workflow inputs. Optional space between = and value. For arrays
    /// repeat, key=value1 key=value2 ...
    #[arg(value_name = "INPUT_KEY=VALUE")]
    pub inputs: Vec<String>,

    /// Local directory to search for imports (can supply multiple times)
    #[arg(short = 'p', long = "path", value_name = "DIR")]
    pub path: Vec<PathBuf>,

    /// Build the workflow only (do not run)
    #[arg(short, long)]
    pub build: bool,

    /// Cromwell-style input JSON object, filename, or -; command-line inputs
    /// are merged in
    #[arg(short = 'i', long = "input", value_name = "INPUT.json")]
    pub input_file: Option<String>,

    /// Set a String input to the empty string or an Array input to []
    #[arg(long, value_name = "INPUT_KEY")]
    pub empty: Vec<String>,

    /// Set an optional input to None (overriding its default)
    #[arg(long, value_name = "INPUT_KEY")]
    pub none: Vec<String>,

    /// S3 URI prefix for workflow outputs
    #[arg(long, value_name = "OUTPUT_S3_URI", value_parser = parse_s3_uri)]
    pub output_uri: Option<String>,

    /// IAM role name or ARN the run assumes
    #[arg(long, value_name = "NAME_OR_ARN")]
    pub role: Option<String>,

    /// Run group name or id
    #[arg(long, value_name = "NAME_OR_ID")]
    pub run_group: Option<String>,

    /// Run cache name or id
    #[arg(long, value_name = "NAME_OR_ID")]
    pub cache: Option<String>,

    /// Run name
    #[arg(long)]
    pub name: Option<String>,

    /// Run priority
    #[arg(long)]
    pub priority: Option<i32>,

    /// Static storage capacity in gigabytes
    #[arg(long, value_name = "GB")]
    pub storage_capacity: Option<i32>,

    /// STATIC or DYNAMIC
    #[arg(long)]
    pub storage_type: Option<StorageType>,

    /// no, failure, always (or NO_CACHE, CACHE_ON_FAILURE, CACHE_ALWAYS)
    #[arg(long)]
    pub cache_behavior: Option<CacheBehavior>,

    /// RETAIN or REMOVE
    #[arg(long)]
    pub retention_mode: Option<RetentionMode>,

    /// Create one workflow per source digest named NAME.DIGEST instead of
    /// versions of a single workflow
    #[arg(long)]
    pub legacy_naming: bool,

    /// AWS region (defaults to the environment or profile)
    #[arg(long)]
    pub region: Option<String>,

    /// Give up waiting for a workflow or version to become ready after this
    /// many seconds
    #[arg(long, value_name = "SECONDS")]
    pub wait_timeout: Option<u64>,

    /// Maximally verbose logging
    #[arg(long)]
    pub debug: bool,
}

/// Exit code for a command line clap did not accept. Help and version
/// output is not a failure; every other rejection is a validation error.
pub fn usage_exit_code(error: &clap::Error) -> u8 {
    match error.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
        _ => GENERIC_FAILURE_EXIT_CODE,
    }
}

fn parse_s3_uri(raw: &str) -> Result<String, String> {
    if raw.starts_with("s3://") {
        Ok(raw.to_string())
    } else {
        Err("OUTPUT_S3_URI must be a s3:// URI".into())
    }
}

impl Args {
    pub fn input_args(&self) -> InputArgs {
        InputArgs {
            input_json: self.input_file.clone(),
            pairs: self.inputs.clone(),
            empty: self.empty.clone(),
            none: self.none.clone(),
        }
    }

    /// Run options other than the resolved run group and cache ids.
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            name: self.name.clone(),
            priority: self.priority,
            storage_capacity: self.storage_capacity,
            storage_type: self.storage_type,
            cache_behavior: self.cache_behavior,
            retention_mode: self.retention_mode,
            ..RunOptions::default()
        }
    }

    pub fn naming(&self) -> WorkflowNaming {
        if self.legacy_naming {
            WorkflowNaming::Legacy
        } else {
            WorkflowNaming::Versioned
        }
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout.map(Duration::from_secs)
    }

    /// Cross-argument checks clap cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.build {
            let run_only = !self.input_args().is_empty()
                || self.output_uri.is_some()
                || self.run_group.is_some()
                || self.cache.is_some()
                || self.run_options() != RunOptions::default();
            if run_only {
                bail!("workflow input/output and run arguments are not applicable with --build");
            }
            return Ok(());
        }
        if self.output_uri.is_none() {
            bail!("--output-uri URI is required to start run");
        }
        if self.role.is_none() {
            bail!("--role NAME_OR_ARN is required to start run");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("omics-run").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn run_options_parse_case_insensitively() {
        let args = parse(&[
            "align.wdl",
            "reads=s3://b/1.fq",
            "--output-uri",
            "s3://b/out/",
            "--role",
            "OmicsRole",
            "--cache-behavior",
            "failure",
            "--storage-type",
            "dynamic",
            "--priority",
            "3",
        ]);
        assert!(args.validate().is_ok());
        assert_eq!(args.inputs, vec!["reads=s3://b/1.fq"]);
        let options = args.run_options();
        assert_eq!(options.cache_behavior, Some(CacheBehavior::CacheOnFailure));
        assert_eq!(options.storage_type, Some(StorageType::Dynamic));
        assert_eq!(options.priority, Some(3));
        assert_eq!(options.run_group_id, None);
    }

    #[test]
    fn unknown_cache_behavior_fails_at_parse_time() {
        let result = Args::try_parse_from(["omics-run", "align.wdl", "--cache-behavior", "sometimes"]);
        assert!(result.is_err());
    }

    #[test]
    fn output_uri_must_be_s3() {
        let result = Args::try_parse_from(["omics-run", "align.wdl", "--output-uri", "/tmp/out"]);
        assert!(result.is_err());
    }

    #[test]
    fn rejected_arguments_exit_as_validation_errors() {
        let bad_option = Args::try_parse_from(["omics-run", "align.wdl", "--cache-behavior", "sometimes"]).unwrap_err();
        assert_eq!(usage_exit_code(&bad_option), GENERIC_FAILURE_EXIT_CODE);
        let bad_uri = Args::try_parse_from(["omics-run", "align.wdl", "--output-uri", "/tmp/out"]).unwrap_err();
        assert_eq!(usage_exit_code(&bad_uri), GENERIC_FAILURE_EXIT_CODE);
        let missing_wdl = Args::try_parse_from(["omics-run"]).unwrap_err();
        assert_eq!(usage_exit_code(&missing_wdl), GENERIC_FAILURE_EXIT_CODE);
        assert_ne!(usage_exit_code(&bad_option), omics_run_engine::RESOURCE_FAILURE_EXIT_CODE);

        let help = Args::try_parse_from(["omics-run", "--help"]).unwrap_err();
        assert_eq!(usage_exit_code(&help), 0);
        let version = Args::try_parse_from(["omics-run", "--version"]).unwrap_err();
        assert_eq!(usage_exit_code(&version), 0);
    }

    #[test]
    fn build_mode_rejects_run_arguments() {
        assert!(parse(&["align.wdl", "--build"]).validate().is_ok());
        assert!(parse(&["align.wdl", "--build", "reads=s3://b/1.fq"]).validate().is_err());
        assert!(parse(&["align.wdl", "--build", "--output-uri", "s3://b/out/"]).validate().is_err());
        assert!(parse(&["align.wdl", "--build", "--priority", "1"]).validate().is_err());
    }

    #[test]
    fn run_mode_requires_output_and_role() {
        assert!(parse(&["align.wdl"]).validate().is_err());
        assert!(parse(&["align.wdl", "--output-uri", "s3://b/out/"]).validate().is_err());
        assert_eq!(parse(&["align.wdl", "--legacy-naming"]).naming(), WorkflowNaming::Legacy);
    }
}
