use clap::Parser;
use easy_sast_api::validation::SUPPORTED_WORKFLOWS;
use std::path::PathBuf;

/// Default config file, resolved against the current directory.
pub const DEFAULT_CONFIG_FILE: &str = "config.yml";

#[derive(Parser, Clone, Default)]
#[command(name = "easy_sast")]
#[command(
    about = "Submit build artifacts to Veracode static analysis and check the application's policy compliance."
)]
#[command(version)]
pub struct Args {
    /// Veracode API key id (or set VERACODE_API_KEY_ID)
    #[arg(long = "api-key-id", help = "veracode api key id")]
    pub api_key_id: Option<String>,

    /// Veracode API key secret (or set VERACODE_API_KEY_SECRET)
    #[arg(long = "api-key-secret", help = "veracode api key secret")]
    pub api_key_secret: Option<String>,

    #[arg(long = "app-id", help = "application id as provided by Veracode")]
    pub app_id: Option<String>,

    #[arg(long = "build-dir", help = "a path containing build artifacts", value_parser = absolute_path)]
    pub build_dir: Option<PathBuf>,

    #[arg(long = "build-id", help = "application build id")]
    pub build_id: Option<String>,

    /// Sandbox to scan in, created if it does not exist yet
    #[arg(long = "sandbox-name", help = "name of the sandbox to submit the build to")]
    pub sandbox_name: Option<String>,

    #[arg(
        long = "config-file",
        help = "specify a config file",
        default_value = DEFAULT_CONFIG_FILE,
        value_parser = absolute_path
    )]
    pub config_file: PathBuf,

    #[arg(long = "disable-auto-scan", help = "disable auto_scan")]
    pub disable_auto_scan: bool,

    #[arg(
        long = "disable-scan-nonfatal-modules",
        help = "disable scan_all_nonfatal_top_level_modules"
    )]
    pub disable_scan_nonfatal_modules: bool,

    #[arg(
        long = "ignore-compliance-status",
        help = "ignore (but still check) the compliance status"
    )]
    pub ignore_compliance_status: bool,

    #[arg(
        long = "workflow",
        num_args = 1..,
        help = "specify the workflow steps to enable and order",
        value_parser = validate_workflow_step
    )]
    pub workflow: Option<Vec<String>>,

    #[arg(long = "debug", help = "enable debug level logging", conflicts_with = "verbose")]
    pub debug: bool,

    #[arg(long = "verbose", help = "enable info level logging")]
    pub verbose: bool,
}

impl Args {
    /// The log level requested on the command line, if any.
    #[must_use]
    pub fn loglevel(&self) -> Option<&'static str> {
        if self.debug {
            Some("DEBUG")
        } else if self.verbose {
            Some("INFO")
        } else {
            None
        }
    }
}

fn absolute_path(s: &str) -> Result<PathBuf, String> {
    if s.is_empty() {
        return Err("Path cannot be empty".to_string());
    }
    std::path::absolute(s).map_err(|e| format!("Unable to resolve {s}: {e}"))
}

fn validate_workflow_step(s: &str) -> Result<String, String> {
    if SUPPORTED_WORKFLOWS.contains(&s) {
        Ok(s.to_string())
    } else {
        Err(format!(
            "Unsupported workflow step '{s}'. Valid steps: {}",
            SUPPORTED_WORKFLOWS.join(", ")
        ))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["easy_sast"]).expect("no arguments are required");
        assert!(args.config_file.is_absolute());
        assert!(args.config_file.ends_with(DEFAULT_CONFIG_FILE));
        assert!(args.workflow.is_none());
        assert!(!args.disable_auto_scan);
        assert_eq!(args.loglevel(), None);
    }

    #[test]
    fn test_workflow_accepts_multiple_steps() {
        let args = Args::try_parse_from([
            "easy_sast",
            "--workflow",
            "check_compliance",
            "submit_artifacts",
        ])
        .expect("valid workflow");
        assert_eq!(
            args.workflow,
            Some(vec![
                "check_compliance".to_string(),
                "submit_artifacts".to_string()
            ])
        );
    }

    #[test]
    fn test_workflow_rejects_unknown_step() {
        assert!(Args::try_parse_from(["easy_sast", "--workflow", "deploy"]).is_err());
    }

    #[test]
    fn test_debug_and_verbose_are_exclusive() {
        assert!(Args::try_parse_from(["easy_sast", "--debug", "--verbose"]).is_err());

        let args = Args::try_parse_from(["easy_sast", "--verbose"]).expect("valid flags");
        assert_eq!(args.loglevel(), Some("INFO"));
        let args = Args::try_parse_from(["easy_sast", "--debug"]).expect("valid flags");
        assert_eq!(args.loglevel(), Some("DEBUG"));
    }

    #[test]
    fn test_build_dir_is_made_absolute() {
        let args = Args::try_parse_from(["easy_sast", "--build-dir", "target/release"])
            .expect("valid build dir");
        let build_dir = args.build_dir.expect("build dir set");
        assert!(build_dir.is_absolute());
        assert!(build_dir.ends_with("target/release"));
    }

    #[test]
    fn test_version_flag() {
        let err = Args::try_parse_from(["easy_sast", "--version"])
            .err()
            .expect("prints version");
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }
}
