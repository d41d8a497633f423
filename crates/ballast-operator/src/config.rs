//! Command line and environment configuration

use std::path::PathBuf;

use anyhow::Context as _;
use clap::{ArgAction, Parser, Subcommand};

use ballast_common::settings::{AutoscalerSettings, ImageRef, DEFAULT_CHART_VERSION};
use ballast_common::telemetry::LogFormat;

/// Ballast - cluster autoscaler lifecycle operator
#[derive(Parser, Debug)]
#[command(name = "ballast-operator", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand; `run` when omitted
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Log output format (text or json)
    #[arg(long, env = "BALLAST_LOG_FORMAT", default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Controller settings
    #[command(flatten)]
    pub run: RunArgs,
}

/// Operator subcommands
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Install CRDs and run the controllers (default)
    Run,
    /// Print the CRDs this operator owns and exit
    Crd,
}

/// Settings for the `run` command
#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    /// Path to a kubeconfig; in-cluster or default config when unset
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Helm repository serving the cluster-autoscaler chart; the subsystem is off without it
    #[arg(long, env = "BALLAST_AUTOSCALER_CHART_REPO")]
    pub chart_repo: Option<String>,

    /// Chart version to deploy
    #[arg(long, env = "BALLAST_AUTOSCALER_CHART_VERSION", default_value = DEFAULT_CHART_VERSION)]
    pub chart_version: String,

    /// Image override as `repository[:tag]`
    #[arg(long, env = "BALLAST_AUTOSCALER_IMAGE")]
    pub image: Option<String>,

    /// Management API server URL written into agent kubeconfigs
    #[arg(long, env = "BALLAST_SERVER_URL")]
    pub server_url: Option<String>,

    /// PEM CA bundle for the management API server
    #[arg(long, env = "BALLAST_CA_FILE")]
    pub ca_file: Option<PathBuf>,

    /// Master switch for the autoscaler subsystem
    #[arg(
        long,
        env = "BALLAST_FEATURE_CLUSTER_AUTOSCALING",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub autoscaling_enabled: bool,

    /// Store only a SHA-256 of issued tokens
    #[arg(
        long,
        env = "BALLAST_FEATURE_TOKEN_HASHING",
        default_value_t = false,
        action = ArgAction::Set
    )]
    pub token_hashing: bool,
}

impl RunArgs {
    /// Build autoscaler settings, or `None` when the subsystem is switched off
    pub fn autoscaler_settings(&self) -> anyhow::Result<Option<AutoscalerSettings>> {
        if !self.autoscaling_enabled {
            return Ok(None);
        }
        let Some(chart_repo) = self.chart_repo.as_deref().filter(|r| !r.trim().is_empty())
        else {
            return Ok(None);
        };
        let server_url = self
            .server_url
            .as_deref()
            .context("--server-url is required when the autoscaler chart repository is set")?;

        let mut settings = AutoscalerSettings::new(chart_repo, server_url);
        settings.chart_version = self.chart_version.clone();
        settings.token_hashing = self.token_hashing;
        settings.image_override = self
            .image
            .as_deref()
            .filter(|i| !i.trim().is_empty())
            .map(ImageRef::parse)
            .transpose()?;
        if let Some(path) = &self.ca_file {
            let pem = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read CA file {}", path.display()))?;
            settings.ca_cert = Some(pem);
        }

        settings.validate()?;
        Ok(Some(settings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["ballast-operator"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn story_no_chart_repo_disables_the_subsystem() {
        let cli = parse(&["--server-url", "https://mgmt:6443"]);
        assert_eq!(cli.command, None);
        if cli.run.chart_repo.is_none() {
            assert!(cli.run.autoscaler_settings().unwrap().is_none());
        }
    }

    #[test]
    fn story_feature_flag_off_wins_over_chart_repo() {
        let cli = parse(&[
            "--chart-repo",
            "https://charts.example",
            "--server-url",
            "https://mgmt:6443",
            "--autoscaling-enabled",
            "false",
        ]);
        assert!(cli.run.autoscaler_settings().unwrap().is_none());
    }

    #[test]
    fn story_flags_flow_into_settings() {
        let cli = parse(&[
            "--chart-repo",
            "https://charts.example",
            "--chart-version",
            "9.40.0",
            "--server-url",
            "https://mgmt:6443",
            "--image",
            "registry.local:5000/ca:v1.31.0",
            "--token-hashing",
            "true",
            "--log-format",
            "json",
            "run",
        ]);
        assert_eq!(cli.command, Some(Commands::Run));
        assert_eq!(cli.log_format, LogFormat::Json);

        let settings = cli.run.autoscaler_settings().unwrap().unwrap();
        assert_eq!(settings.chart_repo, "https://charts.example");
        assert_eq!(settings.chart_version, "9.40.0");
        assert!(settings.token_hashing);
        let image = settings.image_override.unwrap();
        assert_eq!(image.repository, "registry.local:5000/ca");
        assert_eq!(image.tag.as_deref(), Some("v1.31.0"));
    }

    #[test]
    fn missing_server_url_is_an_error() {
        let cli = parse(&["--chart-repo", "https://charts.example"]);
        if cli.run.server_url.is_none() {
            assert!(cli.run.autoscaler_settings().is_err());
        }
    }

    #[test]
    fn unreadable_ca_file_is_an_error() {
        let cli = parse(&[
            "--chart-repo",
            "https://charts.example",
            "--server-url",
            "https://mgmt:6443",
            "--ca-file",
            "/nonexistent/ballast/ca.pem",
        ]);
        let err = cli.run.autoscaler_settings().unwrap_err();
        assert!(err.to_string().contains("failed to read CA file"));
    }

    #[test]
    fn crd_subcommand_parses() {
        assert_eq!(parse(&["crd"]).command, Some(Commands::Crd));
    }
}
