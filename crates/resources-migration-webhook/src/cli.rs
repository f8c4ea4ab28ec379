//! Command line arguments of the webhook binary, using the `clap` crate.
//!
//! Every argument can also be provided through the environment variable of
//! the same name in upper snake case, e.g. `--schema-fetch-timeout` is read
//! from `SCHEMA_FETCH_TIMEOUT`.
use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::{Args, Parser};

use crate::{
    constants::{
        DEFAULT_CRD_NAME, DEFAULT_SOCKET_ADDRESS, DEFAULT_TLS_CERTIFICATE_PATH,
        DEFAULT_TLS_PRIVATE_KEY_PATH, DEFAULT_WEBHOOK_PATH,
    },
    defaulter::DefaulterOptions,
    logging::LogFormat,
    options::WebhookOptions,
};

#[derive(Debug, PartialEq, Eq, Parser)]
#[command(
    name = "resources-migration-webhook",
    version,
    about = "Mutating webhook moving container resources to the location the installed CRD expects"
)]
pub struct RunArguments {
    /// Name of the CRD whose installed schema selects the migration direction.
    #[arg(long, env, default_value = DEFAULT_CRD_NAME)]
    pub crd_name: String,

    /// HTTP path the mutating webhook is served at.
    #[arg(long, env, default_value = DEFAULT_WEBHOOK_PATH)]
    pub webhook_path: String,

    /// Admit every object unchanged.
    ///
    /// Useful when another instance of the webhook is responsible for the
    /// migration, or while the resource type is being upgraded.
    #[arg(long, env)]
    pub dormant: bool,

    /// Deadline for reading the CRD from the API server, e.g. `5s` or `1m`.
    #[arg(long, env, default_value = "10s", value_parser = humantime::parse_duration)]
    pub schema_fetch_timeout: Duration,

    #[command(flatten)]
    pub server: ServerOptions,

    #[command(flatten)]
    pub logging: LoggingOptions,
}

#[derive(Debug, PartialEq, Eq, Args)]
#[command(next_help_heading = "Server Options")]
pub struct ServerOptions {
    /// Socket address the HTTPS server binds to.
    #[arg(long, env, default_value_t = DEFAULT_SOCKET_ADDRESS)]
    pub bind_address: SocketAddr,

    /// PEM encoded certificate chain of the webhook, leaf first.
    #[arg(long, env, default_value = DEFAULT_TLS_CERTIFICATE_PATH)]
    pub tls_certificate: PathBuf,

    /// PEM encoded private key of the webhook certificate.
    #[arg(long, env, default_value = DEFAULT_TLS_PRIVATE_KEY_PATH)]
    pub tls_private_key: PathBuf,
}

#[derive(Debug, PartialEq, Eq, Args)]
#[command(next_help_heading = "Logging Options")]
pub struct LoggingOptions {
    /// Format of the console log output.
    #[arg(long, env, value_enum, default_value_t)]
    pub log_format: LogFormat,

    /// Additionally write logs to rotated files in this directory.
    #[arg(long, env)]
    pub log_directory: Option<PathBuf>,
}

impl RunArguments {
    pub fn defaulter_options(&self) -> DefaulterOptions {
        DefaulterOptions {
            crd_name: self.crd_name.clone(),
            dormant: self.dormant,
            schema_fetch_timeout: self.schema_fetch_timeout,
        }
    }

    pub fn webhook_options(&self) -> WebhookOptions {
        WebhookOptions::builder()
            .socket_addr(self.server.bind_address)
            .tls_certificate(&self.server.tls_certificate)
            .tls_private_key(&self.server.tls_private_key)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn verify_cli() {
        RunArguments::command().debug_assert();
    }

    #[test]
    fn defaults_match_constants() {
        let arguments = RunArguments::try_parse_from(["resources-migration-webhook"])
            .expect("defaults are valid");

        assert_eq!(arguments.defaulter_options(), DefaulterOptions::default());
        assert_eq!(arguments.webhook_options(), WebhookOptions::default());
        assert_eq!(arguments.webhook_path, DEFAULT_WEBHOOK_PATH);
        assert_eq!(arguments.logging.log_format, LogFormat::Plain);
    }

    #[test]
    fn parses_overrides() {
        let arguments = RunArguments::try_parse_from([
            "resources-migration-webhook",
            "--dormant",
            "--crd-name",
            "widgets.example.com",
            "--schema-fetch-timeout",
            "2s 500ms",
            "--bind-address",
            "127.0.0.1:9443",
            "--log-format",
            "json",
        ])
        .expect("arguments are valid");

        let options = arguments.defaulter_options();
        assert!(options.dormant);
        assert_eq!(options.crd_name, "widgets.example.com");
        assert_eq!(options.schema_fetch_timeout, Duration::from_millis(2500));
        assert_eq!(
            arguments.webhook_options().socket_addr,
            "127.0.0.1:9443".parse().expect("valid address")
        );
        assert_eq!(arguments.logging.log_format, LogFormat::Json);
    }
}
