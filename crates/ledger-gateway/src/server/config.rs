use anyhow::bail;
use clap::{Parser, ValueEnum};
use core::time::Duration;
use ledger_gateway_core::types::Secret;
use std::path::PathBuf;

/// Runtime configuration for the `ledger-gateway` binary.
///
/// All values are parsed from CLI arguments or environment variables (a `.env`
/// file is loaded first), with defaults suitable for a container deployment.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "ledger-gateway",
    version,
    about = "A REST facade over a remote budget ledger"
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:3000"))]
    pub server_addr: String,

    /// Which ledger backend to talk to.
    ///
    /// `rpc` forwards every session to a remote ledger bridge; `memory` keeps
    /// a seeded ledger in-process, which is useful for local runs.
    ///
    /// Environment variable: `LEDGER_BACKEND`
    #[arg(long, env = "LEDGER_BACKEND", value_enum, default_value_t = Backend::Rpc)]
    pub backend: Backend,

    /// Base URL of the remote ledger server. Required for the `rpc` backend.
    ///
    /// Environment variable: `LEDGER_SERVER_URL`
    #[arg(long, env = "LEDGER_SERVER_URL")]
    pub server_url: Option<String>,

    /// Password used to connect to the ledger server.
    ///
    /// Environment variable: `LEDGER_PASSWORD`
    #[arg(long, env = "LEDGER_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Identifier of the ledger file every session synchronizes.
    ///
    /// Environment variable: `LEDGER_ID`
    #[arg(long, env = "LEDGER_ID")]
    pub ledger_id: String,

    /// Password protecting the ledger file itself, if it is encrypted.
    ///
    /// Environment variable: `LEDGER_FILE_PASSWORD`
    #[arg(long, env = "LEDGER_FILE_PASSWORD", hide_env_values = true)]
    pub file_password: Option<String>,

    /// Local directory holding the synchronized ledger cache.
    ///
    /// Environment variable: `LEDGER_DATA_DIR`
    #[arg(long, env = "LEDGER_DATA_DIR", default_value = "/app/datadir")]
    pub data_dir: PathBuf,

    /// Timeout for each call to the remote ledger server, in seconds.
    ///
    /// Environment variable: `LEDGER_REQUEST_TIMEOUT_SECS`
    #[arg(long, env = "LEDGER_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,

    /// How long shutdown waits for in-flight requests, in seconds.
    ///
    /// Environment variable: `DRAIN_TIMEOUT_SECS`
    #[arg(long, env = "DRAIN_TIMEOUT_SECS", default_value_t = 30)]
    pub drain_timeout_secs: u64,

    /// How long shutdown waits for an open ledger session to close, in
    /// seconds.
    ///
    /// Environment variable: `RELEASE_TIMEOUT_SECS`
    #[arg(long, env = "RELEASE_TIMEOUT_SECS", default_value_t = 5)]
    pub release_timeout_secs: u64,

    /// How long open connections may linger once the server has stopped, in
    /// seconds.
    ///
    /// Environment variable: `CONNECTION_GRACE_SECS`
    #[arg(long, env = "CONNECTION_GRACE_SECS", default_value_t = 5)]
    pub connection_grace_secs: u64,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Rpc,
    Memory,
}

/// Where and how sessions reach the ledger.
#[derive(Debug, Clone)]
pub struct LedgerSettings {
    pub backend: Backend,
    pub server_url: Option<String>,
    pub password: Option<Secret>,
    pub ledger_id: String,
    pub file_password: Option<Secret>,
    pub data_dir: PathBuf,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub ledger: LedgerSettings,
    pub drain_timeout: Duration,
    pub release_timeout: Duration,
    pub connection_grace: Duration,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let ledger_id = args.ledger_id.trim().to_string();
        if ledger_id.is_empty() {
            bail!("LEDGER_ID must not be empty");
        }

        let server_url = args
            .server_url
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty());

        if args.backend == Backend::Rpc {
            match &server_url {
                None => bail!("LEDGER_SERVER_URL is required for the rpc backend"),
                Some(url) if !(url.starts_with("http://") || url.starts_with("https://")) => {
                    bail!("LEDGER_SERVER_URL ({url}) must start with http:// or https://")
                }
                Some(_) => {}
            }
        }

        for (name, value) in [
            ("LEDGER_REQUEST_TIMEOUT_SECS", args.request_timeout_secs),
            ("DRAIN_TIMEOUT_SECS", args.drain_timeout_secs),
            ("RELEASE_TIMEOUT_SECS", args.release_timeout_secs),
            ("CONNECTION_GRACE_SECS", args.connection_grace_secs),
        ] {
            if value == 0 {
                bail!("{name} must be greater than 0");
            }
        }

        Ok(Self {
            server_addr: args.server_addr,
            ledger: LedgerSettings {
                backend: args.backend,
                server_url,
                password: args.password.map(Secret::from),
                ledger_id,
                file_password: args.file_password.map(Secret::from),
                data_dir: args.data_dir,
                request_timeout: Duration::from_secs(args.request_timeout_secs),
            },
            drain_timeout: Duration::from_secs(args.drain_timeout_secs),
            release_timeout: Duration::from_secs(args.release_timeout_secs),
            connection_grace: Duration::from_secs(args.connection_grace_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> CliArgs {
        let mut argv = vec!["ledger-gateway", "--ledger-id", "budget-1"];
        argv.extend_from_slice(extra);
        CliArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn rpc_backend_requires_server_url() {
        let err = ServerConfig::try_from(parse(&[])).unwrap_err();
        assert!(err.to_string().contains("LEDGER_SERVER_URL"));
    }

    #[test]
    fn rejects_non_http_server_url() {
        let err =
            ServerConfig::try_from(parse(&["--server-url", "ftp://ledger.local"])).unwrap_err();
        assert!(err.to_string().contains("http://"));
    }

    #[test]
    fn memory_backend_needs_no_server_url() {
        let config = ServerConfig::try_from(parse(&["--backend", "memory"])).unwrap();
        assert_eq!(config.ledger.backend, Backend::Memory);
        assert_eq!(config.ledger.ledger_id, "budget-1");
        assert_eq!(config.drain_timeout, Duration::from_secs(30));
    }

    #[test]
    fn rejects_zero_timeouts() {
        let err = ServerConfig::try_from(parse(&[
            "--backend",
            "memory",
            "--drain-timeout-secs",
            "0",
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("DRAIN_TIMEOUT_SECS"));
    }

    #[test]
    fn trims_trailing_slash_and_hides_secrets() {
        let config = ServerConfig::try_from(parse(&[
            "--server-url",
            "https://ledger.local/",
            "--password",
            "hunter2",
        ]))
        .unwrap();
        assert_eq!(
            config.ledger.server_url.as_deref(),
            Some("https://ledger.local")
        );
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
