use anyhow::bail;
use clap::{ArgAction, Parser};
use kakiko_core::converter::ConverterConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration for the `kakiko-server` binary.
///
/// All values are parsed from CLI arguments or environment variables (a
/// `.env` file is loaded first), with defaults suitable for a single-host
/// deployment.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "kakiko-server",
    version,
    about = "An HTTP service that converts MML into stored audio files"
)]
pub struct CliArgs {
    /// Interpreter used to run the converter script.
    ///
    /// Environment variable: `CONVERTER_INTERPRETER`
    #[arg(long, env = "CONVERTER_INTERPRETER", default_value = "python3")]
    pub converter_interpreter: PathBuf,

    /// Converter script. Invoked as `<interpreter> <script> <mml>`; it must
    /// print the produced file's path and exit with status 0.
    ///
    /// Environment variable: `CONVERTER_SCRIPT`
    #[arg(long, env = "CONVERTER_SCRIPT")]
    pub converter_script: PathBuf,

    /// Working directory for the converter. Inherited when unset.
    ///
    /// Environment variable: `CONVERTER_WORKDIR`
    #[arg(long, env = "CONVERTER_WORKDIR")]
    pub converter_workdir: Option<PathBuf>,

    /// Seconds a single conversion may run before it is killed.
    ///
    /// Environment variable: `CONVERTER_TIMEOUT_SECS`
    #[arg(long, env = "CONVERTER_TIMEOUT_SECS", default_value_t = 30)]
    pub converter_timeout_secs: u64,

    /// Number of worker tasks running conversions concurrently. This bounds
    /// the number of converter processes alive at any time.
    ///
    /// Environment variable: `NUM_WORKERS`
    #[arg(long, env = "NUM_WORKERS", default_value_t = 2)]
    pub num_workers: usize,

    /// Conversions each worker may have queued before callers wait.
    ///
    /// Environment variable: `QUEUE_DEPTH`
    #[arg(long, env = "QUEUE_DEPTH", default_value_t = 4)]
    pub queue_depth: usize,

    /// Seconds to wait for in-flight conversions to drain on shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 10)]
    pub shutdown_timeout: u64,

    /// Directory the local drive stores files in.
    ///
    /// Environment variable: `DRIVE_ROOT`
    #[arg(long, env = "DRIVE_ROOT", default_value = "./drive")]
    pub drive_root: PathBuf,

    /// Externally visible origin used to build file URLs.
    ///
    /// Environment variable: `PUBLIC_BASE_URL`
    #[arg(long, env = "PUBLIC_BASE_URL", default_value = "http://localhost:3000")]
    pub public_base_url: String,

    /// Append a random suffix to timestamp-derived file names so that two
    /// uploads in the same second do not share a name.
    ///
    /// Environment variable: `NAME_SUFFIX`
    #[arg(long, env = "NAME_SUFFIX", default_value_t = true, action = ArgAction::Set)]
    pub name_suffix: bool,

    /// Request header carrying the authenticated caller's user ID, set by
    /// the fronting auth layer. Requests without it are anonymous.
    ///
    /// Environment variable: `CALLER_HEADER`
    #[arg(long, env = "CALLER_HEADER", default_value = "x-kakiko-user")]
    pub caller_header: String,

    /// Address to listen on (TCP or Unix socket path; use --uds for Unix socket).
    ///
    /// Example: "0.0.0.0:3000" or "/tmp/kakiko.sock"
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:3000"))]
    pub server_addr: String,

    /// Listen on a Unix socket instead of TCP. If set, `SERVER_ADDR` must be a file path.
    #[arg(short, long, default_value_t = false)]
    pub uds: bool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub converter: ConverterConfig,
    pub num_workers: usize,
    pub queue_depth: usize,
    pub shutdown_timeout: Duration,
    pub drive_root: PathBuf,
    pub public_base_url: String,
    pub name_suffix: bool,
    pub caller_header: axum::http::HeaderName,
    pub server_addr: String,
    pub uds: bool,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.num_workers == 0 {
            bail!("NUM_WORKERS must be greater than 0");
        }

        if args.queue_depth == 0 {
            bail!("QUEUE_DEPTH must be greater than 0");
        }

        if args.converter_timeout_secs == 0 {
            bail!("CONVERTER_TIMEOUT_SECS must be greater than 0");
        }

        if args.converter_interpreter.as_os_str().is_empty() {
            bail!("CONVERTER_INTERPRETER must not be empty");
        }

        if args.converter_script.as_os_str().is_empty() {
            bail!("CONVERTER_SCRIPT must not be empty");
        }

        let caller_header = axum::http::HeaderName::try_from(args.caller_header.as_str())
            .map_err(|e| anyhow::anyhow!("CALLER_HEADER {:?} is invalid: {e}", args.caller_header))?;

        let mut converter = ConverterConfig::new(args.converter_interpreter, args.converter_script)
            .with_timeout(Duration::from_secs(args.converter_timeout_secs));
        if let Some(dir) = args.converter_workdir {
            converter = converter.with_working_dir(dir);
        }

        Ok(Self {
            converter,
            num_workers: args.num_workers,
            queue_depth: args.queue_depth,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
            drive_root: args.drive_root,
            public_base_url: args.public_base_url,
            name_suffix: args.name_suffix,
            caller_header,
            server_addr: args.server_addr,
            uds: args.uds,
        })
    }
}
