//! Command-line interface.

use std::ffi::OsString;
use std::path::PathBuf;

use thiserror::Error;

/// Command-line arguments. Unset options leave the config file and
/// environment values alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Args {
    pub host: Option<String>,
    pub port: Option<u16>,
    /// JSON configuration file.
    pub config: Option<PathBuf>,
    /// Log filter (error, warn, info, debug, trace, or an `EnvFilter` directive).
    pub log_level: Option<String>,
    /// Serve simulated devices instead of dialing out.
    pub simulate: bool,
    pub version: bool,
    pub help: bool,
}

/// Parse command-line arguments.
pub fn parse_args() -> Result<Args, ArgsError> {
    parse_args_from(std::env::args_os())
}

/// Parse arguments from an iterator whose first item is the program name.
pub fn parse_args_from<I>(args: I) -> Result<Args, ArgsError>
where
    I: IntoIterator<Item = OsString>,
{
    use lexopt::prelude::*;

    let mut result = Args::default();
    let mut parser = lexopt::Parser::from_iter(args);

    while let Some(arg) = parser.next()? {
        match arg {
            Short('h') | Long("help") => result.help = true,
            Short('V') | Long("version") => result.version = true,
            Short('H') | Long("host") => {
                result.host = Some(parser.value()?.parse()?);
            }
            Short('p') | Long("port") => {
                let value: String = parser.value()?.parse()?;
                let port = value
                    .parse()
                    .map_err(|_| ArgsError::InvalidValue("port", value))?;
                result.port = Some(port);
            }
            Short('c') | Long("config") => {
                result.config = Some(parser.value()?.parse()?);
            }
            Short('l') | Long("log-level") => {
                result.log_level = Some(parser.value()?.parse()?);
            }
            Long("simulate") => result.simulate = true,
            Value(val) => {
                return Err(ArgsError::UnexpectedArgument(val.to_string_lossy().into()));
            }
            _ => return Err(arg.unexpected().into()),
        }
    }

    Ok(result)
}

/// Print help message.
pub fn print_help() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        r#"netgate {version}
HTTP gateway for SSH/Telnet CLI sessions to network devices

USAGE:
    netgate [OPTIONS]

OPTIONS:
    -H, --host <ADDR>       Address to bind [default: 127.0.0.1]
    -p, --port <PORT>       Port to listen on [default: 5000]
    -c, --config <FILE>     Configuration file (JSON)
    -l, --log-level <LVL>   Log level (error, warn, info, debug, trace)
        --simulate          Answer with simulated Cisco devices instead of dialing out
    -h, --help              Print help
    -V, --version           Print version

ENVIRONMENT VARIABLES:
    NETGATE_HOST               Bind address (overrides config)
    NETGATE_PORT               Port (overrides config)
    NETGATE_LOG_LEVEL          Log level (overrides config)
    NETGATE_IDLE_TIMEOUT_SECS  Idle session timeout (overrides config)
    RUST_LOG                   Alternative log level setting

EXAMPLES:
    # Try the API without any devices
    netgate --simulate

    # Listen on all interfaces with a config file
    netgate -H 0.0.0.0 -c /etc/netgate/config.json
"#
    );
}

/// Print version.
pub fn print_version() {
    println!("netgate {}", env!("CARGO_PKG_VERSION"));
}

/// Argument parsing errors.
#[derive(Debug, Error)]
pub enum ArgsError {
    #[error(transparent)]
    Lexopt(#[from] lexopt::Error),

    #[error("invalid value for --{0}: '{1}'")]
    InvalidValue(&'static str, String),

    #[error("unexpected argument: '{0}'")]
    UnexpectedArgument(String),
}
