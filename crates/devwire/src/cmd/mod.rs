use std::path::PathBuf;

use clap::{Args, Subcommand};
use devwire_frame::Framing;
use devwire_session::{SessionConfig, TelnetConfig};

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod echo;
pub mod listen;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a request/response server that echoes (or reverses) each frame.
    Echo(EchoArgs),
    /// Send a single message and print the reply.
    Send(SendArgs),
    /// Accept connections and print received frames.
    Listen(ListenArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Echo(args) => echo::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Listen(args) => listen::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Framing options shared by every networked subcommand.
#[derive(Args, Debug, Clone)]
pub struct FramingArgs {
    /// Frame terminator: lf, crlf, cr, or an escaped string such as '\r\n'.
    #[arg(long, default_value = "lf", conflicts_with = "fixed_length")]
    pub terminator: String,
    /// Frame incoming messages by a fixed byte count instead of a terminator.
    #[arg(long, value_name = "BYTES")]
    pub fixed_length: Option<usize>,
    /// Marshal outgoing messages with a fixed byte count.
    #[arg(long, value_name = "BYTES", conflicts_with = "reply_terminator")]
    pub reply_fixed_length: Option<usize>,
    /// Terminator for outgoing messages when it differs from --terminator.
    #[arg(long)]
    pub reply_terminator: Option<String>,
    /// Maximum size of one incoming frame in bytes.
    #[arg(long, default_value_t = devwire_frame::DEFAULT_MAX_FRAME_SIZE)]
    pub max_frame_size: usize,
    /// Speak Telnet: escape IAC bytes and refuse option negotiation.
    #[arg(long)]
    pub telnet: bool,
}

impl FramingArgs {
    pub fn session_config(&self) -> CliResult<SessionConfig> {
        let framing = match self.fixed_length {
            Some(length) => Framing::FixedLength(length),
            None => Framing::sentinel(parse_terminator(&self.terminator)?),
        };
        framing
            .build()
            .map_err(|err| CliError::new(USAGE, format!("invalid framing: {err}")))?;

        let mut config = SessionConfig::default()
            .with_framing(framing)
            .with_max_frame_size(self.max_frame_size);

        let outbound = match (&self.reply_terminator, self.reply_fixed_length) {
            (_, Some(length)) => Some(Framing::FixedLength(length)),
            (Some(terminator), None) => Some(Framing::sentinel(parse_terminator(terminator)?)),
            (None, None) => None,
        };
        if let Some(outbound) = outbound {
            outbound
                .build()
                .map_err(|err| CliError::new(USAGE, format!("invalid reply framing: {err}")))?;
            config = config.with_outbound_framing(outbound);
        }

        if self.telnet {
            config = config.with_telnet(TelnetConfig::default());
        }
        Ok(config)
    }
}

/// Parse a terminator name or a backslash-escaped byte string.
pub fn parse_terminator(input: &str) -> CliResult<Vec<u8>> {
    let bytes = match input {
        "lf" => b"\n".to_vec(),
        "crlf" => b"\r\n".to_vec(),
        "cr" => b"\r".to_vec(),
        other => unescape(other)?,
    };
    if bytes.is_empty() {
        return Err(CliError::new(USAGE, "terminator must not be empty"));
    }
    Ok(bytes)
}

fn unescape(input: &str) -> CliResult<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut utf8 = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
            continue;
        }
        match chars.next() {
            Some('n') => out.push(b'\n'),
            Some('r') => out.push(b'\r'),
            Some('t') => out.push(b'\t'),
            Some('0') => out.push(0),
            Some('\\') => out.push(b'\\'),
            Some('x') => {
                let hex: String = chars.by_ref().take(2).collect();
                let byte = u8::from_str_radix(&hex, 16).map_err(|_| {
                    CliError::new(USAGE, format!("invalid hex escape in {input:?}"))
                })?;
                out.push(byte);
            }
            Some(other) => {
                return Err(CliError::new(
                    USAGE,
                    format!("unsupported escape \\{other} in {input:?}"),
                ))
            }
            None => return Err(CliError::new(USAGE, "dangling backslash in terminator")),
        }
    }
    Ok(out)
}

#[derive(Args, Debug)]
pub struct EchoArgs {
    /// Address to bind, e.g. 127.0.0.1:5025.
    pub addr: String,
    /// Reply with the payload reversed.
    #[arg(long)]
    pub reverse: bool,
    #[command(flatten)]
    pub framing: FramingArgs,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Device address, e.g. 192.168.1.20:5025.
    pub addr: String,
    /// Message payload; the terminator is appended.
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Read the payload from a file.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
    /// Do not wait for a reply.
    #[arg(long)]
    pub no_wait: bool,
    /// Maximum time to wait for the reply (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    /// Connection timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub connect_timeout: String,
    /// In Telnet mode, discard whatever the server sends within this time of connecting.
    #[arg(long, requires = "telnet")]
    pub banner_timeout: Option<String>,
    #[command(flatten)]
    pub framing: FramingArgs,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Address to bind, e.g. 0.0.0.0:5025.
    pub addr: String,
    /// Exit after receiving N frames.
    #[arg(long)]
    pub count: Option<usize>,
    #[command(flatten)]
    pub framing: FramingArgs,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
