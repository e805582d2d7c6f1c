use std::fs;
use std::time::Duration;

use devwire_session::connect_with_config;

use crate::cmd::SendArgs;
use crate::exit::{session_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_frame, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let connect_timeout = parse_duration(&args.connect_timeout)?;

    let mut config = args
        .framing
        .session_config()?
        .with_connect_timeout(Some(connect_timeout))
        .with_read_timeout(Some(timeout));
    if let Some(banner) = &args.banner_timeout {
        let banner = parse_duration(banner)?;
        config.telnet = config
            .telnet
            .map(|telnet| telnet.with_banner_timeout(banner));
    }

    let payload = resolve_payload(&args)?;
    let mut session = connect_with_config(args.addr.as_str(), config)
        .map_err(|err| session_error("connect failed", err))?;

    if args.no_wait {
        session
            .notify(&payload)
            .map_err(|err| session_error("send failed", err))?;
        session.close();
        return Ok(SUCCESS);
    }

    let reply = session
        .request(&payload)
        .map_err(|err| session_error("request failed", err))?;
    print_frame(&reply, session.id(), session.peer_addr(), format);
    session.close();
    Ok(SUCCESS)
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path).map_err(|err| {
            crate::exit::io_error(&format!("failed reading {}", path.display()), err)
        });
    }
    Ok(Vec::new())
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}
