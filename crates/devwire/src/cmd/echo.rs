use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use devwire_frame::Frame;
use devwire_session::{Server, SessionListener};

use crate::cmd::EchoArgs;
use crate::exit::{session_error, CliError, CliResult, SUCCESS};
use crate::output::OutputFormat;

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub fn run(args: EchoArgs, _format: OutputFormat) -> CliResult<i32> {
    let config = args.framing.session_config()?;
    let listener = SessionListener::bind(args.addr.as_str(), config)
        .map_err(|err| session_error("bind failed", err))?;

    let reverse = args.reverse;
    let server = Server::new(listener, move |frame| Some(respond(frame, reverse)))
        .spawn()
        .map_err(|err| session_error("server start failed", err))?;
    tracing::info!(addr = %server.local_addr(), reverse, "echo server ready");

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;
    while running.load(Ordering::SeqCst) {
        thread::sleep(STOP_POLL_INTERVAL);
    }

    server.shutdown();
    Ok(SUCCESS)
}

fn respond(frame: Frame, reverse: bool) -> Bytes {
    tracing::info!(size = frame.len(), "echoing frame");
    if !reverse {
        return frame.into_payload();
    }
    let mut payload = frame.payload.to_vec();
    payload.reverse();
    Bytes::from(payload)
}

pub(crate) fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
