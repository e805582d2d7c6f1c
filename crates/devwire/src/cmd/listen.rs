use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use devwire_session::{SessionError, SessionListener};

use crate::cmd::echo::install_ctrlc_handler;
use crate::cmd::ListenArgs;
use crate::exit::{session_error, CliResult, SUCCESS};
use crate::output::{print_frame, OutputFormat};

/// How often a connected session re-checks for Ctrl-C.
const RECEIVE_SLICE: Duration = Duration::from_millis(250);

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let config = args.framing.session_config()?;
    let listener = SessionListener::bind(args.addr.as_str(), config)
        .map_err(|err| session_error("bind failed", err))?;
    tracing::info!(addr = %listener.local_addr(), "listening");

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;
    let shutdown = listener.shutdown_handle();
    let stopper = running.clone();
    std::thread::spawn(move || {
        while stopper.load(Ordering::SeqCst) {
            std::thread::sleep(RECEIVE_SLICE);
        }
        shutdown.shutdown();
    });

    let mut printed = 0usize;

    while running.load(Ordering::SeqCst) {
        let mut session = match listener.accept() {
            Ok(session) => session,
            Err(SessionError::Connection(devwire_transport::TransportError::Shutdown)) => break,
            Err(err) => return Err(session_error("accept failed", err)),
        };
        tracing::info!(session = session.id(), peer = ?session.peer_addr(), "client connected");

        while running.load(Ordering::SeqCst) {
            let frame = match session.receive(Some(RECEIVE_SLICE)) {
                Ok(frame) => frame,
                Err(SessionError::Timeout(_)) => continue,
                Err(SessionError::Closed) => break,
                Err(err) => return Err(session_error("receive failed", err)),
            };

            print_frame(&frame, session.id(), session.peer_addr(), format);
            printed = printed.saturating_add(1);

            if let Some(count) = args.count {
                if printed >= count {
                    return Ok(SUCCESS);
                }
            }
        }
    }

    Ok(SUCCESS)
}
