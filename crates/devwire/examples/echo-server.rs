//! Minimal echo server: accepts one client and echoes lines back.
//!
//! Run with:
//!   cargo run --example echo-server
//!
//! In another terminal:
//!   cargo run --features cli -- send 127.0.0.1:5025 --data '*IDN?'

use devwire::session::{SessionConfig, SessionError, SessionListener};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let listener = SessionListener::bind("127.0.0.1:5025", SessionConfig::default())?;
    eprintln!("Listening on {}", listener.local_addr());

    // Accept one client and echo messages until disconnect.
    let mut session = listener.accept()?;
    eprintln!("Client connected: {}", session.id());

    loop {
        match session.receive(None) {
            Ok(frame) => {
                eprintln!("Received {} bytes", frame.len());
                session.send_frame(&frame.payload)?;
            }
            Err(SessionError::Closed) => {
                eprintln!("Client disconnected");
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}
