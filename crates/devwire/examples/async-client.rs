//! Query a device once with the tokio session.
//!
//! Run with:
//!   cargo run --example async-client --features async -- 127.0.0.1:5025 '*IDN?'

use std::time::Duration;

use devwire::session::{AsyncSession, SessionConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let addr = args.next().unwrap_or_else(|| "127.0.0.1:5025".to_string());
    let query = args.next().unwrap_or_else(|| "*IDN?".to_string());

    let config = SessionConfig::default().with_read_timeout(Some(Duration::from_secs(5)));
    let mut session = AsyncSession::connect(addr.as_str(), config).await?;

    let reply = session.request(query.as_bytes()).await?;
    println!("{}", String::from_utf8_lossy(&reply.payload));

    session.close().await;
    Ok(())
}
