//! JSON-lines panel server on stdin/stdout.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::info;

use crate::clock::SystemClock;
use crate::config::Settings;
use crate::events::TracingSink;
use crate::monitor::Monitor;
use crate::protocol::{Handler, Response};
use crate::tail::LocalFs;

/// How often the server checks whether a polling tick is due.
const CHECK_EVERY: Duration = Duration::from_millis(250);

pub async fn run(settings: Settings) -> Result<()> {
    let check_every = CHECK_EVERY.min(settings.interval());
    let mut handler = Handler::new(Monitor::new(LocalFs, SystemClock, TracingSink, settings));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut ticker = tokio::time::interval(check_every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    info!("serving panel requests on stdin");
    loop {
        let responses = tokio::select! {
            line = lines.next_line() => match line.context("failed to read from stdin")? {
                Some(line) => handler.handle_line(&line),
                None => break,
            },
            _ = ticker.tick() => handler.tick(),
        };
        write_responses(&mut stdout, &responses).await?;
    }

    info!("stdin closed, shutting down");
    Ok(())
}

async fn write_responses<W: AsyncWrite + Unpin>(out: &mut W, responses: &[Response]) -> Result<()> {
    if responses.is_empty() {
        return Ok(());
    }
    for response in responses {
        let mut line = serde_json::to_vec(response)?;
        line.push(b'\n');
        out.write_all(&line).await?;
    }
    out.flush().await?;
    Ok(())
}
