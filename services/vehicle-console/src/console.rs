//! Driver input read from stdin

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use futures_util::StreamExt;
use resq_core::GeoPoint;
use resq_dispatch::{PositionError, PositionSource, PositionStream};
use std::str::FromStr;
use tokio::sync::watch;

pub const HELP: &str = "\
  pos <lat> <lng>   enter a position fix
  accept | decline  respond to the active offer
  arrived           report arrival at the destination
  completed         report the assignment completed
  refresh           re-query the current assignment
  status            print the current snapshot
  quit              shut down";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConsoleCommand {
    Position(GeoPoint),
    Accept,
    Decline,
    Arrived,
    Completed,
    Refresh,
    Status,
    Help,
    Quit,
}

impl FromStr for ConsoleCommand {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let verb = parts.next().unwrap_or_default().to_ascii_lowercase();
        let command = match verb.as_str() {
            "pos" | "position" => {
                let lat = parts.next().ok_or_else(|| anyhow!("pos needs <lat> <lng>"))?;
                let lng = parts.next().ok_or_else(|| anyhow!("pos needs <lat> <lng>"))?;
                let point = GeoPoint::new(lat.parse()?, lng.parse()?)?;
                ConsoleCommand::Position(point)
            }
            "accept" => ConsoleCommand::Accept,
            "decline" => ConsoleCommand::Decline,
            "arrived" => ConsoleCommand::Arrived,
            "completed" | "complete" => ConsoleCommand::Completed,
            "refresh" => ConsoleCommand::Refresh,
            "status" => ConsoleCommand::Status,
            "help" | "?" => ConsoleCommand::Help,
            "quit" | "exit" => ConsoleCommand::Quit,
            other => bail!("unknown command '{}', type 'help'", other),
        };
        if parts.next().is_some() {
            bail!("too many arguments for '{}'", verb);
        }
        Ok(command)
    }
}

/// Position source fed by `pos` commands
pub struct ConsolePositions {
    tx: watch::Sender<Option<GeoPoint>>,
}

impl ConsolePositions {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    pub fn push(&self, point: GeoPoint) {
        self.tx.send_replace(Some(point));
    }
}

#[async_trait]
impl PositionSource for ConsolePositions {
    async fn sample(&self) -> Result<GeoPoint, PositionError> {
        (*self.tx.borrow())
            .ok_or_else(|| PositionError::Unavailable("no fix entered yet".to_string()))
    }

    async fn watch(&self) -> Result<PositionStream, PositionError> {
        let rx = self.tx.subscribe();
        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            loop {
                if rx.changed().await.is_err() {
                    return None;
                }
                let fix = *rx.borrow_and_update();
                if let Some(point) = fix {
                    return Some((Ok(point), rx));
                }
            }
        });
        Ok(stream.boxed())
    }
}
