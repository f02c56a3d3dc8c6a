//! OSC status notifications.
//!
//! Forwards [`LoopEvent`]s to the outbound OSC port so that whatever
//! drives `/play` and `/stop` can follow the loop:
//!
//! | Event                | Message                                   |
//! |----------------------|-------------------------------------------|
//! | `Started`            | `/started <template>`                     |
//! | `IterationCompleted` | `/iteration <template> <n> <elapsed_ms>`  |
//! | `SubmissionFailed`   | `/error <template> <message>`             |
//! | `Stopping`           | `/stopping <template>`                    |
//! | `Stopped`            | `/stopped <template> <iterations>`        |

use std::io;

use rosc::{OscMessage, OscPacket, OscType};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::events::LoopEvent;

/// Build the OSC message announcing `event`.
pub fn osc_message(event: &LoopEvent) -> OscMessage {
    let name = OscType::String(event.template().to_string());
    let int = |n: u64| OscType::Int(i32::try_from(n).unwrap_or(i32::MAX));

    let (addr, args) = match event {
        LoopEvent::Started { .. } => ("/started", vec![name]),
        LoopEvent::IterationCompleted {
            iteration,
            elapsed_ms,
            ..
        } => ("/iteration", vec![name, int(*iteration), int(*elapsed_ms)]),
        LoopEvent::SubmissionFailed { error, .. } => {
            ("/error", vec![name, OscType::String(error.clone())])
        }
        LoopEvent::Stopping { .. } => ("/stopping", vec![name]),
        LoopEvent::Stopped { iterations, .. } => ("/stopped", vec![name, int(*iterations)]),
    };

    OscMessage {
        addr: addr.to_string(),
        args,
    }
}

/// Sends loop events as OSC messages to a fixed target.
pub struct StatusNotifier {
    socket: UdpSocket,
    target: String,
}

impl StatusNotifier {
    /// Bind an ephemeral local socket that sends to `target` (`host:port`).
    pub async fn bind(target: impl Into<String>) -> io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        Ok(Self {
            socket,
            target: target.into(),
        })
    }

    /// Forward events until `cancel` fires or the channel closes.
    ///
    /// Events already buffered when `cancel` fires are still sent. Send
    /// failures and lagged receives are logged and skipped.
    pub async fn run(self, mut events: broadcast::Receiver<LoopEvent>, cancel: CancellationToken) {
        tracing::info!(dest = %self.target, "OSC status notifier started");

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                received = events.recv() => match received {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Status notifier lagged behind loop events");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };

            if let Err(e) = self.send(&event).await {
                tracing::warn!(dest = %self.target, error = %e, "Failed to send OSC status");
            }
        }

        self.flush(&mut events).await;
        tracing::info!("OSC status notifier stopped");
    }

    async fn flush(&self, events: &mut broadcast::Receiver<LoopEvent>) {
        while let Ok(event) = events.try_recv() {
            if let Err(e) = self.send(&event).await {
                tracing::warn!(dest = %self.target, error = %e, "Failed to send OSC status");
            }
        }
    }

    async fn send(&self, event: &LoopEvent) -> io::Result<()> {
        let packet = OscPacket::Message(osc_message(event));
        let bytes = rosc::encoder::encode(&packet)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("{e:?}")))?;
        self.socket.send_to(&bytes, self.target.as_str()).await?;
        Ok(())
    }
}
