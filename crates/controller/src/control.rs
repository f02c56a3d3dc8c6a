//! OSC control channel.
//!
//! Listens for OSC packets on a UDP socket and translates them into
//! [`LoopController`] calls:
//!
//! | Address | Arguments         | Action                    |
//! |---------|-------------------|---------------------------|
//! | `/play` | template name     | `LoopController::start`   |
//! | `/stop` | --                | `LoopController::stop`    |
//!
//! Anything else is logged and ignored. Commands run one at a time in
//! arrival order, so a `/stop` followed by `/play` never overlaps.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use rosc::{OscMessage, OscPacket, OscType};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::controller::LoopController;

pub const PLAY_ADDR: &str = "/play";
pub const STOP_ADDR: &str = "/stop";

/// A command decoded from an OSC message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Play(String),
    Stop,
}

impl ControlCommand {
    /// Decode a single OSC message, or `None` if it is not a command.
    pub fn from_message(msg: &OscMessage) -> Option<Self> {
        match msg.addr.as_str() {
            PLAY_ADDR => match msg.args.first() {
                Some(OscType::String(name)) => Some(Self::Play(name.clone())),
                other => {
                    tracing::warn!(arg = ?other, "Ignoring /play without a template name");
                    None
                }
            },
            STOP_ADDR => Some(Self::Stop),
            _ => None,
        }
    }
}

/// Collect every command in a packet, descending into bundles.
pub fn commands_from_packet(packet: &OscPacket) -> Vec<ControlCommand> {
    match packet {
        OscPacket::Message(msg) => ControlCommand::from_message(msg).into_iter().collect(),
        OscPacket::Bundle(bundle) => bundle.content.iter().flat_map(commands_from_packet).collect(),
    }
}

/// Run one command against the controller.
///
/// Template resolution failures are already logged by the controller
/// and go no further.
pub async fn apply(controller: &LoopController, command: ControlCommand) {
    match command {
        ControlCommand::Play(name) => {
            let _ = controller.start(&name).await;
        }
        ControlCommand::Stop => controller.stop().await,
    }
}

/// UDP server feeding OSC commands to a [`LoopController`].
pub struct ControlServer {
    socket: UdpSocket,
    controller: Arc<LoopController>,
}

impl ControlServer {
    pub async fn bind(addr: SocketAddr, controller: Arc<LoopController>) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self { socket, controller })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive and apply commands until `cancel` fires.
    ///
    /// A command already being applied runs to completion first.
    pub async fn run(self, cancel: CancellationToken) {
        let mut buf = [0u8; rosc::decoder::MTU];
        tracing::info!(addr = ?self.socket.local_addr().ok(), "OSC control server listening");

        loop {
            let (len, peer) = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("OSC control server shutting down");
                    break;
                }
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok(received) => received,
                    Err(e) => {
                        tracing::error!(error = %e, "OSC receive error");
                        continue;
                    }
                },
            };

            let packet = match rosc::decoder::decode_udp(&buf[..len]) {
                Ok((_, packet)) => packet,
                Err(e) => {
                    tracing::warn!(%peer, error = ?e, "Ignoring undecodable OSC packet");
                    continue;
                }
            };

            tracing::info!(%peer, ?packet, "OSC message");
            for command in commands_from_packet(&packet) {
                apply(&self.controller, command).await;
            }
        }
    }
}
