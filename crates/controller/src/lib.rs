//! `flowcontrol` library crate.
//!
//! Loops a ComfyUI workflow on command: an OSC `/play <name>` starts
//! resubmitting the named workflow with fresh `$RANDOM` values, `/stop`
//! ends the loop once this client's queued work has drained. The binary
//! entrypoint lives in `main.rs`.

pub mod config;
pub mod control;
pub mod controller;
pub mod dispatch;
pub mod events;
pub mod notify;
