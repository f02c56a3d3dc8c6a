//! Domain logic for the flowcontrol workflow looper.
//!
//! Pure types and transformations shared by the ComfyUI client and the
//! loop controller: client identity, workflow templates and the
//! `$RANDOM` placeholder expander.

pub mod error;
pub mod randomize;
pub mod templates;
pub mod types;
