//! Playback core for the Reel TV client: native engine lifecycle, surface
//! binding, GPU compositing and subtitle identity.

#![allow(clippy::result_large_err)]

pub mod backends;
pub mod config;
pub mod logging;
pub mod player;

#[cfg(test)]
mod test_utils;

pub use config::Config;
pub use player::{PlayerError, PlayerHandle, PlayerResult};
