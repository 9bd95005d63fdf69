//! Simple cli/daemon for keeping track of how much time you spend on your targets.
//! Start a timer on a target, stop it whenever, and the accumulated total stays
//! correct even when the daemon was down in between.
//!

pub mod cli;
pub mod daemon;
pub mod fs;
pub mod status_api;
pub mod utils;
