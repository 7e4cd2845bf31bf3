//! Browsing time tracker and site blocker.
//!
//! The browser extension reports focus changes to a native messaging host ([daemon]), which
//! accumulates time per site and hour ([tracking]) into a local JSON store. The `sitewatch`
//! binary ([cli]) reads the same store for reports and edits the block list.

pub mod cli;
pub mod daemon;
pub mod tracking;
pub mod utils;
