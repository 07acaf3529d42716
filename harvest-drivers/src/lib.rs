//! Driver layer for browser automation.
//!
//! This crate exposes the WebDriver browser driver and the page/element
//! helpers the rendered fetch strategy drives.
//!
//! - [`harvest_browser::driver::HarvestDriver`]: one disposable WebDriver session
//! - [`harvest_browser::page::HarvestPage`]: navigation, DOM queries, quiescence waits
//! - [`harvest_browser::behavioral::BehavioralEngine`]: human-like timings and typing
//! - [`harvest_browser::stealth`]: launch arguments and JS evasions
pub mod harvest_browser;
