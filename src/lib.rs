//! signalFlow Ads: ad-insertion controller for an embedded video player.
//!
//! The ad-session state machine, waterfall retries, skip cooldown and the
//! content-ended guard live here. The ad SDK, the content element and the
//! page chrome are reached only through the traits in `provider`,
//! `video_surface` and `app_core`. The CLI and the headless tests drive the
//! crate through `sim`.

pub mod ad_inserter;
pub mod ad_tag;
pub mod app_core;
pub mod beacon;
pub mod config;
pub mod error;
pub mod provider;
pub mod runtime;
pub mod sim;
pub mod skip_timer;
pub mod video_surface;
pub mod vpaid;
pub mod waterfall;
