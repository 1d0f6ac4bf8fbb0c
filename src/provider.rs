//! Narrow event/command interface to the third-party ad SDK.
//!
//! The SDK is split the usual way: a long-lived loader that takes ad requests
//! and reports `AdsManagerLoaded`/errors, and per-response ad managers that
//! play the ads. Every manager is named by a `ManagerId`; once the controller
//! destroys a manager, events carrying its id are dropped unread.

use crate::config::Size;
use std::fmt;

/// Generation of an ad request. A newer request supersedes all older ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

/// Handle of one ad-manager instance, assigned by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ManagerId(pub u64);

impl fmt::Display for ManagerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    Normal,
    Fullscreen,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdsRequest {
    pub id: RequestId,
    pub ad_tag_url: String,
    pub linear_slot: Size,
    pub non_linear_slot: Size,
}

/// Event kinds a manager can be subscribed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdEventKind {
    ContentPauseRequested,
    ContentResumeRequested,
    AllAdsCompleted,
    Click,
    Complete,
    FirstQuartile,
    Loaded,
    Midpoint,
    Paused,
    Resumed,
    Started,
    ThirdQuartile,
    Impression,
    Skipped,
    VolumeChanged,
    VolumeMuted,
    AdError,
}

/// Everything the controller listens for on a fresh manager.
pub const MANAGER_EVENTS: &[AdEventKind] = &[
    AdEventKind::ContentPauseRequested,
    AdEventKind::ContentResumeRequested,
    AdEventKind::AdError,
    AdEventKind::AllAdsCompleted,
    AdEventKind::Impression,
    AdEventKind::Click,
    AdEventKind::Complete,
    AdEventKind::FirstQuartile,
    AdEventKind::Loaded,
    AdEventKind::Midpoint,
    AdEventKind::Paused,
    AdEventKind::Resumed,
    AdEventKind::Started,
    AdEventKind::VolumeChanged,
    AdEventKind::VolumeMuted,
    AdEventKind::Skipped,
    AdEventKind::ThirdQuartile,
];

/// Per-manager event.
#[derive(Debug, Clone, PartialEq)]
pub enum AdEvent {
    ContentPauseRequested,
    ContentResumeRequested,
    AllAdsCompleted,
    Click,
    Complete,
    FirstQuartile,
    Loaded { linear: bool },
    Midpoint,
    Paused,
    Resumed,
    Started,
    ThirdQuartile,
    Impression,
    Skipped,
    VolumeChanged,
    VolumeMuted,
    Error(String),
    /// An event type this build does not know about.
    Unsupported(String),
}

impl AdEvent {
    pub fn kind(&self) -> Option<AdEventKind> {
        let kind = match self {
            AdEvent::ContentPauseRequested => AdEventKind::ContentPauseRequested,
            AdEvent::ContentResumeRequested => AdEventKind::ContentResumeRequested,
            AdEvent::AllAdsCompleted => AdEventKind::AllAdsCompleted,
            AdEvent::Click => AdEventKind::Click,
            AdEvent::Complete => AdEventKind::Complete,
            AdEvent::FirstQuartile => AdEventKind::FirstQuartile,
            AdEvent::Loaded { .. } => AdEventKind::Loaded,
            AdEvent::Midpoint => AdEventKind::Midpoint,
            AdEvent::Paused => AdEventKind::Paused,
            AdEvent::Resumed => AdEventKind::Resumed,
            AdEvent::Started => AdEventKind::Started,
            AdEvent::ThirdQuartile => AdEventKind::ThirdQuartile,
            AdEvent::Impression => AdEventKind::Impression,
            AdEvent::Skipped => AdEventKind::Skipped,
            AdEvent::VolumeChanged => AdEventKind::VolumeChanged,
            AdEvent::VolumeMuted => AdEventKind::VolumeMuted,
            AdEvent::Error(_) => AdEventKind::AdError,
            AdEvent::Unsupported(_) => return None,
        };
        Some(kind)
    }
}

/// Everything the provider can deliver to the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    AdsManagerLoaded {
        request: RequestId,
        manager: ManagerId,
        custom_click_tracking: bool,
    },
    /// The loader failed before any manager existed for `request`.
    LoaderError { request: RequestId, message: String },
    Manager { manager: ManagerId, event: AdEvent },
}

/// Commands issued to the ad SDK.
pub trait AdProvider: Send {
    /// Initialise the ad display container. Must run inside the user gesture.
    fn initialize_display(&mut self);

    fn request_ads(&mut self, request: &AdsRequest);

    /// Content finished; lets the SDK play any pending post-roll.
    fn content_complete(&mut self);

    /// Register for `kinds` on `manager`. Returns the kinds this provider
    /// version actually supports; the rest are silently skipped.
    fn subscribe(&mut self, manager: ManagerId, kinds: &[AdEventKind]) -> Vec<AdEventKind>;

    /// Drop every listener registered for `manager`.
    fn unsubscribe_all(&mut self, manager: ManagerId);

    fn init(&mut self, manager: ManagerId, width: u32, height: u32, mode: ViewMode);

    fn start(&mut self, manager: ManagerId);

    fn pause(&mut self, manager: ManagerId);

    fn resume(&mut self, manager: ManagerId);

    fn resize(&mut self, manager: ManagerId, width: u32, height: u32, mode: ViewMode);

    fn set_volume(&mut self, manager: ManagerId, volume: f32);

    fn destroy(&mut self, manager: ManagerId);
}
