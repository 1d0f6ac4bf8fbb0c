//! Capability interface over the content video element.
//!
//! The element itself (DOM, styling, fullscreen APIs) lives in the host; the
//! controller only sees this trait plus the `SurfaceEvent`s the host feeds
//! back into the event loop.

use crate::config::Size;

/// How `preload` completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreloadStatus {
    /// Content is ready now; the first ad may be requested immediately.
    Ready,
    /// Ready once the host delivers `SurfaceEvent::MetadataLoaded`.
    AwaitingMetadata,
}

/// CSS positioning for `resize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Relative,
    Absolute,
}

/// Target layout of the player container and content element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceLayout {
    pub position: Position,
    /// `None` leaves the offset unset.
    pub top: Option<i32>,
    pub left: Option<i32>,
    pub width: u32,
    pub height: u32,
}

impl SurfaceLayout {
    pub fn normal(size: Size) -> Self {
        SurfaceLayout {
            position: Position::Relative,
            top: None,
            left: None,
            width: size.width,
            height: size.height,
        }
    }

    pub fn fullscreen(size: Size) -> Self {
        SurfaceLayout {
            position: Position::Absolute,
            top: Some(0),
            left: Some(0),
            width: size.width,
            height: size.height,
        }
    }
}

/// Notifications from the content element, delivered by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceEvent {
    MetadataLoaded,
    /// Only delivered while the ended listener is registered.
    ContentEnded,
}

pub trait VideoSurface: Send {
    /// Media-element `load()`. Must run inside the user gesture.
    fn load(&mut self);

    /// Prepare content for later programmatic playback.
    fn preload(&mut self) -> PreloadStatus;

    fn remove_preload_listener(&mut self);

    fn play(&mut self);

    fn pause(&mut self);

    fn resize(&mut self, layout: SurfaceLayout);

    /// Start delivering `SurfaceEvent::ContentEnded`.
    fn register_ended(&mut self);

    /// Stop delivering `SurfaceEvent::ContentEnded`.
    fn remove_ended(&mut self);

    /// Nominal player size.
    fn dimensions(&self) -> Size;
}
