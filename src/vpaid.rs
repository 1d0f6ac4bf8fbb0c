//! VPAID 2.0 creative surface over `AppCore`.
//!
//! A VPAID player loads this adapter as the creative, hands it the waterfall
//! as `AdParameters`, and listens for the events it subscribed to.

use crate::ad_inserter::SessionState;
use crate::app_core::{AppCore, AppParts, HostEvent};
use crate::config::{PlayerConfig, Size};
use crate::error::{AdError, Result};
use crate::provider::{ProviderEvent, ViewMode};
use crate::video_surface::SurfaceEvent;
use crate::waterfall::Waterfall;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum VpaidEvent {
    AdLoaded,
    AdStarted,
    AdStopped,
    AdSkipped,
    AdSizeChange,
    AdExpanded,
    AdImpression,
    AdVideoStart,
    AdVideoFirstQuartile,
    AdVideoMidpoint,
    AdVideoThirdQuartile,
    AdVideoComplete,
    AdClickThru,
    AdPaused,
    AdPlaying,
    AdVolumeChange,
}

impl VpaidEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            VpaidEvent::AdLoaded => "AdLoaded",
            VpaidEvent::AdStarted => "AdStarted",
            VpaidEvent::AdStopped => "AdStopped",
            VpaidEvent::AdSkipped => "AdSkipped",
            VpaidEvent::AdSizeChange => "AdSizeChange",
            VpaidEvent::AdExpanded => "AdExpanded",
            VpaidEvent::AdImpression => "AdImpression",
            VpaidEvent::AdVideoStart => "AdVideoStart",
            VpaidEvent::AdVideoFirstQuartile => "AdVideoFirstQuartile",
            VpaidEvent::AdVideoMidpoint => "AdVideoMidpoint",
            VpaidEvent::AdVideoThirdQuartile => "AdVideoThirdQuartile",
            VpaidEvent::AdVideoComplete => "AdVideoComplete",
            VpaidEvent::AdClickThru => "AdClickThru",
            VpaidEvent::AdPaused => "AdPaused",
            VpaidEvent::AdPlaying => "AdPlaying",
            VpaidEvent::AdVolumeChange => "AdVolumeChange",
        }
    }

    /// Host events the adapter re-publishes. Volume changes are announced by
    /// `set_ad_volume` itself.
    fn from_host(event: HostEvent) -> Option<Self> {
        let mapped = match event {
            HostEvent::AdImpression => VpaidEvent::AdImpression,
            HostEvent::AdVideoStart => VpaidEvent::AdVideoStart,
            HostEvent::AdVideoFirstQuartile => VpaidEvent::AdVideoFirstQuartile,
            HostEvent::AdVideoMidpoint => VpaidEvent::AdVideoMidpoint,
            HostEvent::AdVideoThirdQuartile => VpaidEvent::AdVideoThirdQuartile,
            HostEvent::AdVideoComplete => VpaidEvent::AdVideoComplete,
            HostEvent::AdClickThru => VpaidEvent::AdClickThru,
            HostEvent::AdSkipped => VpaidEvent::AdSkipped,
            HostEvent::AdPaused => VpaidEvent::AdPaused,
            HostEvent::AdPlaying => VpaidEvent::AdPlaying,
            HostEvent::AdStopped => VpaidEvent::AdStopped,
            HostEvent::AdVolumeChange => return None,
        };
        Some(mapped)
    }
}

impl fmt::Display for VpaidEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VpaidEvent {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        const ALL: &[VpaidEvent] = &[
            VpaidEvent::AdLoaded,
            VpaidEvent::AdStarted,
            VpaidEvent::AdStopped,
            VpaidEvent::AdSkipped,
            VpaidEvent::AdSizeChange,
            VpaidEvent::AdExpanded,
            VpaidEvent::AdImpression,
            VpaidEvent::AdVideoStart,
            VpaidEvent::AdVideoFirstQuartile,
            VpaidEvent::AdVideoMidpoint,
            VpaidEvent::AdVideoThirdQuartile,
            VpaidEvent::AdVideoComplete,
            VpaidEvent::AdClickThru,
            VpaidEvent::AdPaused,
            VpaidEvent::AdPlaying,
            VpaidEvent::AdVolumeChange,
        ];
        ALL.iter()
            .copied()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| format!("unknown VPAID event '{}'", s))
    }
}

/// VPAID view mode string to provider view mode.
pub fn parse_view_mode(view_mode: &str) -> ViewMode {
    if view_mode.eq_ignore_ascii_case("fullscreen") {
        ViewMode::Fullscreen
    } else {
        ViewMode::Normal
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AdAttributes {
    pub companions: String,
    pub desired_bitrate: u32,
    pub duration: i32,
    pub expanded: bool,
    pub height: u32,
    pub icons: String,
    pub linear: bool,
    pub remaining_time: i32,
    pub view_mode: String,
    pub width: u32,
    pub volume: f32,
}

impl Default for AdAttributes {
    fn default() -> Self {
        AdAttributes {
            companions: String::new(),
            desired_bitrate: 256,
            duration: 10,
            expanded: false,
            height: 0,
            icons: String::new(),
            linear: true,
            remaining_time: 10,
            view_mode: "normal".to_string(),
            width: 0,
            volume: 1.0,
        }
    }
}

type Callback = Box<dyn FnMut() + Send>;

pub struct VpaidAd {
    config: PlayerConfig,
    attributes: AdAttributes,
    callbacks: HashMap<VpaidEvent, Callback>,
    app: Option<AppCore>,
}

impl VpaidAd {
    pub fn new(config: PlayerConfig) -> Self {
        VpaidAd {
            config,
            attributes: AdAttributes::default(),
            callbacks: HashMap::new(),
            app: None,
        }
    }

    pub fn handshake_version(&self, version: &str) -> String {
        version.to_string()
    }

    /// Parse the waterfall from `ad_parameters` and build the session. The
    /// surface in `parts` should already be sized `width`×`height`.
    pub fn init_ad(
        &mut self,
        width: u32,
        height: u32,
        view_mode: &str,
        desired_bitrate: u32,
        ad_parameters: &str,
        parts: AppParts,
    ) -> Result<()> {
        self.attributes.width = width;
        self.attributes.height = height;
        self.attributes.view_mode = view_mode.to_string();
        self.attributes.desired_bitrate = desired_bitrate;

        let waterfall = Waterfall::from_creative_data(ad_parameters)?;
        debug!(candidates = waterfall.len(), "vpaid init");
        self.app = Some(AppCore::new(self.config.clone(), waterfall, parts));
        self.emit(VpaidEvent::AdLoaded);
        Ok(())
    }

    /// Runs on the player's start call, which counts as the user gesture.
    pub fn start_ad(&mut self, now: Instant) -> Result<()> {
        self.app_or_err("start ad")?.on_user_click(now)?;
        self.emit(VpaidEvent::AdStarted);
        self.forward_host_events();
        Ok(())
    }

    pub fn stop_ad(&mut self) {
        match self.app.as_mut() {
            Some(app) => app.stop(),
            None => self.emit(VpaidEvent::AdStopped),
        }
        self.forward_host_events();
    }

    pub fn resize_ad(&mut self, width: u32, height: u32, view_mode: &str) {
        self.attributes.width = width;
        self.attributes.height = height;
        self.attributes.view_mode = view_mode.to_string();
        if let Some(app) = self.app.as_mut() {
            app.resize_ad(Size::new(width, height), parse_view_mode(view_mode));
        }
        self.emit(VpaidEvent::AdSizeChange);
    }

    pub fn pause_ad(&mut self, now: Instant) {
        if let Some(app) = self.app.as_mut() {
            app.pause_ad(now);
        }
        self.forward_host_events();
    }

    pub fn resume_ad(&mut self, now: Instant) {
        if let Some(app) = self.app.as_mut() {
            app.resume_ad(now);
        }
        self.forward_host_events();
    }

    pub fn expand_ad(&mut self) {
        self.attributes.expanded = true;
        self.emit(VpaidEvent::AdExpanded);
    }

    pub fn collapse_ad(&mut self) {
        self.attributes.expanded = false;
    }

    /// Only announces the skip once the cooldown has unlocked it.
    pub fn skip_ad(&mut self) {
        if self.get_ad_skippable_state() {
            self.emit(VpaidEvent::AdSkipped);
        } else {
            debug!("skipAd ignored, not skippable yet");
        }
    }

    pub fn set_ad_volume(&mut self, volume: f32) {
        self.attributes.volume = volume.clamp(0.0, 1.0);
        if let Some(app) = self.app.as_mut() {
            app.set_volume(self.attributes.volume);
        }
        self.emit(VpaidEvent::AdVolumeChange);
    }

    pub fn subscribe<F>(&mut self, event: VpaidEvent, callback: F)
    where
        F: FnMut() + Send + 'static,
    {
        debug!(%event, "subscribe");
        self.callbacks.insert(event, Box::new(callback));
    }

    pub fn unsubscribe(&mut self, event: VpaidEvent) {
        debug!(%event, "unsubscribe");
        self.callbacks.remove(&event);
    }

    // ── Event loop ──────────────────────────────────────────────────────

    pub fn handle_provider_event(&mut self, event: ProviderEvent, now: Instant) {
        if let Some(app) = self.app.as_mut() {
            app.handle_provider_event(event, now);
        }
        self.forward_host_events();
    }

    pub fn handle_surface_event(&mut self, event: SurfaceEvent, now: Instant) {
        if let Some(app) = self.app.as_mut() {
            app.handle_surface_event(event, now);
        }
        self.forward_host_events();
    }

    pub fn poll_timers(&mut self, now: Instant) {
        if let Some(app) = self.app.as_mut() {
            app.poll_timers(now);
        }
        self.forward_host_events();
    }

    pub fn app(&self) -> Option<&AppCore> {
        self.app.as_ref()
    }

    // ── Attribute getters ───────────────────────────────────────────────

    pub fn get_ad_linear(&self) -> bool {
        self.attributes.linear
    }

    pub fn get_ad_width(&self) -> u32 {
        self.attributes.width
    }

    pub fn get_ad_height(&self) -> u32 {
        self.attributes.height
    }

    pub fn get_ad_expanded(&self) -> bool {
        self.attributes.expanded
    }

    pub fn get_ad_skippable_state(&self) -> bool {
        self.app.as_ref().is_some_and(|app| app.skip_allowed())
    }

    pub fn get_ad_remaining_time(&self) -> i32 {
        self.attributes.remaining_time
    }

    pub fn get_ad_duration(&self) -> i32 {
        self.attributes.duration
    }

    pub fn get_ad_volume(&self) -> f32 {
        self.attributes.volume
    }

    pub fn get_ad_companions(&self) -> &str {
        &self.attributes.companions
    }

    pub fn get_ad_icons(&self) -> &str {
        &self.attributes.icons
    }

    pub fn attributes(&self) -> &AdAttributes {
        &self.attributes
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn app_or_err(&mut self, action: &'static str) -> Result<&mut AppCore> {
        self.app.as_mut().ok_or(AdError::InvalidState {
            action,
            state: SessionState::Idle,
        })
    }

    fn forward_host_events(&mut self) {
        let events = match self.app.as_mut() {
            Some(app) => app.take_host_events(),
            None => return,
        };
        for event in events.into_iter().filter_map(VpaidEvent::from_host) {
            self.emit(event);
        }
    }

    fn emit(&mut self, event: VpaidEvent) {
        match self.callbacks.get_mut(&event) {
            Some(callback) => {
                debug!(%event, "vpaid event");
                callback();
            }
            None => debug!(%event, "vpaid event without subscriber"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacon::RecordingBeaconSender;
    use crate::sim::{ChromeProbe, HeadlessSurface, ProviderProbe, ScriptedProvider, SurfaceProbe};
    use crate::video_surface::PreloadStatus;
    use std::sync::{Arc, Mutex};

    const PARAMS: &str = r#"{"0":{"url":"https://ads.example/a","r":"https://t/a/r","i":"https://t/a/i"}}"#;

    fn parts(size: Size) -> (AppParts, ProviderProbe, SurfaceProbe) {
        let (provider, probe) = ScriptedProvider::new(Vec::new());
        let (surface, surface_probe) = HeadlessSurface::new(size, PreloadStatus::Ready);
        let chrome = ChromeProbe::new();
        (
            AppParts {
                provider: Box::new(provider),
                surface: Box::new(surface),
                beacons: Arc::new(RecordingBeaconSender::new()),
                skip: Box::new(chrome.clone()),
                navigator: Box::new(chrome),
                page_url: None,
            },
            probe,
            surface_probe,
        )
    }

    fn record_all(ad: &mut VpaidAd) -> Arc<Mutex<Vec<VpaidEvent>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        for name in [
            "AdLoaded",
            "AdStarted",
            "AdStopped",
            "AdSkipped",
            "AdSizeChange",
            "AdExpanded",
            "AdImpression",
            "AdVideoComplete",
            "AdPaused",
            "AdPlaying",
            "AdVolumeChange",
        ] {
            let event: VpaidEvent = name.parse().unwrap();
            let log = log.clone();
            ad.subscribe(event, move || log.lock().unwrap().push(event));
        }
        log
    }

    fn drain(ad: &mut VpaidAd, probe: &ProviderProbe, now: Instant) {
        while let Some(event) = probe.next_event() {
            ad.handle_provider_event(event, now);
        }
    }

    #[test]
    fn handshake_echoes_version() {
        let ad = VpaidAd::new(PlayerConfig::default());
        assert_eq!(ad.handshake_version("2.0"), "2.0");
    }

    #[test]
    fn full_lifecycle_emits_subscribed_events() {
        let now = Instant::now();
        let mut ad = VpaidAd::new(PlayerConfig::default());
        let log = record_all(&mut ad);
        let (parts, probe, _) = parts(Size::new(640, 360));

        ad.init_ad(640, 360, "normal", 500, PARAMS, parts).unwrap();
        ad.start_ad(now).unwrap();
        drain(&mut ad, &probe, now);

        let events = log.lock().unwrap().clone();
        assert_eq!(&events[..2], &[VpaidEvent::AdLoaded, VpaidEvent::AdStarted]);
        assert!(events.contains(&VpaidEvent::AdImpression));
        assert!(events.contains(&VpaidEvent::AdVideoComplete));
        assert_eq!(events.last(), Some(&VpaidEvent::AdStopped));
        assert_eq!(probe.requested_tags(), vec!["https://ads.example/a".to_string()]);
    }

    #[test]
    fn unsubscribed_events_are_not_delivered() {
        let now = Instant::now();
        let mut ad = VpaidAd::new(PlayerConfig::default());
        let log = record_all(&mut ad);
        ad.unsubscribe(VpaidEvent::AdLoaded);
        let (parts, _, _) = parts(Size::new(640, 360));
        ad.init_ad(640, 360, "normal", 500, PARAMS, parts).unwrap();
        ad.expand_ad();
        assert!(ad.get_ad_expanded());
        ad.collapse_ad();
        assert!(!ad.get_ad_expanded());
        ad.start_ad(now).unwrap();
        let events = log.lock().unwrap().clone();
        assert_eq!(events, vec![VpaidEvent::AdExpanded, VpaidEvent::AdStarted]);
    }

    #[test]
    fn skip_requires_unlocked_cooldown() {
        let now = Instant::now();
        let mut ad = VpaidAd::new(PlayerConfig::default());
        let log = record_all(&mut ad);
        let (parts, probe, _) = parts(Size::new(640, 360));
        ad.init_ad(640, 360, "normal", 500, PARAMS, parts).unwrap();
        ad.start_ad(now).unwrap();
        ad.skip_ad();
        assert!(!log.lock().unwrap().contains(&VpaidEvent::AdSkipped));

        drain(&mut ad, &probe, now);
        assert!(ad.get_ad_skippable_state());
        ad.skip_ad();
        assert!(log.lock().unwrap().contains(&VpaidEvent::AdSkipped));
    }

    #[test]
    fn resize_and_volume_update_attributes() {
        let mut ad = VpaidAd::new(PlayerConfig::default());
        let log = record_all(&mut ad);
        let (parts, _, _) = parts(Size::new(640, 360));
        ad.init_ad(640, 360, "normal", 500, PARAMS, parts).unwrap();

        ad.resize_ad(1280, 720, "fullscreen");
        assert_eq!((ad.get_ad_width(), ad.get_ad_height()), (1280, 720));
        assert_eq!(ad.attributes().view_mode, "fullscreen");

        ad.set_ad_volume(-1.0);
        assert_eq!(ad.get_ad_volume(), 0.0);
        let events = log.lock().unwrap().clone();
        assert!(events.ends_with(&[VpaidEvent::AdSizeChange, VpaidEvent::AdVolumeChange]));
    }

    #[test]
    fn malformed_parameters_fail_init() {
        let mut ad = VpaidAd::new(PlayerConfig::default());
        let (parts, _, _) = parts(Size::new(640, 360));
        let err = ad.init_ad(640, 360, "normal", 500, "{not json", parts).unwrap_err();
        assert!(matches!(err, AdError::InvalidWaterfall(_)));
        assert!(matches!(ad.start_ad(Instant::now()), Err(AdError::InvalidState { .. })));
    }

    #[test]
    fn empty_parameters_stop_immediately() {
        let now = Instant::now();
        let mut ad = VpaidAd::new(PlayerConfig::default());
        let log = record_all(&mut ad);
        let (parts, probe, surface) = parts(Size::new(640, 360));
        ad.init_ad(640, 360, "normal", 500, "{}", parts).unwrap();
        ad.start_ad(now).unwrap();
        assert!(probe.requested_tags().is_empty());
        assert!(surface.calls().contains(&crate::sim::SurfaceCall::Play));
        assert_eq!(log.lock().unwrap().last(), Some(&VpaidEvent::AdStopped));
    }

    #[test]
    fn view_mode_parsing() {
        assert_eq!(parse_view_mode("fullscreen"), ViewMode::Fullscreen);
        assert_eq!(parse_view_mode("normal"), ViewMode::Normal);
        assert_eq!(parse_view_mode("thumbnail"), ViewMode::Normal);
    }
}
