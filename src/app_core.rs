//! AppCore: the ad-insertion orchestrator.
//!
//! Owns one `AdSession` and wires it to the host page: the click that starts
//! everything, fullscreen changes, the skip affordance and its cooldown
//! timer, and the outbox of host-facing events. Both the runtime thread and
//! the tests drive the session through AppCore methods only.

use crate::ad_inserter::{AdSession, SessionNotice, SessionState};
use crate::ad_tag::{resolve_ad_tag, ClientInfoLookup};
use crate::beacon::BeaconSender;
use crate::config::{PlayerConfig, Size};
use crate::error::{AdError, Result};
use crate::provider::{AdProvider, ProviderEvent, ViewMode};
use crate::skip_timer::{SkipTimer, TickOutcome};
use crate::video_surface::{SurfaceEvent, SurfaceLayout, VideoSurface};
use crate::waterfall::Waterfall;
use chrono::Local;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

// ── Log buffer ──────────────────────────────────────────────────────────────

const LOG_BUFFER_MAX: usize = 500;

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: String,
    pub message: String,
}

/// Recent activity for the host page's console panel.
#[derive(Default)]
pub struct LogBuffer {
    entries: VecDeque<LogEntry>,
}

impl LogBuffer {
    /// Empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry stamped with local time, dropping the oldest past
    /// the cap.
    pub fn push(&mut self, level: &str, message: String) {
        let timestamp = Local::now().format("%H:%M:%S").to_string();
        self.entries.push_back(LogEntry {
            timestamp,
            level: level.to_string(),
            message,
        });
        while self.entries.len() > LOG_BUFFER_MAX {
            self.entries.pop_front();
        }
    }

    /// Entries from `since_index` on.
    pub fn get(&self, since_index: usize) -> Vec<LogEntry> {
        self.entries.iter().skip(since_index).cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── Host-side capabilities ──────────────────────────────────────────────────

/// The skip button and its countdown label.
pub trait SkipAffordance: Send {
    fn show_countdown(&mut self, remaining: u32);

    /// Swap the countdown for the clickable skip label.
    fn enable_skip(&mut self);

    /// Reveal the element the ad SDK uses for custom click tracking.
    fn show_custom_click(&mut self);
}

/// Page navigation, used when an enabled skip is clicked.
pub trait Navigator: Send {
    fn navigate(&mut self, url: &str);
}

/// Events for the embedding page, drained with `take_host_events`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HostEvent {
    AdImpression,
    AdVideoStart,
    AdVideoFirstQuartile,
    AdVideoMidpoint,
    AdVideoThirdQuartile,
    AdVideoComplete,
    AdClickThru,
    AdSkipped,
    AdPaused,
    AdPlaying,
    AdVolumeChange,
    AdStopped,
}

/// Everything AppCore needs from its environment.
pub struct AppParts {
    pub provider: Box<dyn AdProvider>,
    pub surface: Box<dyn VideoSurface>,
    pub beacons: Arc<dyn BeaconSender>,
    pub skip: Box<dyn SkipAffordance>,
    pub navigator: Box<dyn Navigator>,
    /// Full URL of the host page; its query carries the skip exit URL.
    pub page_url: Option<String>,
}

// ── Response data types ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct StatusData {
    pub state: SessionState,
    pub waterfall_index: usize,
    pub waterfall_len: usize,
    pub requests_issued: usize,
    pub active_manager: Option<String>,
    pub content_ended_enabled: bool,
    pub content_complete: bool,
    pub ads_active: bool,
    pub playing: bool,
    pub skip_remaining: u32,
    pub skip_allowed: bool,
    pub fullscreen: Option<Size>,
    pub volume: f32,
}

// ── AppCore ─────────────────────────────────────────────────────────────────

pub struct AppCore {
    config: PlayerConfig,
    session: AdSession,
    skip_timer: SkipTimer,
    skip: Box<dyn SkipAffordance>,
    navigator: Box<dyn Navigator>,
    page_url: Option<String>,
    /// Set when the session was built from a blank ad tag.
    missing_tag: bool,
    started: bool,
    skip_allowed: bool,
    cooldowns_started: usize,
    ad_paused: bool,
    fullscreen: Option<Size>,
    volume: f32,
    stopped: bool,
    host_events: Vec<HostEvent>,
    pub logs: LogBuffer,
}

impl AppCore {
    /// Build the orchestrator and arm its session; the first click starts it.
    pub fn new(config: PlayerConfig, waterfall: Waterfall, parts: AppParts) -> Self {
        let mut session = AdSession::new(waterfall, parts.provider, parts.surface, parts.beacons);
        if let Err(err) = session.arm() {
            warn!("could not arm ad session: {}", err);
        }
        AppCore {
            skip_timer: SkipTimer::new(config.skip_cooldown_secs),
            config,
            session,
            skip: parts.skip,
            navigator: parts.navigator,
            page_url: parts.page_url,
            missing_tag: false,
            started: false,
            skip_allowed: false,
            cooldowns_started: 0,
            ad_paused: false,
            fullscreen: None,
            volume: 1.0,
            stopped: false,
            host_events: Vec::new(),
            logs: LogBuffer::new(),
        }
    }

    /// Single-tag variant. A blank tag still builds, but the first click
    /// refuses to start.
    pub fn from_ad_tag(config: PlayerConfig, tag: &str, parts: AppParts) -> Self {
        let (waterfall, missing_tag) = match Waterfall::from_ad_tag(tag) {
            Ok(waterfall) => (waterfall, false),
            Err(_) => (Waterfall::new(Vec::new()), true),
        };
        let mut core = Self::new(config, waterfall, parts);
        core.missing_tag = missing_tag;
        core
    }

    /// Single-tag variant with macros: the template is filled in once from
    /// `lookup` and the device class before the session is armed. A blank
    /// template behaves like `from_ad_tag` with an empty tag.
    pub fn from_tag_template(
        config: PlayerConfig,
        template: &str,
        lookup: &dyn ClientInfoLookup,
        parts: AppParts,
    ) -> Result<Self> {
        if template.trim().is_empty() {
            return Ok(Self::from_ad_tag(config, template, parts));
        }
        let tag = resolve_ad_tag(template, lookup, &config)?;
        debug!(%tag, "ad tag expanded");
        Ok(Self::from_ad_tag(config, &tag, parts))
    }

    /// Read-only view of the ad session.
    pub fn session(&self) -> &AdSession {
        &self.session
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Whether a skip click would navigate away.
    pub fn skip_allowed(&self) -> bool {
        self.skip_allowed
    }

    /// Number of times the skip cooldown was (re)started.
    pub fn cooldowns_started(&self) -> usize {
        self.cooldowns_started
    }

    /// Whether fullscreen dimensions are in effect.
    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen.is_some()
    }

    /// Last volume set by the host, clamped to `0.0..=1.0`.
    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Snapshot of session, skip and layout state for the host.
    pub fn status(&self) -> StatusData {
        StatusData {
            state: self.session.state(),
            waterfall_index: self.session.waterfall_index(),
            waterfall_len: self.session.waterfall_len(),
            requests_issued: self.session.requests_issued(),
            active_manager: self.session.active_manager().map(|m| m.to_string()),
            content_ended_enabled: self.session.content_ended_enabled(),
            content_complete: self.session.content_complete_called(),
            ads_active: self.session.ads_active(),
            playing: self.session.is_playing(),
            skip_remaining: self.skip_timer.remaining(),
            skip_allowed: self.skip_allowed,
            fullscreen: self.fullscreen,
            volume: self.volume,
        }
    }

    // ── User input ──────────────────────────────────────────────────────

    /// Click on the player. The first click starts the session and must be
    /// delivered from inside the input handler; later clicks toggle ad or
    /// content playback.
    pub fn on_user_click(&mut self, now: Instant) -> Result<()> {
        if !self.started {
            if self.missing_tag {
                self.log("error", "Error: please fill in an ad tag".to_string());
                return Err(AdError::EmptyAdTagInput);
            }
            let notices = self.session.user_gesture()?;
            self.started = true;
            info!(candidates = self.session.waterfall_len(), "ad session started");
            self.log(
                "info",
                format!("Session started with {} candidate(s)", self.session.waterfall_len()),
            );
            self.apply(notices, now);
            return Ok(());
        }
        let notices = self.session.toggle_playback();
        self.apply(notices, now);
        Ok(())
    }

    /// Click on the skip affordance. Returns whether it navigated.
    pub fn on_skip_click(&mut self) -> bool {
        if !self.skip_allowed {
            debug!(remaining = self.skip_timer.remaining(), "skip clicked during cooldown");
            return false;
        }
        let url = self.exit_url();
        info!(%url, "skip clicked, leaving page");
        self.log("info", format!("Skip: navigating to {}", url));
        self.navigator.navigate(&url);
        true
    }

    /// Host-initiated ad pause (VPAID `pauseAd`).
    pub fn pause_ad(&mut self, now: Instant) {
        let mut notices = Vec::new();
        self.session.pause_ad(&mut notices);
        self.apply(notices, now);
    }

    /// Host-initiated ad resume (VPAID `resumeAd`).
    pub fn resume_ad(&mut self, now: Instant) {
        let mut notices = Vec::new();
        self.session.resume_ad(&mut notices);
        self.apply(notices, now);
    }

    /// Clamp and forward the ad volume.
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        self.session.set_volume(self.volume);
    }

    /// Resize the live ad without touching the fullscreen state.
    pub fn resize_ad(&mut self, size: Size, mode: ViewMode) {
        self.session.resize_ad(size, mode);
    }

    // ── Fullscreen ──────────────────────────────────────────────────────

    /// Switch the surface and live ad to `size`; later managers start at
    /// that size.
    pub fn enter_fullscreen(&mut self, size: Size) {
        self.fullscreen = Some(size);
        self.session.set_fullscreen(Some(size));
        self.session.resize_ad(size, ViewMode::Fullscreen);
        self.session.surface_mut().resize(SurfaceLayout::fullscreen(size));
        debug!(width = size.width, height = size.height, "entered fullscreen");
    }

    /// Restore the nominal layout.
    pub fn exit_fullscreen(&mut self) {
        if self.fullscreen.take().is_none() {
            return;
        }
        let nominal = self.session.surface().dimensions();
        self.session.set_fullscreen(None);
        self.session.resize_ad(nominal, ViewMode::Normal);
        self.session.surface_mut().resize(SurfaceLayout::normal(nominal));
        debug!("left fullscreen");
    }

    /// Fullscreen button. `screen` is the size to use when entering.
    pub fn toggle_fullscreen(&mut self, screen: Size) {
        if self.fullscreen.is_some() {
            self.exit_fullscreen();
        } else {
            self.enter_fullscreen(screen);
        }
    }

    // ── Event loop entry points ─────────────────────────────────────────

    /// Feed an ad-provider event through the session.
    pub fn handle_provider_event(&mut self, event: ProviderEvent, now: Instant) {
        if let ProviderEvent::LoaderError { message, .. } = &event {
            self.log("warn", format!("Ad error: {}", message));
        }
        let notices = self.session.handle_provider_event(event);
        self.apply(notices, now);
    }

    /// Feed a content-element event through the session.
    pub fn handle_surface_event(&mut self, event: SurfaceEvent, now: Instant) {
        let notices = self.session.handle_surface_event(event);
        self.apply(notices, now);
    }

    /// Deliver due skip-timer ticks.
    pub fn poll_timers(&mut self, now: Instant) {
        for outcome in self.skip_timer.poll(now) {
            match outcome {
                TickOutcome::Counting(remaining) => self.skip.show_countdown(remaining),
                TickOutcome::SkipEnabled => self.allow_skip(),
                TickOutcome::Idle => {}
            }
        }
    }

    /// When `poll_timers` next has work, if ever.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.skip_timer.next_deadline()
    }

    /// Explicit stop from the host. Idempotent.
    pub fn stop(&mut self) {
        self.skip_timer.stop();
        self.session.teardown();
        self.emit_stopped();
    }

    /// Drain the host-event outbox.
    pub fn take_host_events(&mut self) -> Vec<HostEvent> {
        std::mem::take(&mut self.host_events)
    }

    // ── Logs ────────────────────────────────────────────────────────────

    /// Console entries, optionally from an index on.
    pub fn get_logs(&self, since_index: Option<usize>) -> Vec<LogEntry> {
        self.logs.get(since_index.unwrap_or(0))
    }

    pub fn clear_logs(&mut self) {
        self.logs.clear();
    }

    /// Append to the console log buffer.
    pub fn log(&mut self, level: &str, message: String) {
        self.logs.push(level, message);
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn apply(&mut self, notices: Vec<SessionNotice>, now: Instant) {
        for notice in notices {
            match notice {
                SessionNotice::ContentPaused => {
                    self.skip_timer.stop();
                    self.skip_allowed = false;
                    self.ad_paused = false;
                }
                SessionNotice::Impression => {
                    self.skip_timer.start(now);
                    self.cooldowns_started += 1;
                    self.skip.show_countdown(self.skip_timer.remaining());
                    self.host_events.push(HostEvent::AdImpression);
                }
                SessionNotice::ContentResumed | SessionNotice::AdBreakCompleted => self.allow_skip(),
                SessionNotice::AdClicked => self.host_events.push(HostEvent::AdClickThru),
                SessionNotice::CustomClickTracking => self.skip.show_custom_click(),
                SessionNotice::Started => self.host_events.push(HostEvent::AdVideoStart),
                SessionNotice::FirstQuartile => self.host_events.push(HostEvent::AdVideoFirstQuartile),
                SessionNotice::Midpoint => self.host_events.push(HostEvent::AdVideoMidpoint),
                SessionNotice::ThirdQuartile => self.host_events.push(HostEvent::AdVideoThirdQuartile),
                SessionNotice::Completed => self.host_events.push(HostEvent::AdVideoComplete),
                SessionNotice::Skipped => self.host_events.push(HostEvent::AdSkipped),
                SessionNotice::Paused => {
                    if !self.ad_paused {
                        self.ad_paused = true;
                        self.host_events.push(HostEvent::AdPaused);
                    }
                }
                SessionNotice::Resumed => {
                    if self.ad_paused {
                        self.ad_paused = false;
                        self.host_events.push(HostEvent::AdPlaying);
                    }
                }
                SessionNotice::VolumeChanged | SessionNotice::VolumeMuted => {
                    self.host_events.push(HostEvent::AdVolumeChange)
                }
                SessionNotice::Exhausted => {
                    self.log(
                        "info",
                        format!(
                            "Waterfall exhausted after {} request(s)",
                            self.session.requests_issued()
                        ),
                    );
                    self.emit_stopped();
                }
            }
        }
    }

    /// Unlock the skip affordance. Only the first call per break notifies.
    fn allow_skip(&mut self) {
        self.skip_timer.clear();
        if self.skip_allowed {
            return;
        }
        self.skip_allowed = true;
        self.skip.enable_skip();
    }

    fn emit_stopped(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.host_events.push(HostEvent::AdStopped);
    }

    fn exit_url(&self) -> String {
        let param = self.config.exit_url_param.as_str();
        self.page_url
            .as_deref()
            .and_then(|page| Url::parse(page).ok())
            .and_then(|page| {
                page.query_pairs()
                    .find(|(key, _)| key == param)
                    .map(|(_, value)| value.into_owned())
            })
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| self.config.fallback_exit_url.clone())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
