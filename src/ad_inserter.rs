//! Ad session controller.
//!
//! Sequences content pause, ad request, ad playback, completion or failure,
//! next waterfall candidate, and content resume. Every provider callback
//! enters through `handle_provider_event`; the controller never reorders
//! events, but it drops anything addressed to a manager it has destroyed or
//! answering a request it has superseded.

use crate::beacon::BeaconSender;
use crate::config::Size;
use crate::error::{AdError, Result};
use crate::provider::{
    AdEvent, AdProvider, AdsRequest, ManagerId, ProviderEvent, RequestId, ViewMode, MANAGER_EVENTS,
};
use crate::video_surface::{PreloadStatus, SurfaceEvent, VideoSurface};
use crate::waterfall::{AdCandidate, Waterfall};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where the session is. Exactly one at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    AwaitingUserGesture,
    ContentPreloading,
    RequestingAd,
    AdPlaying,
    AdBreakEnding,
    ContentPlaying,
    Exhausted,
}

/// Side effects the orchestrator reacts to (skip chrome, host events).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionNotice {
    /// Content paused for an ad break.
    ContentPaused,
    /// Content playback handed back after an ad break.
    ContentResumed,
    /// First impression of the current ad; start the skip cooldown.
    Impression,
    /// The provider finished every ad of the current manager.
    AdBreakCompleted,
    AdClicked,
    CustomClickTracking,
    Started,
    FirstQuartile,
    Midpoint,
    ThirdQuartile,
    Completed,
    Skipped,
    Paused,
    Resumed,
    VolumeChanged,
    VolumeMuted,
    /// Waterfall finished; no further ads will be requested.
    Exhausted,
}

pub struct AdSession {
    waterfall: Waterfall,
    waterfall_index: usize,
    state: SessionState,
    provider: Box<dyn AdProvider>,
    surface: Box<dyn VideoSurface>,
    beacons: Arc<dyn BeaconSender>,
    active_manager: Option<ManagerId>,
    pending_request: Option<RequestId>,
    next_request: u64,
    requests_issued: usize,
    impression_seen: bool,
    content_ended_enabled: bool,
    ended_listener_registered: bool,
    content_complete_called: bool,
    /// Content is held back for ads (pre-roll or an active break).
    content_held: bool,
    ads_active: bool,
    playing: bool,
    fullscreen_size: Option<Size>,
    torn_down: bool,
}

impl AdSession {
    /// Build an idle session over `waterfall`. Nothing is requested until
    /// `arm` and the user gesture.
    pub fn new(
        waterfall: Waterfall,
        provider: Box<dyn AdProvider>,
        surface: Box<dyn VideoSurface>,
        beacons: Arc<dyn BeaconSender>,
    ) -> Self {
        AdSession {
            waterfall,
            waterfall_index: 0,
            state: SessionState::Idle,
            provider,
            surface,
            beacons,
            active_manager: None,
            pending_request: None,
            next_request: 0,
            requests_issued: 0,
            impression_seen: false,
            content_ended_enabled: false,
            ended_listener_registered: false,
            content_complete_called: false,
            content_held: true,
            ads_active: false,
            playing: false,
            fullscreen_size: None,
            torn_down: false,
        }
    }

    // ── Accessors ───────────────────────────────────────────────────────

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Index of the candidate being tried; equals the waterfall length once
    /// exhausted.
    pub fn waterfall_index(&self) -> usize {
        self.waterfall_index
    }

    /// Number of candidates in the waterfall.
    pub fn waterfall_len(&self) -> usize {
        self.waterfall.len()
    }

    /// Candidate at the current index, if any remain.
    pub fn current_candidate(&self) -> Option<&AdCandidate> {
        self.waterfall.get(self.waterfall_index)
    }

    /// Total ad requests sent so far.
    pub fn requests_issued(&self) -> usize {
        self.requests_issued
    }

    /// The live ad manager. `None` between candidates and after the last one.
    pub fn active_manager(&self) -> Option<ManagerId> {
        self.active_manager
    }

    /// Whether a content-ended signal is currently acted on.
    pub fn content_ended_enabled(&self) -> bool {
        self.content_ended_enabled
    }

    /// Whether the provider was told content finished.
    pub fn content_complete_called(&self) -> bool {
        self.content_complete_called
    }

    /// True from a content pause request until content resumes.
    pub fn ads_active(&self) -> bool {
        self.ads_active
    }

    /// Playback flag toggled by user clicks, for whichever of ad or content
    /// owns the element.
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// The content element.
    pub fn surface(&self) -> &dyn VideoSurface {
        self.surface.as_ref()
    }

    /// Mutable access to the content element, for layout changes.
    pub fn surface_mut(&mut self) -> &mut dyn VideoSurface {
        self.surface.as_mut()
    }

    // ── Session start ───────────────────────────────────────────────────

    /// Waterfall loaded; wait for the user gesture. Arms the content-ended
    /// listener.
    pub fn arm(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(AdError::InvalidState {
                action: "arm",
                state: self.state,
            });
        }
        self.set_content_ended_enabled(true);
        self.state = SessionState::AwaitingUserGesture;
        Ok(())
    }

    /// Runs inside the user input handler: display and media initialisation
    /// happen synchronously here, before any asynchronous boundary.
    pub fn user_gesture(&mut self) -> Result<Vec<SessionNotice>> {
        if self.state != SessionState::AwaitingUserGesture {
            return Err(AdError::InvalidState {
                action: "start on user gesture",
                state: self.state,
            });
        }
        self.provider.initialize_display();
        self.surface.load();

        let mut notices = Vec::new();
        match self.surface.preload() {
            PreloadStatus::Ready => self.preload_complete(&mut notices),
            PreloadStatus::AwaitingMetadata => {
                debug!("content preloading, waiting for metadata");
                self.state = SessionState::ContentPreloading;
            }
        }
        Ok(notices)
    }

    fn preload_complete(&mut self, notices: &mut Vec<SessionNotice>) {
        self.surface.remove_preload_listener();
        self.request_current(notices);
    }

    // ── Event entry points ──────────────────────────────────────────────

    /// Dispatch a content-element event: metadata arrival or content end.
    pub fn handle_surface_event(&mut self, event: SurfaceEvent) -> Vec<SessionNotice> {
        let mut notices = Vec::new();
        match event {
            SurfaceEvent::MetadataLoaded => {
                if self.state == SessionState::ContentPreloading {
                    self.preload_complete(&mut notices);
                } else {
                    debug!(state = ?self.state, "metadata loaded outside preload, ignored");
                }
            }
            SurfaceEvent::ContentEnded => self.content_ended(&mut notices),
        }
        notices
    }

    /// Dispatch an ad-provider event. Events for superseded requests or
    /// destroyed managers are dropped without side effects.
    pub fn handle_provider_event(&mut self, event: ProviderEvent) -> Vec<SessionNotice> {
        let mut notices = Vec::new();
        if self.torn_down {
            debug!(?event, "session torn down, provider event dropped");
            return notices;
        }
        match event {
            ProviderEvent::AdsManagerLoaded {
                request,
                manager,
                custom_click_tracking,
            } => self.on_manager_loaded(request, manager, custom_click_tracking, &mut notices),
            ProviderEvent::LoaderError { request, message } => {
                if self.pending_request != Some(request) {
                    debug!(?request, "loader error for superseded request dropped");
                    return notices;
                }
                self.pending_request = None;
                warn!(
                    waterfall_index = self.waterfall_index,
                    "ad error: {}", message
                );
                self.advance(&mut notices);
            }
            ProviderEvent::Manager { manager, event } => {
                if self.active_manager != Some(manager) {
                    debug!(%manager, ?event, "event from destroyed manager dropped");
                    return notices;
                }
                self.on_manager_event(manager, event, &mut notices);
            }
        }
        notices
    }

    fn on_manager_loaded(
        &mut self,
        request: RequestId,
        manager: ManagerId,
        custom_click_tracking: bool,
        notices: &mut Vec<SessionNotice>,
    ) {
        if self.pending_request != Some(request) {
            debug!(%manager, ?request, "manager for superseded request destroyed unplayed");
            self.provider.destroy(manager);
            return;
        }
        self.pending_request = None;
        self.active_manager = Some(manager);
        self.impression_seen = false;
        info!(%manager, waterfall_index = self.waterfall_index, "ads loaded");

        if custom_click_tracking {
            notices.push(SessionNotice::CustomClickTracking);
        }

        let supported = self.provider.subscribe(manager, MANAGER_EVENTS);
        if supported.len() < MANAGER_EVENTS.len() {
            let missing: Vec<_> = MANAGER_EVENTS
                .iter()
                .filter(|k| !supported.contains(k))
                .collect();
            debug!(%manager, ?missing, "provider lacks some event types");
        }

        let size = self.fullscreen_size.unwrap_or_else(|| self.surface.dimensions());
        self.provider.init(manager, size.width, size.height, ViewMode::Normal);
        self.provider.start(manager);
        self.state = SessionState::AdPlaying;
    }

    fn on_manager_event(&mut self, manager: ManagerId, event: AdEvent, notices: &mut Vec<SessionNotice>) {
        debug!(%manager, ?event, "ad event");
        match event {
            AdEvent::ContentPauseRequested => self.pause_for_ad(notices),
            AdEvent::ContentResumeRequested => self.on_content_resume_requested(notices),
            AdEvent::Loaded { linear } => {
                if !linear {
                    self.on_content_resume_requested(notices);
                }
            }
            AdEvent::Error(message) => {
                warn!(%manager, waterfall_index = self.waterfall_index, "ad error: {}", message);
                self.advance(notices);
            }
            AdEvent::AllAdsCompleted => {
                notices.push(SessionNotice::AdBreakCompleted);
                self.advance(notices);
            }
            AdEvent::Impression => {
                if self.impression_seen {
                    debug!(%manager, "repeat impression ignored");
                    return;
                }
                self.impression_seen = true;
                let url = self.current_candidate().map(|c| c.impression_url.clone());
                self.beacons.send(url.as_deref());
                notices.push(SessionNotice::Impression);
            }
            AdEvent::Complete => {
                if self.state == SessionState::AdPlaying {
                    self.state = SessionState::AdBreakEnding;
                }
                notices.push(SessionNotice::Completed);
            }
            AdEvent::Click => notices.push(SessionNotice::AdClicked),
            AdEvent::Started => notices.push(SessionNotice::Started),
            AdEvent::FirstQuartile => notices.push(SessionNotice::FirstQuartile),
            AdEvent::Midpoint => notices.push(SessionNotice::Midpoint),
            AdEvent::ThirdQuartile => notices.push(SessionNotice::ThirdQuartile),
            AdEvent::Skipped => notices.push(SessionNotice::Skipped),
            AdEvent::Paused => notices.push(SessionNotice::Paused),
            AdEvent::Resumed => notices.push(SessionNotice::Resumed),
            AdEvent::VolumeChanged => notices.push(SessionNotice::VolumeChanged),
            AdEvent::VolumeMuted => notices.push(SessionNotice::VolumeMuted),
            AdEvent::Unsupported(name) => debug!(%manager, %name, "unsupported ad event ignored"),
        }
    }

    // ── Transitions ─────────────────────────────────────────────────────

    fn pause_for_ad(&mut self, notices: &mut Vec<SessionNotice>) {
        self.set_content_ended_enabled(false);
        self.ads_active = true;
        self.playing = true;
        self.content_held = true;
        self.surface.pause();
        if self.state != SessionState::Exhausted {
            self.state = SessionState::AdPlaying;
        }
        notices.push(SessionNotice::ContentPaused);
    }

    fn on_content_resume_requested(&mut self, notices: &mut Vec<SessionNotice>) {
        self.resume_content(notices);
        if self.state != SessionState::Exhausted {
            self.state = SessionState::ContentPlaying;
        }
    }

    /// Hand the element back to content. Once content has completed, a
    /// post-roll's resume request must not restart it.
    fn resume_content(&mut self, notices: &mut Vec<SessionNotice>) {
        self.set_content_ended_enabled(true);
        if self.content_complete_called {
            debug!("content already complete, resume suppressed");
            return;
        }
        if !self.content_held {
            return;
        }
        self.content_held = false;
        self.ads_active = false;
        self.playing = true;
        self.surface.play();
        notices.push(SessionNotice::ContentResumed);
    }

    /// Failure or completion of the current candidate: the manager handle is
    /// cleared before the index moves, so a second error from the same
    /// manager finds no active manager and is dropped.
    fn advance(&mut self, notices: &mut Vec<SessionNotice>) {
        self.destroy_active_manager();
        self.waterfall_index += 1;
        if self.state == SessionState::Exhausted {
            return;
        }
        self.request_current(notices);
    }

    fn request_current(&mut self, notices: &mut Vec<SessionNotice>) {
        let Some(candidate) = self.waterfall.get(self.waterfall_index).cloned() else {
            self.finish(notices, true);
            return;
        };

        self.next_request += 1;
        let id = RequestId(self.next_request);
        let size = self.surface.dimensions();
        let request = AdsRequest {
            id,
            ad_tag_url: candidate.ad_tag_url.clone(),
            linear_slot: size,
            non_linear_slot: size,
        };
        self.pending_request = Some(id);
        self.requests_issued += 1;
        self.state = SessionState::RequestingAd;
        info!(
            waterfall_index = self.waterfall_index,
            ad_tag = %candidate.ad_tag_url,
            "requesting ad"
        );
        self.provider.request_ads(&request);
        self.beacons.send(Some(&candidate.request_url));
    }

    fn finish(&mut self, notices: &mut Vec<SessionNotice>, resume: bool) {
        if self.state == SessionState::Exhausted {
            return;
        }
        self.pending_request = None;
        self.state = SessionState::Exhausted;
        info!(waterfall_index = self.waterfall_index, "waterfall exhausted");
        if resume {
            self.resume_content(notices);
        }
        notices.push(SessionNotice::Exhausted);
    }

    fn content_ended(&mut self, notices: &mut Vec<SessionNotice>) {
        if !self.content_ended_enabled {
            debug!("content ended during ad break, ignored");
            return;
        }
        if self.content_complete_called {
            return;
        }
        self.content_complete_called = true;
        self.provider.content_complete();
        if self.state == SessionState::ContentPlaying {
            self.finish(notices, false);
        }
    }

    fn destroy_active_manager(&mut self) {
        if let Some(manager) = self.active_manager.take() {
            self.provider.unsubscribe_all(manager);
            self.provider.destroy(manager);
        }
    }

    fn set_content_ended_enabled(&mut self, enable: bool) {
        self.content_ended_enabled = enable;
        if enable && !self.ended_listener_registered {
            self.surface.register_ended();
            self.ended_listener_registered = true;
        } else if !enable && self.ended_listener_registered {
            self.surface.remove_ended();
            self.ended_listener_registered = false;
        }
    }

    // ── Host commands ───────────────────────────────────────────────────

    /// User click after start: pause/resume the ad while one is active,
    /// otherwise the content.
    pub fn toggle_playback(&mut self) -> Vec<SessionNotice> {
        let mut notices = Vec::new();
        if self.ads_active {
            if self.active_manager.is_none() {
                debug!("click between ads ignored, no live manager");
                return notices;
            }
            if self.playing {
                self.pause_ad(&mut notices);
            } else {
                self.resume_ad(&mut notices);
            }
        } else if self.playing {
            self.surface.pause();
        } else {
            self.surface.play();
        }
        self.playing = !self.playing;
        notices
    }

    /// Pause the live manager. No-op without one.
    pub fn pause_ad(&mut self, notices: &mut Vec<SessionNotice>) {
        if let Some(manager) = self.active_manager {
            self.provider.pause(manager);
            notices.push(SessionNotice::Paused);
        }
    }

    /// Resume the live manager. No-op without one.
    pub fn resume_ad(&mut self, notices: &mut Vec<SessionNotice>) {
        if let Some(manager) = self.active_manager {
            self.provider.resume(manager);
            notices.push(SessionNotice::Resumed);
        }
    }

    /// Fullscreen dimensions for managers initialised from now on.
    pub fn set_fullscreen(&mut self, size: Option<Size>) {
        self.fullscreen_size = size;
    }

    /// Resize the live manager. No-op without one.
    pub fn resize_ad(&mut self, size: Size, mode: ViewMode) {
        if let Some(manager) = self.active_manager {
            self.provider.resize(manager, size.width, size.height, mode);
        }
    }

    /// Forward a volume in `0.0..=1.0` to the live manager.
    pub fn set_volume(&mut self, volume: f32) {
        if let Some(manager) = self.active_manager {
            self.provider.set_volume(manager, volume.clamp(0.0, 1.0));
        }
    }

    /// Destroy the live manager, unregister listeners and end the session.
    /// Idempotent.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.destroy_active_manager();
        self.pending_request = None;
        self.surface.remove_preload_listener();
        self.set_content_ended_enabled(false);
        self.state = SessionState::Exhausted;
        debug!("ad session torn down");
    }
}

impl Drop for AdSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacon::RecordingBeaconSender;
    use crate::sim::{HeadlessSurface, ProviderCommand, ProviderProbe, ScriptedProvider, SurfaceCall, SurfaceProbe};

    fn waterfall(tags: &[&str]) -> Waterfall {
        Waterfall::new(
            tags.iter()
                .map(|t| AdCandidate {
                    ad_tag_url: t.to_string(),
                    request_url: format!("https://t/{}/r", t),
                    impression_url: format!("https://t/{}/i", t),
                })
                .collect(),
        )
    }

    fn session(tags: &[&str]) -> (AdSession, ProviderProbe, SurfaceProbe, RecordingBeaconSender) {
        let (provider, probe) = ScriptedProvider::new(Vec::new());
        let (surface, surface_probe) = HeadlessSurface::new(Size::new(640, 360), PreloadStatus::Ready);
        let beacons = RecordingBeaconSender::new();
        let mut s = AdSession::new(
            waterfall(tags),
            Box::new(provider),
            Box::new(surface),
            Arc::new(beacons.clone()),
        );
        s.arm().unwrap();
        (s, probe, surface_probe, beacons)
    }

    fn loaded(s: &mut AdSession, manager: u64) -> Vec<SessionNotice> {
        let request = s.pending_request.expect("request in flight");
        s.handle_provider_event(ProviderEvent::AdsManagerLoaded {
            request,
            manager: ManagerId(manager),
            custom_click_tracking: false,
        })
    }

    fn ev(s: &mut AdSession, manager: u64, event: AdEvent) -> Vec<SessionNotice> {
        s.handle_provider_event(ProviderEvent::Manager {
            manager: ManagerId(manager),
            event,
        })
    }

    #[test]
    fn gesture_requests_first_candidate() {
        let (mut s, probe, surface, beacons) = session(&["A", "B"]);
        s.user_gesture().unwrap();
        assert_eq!(s.state(), SessionState::RequestingAd);
        assert_eq!(probe.requested_tags(), vec!["A".to_string()]);
        assert!(surface.calls().contains(&SurfaceCall::Load));
        assert_eq!(probe.commands()[0], ProviderCommand::InitializeDisplay);
        assert_eq!(beacons.sent(), vec!["https://t/A/r".to_string()]);
    }

    #[test]
    fn second_gesture_is_rejected() {
        let (mut s, _, _, _) = session(&["A"]);
        s.user_gesture().unwrap();
        assert!(matches!(s.user_gesture(), Err(AdError::InvalidState { .. })));
    }

    #[test]
    fn metadata_wait_defers_first_request() {
        let (provider, probe) = ScriptedProvider::new(Vec::new());
        let (surface, _) = HeadlessSurface::new(Size::new(640, 360), PreloadStatus::AwaitingMetadata);
        let mut s = AdSession::new(
            waterfall(&["A"]),
            Box::new(provider),
            Box::new(surface),
            Arc::new(RecordingBeaconSender::new()),
        );
        s.arm().unwrap();
        s.user_gesture().unwrap();
        assert_eq!(s.state(), SessionState::ContentPreloading);
        assert!(probe.requested_tags().is_empty());

        s.handle_surface_event(SurfaceEvent::MetadataLoaded);
        assert_eq!(s.state(), SessionState::RequestingAd);
        assert_eq!(probe.requested_tags(), vec!["A".to_string()]);
    }

    #[test]
    fn manager_ready_initialises_with_nominal_size() {
        let (mut s, probe, _, _) = session(&["A"]);
        s.user_gesture().unwrap();
        loaded(&mut s, 7);
        assert_eq!(s.state(), SessionState::AdPlaying);
        let cmds = probe.commands();
        assert!(cmds.contains(&ProviderCommand::Subscribe(ManagerId(7))));
        assert!(cmds.contains(&ProviderCommand::Init {
            manager: ManagerId(7),
            width: 640,
            height: 360,
            mode: ViewMode::Normal,
        }));
        assert_eq!(cmds.last(), Some(&ProviderCommand::Start(ManagerId(7))));
    }

    #[test]
    fn manager_ready_uses_fullscreen_size_when_fullscreen() {
        let (mut s, probe, _, _) = session(&["A"]);
        s.set_fullscreen(Some(Size::new(1920, 1080)));
        s.user_gesture().unwrap();
        loaded(&mut s, 1);
        assert!(probe.commands().contains(&ProviderCommand::Init {
            manager: ManagerId(1),
            width: 1920,
            height: 1080,
            mode: ViewMode::Normal,
        }));
    }

    #[test]
    fn guard_is_off_exactly_during_the_break() {
        let (mut s, _, surface, _) = session(&["A"]);
        assert!(s.content_ended_enabled());
        s.user_gesture().unwrap();
        loaded(&mut s, 1);
        assert!(s.content_ended_enabled());

        ev(&mut s, 1, AdEvent::ContentPauseRequested);
        assert!(!s.content_ended_enabled());
        assert!(!surface.ended_registered());
        ev(&mut s, 1, AdEvent::Impression);
        assert!(!s.content_ended_enabled());

        ev(&mut s, 1, AdEvent::ContentResumeRequested);
        assert!(s.content_ended_enabled());
        assert!(surface.ended_registered());
        assert_eq!(s.state(), SessionState::ContentPlaying);
    }

    #[test]
    fn content_ended_during_break_is_ignored() {
        let (mut s, probe, _, _) = session(&["A"]);
        s.user_gesture().unwrap();
        loaded(&mut s, 1);
        ev(&mut s, 1, AdEvent::ContentPauseRequested);
        s.handle_surface_event(SurfaceEvent::ContentEnded);
        assert!(!s.content_complete_called());
        assert!(!probe.commands().contains(&ProviderCommand::ContentComplete));
    }

    #[test]
    fn two_errors_exhaust_two_candidate_waterfall() {
        let (mut s, probe, surface, _) = session(&["A", "B"]);
        s.user_gesture().unwrap();
        loaded(&mut s, 1);
        let notices = ev(&mut s, 1, AdEvent::Error("vast 303".into()));
        assert!(notices.is_empty());
        assert_eq!(probe.requested_tags(), vec!["A".to_string(), "B".to_string()]);
        assert!(probe.commands().contains(&ProviderCommand::Destroy(ManagerId(1))));

        loaded(&mut s, 2);
        let notices = ev(&mut s, 2, AdEvent::Error("vast 402".into()));
        assert_eq!(notices, vec![SessionNotice::ContentResumed, SessionNotice::Exhausted]);
        assert_eq!(s.state(), SessionState::Exhausted);
        assert_eq!(s.waterfall_index(), 2);
        assert_eq!(probe.requested_tags().len(), 2);
        assert_eq!(surface.count(&SurfaceCall::Play), 1);
    }

    #[test]
    fn duplicate_errors_do_not_double_advance() {
        let (mut s, probe, _, _) = session(&["A", "B", "C"]);
        s.user_gesture().unwrap();
        loaded(&mut s, 1);
        ev(&mut s, 1, AdEvent::Error("first".into()));
        let late = ev(&mut s, 1, AdEvent::Error("second".into()));
        let late_complete = ev(&mut s, 1, AdEvent::AllAdsCompleted);
        assert!(late.is_empty());
        assert!(late_complete.is_empty());
        assert_eq!(s.waterfall_index(), 1);
        assert_eq!(probe.requested_tags().len(), 2);
    }

    #[test]
    fn events_from_destroyed_manager_have_no_effect() {
        let (mut s, probe, surface, beacons) = session(&["A", "B"]);
        s.user_gesture().unwrap();
        loaded(&mut s, 1);
        ev(&mut s, 1, AdEvent::AllAdsCompleted);
        let before_cmds = probe.commands().len();
        let before_calls = surface.calls().len();
        let before_beacons = beacons.sent().len();
        let state = s.state();

        for event in [
            AdEvent::ContentPauseRequested,
            AdEvent::Impression,
            AdEvent::ContentResumeRequested,
            AdEvent::Loaded { linear: false },
            AdEvent::Click,
        ] {
            assert!(ev(&mut s, 1, event).is_empty());
        }
        assert_eq!(s.state(), state);
        assert_eq!(probe.commands().len(), before_cmds);
        assert_eq!(surface.calls().len(), before_calls);
        assert_eq!(beacons.sent().len(), before_beacons);
    }

    #[test]
    fn stale_manager_load_is_destroyed_unplayed() {
        let (mut s, probe, _, _) = session(&["A", "B"]);
        s.user_gesture().unwrap();
        let first = s.pending_request.unwrap();
        s.handle_provider_event(ProviderEvent::LoaderError {
            request: first,
            message: "timeout".into(),
        });
        // The first request answers late, after B was requested.
        let notices = s.handle_provider_event(ProviderEvent::AdsManagerLoaded {
            request: first,
            manager: ManagerId(9),
            custom_click_tracking: false,
        });
        assert!(notices.is_empty());
        assert_eq!(s.active_manager(), None);
        assert_eq!(s.state(), SessionState::RequestingAd);
        let cmds = probe.commands();
        assert!(cmds.contains(&ProviderCommand::Destroy(ManagerId(9))));
        assert!(!cmds.contains(&ProviderCommand::Start(ManagerId(9))));
    }

    #[test]
    fn single_ad_completes_and_resumes_once() {
        let (mut s, _, surface, _) = session(&["A"]);
        s.user_gesture().unwrap();
        loaded(&mut s, 1);
        ev(&mut s, 1, AdEvent::ContentPauseRequested);
        ev(&mut s, 1, AdEvent::Complete);
        assert_eq!(s.state(), SessionState::AdBreakEnding);
        ev(&mut s, 1, AdEvent::ContentResumeRequested);
        let notices = ev(&mut s, 1, AdEvent::AllAdsCompleted);
        assert_eq!(notices, vec![SessionNotice::AdBreakCompleted, SessionNotice::Exhausted]);
        assert_eq!(s.waterfall_index(), 1);
        assert_eq!(s.state(), SessionState::Exhausted);
        assert_eq!(surface.count(&SurfaceCall::Play), 1);
    }

    #[test]
    fn impression_sends_one_beacon_per_ad() {
        let (mut s, _, _, beacons) = session(&["A"]);
        s.user_gesture().unwrap();
        loaded(&mut s, 1);
        ev(&mut s, 1, AdEvent::ContentPauseRequested);
        let first = ev(&mut s, 1, AdEvent::Impression);
        let second = ev(&mut s, 1, AdEvent::Impression);
        assert_eq!(first, vec![SessionNotice::Impression]);
        assert!(second.is_empty());
        let impressions: Vec<_> = beacons.sent().into_iter().filter(|u| u.ends_with("/i")).collect();
        assert_eq!(impressions, vec!["https://t/A/i".to_string()]);
    }

    #[test]
    fn non_linear_loaded_resumes_content() {
        let (mut s, _, surface, _) = session(&["A"]);
        s.user_gesture().unwrap();
        loaded(&mut s, 1);
        let notices = ev(&mut s, 1, AdEvent::Loaded { linear: false });
        assert_eq!(notices, vec![SessionNotice::ContentResumed]);
        assert_eq!(s.state(), SessionState::ContentPlaying);
        assert_eq!(surface.count(&SurfaceCall::Play), 1);
        ev(&mut s, 1, AdEvent::Loaded { linear: true });
        assert_eq!(surface.count(&SurfaceCall::Play), 1);
    }

    #[test]
    fn post_roll_resume_does_not_restart_content() {
        let (mut s, probe, surface, _) = session(&["A"]);
        s.user_gesture().unwrap();
        loaded(&mut s, 1);
        ev(&mut s, 1, AdEvent::ContentPauseRequested);
        ev(&mut s, 1, AdEvent::ContentResumeRequested);
        assert_eq!(surface.count(&SurfaceCall::Play), 1);

        s.handle_surface_event(SurfaceEvent::ContentEnded);
        assert!(s.content_complete_called());
        assert!(probe.commands().contains(&ProviderCommand::ContentComplete));
        assert_eq!(s.state(), SessionState::Exhausted);

        // Post-roll from the same manager.
        ev(&mut s, 1, AdEvent::ContentPauseRequested);
        let notices = ev(&mut s, 1, AdEvent::ContentResumeRequested);
        assert!(notices.is_empty());
        assert_eq!(surface.count(&SurfaceCall::Play), 1);
    }

    #[test]
    fn click_between_ads_keeps_playback_in_sync() {
        let (mut s, probe, _, _) = session(&["A", "B"]);
        s.user_gesture().unwrap();
        loaded(&mut s, 1);
        ev(&mut s, 1, AdEvent::ContentPauseRequested);
        ev(&mut s, 1, AdEvent::Error("vast 400".into()));
        assert_eq!(s.active_manager(), None);
        assert!(s.ads_active());

        // No manager yet for B: nothing to pause, nothing flips.
        assert!(s.toggle_playback().is_empty());
        assert!(s.is_playing());

        loaded(&mut s, 2);
        assert_eq!(s.toggle_playback(), vec![SessionNotice::Paused]);
        assert!(probe.commands().contains(&ProviderCommand::Pause(ManagerId(2))));
        assert!(!s.is_playing());
    }

    #[test]
    fn empty_waterfall_exhausts_on_gesture() {
        let (mut s, probe, surface, _) = session(&[]);
        let notices = s.user_gesture().unwrap();
        assert_eq!(notices, vec![SessionNotice::ContentResumed, SessionNotice::Exhausted]);
        assert!(probe.requested_tags().is_empty());
        assert_eq!(surface.count(&SurfaceCall::Play), 1);
    }

    #[test]
    fn toggle_pauses_ad_while_active() {
        let (mut s, probe, surface, _) = session(&["A"]);
        s.user_gesture().unwrap();
        loaded(&mut s, 1);
        ev(&mut s, 1, AdEvent::ContentPauseRequested);
        assert_eq!(s.toggle_playback(), vec![SessionNotice::Paused]);
        assert!(probe.commands().contains(&ProviderCommand::Pause(ManagerId(1))));
        assert_eq!(s.toggle_playback(), vec![SessionNotice::Resumed]);
        assert!(probe.commands().contains(&ProviderCommand::Resume(ManagerId(1))));

        ev(&mut s, 1, AdEvent::ContentResumeRequested);
        assert!(s.toggle_playback().is_empty());
        assert_eq!(surface.calls().last(), Some(&SurfaceCall::Pause));
    }

    #[test]
    fn teardown_unregisters_and_ignores_later_events() {
        let (mut s, probe, surface, _) = session(&["A"]);
        s.user_gesture().unwrap();
        loaded(&mut s, 1);
        s.teardown();
        assert!(!surface.ended_registered());
        assert!(probe.commands().contains(&ProviderCommand::Destroy(ManagerId(1))));
        assert!(ev(&mut s, 1, AdEvent::Impression).is_empty());
        assert_eq!(surface.count(&SurfaceCall::RegisterEnded), surface.count(&SurfaceCall::RemoveEnded));
    }
}
