//! Headless stand-ins for the ad SDK and the content element.
//!
//! `ScriptedProvider` answers each ad request with a scripted outcome and
//! queues the events a real SDK would fire; `HeadlessSurface` records what
//! the controller asked of the video element. Both share their logs with a
//! probe handle so a driver (CLI simulation, tests) can inspect and pump them.

use crate::ad_tag::ClientInfoLookup;
use crate::app_core::{AppCore, AppParts, HostEvent, Navigator, SkipAffordance};
use crate::beacon::{BeaconSender, RecordingBeaconSender};
use crate::config::{PlayerConfig, Size};
use crate::error::Result;
use crate::provider::{
    AdEvent, AdEventKind, AdProvider, AdsRequest, ManagerId, ProviderEvent, ViewMode,
};
use crate::video_surface::{PreloadStatus, SurfaceEvent, SurfaceLayout, VideoSurface};
use crate::waterfall::Waterfall;
use std::collections::{HashMap, HashSet, VecDeque};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

// ── Scripted provider ────────────────────────────────────────────────────────

/// How the provider answers one ad request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOutcome {
    /// Linear ad plays to completion.
    Fill,
    /// Non-linear overlay; content keeps playing.
    FillNonLinear,
    /// The loader fails before a manager exists (no fill).
    LoaderError,
    /// A manager loads, the ad starts, then playback fails.
    PlaybackError,
    /// A manager loads but has nothing to play.
    Empty,
    /// The request is never answered.
    NoResponse,
}

impl FromStr for CandidateOutcome {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fill" => Ok(CandidateOutcome::Fill),
            "nonlinear" | "non-linear" | "overlay" => Ok(CandidateOutcome::FillNonLinear),
            "error" | "nofill" => Ok(CandidateOutcome::LoaderError),
            "playback-error" | "broken" => Ok(CandidateOutcome::PlaybackError),
            "empty" => Ok(CandidateOutcome::Empty),
            "silent" | "timeout" => Ok(CandidateOutcome::NoResponse),
            other => Err(format!("unknown outcome '{}'", other)),
        }
    }
}

impl fmt::Display for CandidateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CandidateOutcome::Fill => "fill",
            CandidateOutcome::FillNonLinear => "nonlinear",
            CandidateOutcome::LoaderError => "error",
            CandidateOutcome::PlaybackError => "playback-error",
            CandidateOutcome::Empty => "empty",
            CandidateOutcome::NoResponse => "silent",
        };
        f.write_str(name)
    }
}

/// Commands the controller issued, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderCommand {
    InitializeDisplay,
    RequestAds(AdsRequest),
    ContentComplete,
    Subscribe(ManagerId),
    UnsubscribeAll(ManagerId),
    Init {
        manager: ManagerId,
        width: u32,
        height: u32,
        mode: ViewMode,
    },
    Start(ManagerId),
    Pause(ManagerId),
    Resume(ManagerId),
    Resize {
        manager: ManagerId,
        width: u32,
        height: u32,
        mode: ViewMode,
    },
    SetVolume(ManagerId, f32),
    Destroy(ManagerId),
}

struct ProviderState {
    commands: Vec<ProviderCommand>,
    outbox: VecDeque<ProviderEvent>,
    script: VecDeque<CandidateOutcome>,
    random: Option<(fastrand::Rng, f64)>,
    next_manager: u64,
    outcomes: HashMap<ManagerId, CandidateOutcome>,
    subscriptions: HashMap<ManagerId, HashSet<AdEventKind>>,
    unsupported: HashSet<AdEventKind>,
}

impl ProviderState {
    fn next_outcome(&mut self) -> CandidateOutcome {
        if let Some(outcome) = self.script.pop_front() {
            return outcome;
        }
        match self.random.as_mut() {
            Some((rng, fill_rate)) => {
                if rng.f64() < *fill_rate {
                    CandidateOutcome::Fill
                } else {
                    CandidateOutcome::LoaderError
                }
            }
            None => CandidateOutcome::Fill,
        }
    }

    /// Queue an event only if the manager is listening for its kind.
    fn emit(&mut self, manager: ManagerId, event: AdEvent) {
        let listening = match event.kind() {
            Some(kind) => self
                .subscriptions
                .get(&manager)
                .is_some_and(|kinds| kinds.contains(&kind)),
            None => true,
        };
        if listening {
            self.outbox.push_back(ProviderEvent::Manager { manager, event });
        }
    }
}

pub struct ScriptedProvider {
    shared: Arc<Mutex<ProviderState>>,
}

/// Driver-side view of a `ScriptedProvider`.
#[derive(Clone)]
pub struct ProviderProbe {
    shared: Arc<Mutex<ProviderState>>,
}

fn lock(shared: &Arc<Mutex<ProviderState>>) -> MutexGuard<'_, ProviderState> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedProvider {
    /// Outcomes are consumed one per request; once the script runs out every
    /// further request fills.
    pub fn new(script: Vec<CandidateOutcome>) -> (Self, ProviderProbe) {
        let shared = Arc::new(Mutex::new(ProviderState {
            commands: Vec::new(),
            outbox: VecDeque::new(),
            script: script.into(),
            random: None,
            next_manager: 0,
            outcomes: HashMap::new(),
            subscriptions: HashMap::new(),
            unsupported: HashSet::new(),
        }));
        (
            ScriptedProvider {
                shared: shared.clone(),
            },
            ProviderProbe { shared },
        )
    }

    /// After the script runs out, fill with probability `fill_rate`.
    pub fn with_fill_rate(self, fill_rate: f64, seed: u64) -> Self {
        lock(&self.shared).random = Some((fastrand::Rng::with_seed(seed), fill_rate.clamp(0.0, 1.0)));
        self
    }

    /// Pretend this SDK version cannot deliver `kinds`.
    pub fn with_unsupported(self, kinds: &[AdEventKind]) -> Self {
        lock(&self.shared).unsupported.extend(kinds.iter().copied());
        self
    }
}

impl AdProvider for ScriptedProvider {
    fn initialize_display(&mut self) {
        lock(&self.shared).commands.push(ProviderCommand::InitializeDisplay);
    }

    fn request_ads(&mut self, request: &AdsRequest) {
        let mut st = lock(&self.shared);
        st.commands.push(ProviderCommand::RequestAds(request.clone()));
        match st.next_outcome() {
            CandidateOutcome::LoaderError => st.outbox.push_back(ProviderEvent::LoaderError {
                request: request.id,
                message: "No ads VAST response after one or more wrappers (303)".into(),
            }),
            CandidateOutcome::NoResponse => {}
            outcome => {
                st.next_manager += 1;
                let manager = ManagerId(st.next_manager);
                st.outcomes.insert(manager, outcome);
                st.outbox.push_back(ProviderEvent::AdsManagerLoaded {
                    request: request.id,
                    manager,
                    custom_click_tracking: false,
                });
            }
        }
    }

    fn content_complete(&mut self) {
        lock(&self.shared).commands.push(ProviderCommand::ContentComplete);
    }

    fn subscribe(&mut self, manager: ManagerId, kinds: &[AdEventKind]) -> Vec<AdEventKind> {
        let mut st = lock(&self.shared);
        st.commands.push(ProviderCommand::Subscribe(manager));
        let supported: Vec<AdEventKind> = kinds
            .iter()
            .copied()
            .filter(|k| !st.unsupported.contains(k))
            .collect();
        st.subscriptions
            .entry(manager)
            .or_default()
            .extend(supported.iter().copied());
        supported
    }

    fn unsubscribe_all(&mut self, manager: ManagerId) {
        let mut st = lock(&self.shared);
        st.commands.push(ProviderCommand::UnsubscribeAll(manager));
        st.subscriptions.remove(&manager);
    }

    fn init(&mut self, manager: ManagerId, width: u32, height: u32, mode: ViewMode) {
        lock(&self.shared).commands.push(ProviderCommand::Init {
            manager,
            width,
            height,
            mode,
        });
    }

    fn start(&mut self, manager: ManagerId) {
        let mut st = lock(&self.shared);
        st.commands.push(ProviderCommand::Start(manager));
        let outcome = st.outcomes.get(&manager).copied().unwrap_or(CandidateOutcome::Empty);
        let events: Vec<AdEvent> = match outcome {
            CandidateOutcome::Fill => vec![
                AdEvent::ContentPauseRequested,
                AdEvent::Loaded { linear: true },
                AdEvent::Started,
                AdEvent::Impression,
                AdEvent::FirstQuartile,
                AdEvent::Midpoint,
                AdEvent::ThirdQuartile,
                AdEvent::Complete,
                AdEvent::ContentResumeRequested,
                AdEvent::AllAdsCompleted,
            ],
            CandidateOutcome::FillNonLinear => vec![
                AdEvent::Loaded { linear: false },
                AdEvent::Started,
                AdEvent::Impression,
                AdEvent::AllAdsCompleted,
            ],
            CandidateOutcome::PlaybackError => vec![
                AdEvent::ContentPauseRequested,
                AdEvent::Loaded { linear: true },
                AdEvent::Started,
                AdEvent::Error("The VAST media file could not be played (405)".into()),
            ],
            CandidateOutcome::Empty | CandidateOutcome::LoaderError | CandidateOutcome::NoResponse => {
                vec![AdEvent::AllAdsCompleted]
            }
        };
        for event in events {
            st.emit(manager, event);
        }
    }

    fn pause(&mut self, manager: ManagerId) {
        let mut st = lock(&self.shared);
        st.commands.push(ProviderCommand::Pause(manager));
        st.emit(manager, AdEvent::Paused);
    }

    fn resume(&mut self, manager: ManagerId) {
        let mut st = lock(&self.shared);
        st.commands.push(ProviderCommand::Resume(manager));
        st.emit(manager, AdEvent::Resumed);
    }

    fn resize(&mut self, manager: ManagerId, width: u32, height: u32, mode: ViewMode) {
        lock(&self.shared).commands.push(ProviderCommand::Resize {
            manager,
            width,
            height,
            mode,
        });
    }

    fn set_volume(&mut self, manager: ManagerId, volume: f32) {
        let mut st = lock(&self.shared);
        st.commands.push(ProviderCommand::SetVolume(manager, volume));
        let event = if volume == 0.0 {
            AdEvent::VolumeMuted
        } else {
            AdEvent::VolumeChanged
        };
        st.emit(manager, event);
    }

    fn destroy(&mut self, manager: ManagerId) {
        let mut st = lock(&self.shared);
        st.commands.push(ProviderCommand::Destroy(manager));
        st.outcomes.remove(&manager);
    }
}

impl ProviderProbe {
    pub fn commands(&self) -> Vec<ProviderCommand> {
        lock(&self.shared).commands.clone()
    }

    pub fn requested_tags(&self) -> Vec<String> {
        lock(&self.shared)
            .commands
            .iter()
            .filter_map(|c| match c {
                ProviderCommand::RequestAds(r) => Some(r.ad_tag_url.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn next_event(&self) -> Option<ProviderEvent> {
        lock(&self.shared).outbox.pop_front()
    }

    /// Inject an event as if the SDK fired it (duplicates, late deliveries).
    pub fn push_event(&self, event: ProviderEvent) {
        lock(&self.shared).outbox.push_back(event);
    }

    pub fn pending_events(&self) -> usize {
        lock(&self.shared).outbox.len()
    }
}

// ── Headless surface ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceCall {
    Load,
    Preload,
    RemovePreloadListener,
    Play,
    Pause,
    Resize(SurfaceLayout),
    RegisterEnded,
    RemoveEnded,
}

#[derive(Default)]
struct SurfaceState {
    calls: Vec<SurfaceCall>,
    ended_listeners: usize,
}

pub struct HeadlessSurface {
    size: Size,
    preload: PreloadStatus,
    shared: Arc<Mutex<SurfaceState>>,
}

#[derive(Clone)]
pub struct SurfaceProbe {
    shared: Arc<Mutex<SurfaceState>>,
}

impl HeadlessSurface {
    pub fn new(size: Size, preload: PreloadStatus) -> (Self, SurfaceProbe) {
        let shared = Arc::new(Mutex::new(SurfaceState::default()));
        (
            HeadlessSurface {
                size,
                preload,
                shared: shared.clone(),
            },
            SurfaceProbe { shared },
        )
    }

    fn record(&self, call: SurfaceCall) {
        if let Ok(mut st) = self.shared.lock() {
            match call {
                SurfaceCall::RegisterEnded => st.ended_listeners += 1,
                SurfaceCall::RemoveEnded => st.ended_listeners = st.ended_listeners.saturating_sub(1),
                _ => {}
            }
            st.calls.push(call);
        }
    }
}

impl VideoSurface for HeadlessSurface {
    fn load(&mut self) {
        self.record(SurfaceCall::Load);
    }

    fn preload(&mut self) -> PreloadStatus {
        self.record(SurfaceCall::Preload);
        self.preload
    }

    fn remove_preload_listener(&mut self) {
        self.record(SurfaceCall::RemovePreloadListener);
    }

    fn play(&mut self) {
        self.record(SurfaceCall::Play);
    }

    fn pause(&mut self) {
        self.record(SurfaceCall::Pause);
    }

    fn resize(&mut self, layout: SurfaceLayout) {
        self.record(SurfaceCall::Resize(layout));
    }

    fn register_ended(&mut self) {
        self.record(SurfaceCall::RegisterEnded);
    }

    fn remove_ended(&mut self) {
        self.record(SurfaceCall::RemoveEnded);
    }

    fn dimensions(&self) -> Size {
        self.size
    }
}

impl SurfaceProbe {
    pub fn calls(&self) -> Vec<SurfaceCall> {
        self.shared.lock().map(|s| s.calls.clone()).unwrap_or_default()
    }

    pub fn count(&self, call: &SurfaceCall) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    /// Whether a content-ended listener is currently attached.
    pub fn ended_registered(&self) -> bool {
        self.listener_count() > 0
    }

    pub fn listener_count(&self) -> usize {
        self.shared.lock().map(|s| s.ended_listeners).unwrap_or(0)
    }
}

// ── Skip chrome ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChromeCall {
    Countdown(u32),
    SkipEnabled,
    CustomClick,
    Navigate(String),
}

/// Records skip-affordance and navigation calls.
#[derive(Clone, Default)]
pub struct ChromeProbe {
    calls: Arc<Mutex<Vec<ChromeCall>>>,
}

impl ChromeProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<ChromeCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn push(&self, call: ChromeCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

impl SkipAffordance for ChromeProbe {
    fn show_countdown(&mut self, remaining: u32) {
        self.push(ChromeCall::Countdown(remaining));
    }

    fn enable_skip(&mut self) {
        self.push(ChromeCall::SkipEnabled);
    }

    fn show_custom_click(&mut self) {
        self.push(ChromeCall::CustomClick);
    }
}

impl Navigator for ChromeProbe {
    fn navigate(&mut self, url: &str) {
        self.push(ChromeCall::Navigate(url.to_string()));
    }
}

// ── Simulation ───────────────────────────────────────────────────────────────

/// Options for building a `Simulation`.
pub struct SimOptions {
    pub config: PlayerConfig,
    pub outcomes: Vec<CandidateOutcome>,
    /// `(fill_rate, seed)` used once `outcomes` runs out.
    pub fill_rate: Option<(f64, u64)>,
    /// Event kinds the provider cannot deliver.
    pub unsupported: Vec<AdEventKind>,
    pub preload: PreloadStatus,
    pub page_url: Option<String>,
    /// Sender for beacons; `None` records them instead.
    pub beacons: Option<Arc<dyn BeaconSender>>,
}

impl Default for SimOptions {
    fn default() -> Self {
        SimOptions {
            config: PlayerConfig::default(),
            outcomes: Vec::new(),
            fill_rate: None,
            unsupported: Vec::new(),
            preload: PreloadStatus::Ready,
            page_url: None,
            beacons: None,
        }
    }
}

/// An `AppCore` wired to the scripted provider and headless surface, with a
/// virtual clock. Provider events are pumped on demand.
pub struct Simulation {
    pub app: AppCore,
    pub provider: ProviderProbe,
    pub surface: SurfaceProbe,
    pub chrome: ChromeProbe,
    pub beacons: RecordingBeaconSender,
    now: Instant,
    host_events: Vec<HostEvent>,
}

/// Events pumped per `run_until_idle` before giving up on a runaway script.
const MAX_PUMP: usize = 10_000;

impl Simulation {
    pub fn new(waterfall: Waterfall, options: SimOptions) -> Self {
        let Ok(sim) = Self::build::<Infallible, _>(options, |config, parts| {
            Ok(AppCore::new(config, waterfall, parts))
        });
        sim
    }

    /// Single-tag session whose template is expanded through `lookup`
    /// before the first request.
    pub fn from_tag_template(
        template: &str,
        lookup: &dyn ClientInfoLookup,
        options: SimOptions,
    ) -> Result<Self> {
        Self::build(options, |config, parts| {
            AppCore::from_tag_template(config, template, lookup, parts)
        })
    }

    fn build<E, F>(options: SimOptions, make_core: F) -> std::result::Result<Self, E>
    where
        F: FnOnce(PlayerConfig, AppParts) -> std::result::Result<AppCore, E>,
    {
        let (mut provider, provider_probe) = ScriptedProvider::new(options.outcomes);
        if let Some((rate, seed)) = options.fill_rate {
            provider = provider.with_fill_rate(rate, seed);
        }
        if !options.unsupported.is_empty() {
            provider = provider.with_unsupported(&options.unsupported);
        }
        let size = options.config.desktop_size;
        let (surface, surface_probe) = HeadlessSurface::new(size, options.preload);
        let chrome = ChromeProbe::new();
        let recorder = RecordingBeaconSender::new();
        let beacons: Arc<dyn BeaconSender> = options
            .beacons
            .unwrap_or_else(|| Arc::new(recorder.clone()));

        let app = make_core(
            options.config,
            AppParts {
                provider: Box::new(provider),
                surface: Box::new(surface),
                beacons,
                skip: Box::new(chrome.clone()),
                navigator: Box::new(chrome.clone()),
                page_url: options.page_url,
            },
        )?;

        Ok(Simulation {
            app,
            provider: provider_probe,
            surface: surface_probe,
            chrome,
            beacons: recorder,
            now: Instant::now(),
            host_events: Vec::new(),
        })
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    pub fn click(&mut self) -> Result<()> {
        let now = self.now;
        let result = self.app.on_user_click(now);
        self.collect();
        result
    }

    /// Deliver queued provider events until the provider goes quiet.
    pub fn run_until_idle(&mut self) -> usize {
        let mut delivered = 0;
        while delivered < MAX_PUMP {
            let Some(event) = self.provider.next_event() else {
                break;
            };
            let now = self.now;
            self.app.handle_provider_event(event, now);
            delivered += 1;
        }
        self.collect();
        delivered
    }

    pub fn surface_event(&mut self, event: SurfaceEvent) {
        let now = self.now;
        self.app.handle_surface_event(event, now);
        self.collect();
    }

    /// Move the virtual clock forward and fire due timers.
    pub fn advance(&mut self, by: Duration) {
        self.now += by;
        let now = self.now;
        self.app.poll_timers(now);
        self.collect();
    }

    pub fn host_events(&self) -> &[HostEvent] {
        &self.host_events
    }

    fn collect(&mut self) {
        self.host_events.extend(self.app.take_host_events());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_outcome_names() {
        assert_eq!("fill".parse::<CandidateOutcome>().unwrap(), CandidateOutcome::Fill);
        assert_eq!(" Error ".parse::<CandidateOutcome>().unwrap(), CandidateOutcome::LoaderError);
        assert_eq!("timeout".parse::<CandidateOutcome>().unwrap(), CandidateOutcome::NoResponse);
        assert!("maybe".parse::<CandidateOutcome>().is_err());
    }

    #[test]
    fn unsubscribed_events_are_not_delivered() {
        let (mut provider, probe) = ScriptedProvider::new(vec![CandidateOutcome::Fill]);
        provider.request_ads(&AdsRequest {
            id: crate::provider::RequestId(1),
            ad_tag_url: "A".into(),
            linear_slot: Size::new(1, 1),
            non_linear_slot: Size::new(1, 1),
        });
        let Some(ProviderEvent::AdsManagerLoaded { manager, .. }) = probe.next_event() else {
            panic!("expected manager");
        };
        // Started without subscribing: nothing is heard.
        provider.start(manager);
        assert_eq!(probe.pending_events(), 0);
    }

    #[test]
    fn unsupported_kinds_are_filtered_from_subscription() {
        let (provider, _) = ScriptedProvider::new(Vec::new());
        let mut provider = provider.with_unsupported(&[AdEventKind::Skipped]);
        let supported = provider.subscribe(ManagerId(1), crate::provider::MANAGER_EVENTS);
        assert!(!supported.contains(&AdEventKind::Skipped));
        assert_eq!(supported.len(), crate::provider::MANAGER_EVENTS.len() - 1);
    }

    #[test]
    fn fill_rate_is_deterministic_per_seed() {
        let outcomes = |seed| {
            let (provider, _) = ScriptedProvider::new(Vec::new());
            let provider = provider.with_fill_rate(0.5, seed);
            let mut st = lock(&provider.shared);
            let drawn: Vec<CandidateOutcome> = (0..16).map(|_| st.next_outcome()).collect();
            drawn
        };
        assert_eq!(outcomes(42), outcomes(42));
    }

    #[test]
    fn fill_rate_draws_follow_script_and_bounds() {
        let draw = |rate: f64| {
            let (provider, _) = ScriptedProvider::new(vec![CandidateOutcome::Empty]);
            let provider = provider.with_fill_rate(rate, 7);
            let mut st = lock(&provider.shared);
            let drawn: Vec<CandidateOutcome> = (0..5).map(|_| st.next_outcome()).collect();
            drawn
        };
        let never = draw(0.0);
        assert_eq!(never[0], CandidateOutcome::Empty);
        assert!(never[1..].iter().all(|o| *o == CandidateOutcome::LoaderError));
        let always = draw(1.0);
        assert!(always[1..].iter().all(|o| *o == CandidateOutcome::Fill));
    }

    #[test]
    fn surface_tracks_listener_pairing() {
        let (mut surface, probe) = HeadlessSurface::new(Size::new(640, 360), PreloadStatus::Ready);
        surface.register_ended();
        assert!(probe.ended_registered());
        surface.remove_ended();
        assert!(!probe.ended_registered());
        assert_eq!(probe.count(&SurfaceCall::RegisterEnded), 1);
    }
}
