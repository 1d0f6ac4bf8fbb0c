//! AdRuntime: dedicated event-loop thread owning the `AppCore`.
//!
//! Everything that touches session state happens on this one thread.
//! External code talks to it through `RuntimeHandle` (wraps
//! `mpsc::Sender<RuntimeCmd>`), which is naturally Send+Sync. Skip-timer
//! ticks are delivered by the loop itself: `recv_timeout` waits no longer
//! than the timer's next deadline.

use crate::app_core::{AppCore, HostEvent, StatusData};
use crate::config::Size;
use crate::provider::ProviderEvent;
use crate::video_surface::SurfaceEvent;
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Longest the loop sleeps when no timer is pending.
const IDLE_WAIT: Duration = Duration::from_millis(250);

// ── Commands & Events ────────────────────────────────────────────────────────

/// Commands sent to the runtime thread.
pub enum RuntimeCmd {
    UserClick,
    SkipClick,
    Provider(ProviderEvent),
    Surface(SurfaceEvent),
    EnterFullscreen(Size),
    ExitFullscreen,
    SetVolume(f32),
    Status(mpsc::Sender<StatusData>),
    Shutdown,
}

/// Events emitted by the runtime thread back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    Host(HostEvent),
    /// A user action was refused (e.g. no ad tag configured).
    Error(String),
}

// ── Handle ───────────────────────────────────────────────────────────────────

/// Thread-safe handle for sending commands to the ad runtime.
#[derive(Clone)]
pub struct RuntimeHandle {
    tx: mpsc::Sender<RuntimeCmd>,
}

impl RuntimeHandle {
    pub fn user_click(&self) {
        let _ = self.tx.send(RuntimeCmd::UserClick);
    }

    pub fn skip_click(&self) {
        let _ = self.tx.send(RuntimeCmd::SkipClick);
    }

    pub fn provider_event(&self, event: ProviderEvent) {
        let _ = self.tx.send(RuntimeCmd::Provider(event));
    }

    pub fn surface_event(&self, event: SurfaceEvent) {
        let _ = self.tx.send(RuntimeCmd::Surface(event));
    }

    pub fn enter_fullscreen(&self, size: Size) {
        let _ = self.tx.send(RuntimeCmd::EnterFullscreen(size));
    }

    pub fn exit_fullscreen(&self) {
        let _ = self.tx.send(RuntimeCmd::ExitFullscreen);
    }

    pub fn set_volume(&self, volume: f32) {
        let _ = self.tx.send(RuntimeCmd::SetVolume(volume));
    }

    /// Snapshot of the session, or `None` if the runtime has stopped.
    pub fn status(&self, timeout: Duration) -> Option<StatusData> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx.send(RuntimeCmd::Status(reply_tx)).ok()?;
        reply_rx.recv_timeout(timeout).ok()
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(RuntimeCmd::Shutdown);
    }
}

// ── Runtime ──────────────────────────────────────────────────────────────────

/// Move `app` onto a dedicated thread and return a handle to it.
///
/// `on_event` is called from the runtime thread for every host event.
pub fn spawn_ad_runtime<F>(app: AppCore, on_event: F) -> RuntimeHandle
where
    F: Fn(RuntimeEvent) + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<RuntimeCmd>();

    std::thread::Builder::new()
        .name("ad-runtime".into())
        .spawn(move || {
            runtime_loop(rx, app, on_event);
        })
        .expect("failed to spawn ad-runtime thread");

    RuntimeHandle { tx }
}

fn runtime_loop<F>(rx: mpsc::Receiver<RuntimeCmd>, mut app: AppCore, on_event: F)
where
    F: Fn(RuntimeEvent),
{
    loop {
        let wait = app
            .next_deadline()
            .map(|at| at.saturating_duration_since(Instant::now()))
            .unwrap_or(IDLE_WAIT);

        match rx.recv_timeout(wait) {
            Ok(cmd) => {
                let now = Instant::now();
                match cmd {
                    RuntimeCmd::UserClick => {
                        if let Err(e) = app.on_user_click(now) {
                            warn!("click refused: {}", e);
                            on_event(RuntimeEvent::Error(e.to_string()));
                        }
                    }
                    RuntimeCmd::SkipClick => {
                        app.on_skip_click();
                    }
                    RuntimeCmd::Provider(event) => app.handle_provider_event(event, now),
                    RuntimeCmd::Surface(event) => app.handle_surface_event(event, now),
                    RuntimeCmd::EnterFullscreen(size) => app.enter_fullscreen(size),
                    RuntimeCmd::ExitFullscreen => app.exit_fullscreen(),
                    RuntimeCmd::SetVolume(volume) => app.set_volume(volume),
                    RuntimeCmd::Status(reply) => {
                        let _ = reply.send(app.status());
                    }
                    RuntimeCmd::Shutdown => {
                        app.stop();
                        forward(&mut app, &on_event);
                        debug!("ad runtime shut down");
                        break;
                    }
                }
            }

            Err(mpsc::RecvTimeoutError::Timeout) => {}

            Err(mpsc::RecvTimeoutError::Disconnected) => {
                // All handles dropped, tear the session down
                app.stop();
                forward(&mut app, &on_event);
                break;
            }
        }

        app.poll_timers(Instant::now());
        forward(&mut app, &on_event);
    }
}

fn forward<F>(app: &mut AppCore, on_event: &F)
where
    F: Fn(RuntimeEvent),
{
    for event in app.take_host_events() {
        on_event(RuntimeEvent::Host(event));
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
