use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Fire-and-forget tracking pixel sender.
///
/// `send` never blocks the caller and never reports failure: beacons are not
/// on the critical path, so errors are dropped and nothing is retried.
pub trait BeaconSender: Send + Sync {
    /// Fire a request to a non-empty URL.
    fn fire(&self, url: &str);

    /// No-op when `url` is absent or blank.
    fn send(&self, url: Option<&str>) {
        if let Some(url) = url.map(str::trim).filter(|u| !u.is_empty()) {
            self.fire(url);
        }
    }
}

/// Sends beacons as HTTP GETs from one background worker.
///
/// URLs are queued over a channel and fetched in order; the worker exits
/// when the sender is dropped.
pub struct HttpBeaconSender {
    tx: Option<mpsc::Sender<String>>,
}

impl HttpBeaconSender {
    pub fn new(timeout: Duration) -> Self {
        let client = match reqwest::blocking::Client::builder().timeout(timeout).build() {
            Ok(c) => c,
            Err(e) => {
                warn!("beacon client unavailable, beacons disabled: {}", e);
                return HttpBeaconSender { tx: None };
            }
        };
        Self::with_fetch(move |url| match client.get(url).send() {
            Ok(resp) => debug!(%url, status = %resp.status(), "beacon sent"),
            Err(e) => debug!(%url, "beacon dropped: {}", e),
        })
    }

    /// Start the worker with a custom fetch.
    fn with_fetch<F>(fetch: F) -> Self
    where
        F: Fn(&str) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<String>();
        let spawned = std::thread::Builder::new()
            .name("beacon".into())
            .spawn(move || {
                for url in rx {
                    fetch(&url);
                }
            });
        match spawned {
            Ok(_) => HttpBeaconSender { tx: Some(tx) },
            Err(e) => {
                warn!("beacon worker not started, beacons disabled: {}", e);
                HttpBeaconSender { tx: None }
            }
        }
    }
}

impl BeaconSender for HttpBeaconSender {
    fn fire(&self, url: &str) {
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.send(url.to_string()).is_err() {
            debug!(%url, "beacon worker gone, beacon dropped");
        }
    }
}

/// Records beacon URLs instead of sending them (dry runs, tests).
#[derive(Clone, Default)]
pub struct RecordingBeaconSender {
    sent: Arc<Mutex<Vec<String>>>,
}

impl RecordingBeaconSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl BeaconSender for RecordingBeaconSender {
    fn fire(&self, url: &str) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(url.to_string());
        }
    }
}
