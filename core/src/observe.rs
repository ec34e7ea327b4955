//! Navigation and mutation observation.
//!
//! The browser original debounced MutationObserver bursts with fixed delays
//! and suppressed duplicate callbacks with a timestamp window. Here the same
//! observable timing is driven by an explicit state machine with an epoch
//! counter: a navigation reset bumps the epoch, and anything scheduled under
//! an older epoch is discarded instead of time-gated. Expand-event scans fire
//! at most once per epoch.
//!
//! [`Machine`] is pure (all clocks passed in); [`DomObserverManager`] is the
//! tokio driver feeding it from an event channel.

use std::sync::OnceLock;
use std::time::Duration;

use scraper::{Html, Selector};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Delay between a mutation burst and the rescan, letting the page settle.
pub const SETTLE_DELAY: Duration = Duration::from_millis(500);
/// Grace period before treating a page without an expand control as
/// single-page and firing anyway.
pub const EXPAND_FALLBACK_DELAY: Duration = Duration::from_millis(500);
/// Readiness-probe cadence after an expand/image click.
pub const PROBE_INTERVAL: Duration = Duration::from_millis(100);
/// Probe gives up and fires after this long even if the page never reports
/// ready.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Text carried by the site's expand-all-pages control.
const EXPAND_CONTROL_TEXT: &str = "すべて見る";

/// Events fed into the machine by whoever watches the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverEvent {
    /// One or more element nodes were added somewhere under the body.
    MutationBatch,
    /// The expand control was spotted while scanning button text.
    ExpandControlSeen,
    /// The expand control was activated.
    ExpandClicked,
    /// An image container was activated (covers single-page artworks where
    /// the expand control never exists).
    ImageClicked,
    /// SPA route change; everything in flight becomes stale.
    NavigationReset,
}

/// Why a scan fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanReason {
    /// Mutation burst settled (listing pages re-scan on this).
    DomSettled,
    /// Expand interaction completed or timed out (detail pages re-scan).
    ExpandSettled,
}

/// A scan request with the epoch it belongs to. Consumers drop requests whose
/// epoch is no longer current.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FireScan {
    pub epoch: u64,
    pub reason: ScanReason,
}

#[derive(Debug, Clone, Copy)]
struct ProbeWait {
    next_probe: Instant,
    deadline: Instant,
}

/// Pure observer state machine.
#[derive(Debug)]
pub struct Machine {
    epoch: u64,
    settle_deadline: Option<Instant>,
    expand_seen: bool,
    expand_fired: bool,
    fallback_deadline: Option<Instant>,
    probe_wait: Option<ProbeWait>,
}

impl Machine {
    pub fn new(now: Instant) -> Self {
        Self {
            epoch: 0,
            settle_deadline: None,
            expand_seen: false,
            expand_fired: false,
            fallback_deadline: Some(now + EXPAND_FALLBACK_DELAY),
            probe_wait: None,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn observe(&mut self, event: ObserverEvent, now: Instant) {
        match event {
            ObserverEvent::MutationBatch => {
                // Rapid bursts collapse: the deadline just moves forward.
                self.settle_deadline = Some(now + SETTLE_DELAY);
            }
            ObserverEvent::ExpandControlSeen => {
                self.expand_seen = true;
                self.fallback_deadline = None;
            }
            ObserverEvent::ExpandClicked | ObserverEvent::ImageClicked => {
                if self.expand_fired || self.probe_wait.is_some() {
                    return;
                }
                self.probe_wait = Some(ProbeWait {
                    next_probe: now + PROBE_INTERVAL,
                    deadline: now + PROBE_TIMEOUT,
                });
            }
            ObserverEvent::NavigationReset => {
                self.epoch += 1;
                self.settle_deadline = None;
                self.expand_seen = false;
                self.expand_fired = false;
                self.fallback_deadline = Some(now + EXPAND_FALLBACK_DELAY);
                self.probe_wait = None;
            }
        }
    }

    /// Advances timers. `probe_ready` is only consulted while an expand wait
    /// is in flight.
    pub fn poll(&mut self, now: Instant, probe_ready: bool) -> Vec<FireScan> {
        let mut fires = Vec::new();

        if self.settle_deadline.is_some_and(|d| now >= d) {
            self.settle_deadline = None;
            fires.push(FireScan { epoch: self.epoch, reason: ScanReason::DomSettled });
        }

        if !self.expand_seen
            && !self.expand_fired
            && self.fallback_deadline.is_some_and(|d| now >= d)
        {
            self.fallback_deadline = None;
            self.expand_fired = true;
            tracing::debug!(target: "observe", epoch = self.epoch, "single-page fallback fire");
            fires.push(FireScan { epoch: self.epoch, reason: ScanReason::ExpandSettled });
        }

        if let Some(wait) = self.probe_wait {
            if probe_ready || now >= wait.deadline {
                self.probe_wait = None;
                if !self.expand_fired {
                    self.expand_fired = true;
                    fires.push(FireScan { epoch: self.epoch, reason: ScanReason::ExpandSettled });
                }
            } else if now >= wait.next_probe {
                self.probe_wait =
                    Some(ProbeWait { next_probe: now + PROBE_INTERVAL, deadline: wait.deadline });
            }
        }

        fires
    }

    /// Earliest instant at which [`poll`](Self::poll) could do something.
    pub fn next_deadline(&self) -> Option<Instant> {
        let mut next: Option<Instant> = None;
        let mut consider = |candidate: Option<Instant>| {
            if let Some(c) = candidate {
                next = Some(match next {
                    Some(n) if n <= c => n,
                    _ => c,
                });
            }
        };
        consider(self.settle_deadline);
        if !self.expand_seen && !self.expand_fired {
            consider(self.fallback_deadline);
        }
        consider(self.probe_wait.map(|w| w.next_probe));
        next
    }
}

fn button_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse("button").expect("button selector"))
}

fn original_link_anywhere_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| {
        Selector::parse(r#"a[href*="img-original"][target="_blank"]"#).expect("original selector")
    })
}

/// Scans button text for the expand-all-pages control.
pub fn expand_control_present(doc: &Html) -> bool {
    doc.select(button_selector())
        .any(|button| button.text().any(|t| t.contains(EXPAND_CONTROL_TEXT)))
}

/// Readiness probe: true once original-image links exist in the document.
pub fn original_links_present(doc: &Html) -> bool {
    doc.select(original_link_anywhere_selector()).next().is_some()
}

/// Tokio driver around [`Machine`].
///
/// Feeds events from [`notify`](Self::notify) into the machine, wakes on its
/// deadlines, consults the readiness probe while an expand wait is in flight,
/// and emits [`FireScan`]s on the returned channel. `destroy` is idempotent.
#[derive(Debug)]
pub struct DomObserverManager {
    events: mpsc::UnboundedSender<ObserverEvent>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl DomObserverManager {
    pub fn spawn<P>(probe: P) -> (Self, mpsc::UnboundedReceiver<FireScan>)
    where
        P: Fn() -> bool + Send + 'static,
    {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (scans_tx, scans_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut machine = Machine::new(Instant::now());
            loop {
                let deadline = machine.next_deadline();
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    event = events_rx.recv() => match event {
                        Some(event) => machine.observe(event, Instant::now()),
                        None => break,
                    },
                    _ = async {
                        match deadline {
                            Some(at) => tokio::time::sleep_until(at).await,
                            // No deadline pending: only events can wake us.
                            None => std::future::pending().await,
                        }
                    } => {}
                }

                for fire in machine.poll(Instant::now(), probe()) {
                    if scans_tx.send(fire).is_err() {
                        return;
                    }
                }
            }
        });

        (Self { events: events_tx, shutdown: Some(shutdown_tx), task: Some(task) }, scans_rx)
    }

    /// Feeds one event; silently dropped after destroy.
    pub fn notify(&self, event: ObserverEvent) {
        let _ = self.events.send(event);
    }

    /// Stops the driver. Safe to call multiple times.
    pub fn destroy(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for DomObserverManager {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advance(now: Instant, ms: u64) -> Instant {
        now + Duration::from_millis(ms)
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_mutations_collapse_into_one_fire() {
        let start = Instant::now();
        let mut machine = Machine::new(start);
        machine.observe(ObserverEvent::ExpandControlSeen, start);

        machine.observe(ObserverEvent::MutationBatch, start);
        machine.observe(ObserverEvent::MutationBatch, advance(start, 100));
        machine.observe(ObserverEvent::MutationBatch, advance(start, 200));

        assert!(machine.poll(advance(start, 400), false).is_empty());
        let fires = machine.poll(advance(start, 700), false);
        assert_eq!(fires, vec![FireScan { epoch: 0, reason: ScanReason::DomSettled }]);
        // Nothing left pending.
        assert!(machine.poll(advance(start, 1500), false).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_fires_when_expand_control_never_appears() {
        let start = Instant::now();
        let mut machine = Machine::new(start);

        let fires = machine.poll(advance(start, 500), false);
        assert_eq!(fires, vec![FireScan { epoch: 0, reason: ScanReason::ExpandSettled }]);
        // At most once per epoch.
        machine.observe(ObserverEvent::ExpandClicked, advance(start, 600));
        assert!(machine.poll(advance(start, 3000), true).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn expand_click_fires_when_probe_reports_ready() {
        let start = Instant::now();
        let mut machine = Machine::new(start);
        machine.observe(ObserverEvent::ExpandControlSeen, start);

        machine.observe(ObserverEvent::ExpandClicked, start);
        assert!(machine.poll(advance(start, 100), false).is_empty());
        let fires = machine.poll(advance(start, 200), true);
        assert_eq!(fires, vec![FireScan { epoch: 0, reason: ScanReason::ExpandSettled }]);
    }

    #[tokio::test(start_paused = true)]
    async fn expand_click_times_out_and_fires_anyway() {
        let start = Instant::now();
        let mut machine = Machine::new(start);
        machine.observe(ObserverEvent::ExpandControlSeen, start);
        machine.observe(ObserverEvent::ExpandClicked, start);

        assert!(machine.poll(advance(start, 1900), false).is_empty());
        let fires = machine.poll(advance(start, 2000), false);
        assert_eq!(fires, vec![FireScan { epoch: 0, reason: ScanReason::ExpandSettled }]);
    }

    #[tokio::test(start_paused = true)]
    async fn navigation_reset_bumps_epoch_and_discards_pending() {
        let start = Instant::now();
        let mut machine = Machine::new(start);
        machine.observe(ObserverEvent::ExpandControlSeen, start);
        machine.observe(ObserverEvent::MutationBatch, start);
        machine.observe(ObserverEvent::ExpandClicked, start);

        machine.observe(ObserverEvent::NavigationReset, advance(start, 100));

        // The old settle and probe waits are gone; only the new epoch's
        // fallback remains.
        let fires = machine.poll(advance(start, 700), true);
        assert_eq!(fires, vec![FireScan { epoch: 1, reason: ScanReason::ExpandSettled }]);
    }

    #[tokio::test(start_paused = true)]
    async fn driver_emits_settle_fire() {
        let (manager, mut scans) = DomObserverManager::spawn(|| false);
        manager.notify(ObserverEvent::ExpandControlSeen);
        manager.notify(ObserverEvent::MutationBatch);

        tokio::time::sleep(Duration::from_millis(600)).await;
        let fire = scans.try_recv().expect("scan fired");
        assert_eq!(fire.reason, ScanReason::DomSettled);
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_is_idempotent() {
        let (mut manager, _scans) = DomObserverManager::spawn(|| false);
        manager.destroy();
        manager.destroy();
        // Notifying after destroy is a silent no-op.
        manager.notify(ObserverEvent::MutationBatch);
    }

    #[test]
    fn detects_expand_control_by_button_text() {
        let doc = Html::parse_document(
            r#"<div><button><div></div><div>すべて見る</div></button></div>"#,
        );
        assert!(expand_control_present(&doc));

        let doc = Html::parse_document(r#"<div><button>フォロー</button></div>"#);
        assert!(!expand_control_present(&doc));
    }

    #[test]
    fn probe_detects_original_links() {
        let doc = Html::parse_document(
            r#"<a href="https://i.x/img-original/1_p0.png" target="_blank">x</a>"#,
        );
        assert!(original_links_present(&doc));
        assert!(!original_links_present(&Html::parse_document("<p>empty</p>")));
    }
}
