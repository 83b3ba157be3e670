use crate::alert::Notify;
use crate::model::{HealthState, Outcome, ProbeResult};
use chrono::Local;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinSet;
use tokio::time::{sleep, Duration, Instant};

pub type SharedMonitor = Arc<RwLock<Monitor>>;

// Latency thresholds for successful 200 responses.
const DEGRADED_MS: f64 = 1000.0;
const CRITICAL_MS: f64 = 2000.0;

// How many trailing log entries a status snapshot carries.
const EVENT_TAIL: usize = 50;

static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(true) // Allow self-signed certs for monitoring flexibility
        .no_gzip() // We only care about status and timing
        .user_agent("ApiWatch/0.1.0")
        .build()
        .expect("Failed to build HTTP client")
});

/// One timed GET against `endpoint`. Exactly one outbound request, no
/// retries. Transport errors never escape as `Err`; they come back as
/// `Outcome` variants.
pub async fn probe(endpoint: &str, timeout: Duration) -> ProbeResult {
    let start = Instant::now();
    let (outcome, latency_ms) = match HTTP_CLIENT.get(endpoint).timeout(timeout).send().await {
        Ok(res) => {
            let elapsed = start.elapsed().as_secs_f64() * 1000.0;
            (
                Outcome::Success(res.status().as_u16()),
                Some((elapsed * 100.0).round() / 100.0),
            )
        }
        Err(e) if e.is_timeout() => (Outcome::Timeout, None),
        Err(e) if e.is_connect() => (Outcome::ConnectionError, None),
        Err(e) => (Outcome::OtherError(e.to_string()), None),
    };

    ProbeResult {
        timestamp: Local::now(),
        endpoint: endpoint.to_string(),
        outcome,
        latency_ms,
    }
}

/// Per-endpoint card in a status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointCard {
    pub url: String,
    pub health: HealthState,
    pub status: Option<String>,
    pub latency_ms: Option<f64>,
    pub issue: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub running: bool,
    pub cards: Vec<EndpointCard>,
    pub events: Vec<ProbeResult>,
}

/// Aggregate monitor state: watch list, rolling result buffer, running flag
/// and per-endpoint alert markers. Owned by the composition root behind
/// `Arc<RwLock<..>>`; probe workers never touch it.
pub struct Monitor {
    endpoints: Vec<String>,
    buffer: VecDeque<ProbeResult>,
    capacity: usize,
    running: bool,
    alerted: HashSet<String>,
}

impl Monitor {
    pub fn new(capacity: usize) -> Self {
        Self {
            endpoints: Vec::new(),
            buffer: VecDeque::with_capacity(capacity),
            capacity,
            running: false,
            alerted: HashSet::new(),
        }
    }

    pub fn with_endpoints<I>(capacity: usize, endpoints: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut monitor = Self::new(capacity);
        for url in endpoints {
            monitor.add_endpoint(&url);
        }
        monitor
    }

    /// Appends `url` to the watch list. Empty and duplicate URLs are
    /// ignored; insertion order is preserved for display.
    pub fn add_endpoint(&mut self, url: &str) -> bool {
        if url.is_empty() || self.endpoints.iter().any(|e| e == url) {
            return false;
        }
        self.endpoints.push(url.to_string());
        true
    }

    pub fn remove_endpoint(&mut self, url: &str) -> bool {
        let before = self.endpoints.len();
        self.endpoints.retain(|e| e != url);
        self.endpoints.len() != before
    }

    pub fn start(&mut self) {
        if !self.running {
            tracing::info!("Monitoring started");
        }
        self.running = true;
    }

    pub fn stop(&mut self) {
        if self.running {
            tracing::info!("Monitoring stopped");
        }
        self.running = false;
    }

    /// Drops all buffered results and alert markers. The watch list and the
    /// running flag are untouched.
    pub fn clear_data(&mut self) {
        self.buffer.clear();
        self.alerted.clear();
        tracing::info!("Result buffer and alert markers cleared");
    }

    /// Empties the watch list. Buffered results are left to `clear_data`.
    pub fn clear_endpoints(&mut self) {
        self.endpoints.clear();
        tracing::info!("Watch list cleared");
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    pub fn results(&self) -> impl Iterator<Item = &ProbeResult> {
        self.buffer.iter()
    }

    pub fn push_result(&mut self, result: ProbeResult) {
        self.buffer.push_back(result);
        while self.buffer.len() > self.capacity {
            self.buffer.pop_front();
        }
    }

    /// Most recent buffered result for `url`. Appends are chronological, so
    /// the last matching entry is the newest.
    pub fn latest(&self, url: &str) -> Option<&ProbeResult> {
        self.buffer.iter().rev().find(|r| r.endpoint == url)
    }

    pub fn classify(&self, url: &str) -> HealthState {
        match self.latest(url) {
            None => HealthState::Unknown,
            Some(result) => classify_result(result),
        }
    }

    fn is_alerted(&self, url: &str) -> bool {
        self.alerted.contains(url)
    }

    fn mark_alerted(&mut self, url: &str) {
        self.alerted.insert(url.to_string());
    }

    pub fn snapshot(&self) -> Snapshot {
        let cards = self
            .endpoints
            .iter()
            .map(|url| {
                let latest = self.latest(url);
                EndpointCard {
                    url: url.clone(),
                    health: self.classify(url),
                    status: latest.map(|r| r.outcome.status_text()),
                    latency_ms: latest.and_then(|r| r.latency_ms),
                    issue: latest.map(|r| r.outcome.issue()),
                }
            })
            .collect();

        let skip = self.buffer.len().saturating_sub(EVENT_TAIL);
        Snapshot {
            running: self.running,
            cards,
            events: self.buffer.iter().skip(skip).cloned().collect(),
        }
    }
}

fn classify_result(result: &ProbeResult) -> HealthState {
    match result.outcome {
        Outcome::Success(200) => match result.latency_ms {
            Some(ms) if ms > CRITICAL_MS => HealthState::Unhealthy,
            Some(ms) if ms > DEGRADED_MS => HealthState::Degraded,
            _ => HealthState::Healthy,
        },
        _ => HealthState::Unhealthy,
    }
}

/// One polling cycle: probe every watched endpoint concurrently, append the
/// results, then run the alert pass. Does nothing unless the monitor is
/// running with a non-empty watch list. Returns the number of appended
/// results. Ticks are serialized by the caller; probe workers communicate
/// back only through their return values.
pub async fn tick(state: &SharedMonitor, notifier: &Arc<dyn Notify>, timeout: Duration) -> usize {
    let targets = {
        let monitor = state.read().await;
        if !monitor.is_running() || monitor.endpoints().is_empty() {
            return 0;
        }
        monitor.endpoints().to_vec()
    };

    let mut probes = JoinSet::new();
    for url in targets {
        probes.spawn(async move { probe(&url, timeout).await });
    }

    // Fan-in: results land in completion order. Each probe carries its own
    // timeout, so a slow endpoint delays this tick but never the others.
    let mut results = Vec::with_capacity(probes.len());
    while let Some(joined) = probes.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(e) => tracing::error!("Probe task failed to join: {}", e),
        }
    }

    let appended = results.len();
    let probed: Vec<String> = results.iter().map(|r| r.endpoint.clone()).collect();

    let mut monitor = state.write().await;
    for result in results {
        monitor.push_result(result);
    }

    // At most one notification per endpoint per failure episode. The marker
    // is set before dispatch; delivery runs on its own task so a slow mail
    // transport cannot stall the tick.
    let mut dispatch = Vec::new();
    for url in probed {
        if monitor.classify(&url) != HealthState::Unhealthy || monitor.is_alerted(&url) {
            continue;
        }
        let Some(latest) = monitor.latest(&url) else {
            continue;
        };
        let payload = (url.clone(), latest.outcome.status_text(), latest.outcome.issue());
        monitor.mark_alerted(&url);
        dispatch.push(payload);
    }
    drop(monitor);

    for (endpoint, status, issue) in dispatch {
        let notifier = Arc::clone(notifier);
        tokio::spawn(async move {
            tracing::warn!("Endpoint unhealthy, alerting: {} ({})", endpoint, status);
            if let Err(e) = notifier.notify(&endpoint, &status, &issue).await {
                tracing::error!("Failed to deliver alert for {}: {}", endpoint, e);
            }
        });
    }

    appended
}

/// Background polling loop driven by the configured cadence. After every
/// effective tick the refreshed snapshot is broadcast to SSE subscribers.
pub async fn poll_loop(
    state: SharedMonitor,
    notifier: Arc<dyn Notify>,
    broadcast_tx: broadcast::Sender<String>,
    interval: Duration,
    timeout: Duration,
) {
    tracing::info!("Starting monitoring engine...");
    loop {
        let appended = tick(&state, &notifier, timeout).await;
        if appended > 0 {
            let snapshot = state.read().await.snapshot();
            match serde_json::to_string(&snapshot) {
                Ok(json) => {
                    let _ = broadcast_tx.send(json);
                }
                Err(e) => tracing::error!("Failed to serialize snapshot: {}", e),
            }
        }
        sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct RecordingNotifier {
        calls: Mutex<Vec<(String, String, String)>>,
    }

    impl RecordingNotifier {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(String, String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Notify for RecordingNotifier {
        async fn notify(&self, endpoint: &str, status: &str, issue: &str) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push((
                endpoint.to_string(),
                status.to_string(),
                issue.to_string(),
            ));
            Ok(())
        }
    }

    fn result_for(url: &str, outcome: Outcome, latency_ms: Option<f64>) -> ProbeResult {
        ProbeResult {
            timestamp: Local::now(),
            endpoint: url.to_string(),
            outcome,
            latency_ms,
        }
    }

    fn shared(monitor: Monitor) -> SharedMonitor {
        Arc::new(RwLock::new(monitor))
    }

    /// URL on a port nothing listens on, for connection-refused probes.
    fn refused_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("http://127.0.0.1:{}/", port)
    }

    // Spawned alert tasks need a moment to run before we count calls.
    async fn settle() {
        sleep(Duration::from_millis(50)).await;
    }

    #[test]
    fn classify_without_results_is_unknown() {
        let monitor = Monitor::new(100);
        assert_eq!(monitor.classify("https://good.example"), HealthState::Unknown);
    }

    #[test]
    fn classification_latency_boundaries() {
        let mut monitor = Monitor::new(100);
        let url = "https://good.example";

        for (latency, expected) in [
            (1000.0, HealthState::Healthy),
            (1000.01, HealthState::Degraded),
            (2000.0, HealthState::Degraded),
            (2000.01, HealthState::Unhealthy),
        ] {
            monitor.push_result(result_for(url, Outcome::Success(200), Some(latency)));
            assert_eq!(monitor.classify(url), expected, "latency {}", latency);
        }
    }

    #[test]
    fn classification_failures_and_non_200() {
        let mut monitor = Monitor::new(100);

        monitor.push_result(result_for("a", Outcome::Success(500), None));
        assert_eq!(monitor.classify("a"), HealthState::Unhealthy);

        monitor.push_result(result_for("b", Outcome::Timeout, None));
        assert_eq!(monitor.classify("b"), HealthState::Unhealthy);

        monitor.push_result(result_for("c", Outcome::ConnectionError, None));
        assert_eq!(monitor.classify("c"), HealthState::Unhealthy);

        monitor.push_result(result_for("d", Outcome::Success(200), Some(12.5)));
        assert_eq!(monitor.classify("d"), HealthState::Healthy);
    }

    #[test]
    fn classify_uses_most_recent_result() {
        let mut monitor = Monitor::new(100);
        let url = "https://flappy.example";
        monitor.push_result(result_for(url, Outcome::Success(500), None));
        monitor.push_result(result_for(url, Outcome::Success(200), Some(20.0)));
        assert_eq!(monitor.classify(url), HealthState::Healthy);
    }

    #[test]
    fn add_endpoint_is_idempotent_and_rejects_empty() {
        let mut monitor = Monitor::new(100);
        assert!(monitor.add_endpoint("https://one.example"));
        assert!(!monitor.add_endpoint("https://one.example"));
        assert!(!monitor.add_endpoint(""));
        assert_eq!(monitor.endpoints(), ["https://one.example"]);
    }

    #[test]
    fn remove_then_add_restores_membership_but_not_state() {
        let mut monitor = Monitor::new(100);
        let url = "https://one.example";
        monitor.add_endpoint(url);
        monitor.push_result(result_for(url, Outcome::Success(500), None));
        monitor.mark_alerted(url);

        assert!(monitor.remove_endpoint(url));
        assert!(!monitor.remove_endpoint(url));
        assert!(monitor.add_endpoint(url));

        // History and suppression survive the round-trip untouched.
        assert_eq!(monitor.results().count(), 1);
        assert!(monitor.is_alerted(url));
    }

    #[test]
    fn buffer_truncates_to_capacity_keeping_newest() {
        let mut monitor = Monitor::new(5);
        for i in 0..8 {
            monitor.push_result(result_for(
                &format!("https://{}.example", i),
                Outcome::Success(200),
                Some(i as f64),
            ));
        }
        assert_eq!(monitor.results().count(), 5);
        let retained: Vec<f64> = monitor.results().map(|r| r.latency_ms.unwrap()).collect();
        assert_eq!(retained, [3.0, 4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn clear_data_keeps_watch_list_and_running_flag() {
        let mut monitor = Monitor::new(100);
        monitor.add_endpoint("https://one.example");
        monitor.start();
        monitor.push_result(result_for("https://one.example", Outcome::Timeout, None));
        monitor.mark_alerted("https://one.example");

        monitor.clear_data();

        assert_eq!(monitor.results().count(), 0);
        assert!(!monitor.is_alerted("https://one.example"));
        assert_eq!(monitor.endpoints().len(), 1);
        assert!(monitor.is_running());
    }

    #[test]
    fn start_stop_are_idempotent() {
        let mut monitor = Monitor::new(100);
        assert!(!monitor.is_running());
        monitor.start();
        monitor.start();
        assert!(monitor.is_running());
        monitor.stop();
        monitor.stop();
        assert!(!monitor.is_running());
    }

    #[test]
    fn snapshot_carries_cards_and_tail() {
        let mut monitor = Monitor::new(200);
        monitor.add_endpoint("https://one.example");
        monitor.add_endpoint("https://two.example");
        for _ in 0..60 {
            monitor.push_result(result_for("https://one.example", Outcome::Success(200), Some(10.0)));
        }

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.cards.len(), 2);
        assert_eq!(snapshot.cards[0].health, HealthState::Healthy);
        assert_eq!(snapshot.cards[0].status.as_deref(), Some("200"));
        assert_eq!(snapshot.cards[1].health, HealthState::Unknown);
        assert!(snapshot.cards[1].status.is_none());
        assert_eq!(snapshot.events.len(), 50);
    }

    #[tokio::test]
    async fn probe_success_measures_latency() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let result = probe(&server.uri(), Duration::from_secs(10)).await;
        assert_eq!(result.outcome, Outcome::Success(200));
        assert!(result.latency_ms.unwrap() > 0.0);
    }

    #[tokio::test]
    async fn probe_non_200_is_success_with_code() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = probe(&server.uri(), Duration::from_secs(10)).await;
        assert_eq!(result.outcome, Outcome::Success(503));
        assert!(result.latency_ms.is_some());
    }

    #[tokio::test]
    async fn probe_timeout_has_no_latency() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let result = probe(&server.uri(), Duration::from_millis(100)).await;
        assert_eq!(result.outcome, Outcome::Timeout);
        assert!(result.latency_ms.is_none());
    }

    #[tokio::test]
    async fn probe_connection_refused() {
        let result = probe(&refused_url(), Duration::from_secs(10)).await;
        assert_eq!(result.outcome, Outcome::ConnectionError);
        assert!(result.latency_ms.is_none());
    }

    #[tokio::test]
    async fn probe_malformed_url_is_other_error() {
        let result = probe("not a url", Duration::from_secs(10)).await;
        assert!(matches!(result.outcome, Outcome::OtherError(_)));
        assert!(result.latency_ms.is_none());
    }

    #[tokio::test]
    async fn tick_while_stopped_issues_no_probes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut monitor = Monitor::new(100);
        monitor.add_endpoint(&server.uri());
        let state = shared(monitor);
        let notifier: Arc<dyn Notify> = RecordingNotifier::new();

        let appended = tick(&state, &notifier, Duration::from_secs(1)).await;
        assert_eq!(appended, 0);
        assert_eq!(state.read().await.results().count(), 0);
    }

    #[tokio::test]
    async fn tick_with_empty_watch_list_is_a_noop() {
        let mut monitor = Monitor::new(100);
        monitor.start();
        let state = shared(monitor);
        let notifier: Arc<dyn Notify> = RecordingNotifier::new();

        let appended = tick(&state, &notifier, Duration::from_secs(1)).await;
        assert_eq!(appended, 0);
    }

    #[tokio::test]
    async fn tick_good_and_down_endpoints() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let good = server.uri();
        let down = refused_url();

        let mut monitor = Monitor::new(100);
        monitor.add_endpoint(&good);
        monitor.add_endpoint(&down);
        monitor.start();
        let state = shared(monitor);

        let recording = RecordingNotifier::new();
        let notifier: Arc<dyn Notify> = recording.clone();

        let appended = tick(&state, &notifier, Duration::from_secs(5)).await;
        settle().await;

        assert_eq!(appended, 2);
        let monitor = state.read().await;
        assert_eq!(monitor.results().count(), 2);
        assert_eq!(monitor.classify(&good), HealthState::Healthy);
        assert_eq!(monitor.classify(&down), HealthState::Unhealthy);

        let calls = recording.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, down);
        assert_eq!(calls[0].1, "CONNECTION ERROR");
        assert_eq!(calls[0].2, "Connection failed");
    }

    #[tokio::test]
    async fn alert_fires_once_per_failure_episode() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut monitor = Monitor::new(100);
        monitor.add_endpoint(&server.uri());
        monitor.start();
        let state = shared(monitor);

        let recording = RecordingNotifier::new();
        let notifier: Arc<dyn Notify> = recording.clone();

        for _ in 0..5 {
            tick(&state, &notifier, Duration::from_secs(5)).await;
        }
        settle().await;

        let calls = recording.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, "500");
        assert_eq!(calls[0].2, "Internal Server Error");

        // clear_data ends the episode; the next failing tick re-alerts.
        state.write().await.clear_data();
        tick(&state, &notifier, Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(recording.calls().len(), 2);
    }

    #[tokio::test]
    async fn tick_appends_all_results_up_to_capacity() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let mut monitor = Monitor::new(4);
        for path in ["a", "b", "c"] {
            monitor.add_endpoint(&format!("{}/{}", server.uri(), path));
        }
        monitor.start();
        let state = shared(monitor);
        let notifier: Arc<dyn Notify> = RecordingNotifier::new();

        tick(&state, &notifier, Duration::from_secs(5)).await;
        tick(&state, &notifier, Duration::from_secs(5)).await;

        // 6 results through a capacity-4 buffer leaves the newest 4.
        assert_eq!(state.read().await.results().count(), 4);
    }
}
