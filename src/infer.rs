//! Runtime port inference from service output.
//!
//! Many dev servers print the port they actually bound instead of honoring
//! the port environment variable they were given. The supervisor scans every
//! output line for URL/port patterns and, once the same port repeats within
//! a short window, adopts it as the service's real port so status and port
//! queries match reality.

use regex::Regex;
use std::{
    collections::HashMap,
    sync::{LazyLock, Mutex},
    time::{Duration, Instant},
};

/// Smallest port value the inferrer will believe.
pub const MIN_INFERRED_PORT: u16 = 10;

/// Window within which a repeated sighting counts as confirmation.
const CONFIRM_WINDOW: Duration = Duration::from_secs(10);

static URL_PORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://[^\s/:]+:(\d{2,5})").expect("url port pattern")
});
static HOST_PORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:localhost|127\.0\.0\.1|0\.0\.0\.0|::1):(\d{2,5})")
        .expect("host port pattern")
});
static PORT_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bport\b\s*[:=]?\s*(\d{2,5})").expect("port word pattern")
});

/// Extracts a candidate port from one output line, if any.
pub fn extract_port(text: &str) -> Option<u16> {
    for pattern in [&*URL_PORT, &*HOST_PORT, &*PORT_WORD] {
        if let Some(captures) = pattern.captures(text)
            && let Some(group) = captures.get(1)
            && let Ok(port) = group.as_str().parse::<u16>()
            && port >= MIN_INFERRED_PORT
        {
            return Some(port);
        }
    }
    None
}

/// Accumulated sighting state for one service.
#[derive(Debug, Clone)]
struct PortSignal {
    port: u16,
    count: u32,
    last_seen: Instant,
    confirmed: bool,
}

/// Per-service confirmation tracking for runtime port sightings.
pub struct PortSignals {
    signals: Mutex<HashMap<String, PortSignal>>,
}

impl PortSignals {
    /// Creates an empty signal table.
    pub fn new() -> Self {
        Self {
            signals: Mutex::new(HashMap::new()),
        }
    }

    fn key(project: &str, service: &str) -> String {
        format!("{project}/{service}")
    }

    /// Records a sighting of `detected` for a service whose current port is
    /// `current`. Returns `true` exactly once per confirmed port: when the
    /// sighting count reaches the threshold (1 for portless services, else
    /// 2) and the detected port differs from the current one.
    pub fn observe(
        &self,
        project: &str,
        service: &str,
        detected: u16,
        current: u16,
    ) -> bool {
        let threshold = if current == 0 { 1 } else { 2 };
        let now = Instant::now();
        let key = Self::key(project, service);

        let mut signals = self.signals.lock().unwrap_or_else(|e| e.into_inner());
        let signal = signals
            .entry(key)
            .and_modify(|signal| {
                if signal.port == detected
                    && now.duration_since(signal.last_seen) <= CONFIRM_WINDOW
                {
                    signal.count += 1;
                    signal.last_seen = now;
                } else {
                    // Different port or stale sighting: restart the signal.
                    *signal = PortSignal {
                        port: detected,
                        count: 1,
                        last_seen: now,
                        confirmed: false,
                    };
                }
            })
            .or_insert_with(|| PortSignal {
                port: detected,
                count: 1,
                last_seen: now,
                confirmed: false,
            });

        if !signal.confirmed && signal.count >= threshold && detected != current {
            signal.confirmed = true;
            return true;
        }
        false
    }

    /// Forgets the signal for one service.
    pub fn clear(&self, project: &str, service: &str) {
        let mut signals = self.signals.lock().unwrap_or_else(|e| e.into_inner());
        signals.remove(&Self::key(project, service));
    }

    /// Forgets every signal belonging to a project.
    pub fn clear_project(&self, project: &str) {
        let prefix = format!("{project}/");
        let mut signals = self.signals.lock().unwrap_or_else(|e| e.into_inner());
        signals.retain(|key, _| !key.starts_with(&prefix));
    }
}

impl Default for PortSignals {
    fn default() -> Self {
        Self::new()
    }
}
