//! Debounced upload progress reporting.

use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub type ProgressCallback = Arc<dyn Fn(u8) + Send + Sync>;

/// Forwards percent changes to a callback at most once per interval.
/// The 100 % report always goes through.
pub struct ProgressReporter {
    callback: Option<ProgressCallback>,
    interval: Duration,
    state: Mutex<ReportState>,
}

struct ReportState {
    last_pct: Option<u8>,
    last_emit: Option<Instant>,
}

impl ProgressReporter {
    pub fn new(callback: Option<ProgressCallback>, interval: Duration) -> Self {
        Self {
            callback,
            interval,
            state: Mutex::new(ReportState {
                last_pct: None,
                last_emit: None,
            }),
        }
    }

    pub fn silent() -> Self {
        Self::new(None, Duration::ZERO)
    }

    pub fn report(&self, pct: u8) {
        let Some(callback) = &self.callback else {
            return;
        };

        {
            let mut state = self.state.lock();
            if state.last_pct == Some(pct) {
                return;
            }
            let due = pct >= 100
                || state
                    .last_emit
                    .map_or(true, |at| at.elapsed() >= self.interval);
            if !due {
                return;
            }
            state.last_pct = Some(pct);
            state.last_emit = Some(Instant::now());
        }

        callback(pct);
    }
}

/// Progress callback that drives an indicatif bar.
pub fn progress_bar_callback(label: &str) -> ProgressCallback {
    let bar = ProgressBar::new(100);
    let style = ProgressStyle::default_bar()
        .template("{msg:20} [{bar:40.cyan/blue}] {pos:>3}%")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-");
    bar.set_style(style);
    bar.set_message(label.to_string());

    Arc::new(move |pct| {
        bar.set_position(u64::from(pct));
        if pct >= 100 {
            bar.finish();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (ProgressCallback, Arc<Mutex<Vec<u8>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (Arc::new(move |pct| sink.lock().push(pct)), seen)
    }

    #[test]
    fn test_debounces_within_interval() {
        let (callback, seen) = recorder();
        let reporter = ProgressReporter::new(Some(callback), Duration::from_secs(3600));
        reporter.report(10);
        reporter.report(20);
        reporter.report(30);
        reporter.report(100);
        assert_eq!(*seen.lock(), vec![10, 100]);
    }

    #[test]
    fn test_repeated_percent_is_dropped() {
        let (callback, seen) = recorder();
        let reporter = ProgressReporter::new(Some(callback), Duration::ZERO);
        reporter.report(50);
        reporter.report(50);
        reporter.report(51);
        reporter.report(100);
        reporter.report(100);
        assert_eq!(*seen.lock(), vec![50, 51, 100]);
    }

    #[test]
    fn test_silent_reporter() {
        let reporter = ProgressReporter::silent();
        reporter.report(100);
    }

    #[test]
    fn test_progress_bar_through_reporter() {
        let callback = progress_bar_callback("bundle");
        let reporter = ProgressReporter::new(Some(callback), Duration::ZERO);
        reporter.report(40);
        reporter.report(100);
    }
}
