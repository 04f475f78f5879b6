use std::time::{Duration, Instant};
use tracing::info;

/// Logs when a stretch of work starts and how long it took once dropped.
pub struct Timer {
    label: String,
    start: Instant,
}

impl Timer {
    pub fn start(label: impl Into<String>) -> Self {
        let label = label.into();
        info!("⏱  Starting: {}", label);
        Self {
            label,
            start: Instant::now(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        info!("⏱  Finished: {} (took {})", self.label, fmt_elapsed(self.start.elapsed()));
    }
}

/// `1h 02m 05s`, `3m 07s` or `4.20s`.
pub fn fmt_elapsed(d: Duration) -> String {
    let secs = d.as_secs();
    match secs {
        0..=59 => format!("{:.2}s", d.as_secs_f64()),
        60..=3599 => format!("{}m {:02}s", secs / 60, secs % 60),
        _ => format!("{}h {:02}m {:02}s", secs / 3600, (secs % 3600) / 60, secs % 60),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fmt_elapsed() {
        assert_eq!(fmt_elapsed(Duration::from_millis(4200)), "4.20s");
        assert_eq!(fmt_elapsed(Duration::from_secs(187)), "3m 07s");
        assert_eq!(fmt_elapsed(Duration::from_secs(3725)), "1h 02m 05s");
    }
}
