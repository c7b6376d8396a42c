//! Stage timing and count formatting.

use std::time::{Duration, Instant};

/// Formats a count with thousands separators.
///
/// # Examples
///
/// ```
/// use dsa_lib::logging::format_count;
///
/// assert_eq!(format_count(999), "999");
/// assert_eq!(format_count(1_234_567), "1,234,567");
/// ```
#[must_use]
pub fn format_count(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Formats a duration as `HH:MM:SS.mmm`.
#[must_use]
pub fn format_wall_clock(duration: Duration) -> String {
    let millis = duration.as_millis();
    let secs = millis / 1000;
    format!("{:02}:{:02}:{:02}.{:03}", secs / 3600, (secs / 60) % 60, secs % 60, millis % 1000)
}

/// Logs a stage start on construction and its throughput on completion.
pub struct StageTimer {
    stage: String,
    start: Instant,
}

impl StageTimer {
    /// Starts timing and logs `"<stage> ..."`.
    #[must_use]
    pub fn new(stage: &str) -> Self {
        log::info!("{stage} ...");
        Self { stage: stage.to_string(), start: Instant::now() }
    }

    /// Logs the record count and elapsed time for the stage.
    pub fn finish(&self, records: u64) {
        let elapsed = self.start.elapsed();
        log::info!(
            "{}: {} records in {:.2}s",
            self.stage,
            format_count(records),
            elapsed.as_secs_f64()
        );
    }
}
