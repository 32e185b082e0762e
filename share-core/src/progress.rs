//! Transfer rate and ETA estimation.
//!
//! Speed is the mean rate since the tracker started; no smoothing window.
//! Callers pass the current instant so tests stay deterministic.

use peershare_types::TransferProgress;
use std::time::Instant;

/// Builds [`TransferProgress`] snapshots for one transfer.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    started: Instant,
    total_bytes: u64,
    total_files: u32,
}

impl ProgressTracker {
    /// Start tracking at `started`.
    pub fn new(started: Instant, total_bytes: u64, total_files: u32) -> Self {
        Self {
            started,
            total_bytes,
            total_files,
        }
    }

    /// Update the expected total (the receiver learns it from `file-start`).
    pub fn set_totals(&mut self, total_bytes: u64, total_files: u32) {
        self.total_bytes = total_bytes;
        self.total_files = total_files;
    }

    /// Snapshot at `now` with `bytes` moved so far.
    pub fn snapshot(
        &self,
        now: Instant,
        bytes: u64,
        current_file: &str,
        file_index: u32,
    ) -> TransferProgress {
        let elapsed = now.saturating_duration_since(self.started).as_secs_f64();
        let speed = if elapsed > 0.0 {
            bytes as f64 / elapsed
        } else {
            0.0
        };
        let remaining = self.total_bytes.saturating_sub(bytes);
        let eta = if speed > 0.0 {
            remaining as f64 / speed
        } else {
            0.0
        };

        TransferProgress {
            bytes_transferred: bytes,
            total_bytes: self.total_bytes,
            speed,
            eta,
            current_file: current_file.to_string(),
            file_index,
            total_files: self.total_files,
        }
    }
}

/// Human readable byte count (`1.5 MB`).
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        let rounded = (value * 100.0).round() / 100.0;
        format!("{rounded} {}", UNITS[unit])
    }
}

/// Human readable duration for an ETA in seconds (`2m 5s`, `--` if unknown).
pub fn format_eta(seconds: f64) -> String {
    if !seconds.is_finite() || seconds <= 0.0 {
        return "--".to_string();
    }
    if seconds < 60.0 {
        return format!("{}s", seconds.ceil() as u64);
    }
    let whole = seconds as u64;
    if seconds < 3600.0 {
        return format!("{}m {}s", whole / 60, (seconds % 60.0).ceil() as u64);
    }
    format!("{}h {}m", whole / 3600, (whole % 3600) / 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn speed_and_eta() {
        let start = Instant::now();
        let tracker = ProgressTracker::new(start, 3000, 2);
        let p = tracker.snapshot(start + Duration::from_secs(2), 1000, "a.txt", 0);

        assert_eq!(p.bytes_transferred, 1000);
        assert_eq!(p.total_bytes, 3000);
        assert!((p.speed - 500.0).abs() < 1e-9);
        assert!((p.eta - 4.0).abs() < 1e-9);
        assert_eq!(p.current_file, "a.txt");
        assert_eq!(p.total_files, 2);
    }

    #[test]
    fn zero_elapsed_means_zero_speed() {
        let start = Instant::now();
        let p = ProgressTracker::new(start, 10, 1).snapshot(start, 5, "x", 0);
        assert_eq!(p.speed, 0.0);
        assert_eq!(p.eta, 0.0);
    }

    #[test]
    fn byte_formatting() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(64 * 1024 * 1024), "64 MB");
    }

    #[test]
    fn eta_formatting() {
        assert_eq!(format_eta(0.0), "--");
        assert_eq!(format_eta(f64::INFINITY), "--");
        assert_eq!(format_eta(4.2), "5s");
        assert_eq!(format_eta(125.0), "2m 5s");
        assert_eq!(format_eta(7320.0), "2h 2m");
    }
}
