/// Service health counters
/// Backs the /health, /ready and /metrics endpoints

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Point-in-time copy of the counters
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Number of reports written
    pub reports_completed: u64,
    /// Number of reports that failed or timed out
    pub reports_failed: u64,
    /// Malformed input rows skipped during the last load
    pub rows_rejected: u64,
    /// Timestamp of last finished report (Unix epoch seconds)
    pub last_report_time: u64,
    /// Whether the last report was written successfully
    pub last_report_ok: bool,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self {
            reports_completed: 0,
            reports_failed: 0,
            rows_rejected: 0,
            last_report_time: 0,
            last_report_ok: true, // Assume healthy until proven otherwise
        }
    }
}

/// Shared counters, updated from report tasks
#[derive(Debug)]
pub struct HealthMetrics {
    reports_completed: AtomicU64,
    reports_failed: AtomicU64,
    rows_rejected: AtomicU64,
    last_report_time: AtomicU64,
    last_report_ok: AtomicBool,
}

impl Default for HealthMetrics {
    fn default() -> Self {
        Self {
            reports_completed: AtomicU64::new(0),
            reports_failed: AtomicU64::new(0),
            rows_rejected: AtomicU64::new(0),
            last_report_time: AtomicU64::new(0),
            last_report_ok: AtomicBool::new(true),
        }
    }
}

impl HealthMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self) {
        self.reports_completed.fetch_add(1, Ordering::Relaxed);
        self.last_report_time.store(unix_now(), Ordering::Relaxed);
        self.last_report_ok.store(true, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.reports_failed.fetch_add(1, Ordering::Relaxed);
        self.last_report_time.store(unix_now(), Ordering::Relaxed);
        self.last_report_ok.store(false, Ordering::Relaxed);
    }

    pub fn set_rows_rejected(&self, count: u64) {
        self.rows_rejected.store(count, Ordering::Relaxed);
    }

    pub fn status(&self) -> HealthStatus {
        HealthStatus {
            reports_completed: self.reports_completed.load(Ordering::Relaxed),
            reports_failed: self.reports_failed.load(Ordering::Relaxed),
            rows_rejected: self.rows_rejected.load(Ordering::Relaxed),
            last_report_time: self.last_report_time.load(Ordering::Relaxed),
            last_report_ok: self.last_report_ok.load(Ordering::Relaxed),
        }
    }
}

impl HealthStatus {
    /// Ready until a report has actually failed
    pub fn is_ready(&self) -> bool {
        self.last_report_ok || self.last_report_time == 0
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "status": "healthy",
            "reports_completed": self.reports_completed,
            "reports_failed": self.reports_failed,
            "rows_rejected": self.rows_rejected,
            "last_report_time": self.last_report_time,
            "last_report_ok": self.last_report_ok,
        })
    }

    /// Prometheus text exposition format
    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP storewatch_reports_total Total number of reports generated\n\
             # TYPE storewatch_reports_total counter\n\
             storewatch_reports_total{{result=\"success\"}} {}\n\
             storewatch_reports_total{{result=\"failure\"}} {}\n\
             # HELP storewatch_rows_rejected Malformed rows skipped by the last load\n\
             # TYPE storewatch_rows_rejected gauge\n\
             storewatch_rows_rejected {}\n\
             # HELP storewatch_last_report_timestamp Unix timestamp of last report\n\
             # TYPE storewatch_last_report_timestamp gauge\n\
             storewatch_last_report_timestamp {}\n\
             # HELP storewatch_last_report_ok Whether the last report succeeded (1) or failed (0)\n\
             # TYPE storewatch_last_report_ok gauge\n\
             storewatch_last_report_ok {}\n",
            self.reports_completed,
            self.reports_failed,
            self.rows_rejected,
            self.last_report_time,
            if self.last_report_ok { 1 } else { 0 }
        )
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_metrics_default() {
        let metrics = HealthMetrics::new();
        let status = metrics.status();

        assert_eq!(status.reports_completed, 0);
        assert_eq!(status.reports_failed, 0);
        assert_eq!(status.last_report_time, 0);
        assert!(status.last_report_ok);
        assert!(status.is_ready());
    }

    #[test]
    fn test_health_metrics_record_success() {
        let metrics = HealthMetrics::new();
        metrics.record_success();

        let status = metrics.status();
        assert_eq!(status.reports_completed, 1);
        assert_eq!(status.reports_failed, 0);
        assert!(status.last_report_time > 0);
        assert!(status.last_report_ok);
    }

    #[test]
    fn test_health_metrics_record_failure() {
        let metrics = HealthMetrics::new();
        metrics.record_failure();

        let status = metrics.status();
        assert_eq!(status.reports_failed, 1);
        assert!(!status.last_report_ok);
        assert!(!status.is_ready());
    }

    #[test]
    fn test_health_metrics_multiple_records() {
        let metrics = HealthMetrics::new();
        metrics.record_success();
        metrics.record_success();
        metrics.record_failure();
        metrics.record_success();

        let status = metrics.status();
        assert_eq!(status.reports_completed, 3);
        assert_eq!(status.reports_failed, 1);
        assert!(status.last_report_ok); // Last was success
    }

    #[test]
    fn test_health_json() {
        let metrics = HealthMetrics::new();
        metrics.set_rows_rejected(4);
        let json = metrics.status().to_json();
        assert_eq!(json["rows_rejected"], 4);
        assert_eq!(json["status"], "healthy");
    }

    #[test]
    fn test_prometheus_output() {
        let status = HealthStatus {
            reports_completed: 10,
            reports_failed: 2,
            rows_rejected: 0,
            last_report_time: 1234567890,
            last_report_ok: true,
        };

        let body = status.to_prometheus();
        assert!(body.contains("storewatch_reports_total{result=\"success\"} 10"));
        assert!(body.contains("storewatch_reports_total{result=\"failure\"} 2"));
        assert!(body.contains("storewatch_last_report_ok 1"));
    }
}
