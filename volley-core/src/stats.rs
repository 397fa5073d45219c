use std::fmt;
use std::time::Duration;

/// End of run summary.
///
/// Produced by the summary sink once a run has stopped. The `Display` impl renders the familiar
/// dotted k6-style report.
#[derive(Debug, Clone, Default)]
pub struct RunStatistics {
    pub elapsed: Duration,
    pub iterations: u64,
    pub failed_iterations: u64,
    /// Iterations cut short because their VU was abandoned after the grace period.
    pub interrupted_iterations: u64,
    pub iteration_duration: LatencyStatistics,
    pub checks: Vec<CheckStatistics>,
    pub requests: u64,
    pub failed_requests: u64,
    pub latency: LatencyStatistics,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub min_vus: usize,
    pub max_vus: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckStatistics {
    pub name: String,
    pub passed: u64,
    pub failed: u64,
}

impl CheckStatistics {
    pub fn total(&self) -> u64 {
        self.passed + self.failed
    }

    pub fn pass_rate(&self) -> f64 {
        ratio(self.passed, self.total())
    }
}

/// Distribution of a duration metric, such as request latency. Quantiles are estimates.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencyStatistics {
    pub avg: Duration,
    pub min: Duration,
    pub p50: Duration,
    pub p90: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub max: Duration,
}

impl RunStatistics {
    pub fn checks_passed(&self) -> u64 {
        self.checks.iter().map(|c| c.passed).sum()
    }

    pub fn checks_failed(&self) -> u64 {
        self.checks.iter().map(|c| c.failed).sum()
    }

    pub fn check_pass_rate(&self) -> f64 {
        ratio(self.checks_passed(), self.checks_passed() + self.checks_failed())
    }

    pub fn check(&self, name: &str) -> Option<&CheckStatistics> {
        self.checks.iter().find(|c| c.name == name)
    }

    pub fn request_error_rate(&self) -> f64 {
        ratio(self.failed_requests, self.requests)
    }

    pub fn request_rate(&self) -> f64 {
        per_second(self.requests, self.elapsed)
    }

    pub fn iteration_rate(&self) -> f64 {
        per_second(self.iterations, self.elapsed)
    }
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.
    } else {
        part as f64 / total as f64
    }
}

fn per_second(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0. {
        count as f64 / secs
    } else {
        0.
    }
}

fn line(f: &mut fmt::Formatter<'_>, name: &str, value: fmt::Arguments<'_>) -> fmt::Result {
    writeln!(f, "     {:.<32}: {}", name, value)
}

impl fmt::Display for RunStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for check in &self.checks {
            let mark = if check.failed == 0 { '✓' } else { '✗' };
            writeln!(
                f,
                "     {mark} {} ({:.2}% ✓ {} ✗ {})",
                check.name,
                check.pass_rate() * 100.,
                check.passed,
                check.failed
            )?;
        }
        if !self.checks.is_empty() {
            writeln!(f)?;
        }

        line(
            f,
            "checks",
            format_args!(
                "{:.2}% ✓ {} ✗ {}",
                self.check_pass_rate() * 100.,
                self.checks_passed(),
                self.checks_failed()
            ),
        )?;
        line(
            f,
            "data_received",
            format_args!(
                "{} B {:.0} B/s",
                self.bytes_received,
                per_second(self.bytes_received, self.elapsed)
            ),
        )?;
        line(
            f,
            "data_sent",
            format_args!(
                "{} B {:.0} B/s",
                self.bytes_sent,
                per_second(self.bytes_sent, self.elapsed)
            ),
        )?;
        line(f, "http_req_duration", format_args!("{}", self.latency))?;
        line(
            f,
            "http_req_failed",
            format_args!(
                "{:.2}% ✓ {} ✗ {}",
                self.request_error_rate() * 100.,
                self.failed_requests,
                self.requests - self.failed_requests.min(self.requests)
            ),
        )?;
        line(
            f,
            "http_reqs",
            format_args!("{} {:.6}/s", self.requests, self.request_rate()),
        )?;
        line(
            f,
            "iteration_duration",
            format_args!("{}", self.iteration_duration),
        )?;
        line(
            f,
            "iterations",
            format_args!(
                "{} {:.6}/s ({} failed)",
                self.iterations,
                self.iteration_rate(),
                self.failed_iterations
            ),
        )?;
        line(
            f,
            "vus",
            format_args!("min={} max={}", self.min_vus, self.max_vus),
        )?;
        line(f, "vus_max", format_args!("{}", self.max_vus))?;
        writeln!(
            f,
            "\nrunning ({}), {} complete and {} interrupted iterations",
            humantime::format_duration(Duration::from_millis(self.elapsed.as_millis() as u64)),
            self.iterations,
            self.interrupted_iterations
        )
    }
}

impl fmt::Display for LatencyStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "avg={:?} min={:?} med={:?} max={:?} p(90)={:?} p(95)={:?} p(99)={:?}",
            self.avg, self.min, self.p50, self.max, self.p90, self.p95, self.p99
        )
    }
}
