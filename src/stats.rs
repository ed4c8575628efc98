use std::fmt;
use std::time::{Duration, Instant};

const NS_PER_SEC: u128 = 1_000_000_000;

/// Receives the timing of every ping-pong round.
pub trait Accumulator {
    fn begin_iteration(&mut self);
    fn end_iteration(&mut self, messages: u64);
    fn report(&self) -> Option<Report>;
}

/// Accumulator for the side that is not being timed.
#[derive(Debug, Default, Clone, Copy)]
pub struct Discard;

impl Accumulator for Discard {
    fn begin_iteration(&mut self) {}
    fn end_iteration(&mut self, _messages: u64) {}
    fn report(&self) -> Option<Report> {
        None
    }
}

/// Per-iteration wall-clock durations on the monotonic clock.
#[derive(Debug)]
pub struct Benchmark {
    name: String,
    message_size: usize,
    started: Option<Instant>,
    durations: Vec<Duration>,
    total_messages: u64,
}

impl Benchmark {
    pub fn new(name: impl Into<String>, message_size: usize) -> Self {
        Benchmark {
            name: name.into(),
            message_size,
            started: None,
            durations: Vec::new(),
            total_messages: 0,
        }
    }

    pub fn with_capacity(name: impl Into<String>, message_size: usize, iterations: usize) -> Self {
        let mut bench = Self::new(name, message_size);
        bench.durations.reserve(iterations);
        bench
    }

    pub fn iterations(&self) -> usize {
        self.durations.len()
    }
}

impl Accumulator for Benchmark {
    fn begin_iteration(&mut self) {
        self.started = Some(Instant::now());
    }

    fn end_iteration(&mut self, messages: u64) {
        // An end without a begin is dropped.
        if let Some(started) = self.started.take() {
            self.durations.push(started.elapsed());
            self.total_messages += messages;
        }
    }

    fn report(&self) -> Option<Report> {
        if self.durations.is_empty() {
            return None;
        }
        let mut sorted = self.durations.clone();
        sorted.sort_unstable();
        let total: Duration = sorted.iter().sum();
        let total_ns = total.as_nanos().max(1);
        let iterations = sorted.len();
        Some(Report {
            name: self.name.clone(),
            message_size: self.message_size,
            iterations,
            total,
            per_iteration: Duration::from_nanos((total.as_nanos() / iterations as u128) as u64),
            min: sorted[0],
            median: sorted[iterations / 2],
            max: sorted[iterations - 1],
            total_messages: self.total_messages,
            messages_per_sec: (self.total_messages as u128 * NS_PER_SEC / total_ns) as u64,
            bytes_per_sec: (self.total_messages as u128 * self.message_size as u128 * NS_PER_SEC
                / total_ns) as u64,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub name: String,
    pub message_size: usize,
    pub iterations: usize,
    pub total: Duration,
    pub per_iteration: Duration,
    pub min: Duration,
    pub median: Duration,
    pub max: Duration,
    pub total_messages: u64,
    pub messages_per_sec: u64,
    pub bytes_per_sec: u64,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(40);
        writeln!(f, "{rule}")?;
        writeln!(f, "Benchmark: {} ({} byte msgs)", self.name, self.message_size)?;
        writeln!(f, "{rule}")?;
        writeln!(f, "Iterations: {}", self.iterations)?;
        writeln!(f, "Total duration (sec): {:.3}", self.total.as_secs_f64())?;
        writeln!(f, "Duration (ns) / it: {}", self.per_iteration.as_nanos())?;
        writeln!(
            f,
            "Min / median / max (ns): {} / {} / {}",
            self.min.as_nanos(),
            self.median.as_nanos(),
            self.max.as_nanos()
        )?;
        writeln!(f, "Total messages: {}", self.total_messages)?;
        writeln!(f, "Messages / sec: {}", self.messages_per_sec)?;
        write!(f, "Bytes / sec: {}", self.bytes_per_sec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_benchmark_has_no_report() {
        assert!(Benchmark::new("shm", 64).report().is_none());
        assert!(Discard.report().is_none());
    }

    #[test]
    fn counts_only_completed_iterations() {
        let mut bench = Benchmark::with_capacity("shm", 64, 4);
        bench.end_iteration(1);
        for _ in 0..3 {
            bench.begin_iteration();
            bench.end_iteration(1);
        }
        bench.begin_iteration();

        let report = bench.report().unwrap();
        assert_eq!(report.iterations, 3);
        assert_eq!(report.total_messages, 3);
        assert!(report.min <= report.median && report.median <= report.max);
        assert!(report.bytes_per_sec >= report.messages_per_sec * 64);
    }

    #[test]
    fn report_renders_every_figure() {
        let mut bench = Benchmark::new("shm", 128);
        bench.begin_iteration();
        bench.end_iteration(2);
        let text = bench.report().unwrap().to_string();
        assert!(text.contains("Benchmark: shm (128 byte msgs)"));
        assert!(text.contains("Iterations: 1"));
        assert!(text.contains("Total messages: 2"));
    }
}
