use std::time::{Duration, Instant};

/// Wall-clock durations of the pipeline stages of one run.
#[derive(Debug, Default)]
pub struct StageTiming {
    started: Option<Instant>,
    stages: Vec<(&'static str, Duration)>,
}

impl StageTiming {
    pub fn new() -> Self {
        Self {
            started: Some(Instant::now()),
            stages: Vec::new(),
        }
    }

    pub fn measure<T>(&mut self, stage: &'static str, work: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let value = work();
        let elapsed = start.elapsed();
        log::debug!("{} took {:.2} ms", stage, elapsed.as_secs_f64() * 1000.0);
        self.stages.push((stage, elapsed));
        value
    }

    pub fn stages(&self) -> &[(&'static str, Duration)] {
        &self.stages
    }

    pub fn summary(&self) -> String {
        let total = self
            .started
            .map(|started| started.elapsed())
            .unwrap_or_else(|| self.stages.iter().map(|(_, d)| *d).sum());
        let parts: Vec<String> = self
            .stages()
            .iter()
            .map(|(stage, elapsed)| format!("{} {:.2} ms", stage, elapsed.as_secs_f64() * 1000.0))
            .collect();
        format!(
            "{} (total {:.2} ms)",
            parts.join(", "),
            total.as_secs_f64() * 1000.0
        )
    }
}
