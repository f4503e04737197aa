use std::{sync::Mutex, time::Instant};

#[derive(Clone)]
pub(crate) struct RunTime {
    start: Instant,
    end: Instant,
}

impl RunTime {
    pub(crate) fn since_start(start: Instant) -> Self {
        Self { start, end: Instant::now() }
    }
}

impl serde::Serialize for RunTime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let duration = self.end - self.start;
        serializer.serialize_str(&format!("{}.{:03}s", duration.as_secs(), duration.subsec_millis()))
    }
}

#[derive(serde::Serialize, Clone)]
pub(crate) struct StepTiming {
    pub(crate) step: String,
    pub(crate) run_time: RunTime,
}

/// Run times of the steps of one lifecycle call, in completion order
#[derive(Default)]
pub(crate) struct StepTimings {
    steps: Mutex<Vec<StepTiming>>,
}

impl StepTimings {
    pub(crate) fn record(&self, step: &str, start: Instant) {
        let timing = StepTiming {
            step: step.to_string(),
            run_time: RunTime::since_start(start),
        };

        match self.steps.lock() {
            Ok(mut steps) => steps.push(timing),
            Err(err) => log::warn!("failed to record timing of {}: {}", step, err),
        }
    }

    pub(crate) fn snapshot(&self) -> Vec<StepTiming> {
        self.steps.lock().map(|steps| steps.clone()).unwrap_or_default()
    }
}
