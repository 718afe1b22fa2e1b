use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// DMG/CGB refresh rate: 4194304 Hz / 70224 cycles per frame.
pub const GB_FPS: f64 = 59.7275;
pub const FRAME_TIME: Duration = Duration::from_nanos((1e9_f64 / GB_FPS) as u64);

const WINDOW: usize = 60;
const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Averages the last 60 frame times and reports once per second.
pub struct FrameRateTicker {
    samples: VecDeque<Duration>,
    last_frame: Option<Instant>,
    last_report: Option<Instant>,
}

impl Default for FrameRateTicker {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameRateTicker {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(WINDOW),
            last_frame: None,
            last_report: None,
        }
    }

    pub fn average_fps(&self) -> Option<f64> {
        let total: Duration = self.samples.iter().sum();
        if self.samples.is_empty() || total.is_zero() {
            return None;
        }
        Some(self.samples.len() as f64 / total.as_secs_f64())
    }

    /// Record a frame finishing at `now`. Returns the average rate when a
    /// report is due.
    pub fn tick(&mut self, now: Instant) -> Option<f64> {
        if let Some(prev) = self.last_frame.replace(now) {
            if self.samples.len() == WINDOW {
                self.samples.pop_front();
            }
            self.samples.push_back(now.saturating_duration_since(prev));
        }
        let report = *self.last_report.get_or_insert(now);
        if now.saturating_duration_since(report) < REPORT_INTERVAL {
            return None;
        }
        self.last_report = Some(now);
        self.average_fps()
    }
}

/// Sleeps until the next frame deadline.
pub struct FramePacer {
    frame_time: Duration,
    next_frame: Option<Instant>,
}

impl FramePacer {
    pub fn new(frame_time: Duration) -> Self {
        Self {
            frame_time,
            next_frame: None,
        }
    }

    pub fn wait(&mut self) {
        let target = *self
            .next_frame
            .get_or_insert_with(|| Instant::now() + self.frame_time);
        let now = Instant::now();
        if now < target {
            let remaining = target - now;
            if remaining > Duration::from_millis(2) {
                std::thread::sleep(remaining - Duration::from_millis(1));
            }
            while Instant::now() < target {
                std::hint::spin_loop();
            }
            self.next_frame = Some(target + self.frame_time);
        } else {
            // Too far behind to catch up; restart the schedule.
            self.next_frame = Some(now + self.frame_time);
        }
    }
}
