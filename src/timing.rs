use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

/// Mean of the last `window_size` samples.
pub struct RollingAverage {
    samples: VecDeque<f32>,
    window_size: usize,
    sum: f64,
}

impl RollingAverage {
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            samples: VecDeque::with_capacity(window_size),
            window_size,
            sum: 0.0,
        }
    }

    pub fn push(&mut self, val: f32) {
        self.samples.push_back(val);
        self.sum += f64::from(val);
        if self.samples.len() > self.window_size {
            if let Some(old) = self.samples.pop_front() {
                self.sum -= f64::from(old);
            }
        }
    }

    pub fn get(&self) -> f32 {
        if self.samples.is_empty() {
            0.0
        } else {
            (self.sum / self.samples.len() as f64) as f32
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FrameTime {
    pub dt: Duration,
    pub elapsed: Duration,
}

pub struct FrameClock {
    start: Instant,
    last: Instant,
    frames: u64,
    frame_seconds: RollingAverage,
}

impl FrameClock {
    pub fn start() -> Self {
        Self::started_at(Instant::now())
    }

    fn started_at(now: Instant) -> Self {
        Self {
            start: now,
            last: now,
            frames: 0,
            frame_seconds: RollingAverage::new(120),
        }
    }

    pub fn tick(&mut self) -> FrameTime {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> FrameTime {
        let dt = now.saturating_duration_since(self.last);
        self.last = now;
        self.frames += 1;
        self.frame_seconds.push(dt.as_secs_f32());

        FrameTime {
            dt,
            elapsed: now.saturating_duration_since(self.start),
        }
    }

    pub fn elapsed_ms(&self) -> f32 {
        self.last.saturating_duration_since(self.start).as_secs_f32() * 1000.0
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn average_frame_seconds(&self) -> f32 {
        self.frame_seconds.get()
    }

    /// True on every `interval`-th frame. An interval of 0 never reports.
    pub fn should_report(&self, interval: u32) -> bool {
        interval > 0 && self.frames > 0 && self.frames % interval as u64 == 0
    }
}
