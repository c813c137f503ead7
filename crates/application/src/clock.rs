use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use domain::Timestamp;

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// 系统时钟，进程内保证返回值单调不减
#[derive(Debug, Default)]
pub struct SystemClock {
    last_micros: AtomicI64,
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let wall = Utc::now().timestamp_micros();
        let previous = self.last_micros.fetch_max(wall, Ordering::AcqRel);
        let micros = previous.max(wall);
        DateTime::from_timestamp_micros(micros).unwrap_or_else(Utc::now)
    }
}
