use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::{Arc, Mutex};
use ticketcore::domain::ports::time_service::TimeService;

/// Clock the test drives by hand. `sleep` returns immediately.
#[derive(Clone)]
pub struct ManualTimeService {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualTimeService {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) -> DateTime<Utc> {
        let mut now = self.now.lock().unwrap();
        *now = *now + by;
        *now
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap() = at;
    }
}

#[async_trait]
impl TimeService for ManualTimeService {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    async fn sleep(&self, _duration: std::time::Duration) {
        tokio::task::yield_now().await;
    }
}

/// Fixed starting instant so deadlines in assertions are exact
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap()
}
