use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::watch;

/// Identity of one ranged download: path, offset, size.
pub type RangeKey = (String, u64, u64);

/// Outcome of joining a flight.
pub enum Flight<'a> {
    /// This caller does the work; drop the guard when done.
    Leader(FlightGuard<'a>),
    /// Another caller already finished the same range.
    Follower,
}

/// Releases a flight on drop, waking every follower.
pub struct FlightGuard<'a> {
    gate: &'a SingleFlight,
    key: RangeKey,
    done: watch::Sender<bool>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.gate.inner.lock().unwrap().remove(&self.key);
        let _ = self.done.send(true);
    }
}

/// Collapses concurrent identical range downloads into one request:
/// the first caller becomes the leader, everyone else waits for the
/// leader to finish and then reads the cache.
#[derive(Default)]
pub struct SingleFlight {
    inner: Mutex<HashMap<RangeKey, watch::Receiver<bool>>>,
}

impl SingleFlight {
    /// An empty gate.
    pub fn new() -> SingleFlight {
        SingleFlight::default()
    }

    /// Join the flight for `key`: lead it, or wait out the current
    /// leader and return as follower.
    pub async fn join(&self, key: RangeKey) -> Flight<'_> {
        let waiter = {
            let mut inner = self.inner.lock().unwrap();
            match inner.get(&key) {
                Some(rx) => Some(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(false);
                    inner.insert(key.clone(), rx);
                    drop(inner);
                    return Flight::Leader(FlightGuard {
                        gate: self,
                        key,
                        done: tx,
                    });
                }
            }
        };
        if let Some(mut rx) = waiter {
            loop {
                if *rx.borrow_and_update() {
                    break;
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        }
        Flight::Follower
    }

    /// Number of in-flight ranges.
    pub fn in_flight(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn key() -> RangeKey {
        ("/f".to_string(), 0, 1024)
    }

    #[tokio::test]
    async fn test_first_caller_leads() {
        let gate = SingleFlight::new();
        match gate.join(key()).await {
            Flight::Leader(_) => {}
            Flight::Follower => panic!("first caller must lead"),
        };
    }

    #[tokio::test]
    async fn test_guard_drop_releases_key() {
        let gate = SingleFlight::new();
        let flight = gate.join(key()).await;
        assert_eq!(gate.in_flight(), 1);
        drop(flight);
        assert_eq!(gate.in_flight(), 0);
        assert!(matches!(gate.join(key()).await, Flight::Leader(_)));
    }

    #[tokio::test]
    async fn test_distinct_ranges_lead_independently() {
        let gate = SingleFlight::new();
        let a = gate.join(("/f".to_string(), 0, 10)).await;
        let b = gate.join(("/f".to_string(), 10, 10)).await;
        assert!(matches!(a, Flight::Leader(_)));
        assert!(matches!(b, Flight::Leader(_)));
    }

    #[tokio::test]
    async fn test_concurrent_joiners_get_one_leader() {
        let gate = Arc::new(SingleFlight::new());
        let leaders = Arc::new(AtomicU32::new(0));
        let barrier = Arc::new(tokio::sync::Barrier::new(8));
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let gate = Arc::clone(&gate);
            let leaders = Arc::clone(&leaders);
            let barrier = Arc::clone(&barrier);
            tasks.push(tokio::spawn(async move {
                barrier.wait().await;
                match gate.join(key()).await {
                    Flight::Leader(_guard) => {
                        leaders.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    }
                    Flight::Follower => {}
                }
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(leaders.load(Ordering::SeqCst), 1);
    }
}
