use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};

type Flight<V> = Shared<BoxFuture<'static, V>>;

/// Collapses concurrent requests for the same key into a single in-flight computation.
///
/// Callers arriving while a computation for `key` is running await the same future and receive
/// a clone of its output. The entry is dropped once the computation completes, so later calls
/// start a fresh one.
pub struct SingleFlight<K, V> {
    flights: Mutex<HashMap<K, (u64, Flight<V>)>>,
    generation: Mutex<u64>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            flights: Mutex::new(HashMap::new()),
            generation: Mutex::new(0),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
{
    /// Create an empty coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `make` for `key` unless a computation for the same key is already in flight.
    pub async fn run<F, Fut>(&self, key: K, make: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let (generation, flight) = {
            let mut flights = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
            match flights.get(&key) {
                Some((generation, flight)) => (*generation, flight.clone()),
                None => {
                    let generation = self.next_generation();
                    let flight = make().boxed().shared();
                    flights.insert(key.clone(), (generation, flight.clone()));
                    (generation, flight)
                }
            }
        };

        let value = flight.await;

        let mut flights = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
        if flights
            .get(&key)
            .is_some_and(|(current, _)| *current == generation)
        {
            flights.remove(&key);
        }
        value
    }

    /// Number of computations currently in flight.
    pub fn in_flight(&self) -> usize {
        self.flights
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn next_generation(&self) -> u64 {
        let mut generation = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        *generation += 1;
        *generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_callers_share_one_computation() {
        let flights = Arc::new(SingleFlight::<String, usize>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flights = flights.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                flights
                    .run("geo-101".to_string(), move || async move {
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        calls.fetch_add(1, Ordering::SeqCst) + 1
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 1);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn completed_flights_are_not_reused() {
        let flights = SingleFlight::<&'static str, u32>::new();
        let first = flights.run("key", || async { 1 }).await;
        let second = flights.run("key", || async { 2 }).await;
        assert_eq!((first, second), (1, 2));
    }
}
