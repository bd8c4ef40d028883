//! Trailing-edge debouncing.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Collapses bursts of values into the last one, emitted once no new value
/// has arrived for `delay`.
///
/// Must be created inside a Tokio runtime. Dropping the debouncer discards
/// any value still waiting.
pub struct Debouncer<T> {
    sender: mpsc::UnboundedSender<T>,
    task: JoinHandle<()>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new<F>(delay: Duration, on_settle: F) -> Self
    where
        F: Fn(T) + Send + 'static,
    {
        let (sender, mut receiver) = mpsc::unbounded_channel::<T>();
        let task = tokio::spawn(async move {
            while let Some(mut pending) = receiver.recv().await {
                loop {
                    tokio::select! {
                        next = receiver.recv() => match next {
                            Some(value) => pending = value,
                            None => return,
                        },
                        () = tokio::time::sleep(delay) => {
                            on_settle(pending);
                            break;
                        }
                    }
                }
            }
        });
        Self { sender, task }
    }

    /// Queue `value`, restarting the quiet period.
    pub fn push(&self, value: T) -> bool {
        self.sender.send(value).is_ok()
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(String) + Send + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |value| sink.lock().unwrap().push(value))
    }

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_to_last_value() {
        let (seen, sink) = recorder();
        let debouncer = Debouncer::new(Duration::from_millis(500), sink);

        for term in ["c", "co", "cof", "coff", "coffee"] {
            debouncer.push(term.to_string());
            tokio::time::sleep(Duration::from_millis(60)).await;
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(seen.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(*seen.lock().unwrap(), vec!["coffee".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn separate_bursts_emit_separately() {
        let (seen, sink) = recorder();
        let debouncer = Debouncer::new(Duration::from_millis(100), sink);

        debouncer.push("rent".to_string());
        tokio::time::sleep(Duration::from_millis(150)).await;
        debouncer.push("food".to_string());
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["rent".to_string(), "food".to_string()]
        );
    }
}
