//! The timeout scheduler thread.
//!
//! One timer serves every outstanding transaction: it is armed for the
//! nearest deadline and rearmed after every state transition. On expiry it
//! invokes the manager's timeout handler, which expires whatever is past
//! due, dispatches, and sends a fresh rearm message back through the same
//! channel.

use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Control messages for the scheduler thread.
pub(crate) enum TimerCtl {
    /// Replace the armed deadline; `None` disarms the timer.
    Rearm(Option<Instant>),
    /// Stop the thread.
    Shutdown,
}

/// Spawn the scheduler thread. `on_fire` runs on the scheduler thread each
/// time the armed deadline passes.
pub(crate) fn spawn_scheduler(
    ctl: Receiver<TimerCtl>,
    on_fire: impl Fn() + Send + 'static,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("zw-txn-timer".to_string())
        .spawn(move || {
            let mut deadline: Option<Instant> = None;
            loop {
                let msg = match deadline {
                    Some(due) => {
                        let now = Instant::now();
                        if due <= now {
                            deadline = None;
                            on_fire();
                            continue;
                        }
                        match ctl.recv_timeout(due - now) {
                            Ok(msg) => msg,
                            Err(RecvTimeoutError::Timeout) => {
                                deadline = None;
                                on_fire();
                                continue;
                            }
                            Err(RecvTimeoutError::Disconnected) => break,
                        }
                    }
                    None => match ctl.recv() {
                        Ok(msg) => msg,
                        Err(_) => break,
                    },
                };

                match msg {
                    TimerCtl::Rearm(next) => deadline = next,
                    TimerCtl::Shutdown => break,
                }
            }
        })
        .expect("failed to spawn timeout scheduler thread")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_fires_at_deadline() {
        let (tx, rx) = unbounded();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_in_thread = Arc::clone(&fired);
        let handle = spawn_scheduler(rx, move || {
            fired_in_thread.fetch_add(1, Ordering::SeqCst);
        });

        tx.send(TimerCtl::Rearm(Some(Instant::now() + Duration::from_millis(20))))
            .unwrap();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        tx.send(TimerCtl::Shutdown).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_rearm_replaces_deadline() {
        let (tx, rx) = unbounded();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_in_thread = Arc::clone(&fired);
        let handle = spawn_scheduler(rx, move || {
            fired_in_thread.fetch_add(1, Ordering::SeqCst);
        });

        tx.send(TimerCtl::Rearm(Some(Instant::now() + Duration::from_secs(60))))
            .unwrap();
        // Pull the deadline in; the far one must not fire separately.
        tx.send(TimerCtl::Rearm(Some(Instant::now() + Duration::from_millis(20))))
            .unwrap();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        tx.send(TimerCtl::Shutdown).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_disarm() {
        let (tx, rx) = unbounded();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_in_thread = Arc::clone(&fired);
        let handle = spawn_scheduler(rx, move || {
            fired_in_thread.fetch_add(1, Ordering::SeqCst);
        });

        tx.send(TimerCtl::Rearm(Some(Instant::now() + Duration::from_millis(30))))
            .unwrap();
        tx.send(TimerCtl::Rearm(None)).unwrap();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tx.send(TimerCtl::Shutdown).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_stops_on_channel_drop() {
        let (tx, rx) = unbounded();
        let handle = spawn_scheduler(rx, || {});
        drop(tx);
        handle.join().unwrap();
    }
}
