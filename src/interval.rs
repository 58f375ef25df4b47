use futures::{Async, Future, Poll, Stream};
use futures::sync::oneshot::{self, Receiver, Sender};
use std::time::Duration;
use tokio_timer::{Sleep, Timer, TimerError};

/// A stream representing notifications at fixed interval that can be stopped.
///
/// The stream ends when a stop is signalled or when the stopper is dropped,
/// so the owner going away cancels the ticks.
#[derive(Debug)]
pub struct Interval {
    sleep: Sleep,
    duration: Duration,
    rx: Receiver<()>,
}

/// Creates a stop channel for an interval built elsewhere (e.g. on a pool
/// thread).
pub fn stopper() -> (Sender<()>, Receiver<()>) {
    oneshot::channel()
}

/// Creates a new interval that ends once `rx` fires.
pub fn new(timer: Timer, duration: Duration, rx: Receiver<()>) -> Interval {
    Interval {
        sleep: timer.sleep(duration),
        duration: duration,
        rx: rx,
    }
}

impl Stream for Interval {
    type Item = ();
    type Error = TimerError;

    fn poll(&mut self) -> Poll<Option<()>, TimerError> {
        match self.rx.poll() {
            Ok(Async::NotReady) => {}
            // Stopped, or the stopper is gone
            _ => return Ok(Async::Ready(None)),
        }

        let _ = try_ready!(self.sleep.poll());
        // Reset the timeout
        self.sleep = self.sleep.timer().sleep(self.duration);
        Ok(Async::Ready(Some(())))
    }
}
