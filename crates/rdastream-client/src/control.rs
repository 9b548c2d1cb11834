use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

/// Commands accepted by a running streaming worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlCommand {
    /// Leave the receive loop.
    Stop,
    /// Write the arrival time log to the configured path.
    SaveTimelog,
}

impl ControlCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            ControlCommand::Stop => "stop",
            ControlCommand::SaveTimelog => "save_timelog",
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The worker's end of the control channel was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("control channel disconnected")]
pub struct ControlDisconnected;

/// Sending half of a control channel. Cloneable; the worker holds a clone so
/// it can enqueue commands to itself.
#[derive(Debug, Clone)]
pub struct ControlSender {
    tx: mpsc::Sender<ControlCommand>,
    stop_queued: Arc<AtomicBool>,
}

/// Receiving half, owned by the worker.
#[derive(Debug)]
pub struct ControlReceiver {
    rx: mpsc::Receiver<ControlCommand>,
    stop_queued: Arc<AtomicBool>,
}

/// Create a one-directional, unbounded command channel.
pub fn control_channel() -> (ControlSender, ControlReceiver) {
    let (tx, rx) = mpsc::channel();
    let stop_queued = Arc::new(AtomicBool::new(false));
    (
        ControlSender {
            tx,
            stop_queued: Arc::clone(&stop_queued),
        },
        ControlReceiver { rx, stop_queued },
    )
}

impl ControlSender {
    /// Queue a command. Never blocks.
    ///
    /// A queued Stop is also flagged so a worker blocked inside a frame can
    /// notice it without draining the queue.
    pub fn send(&self, command: ControlCommand) -> Result<(), ControlDisconnected> {
        self.tx.send(command).map_err(|_| ControlDisconnected)?;
        if command == ControlCommand::Stop {
            self.stop_queued.store(true, Ordering::Release);
        }
        Ok(())
    }
}

impl ControlReceiver {
    /// Next queued command, without waiting.
    ///
    /// `Ok(None)` when the queue is empty. Disconnection is only reported
    /// once the queue has been drained.
    pub fn try_recv(&self) -> Result<Option<ControlCommand>, ControlDisconnected> {
        match self.rx.try_recv() {
            Ok(command) => Ok(Some(command)),
            Err(mpsc::TryRecvError::Empty) => Ok(None),
            Err(mpsc::TryRecvError::Disconnected) => Err(ControlDisconnected),
        }
    }

    /// Closure reporting whether a Stop has been sent on this channel.
    ///
    /// The flag is never cleared; a channel carries a single session.
    pub fn stop_signal(&self) -> impl Fn() -> bool + Send + 'static {
        let flag = Arc::clone(&self.stop_queued);
        move || flag.load(Ordering::Acquire)
    }
}
