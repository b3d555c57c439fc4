//! Async driver for an [`Engine`]
//!
//! [`spawn`] moves the engine into one tokio task that owns it exclusively.
//! Host events and commands arrive over a bounded channel; between messages
//! the task sleeps until the engine's next deadline and ticks it. Shutdown
//! drains whatever is still in the channel, then flushes the queue.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::collector::QueueStats;
use crate::engine::{Command, Engine, HostEvent};
use crate::error::{Error, Result};

/// Channel capacity between the host and the engine task
const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug)]
enum Message {
    Host(HostEvent),
    Command(Command),
    Flush,
    Shutdown,
}

/// Host side of a running engine
#[derive(Debug)]
pub struct EngineHandle {
    tx: mpsc::Sender<Message>,
    join: JoinHandle<QueueStats>,
}

/// Start `engine` on the current tokio runtime
///
/// The engine is started inside the task.
pub fn spawn(engine: Engine) -> EngineHandle {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let join = tokio::spawn(run(engine, rx));
    tracing::debug!(capacity = CHANNEL_CAPACITY, "Engine task started");
    EngineHandle { tx, join }
}

impl EngineHandle {
    /// Forward a host event without waiting; fails when the channel is full
    pub fn send(&self, event: HostEvent) -> Result<()> {
        self.try_send(Message::Host(event))
    }

    /// Forward a public API command without waiting
    pub fn command(&self, command: Command) -> Result<()> {
        self.try_send(Message::Command(command))
    }

    /// Ask the engine to deliver pending events
    pub fn flush(&self) -> Result<()> {
        self.try_send(Message::Flush)
    }

    /// Stop the engine, deliver what is pending and return delivery stats
    pub async fn shutdown(self) -> Result<QueueStats> {
        self.tx
            .send(Message::Shutdown)
            .await
            .map_err(|_| Error::Runtime("engine task already stopped".to_string()))?;

        self.join
            .await
            .map_err(|e| Error::Runtime(format!("engine task panicked: {}", e)))
    }

    fn try_send(&self, message: Message) -> Result<()> {
        self.tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::Runtime("engine channel full".to_string()),
            mpsc::error::TrySendError::Closed(_) => {
                Error::Runtime("engine task already stopped".to_string())
            }
        })
    }
}

async fn run(mut engine: Engine, mut rx: mpsc::Receiver<Message>) -> QueueStats {
    engine.start();

    loop {
        let wake_at = engine.next_deadline().map(|deadline| {
            let wait = (deadline - engine.now()).to_std().unwrap_or_default();
            Instant::now() + wait
        });

        tokio::select! {
            biased;

            message = rx.recv() => match message {
                Some(Message::Host(event)) => engine.handle(event),
                Some(Message::Command(command)) => engine.command(command),
                Some(Message::Flush) => engine.flush(),
                Some(Message::Shutdown) | None => break,
            },
            _ = sleep_until(wake_at) => engine.tick(),
        }
    }

    rx.close();
    while let Ok(message) = rx.try_recv() {
        match message {
            Message::Host(event) => engine.handle(event),
            Message::Command(command) => engine.command(command),
            Message::Flush | Message::Shutdown => {}
        }
    }

    engine.shutdown()
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
