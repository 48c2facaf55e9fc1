//! Stage events emitted while an update runs

use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{error, info, warn};
use tokio::sync::mpsc;

/// Pipeline stage tracking for a single update run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStage {
    Disabled,    // Core updates switched off in config
    Resolving,   // Fetching the release list and picking a release
    Matching,    // Picking the platform asset
    Fetching,    // Downloading asset bytes
    Extracting,  // Unpacking the binary into the scratch directory
    Installing,  // Replacing the installed binary
    Done,        // Binary installed
    Failed,      // Any stage failed
}

impl fmt::Display for UpdateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UpdateStage::Disabled => "disabled",
            UpdateStage::Resolving => "resolving",
            UpdateStage::Matching => "matching",
            UpdateStage::Fetching => "fetching",
            UpdateStage::Extracting => "extracting",
            UpdateStage::Installing => "installing",
            UpdateStage::Done => "done",
            UpdateStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One stage transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateEvent {
    pub stage: UpdateStage,
    pub message: String,
    pub is_error: bool,
}

impl UpdateEvent {
    pub fn new(stage: UpdateStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            is_error: false,
        }
    }

    /// Failure event; `failed_in` is kept in the message so the stage stays visible
    pub fn failed(failed_in: UpdateStage, message: impl fmt::Display) -> Self {
        Self {
            stage: UpdateStage::Failed,
            message: format!("[{failed_in}] {message}"),
            is_error: true,
        }
    }
}

impl fmt::Display for UpdateEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.stage, self.message)
    }
}

/// Receiver of update events, passed into the pipeline by the caller
pub trait EventSink: Send + Sync {
    fn emit(&self, event: UpdateEvent);
}

/// Forwards events to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: UpdateEvent) {
        match event.stage {
            UpdateStage::Failed => error!("{event}"),
            UpdateStage::Disabled => warn!("{event}"),
            _ => info!("{event}"),
        }
    }
}

/// Best-effort channel sink; stops sending once the receiver is gone
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<UpdateEvent>,
    disabled: AtomicBool,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<UpdateEvent>) -> Self {
        Self {
            tx,
            disabled: AtomicBool::new(false),
        }
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: UpdateEvent) {
        if self.disabled.load(Ordering::Relaxed) {
            return;
        }
        if let Err(e) = self.tx.try_send(event)
            && matches!(e, mpsc::error::TrySendError::Closed(_))
        {
            warn!("Event channel closed, continuing update without events");
            self.disabled.store(true, Ordering::Relaxed);
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<UpdateEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<UpdateEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn stages(&self) -> Vec<UpdateStage> {
        self.events().into_iter().map(|e| e.stage).collect()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: UpdateEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
