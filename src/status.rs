use std::{
    fmt,
    sync::{
        mpsc::{self, Receiver, Sender},
        Arc, Mutex,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCategory {
    Detected,
    Disabled,
    Restored,
    Failed,
    Idle,
}

impl StatusCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Detected => "detected",
            Self::Disabled => "disabled",
            Self::Restored => "restored",
            Self::Failed => "failed",
            Self::Idle => "idle",
        }
    }
}

impl fmt::Display for StatusCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub category: StatusCategory,
    /// Set on per-display outcomes, absent on state transitions.
    pub display: Option<String>,
    pub message: String,
}

impl StatusEvent {
    pub fn transition(category: StatusCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            display: None,
            message: message.into(),
        }
    }

    pub fn for_display(category: StatusCategory, display: &str, message: impl Into<String>) -> Self {
        Self {
            category,
            display: Some(display.to_string()),
            message: message.into(),
        }
    }
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

/// Fan-out of status events to any number of observers. Observers that hang
/// up are dropped on the next emit.
#[derive(Debug, Clone, Default)]
pub struct StatusBus {
    subscribers: Arc<Mutex<Vec<Sender<StatusEvent>>>>,
}

impl StatusBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<StatusEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    pub fn emit(&self, event: StatusEvent) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
