//! Poll lifecycle events.
//!
//! Observers receive [`PollEvent`]s through an [`EventSink`] handed to the
//! scheduler and poller. Every event is also logged at debug level.

use tokio::sync::mpsc;

use crate::domain::PollStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEvent {
    AllStart,
    Enqueue { resource_id: String },
    Start { resource_id: String },
    Fresh { resource_id: String },
    Disabled { resource_id: String },
    Status { resource_id: String, status: PollStatus },
    End { resource_id: String },
    Abort,
    AllEnd,
}

impl PollEvent {
    /// Wire name, e.g. `poll:start` or `poll:status_304`.
    pub fn name(&self) -> String {
        match self {
            Self::AllStart => "poll:allStart".to_string(),
            Self::Enqueue { .. } => "poll:enqueue".to_string(),
            Self::Start { .. } => "poll:start".to_string(),
            Self::Fresh { .. } => "poll:fresh".to_string(),
            Self::Disabled { .. } => "poll:disabled".to_string(),
            Self::Status { status, .. } => format!("poll:status_{}", status.label()),
            Self::End { .. } => "poll:end".to_string(),
            Self::Abort => "poll:abort".to_string(),
            Self::AllEnd => "poll:allEnd".to_string(),
        }
    }

    pub fn resource_id(&self) -> Option<&str> {
        match self {
            Self::Enqueue { resource_id }
            | Self::Start { resource_id }
            | Self::Fresh { resource_id }
            | Self::Disabled { resource_id }
            | Self::Status { resource_id, .. }
            | Self::End { resource_id } => Some(resource_id),
            Self::AllStart | Self::Abort | Self::AllEnd => None,
        }
    }
}

/// Where poll events go. A sink without a channel only logs.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<PollEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<PollEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PollEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn silent() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: PollEvent) {
        match event.resource_id() {
            Some(id) => tracing::debug!("{} {}", event.name(), id),
            None => tracing::debug!("{}", event.name()),
        }

        if let Some(tx) = &self.tx {
            // Observers may go away mid-sweep
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        let id = || "r1".to_string();
        assert_eq!(PollEvent::AllStart.name(), "poll:allStart");
        assert_eq!(PollEvent::Enqueue { resource_id: id() }.name(), "poll:enqueue");
        assert_eq!(
            PollEvent::Status {
                resource_id: id(),
                status: PollStatus::Http(304)
            }
            .name(),
            "poll:status_304"
        );
        assert_eq!(
            PollEvent::Status {
                resource_id: id(),
                status: PollStatus::Timeout
            }
            .name(),
            "poll:status_timeout"
        );
        assert_eq!(PollEvent::AllEnd.name(), "poll:allEnd");
        assert_eq!(PollEvent::End { resource_id: id() }.resource_id(), Some("r1"));
        assert_eq!(PollEvent::Abort.resource_id(), None);
    }

    #[test]
    fn test_sink_delivers_and_survives_dropped_receiver() {
        let (sink, mut rx) = EventSink::channel();
        sink.emit(PollEvent::AllStart);
        assert_eq!(rx.try_recv().unwrap(), PollEvent::AllStart);

        drop(rx);
        sink.emit(PollEvent::AllEnd);
        EventSink::silent().emit(PollEvent::Abort);
    }
}
