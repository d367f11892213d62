//! State a jail shares with the workers it constructs.

use std::sync::Arc;

use tracing::{info_span, Span};
use warden_telemetry::MetricsRecorder;

use crate::bantime::BanTimePolicy;
use crate::queue::TicketQueue;
use crate::ticket::Ticket;

/// Handed to watcher and actuator constructors. Watchers push tickets in,
/// actuators pull them out and consult the ban-time policy.
pub struct JailContext {
    name: String,
    queue: TicketQueue,
    ban_time: BanTimePolicy,
    metrics: Arc<MetricsRecorder>,
    span: Span,
}

impl JailContext {
    pub fn new(name: impl Into<String>, metrics: Arc<MetricsRecorder>) -> Self {
        let name = name.into();
        let span = info_span!("jail", name = %name);
        Self {
            name,
            queue: TicketQueue::new(),
            ban_time: BanTimePolicy::new(),
            metrics,
            span,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Used by watchers to hand over a ticket for banning.
    pub fn put_fail_ticket(&self, ticket: Ticket) {
        self.metrics.inc_tickets_enqueued(&self.name);
        self.queue.ticket_enqueue(ticket);
    }

    /// Used by actuators; `None` when nothing is pending.
    pub fn get_fail_ticket(&self) -> Option<Ticket> {
        self.queue.ticket_dequeue()
    }

    pub fn has_fail_tickets(&self) -> bool {
        self.queue.has_pending()
    }

    pub fn pending_tickets(&self) -> usize {
        self.queue.len()
    }

    pub fn ban_time_policy(&self) -> &BanTimePolicy {
        &self.ban_time
    }

    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }

    /// Parent span for everything logged on behalf of this jail.
    pub fn span(&self) -> &Span {
        &self.span
    }
}
