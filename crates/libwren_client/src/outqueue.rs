//! Outbound queues with anti-flood pacing.
//!
//! Three FIFOs per server. A periodic tick drains at most one line, taken from the first
//! non-empty queue in priority order, and only once the anti-flood interval of that priority has
//! elapsed since the previous send. An item popped for sending is gone: a transport failure tears
//! the connection down and drops the queues with it, so a line is never sent twice.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// The pacer tick, and therefore the lower bound on outbound spacing.
pub(crate) const TICK: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// PONG, CTCP requests, lag checks.
    High,
    /// Regular user traffic.
    Normal,
    /// CTCP replies.
    Low,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct OutQueueItem {
    /// The line as produced by the engine, before any outbound modifier rewrote it. `None` when
    /// no modifier changed it.
    pub(crate) line_before_mod: Option<String>,

    /// The line that goes on the wire, `\r\n` included.
    pub(crate) line: String,

    pub(crate) modified: bool,

    pub(crate) tags: Vec<String>,
}

#[derive(Debug)]
pub(crate) struct OutQueues {
    queues: [VecDeque<OutQueueItem>; 3],
    last_send: Option<Instant>,
    anti_flood_high: Duration,
    anti_flood_low: Duration,
}

impl OutQueues {
    pub(crate) fn new(anti_flood_high_ms: u64, anti_flood_low_ms: u64) -> OutQueues {
        OutQueues {
            queues: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
            last_send: None,
            anti_flood_high: Duration::from_millis(anti_flood_high_ms),
            anti_flood_low: Duration::from_millis(anti_flood_low_ms),
        }
    }

    fn interval(&self, prio: Priority) -> Duration {
        match prio {
            Priority::High => self.anti_flood_high,
            Priority::Low => self.anti_flood_low,
            Priority::Normal => (self.anti_flood_high + self.anti_flood_low) / 2,
        }
    }

    pub(crate) fn enqueue(
        &mut self,
        prio: Priority,
        line_before_mod: Option<String>,
        line: String,
        modified: bool,
        tags: Vec<String>,
    ) {
        self.queues[prio as usize].push_back(OutQueueItem {
            line_before_mod,
            line,
            modified,
            tags,
        });
    }

    /// Pops the next line eligible for sending at `now`, or `None` when every queue is empty or
    /// the anti-flood window of the candidate's priority has not elapsed.
    pub(crate) fn pop_ready(&mut self, now: Instant) -> Option<OutQueueItem> {
        let prio = [Priority::High, Priority::Normal, Priority::Low]
            .into_iter()
            .find(|prio| !self.queues[*prio as usize].is_empty())?;

        if let Some(last_send) = self.last_send {
            if now.duration_since(last_send) < self.interval(prio) {
                return None;
            }
        }

        self.last_send = Some(now);
        self.queues[prio as usize].pop_front()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queues.iter().all(VecDeque::is_empty)
    }

    /// Drops all queued lines. Disconnection is the universal cancellation primitive.
    pub(crate) fn clear(&mut self) {
        for q in &mut self.queues {
            q.clear();
        }
        self.last_send = None;
    }

    /// Wire lines still queued, in send order. Stored in the upgrade snapshot.
    pub(crate) fn remnants(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for q in &self.queues {
            for item in q {
                lines.push(item.line.trim_end_matches("\r\n").to_owned());
            }
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enqueue_line(q: &mut OutQueues, prio: Priority, line: &str) {
        q.enqueue(prio, None, format!("{}\r\n", line), false, vec![]);
    }

    fn pop_line(q: &mut OutQueues, now: Instant) -> Option<String> {
        q.pop_ready(now)
            .map(|item| item.line.trim_end_matches("\r\n").to_owned())
    }

    #[test]
    fn priority_then_fifo_order() {
        let mut q = OutQueues::new(0, 0);
        enqueue_line(&mut q, Priority::Low, "low1");
        enqueue_line(&mut q, Priority::Normal, "norm1");
        enqueue_line(&mut q, Priority::Normal, "norm2");
        enqueue_line(&mut q, Priority::High, "high1");

        let now = Instant::now();
        assert_eq!(pop_line(&mut q, now).as_deref(), Some("high1"));
        assert_eq!(pop_line(&mut q, now).as_deref(), Some("norm1"));
        assert_eq!(pop_line(&mut q, now).as_deref(), Some("norm2"));
        assert_eq!(pop_line(&mut q, now).as_deref(), Some("low1"));
        assert_eq!(pop_line(&mut q, now), None);
    }

    #[test]
    fn anti_flood_spacing() {
        let mut q = OutQueues::new(2000, 2000);
        enqueue_line(&mut q, Priority::Normal, "one");
        enqueue_line(&mut q, Priority::Normal, "two");

        let t0 = Instant::now();
        assert_eq!(pop_line(&mut q, t0).as_deref(), Some("one"));
        // window not elapsed
        assert_eq!(pop_line(&mut q, t0 + Duration::from_millis(100)), None);
        assert_eq!(
            pop_line(&mut q, t0 + Duration::from_millis(2000)).as_deref(),
            Some("two")
        );
    }

    #[test]
    fn high_priority_waits_its_own_interval() {
        let mut q = OutQueues::new(500, 4000);
        enqueue_line(&mut q, Priority::Low, "low");

        let t0 = Instant::now();
        assert_eq!(pop_line(&mut q, t0).as_deref(), Some("low"));

        enqueue_line(&mut q, Priority::High, "high");
        assert_eq!(pop_line(&mut q, t0 + Duration::from_millis(100)), None);
        assert_eq!(
            pop_line(&mut q, t0 + Duration::from_millis(600)).as_deref(),
            Some("high")
        );
    }

    #[test]
    fn clear_drops_everything() {
        let mut q = OutQueues::new(0, 0);
        enqueue_line(&mut q, Priority::High, "x");
        enqueue_line(&mut q, Priority::Low, "y");
        assert!(!q.is_empty());
        q.clear();
        assert!(q.is_empty());
        assert_eq!(q.pop_ready(Instant::now()), None);
    }

    #[test]
    fn remnants_strip_crlf() {
        let mut q = OutQueues::new(0, 0);
        enqueue_line(&mut q, Priority::Normal, "PRIVMSG #a :hi");
        enqueue_line(&mut q, Priority::High, "PONG :x");
        assert_eq!(q.remnants(), vec!["PONG :x", "PRIVMSG #a :hi"]);
    }
}
