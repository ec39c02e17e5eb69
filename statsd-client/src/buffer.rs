use std::collections::HashMap;

use crate::writer::{LineEncoder, MetricKind, MetricValue};

enum Entry {
    /// A fully encoded protocol line, emitted at drain time as-is.
    Line(String),
    /// A coalesced counter: the running sum of every unsampled delta enqueued for `name`.
    Counter { name: String, total: i64 },
}

/// The pending measurement queue.
///
/// Entries drain in FIFO order of first enqueue. Pre-encoded lines hold their enqueue position,
/// and coalesced counters hold the position where their name first appeared, no matter how many
/// later deltas merged into them. Coalesced counters stay numeric until drain time, when they
/// are rendered into a single `name:sum|c` line.
pub(crate) struct StatBuffer {
    entries: Vec<Entry>,
    counter_slots: HashMap<String, usize>,
}

impl StatBuffer {
    pub fn new() -> Self {
        Self { entries: Vec::new(), counter_slots: HashMap::new() }
    }

    /// Appends a pre-encoded line at the tail of the queue.
    pub fn push_line(&mut self, line: String) {
        self.entries.push(Entry::Line(line));
    }

    /// Merges a counter delta into the running sum for `name`, creating the slot at the tail of
    /// the queue the first time the name is seen.
    pub fn add_counter(&mut self, name: &str, delta: i64) {
        if let Some(&idx) = self.counter_slots.get(name) {
            // Slots only ever point at counter entries.
            if let Entry::Counter { total, .. } = &mut self.entries[idx] {
                *total = total.saturating_add(delta);
            }
            return;
        }

        self.counter_slots.insert(name.to_string(), self.entries.len());
        self.entries.push(Entry::Counter { name: name.to_string(), total: delta });
    }

    /// Drains every pending entry in first-enqueue order, rendering coalesced counters through
    /// `encoder` and handing each line to `emit`.
    ///
    /// The buffer is empty once this returns.
    pub fn drain<F>(&mut self, encoder: &mut LineEncoder, mut emit: F)
    where
        F: FnMut(&str),
    {
        self.counter_slots.clear();

        for entry in self.entries.drain(..) {
            match entry {
                Entry::Line(line) => emit(&line),
                Entry::Counter { name, total } => {
                    let line = encoder.encode(
                        &name,
                        MetricValue::Integer(total),
                        MetricKind::Counter,
                        1.0,
                    );
                    emit(&line);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::StatBuffer;
    use crate::writer::LineEncoder;

    fn drained_lines(buffer: &mut StatBuffer) -> Vec<String> {
        let mut encoder = LineEncoder::new();
        let mut lines = Vec::new();
        buffer.drain(&mut encoder, |line| lines.push(line.to_string()));
        lines
    }

    #[test]
    fn counter_deltas_coalesce_into_one_line() {
        let mut buffer = StatBuffer::new();
        buffer.add_counter("test-inc", 1);
        buffer.add_counter("test-inc", 3);

        assert_eq!(drained_lines(&mut buffer), vec!["test-inc:4|c".to_string()]);
    }

    #[test]
    fn negative_deltas_participate_in_the_sum() {
        let mut buffer = StatBuffer::new();
        buffer.add_counter("test-cnt", 1);
        buffer.add_counter("test-cnt", -5);

        assert_eq!(drained_lines(&mut buffer), vec!["test-cnt:-4|c".to_string()]);
    }

    #[test]
    fn coalesced_counters_keep_first_enqueue_position() {
        let mut buffer = StatBuffer::new();
        buffer.add_counter("a", 1);
        buffer.push_line("t:3|ms".to_string());
        buffer.add_counter("b", 1);
        buffer.add_counter("a", 9);

        assert_eq!(
            drained_lines(&mut buffer),
            vec!["a:10|c".to_string(), "t:3|ms".to_string(), "b:1|c".to_string()]
        );
    }

    #[test]
    fn pushed_lines_never_coalesce() {
        let mut buffer = StatBuffer::new();
        buffer.push_line("t:3|ms".to_string());
        buffer.push_line("t:4|ms".to_string());

        assert_eq!(drained_lines(&mut buffer), vec!["t:3|ms".to_string(), "t:4|ms".to_string()]);
    }

    #[test]
    fn drain_empties_the_buffer_and_resets_slots() {
        let mut buffer = StatBuffer::new();
        buffer.add_counter("x", 2);
        buffer.push_line("t:1|ms".to_string());

        assert_eq!(drained_lines(&mut buffer).len(), 2);
        assert!(drained_lines(&mut buffer).is_empty());

        // A name seen before the drain starts over from scratch afterwards.
        buffer.add_counter("x", 7);
        assert_eq!(drained_lines(&mut buffer), vec!["x:7|c".to_string()]);
    }
}
