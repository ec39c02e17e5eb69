use std::{
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tracing::error;

use crate::{
    buffer::StatBuffer,
    builder::AggregationMode,
    sampler,
    sink::MetricSink,
    writer::{FrameWriter, LineEncoder, MetricKind, MetricValue},
};

/// One metric name, or a collection of them.
///
/// Counter operations accept either a single name or a batch of names that all receive the same
/// delta and sample rate. Implementations are provided for `&str`, `&String`, slices, arrays,
/// and `&Vec<_>` of anything string-like.
pub trait StatNames {
    /// Visits each name in order.
    fn for_each<F: FnMut(&str)>(self, visit: F);
}

impl StatNames for &str {
    fn for_each<F: FnMut(&str)>(self, mut visit: F) {
        visit(self);
    }
}

impl StatNames for &String {
    fn for_each<F: FnMut(&str)>(self, mut visit: F) {
        visit(self);
    }
}

impl<T: AsRef<str>> StatNames for &[T] {
    fn for_each<F: FnMut(&str)>(self, mut visit: F) {
        for name in self {
            visit(name.as_ref());
        }
    }
}

impl<T: AsRef<str>, const N: usize> StatNames for [T; N] {
    fn for_each<F: FnMut(&str)>(self, mut visit: F) {
        for name in &self {
            visit(name.as_ref());
        }
    }
}

impl<T: AsRef<str>> StatNames for &Vec<T> {
    fn for_each<F: FnMut(&str)>(self, mut visit: F) {
        for name in self {
            visit(name.as_ref());
        }
    }
}

/// Returns `true` if `name` is usable on the wire: non-empty and free of the characters that
/// would corrupt line or frame structure.
pub(crate) fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !name.bytes().any(|b| b == b':' || b == b'|' || b == b'\n')
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum FlushMode {
    Immediate,
    Paused,
}

struct Pipeline {
    mode: FlushMode,
    buffer: StatBuffer,
    encoder: LineEncoder,
    writer: FrameWriter,
}

/// A buffering StatsD client.
///
/// The client turns measurement calls into protocol lines, holds them in a pending queue, and
/// hands them to a [`MetricSink`][crate::MetricSink] as newline-joined frames capped at the
/// configured maximum length. Every metric call flushes the queue immediately unless sends are
/// paused, in which case measurements accumulate (with same-name counters coalescing into a
/// running sum, under the default aggregation mode) until [`resume`][Self::resume] drains them
/// in one batch.
///
/// All methods take `&self`: the pending queue and mode flag live behind a single internal lock,
/// so a client shared between threads (for example through an `Arc`) serializes enqueues,
/// drains, and mode changes against each other.
///
/// Transport failures never surface to callers. Dropping frames is the failure mode the wire
/// protocol was designed around, and metric reporting must never break the host application.
pub struct StatsdClient {
    prefix: Option<String>,
    agg_mode: AggregationMode,
    pipeline: Mutex<Pipeline>,
    sink: Box<dyn MetricSink + Send + Sync>,
}

impl StatsdClient {
    pub(crate) fn new(
        prefix: Option<String>,
        max_frame_len: usize,
        agg_mode: AggregationMode,
        sink: Box<dyn MetricSink + Send + Sync>,
    ) -> Self {
        StatsdClient {
            prefix,
            agg_mode,
            pipeline: Mutex::new(Pipeline {
                mode: FlushMode::Immediate,
                buffer: StatBuffer::new(),
                encoder: LineEncoder::new(),
                writer: FrameWriter::new(max_frame_len),
            }),
            sink,
        }
    }

    /// Increments each of the given counters by 1.
    pub fn increment<N: StatNames>(&self, names: N) {
        self.update_counters(names, 1, 1.0);
    }

    /// Decrements each of the given counters by 1.
    pub fn decrement<N: StatNames>(&self, names: N) {
        self.update_counters(names, -1, 1.0);
    }

    /// Applies `delta` to each of the given counters.
    ///
    /// Every name draws its own sampling decision at `sample_rate`: rates at or above 1 keep
    /// every measurement, rates at or below zero keep none, and anything in between keeps a
    /// measurement with probability equal to the rate. Measurements kept under a rate below 1
    /// are annotated with `|@<rate>` on the wire so the server can scale them back up, and they
    /// never coalesce with unsampled updates to the same name.
    ///
    /// Names must be non-empty and free of `:`, `|`, and newlines; an offending name is dropped
    /// with a diagnostic rather than surfaced as an error.
    pub fn update_counters<N: StatNames>(&self, names: N, delta: i64, sample_rate: f64) {
        let mut pipeline = self.lock_pipeline();

        names.for_each(|name| {
            if !is_valid_name(name) {
                error!(stat = name, "Invalid metric name; dropping measurement.");
                return;
            }

            if !sampler::sample(sample_rate) {
                return;
            }

            let name = self.full_name(name);
            if sample_rate < 1.0 {
                // A sampled delta carries its rate annotation, so it stays on its own line.
                let line = pipeline.encoder.encode(
                    &name,
                    MetricValue::Integer(delta),
                    MetricKind::Counter,
                    sample_rate,
                );
                pipeline.buffer.push_line(line);
            } else {
                match self.agg_mode {
                    AggregationMode::Coalescing => pipeline.buffer.add_counter(&name, delta),
                    AggregationMode::PerCall => {
                        let line = pipeline.encoder.encode(
                            &name,
                            MetricValue::Integer(delta),
                            MetricKind::Counter,
                            1.0,
                        );
                        pipeline.buffer.push_line(line);
                    }
                }
            }
        });

        self.flush_if_immediate(&mut pipeline);
    }

    /// Records a timing measurement, in milliseconds.
    pub fn timing(&self, name: &str, elapsed_ms: f64) {
        self.timing_sampled(name, elapsed_ms, 1.0);
    }

    /// Records a timing measurement, in milliseconds, sampled at `sample_rate`.
    ///
    /// Sampling behaves as described on [`update_counters`][Self::update_counters]. Timing
    /// measurements never coalesce: every kept call produces its own line, preserving per-call
    /// granularity for the server-side percentile math.
    pub fn timing_sampled(&self, name: &str, elapsed_ms: f64, sample_rate: f64) {
        self.push_value(name, MetricValue::FloatingPoint(elapsed_ms), MetricKind::Timing, sample_rate);
    }

    /// Records a timing measurement from an elapsed [`Duration`].
    ///
    /// The duration is converted to fractional milliseconds, which is the unit the wire format
    /// expects for timings.
    pub fn timing_duration(&self, name: &str, elapsed: Duration) {
        self.timing(name, elapsed.as_secs_f64() * 1000.0);
    }

    /// Records the instantaneous value of a gauge.
    ///
    /// Non-finite values and invalid names are dropped with a diagnostic rather than surfaced
    /// as errors.
    pub fn gauge(&self, name: &str, value: f64) {
        self.push_value(name, MetricValue::FloatingPoint(value), MetricKind::Gauge, 1.0);
    }

    /// Pauses immediate sends.
    ///
    /// While paused, metric calls only accumulate in the pending queue; nothing reaches the
    /// sink until [`resume`][Self::resume] is called. Pausing an already-paused client does
    /// nothing, and pausing never disturbs queue contents.
    pub fn pause(&self) {
        let mut pipeline = self.lock_pipeline();
        pipeline.mode = FlushMode::Paused;
    }

    /// Resumes immediate sends, flushing everything queued while paused.
    ///
    /// The flush happens unconditionally, but an empty queue produces no frames: resuming a
    /// client that buffered nothing sends nothing. Resuming an already-resumed client is
    /// harmless for the same reason.
    pub fn resume(&self) {
        let mut pipeline = self.lock_pipeline();
        pipeline.mode = FlushMode::Immediate;
        self.flush(&mut pipeline);
    }

    fn lock_pipeline(&self) -> MutexGuard<'_, Pipeline> {
        self.pipeline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn full_name(&self, name: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}.{name}"),
            None => name.to_string(),
        }
    }

    /// Validates, samples, encodes, and enqueues one non-counter measurement, then flushes if
    /// the client is in immediate mode.
    fn push_value(&self, name: &str, value: MetricValue, kind: MetricKind, sample_rate: f64) {
        if !is_valid_name(name) {
            error!(stat = name, "Invalid metric name; dropping measurement.");
            return;
        }

        if let MetricValue::FloatingPoint(v) = value {
            if !v.is_finite() {
                error!(stat = name, value = v, "Non-finite metric value; dropping measurement.");
                return;
            }
        }

        if !sampler::sample(sample_rate) {
            return;
        }

        let mut pipeline = self.lock_pipeline();
        let name = self.full_name(name);
        let line = pipeline.encoder.encode(&name, value, kind, sample_rate);
        pipeline.buffer.push_line(line);
        self.flush_if_immediate(&mut pipeline);
    }

    fn flush_if_immediate(&self, pipeline: &mut Pipeline) {
        if pipeline.mode == FlushMode::Immediate {
            self.flush(pipeline);
        }
    }

    /// Drains the pending queue into frames and hands each frame to the sink.
    ///
    /// Lines too long to fit in any frame are dropped and counted; everything else is packed
    /// preserving order, with frame boundaries only ever falling between lines.
    fn flush(&self, pipeline: &mut Pipeline) {
        let Pipeline { buffer, encoder, writer, .. } = pipeline;

        let mut lines_dropped = 0usize;
        buffer.drain(encoder, |line| {
            if !writer.push_line(line) {
                lines_dropped += 1;
            }
        });

        if lines_dropped > 0 {
            error!(lines_dropped, "Metric lines longer than the maximum frame length; dropping.");
        }

        writer.drain(|frame| self.sink.send(frame));
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crossbeam_channel::Receiver;

    use crate::{
        builder::{AggregationMode, StatsdBuilder},
        sink::SpySink,
    };

    use super::StatsdClient;

    fn spy_client() -> (Receiver<Vec<u8>>, StatsdClient) {
        spy_client_with(StatsdBuilder::default())
    }

    fn spy_client_with(builder: StatsdBuilder) -> (Receiver<Vec<u8>>, StatsdClient) {
        let (rx, sink) = SpySink::new();
        let client = builder.build_with_sink(sink).unwrap();
        (rx, client)
    }

    fn frames(rx: &Receiver<Vec<u8>>) -> Vec<String> {
        rx.try_iter().map(|frame| String::from_utf8(frame).unwrap()).collect()
    }

    #[test]
    fn increment_sends_one_line_immediately() {
        let (rx, client) = spy_client();
        client.increment("test-inc");

        assert_eq!(frames(&rx), vec!["test-inc:1|c".to_string()]);
    }

    #[test]
    fn decrement_sends_negative_delta() {
        let (rx, client) = spy_client();
        client.decrement("test-dec");

        assert_eq!(frames(&rx), vec!["test-dec:-1|c".to_string()]);
    }

    #[test]
    fn update_counters_applies_delta() {
        let (rx, client) = spy_client();
        client.update_counters("test-cnt", -9, 1.0);

        assert_eq!(frames(&rx), vec!["test-cnt:-9|c".to_string()]);
    }

    #[test]
    fn timings_and_gauges_carry_their_kinds() {
        let (rx, client) = spy_client();
        client.timing("test-tim", 100.0);
        client.gauge("test-gag", 345.0);

        assert_eq!(
            frames(&rx),
            vec!["test-tim:100|ms".to_string(), "test-gag:345|g".to_string()]
        );
    }

    #[test]
    fn fractional_values_keep_the_dot_separator() {
        let (rx, client) = spy_client();
        client.timing("test", 9.01);
        client.gauge("test", 42.5);

        assert_eq!(frames(&rx), vec!["test:9.01|ms".to_string(), "test:42.5|g".to_string()]);
    }

    #[test]
    fn timing_duration_converts_to_milliseconds() {
        let (rx, client) = spy_client();
        client.timing_duration("test", Duration::from_millis(1500));

        assert_eq!(frames(&rx), vec!["test:1500|ms".to_string()]);
    }

    #[test]
    fn zero_sample_rate_emits_nothing() {
        let (rx, client) = spy_client();
        for _ in 0..10 {
            client.update_counters("test-inc", 1, 0.0);
            client.timing_sampled("test-tim", 5.0, 0.0);
        }
        client.update_counters("test-dec", -1, -3.0);

        assert!(frames(&rx).is_empty());
    }

    #[test]
    fn rates_above_one_behave_like_one() {
        let (rx, client) = spy_client();
        client.update_counters("test", 1, 5.0);

        assert_eq!(frames(&rx), vec!["test:1|c".to_string()]);
    }

    #[test]
    fn multi_name_updates_share_one_frame() {
        let (rx, client) = spy_client();
        client.update_counters(["test-a", "test-b"], 1, 1.0);

        assert_eq!(frames(&rx), vec!["test-a:1|c\ntest-b:1|c".to_string()]);
    }

    #[test]
    fn string_collections_are_accepted() {
        let (rx, client) = spy_client();

        let owned = vec!["test-a".to_string(), "test-b".to_string()];
        client.increment(&owned);

        let slice: &[&str] = &["test-c", "test-d"];
        client.increment(slice);

        let single = "test-e".to_string();
        client.increment(&single);

        assert_eq!(
            frames(&rx),
            vec![
                "test-a:1|c\ntest-b:1|c".to_string(),
                "test-c:1|c\ntest-d:1|c".to_string(),
                "test-e:1|c".to_string(),
            ]
        );
    }

    #[test]
    fn empty_name_collection_is_a_noop() {
        let (rx, client) = spy_client();
        let none: &[&str] = &[];
        client.update_counters(none, 1, 1.0);

        assert!(frames(&rx).is_empty());
    }

    #[test]
    fn pause_defers_and_resume_flushes() {
        let (rx, client) = spy_client();
        client.pause();
        client.increment("test-a");
        client.increment("test-b");
        assert!(frames(&rx).is_empty());

        client.resume();
        assert_eq!(frames(&rx), vec!["test-a:1|c\ntest-b:1|c".to_string()]);
    }

    #[test]
    fn paused_counters_coalesce_by_name() {
        let (rx, client) = spy_client();
        client.pause();
        client.increment("test-inc");
        client.update_counters("test-inc", 3, 1.0);
        client.resume();

        assert_eq!(frames(&rx), vec!["test-inc:4|c".to_string()]);
    }

    #[test]
    fn per_call_mode_keeps_discrete_lines() {
        let builder = StatsdBuilder::default().with_aggregation_mode(AggregationMode::PerCall);
        let (rx, client) = spy_client_with(builder);
        client.pause();
        client.increment("test-inc");
        client.update_counters("test-inc", 3, 1.0);
        client.resume();

        assert_eq!(frames(&rx), vec!["test-inc:1|c\ntest-inc:3|c".to_string()]);
    }

    #[test]
    fn timings_never_coalesce() {
        let (rx, client) = spy_client();
        client.pause();
        client.timing("test-tim", 3.0);
        client.timing("test-tim", 4.0);
        client.resume();

        assert_eq!(frames(&rx), vec!["test-tim:3|ms\ntest-tim:4|ms".to_string()]);
    }

    #[test]
    fn coalesced_counters_keep_first_enqueue_position() {
        let (rx, client) = spy_client();
        client.pause();
        client.increment("test-a");
        client.timing("test-tim", 5.0);
        client.increment("test-a");
        client.resume();

        assert_eq!(frames(&rx), vec!["test-a:2|c\ntest-tim:5|ms".to_string()]);
    }

    #[test]
    fn resume_with_empty_queue_sends_nothing() {
        let (rx, client) = spy_client();
        client.pause();
        client.resume();

        assert!(frames(&rx).is_empty());
    }

    #[test]
    fn resume_restores_immediate_sends() {
        let (rx, client) = spy_client();
        client.pause();
        client.resume();
        client.increment("test-a");

        assert_eq!(frames(&rx), vec!["test-a:1|c".to_string()]);
    }

    #[test]
    fn pause_and_resume_are_idempotent() {
        let (rx, client) = spy_client();
        client.pause();
        client.pause();
        client.increment("test-a");
        client.resume();
        client.resume();

        assert_eq!(frames(&rx), vec!["test-a:1|c".to_string()]);
    }

    #[test]
    fn hundred_counters_pack_into_bounded_frames() {
        let (rx, client) = spy_client();
        client.pause();
        for i in 0..100 {
            let name = format!("counter.{i}");
            client.increment(&name);
        }
        client.resume();

        let emitted = frames(&rx);
        assert!(emitted.len() > 1);

        let mut lines = Vec::new();
        for frame in &emitted {
            assert!(frame.len() <= 512);
            for line in frame.split('\n') {
                lines.push(line.to_string());
            }
        }

        assert_eq!(lines.len(), 100);
        for (i, line) in lines.iter().enumerate() {
            assert_eq!(line, &format!("counter.{i}:1|c"));
        }
    }

    #[test]
    fn invalid_names_are_dropped() {
        let (rx, client) = spy_client();
        client.increment("");
        client.increment("bad:name");
        client.increment("bad|name");
        client.gauge("bad\nname", 1.0);
        client.timing("bad:name", 3.0);

        assert!(frames(&rx).is_empty());
    }

    #[test]
    fn nonfinite_values_are_dropped() {
        let (rx, client) = spy_client();
        client.timing("test", f64::NAN);
        client.timing("test", f64::INFINITY);
        client.gauge("test", f64::NEG_INFINITY);

        assert!(frames(&rx).is_empty());
    }

    #[test]
    fn prefix_applies_to_every_name() {
        let builder = StatsdBuilder::default().with_prefix("my.app");
        let (rx, client) = spy_client_with(builder);
        client.increment("test-inc");

        client.pause();
        client.increment("test-cnt");
        client.increment("test-cnt");
        client.resume();

        assert_eq!(
            frames(&rx),
            vec!["my.app.test-inc:1|c".to_string(), "my.app.test-cnt:2|c".to_string()]
        );
    }

    #[test]
    fn sampled_counters_annotate_their_rate() {
        let (rx, client) = spy_client();
        client.pause();
        let trials = 1000;
        for _ in 0..trials {
            client.update_counters("test", 1, 0.99999);
        }
        client.resume();

        let mut kept = 0;
        for frame in frames(&rx) {
            for line in frame.split('\n') {
                assert_eq!(line, "test:1|c|@0.99999");
                kept += 1;
            }
        }

        // Binomial(1000, 0.99999) dipping below 900 is beyond unlikely.
        assert!(kept >= 900, "kept {kept} of {trials}");
        assert!(kept <= trials);
    }

    #[test]
    fn concurrent_updates_are_serialized() {
        let (rx, client) = spy_client();
        client.pause();

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..100 {
                        client.increment("test-inc");
                    }
                });
            }
        });

        client.resume();
        assert_eq!(frames(&rx), vec!["test-inc:400|c".to_string()]);
    }
}
