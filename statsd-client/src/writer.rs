const SMALLEST_VALID_LINE: &[u8] = b"a:0|c";

/// Minimum frame length that still fits at least one metric line.
pub(crate) const MIN_FRAME_LEN: usize = SMALLEST_VALID_LINE.len();

#[derive(Clone, Copy, Debug)]
pub(crate) enum MetricKind {
    Counter,
    Timing,
    Gauge,
}

impl MetricKind {
    fn suffix(self) -> &'static str {
        match self {
            MetricKind::Counter => "|c",
            MetricKind::Timing => "|ms",
            MetricKind::Gauge => "|g",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum MetricValue {
    Integer(i64),
    FloatingPoint(f64),
}

/// Formats metric values as protocol text.
///
/// Values are rendered through `itoa`/`ryu`, which always use `.` as the decimal separator and
/// never emit group separators, so the output is identical regardless of the process locale.
/// Floating-point values that are mathematically integers are rendered without a decimal point,
/// matching how aggregation servers expect whole numbers to appear.
pub(crate) struct ValueFormatter {
    int_writer: itoa::Buffer,
    float_writer: ryu::Buffer,
}

impl ValueFormatter {
    pub fn new() -> Self {
        Self { int_writer: itoa::Buffer::new(), float_writer: ryu::Buffer::new() }
    }

    pub fn format(&mut self, value: MetricValue) -> &str {
        match value {
            MetricValue::Integer(v) => self.int_writer.format(v),
            MetricValue::FloatingPoint(v) => {
                // Whole values take the integer path so `100.0` renders as `100`, not `100.0`.
                if v.fract() == 0.0 && v >= i64::MIN as f64 && v <= i64::MAX as f64 {
                    self.int_writer.format(v as i64)
                } else {
                    self.float_writer.format(v)
                }
            }
        }
    }
}

/// Renders single protocol lines of the form `name:value|type[|@rate]`.
///
/// The sample rate suffix is appended only for rates below 1: a rate of 1 (or above) means the
/// measurement was not sampled, which the protocol expresses by omitting the suffix entirely.
/// Rates at or below zero never reach the encoder, since sampling drops those measurements
/// upstream.
pub(crate) struct LineEncoder {
    formatter: ValueFormatter,
}

impl LineEncoder {
    pub fn new() -> Self {
        Self { formatter: ValueFormatter::new() }
    }

    pub fn encode(
        &mut self,
        name: &str,
        value: MetricValue,
        kind: MetricKind,
        sample_rate: f64,
    ) -> String {
        let value_str = self.formatter.format(value);

        let mut line = String::with_capacity(name.len() + value_str.len() + 16);
        line.push_str(name);
        line.push(':');
        line.push_str(value_str);
        line.push_str(kind.suffix());

        if sample_rate < 1.0 {
            line.push_str("|@");
            line.push_str(self.formatter.format(MetricValue::FloatingPoint(sample_rate)));
        }

        line
    }
}

/// Packs encoded lines into transport-sized frames.
///
/// Lines within a frame are newline-joined with no trailing newline, and a frame never exceeds
/// the configured maximum length. A frame boundary only ever falls between lines: a line that
/// cannot fit in the remainder of the current frame starts a new one, and a line that is longer
/// than the maximum length by itself is rejected outright.
///
/// All frames share one backing buffer, with offsets marking where each finalized frame ends.
/// Draining walks the offsets and hands out one subslice per frame, then resets the buffer so
/// its allocation is reused by the next flush.
pub(crate) struct FrameWriter {
    max_frame_len: usize,
    frames_buf: Vec<u8>,
    offsets: Vec<usize>,
}

impl FrameWriter {
    /// Creates a new `FrameWriter` with the given maximum frame length.
    pub fn new(max_frame_len: usize) -> Self {
        // NOTE: The builder validates this before construction, but we double check here that
        // we're getting a properly sanitized value.
        assert!(
            max_frame_len >= MIN_FRAME_LEN,
            "maximum frame length is too small to allow any metrics to be written (must be {MIN_FRAME_LEN} or greater)"
        );

        Self { max_frame_len, frames_buf: Vec::new(), offsets: Vec::new() }
    }

    fn last_offset(&self) -> usize {
        self.offsets.last().copied().unwrap_or(0)
    }

    /// Returns the number of bytes in the current, unfinalized frame.
    fn current_frame_len(&self) -> usize {
        self.frames_buf.len() - self.last_offset()
    }

    /// Finalizes the current frame and starts a new one.
    ///
    /// If the current frame is empty, this method does nothing.
    fn finalize_current_frame(&mut self) {
        if self.current_frame_len() == 0 {
            return;
        }

        self.offsets.push(self.frames_buf.len());
    }

    /// Appends a line to the current frame, starting a new frame first if the line (plus its
    /// separator) would push the current frame past the maximum length.
    ///
    /// Returns `false` if the line is longer than the maximum frame length by itself and was
    /// discarded.
    pub fn push_line(&mut self, line: &str) -> bool {
        if line.len() > self.max_frame_len {
            return false;
        }

        let current_frame_len = self.current_frame_len();
        if current_frame_len == 0 {
            self.frames_buf.extend_from_slice(line.as_bytes());
        } else if current_frame_len + 1 + line.len() > self.max_frame_len {
            self.finalize_current_frame();
            self.frames_buf.extend_from_slice(line.as_bytes());
        } else {
            self.frames_buf.push(b'\n');
            self.frames_buf.extend_from_slice(line.as_bytes());
        }

        true
    }

    /// Drains all frames, handing each one to `deliver` in write order.
    ///
    /// The writer is empty once this returns. If no lines were pushed since the last drain,
    /// `deliver` is never called: empty frames do not exist.
    pub fn drain<F>(&mut self, mut deliver: F)
    where
        F: FnMut(&[u8]),
    {
        self.finalize_current_frame();

        let mut start = 0;
        for offset in self.offsets.drain(..) {
            deliver(&self.frames_buf[start..offset]);
            start = offset;
        }

        self.frames_buf.clear();
    }
}
