use std::net::{SocketAddr, ToSocketAddrs as _};

use thiserror::Error;

use crate::{
    client::{is_valid_name, StatsdClient},
    sink::{MetricSink, UdpSink},
    writer::MIN_FRAME_LEN,
    DEFAULT_PORT,
};

const DEFAULT_MAX_FRAME_LEN: usize = 512;

/// Errors that could occur while building a StatsD client.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Failed to parse or resolve the remote address.
    #[error("invalid remote address: {reason}")]
    InvalidRemoteAddress {
        /// Details about the resolution failure.
        reason: String,
    },

    /// The configured maximum frame length cannot fit any metric line.
    #[error("maximum frame length must be at least {min} bytes, got {given}")]
    InvalidMaxFrameLen {
        /// Smallest usable frame length.
        min: usize,

        /// The configured value.
        given: usize,
    },

    /// The configured metric name prefix is empty or contains protocol characters.
    #[error("invalid metric prefix: {reason}")]
    InvalidPrefix {
        /// Details about which rule the prefix broke.
        reason: String,
    },
}

/// Counter aggregation mode.
pub enum AggregationMode {
    /// Counter updates to the same name coalesce into a single line carrying their running sum.
    ///
    /// This mode reduces both frame sizes and the number of lines the aggregation server has to
    /// parse, which matters for hot counters that are bumped many times while sends are paused.
    /// Only unsampled updates coalesce: a counter update kept under a sample rate below 1 must
    /// carry its rate annotation, so it always goes on its own line.
    Coalescing,

    /// Every counter update produces its own line.
    ///
    /// This mode preserves the exact call sequence on the wire, at the cost of larger frames
    /// when the same counter is updated repeatedly between flushes.
    PerCall,
}

/// Builder for a [`StatsdClient`].
pub struct StatsdBuilder {
    remote_addrs: Vec<SocketAddr>,
    max_frame_len: usize,
    agg_mode: AggregationMode,
    prefix: Option<String>,
}

impl StatsdBuilder {
    /// Set the remote address to send metrics to.
    ///
    /// The address must be in the format of `<host>:<port>`, and is resolved once, eagerly, so
    /// that a bad address fails here rather than silently discarding metrics at send time.
    ///
    /// Defaults to sending to `127.0.0.1:8125` over UDP.
    ///
    /// # Errors
    ///
    /// If the given address cannot be parsed or resolved to at least one socket address, an
    /// error will be returned indicating the reason.
    pub fn with_remote_address<A>(mut self, addr: A) -> Result<Self, BuildError>
    where
        A: AsRef<str>,
    {
        let addr = addr.as_ref();
        let addrs = addr
            .to_socket_addrs()
            .map_err(|e| BuildError::InvalidRemoteAddress { reason: e.to_string() })?
            .collect::<Vec<_>>();
        if addrs.is_empty() {
            return Err(BuildError::InvalidRemoteAddress {
                reason: format!("'{addr}' resolved to no addresses"),
            });
        }

        self.remote_addrs = addrs;
        Ok(self)
    }

    /// Set the maximum frame length, in bytes.
    ///
    /// This controls the maximum size of a single frame sent to the remote server. As lines are
    /// drained from the pending queue, they are packed into frames up to this size; a line that
    /// cannot fit in a frame by itself is dropped. The default stays comfortably under the
    /// common Ethernet MTU once UDP and IP overhead are accounted for, so that frames are never
    /// fragmented on typical networks.
    ///
    /// Defaults to 512 bytes.
    #[must_use]
    pub fn with_max_frame_length(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Set the counter aggregation mode.
    ///
    /// See [`AggregationMode`] for the tradeoffs.
    ///
    /// Defaults to [`AggregationMode::Coalescing`].
    #[must_use]
    pub fn with_aggregation_mode(mut self, mode: AggregationMode) -> Self {
        self.agg_mode = mode;
        self
    }

    /// Set a prefix to apply to every metric name.
    ///
    /// The prefix is joined to each name with a `.`, so a prefix of `web` turns `requests` into
    /// `web.requests`. The prefix participates in counter coalescing like any other part of the
    /// name.
    ///
    /// No prefix is applied by default.
    #[must_use]
    pub fn with_prefix<P>(mut self, prefix: P) -> Self
    where
        P: Into<String>,
    {
        self.prefix = Some(prefix.into());
        self
    }

    /// Builds the client, sending metrics to the configured remote address over UDP.
    ///
    /// No socket is created until the first send, so building cannot fail for network reasons.
    ///
    /// # Errors
    ///
    /// If the maximum frame length is too small to fit any metric line, or if the configured
    /// prefix breaks the protocol character rules, an error will be returned.
    pub fn build(self) -> Result<StatsdClient, BuildError> {
        let sink = UdpSink::new(self.remote_addrs.clone());
        self.finish(Box::new(sink))
    }

    /// Builds the client around the given sink instead of a UDP socket.
    ///
    /// This is the injection point for custom transports and for tests, which typically pass a
    /// [`SpySink`][crate::SpySink] and assert on the frames it captures.
    ///
    /// # Errors
    ///
    /// If the maximum frame length is too small to fit any metric line, or if the configured
    /// prefix breaks the protocol character rules, an error will be returned.
    pub fn build_with_sink<S>(self, sink: S) -> Result<StatsdClient, BuildError>
    where
        S: MetricSink + Send + Sync + 'static,
    {
        self.finish(Box::new(sink))
    }

    fn finish(self, sink: Box<dyn MetricSink + Send + Sync>) -> Result<StatsdClient, BuildError> {
        if self.max_frame_len < MIN_FRAME_LEN {
            return Err(BuildError::InvalidMaxFrameLen {
                min: MIN_FRAME_LEN,
                given: self.max_frame_len,
            });
        }

        if let Some(prefix) = self.prefix.as_deref() {
            if !is_valid_name(prefix) {
                return Err(BuildError::InvalidPrefix {
                    reason: "prefix must be non-empty and free of ':', '|', and newlines"
                        .to_string(),
                });
            }
        }

        Ok(StatsdClient::new(self.prefix, self.max_frame_len, self.agg_mode, sink))
    }
}

impl Default for StatsdBuilder {
    fn default() -> Self {
        StatsdBuilder {
            remote_addrs: vec![SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT))],
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            agg_mode: AggregationMode::Coalescing,
            prefix: None,
        }
    }
}
