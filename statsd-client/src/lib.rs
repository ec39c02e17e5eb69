//! A buffering [StatsD][statsd] client with sampling, counter coalescing, and MTU-safe framing.
//!
//! [statsd]: https://github.com/statsd/statsd
//!
//! # Usage
//!
//! ```no_run
//! use statsd_client::StatsdBuilder;
//!
//! // First, create a client.
//! //
//! // The builder can configure many aspects of the client, such as changing the remote address,
//! // adjusting the maximum frame length, applying a prefix to every metric name, or swapping the
//! // counter aggregation mode.
//! let client = StatsdBuilder::default()
//!     .with_remote_address("metrics.example.com:8125")
//!     .expect("failed to resolve remote address")
//!     .build()
//!     .expect("failed to build client");
//!
//! // Report some measurements. Each call sends one frame right away...
//! client.increment("requests");
//! client.timing("db.query", 3.2);
//! client.gauge("connections.open", 17.0);
//!
//! // ...unless sends are paused, which holds everything in the pending queue and flushes it in
//! // as few frames as possible when sends resume.
//! client.pause();
//! for _ in 0..1_000 {
//!     client.increment("work.items");
//! }
//! client.resume();
//! ```
//!
//! # Features
//!
//! ## Batched emission
//!
//! Sends can be paused, which holds measurements in a pending queue instead of emitting one
//! frame per call. Resuming flushes the whole queue at once, packed into as few frames as the
//! maximum frame length allows. This turns a burst of thousands of metric calls into a handful
//! of UDP packets.
//!
//! ## Counter coalescing
//!
//! While sends are paused, repeated updates to the same counter coalesce into a single running
//! sum, so a hot counter costs one line on the wire no matter how many times it was bumped.
//! Timings and gauges always keep one line per call, preserving the per-call granularity the
//! server-side percentile math depends on. Coalescing can be switched to a strict
//! line-per-call mode at build time; see [`AggregationMode`].
//!
//! ## Sampling
//!
//! Every counter and timing call accepts a sample rate in `(0, 1]`, trading accuracy for cost on
//! hot paths. Kept measurements are annotated with `|@<rate>` so the server can scale them back
//! up.
//!
//! ## MTU-safe framing
//!
//! Flushed lines are newline-joined into frames no longer than the configured maximum (512 bytes
//! by default), and a frame boundary never splits a line. The default stays comfortably under
//! the common Ethernet MTU once UDP and IP overhead are accounted for.
//!
//! ## Swappable transport
//!
//! The client hands finished frames to a [`MetricSink`], which delivers them fire-and-forget:
//! `send` never blocks and never surfaces errors, so metric reporting cannot break or stall the
//! host application. [`UdpSink`] is installed by [`StatsdBuilder::build`]; [`NopSink`] discards
//! everything, and [`SpySink`] captures frames for inspection, which is how this crate's own
//! tests observe traffic.
//!
//! # Missing
//!
//! ## Other metric kinds
//!
//! Only counters, timings, and gauges are supported. Histograms, sets, and meters are not.
//!
//! ## Scheduled flushing
//!
//! There are no background timers: a flush happens on each call in immediate mode, or on
//! [`StatsdClient::resume`] while batching. Hosts that want periodic flushing drive
//! `pause`/`resume` from their own tick.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod builder;
pub use self::builder::{AggregationMode, BuildError, StatsdBuilder};

mod client;
pub use self::client::{StatNames, StatsdClient};

mod sink;
pub use self::sink::{MetricSink, NopSink, SpySink, UdpSink};

mod buffer;
mod sampler;
mod writer;

/// Default port that StatsD servers listen on.
pub const DEFAULT_PORT: u16 = 8125;
