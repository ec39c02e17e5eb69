use std::{
    thread::sleep,
    time::{Duration, Instant},
};

use statsd_client::StatsdBuilder;

fn main() {
    tracing_subscriber::fmt::init();

    let client = StatsdBuilder::default()
        .with_remote_address("localhost:8125")
        .expect("failed to resolve remote address")
        .with_prefix("immediate")
        .build()
        .expect("failed to build StatsD client");

    let mut open_connections = 40.0;

    // Loop over and over, pretending to do some work. Every call below sends its own frame the
    // moment it happens.
    loop {
        let start = Instant::now();
        sleep(Duration::from_millis(250));

        client.increment("loops");
        client.timing_duration("loop_delta", start.elapsed());

        open_connections += if rand::random_bool(0.5) { 1.0 } else { -1.0 };
        client.gauge("open_connections", open_connections);
    }
}
