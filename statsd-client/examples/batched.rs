use std::{thread::sleep, time::Duration};

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;
use statsd_client::StatsdBuilder;

fn main() {
    tracing_subscriber::fmt::init();

    let client = StatsdBuilder::default()
        .with_remote_address("localhost:8125")
        .expect("failed to resolve remote address")
        .with_prefix("batched")
        .build()
        .expect("failed to build StatsD client");

    let mut rng = Xoshiro256StarStar::try_from_rng(&mut rand::rng()).unwrap();

    // Process work in bursts, holding sends during each burst so the whole batch leaves in a
    // handful of packets instead of one per call. The repeated `items` bumps coalesce into a
    // single line per flush.
    loop {
        client.pause();
        for _ in 0..250 {
            client.increment("items");
            client.timing("item_delta_ms", rng.random_range(0.5..5.0));
            if rng.random_bool(0.01) {
                client.increment("items_failed");
            }
        }
        client.resume();

        sleep(Duration::from_secs(1));
    }
}
