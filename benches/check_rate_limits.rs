use criterion::{Criterion, criterion_group, criterion_main};

use std::hint::black_box;

use peermit::{
    Behavior, CheckRateLimitsRequest, Daemon, DaemonConfig, PeerInfo, RateLimitRequest,
};

fn daemon_config() -> DaemonConfig {
    DaemonConfig {
        http_address: "127.0.0.1:0".to_string(),
        ..DaemonConfig::default()
    }
}

fn request(key: &str, algorithm: i32) -> CheckRateLimitsRequest {
    CheckRateLimitsRequest {
        requests: vec![RateLimitRequest {
            name: "bench".to_string(),
            unique_key: key.to_string(),
            hits: 1,
            limit: u32::MAX as i64,
            duration: 60_000,
            algorithm,
            ..Default::default()
        }],
    }
}

fn bench_hot_key(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let (daemon, client) = runtime.block_on(async {
        let daemon = Daemon::spawn(daemon_config()).await.expect("spawn daemon");
        daemon
            .set_peers(vec![PeerInfo {
                address: daemon.listen_addr().to_string(),
                ..PeerInfo::default()
            }])
            .expect("set peers");
        let client = daemon.client().expect("client");
        (daemon, client)
    });

    let mut group = c.benchmark_group("check_rate_limits/hot_key");
    group.sample_size(100);

    for (label, algorithm) in [("token_bucket", 0), ("leaky_bucket", 1)] {
        group.bench_function(label, |b| {
            let req = request(label, algorithm);
            b.iter(|| {
                let response = runtime
                    .block_on(client.check_rate_limits(black_box(&req)))
                    .expect("check");
                black_box(response);
            });
        });
    }
    group.finish();

    runtime.block_on(daemon.close());
}

fn bench_batch(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let (daemon, client) = runtime.block_on(async {
        let daemon = Daemon::spawn(daemon_config()).await.expect("spawn daemon");
        daemon
            .set_peers(vec![PeerInfo {
                address: daemon.listen_addr().to_string(),
                ..PeerInfo::default()
            }])
            .expect("set peers");
        let client = daemon.client().expect("client");
        (daemon, client)
    });

    let mut group = c.benchmark_group("check_rate_limits/batch");
    group.sample_size(50);

    for batch_size in [10usize, 100] {
        group.bench_function(format!("lines={batch_size}"), |b| {
            let req = CheckRateLimitsRequest {
                requests: (0..batch_size)
                    .map(|i| RateLimitRequest {
                        name: "bench_batch".to_string(),
                        unique_key: format!("account:{i}"),
                        hits: 1,
                        limit: u32::MAX as i64,
                        duration: 60_000,
                        behavior: Behavior::BATCHING.as_wire(),
                        ..Default::default()
                    })
                    .collect(),
            };
            b.iter(|| {
                let response = runtime
                    .block_on(client.check_rate_limits(black_box(&req)))
                    .expect("check");
                black_box(response);
            });
        });
    }
    group.finish();

    runtime.block_on(daemon.close());
}

criterion_group!(benches, bench_hot_key, bench_batch);
criterion_main!(benches);
