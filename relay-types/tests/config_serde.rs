use relay_types::{BackoffConfig, RateConfig, RelayConfig};

#[test]
fn backoff_config_roundtrip() {
    let cfg = BackoffConfig {
        min_backoff_ms: 250,
        max_backoff_ms: 15_000,
        factor: 3,
        jitter_percent: 15,
    };

    let json = serde_json::to_string(&cfg).expect("serialize backoff config");
    let de: BackoffConfig = serde_json::from_str(&json).expect("deserialize backoff config");

    assert_eq!(de.min_backoff_ms, 250);
    assert_eq!(de.max_backoff_ms, 15_000);
    assert_eq!(de.factor, 3);
    assert_eq!(de.jitter_percent, 15);
}

#[test]
fn rate_config_roundtrip() {
    let cfg = RateConfig {
        default_rps: 50,
        default_max_streams: 4,
        burst_multiplier: 1.5,
        cleanup_interval: std::time::Duration::from_secs(30),
    };

    let json = serde_json::to_string(&cfg).expect("serialize rate config");
    let de: RateConfig = serde_json::from_str(&json).expect("deserialize rate config");

    assert_eq!(de.default_rps, 50);
    assert_eq!(de.default_max_streams, 4);
    assert!((de.burst_multiplier - 1.5).abs() < f64::EPSILON);
}

#[test]
fn relay_config_default_roundtrips() {
    let cfg = RelayConfig::default();
    let json = serde_json::to_string(&cfg).expect("serialize relay config");
    let de: RelayConfig = serde_json::from_str(&json).expect("deserialize relay config");

    assert_eq!(de.cache.max_orderbook_depth, cfg.cache.max_orderbook_depth);
    assert_eq!(de.rate.default_rps, cfg.rate.default_rps);
    assert_eq!(de.upstream.backoff.min_backoff_ms, 100);
}
