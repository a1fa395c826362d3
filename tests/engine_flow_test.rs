// End-to-end flow: raw feed JSON through the parser into the engine,
// observing published snapshots. No network involved.

use std::sync::{Arc, Mutex};

use market_pulse::core::config::{EngineConfig, ScorePolicyKind};
use market_pulse::layer2::parser::{MessageParser, ParseError, ParsedMessage};
use market_pulse::{EngineState, PulseEngine, Regime, Signal};

const T0_MS: u64 = 1_700_000_000_000;

fn trade_json(id: i64, price: f64, qty: f64, buyer_initiated: bool, ts_ms: u64) -> String {
    // aggTrade's "m" flag marks the buyer as maker, i.e. seller-initiated
    format!(
        r#"{{"e":"aggTrade","E":{ts},"s":"BTCUSDT","a":{id},"p":"{price}","q":"{qty}","f":{id},"l":{id},"T":{ts},"m":{maker}}}"#,
        ts = ts_ms,
        id = id,
        price = price,
        qty = qty,
        maker = !buyer_initiated,
    )
}

fn depth_json(bids: &[(f64, f64)], asks: &[(f64, f64)]) -> String {
    let levels = |side: &[(f64, f64)]| {
        side.iter()
            .map(|(p, q)| format!(r#"["{}","{}"]"#, p, q))
            .collect::<Vec<_>>()
            .join(",")
    };
    format!(
        r#"{{"e":"depthUpdate","E":{ts},"s":"BTCUSDT","U":1,"u":2,"b":[{b}],"a":[{a}]}}"#,
        ts = T0_MS,
        b = levels(bids),
        a = levels(asks),
    )
}

struct Harness {
    parser: MessageParser,
    engine: PulseEngine,
}

impl Harness {
    fn new(config: &EngineConfig) -> Self {
        Self {
            parser: MessageParser::new("BTCUSDT"),
            engine: PulseEngine::new("BTCUSDT", config),
        }
    }

    fn feed(&mut self, raw: &str) -> EngineState {
        let message = self.parser.parse(raw).expect("message should parse");
        self.engine.ingest(&message)
    }
}

#[test]
fn test_kinetic_trailing_window_from_raw_feed() {
    // [(buy,10,t0),(sell,4,t0+1s),(buy,1,t0+4s)] evaluated at t0+4s with a
    // 3s window: the first two trades fall outside, kinetic = 1
    let mut h = Harness::new(&EngineConfig::default());
    h.feed(&trade_json(1, 50000.0, 10.0, true, T0_MS));
    h.feed(&trade_json(2, 50000.0, 4.0, false, T0_MS + 1_000));
    let state = h.feed(&trade_json(3, 50000.0, 1.0, true, T0_MS + 4_000));

    assert!((state.kinetic - 1.0).abs() < 1e-12);
    assert_eq!(state.price, 50000.0);
}

#[test]
fn test_trade_buffer_never_exceeds_capacity() {
    let mut h = Harness::new(&EngineConfig::default());
    for i in 0..1050i64 {
        h.feed(&trade_json(i + 1, 50000.0, 0.1, true, T0_MS + i as u64));
    }
    assert_eq!(h.engine.trade_buffer_len(), 1000);
}

#[test]
fn test_zero_quantity_removes_and_restores_level() {
    let mut h = Harness::new(&EngineConfig::default());
    h.feed(&depth_json(
        &[(50000.0, 1.0)],
        &[(50001.0, 1.0), (50002.0, 2.0)],
    ));

    // Remove the best ask, next level takes over
    let state = h.feed(&depth_json(&[], &[(50001.0, 0.0)]));
    // bid 1.0 vs ask 2.0 -> (1-2)/3
    assert!((state.pressure - (-1.0 / 3.0)).abs() < 1e-12);

    // Restore it
    let state = h.feed(&depth_json(&[], &[(50001.0, 3.0)]));
    assert!((state.pressure - (1.0 - 3.0) / 4.0).abs() < 1e-12);
}

#[test]
fn test_one_sided_book_freezes_pressure() {
    let mut h = Harness::new(&EngineConfig::default());
    let state = h.feed(&depth_json(&[(50000.0, 3.0)], &[(50001.0, 1.0)]));
    assert!((state.pressure - 0.5).abs() < 1e-12);

    // Empty the ask side entirely: pressure holds, not zeroed
    let state = h.feed(&depth_json(&[], &[(50001.0, 0.0)]));
    assert!((state.pressure - 0.5).abs() < 1e-12);
}

#[test]
fn test_pressure_always_bounded() {
    let mut h = Harness::new(&EngineConfig::default());
    let cases = [
        (&[(100.0, 1000.0)][..], &[(101.0, 0.001)][..]),
        (&[(100.0, 0.001)][..], &[(101.0, 1000.0)][..]),
        (&[(100.0, 5.0)][..], &[(101.0, 5.0)][..]),
    ];
    for (bids, asks) in cases {
        let state = h.feed(&depth_json(bids, asks));
        assert!(state.pressure >= -1.0 && state.pressure <= 1.0);
    }
}

#[test]
fn test_regime_stays_calculating_until_enough_samples() {
    let mut h = Harness::new(&EngineConfig::default());
    for i in 0..10 {
        let qty = 1.0 + (i % 3) as f64;
        let state = h.feed(&depth_json(&[(50000.0, qty)], &[(50001.0, 1.0)]));
        assert_eq!(state.regime, Regime::Calculating);
    }
    // 11th sample activates classification
    let state = h.feed(&depth_json(&[(50000.0, 2.0)], &[(50001.0, 1.0)]));
    assert_ne!(state.regime, Regime::Calculating);
}

#[test]
fn test_stagnant_regime_from_flat_imbalance() {
    let mut h = Harness::new(&EngineConfig::default());
    let mut last = None;
    for _ in 0..15 {
        last = Some(h.feed(&depth_json(&[(50000.0, 2.0)], &[(50001.0, 1.0)])));
    }
    // Identical samples: zero dispersion
    assert_eq!(last.unwrap().regime, Regime::Stagnant);
}

#[test]
fn test_star_count_prepare_scenario_end_to_end() {
    // Target: kinetic > 50, elasticity > 2, regime volatile, pressure 0
    // -> three active factors -> score 3 -> PREPARE
    let mut h = Harness::new(&EngineConfig::default());

    h.feed(&trade_json(1, 50000.0, 30.0, true, T0_MS));
    h.feed(&trade_json(2, 50005.0, 31.0, true, T0_MS + 100));

    // Alternate heavy imbalance to push dispersion above the high threshold
    for i in 0..12 {
        let (bid_qty, ask_qty) = if i % 2 == 0 { (19.0, 1.0) } else { (1.0, 19.0) };
        h.feed(&depth_json(&[(50000.0, bid_qty)], &[(50001.0, ask_qty)]));
    }
    // Final update balances the top so pressure and alignment go inactive
    let state = h.feed(&depth_json(&[(50000.0, 5.0)], &[(50001.0, 5.0)]));

    assert!(state.kinetic > 50.0);
    assert!(state.elasticity > 2.0);
    assert_eq!(state.regime, Regime::Volatile);
    assert_eq!(state.pressure, 0.0);
    assert_eq!(state.score, 3);
    assert_eq!(state.signal, Signal::Prepare);
}

#[test]
fn test_trap_break_short_trap_end_to_end() {
    // Heavy one-sided buying with no price movement reads as absorption
    let mut config = EngineConfig::default();
    config.score_policy = ScorePolicyKind::TrapBreak;
    let mut h = Harness::new(&config);

    let state = h.feed(&trade_json(1, 50000.0, 60.0, true, T0_MS));
    assert!(state.kinetic > 50.0);
    assert!(state.elasticity.abs() < 0.5);
    assert_eq!(state.signal, Signal::ShortTrap);
}

#[test]
fn test_trap_break_long_break_end_to_end() {
    let mut config = EngineConfig::default();
    config.score_policy = ScorePolicyKind::TrapBreak;
    let mut h = Harness::new(&config);

    h.feed(&trade_json(1, 50000.0, 30.0, true, T0_MS));
    let state = h.feed(&trade_json(2, 50010.0, 31.0, true, T0_MS + 100));

    assert!(state.kinetic > 50.0);
    assert!(state.elasticity > 2.0);
    assert_eq!(state.signal, Signal::LongBreak);
}

#[test]
fn test_snapshot_independence_across_ingests() {
    let mut h = Harness::new(&EngineConfig::default());
    let received: Arc<Mutex<Vec<EngineState>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    h.engine.subscribe(move |s| sink.lock().unwrap().push(s));

    let first = h.feed(&trade_json(1, 50000.0, 1.0, true, T0_MS));
    let second = h.feed(&trade_json(2, 50100.0, 1.0, true, T0_MS + 100));

    // Earlier snapshot is untouched by the later ingest
    assert_eq!(first.price, 50000.0);
    assert_eq!(second.price, 50100.0);

    // Mutating a delivered copy never reaches the engine
    {
        let mut guard = received.lock().unwrap();
        assert_eq!(guard.len(), 2);
        guard[0].price = 0.0;
        guard[0].titans.clear();
    }
    let current = h.engine.snapshot();
    assert_eq!(current.price, 50100.0);
    assert_eq!(current.titans.len(), 5);
}

#[test]
fn test_duplicate_and_ack_frames_never_reach_engine() {
    let mut h = Harness::new(&EngineConfig::default());
    h.feed(&trade_json(1, 50000.0, 1.0, true, T0_MS));
    let before = h.engine.snapshot();

    // Subscription acknowledgement
    let ack = h.parser.parse(r#"{"result":null,"id":1}"#);
    assert!(matches!(ack, Err(ParseError::NotData)));

    // Same aggTrade id delivered twice
    let dup = h.parser.parse(&trade_json(1, 50000.0, 1.0, true, T0_MS));
    assert!(matches!(dup, Err(ParseError::DuplicateMessage(_))));

    let after = h.engine.snapshot();
    assert_eq!(before.price, after.price);
    assert_eq!(before.kinetic, after.kinetic);
    assert_eq!(h.engine.ticks(), 1);
}

#[test]
fn test_combined_stream_envelope_accepted() {
    let mut h = Harness::new(&EngineConfig::default());
    let inner = trade_json(7, 50000.0, 2.0, true, T0_MS);
    let enveloped = format!(r#"{{"stream":"btcusdt@aggTrade","data":{}}}"#, inner);

    let message = h.parser.parse(&enveloped).expect("envelope should unwrap");
    assert!(matches!(message, ParsedMessage::Trade(_)));
    let state = h.engine.ingest(&message);
    assert_eq!(state.kinetic, 2.0);
}
