// Verdict Aggregator - turns derived metrics into a score, a signal, and
// the fixed-order display rows ("titans"). Two scoring policies share the
// `ScorePolicy` trait and are selected at construction from configuration.
// Every factor is a pure numeric comparison, so evaluation is total: no
// input can make it fail.

use crate::core::config::{EngineConfig, ScorePolicyKind};
use crate::core::types::{Regime, Signal, TitanRow};

/// Flat-elasticity bound for the trap guards: strong flow with almost no
/// price displacement reads as absorption
const FLAT_ELASTICITY: f64 = 0.5;

/// Metric snapshot handed to a policy for one evaluation
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricInputs {
    pub kinetic: f64,
    pub pressure: f64,
    pub elasticity: f64,
    pub regime: Regime,
}

/// Policy output for one tick
#[derive(Debug, Clone)]
pub struct Verdict {
    pub score: u8,
    pub signal: Signal,
    pub titans: Vec<TitanRow>,
}

pub trait ScorePolicy: Send + Sync {
    fn evaluate(&self, inputs: &MetricInputs) -> Verdict;
}

/// Build the configured policy
pub fn make_policy(config: &EngineConfig) -> Box<dyn ScorePolicy> {
    let thresholds = FactorThresholds::from_config(config);
    match config.score_policy {
        ScorePolicyKind::StarCount => Box::new(StarCountPolicy::new(thresholds)),
        ScorePolicyKind::TrapBreak => Box::new(TrapBreakPolicy::new(thresholds)),
    }
}

/// Per-factor activation bounds, shared by both policies
#[derive(Debug, Clone, Copy)]
pub struct FactorThresholds {
    pub kinetic: f64,
    pub pressure: f64,
    pub elasticity: f64,
}

impl FactorThresholds {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            kinetic: config.kinetic_threshold,
            pressure: config.pressure_threshold,
            elasticity: config.elasticity_threshold,
        }
    }
}

/// The four factors common to both policies
struct Factors {
    kinetic: bool,
    pressure: bool,
    elasticity: bool,
    volatile: bool,
}

impl Factors {
    fn evaluate(t: &FactorThresholds, m: &MetricInputs) -> Self {
        Self {
            kinetic: m.kinetic.abs() > t.kinetic,
            pressure: m.pressure.abs() > t.pressure,
            elasticity: m.elasticity.abs() > t.elasticity,
            volatile: m.regime == Regime::Volatile,
        }
    }
}

fn common_titans(m: &MetricInputs, f: &Factors) -> Vec<TitanRow> {
    vec![
        TitanRow::new("Net Flow", format!("{:+.2}", m.kinetic), f.kinetic),
        TitanRow::new("Book Pressure", format!("{:+.3}", m.pressure), f.pressure),
        TitanRow::new("Elasticity", format!("{:+.2}", m.elasticity), f.elasticity),
        TitanRow::new("Regime", m.regime.to_string(), f.volatile),
    ]
}

/// Five independent boolean factors, one point each.
/// score >= 4 executes in the direction of the flow, 3 is a staging state,
/// anything lower stands by.
pub struct StarCountPolicy {
    thresholds: FactorThresholds,
}

impl StarCountPolicy {
    pub fn new(thresholds: FactorThresholds) -> Self {
        Self { thresholds }
    }
}

impl ScorePolicy for StarCountPolicy {
    fn evaluate(&self, m: &MetricInputs) -> Verdict {
        let f = Factors::evaluate(&self.thresholds, m);
        // Alignment: flow and book pressure push the same way. Zero on
        // either side never aligns.
        let aligned = m.kinetic * m.pressure > 0.0;

        let score = [f.kinetic, f.pressure, f.elasticity, f.volatile, aligned]
            .iter()
            .filter(|&&active| active)
            .count() as u8;
        debug_assert!(score <= 5);

        let signal = if score >= 4 {
            if m.kinetic > 0.0 {
                Signal::ExecuteLong
            } else {
                Signal::ExecuteShort
            }
        } else if score == 3 {
            Signal::Prepare
        } else {
            Signal::Standby
        };

        let mut titans = common_titans(m, &f);
        titans.push(TitanRow::new(
            "Whale Absorption",
            format!("{:+.4}", m.kinetic * m.pressure),
            aligned,
        ));

        Verdict {
            score,
            signal,
            titans,
        }
    }
}

/// Four-factor score with a priority-ordered guard chain for the signal.
/// Strong flow that fails to move price is a trap; strong flow that moves
/// it hard is a break. First matching guard wins.
pub struct TrapBreakPolicy {
    thresholds: FactorThresholds,
}

impl TrapBreakPolicy {
    pub fn new(thresholds: FactorThresholds) -> Self {
        Self { thresholds }
    }

    fn guard_signal(&self, m: &MetricInputs) -> Signal {
        let k = self.thresholds.kinetic;
        let e = self.thresholds.elasticity;

        if m.kinetic > k && m.elasticity < FLAT_ELASTICITY {
            Signal::ShortTrap
        } else if m.kinetic > k && m.elasticity > e {
            Signal::LongBreak
        } else if m.kinetic < -k && m.elasticity > -FLAT_ELASTICITY {
            Signal::LongTrap
        } else if m.kinetic < -k && m.elasticity < -e {
            Signal::ShortBreak
        } else {
            Signal::Observe
        }
    }
}

impl ScorePolicy for TrapBreakPolicy {
    fn evaluate(&self, m: &MetricInputs) -> Verdict {
        let f = Factors::evaluate(&self.thresholds, m);

        let score = [f.kinetic, f.pressure, f.elasticity, f.volatile]
            .iter()
            .filter(|&&active| active)
            .count() as u8;
        debug_assert!(score <= 4);

        let mut titans = common_titans(m, &f);
        // Placeholder row kept for consumers that key on row presence.
        // Renders but never contributes to the score.
        titans.push(TitanRow::new("Basis Spread", "--".to_string(), false));

        Verdict {
            score,
            signal: self.guard_signal(m),
            titans,
        }
    }
}
