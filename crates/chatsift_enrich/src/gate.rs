//! Confidence gate: a hysteresis band separating enrichments promoted to
//! indexed metadata from those sidelined for later re-enrichment.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GateDecision {
    Promote,
    Sideline,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfidenceDistribution {
    /// confidence < 0.4
    pub low: u64,
    /// 0.4 ≤ confidence < 0.7
    pub medium: u64,
    /// confidence ≥ 0.7
    pub high: u64,
}

/// Hysteresis band (τ_low ≤ τ ≤ τ_high). A conversation currently promoting
/// keeps promoting down to τ_low; one currently sidelined must climb past
/// τ_high to be promoted again. First decision uses the midpoint τ.
pub struct ConfidenceGate {
    tau_low: f64,
    tau: f64,
    tau_high: f64,
    last_decision: Mutex<HashMap<String, GateDecision>>,
    distribution: Mutex<ConfidenceDistribution>,
}

impl Default for ConfidenceGate {
    fn default() -> Self {
        Self::new(0.62, 0.70, 0.78)
    }
}

impl ConfidenceGate {
    pub fn new(tau_low: f64, tau: f64, tau_high: f64) -> Self {
        debug_assert!(tau_low <= tau && tau <= tau_high);
        Self {
            tau_low,
            tau,
            tau_high,
            last_decision: Mutex::new(HashMap::new()),
            distribution: Mutex::new(ConfidenceDistribution::default()),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.tau
    }

    pub fn decide(&self, conv_id: &str, confidence: f64) -> GateDecision {
        {
            let mut dist = self.distribution.lock().unwrap_or_else(|e| e.into_inner());
            if confidence < 0.4 {
                dist.low += 1;
            } else if confidence < 0.7 {
                dist.medium += 1;
            } else {
                dist.high += 1;
            }
        }

        let mut last = self.last_decision.lock().unwrap_or_else(|e| e.into_inner());
        let threshold = match last.get(conv_id) {
            None => self.tau,
            Some(GateDecision::Promote) => self.tau_low,
            Some(GateDecision::Sideline) => self.tau_high,
        };

        let decision = if confidence >= threshold {
            GateDecision::Promote
        } else {
            GateDecision::Sideline
        };
        last.insert(conv_id.to_string(), decision);
        decision
    }

    pub fn distribution(&self) -> ConfidenceDistribution {
        self.distribution
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_decision_uses_midpoint() {
        let gate = ConfidenceGate::default();
        assert_eq!(gate.decide("c", 0.71), GateDecision::Promote);
        let gate = ConfidenceGate::default();
        assert_eq!(gate.decide("c", 0.69), GateDecision::Sideline);
    }

    #[test]
    fn promoting_conversation_tolerates_dips_to_tau_low() {
        let gate = ConfidenceGate::default();
        assert_eq!(gate.decide("c", 0.80), GateDecision::Promote);
        // 0.65 is below τ but above τ_low, so the promotion holds.
        assert_eq!(gate.decide("c", 0.65), GateDecision::Promote);
        // Below τ_low the gate flips.
        assert_eq!(gate.decide("c", 0.60), GateDecision::Sideline);
    }

    #[test]
    fn sidelined_conversation_needs_tau_high_to_recover() {
        let gate = ConfidenceGate::default();
        assert_eq!(gate.decide("c", 0.10), GateDecision::Sideline);
        // 0.75 clears τ but not τ_high.
        assert_eq!(gate.decide("c", 0.75), GateDecision::Sideline);
        assert_eq!(gate.decide("c", 0.80), GateDecision::Promote);
    }

    #[test]
    fn conversations_are_independent() {
        let gate = ConfidenceGate::default();
        assert_eq!(gate.decide("a", 0.10), GateDecision::Sideline);
        assert_eq!(gate.decide("b", 0.75), GateDecision::Promote);
    }

    #[test]
    fn distribution_buckets_confidences() {
        let gate = ConfidenceGate::default();
        gate.decide("c", 0.1);
        gate.decide("c", 0.5);
        gate.decide("c", 0.9);
        let dist = gate.distribution();
        assert_eq!((dist.low, dist.medium, dist.high), (1, 1, 1));
    }
}
