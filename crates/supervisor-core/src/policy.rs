//! The restart policy engine: decides whether and when to relaunch a
//! crashed process, tracking per-descriptor backoff state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::clock::Clock;
use crate::descriptor::{RestartPolicy, RestartState};

/// The outcome of a restart decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    Restart { delay: Duration },
    Stop,
}

/// Owns the per-descriptor restart-state map and the immutable policy
/// definitions it consults. Policies are handed out as `Arc` snapshots so
/// callers never block policy evaluation on registry access.
pub struct PolicyEngine<C: Clock> {
    clock: Arc<C>,
    policies: Mutex<HashMap<String, Arc<RestartPolicy>>>,
    state: Mutex<HashMap<String, RestartState>>,
}

impl<C: Clock> PolicyEngine<C> {
    pub fn new(clock: Arc<C>) -> Self {
        let mut policies = HashMap::new();
        for p in RestartPolicy::builtins() {
            policies.insert(p.name.clone(), Arc::new(p));
        }
        Self {
            clock,
            policies: Mutex::new(policies),
            state: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_policy(&self, policy: RestartPolicy) -> Result<(), String> {
        policy.validate()?;
        self.policies
            .lock()
            .expect("policy lock poisoned")
            .insert(policy.name.clone(), Arc::new(policy));
        Ok(())
    }

    pub fn policy(&self, name: &str) -> Option<Arc<RestartPolicy>> {
        self.policies.lock().expect("policy lock poisoned").get(name).cloned()
    }

    pub fn remove_restart_state(&self, descriptor: &str) {
        self.state.lock().expect("policy lock poisoned").remove(descriptor);
    }

    /// Evaluates what should happen after `descriptor` exited with
    /// `exit_code`. `policy_name == None` means "never restart".
    pub fn decide(
        &self,
        descriptor: &str,
        policy_name: Option<&str>,
        exit_code: i32,
    ) -> Decision {
        let Some(policy_name) = policy_name else {
            return Decision::Stop;
        };
        let Some(policy) = self.policy(policy_name) else {
            return Decision::Stop;
        };

        if let Some(ignore) = &policy.ignore_codes {
            if ignore.contains(&exit_code) {
                return Decision::Stop;
            }
        }
        if let Some(allow) = &policy.restart_on_codes {
            if !allow.contains(&exit_code) {
                return Decision::Stop;
            }
        }

        let mut states = self.state.lock().expect("policy lock poisoned");
        let restart_state = states.entry(descriptor.to_string()).or_default();

        if restart_state.attempt >= policy.max_retries {
            return Decision::Stop;
        }

        let delay = match restart_state.current_delay {
            None => policy.base_delay,
            Some(prev) => {
                let scaled = prev.mul_f64(policy.backoff_multiplier);
                scaled.min(policy.max_delay)
            }
        };

        restart_state.attempt += 1;
        restart_state.current_delay = Some(delay);
        restart_state.last_restart_at_epoch_secs = Some(self.clock.epoch_secs());

        Decision::Restart { delay }
    }

    /// Clears backoff state if `descriptor` has been running at least as long
    /// as its policy's stabilization window.
    pub fn maybe_stabilize(&self, descriptor: &str, policy_name: Option<&str>, uptime: Duration) {
        let Some(policy_name) = policy_name else { return };
        let Some(policy) = self.policy(policy_name) else { return };
        if uptime >= policy.stabilization_window() {
            if let Some(state) = self.state.lock().expect("policy lock poisoned").get_mut(descriptor) {
                state.reset();
            }
        }
    }

    pub fn attempt_count(&self, descriptor: &str) -> u32 {
        self.state
            .lock()
            .expect("policy lock poisoned")
            .get(descriptor)
            .map(|s| s.attempt)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_support::FakeClock;

    fn engine() -> PolicyEngine<FakeClock> {
        PolicyEngine::new(Arc::new(FakeClock::new(1_000)))
    }

    #[test]
    fn no_policy_means_no_restart() {
        let e = engine();
        assert_eq!(e.decide("p", None, 1), Decision::Stop);
    }

    #[test]
    fn standard_policy_backoff_sequence_matches_spec_scenario() {
        let e = engine();
        // S2: standard policy, delays 5s, 7.5s, 11.25s, then give up.
        let d1 = e.decide("crasher", Some("standard"), 1);
        assert_eq!(d1, Decision::Restart { delay: Duration::from_secs(5) });

        let d2 = e.decide("crasher", Some("standard"), 1);
        assert_eq!(d2, Decision::Restart { delay: Duration::from_millis(7_500) });

        let d3 = e.decide("crasher", Some("standard"), 1);
        assert_eq!(d3, Decision::Restart { delay: Duration::from_millis(11_250) });

        let d4 = e.decide("crasher", Some("standard"), 1);
        assert_eq!(d4, Decision::Stop);
    }

    #[test]
    fn ignore_codes_stop_without_consuming_attempt() {
        let e = engine();
        let mut p = RestartPolicy::standard();
        p.name = "ignorey".into();
        p.ignore_codes = Some(vec![0, 2]);
        e.register_policy(p).unwrap();

        assert_eq!(e.decide("s6", Some("ignorey"), 2), Decision::Stop);
        assert_eq!(e.attempt_count("s6"), 0);
    }

    #[test]
    fn restart_on_codes_restricts_restart_set() {
        let e = engine();
        let mut p = RestartPolicy::standard();
        p.name = "restricted".into();
        p.restart_on_codes = Some(vec![42]);
        e.register_policy(p).unwrap();

        assert_eq!(e.decide("x", Some("restricted"), 1), Decision::Stop);
        assert!(matches!(
            e.decide("x", Some("restricted"), 42),
            Decision::Restart { .. }
        ));
    }

    #[test]
    fn max_retries_zero_gives_up_immediately() {
        let e = engine();
        assert_eq!(e.decide("x", Some("none"), 1), Decision::Stop);
    }

    #[test]
    fn stabilize_resets_attempt_after_window() {
        let e = engine();
        e.decide("p", Some("aggressive"), 1);
        assert_eq!(e.attempt_count("p"), 1);
        e.maybe_stabilize("p", Some("aggressive"), Duration::from_secs(61));
        assert_eq!(e.attempt_count("p"), 0);
    }

    #[test]
    fn stabilize_before_window_does_not_reset() {
        let e = engine();
        e.decide("p", Some("aggressive"), 1);
        e.maybe_stabilize("p", Some("aggressive"), Duration::from_secs(10));
        assert_eq!(e.attempt_count("p"), 1);
    }

    use proptest::prelude::*;

    proptest! {
        // Invariants 3 and 4 from the testable-properties list: restarts
        // never exceed max_retries, and the delay sequence is monotonically
        // non-decreasing and bounded by max_delay, for any crashing exit
        // code and any policy shape within its validated ranges.
        #[test]
        fn backoff_is_monotone_and_bounded_by_policy(
            exit_code in -2i32..5,
            max_retries in 0u32..8,
            base_delay_ms in 1u64..5_000,
            backoff_multiplier in 1.0f64..3.0,
            max_delay_ms in 5_000u64..60_000,
        ) {
            let e = engine();
            let mut policy = RestartPolicy::standard();
            policy.name = "fuzzed".into();
            policy.max_retries = max_retries;
            policy.base_delay = Duration::from_millis(base_delay_ms);
            policy.backoff_multiplier = backoff_multiplier;
            policy.max_delay = Duration::from_millis(max_delay_ms);
            policy.restart_on_codes = None;
            policy.ignore_codes = None;
            e.register_policy(policy.clone()).unwrap();

            let mut last_delay = Duration::ZERO;
            let mut restarts = 0u32;
            loop {
                match e.decide("fuzzed-proc", Some("fuzzed"), exit_code) {
                    Decision::Restart { delay } => {
                        prop_assert!(delay <= policy.max_delay);
                        prop_assert!(delay >= last_delay);
                        last_delay = delay;
                        restarts += 1;
                        prop_assert!(restarts <= max_retries);
                    }
                    Decision::Stop => break,
                }
            }
            prop_assert!(restarts <= max_retries);
        }
    }
}
