use failsafe::{backoff, failure_policy, Config, StateMachine};
use std::time::Duration;

/// Breaker guarding the places search endpoint.
pub type PlacesBreaker =
    StateMachine<failure_policy::ConsecutiveFailures<backoff::Exponential>, ()>;

/// Consecutive failed searches before the breaker opens.
pub const PLACES_FAILURE_THRESHOLD: u32 = 5;

/// Creates the circuit breaker wrapped around places searches.
///
/// After five consecutive failures the breaker opens and searches are
/// rejected without a network call, retrying with an exponential backoff
/// between 10s and 60s. Campaign creation treats a rejection like any other
/// places failure and continues with zero leads.
pub fn create_places_circuit_breaker() -> PlacesBreaker {
    let backoff_strategy = backoff::exponential(Duration::from_secs(10), Duration::from_secs(60));

    let failure_policy =
        failure_policy::consecutive_failures(PLACES_FAILURE_THRESHOLD, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}
