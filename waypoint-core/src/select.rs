//! Probe outcome selection: fastest-wins for the API tier, full ranking for content hosts.

use std::time::Duration;

/// Result of one timed probe. `payload` is `Some` only when the probe succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome<T> {
    /// Position of the host in the candidate list (discovery order).
    pub index: usize,
    pub host: String,
    pub elapsed: Duration,
    pub payload: Option<T>,
}

impl<T> ProbeOutcome<T> {
    pub fn succeeded(&self) -> bool {
        self.payload.is_some()
    }
}

/// Lowest elapsed time among successful outcomes; ties go to the lower index.
/// Independent of the order in which outcomes were collected.
pub fn fastest<T>(outcomes: Vec<ProbeOutcome<T>>) -> Option<ProbeOutcome<T>> {
    outcomes
        .into_iter()
        .filter(ProbeOutcome::succeeded)
        .min_by_key(|o| (o.elapsed, o.index))
}

/// Every successful host, fastest first (ties by index).
pub fn rank_reachable<T>(outcomes: &[ProbeOutcome<T>]) -> Vec<String> {
    let mut ok: Vec<&ProbeOutcome<T>> = outcomes.iter().filter(|o| o.succeeded()).collect();
    ok.sort_by_key(|o| (o.elapsed, o.index));
    ok.into_iter().map(|o| o.host.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(index: usize, host: &str, ms: u64, ok: bool) -> ProbeOutcome<()> {
        ProbeOutcome {
            index,
            host: host.to_string(),
            elapsed: Duration::from_millis(ms),
            payload: ok.then_some(()),
        }
    }

    #[test]
    fn fastest_success_wins() {
        let outcomes = vec![
            outcome(0, "h1", 300, true),
            outcome(1, "h2", 100, true),
            outcome(2, "h3", 500, true),
        ];
        assert_eq!(fastest(outcomes).unwrap().host, "h2");
    }

    #[test]
    fn failures_never_win_even_if_faster() {
        let outcomes = vec![outcome(0, "h1", 5, false), outcome(1, "h2", 200, true)];
        assert_eq!(fastest(outcomes).unwrap().host, "h2");
    }

    #[test]
    fn winner_independent_of_collection_order() {
        let forward = vec![
            outcome(0, "h1", 300, true),
            outcome(1, "h2", 100, true),
            outcome(2, "h3", 500, true),
        ];
        let mut reversed = forward.clone();
        reversed.reverse();
        assert_eq!(fastest(forward).unwrap().host, fastest(reversed).unwrap().host);
    }

    #[test]
    fn ties_go_to_discovery_order() {
        let outcomes = vec![
            outcome(2, "h3", 100, true),
            outcome(1, "h2", 100, true),
            outcome(0, "h1", 150, true),
        ];
        assert_eq!(fastest(outcomes).unwrap().host, "h2");
    }

    #[test]
    fn no_success_no_winner() {
        assert!(fastest(vec![outcome(0, "h1", 1, false)]).is_none());
        assert!(fastest(Vec::<ProbeOutcome<()>>::new()).is_none());
    }

    #[test]
    fn rank_keeps_every_reachable_host() {
        let outcomes = vec![
            outcome(0, "w1", 90, true),
            outcome(1, "w2", 10, false),
            outcome(2, "w3", 40, true),
            outcome(3, "w4", 40, true),
        ];
        assert_eq!(rank_reachable(&outcomes), vec!["w3", "w4", "w1"]);
    }
}
