// ABOUTME: Metrics facade for relay activity. A recorder, if any, is installed
// ABOUTME: by the embedding binary; without one these are no-ops.

pub fn record_command(name: &str) {
    metrics::counter!("courier_commands_total", "command" => name.to_string()).increment(1);
}

pub fn record_run_started() {
    metrics::counter!("courier_runs_total").increment(1);
}

pub fn record_run_outcome(outcome: &str) {
    metrics::counter!("courier_run_outcomes_total", "outcome" => outcome.to_string()).increment(1);
}

pub fn record_provider_attempt(provider: &str) {
    metrics::counter!("courier_provider_attempts_total", "provider" => provider.to_string())
        .increment(1);
}

pub fn record_error(kind: &str) {
    metrics::counter!("courier_errors_total", "kind" => kind.to_string()).increment(1);
}

pub fn record_run_duration(seconds: f64) {
    metrics::histogram!("courier_run_duration_seconds").record(seconds);
}
