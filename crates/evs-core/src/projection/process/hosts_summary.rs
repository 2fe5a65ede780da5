use std::collections::BTreeMap;

use evs_events::{HostsSummary, InfraEnvStats, SUMMARY_STATS};
use serde_json::{Map, Value};

/// Summarize the hosts embedded under `cluster.hosts`.
///
/// Label fractions are relative to the hosts that carry an `infra_env`, not
/// to all hosts.
pub fn summarize_hosts(cluster: &Map<String, Value>) -> HostsSummary {
    let hosts: Vec<&Map<String, Value>> = cluster
        .get("hosts")
        .and_then(Value::as_array)
        .map(|hosts| hosts.iter().filter_map(Value::as_object).collect())
        .unwrap_or_default();

    let mut stats: InfraEnvStats = SUMMARY_STATS
        .iter()
        .map(|stat| (stat.to_string(), BTreeMap::new()))
        .collect();
    let mut with_infra_env = 0usize;
    for infra_env in hosts
        .iter()
        .filter_map(|host| host.get("infra_env").and_then(Value::as_object))
    {
        with_infra_env += 1;
        for (stat, counts) in stats.iter_mut() {
            if let Some(label) = infra_env.get(stat.as_str()).and_then(Value::as_str) {
                // dots would read as path separators downstream (4.12 -> 4_12)
                *counts.entry(label.replace('.', "_")).or_insert(0.0) += 1.0;
            }
        }
    }
    if with_infra_env > 0 {
        let total = with_infra_env as f64;
        for counts in stats.values_mut() {
            for fraction in counts.values_mut() {
                *fraction /= total;
            }
        }
    }

    let iso_type = stats
        .get("type")
        .and_then(highest)
        .map(|(label, _)| label.to_string())
        .unwrap_or_default();
    // no labelled host means nothing to compare, which is not a mix
    let has_heterogeneous_architecture = stats
        .get("cpu_architecture")
        .and_then(highest)
        .is_some_and(|(_, fraction)| fraction < 1.0);

    HostsSummary {
        host_count: hosts.len(),
        iso_type,
        infra_env: stats,
        has_heterogeneous_architecture,
    }
}

/// Label with the largest fraction; ties go to the smallest label.
fn highest(counts: &BTreeMap<String, f64>) -> Option<(&str, f64)> {
    let mut best: Option<(&str, f64)> = None;
    for (label, &fraction) in counts {
        if best.map_or(true, |(_, top)| fraction > top) {
            best = Some((label.as_str(), fraction));
        }
    }
    best
}
