//! Scenario to toxic translation, and best-effort application.

use tracing::{info, warn};

use crate::control::{ControlApi, ToxicDirective, ToxicKind};
use crate::error::ToxicApplyWarning;
use crate::scenario::ScenarioDescriptor;

/// Directives realising `scenario`, always ordered latency, bandwidth, timeout.
///
/// Packet loss has no direct toxic; it is approximated by a `timeout` toxic
/// with `timeout = 0` that fires with probability `packet_loss`.
pub fn translate(scenario: &ScenarioDescriptor) -> Vec<ToxicDirective> {
    let mut directives = Vec::with_capacity(3);

    if let Some(latency) = scenario.latency.filter(|ms| *ms > 0) {
        directives.push(ToxicDirective::latency(
            latency,
            scenario.jitter.unwrap_or(0),
        ));
    }

    if let Some(rate) = scenario.bandwidth.filter(|rate| *rate > 0) {
        directives.push(ToxicDirective::bandwidth(rate));
    }

    if let Some(loss) = scenario.packet_loss.filter(|p| *p > 0.0) {
        directives.push(ToxicDirective::timeout(0, loss));
    }

    directives
}

/// Outcome of submitting directives to a route.
#[derive(Debug, Default)]
pub struct ApplyReport {
    /// Engine-assigned names of the toxics that took.
    pub applied: Vec<String>,
    pub warnings: Vec<ToxicApplyWarning>,
}

impl ApplyReport {
    pub fn failed_kinds(&self) -> Vec<ToxicKind> {
        self.warnings.iter().map(|w| w.kind).collect()
    }
}

/// Submit each directive in order. A rejected directive is logged and
/// skipped; the rest are still attempted.
pub async fn apply(api: &ControlApi, route: &str, directives: &[ToxicDirective]) -> ApplyReport {
    let mut report = ApplyReport::default();

    for directive in directives {
        match api.add_toxic(route, directive).await {
            Ok(name) => {
                info!(route, kind = %directive.kind, "toxic {name} applied");
                report.applied.push(name);
            }
            Err(source) => {
                let warning = ToxicApplyWarning {
                    kind: directive.kind,
                    route: route.to_owned(),
                    source,
                };
                warn!("{warning}");
                report.warnings.push(warning);
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ToxicAttributes;

    fn kinds(directives: &[ToxicDirective]) -> Vec<ToxicKind> {
        directives.iter().map(|d| d.kind).collect()
    }

    #[test]
    fn test_packet_loss_only() {
        let directives = translate(&ScenarioDescriptor {
            packet_loss: Some(0.3),
            ..Default::default()
        });

        assert_eq!(directives, vec![ToxicDirective::timeout(0, 0.3)]);
        assert_eq!(directives[0].toxicity, 0.3);
        assert_eq!(directives[0].attributes, ToxicAttributes::Timeout { timeout: 0 });
    }

    #[test]
    fn test_latency_without_jitter() {
        let directives = translate(&ScenarioDescriptor {
            latency: Some(120),
            ..Default::default()
        });

        assert_eq!(
            directives[0].attributes,
            ToxicAttributes::Latency {
                latency: 120,
                jitter: 0
            }
        );
        assert_eq!(directives[0].toxicity, 1.0);
    }

    #[test]
    fn test_jitter_ignored_without_latency() {
        let directives = translate(&ScenarioDescriptor {
            jitter: Some(500),
            bandwidth: Some(64),
            ..Default::default()
        });
        assert_eq!(directives, vec![ToxicDirective::bandwidth(64)]);
    }

    #[test]
    fn test_fixed_kind_order() {
        let scenario: ScenarioDescriptor = serde_json::from_str(
            r#"{ "packet_loss": 0.1, "bandwidth": 10, "jitter": 5, "latency": 20 }"#,
        )
        .unwrap();

        assert_eq!(
            kinds(&translate(&scenario)),
            vec![ToxicKind::Latency, ToxicKind::Bandwidth, ToxicKind::Timeout]
        );
    }

    #[test]
    fn test_mobile_profile_without_loss() {
        let directives = translate(&ScenarioDescriptor {
            latency: Some(1000),
            jitter: Some(500),
            bandwidth: Some(50),
            packet_loss: None,
        });

        assert_eq!(
            directives,
            vec![
                ToxicDirective::latency(1000, 500),
                ToxicDirective::bandwidth(50)
            ]
        );
    }

    #[test]
    fn test_zero_fields_produce_nothing() {
        let directives = translate(&ScenarioDescriptor {
            latency: Some(0),
            jitter: Some(100),
            bandwidth: Some(0),
            packet_loss: Some(0.0),
        });
        assert!(directives.is_empty());
        assert!(translate(&ScenarioDescriptor::default()).is_empty());
    }
}
