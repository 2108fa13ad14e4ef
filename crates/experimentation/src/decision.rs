//! Decision policies and their evaluation.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::allocation::{assign_treatment, assign_treatment_by_visitor};
use crate::config::ExperimentConfig;
use crate::errors::{ExperimentError, ExperimentResult};
use crate::store::AssignmentStore;

pub const EXPERIMENTATION_NODE: &str = "EXPERIMENTATION";
pub const DEFAULT_POLICY_ID: &str = "content-experimentation-policy";
pub const DEFAULT_IDENTITY_NAMESPACE: &str = "ECID";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RandomizationUnit {
    #[default]
    Visitor,
    Device,
}

impl RandomizationUnit {
    pub fn as_str(self) -> &'static str {
        match self {
            RandomizationUnit::Visitor => "VISITOR",
            RandomizationUnit::Device => "DEVICE",
        }
    }

    /// An absent unit means `VISITOR`; anything unknown is an error.
    pub fn resolve(value: Option<&str>) -> ExperimentResult<Self> {
        value.map_or(Ok(Self::Visitor), str::parse)
    }
}

impl FromStr for RandomizationUnit {
    type Err = ExperimentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "VISITOR" => Ok(Self::Visitor),
            "DEVICE" => Ok(Self::Device),
            other => Err(ExperimentError::UnsupportedRandomizationUnit(other.to_string())),
        }
    }
}

impl fmt::Display for RandomizationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Treatment {
    pub id: String,
    pub allocation_percentage: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentNode {
    pub id: String,
    pub identity_namespace: String,
    #[serde(default)]
    pub randomization_unit: Option<String>,
    pub treatments: Vec<Treatment>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub experiment: Option<ExperimentNode>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionPolicy {
    pub id: String,
    pub root_decision_node_id: String,
    pub decision_nodes: Vec<DecisionNode>,
}

/// One entry of an identity map namespace.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionContext {
    #[serde(default)]
    pub identity_map: BTreeMap<String, Vec<Identity>>,
}

impl DecisionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(mut self, namespace: impl Into<String>, id: impl Into<String>) -> Self {
        self.identity_map
            .entry(namespace.into())
            .or_default()
            .push(Identity { id: id.into() });
        self
    }

    fn identity(&self, namespace: &str) -> Option<&str> {
        self.identity_map
            .get(namespace)
            .and_then(|ids| ids.first())
            .map(|identity| identity.id.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreatmentRef {
    pub id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub experiment_id: String,
    pub items: Vec<TreatmentRef>,
    /// Present on the visitor path.
    pub hashed_bucket: Option<f64>,
}

impl Decision {
    pub fn treatment(&self) -> Option<&str> {
        self.items.first().map(|item| item.id.as_str())
    }
}

/// Builds the single-node policy used for content experiments.
pub fn decision_policy_for(
    config: &ExperimentConfig,
    unit: RandomizationUnit,
    identity_namespace: &str,
) -> DecisionPolicy {
    let treatments = config
        .allocation_percentages()
        .into_iter()
        .map(|(id, allocation_percentage)| Treatment {
            id,
            allocation_percentage,
        })
        .collect();
    DecisionPolicy {
        id: DEFAULT_POLICY_ID.to_string(),
        root_decision_node_id: "n1".to_string(),
        decision_nodes: vec![DecisionNode {
            id: "n1".to_string(),
            node_type: EXPERIMENTATION_NODE.to_string(),
            experiment: Some(ExperimentNode {
                id: config.id.clone(),
                identity_namespace: identity_namespace.to_string(),
                randomization_unit: Some(unit.as_str().to_string()),
                treatments,
            }),
        }],
    }
}

/// Evaluates policies. Device assignments go through the store so that a
/// device sees the same treatment on later visits.
pub struct DecisionEngine {
    store: Arc<AssignmentStore>,
    rng: Mutex<StdRng>,
}

impl DecisionEngine {
    pub fn new(store: Arc<AssignmentStore>) -> Self {
        Self {
            store,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_seed(store: Arc<AssignmentStore>, seed: u64) -> Self {
        Self {
            store,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn store(&self) -> &Arc<AssignmentStore> {
        &self.store
    }

    pub fn evaluate(&self, policy: &DecisionPolicy, context: &DecisionContext) -> ExperimentResult<Decision> {
        let node = policy
            .decision_nodes
            .iter()
            .find(|node| node.id == policy.root_decision_node_id)
            .ok_or_else(|| ExperimentError::UnknownNode(policy.root_decision_node_id.clone()))?;
        match node.node_type.as_str() {
            EXPERIMENTATION_NODE => {
                let experiment = node.experiment.as_ref().ok_or_else(|| {
                    ExperimentError::invalid(format!("node {} has no experiment", node.id))
                })?;
                self.evaluate_experiment(experiment, context)
            }
            other => Err(ExperimentError::UnsupportedNodeType(other.to_string())),
        }
    }

    fn evaluate_experiment(
        &self,
        experiment: &ExperimentNode,
        context: &DecisionContext,
    ) -> ExperimentResult<Decision> {
        let unit = RandomizationUnit::resolve(experiment.randomization_unit.as_deref())?;
        let treatments: Vec<String> = experiment.treatments.iter().map(|t| t.id.clone()).collect();
        let percentages: Vec<f64> = experiment
            .treatments
            .iter()
            .map(|t| t.allocation_percentage)
            .collect();
        let Some(control) = treatments.first().cloned() else {
            return Err(ExperimentError::invalid(format!(
                "experiment {} has no treatments",
                experiment.id
            )));
        };

        let (treatment, hashed_bucket) = match unit {
            RandomizationUnit::Visitor => {
                let namespace = &experiment.identity_namespace;
                let identity = context.identity(namespace).ok_or_else(|| {
                    ExperimentError::MissingIdentity {
                        namespace: namespace.clone(),
                    }
                })?;
                let assignment =
                    assign_treatment_by_visitor(&experiment.id, identity, &percentages, &treatments);
                let treatment = assignment.treatment_id.unwrap_or_else(|| {
                    warn!(experiment = %experiment.id, bucket = assignment.bucket_id, "bucket outside allocations, using control");
                    control.clone()
                });
                (treatment, Some(assignment.bucket_id))
            }
            RandomizationUnit::Device => (self.device_treatment(&experiment.id, &percentages, &treatments, &control), None),
        };

        debug!(experiment = %experiment.id, unit = %unit, treatment = %treatment, "experiment evaluated");
        Ok(Decision {
            experiment_id: experiment.id.clone(),
            items: vec![TreatmentRef { id: treatment }],
            hashed_bucket,
        })
    }

    fn device_treatment(
        &self,
        experiment_id: &str,
        percentages: &[f64],
        treatments: &[String],
        control: &str,
    ) -> String {
        if let Some(cached) = self.store.get(experiment_id) {
            return cached;
        }
        let assigned = {
            let mut rng = self.rng.lock();
            assign_treatment(percentages, treatments, &mut *rng)
                .cloned()
                .unwrap_or_else(|| control.to_string())
        };
        if let Err(err) = self.store.set(experiment_id, &assigned) {
            warn!(experiment = %experiment_id, error = %err, "failed to persist device assignment");
        }
        assigned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(unit: Option<&str>, treatments: &[(&str, f64)]) -> DecisionPolicy {
        DecisionPolicy {
            id: "p".into(),
            root_decision_node_id: "n1".into(),
            decision_nodes: vec![DecisionNode {
                id: "n1".into(),
                node_type: EXPERIMENTATION_NODE.into(),
                experiment: Some(ExperimentNode {
                    id: "exp".into(),
                    identity_namespace: "ECID".into(),
                    randomization_unit: unit.map(str::to_string),
                    treatments: treatments
                        .iter()
                        .map(|(id, pct)| Treatment {
                            id: id.to_string(),
                            allocation_percentage: *pct,
                        })
                        .collect(),
                }),
            }],
        }
    }

    fn engine() -> DecisionEngine {
        DecisionEngine::with_seed(Arc::new(AssignmentStore::in_memory()), 42)
    }

    #[test]
    fn visitor_path_is_deterministic() {
        let engine = engine();
        let policy = policy(None, &[("a", 50.0), ("b", 50.0)]);
        let ctx = DecisionContext::new().with_identity("ECID", "visitor-42");
        let first = engine.evaluate(&policy, &ctx).unwrap();
        let second = engine.evaluate(&policy, &ctx).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.hashed_bucket, Some(crate::hash::get_bucket("exp.visitor-42")));
    }

    #[test]
    fn visitor_path_requires_identity() {
        let err = engine()
            .evaluate(&policy(Some("VISITOR"), &[("a", 100.0)]), &DecisionContext::new())
            .unwrap_err();
        assert!(matches!(err, ExperimentError::MissingIdentity { .. }));
    }

    #[test]
    fn unknown_unit_fails_fast() {
        let err = engine()
            .evaluate(&policy(Some("SESSION"), &[("a", 100.0)]), &DecisionContext::new())
            .unwrap_err();
        assert!(matches!(err, ExperimentError::UnsupportedRandomizationUnit(unit) if unit == "SESSION"));
    }

    #[test]
    fn device_assignment_is_sticky() {
        let engine = engine();
        let policy = policy(Some("DEVICE"), &[("a", 50.0), ("b", 50.0)]);
        let first = engine.evaluate(&policy, &DecisionContext::new()).unwrap();
        let stored = engine.store().get("exp");
        assert_eq!(stored.as_deref(), first.treatment());
        for _ in 0..20 {
            assert_eq!(engine.evaluate(&policy, &DecisionContext::new()).unwrap(), first);
        }
    }

    #[test]
    fn unknown_root_and_node_type_are_errors() {
        let mut p = policy(None, &[("a", 100.0)]);
        p.root_decision_node_id = "missing".into();
        assert!(matches!(
            engine().evaluate(&p, &DecisionContext::new()),
            Err(ExperimentError::UnknownNode(_))
        ));
        let mut p = policy(None, &[("a", 100.0)]);
        p.decision_nodes[0].node_type = "RULESET".into();
        assert!(matches!(
            engine().evaluate(&p, &DecisionContext::new()),
            Err(ExperimentError::UnsupportedNodeType(_))
        ));
    }

    #[test]
    fn policy_round_trips_through_json_shape() {
        let value = serde_json::to_value(policy(Some("DEVICE"), &[("a", 100.0)])).unwrap();
        assert_eq!(value["rootDecisionNodeId"], "n1");
        assert_eq!(value["decisionNodes"][0]["type"], "EXPERIMENTATION");
        assert_eq!(
            value["decisionNodes"][0]["experiment"]["treatments"][0]["allocationPercentage"],
            100.0
        );
    }
}
