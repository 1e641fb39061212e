//! The eight structural evaluators.
//!
//! Each evaluator scans one workspace and returns the conditions that have
//! no open detection yet. Existence is checked per finding against its
//! dedup key, so running a scan twice records each condition once.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde_json::json;
use uuid::Uuid;

use folio_core::config::PatternConfig;
use folio_core::types::Timestamp;
use folio_storage::{DetectionRepository, ResearchNode, TaskRepository};

use crate::error::PatternError;
use crate::graph::GraphQuery;
use crate::types::{Finding, PatternType, Severity};

const SECONDS_PER_DAY: i64 = 86_400;

/// Tag marking a task as an unresolved research question.
pub const OPEN_QUESTION_TAG: &str = "open-question";

/// Everything an evaluator may read during one scan.
pub struct ScanContext<'a> {
    pub workspace_id: Uuid,
    pub now: Timestamp,
    pub config: &'a PatternConfig,
    pub graph: &'a dyn GraphQuery,
    pub tasks: &'a TaskRepository,
    pub detections: &'a DetectionRepository,
}

impl ScanContext<'_> {
    /// Drop findings that already have an open detection.
    pub fn unrecorded(&self, findings: Vec<Finding>) -> Result<Vec<Finding>, PatternError> {
        let mut fresh = Vec::with_capacity(findings.len());
        for finding in findings {
            let exists = self.detections.exists_open(
                self.workspace_id,
                finding.pattern_type.as_str(),
                &finding.dedup_key,
            )?;
            if !exists {
                fresh.push(finding);
            }
        }
        Ok(fresh)
    }

    fn age_days(&self, since: Timestamp) -> i64 {
        (self.now.0 - since.0).max(0) / SECONDS_PER_DAY
    }
}

pub trait Evaluator: Send + Sync {
    fn pattern_type(&self) -> PatternType;

    fn evaluate(&self, ctx: &ScanContext<'_>) -> Result<Vec<Finding>, PatternError>;
}

/// All evaluators in their fixed run order.
pub fn default_evaluators() -> Vec<Box<dyn Evaluator>> {
    vec![
        Box::new(Convergence),
        Box::new(Contradiction),
        Box::new(Staleness),
        Box::new(CrossDomain),
        Box::new(UntestedImplication),
        Box::new(IntakeGate),
        Box::new(EvidenceGap),
        Box::new(ReproductionFailure),
    ]
}

fn incoming_counts(edges: &[folio_storage::ResearchEdge]) -> HashMap<Uuid, usize> {
    let mut counts = HashMap::new();
    for edge in edges {
        *counts.entry(edge.to_id).or_insert(0) += 1;
    }
    counts
}

fn titles(nodes: &[ResearchNode]) -> HashMap<Uuid, &str> {
    nodes.iter().map(|n| (n.id, n.title.as_str())).collect()
}

/// A hypothesis with at least N incoming `validates` edges.
pub struct Convergence;

impl Evaluator for Convergence {
    fn pattern_type(&self) -> PatternType {
        PatternType::Convergence
    }

    fn evaluate(&self, ctx: &ScanContext<'_>) -> Result<Vec<Finding>, PatternError> {
        let hypotheses = ctx.graph.nodes(ctx.workspace_id, "hypothesis")?;
        let validations = incoming_counts(&ctx.graph.edges(ctx.workspace_id, "validates")?);
        let min = ctx.config.convergence_min_validations.max(1);

        let findings = hypotheses
            .iter()
            .filter_map(|h| {
                let count = validations.get(&h.id).copied().unwrap_or(0);
                (count >= min).then(|| Finding {
                    pattern_type: PatternType::Convergence,
                    severity: Severity::Medium,
                    title: format!("Hypothesis converging: {}", h.title),
                    description: format!("{} findings validate this hypothesis", count),
                    dedup_key: h.id.to_string(),
                    details: json!({"hypothesisId": h.id, "validations": count}),
                })
            })
            .collect();
        ctx.unrecorded(findings)
    }
}

/// Every `contradicts` edge.
pub struct Contradiction;

impl Evaluator for Contradiction {
    fn pattern_type(&self) -> PatternType {
        PatternType::Contradiction
    }

    fn evaluate(&self, ctx: &ScanContext<'_>) -> Result<Vec<Finding>, PatternError> {
        let edges = ctx.graph.edges(ctx.workspace_id, "contradicts")?;
        if edges.is_empty() {
            return Ok(Vec::new());
        }
        let nodes = ctx.graph.all_nodes(ctx.workspace_id)?;
        let titles = titles(&nodes);
        let label = |id: &Uuid| titles.get(id).map(|t| t.to_string()).unwrap_or_else(|| id.to_string());

        let findings = edges
            .iter()
            .map(|edge| {
                let edge_key = format!("{}->{}", edge.from_id, edge.to_id);
                Finding {
                    pattern_type: PatternType::Contradiction,
                    severity: Severity::High,
                    title: format!(
                        "Contradiction: {} vs {}",
                        label(&edge.from_id),
                        label(&edge.to_id)
                    ),
                    description: "Two nodes in the research graph contradict each other"
                        .to_string(),
                    dedup_key: edge_key.clone(),
                    details: json!({
                        "edgeKey": edge_key,
                        "fromId": edge.from_id,
                        "toId": edge.to_id,
                    }),
                }
            })
            .collect();
        ctx.unrecorded(findings)
    }
}

/// Open-question tasks untouched for N days.
pub struct Staleness;

impl Evaluator for Staleness {
    fn pattern_type(&self) -> PatternType {
        PatternType::Staleness
    }

    fn evaluate(&self, ctx: &ScanContext<'_>) -> Result<Vec<Finding>, PatternError> {
        let cutoff = ctx.now.minus_days(ctx.config.staleness_days);
        let tasks = ctx
            .tasks
            .list_stale_tagged(ctx.workspace_id, OPEN_QUESTION_TAG, cutoff)?;

        let findings = tasks
            .iter()
            .map(|task| {
                let idle = ctx.age_days(task.updated_at);
                Finding {
                    pattern_type: PatternType::Staleness,
                    severity: Severity::Low,
                    title: format!("Stale open question: {}", task.title),
                    description: format!("No progress in {} days", idle),
                    dedup_key: task.id.to_string(),
                    details: json!({"taskId": task.id, "spaceId": task.space_id, "daysIdle": idle}),
                }
            })
            .collect();
        ctx.unrecorded(findings)
    }
}

/// Two domains joined by at least N edges.
pub struct CrossDomain;

impl Evaluator for CrossDomain {
    fn pattern_type(&self) -> PatternType {
        PatternType::CrossDomain
    }

    fn evaluate(&self, ctx: &ScanContext<'_>) -> Result<Vec<Finding>, PatternError> {
        let nodes = ctx.graph.all_nodes(ctx.workspace_id)?;
        let domains: HashMap<Uuid, &str> = nodes
            .iter()
            .filter_map(|n| match n.domain.as_deref() {
                Some(d) if !d.trim().is_empty() => Some((n.id, d)),
                _ => None,
            })
            .collect();

        let mut links: BTreeMap<(String, String), usize> = BTreeMap::new();
        for edge in ctx.graph.all_edges(ctx.workspace_id)? {
            let (Some(a), Some(b)) = (domains.get(&edge.from_id), domains.get(&edge.to_id)) else {
                continue;
            };
            if a == b {
                continue;
            }
            let pair = if a < b {
                (a.to_string(), b.to_string())
            } else {
                (b.to_string(), a.to_string())
            };
            *links.entry(pair).or_insert(0) += 1;
        }

        let min = ctx.config.cross_domain_min_links.max(1);
        let findings = links
            .into_iter()
            .filter(|(_, count)| *count >= min)
            .map(|((a, b), count)| {
                let pair = format!("{}|{}", a, b);
                Finding {
                    pattern_type: PatternType::CrossDomain,
                    severity: Severity::Low,
                    title: format!("Cross-domain link: {} and {}", a, b),
                    description: format!("{} connections between the two domains", count),
                    dedup_key: pair.clone(),
                    details: json!({"domainPair": pair, "domains": [a, b], "links": count}),
                }
            })
            .collect();
        ctx.unrecorded(findings)
    }
}

/// Hypotheses older than N days with no incoming `tests` edge.
pub struct UntestedImplication;

impl Evaluator for UntestedImplication {
    fn pattern_type(&self) -> PatternType {
        PatternType::UntestedImplication
    }

    fn evaluate(&self, ctx: &ScanContext<'_>) -> Result<Vec<Finding>, PatternError> {
        let hypotheses = ctx.graph.nodes(ctx.workspace_id, "hypothesis")?;
        let tested: HashSet<Uuid> = ctx
            .graph
            .edges(ctx.workspace_id, "tests")?
            .into_iter()
            .map(|e| e.to_id)
            .collect();
        let cutoff = ctx.now.minus_days(ctx.config.untested_after_days);

        let findings = hypotheses
            .iter()
            .filter(|h| h.created_at < cutoff && !tested.contains(&h.id))
            .map(|h| {
                let age = ctx.age_days(h.created_at);
                Finding {
                    pattern_type: PatternType::UntestedImplication,
                    severity: Severity::Medium,
                    title: format!("Untested hypothesis: {}", h.title),
                    description: format!("No experiment has tested this in {} days", age),
                    dedup_key: h.id.to_string(),
                    details: json!({"hypothesisId": h.id, "ageDays": age}),
                }
            })
            .collect();
        ctx.unrecorded(findings)
    }
}

/// Spaces whose inbox holds more than N open tasks.
pub struct IntakeGate;

impl Evaluator for IntakeGate {
    fn pattern_type(&self) -> PatternType {
        PatternType::IntakeGate
    }

    fn evaluate(&self, ctx: &ScanContext<'_>) -> Result<Vec<Finding>, PatternError> {
        let limit = ctx.config.intake_max_inbox;
        let findings = ctx
            .tasks
            .inbox_counts(ctx.workspace_id)?
            .into_iter()
            .filter(|(_, count)| *count > limit)
            .map(|(space_id, count)| Finding {
                pattern_type: PatternType::IntakeGate,
                severity: Severity::Medium,
                title: format!("Inbox overloaded: {} items", count),
                description: format!("Inbox holds {} open items, limit is {}", count, limit),
                dedup_key: space_id.to_string(),
                details: json!({"spaceId": space_id, "inboxCount": count, "limit": limit}),
            })
            .collect();
        ctx.unrecorded(findings)
    }
}

/// Claims with no incoming `supports` or `validates` edge.
pub struct EvidenceGap;

impl Evaluator for EvidenceGap {
    fn pattern_type(&self) -> PatternType {
        PatternType::EvidenceGap
    }

    fn evaluate(&self, ctx: &ScanContext<'_>) -> Result<Vec<Finding>, PatternError> {
        let claims = ctx.graph.nodes(ctx.workspace_id, "claim")?;
        if claims.is_empty() {
            return Ok(Vec::new());
        }
        let mut backed: HashSet<Uuid> = HashSet::new();
        for relation in ["supports", "validates"] {
            backed.extend(
                ctx.graph
                    .edges(ctx.workspace_id, relation)?
                    .into_iter()
                    .map(|e| e.to_id),
            );
        }

        let findings = claims
            .iter()
            .filter(|c| !backed.contains(&c.id))
            .map(|c| Finding {
                pattern_type: PatternType::EvidenceGap,
                severity: Severity::Low,
                title: format!("Unsupported claim: {}", c.title),
                description: "No evidence supports or validates this claim".to_string(),
                dedup_key: c.id.to_string(),
                details: json!({"claimId": c.id}),
            })
            .collect();
        ctx.unrecorded(findings)
    }
}

/// Experiments that failed to reproduce.
pub struct ReproductionFailure;

impl Evaluator for ReproductionFailure {
    fn pattern_type(&self) -> PatternType {
        PatternType::ReproductionFailure
    }

    fn evaluate(&self, ctx: &ScanContext<'_>) -> Result<Vec<Finding>, PatternError> {
        let failures = incoming_counts(&ctx.graph.edges(ctx.workspace_id, "fails_to_reproduce")?);
        if failures.is_empty() {
            return Ok(Vec::new());
        }
        let experiments = ctx.graph.nodes(ctx.workspace_id, "experiment")?;

        let findings = experiments
            .iter()
            .filter_map(|e| {
                let count = *failures.get(&e.id)?;
                Some(Finding {
                    pattern_type: PatternType::ReproductionFailure,
                    severity: Severity::High,
                    title: format!("Failed to reproduce: {}", e.title),
                    description: format!("{} reproduction attempts failed", count),
                    dedup_key: e.id.to_string(),
                    details: json!({"experimentId": e.id, "failures": count}),
                })
            })
            .collect();
        ctx.unrecorded(findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use folio_storage::{Database, DetectionRecord, ResearchRepository, Task, WorkspaceRepository};

    use crate::graph::SqliteGraph;

    struct Fixture {
        db: Arc<Database>,
        ws: Uuid,
        research: ResearchRepository,
        graph: SqliteGraph,
        tasks: TaskRepository,
        detections: DetectionRepository,
        config: PatternConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let db = Arc::new(Database::in_memory().unwrap());
            let ws = WorkspaceRepository::new(Arc::clone(&db))
                .create_workspace("Lab", None)
                .unwrap()
                .id;
            Self {
                research: ResearchRepository::new(Arc::clone(&db)),
                graph: SqliteGraph::new(Arc::clone(&db)),
                tasks: TaskRepository::new(Arc::clone(&db)),
                detections: DetectionRepository::new(Arc::clone(&db)),
                config: PatternConfig::default(),
                db,
                ws,
            }
        }

        fn ctx(&self) -> ScanContext<'_> {
            ScanContext {
                workspace_id: self.ws,
                now: Timestamp::now(),
                config: &self.config,
                graph: &self.graph,
                tasks: &self.tasks,
                detections: &self.detections,
            }
        }

        fn node(&self, kind: &str, title: &str, domain: Option<&str>) -> ResearchNode {
            let mut node = ResearchNode::new(self.ws, kind, title);
            node.domain = domain.map(str::to_string);
            self.research.insert_node(&node).unwrap();
            node
        }

        fn link(&self, from: &ResearchNode, to: &ResearchNode, relation: &str) {
            self.research.link(self.ws, from.id, to.id, relation).unwrap();
        }

        fn record(&self, finding: &Finding) {
            let now = Timestamp::now();
            self.detections
                .insert(&DetectionRecord {
                    id: Uuid::new_v4(),
                    workspace_id: self.ws,
                    pattern_type: finding.pattern_type.as_str().to_string(),
                    severity: finding.severity.as_str().to_string(),
                    status: "detected".to_string(),
                    title: finding.title.clone(),
                    description: finding.description.clone(),
                    dedup_key: finding.dedup_key.clone(),
                    details: finding.details.clone(),
                    action_taken: None,
                    detected_at: now,
                    updated_at: now,
                })
                .unwrap();
        }
    }

    #[test]
    fn test_convergence_threshold_and_dedup() {
        let fx = Fixture::new();
        let hypothesis = fx.node("hypothesis", "Caching halves latency", None);
        for i in 0..2 {
            let f = fx.node("finding", &format!("run {}", i), None);
            fx.link(&f, &hypothesis, "validates");
        }
        assert!(Convergence.evaluate(&fx.ctx()).unwrap().is_empty());

        let third = fx.node("finding", "run 2", None);
        fx.link(&third, &hypothesis, "validates");
        let findings = Convergence.evaluate(&fx.ctx()).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].details["hypothesisId"], hypothesis.id.to_string());
        assert_eq!(findings[0].details["validations"], 3);

        fx.record(&findings[0]);
        assert!(Convergence.evaluate(&fx.ctx()).unwrap().is_empty());
    }

    #[test]
    fn test_contradiction_edge_key() {
        let fx = Fixture::new();
        let a = fx.node("claim", "Latency is IO bound", None);
        let b = fx.node("claim", "Latency is CPU bound", None);
        fx.link(&a, &b, "contradicts");

        let findings = Contradiction.evaluate(&fx.ctx()).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].dedup_key, format!("{}->{}", a.id, b.id));
        assert_eq!(findings[0].details["edgeKey"], findings[0].dedup_key);
        assert!(findings[0].title.contains("IO bound"));
        assert_eq!(findings[0].severity, Severity::High);
    }

    #[test]
    fn test_staleness_only_old_open_questions() {
        let fx = Fixture::new();
        let space = WorkspaceRepository::new(Arc::clone(&fx.db))
            .create_space(fx.ws, "Research")
            .unwrap();
        let mut old = Task::new(fx.ws, space.id, "Why does GC spike?");
        old.tags = vec![OPEN_QUESTION_TAG.to_string()];
        old.updated_at = Timestamp::now().minus_days(30);
        fx.tasks.insert(&old).unwrap();

        let mut recent = Task::new(fx.ws, space.id, "Which allocator?");
        recent.tags = vec![OPEN_QUESTION_TAG.to_string()];
        fx.tasks.insert(&recent).unwrap();

        let mut untagged = Task::new(fx.ws, space.id, "Buy coffee");
        untagged.updated_at = Timestamp::now().minus_days(30);
        fx.tasks.insert(&untagged).unwrap();

        let findings = Staleness.evaluate(&fx.ctx()).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].details["taskId"], old.id.to_string());
        assert_eq!(findings[0].details["daysIdle"], 30);
    }

    #[test]
    fn test_cross_domain_sorted_pair() {
        let fx = Fixture::new();
        let bio = fx.node("finding", "Enzyme kinetics", Some("biology"));
        let cs = fx.node("finding", "Queue theory", Some("computing"));
        let cs2 = fx.node("finding", "Backpressure", Some("computing"));
        fx.link(&cs, &bio, "relates_to");
        assert!(CrossDomain.evaluate(&fx.ctx()).unwrap().is_empty());

        fx.link(&bio, &cs2, "supports");
        fx.link(&cs, &cs2, "supports");
        let findings = CrossDomain.evaluate(&fx.ctx()).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].dedup_key, "biology|computing");
        assert_eq!(findings[0].details["links"], 2);
    }

    #[test]
    fn test_untested_implication_respects_age_and_tests() {
        let fx = Fixture::new();
        let mut old = ResearchNode::new(fx.ws, "hypothesis", "Old idea");
        old.created_at = Timestamp::now().minus_days(10);
        fx.research.insert_node(&old).unwrap();
        let mut tested = ResearchNode::new(fx.ws, "hypothesis", "Tested idea");
        tested.created_at = Timestamp::now().minus_days(10);
        fx.research.insert_node(&tested).unwrap();
        fx.node("hypothesis", "Fresh idea", None);
        let experiment = fx.node("experiment", "A/B run", None);
        fx.link(&experiment, &tested, "tests");

        let findings = UntestedImplication.evaluate(&fx.ctx()).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].details["hypothesisId"], old.id.to_string());
    }

    #[test]
    fn test_intake_gate_above_limit() {
        let mut fx = Fixture::new();
        fx.config.intake_max_inbox = 2;
        let space = WorkspaceRepository::new(Arc::clone(&fx.db))
            .create_space(fx.ws, "Inbox heavy")
            .unwrap();
        for i in 0..2 {
            let mut task = Task::new(fx.ws, space.id, &format!("item {}", i));
            task.bucket = Some("inbox".to_string());
            fx.tasks.insert(&task).unwrap();
        }
        assert!(IntakeGate.evaluate(&fx.ctx()).unwrap().is_empty());

        let mut task = Task::new(fx.ws, space.id, "item 3");
        task.bucket = Some("inbox".to_string());
        fx.tasks.insert(&task).unwrap();
        let findings = IntakeGate.evaluate(&fx.ctx()).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].details["spaceId"], space.id.to_string());
        assert_eq!(findings[0].details["inboxCount"], 3);
    }

    #[test]
    fn test_evidence_gap_and_reproduction_failure() {
        let fx = Fixture::new();
        let lonely = fx.node("claim", "Unbacked", None);
        let backed = fx.node("claim", "Backed", None);
        let source = fx.node("source", "Paper", None);
        fx.link(&source, &backed, "supports");

        let gaps = EvidenceGap.evaluate(&fx.ctx()).unwrap();
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].details["claimId"], lonely.id.to_string());

        let experiment = fx.node("experiment", "Replication", None);
        let attempt = fx.node("finding", "Second lab", None);
        fx.link(&attempt, &experiment, "fails_to_reproduce");
        let failures = ReproductionFailure.evaluate(&fx.ctx()).unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].details["experimentId"], experiment.id.to_string());
    }

    #[test]
    fn test_default_evaluators_cover_every_pattern() {
        let types: Vec<PatternType> = default_evaluators().iter().map(|e| e.pattern_type()).collect();
        assert_eq!(types, PatternType::ALL.to_vec());
    }
}
