//! Stage DAG execution.
//!
//! # Responsibilities
//! - Order stages so every dependency completes first
//! - Turn direct successors of a vetoing stage into no-ops
//! - Stop at the first stage error
//!
//! # Design Decisions
//! - Kahn's algorithm with insertion order as the tie-break, so a chain runs
//!   exactly as declared
//! - Stages run one at a time; they all need `&mut AppBuilder`

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use thiserror::Error;

use crate::error::BoxError;
use crate::pipeline::builder::AppBuilder;
use crate::pipeline::hooks::StageOutcome;

pub type StageFuture<'a> = BoxFuture<'a, Result<StageOutcome, BoxError>>;

type StageAction = Arc<dyn for<'a> Fn(&'a mut AppBuilder) -> StageFuture<'a> + Send + Sync>;

/// Errors from building or running a pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Duplicate stage '{0}'")]
    DuplicateStage(String),

    #[error("Stage '{stage}' depends on unknown stage '{dependency}'")]
    UnknownDependency { stage: String, dependency: String },

    #[error("Dependency cycle between stages: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("Stage '{stage}' failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: BoxError,
    },
}

impl PipelineError {
    /// The error a failing stage returned, unwrapped.
    pub fn into_stage_source(self) -> Option<BoxError> {
        match self {
            PipelineError::Stage { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// One named pipeline step.
#[derive(Clone)]
pub struct Stage {
    name: String,
    depends_on: Vec<String>,
    skippable: bool,
    action: StageAction,
}

impl Stage {
    /// A stage that always runs its action.
    pub fn new<F>(name: impl Into<String>, action: F) -> Self
    where
        F: for<'a> Fn(&'a mut AppBuilder) -> StageFuture<'a> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            depends_on: Vec::new(),
            skippable: false,
            action: Arc::new(action),
        }
    }

    pub fn after(mut self, dependency: impl Into<String>) -> Self {
        self.depends_on.push(dependency.into());
        self
    }

    /// Let a vetoing dependency turn this stage into a no-op.
    pub fn skippable(mut self) -> Self {
        self.skippable = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    pub fn is_skippable(&self) -> bool {
        self.skippable
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("depends_on", &self.depends_on)
            .field("skippable", &self.skippable)
            .finish()
    }
}

/// What happened during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// Stages whose action ran, in execution order.
    pub executed: Vec<String>,
    /// Stages completed as no-ops because a dependency vetoed.
    pub skipped: Vec<String>,
}

impl PipelineReport {
    pub fn completed(&self, stage: &str) -> bool {
        self.executed.iter().chain(&self.skipped).any(|s| s == stage)
    }

    pub fn was_skipped(&self, stage: &str) -> bool {
        self.skipped.iter().any(|s| s == stage)
    }
}

/// A DAG of stages.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Append a stage that depends on the previously added one.
    pub fn then(self, stage: Stage) -> Self {
        match self.stages.last().map(|s| s.name.clone()) {
            Some(previous) => self.stage(stage.after(previous)),
            None => self.stage(stage),
        }
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Execution order of the stages.
    pub fn order(&self) -> Result<Vec<usize>, PipelineError> {
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(self.stages.len());
        for (i, stage) in self.stages.iter().enumerate() {
            if index.insert(stage.name.as_str(), i).is_some() {
                return Err(PipelineError::DuplicateStage(stage.name.clone()));
            }
        }

        let mut indegree = vec![0usize; self.stages.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.stages.len()];
        for (i, stage) in self.stages.iter().enumerate() {
            for dependency in &stage.depends_on {
                let Some(&d) = index.get(dependency.as_str()) else {
                    return Err(PipelineError::UnknownDependency {
                        stage: stage.name.clone(),
                        dependency: dependency.clone(),
                    });
                };
                indegree[i] += 1;
                dependents[d].push(i);
            }
        }

        let mut ready: VecDeque<usize> = (0..self.stages.len()).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(self.stages.len());
        while let Some(i) = ready.pop_front() {
            order.push(i);
            for &next in &dependents[i] {
                indegree[next] -= 1;
                if indegree[next] == 0 {
                    ready.push_back(next);
                }
            }
        }

        if order.len() != self.stages.len() {
            let stuck = (0..self.stages.len())
                .filter(|&i| indegree[i] > 0)
                .map(|i| self.stages[i].name.clone())
                .collect();
            return Err(PipelineError::Cycle(stuck));
        }
        Ok(order)
    }

    /// Run every stage against `app`.
    pub async fn run(&self, app: &mut AppBuilder) -> Result<PipelineReport, PipelineError> {
        let order = self.order()?;
        let mut outcomes: HashMap<&str, StageOutcome> = HashMap::with_capacity(order.len());
        let mut report = PipelineReport::default();

        for i in order {
            let stage = &self.stages[i];
            let vetoed = stage.skippable
                && stage
                    .depends_on
                    .iter()
                    .any(|d| outcomes.get(d.as_str()) == Some(&StageOutcome::Skip));

            if vetoed {
                tracing::debug!(stage = %stage.name, "Stage skipped");
                outcomes.insert(stage.name.as_str(), StageOutcome::Continue);
                report.skipped.push(stage.name.clone());
                continue;
            }

            tracing::trace!(stage = %stage.name, "Running stage");
            let outcome = (stage.action)(&mut *app).await.map_err(|source| PipelineError::Stage {
                stage: stage.name.clone(),
                source,
            })?;
            outcomes.insert(stage.name.as_str(), outcome);
            report.executed.push(stage.name.clone());
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::builder::tests::test_builder;
    use std::sync::Mutex;

    fn recording(name: &str, log: &Arc<Mutex<Vec<String>>>, outcome: StageOutcome) -> Stage {
        let log = log.clone();
        let label = name.to_string();
        Stage::new(name, move |_app| {
            log.lock().unwrap().push(label.clone());
            Box::pin(async move { Ok(outcome) })
        })
    }

    #[tokio::test]
    async fn test_chain_runs_in_declared_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new()
            .then(recording("a", &log, StageOutcome::Continue))
            .then(recording("b", &log, StageOutcome::Continue))
            .then(recording("c", &log, StageOutcome::Continue));

        let report = pipeline.run(&mut test_builder()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(report.executed, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_veto_skips_only_direct_successor() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new()
            .then(recording("configure-cache", &log, StageOutcome::Skip))
            .then(recording("cache", &log, StageOutcome::Continue).skippable())
            .then(recording("configure-router", &log, StageOutcome::Continue))
            .then(recording("router", &log, StageOutcome::Continue).skippable())
            .then(recording("ready", &log, StageOutcome::Continue));

        let report = pipeline.run(&mut test_builder()).await.unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["configure-cache", "configure-router", "router", "ready"]
        );
        assert!(report.was_skipped("cache"));
        assert!(report.completed("cache"));
        assert!(report.completed("ready"));
    }

    #[tokio::test]
    async fn test_veto_ignored_by_non_skippable_successor() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new()
            .then(recording("a", &log, StageOutcome::Skip))
            .then(recording("b", &log, StageOutcome::Continue));
        pipeline.run(&mut test_builder()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_dag_waits_for_every_dependency() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new()
            .stage(recording("join", &log, StageOutcome::Continue).after("left").after("right"))
            .stage(recording("left", &log, StageOutcome::Continue))
            .stage(recording("right", &log, StageOutcome::Continue).after("left"));

        pipeline.run(&mut test_builder()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["left", "right", "join"]);
    }

    #[tokio::test]
    async fn test_error_stops_pipeline_with_original_cause() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new()
            .then(recording("a", &log, StageOutcome::Continue))
            .then(Stage::new("b", |_app| Box::pin(async { Err::<StageOutcome, BoxError>("bind failed".into()) })))
            .then(recording("c", &log, StageOutcome::Continue));

        let err = pipeline.run(&mut test_builder()).await.unwrap_err();
        assert!(matches!(&err, PipelineError::Stage { stage, .. } if stage == "b"));
        assert_eq!(err.into_stage_source().unwrap().to_string(), "bind failed");
        assert_eq!(*log.lock().unwrap(), vec!["a"]);
    }

    #[test]
    fn test_order_rejects_cycles_and_unknown_dependencies() {
        let noop = |name: &str| Stage::new(name, |_app| Box::pin(async { Ok(StageOutcome::Continue) }));

        let cyclic = Pipeline::new()
            .stage(noop("a").after("b"))
            .stage(noop("b").after("a"))
            .stage(noop("c"));
        assert!(matches!(cyclic.order(), Err(PipelineError::Cycle(names)) if names == vec!["a", "b"]));

        let dangling = Pipeline::new().stage(noop("a").after("missing"));
        assert!(matches!(
            dangling.order(),
            Err(PipelineError::UnknownDependency { dependency, .. }) if dependency == "missing"
        ));

        let duplicate = Pipeline::new().stage(noop("a")).stage(noop("a"));
        assert!(matches!(duplicate.order(), Err(PipelineError::DuplicateStage(_))));
    }
}
