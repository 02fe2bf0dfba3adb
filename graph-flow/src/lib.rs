pub mod context;
pub mod error;
pub mod graph;
pub mod runner;
pub mod storage;
pub mod task;

// Re-export commonly used types
pub use context::Context;
pub use error::{GraphError, Result};
pub use graph::{ExecutionResult, ExecutionStatus, Graph, GraphBuilder};
pub use runner::FlowRunner;
pub use storage::{InMemorySessionStorage, Session, SessionStorage};
pub use task::{NextAction, Task, TaskResult};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;

    /// Appends its id to the `trail` list and returns a fixed action.
    struct StepTask {
        id: String,
        next: NextAction,
    }

    #[async_trait]
    impl Task for StepTask {
        fn id(&self) -> &str {
            &self.id
        }

        async fn run(&self, context: Context) -> Result<TaskResult> {
            let mut trail: Vec<String> = context.get("trail").await.unwrap_or_default();
            trail.push(self.id.clone());
            context.set("trail", trail).await?;
            Ok(TaskResult::new_with_status(
                Some(format!("{} done", self.id)),
                self.next.clone(),
                Some(format!("finished {}", self.id)),
            ))
        }
    }

    struct FailingTask;

    #[async_trait]
    impl Task for FailingTask {
        async fn run(&self, _context: Context) -> Result<TaskResult> {
            Err(GraphError::TaskExecutionFailed("boom".into()))
        }
    }

    fn step(id: &str, next: NextAction) -> Arc<dyn Task> {
        Arc::new(StepTask {
            id: id.to_string(),
            next,
        })
    }

    async fn session_for(storage: &InMemorySessionStorage, start: &str) -> String {
        let session = Session::new_from_task("s1".to_string(), "test", start);
        storage.save(session).await.unwrap();
        "s1".to_string()
    }

    #[tokio::test]
    async fn continue_and_execute_chains_to_the_end() {
        let graph = GraphBuilder::new("chain")
            .add_task(step("a", NextAction::ContinueAndExecute))
            .add_task(step("b", NextAction::ContinueAndExecute))
            .add_task(step("c", NextAction::End))
            .add_edge("a", "b")
            .add_edge("b", "c")
            .build();
        assert_eq!(graph.start_task_id(), Some("a"));

        let storage = Arc::new(InMemorySessionStorage::new());
        let sid = session_for(&storage, "a").await;
        let runner = FlowRunner::new(Arc::new(graph), storage.clone());

        let result = runner.run(&sid).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.response.as_deref(), Some("c done"));

        let session = storage.get(&sid).await.unwrap().unwrap();
        let trail: Vec<String> = session.context.get("trail").await.unwrap();
        assert_eq!(trail, vec!["a", "b", "c"]);
        assert_eq!(session.status_message.as_deref(), Some("finished c"));
    }

    #[tokio::test]
    async fn run_to_completion_steps_through_continue() {
        let graph = GraphBuilder::new("stepwise")
            .add_task(step("a", NextAction::Continue))
            .add_task(step("b", NextAction::End))
            .add_edge("a", "b")
            .build();
        let storage = Arc::new(InMemorySessionStorage::new());
        let sid = session_for(&storage, "a").await;
        let runner = FlowRunner::new(Arc::new(graph), storage.clone());

        let result = runner.run_to_completion(&sid).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn run_to_completion_gives_up_after_step_limit() {
        let graph = GraphBuilder::new("stuck")
            .add_task(step("a", NextAction::WaitForInput))
            .build();
        let storage = Arc::new(InMemorySessionStorage::new());
        let sid = session_for(&storage, "a").await;
        let runner = FlowRunner::new(Arc::new(graph), storage).with_max_steps(3);

        let err = runner.run_to_completion(&sid).await.unwrap_err();
        assert!(matches!(err, GraphError::StepLimitExceeded(3)));
    }

    #[tokio::test]
    async fn conditional_edge_routes_on_context() {
        let graph = GraphBuilder::new("branch")
            .add_task(step("check", NextAction::ContinueAndExecute))
            .add_task(step("yes", NextAction::End))
            .add_task(step("no", NextAction::End))
            .add_conditional_edge(
                "check",
                |ctx| ctx.get_sync::<bool>("flag").unwrap_or(false),
                "yes",
                "no",
            )
            .build();
        let storage = Arc::new(InMemorySessionStorage::new());
        let sid = session_for(&storage, "check").await;
        let session = storage.get(&sid).await.unwrap().unwrap();
        session.context.set("flag", true).await.unwrap();
        storage.save(session).await.unwrap();

        let runner = FlowRunner::new(Arc::new(graph), storage);
        let result = runner.run(&sid).await.unwrap();
        assert_eq!(result.response.as_deref(), Some("yes done"));
    }

    #[tokio::test]
    async fn task_failure_propagates_and_session_is_kept() {
        let failing: Arc<dyn Task> = Arc::new(FailingTask);
        let failing_id = failing.id().to_string();
        let graph = GraphBuilder::new("failing").add_task(failing).build();
        let storage = Arc::new(InMemorySessionStorage::new());
        let sid = session_for(&storage, &failing_id).await;

        let runner = FlowRunner::new(Arc::new(graph), storage.clone());
        let err = runner.run(&sid).await.unwrap_err();
        assert!(matches!(err, GraphError::TaskExecutionFailed(_)));
        assert!(storage.get(&sid).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn missing_session_is_reported() {
        let graph = GraphBuilder::new("empty").build();
        let runner = FlowRunner::new(Arc::new(graph), Arc::new(InMemorySessionStorage::new()));
        let err = runner.run("nope").await.unwrap_err();
        assert!(matches!(err, GraphError::SessionNotFound(_)));
    }
}
