//! Worker-side dispatch table: task type → handler, run under a deadline.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use switchyard_core::{Result, SwitchyardError};

use crate::task::Task;

/// Executes one task type.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> Result<()>;

    /// Per-type deadline; `None` uses the dispatcher default.
    fn deadline(&self) -> Option<Duration> {
        None
    }
}

/// Registry of task handlers.
pub struct Dispatcher {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    default_deadline: Duration,
}

impl Dispatcher {
    pub fn new(default_deadline: Duration) -> Self {
        Self {
            handlers: HashMap::new(),
            default_deadline,
        }
    }

    /// Register a handler. A second registration for the same type replaces the first.
    pub fn register(&mut self, task_type: &str, handler: Arc<dyn TaskHandler>) {
        if self.handlers.insert(task_type.to_string(), handler).is_some() {
            tracing::warn!("⚠️ Task handler for '{}' registered twice, keeping the last", task_type);
        } else {
            tracing::info!("🔧 Task handler registered: {}", task_type);
        }
    }

    /// Registered task types, sorted.
    pub fn task_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Run the handler for `task` under its deadline.
    pub async fn dispatch(&self, task: &Task) -> Result<()> {
        let handler = self
            .handlers
            .get(&task.task_type)
            .ok_or_else(|| SwitchyardError::UnknownTaskType(task.task_type.clone()))?;

        let deadline = handler.deadline().unwrap_or(self.default_deadline);
        match tokio::time::timeout(deadline, handler.handle(task)).await {
            Ok(result) => result,
            Err(_) => Err(SwitchyardError::Timeout { duration: deadline }),
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(3_600))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use switchyard_core::OrgId;

    use crate::task::Priority;

    struct Counting(AtomicUsize);

    #[async_trait]
    impl TaskHandler for Counting {
        async fn handle(&self, _task: &Task) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Sleepy;

    #[async_trait]
    impl TaskHandler for Sleepy {
        async fn handle(&self, _task: &Task) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        }

        fn deadline(&self) -> Option<Duration> {
            Some(Duration::from_millis(20))
        }
    }

    fn task(task_type: &str) -> Task {
        Task::new(task_type, OrgId(1), Priority::Default, "{}".into())
    }

    #[tokio::test]
    async fn test_dispatch_to_registered_handler() {
        let counter = Arc::new(Counting(AtomicUsize::new(0)));
        let mut dispatcher = Dispatcher::default();
        dispatcher.register("count", counter.clone());

        dispatcher.dispatch(&task("count")).await.unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_task_type_is_error() {
        let dispatcher = Dispatcher::default();
        let err = dispatcher.dispatch(&task("mystery")).await.unwrap_err();
        assert!(matches!(err, SwitchyardError::UnknownTaskType(t) if t == "mystery"));
    }

    #[tokio::test]
    async fn test_deadline_enforced() {
        let mut dispatcher = Dispatcher::default();
        dispatcher.register("sleepy", Arc::new(Sleepy));
        let err = dispatcher.dispatch(&task("sleepy")).await.unwrap_err();
        assert!(matches!(err, SwitchyardError::Timeout { .. }));
    }

    #[test]
    fn test_reregistration_replaces() {
        let first = Arc::new(Counting(AtomicUsize::new(0)));
        let second = Arc::new(Counting(AtomicUsize::new(0)));
        let mut dispatcher = Dispatcher::default();
        dispatcher.register("count", first);
        dispatcher.register("count", second);
        assert_eq!(dispatcher.task_types(), vec!["count"]);
    }
}
