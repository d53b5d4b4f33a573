//! Task Lifecycle Coordinator.
//!
//! Resolves a session synchronously, mints a task record, registers it
//! with the broadcaster, and only then hands the actual ReAct run off to a
//! detached background worker. Per spec.md §4.1 the session must exist and
//! the `(task_id -> session_id)` broadcaster mapping must be live *before*
//! the worker starts, so a client subscribing immediately after `POST
//! /api/tasks` returns can never race a dropped first event — this was the
//! P0 ordering bug the coordinator exists to fix.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Semaphore;
use uuid::Uuid;

use sa_broadcaster::Broadcaster;
use sa_domain::config::Config;
use sa_domain::error::{Error, ErrorCode, Result};
use sa_domain::event::EventPayload;
use sa_domain::task::{Task, TaskStatus};
use sa_engine::{run_task, CancelMap, EngineServices, RunTaskOutcome, RunTaskRequest};
use sa_sessions::SessionStore;

pub struct SubmitTaskRequest {
    pub task_text: String,
    pub session_id: Option<String>,
    pub agent_preset: Option<String>,
    pub tool_preset: Option<String>,
    /// Identity of the caller, when auth middleware validated a bearer
    /// token for this request. `None` when auth is disabled.
    pub principal: Option<String>,
}

pub struct TaskCoordinator {
    sessions: Arc<SessionStore>,
    broadcaster: Arc<Broadcaster>,
    services: Arc<EngineServices>,
    cancels: Arc<CancelMap>,
    tasks: RwLock<HashMap<String, Arc<RwLock<Task>>>>,
    semaphore: Arc<Semaphore>,
    tasks_dir: PathBuf,
}

impl TaskCoordinator {
    pub fn new(
        sessions: Arc<SessionStore>,
        broadcaster: Arc<Broadcaster>,
        services: Arc<EngineServices>,
        cancels: Arc<CancelMap>,
        state_root_dir: &str,
        max_concurrent: usize,
    ) -> std::io::Result<Self> {
        let tasks_dir = PathBuf::from(state_root_dir).join("tasks");
        std::fs::create_dir_all(&tasks_dir)?;
        let mut tasks = HashMap::new();
        load_persisted(&tasks_dir, &mut tasks);
        Ok(Self {
            sessions,
            broadcaster,
            services,
            cancels,
            tasks: RwLock::new(tasks),
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            tasks_dir,
        })
    }

    /// Submit a new task. Backpressure is applied synchronously: when the
    /// global concurrency cap is already saturated this returns
    /// `Error::Busy` before anything else happens, rather than queueing
    /// silently.
    pub fn submit(&self, config: &Config, req: SubmitTaskRequest) -> Result<Arc<RwLock<Task>>> {
        let permit = self
            .semaphore
            .clone()
            .try_acquire_owned()
            .map_err(|_| Error::Busy("max concurrent tasks reached".into()))?;

        let session = self.sessions.get_or_create(req.session_id.as_deref())?;
        let session_id = session.read().session_id.clone();

        let agent = req
            .agent_preset
            .as_deref()
            .and_then(|name| config.agents.get(name));
        let max_iterations = agent
            .map(|a| a.limits.max_iterations)
            .unwrap_or(config.task_defaults.iteration_cap);
        let timeout_ms = agent
            .map(|a| a.limits.max_duration_ms)
            .unwrap_or(config.task_defaults.task_timeout_secs * 1000);
        let tool_preset = req
            .tool_preset
            .unwrap_or_else(|| config.task_defaults.tool_preset.clone());
        let tool_concurrency = config.task_defaults.tool_concurrency;

        let task_id = format!("t-{}", Uuid::new_v4());
        let mut new_task = Task::new(task_id.clone(), session_id.clone(), max_iterations);
        new_task.principal = req.principal.clone();
        let task = Arc::new(RwLock::new(new_task));
        self.tasks.write().insert(task_id.clone(), task.clone());

        let cancel = self.cancels.register(&task_id);
        self.broadcaster.register_task(&task_id, &session_id);
        persist_to(&self.tasks_dir, &task.read());

        let worker_task = task.clone();
        let worker_services = self.services.clone();
        let worker_broadcaster = self.broadcaster.clone();
        let worker_cancels = self.cancels.clone();
        let tasks_dir = self.tasks_dir.clone();
        let spawn_task_id = task_id.clone();
        let spawn_session_id = session_id.clone();
        let task_text = req.task_text;

        tokio::spawn(async move {
            {
                let mut t = worker_task.write();
                t.transition(TaskStatus::Running, None);
            }
            persist_to(&tasks_dir, &worker_task.read());

            let progress = tokio::spawn(track_progress(
                worker_broadcaster.clone(),
                worker_task.clone(),
                spawn_task_id.clone(),
                spawn_session_id.clone(),
                tasks_dir.clone(),
            ));

            let run = run_task(
                worker_services,
                RunTaskRequest {
                    task_id: spawn_task_id.clone(),
                    session_id: spawn_session_id.clone(),
                    parent_task_id: None,
                    task_text,
                    max_iterations,
                    token_cap: None,
                    tool_preset,
                    tool_concurrency,
                    cancel,
                },
            );

            let outcome = if timeout_ms > 0 {
                match tokio::time::timeout(std::time::Duration::from_millis(timeout_ms), run).await
                {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        worker_cancels.cancel(&spawn_task_id);
                        let outcome = RunTaskOutcome {
                            status: TaskStatus::TimedOut,
                            result: None,
                            usage: Default::default(),
                            total_iterations: worker_task.read().iteration,
                            terminal_reason: Some("task exceeded its wall-clock timeout".into()),
                            error_code: Some(ErrorCode::TimedOut),
                        };
                        // `run` was already dropped by `timeout`, so nothing inside
                        // it is left to publish a terminal event for this task —
                        // SSE subscribers would otherwise see nothing but silence.
                        worker_broadcaster.publish(
                            &spawn_task_id,
                            None,
                            EventPayload::Error {
                                message: outcome.terminal_reason.clone().unwrap_or_default(),
                                fatal: true,
                                iteration: None,
                                phase: None,
                            },
                        );
                        worker_broadcaster.publish(
                            &spawn_task_id,
                            None,
                            EventPayload::TaskComplete {
                                status: "timed_out".to_string(),
                                result: None,
                                usage: outcome.usage.clone(),
                                total_iterations: outcome.total_iterations,
                            },
                        );
                        outcome
                    }
                }
            } else {
                run.await
            };

            worker_broadcaster.unregister_task(&spawn_task_id);
            worker_cancels.remove(&spawn_task_id);
            progress.abort();

            {
                let mut t = worker_task.write();
                t.usage = outcome.usage;
                t.iteration = outcome.total_iterations;
                t.result = outcome.result;
                t.error_code = outcome.error_code;
                t.transition(outcome.status, outcome.terminal_reason);
            }
            persist_to(&tasks_dir, &worker_task.read());
            drop(permit);
        });

        Ok(task)
    }

    pub fn get(&self, task_id: &str) -> Option<Arc<RwLock<Task>>> {
        self.tasks.read().get(task_id).cloned()
    }

    /// Request cancellation. Idempotent on a terminal task: returns the
    /// `Conflict` error so the caller can report `409 {reason:"terminal"}`
    /// rather than silently no-op-ing.
    pub fn cancel(&self, task_id: &str) -> Result<()> {
        let task = self
            .get(task_id)
            .ok_or_else(|| Error::NotFound(format!("task {task_id}")))?;
        if task.read().status.is_terminal() {
            return Err(Error::Conflict("terminal".into()));
        }
        self.cancels.cancel(task_id);
        Ok(())
    }
}

/// Tracks a running task's progress by subscribing to its session's event
/// stream and filtering for this task's own events. `sa_engine::run_task`
/// has no progress callback of its own — it only returns a final outcome —
/// so this is how the coordinator keeps `GET /api/tasks/{id}` accurate
/// while a task is still in flight.
async fn track_progress(
    broadcaster: Arc<Broadcaster>,
    task: Arc<RwLock<Task>>,
    task_id: String,
    session_id: String,
    tasks_dir: PathBuf,
) {
    let sub = broadcaster.subscribe(&session_id, 0);
    for event in &sub.replay {
        if event.task_id == task_id {
            apply_progress(&task, &event.payload);
        }
    }
    loop {
        match sub.recv().await {
            Some(event) if event.task_id == task_id => {
                let complete = matches!(event.payload, EventPayload::TaskComplete { .. });
                apply_progress(&task, &event.payload);
                persist_to(&tasks_dir, &task.read());
                if complete {
                    return;
                }
            }
            Some(_) => continue,
            None => return,
        }
    }
}

fn apply_progress(task: &Arc<RwLock<Task>>, payload: &EventPayload) {
    let mut t = task.write();
    match payload {
        EventPayload::IterationStart { iteration } => {
            t.iteration = *iteration;
        }
        EventPayload::IterationComplete { iteration, usage, .. } => {
            t.iteration = *iteration;
            t.usage += usage.clone();
        }
        _ => {}
    }
}

fn persist_to(dir: &std::path::Path, task: &Task) {
    let path = dir.join(format!("{}.json", task.task_id));
    match serde_json::to_string(task) {
        Ok(json) => {
            if let Err(e) = std::fs::write(&path, json) {
                tracing::error!(task_id = %task.task_id, error = %e, "failed to persist task record");
            }
        }
        Err(e) => {
            tracing::error!(task_id = %task.task_id, error = %e, "failed to serialize task record");
        }
    }
}

fn load_persisted(dir: &std::path::Path, tasks: &mut HashMap<String, Arc<RwLock<Task>>>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Ok(raw) = std::fs::read_to_string(&path) else {
            continue;
        };
        match serde_json::from_str::<Task>(&raw) {
            Ok(mut task) => {
                // A task still `pending`/`running` in a snapshot left over from
                // a previous process is not resumed — nothing is driving it
                // forward anymore, so leaving it as-is would strand it as
                // perpetually in-flight. Mark it failed instead.
                if !task.status.is_terminal() {
                    task.error_code = Some(ErrorCode::Internal);
                    task.transition(
                        TaskStatus::Failed,
                        Some("interrupted by gateway restart".into()),
                    );
                    persist_to(dir, &task);
                }
                tasks.insert(task.task_id.clone(), Arc::new(RwLock::new(task)));
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping malformed task record");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_domain::config::Config;
    use sa_domain::stream::Usage;
    use sa_providers::LlmRouter;
    use sa_tools::ProcessManager;
    use std::time::Duration;

    fn build_coordinator(
        dir: &std::path::Path,
        max_concurrent: usize,
    ) -> (Arc<TaskCoordinator>, Arc<Broadcaster>) {
        let sessions = SessionStore::new(dir).unwrap();
        let broadcaster = Arc::new(Broadcaster::new());
        let tools = Arc::new(sa_tools::ToolRegistry::new());
        let process_manager = Arc::new(ProcessManager::new(Default::default()));
        let router = Arc::new(LlmRouter::from_config(&Default::default()).unwrap());
        let services = Arc::new(EngineServices {
            sessions: sessions.clone(),
            broadcaster: broadcaster.clone(),
            tools,
            router,
            process_manager,
            context: Default::default(),
            compaction: Default::default(),
            workspace_root: dir.join("workspace"),
        });
        let cancels = Arc::new(CancelMap::new());
        let coordinator = Arc::new(
            TaskCoordinator::new(
                sessions,
                broadcaster.clone(),
                services,
                cancels,
                dir.to_str().unwrap(),
                max_concurrent,
            )
            .unwrap(),
        );
        (coordinator, broadcaster)
    }

    async fn wait_for_terminal(task: &Arc<RwLock<Task>>) {
        for _ in 0..200 {
            if task.read().status.is_terminal() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task never reached a terminal status");
    }

    #[tokio::test]
    async fn submit_registers_broadcaster_before_any_event_is_published() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, broadcaster) = build_coordinator(dir.path(), 4);

        let task = coordinator
            .submit(
                &Config::default(),
                SubmitTaskRequest {
                    task_text: "say hello".into(),
                    session_id: None,
                    agent_preset: None,
                    tool_preset: None,
                    principal: None,
                },
            )
            .unwrap();

        // Registration happens synchronously inside `submit`, strictly before
        // the worker is spawned, so a subscription taken out immediately
        // after `submit` returns can never miss the task's first event.
        let task_id = task.read().task_id.clone();
        assert!(broadcaster.publish(&task_id, None, dummy_iteration_start()).is_some());

        wait_for_terminal(&task).await;
        // No providers are configured, so the engine fails fast on its
        // first LLM call rather than hanging.
        assert_eq!(task.read().status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn cancel_on_a_terminal_task_is_a_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, _broadcaster) = build_coordinator(dir.path(), 4);

        let task = coordinator
            .submit(
                &Config::default(),
                SubmitTaskRequest {
                    task_text: "anything".into(),
                    session_id: None,
                    agent_preset: None,
                    tool_preset: None,
                    principal: None,
                },
            )
            .unwrap();
        wait_for_terminal(&task).await;

        let task_id = task.read().task_id.clone();
        match coordinator.cancel(&task_id) {
            Err(Error::Conflict(reason)) => assert_eq!(reason, "terminal"),
            other => panic!("expected Conflict, got {other:?}"),
        }
    }

    #[test]
    fn cancel_unknown_task_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, _broadcaster) = build_coordinator(dir.path(), 4);
        assert!(matches!(coordinator.cancel("nope"), Err(Error::NotFound(_))));
    }

    #[test]
    fn apply_progress_accumulates_usage_across_iterations() {
        let task = Arc::new(RwLock::new(Task::new("t1", "s1", 10)));
        apply_progress(&task, &dummy_iteration_start());
        apply_progress(
            &task,
            &EventPayload::IterationComplete {
                iteration: 1,
                usage: Usage { prompt_tokens: 10, completion_tokens: 5, total_tokens: 15 },
                tools_run: 1,
            },
        );
        apply_progress(
            &task,
            &EventPayload::IterationComplete {
                iteration: 2,
                usage: Usage { prompt_tokens: 3, completion_tokens: 2, total_tokens: 5 },
                tools_run: 0,
            },
        );
        let t = task.read();
        assert_eq!(t.iteration, 2);
        assert_eq!(t.usage.total_tokens, 20);
    }

    #[test]
    fn persist_and_load_round_trips_a_terminal_task() {
        let dir = tempfile::tempdir().unwrap();
        let mut task = Task::new("t1", "s1", 10);
        task.transition(TaskStatus::Succeeded, None);
        persist_to(dir.path(), &task);

        let mut loaded = HashMap::new();
        load_persisted(dir.path(), &mut loaded);
        assert_eq!(loaded.get("t1").unwrap().read().status, TaskStatus::Succeeded);
    }

    #[test]
    fn load_persisted_fails_stale_in_flight_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let task = Task::new("t1", "s1", 10);
        assert_eq!(task.status, TaskStatus::Pending);
        persist_to(dir.path(), &task);

        let mut loaded = HashMap::new();
        load_persisted(dir.path(), &mut loaded);
        let reloaded = loaded.get("t1").unwrap().read();
        assert_eq!(reloaded.status, TaskStatus::Failed);
        assert_eq!(
            reloaded.terminal_reason.as_deref(),
            Some("interrupted by gateway restart")
        );
    }

    fn dummy_iteration_start() -> EventPayload {
        EventPayload::IterationStart { iteration: 1 }
    }
}
