//! `POST /api/tasks`, `GET /api/tasks/{id}`, `POST /api/tasks/{id}/cancel`.

use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use sa_domain::error::Error as DomainError;
use sa_domain::task::{Task, TaskStatus};

use crate::api::error::{ApiError, ApiResult};
use crate::auth::Principal;
use crate::state::AppState;
use crate::tasks::SubmitTaskRequest;

#[derive(Debug, Deserialize)]
pub struct SubmitTaskBody {
    pub task: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub agent_preset: Option<String>,
    #[serde(default)]
    pub tool_preset: Option<String>,
}

/// Wire shape shared by the `POST /api/tasks` response and the `GET
/// /api/tasks/{id}` response; the progress fields are always present and
/// never omitted at zero, per spec.md §6.
#[derive(Debug, Serialize)]
pub struct TaskView {
    pub task_id: String,
    pub session_id: String,
    pub status: &'static str,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    pub current_iteration: u32,
    pub total_iterations: u32,
    pub tokens_used: u64,
    pub total_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
}

impl From<&Task> for TaskView {
    fn from(task: &Task) -> Self {
        let error = if task.status == TaskStatus::Failed || task.status == TaskStatus::TimedOut {
            task.terminal_reason.as_ref().map(|reason| {
                serde_json::json!({ "kind": task.error_code, "message": reason })
            })
        } else {
            None
        };
        Self {
            task_id: task.task_id.clone(),
            session_id: task.session_id.clone(),
            status: wire_status(task.status),
            created_at: task.created_at,
            started_at: task.started_at,
            finished_at: task.finished_at,
            current_iteration: task.iteration,
            total_iterations: task.iteration,
            tokens_used: task.usage.total_tokens as u64,
            total_tokens: task.usage.total_tokens as u64,
            result: task.result.clone(),
            error,
        }
    }
}

fn wire_status(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::Running => "running",
        TaskStatus::Succeeded => "succeeded",
        TaskStatus::Failed => "failed",
        TaskStatus::Cancelled => "cancelled",
        TaskStatus::TimedOut => "timed_out",
    }
}

pub async fn submit_task(
    State(state): State<AppState>,
    principal: Option<Extension<Principal>>,
    Json(body): Json<SubmitTaskBody>,
) -> ApiResult<impl IntoResponse> {
    if body.task.trim().is_empty() {
        return Err(ApiError(DomainError::Validation("task must not be empty".into())));
    }
    let task = state.coordinator.submit(
        &state.config,
        SubmitTaskRequest {
            task_text: body.task,
            session_id: body.session_id,
            agent_preset: body.agent_preset,
            tool_preset: body.tool_preset,
            principal: principal.map(|Extension(p)| p.0),
        },
    )?;
    let view = TaskView::from(&*task.read());
    Ok((StatusCode::ACCEPTED, Json(view)))
}

pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let task = state
        .coordinator
        .get(&task_id)
        .ok_or_else(|| DomainError::NotFound(format!("task {task_id}")))?;
    Ok(Json(TaskView::from(&*task.read())))
}

pub async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> impl IntoResponse {
    match state.coordinator.cancel(&task_id) {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "ok": true }))).into_response(),
        Err(DomainError::Conflict(reason)) => {
            (StatusCode::CONFLICT, Json(serde_json::json!({ "reason": reason }))).into_response()
        }
        Err(other) => ApiError(other).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_of_a_pending_task_has_no_error_or_result() {
        let task = Task::new("t1", "s1", 10);
        let view = TaskView::from(&task);
        assert_eq!(view.status, "pending");
        assert!(view.error.is_none());
        assert!(view.result.is_none());
    }

    #[test]
    fn view_of_a_failed_task_carries_the_terminal_reason_as_the_error_message() {
        let mut task = Task::new("t1", "s1", 10);
        task.error_code = Some(sa_domain::error::ErrorCode::LlmPermanent);
        task.transition(TaskStatus::Failed, Some("boom".into()));
        let view = TaskView::from(&task);
        assert_eq!(view.status, "failed");
        let error = view.error.unwrap();
        assert_eq!(error["message"], "boom");
        assert_eq!(error["kind"], "llm_permanent");
    }

    #[test]
    fn view_of_a_succeeded_task_has_no_error_even_with_a_result() {
        let mut task = Task::new("t1", "s1", 10);
        task.result = Some("42".into());
        task.transition(TaskStatus::Succeeded, None);
        let view = TaskView::from(&task);
        assert_eq!(view.status, "succeeded");
        assert_eq!(view.result.as_deref(), Some("42"));
        assert!(view.error.is_none());
    }
}
