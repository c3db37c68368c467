//! Task records for the generation pipeline, held in an expiring in-process
//! store (the KV namespace). Progress is one of 25/50/75/100 and only ever
//! moves up; completed/failed are terminal.

use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::{Deserialize, Serialize};

pub const TASK_TTL: Duration = Duration::from_secs(86400);

// generous: task records are small and expire on their own
const TASK_CAPACITY: u64 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOptions {
    pub aspect_ratio: String,
    pub image_size: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urls: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_id: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub prompt: String,
    pub options: TaskOptions,
    pub ref_images: serde_json::Value,
    pub result: Option<TaskResult>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn pending(
        task_id: String,
        prompt: String,
        options: TaskOptions,
        ref_images: serde_json::Value,
    ) -> Task {
        let now = Utc::now();
        Task {
            task_id,
            status: TaskStatus::Pending,
            progress: 25,
            prompt,
            options,
            ref_images,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Clone)]
pub struct TaskStore {
    cache: Cache<String, Task>,
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskStore {
    pub fn new() -> TaskStore {
        TaskStore {
            cache: Cache::builder()
                .max_capacity(TASK_CAPACITY)
                .time_to_live(TASK_TTL)
                .build(),
        }
    }

    pub async fn insert(&self, task: Task) {
        self.cache.insert(task.task_id.clone(), task).await;
    }

    pub async fn get(&self, id: &str) -> Option<Task> {
        self.cache.get(id).await
    }

    // the executor is the sole writer and strictly sequential per task, but
    // the guards keep the public invariants even if that ever changes:
    // terminal records never mutate, progress never goes down
    async fn update(&self, id: &str, f: impl FnOnce(&mut Task)) -> Option<Task> {
        let mut task = self.cache.get(id).await?;
        if task.status.is_terminal() {
            return Some(task);
        }
        let floor = task.progress;
        f(&mut task);
        if task.progress < floor {
            task.progress = floor;
        }
        task.updated_at = Utc::now();
        self.cache.insert(id.to_string(), task.clone()).await;
        Some(task)
    }

    pub async fn mark_processing(&self, id: &str, progress: u8) -> Option<Task> {
        self.update(id, |t| {
            t.status = TaskStatus::Processing;
            t.progress = progress;
        })
        .await
    }

    pub async fn set_progress(&self, id: &str, progress: u8) -> Option<Task> {
        self.update(id, |t| t.progress = progress).await
    }

    pub async fn complete(&self, id: &str, urls: Vec<String>) -> Option<Task> {
        self.update(id, |t| {
            t.status = TaskStatus::Completed;
            t.progress = 100;
            t.result = urls.first().map(|first| TaskResult {
                url: first.clone(),
                urls: if urls.len() > 1 { Some(urls.clone()) } else { None },
            });
        })
        .await
    }

    pub async fn fail(&self, id: &str, progress: u8, error: String) -> Option<Task> {
        self.update(id, |t| {
            t.status = TaskStatus::Failed;
            t.progress = progress;
            t.error = Some(error);
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str) -> Task {
        Task::pending(
            id.to_string(),
            "a red cube".to_string(),
            TaskOptions {
                aspect_ratio: "1:1".to_string(),
                image_size: "4K".to_string(),
            },
            serde_json::Value::Array(vec![]),
        )
    }

    #[tokio::test]
    async fn test_insert_get() {
        let store = TaskStore::new();
        store.insert(task("t1")).await;
        let got = store.get("t1").await.unwrap();
        assert_eq!(TaskStatus::Pending, got.status);
        assert_eq!(25, got.progress);
        assert!(got.result.is_none());
        assert!(got.error.is_none());
        assert!(store.get("nope").await.is_none());
    }

    #[tokio::test]
    async fn test_progress_is_monotone() {
        let store = TaskStore::new();
        store.insert(task("t1")).await;
        store.set_progress("t1", 75).await;
        let got = store.set_progress("t1", 50).await.unwrap();
        assert_eq!(75, got.progress);
    }

    #[tokio::test]
    async fn test_terminal_states_are_immutable() {
        let store = TaskStore::new();
        store.insert(task("t1")).await;
        store
            .complete("t1", vec!["https://img.example.com/i/gemini/x.png".to_string()])
            .await;
        let got = store.fail("t1", 25, "late failure".to_string()).await.unwrap();
        assert_eq!(TaskStatus::Completed, got.status);
        assert_eq!(100, got.progress);
        assert!(got.error.is_none());

        store.insert(task("t2")).await;
        store.fail("t2", 50, "VERTEX_NON_JSON".to_string()).await;
        let got = store.complete("t2", vec!["u".to_string()]).await.unwrap();
        assert_eq!(TaskStatus::Failed, got.status);
        assert_eq!("VERTEX_NON_JSON", got.error.as_deref().unwrap());
    }

    #[tokio::test]
    async fn test_single_url_result_omits_urls() {
        let store = TaskStore::new();
        store.insert(task("t1")).await;
        let got = store.complete("t1", vec!["u1".to_string()]).await.unwrap();
        let result = got.result.unwrap();
        assert_eq!("u1", result.url);
        assert!(result.urls.is_none());

        store.insert(task("t2")).await;
        let got = store
            .complete("t2", vec!["u1".to_string(), "u2".to_string()])
            .await
            .unwrap();
        let result = got.result.unwrap();
        assert_eq!("u1", result.url);
        assert_eq!(2, result.urls.unwrap().len());
    }

    #[tokio::test]
    async fn test_task_serializes_camel_case() {
        let store = TaskStore::new();
        store.insert(task("t1")).await;
        let got = store.get("t1").await.unwrap();
        let v = serde_json::to_value(&got).unwrap();
        assert_eq!("t1", v["taskId"]);
        assert_eq!("pending", v["status"]);
        assert_eq!(25, v["progress"]);
        assert_eq!("1:1", v["options"]["aspectRatio"]);
        assert_eq!("4K", v["options"]["imageSize"]);
        // result/error present as nulls, the poll response is the record verbatim
        assert!(v["result"].is_null());
        assert!(v["error"].is_null());
        assert!(v.get("createdAt").is_some());
    }

    #[tokio::test]
    async fn test_fail_keeps_higher_progress() {
        let store = TaskStore::new();
        store.insert(task("t1")).await;
        store.set_progress("t1", 75).await;
        let got = store.fail("t1", 25, "x".to_string()).await.unwrap();
        assert_eq!(75, got.progress);
        assert_eq!(TaskStatus::Failed, got.status);
    }
}
