//! 测试实体 Builder，默认值合理、可链式覆盖

use chrono::{DateTime, Utc};
use serde_json::json;

use publisher_domain::{
    Destination, ModerationMode, ProjectConfig, PublishSettings, PublishTask, TaskStatus,
};

pub struct PublishTaskBuilder {
    task: PublishTask,
}

impl PublishTaskBuilder {
    pub fn new() -> Self {
        let mut task = PublishTask::new(1, "youtube".to_string(), 100);
        task.id = 1;
        task.artifacts = json!({ "final_video_path": "/data/tasks/1/final.mp4" });
        Self { task }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.task.id = id;
        self
    }

    pub fn with_project_id(mut self, project_id: i64) -> Self {
        self.task.project_id = project_id;
        self
    }

    pub fn with_platform(mut self, platform: &str) -> Self {
        self.task.platform = platform.to_string();
        self
    }

    pub fn with_destination(mut self, account_id: i64) -> Self {
        self.task.destination_account_id = account_id;
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.task.status = status;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.task.priority = priority;
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.task.virality_score = Some(score);
        self
    }

    pub fn with_candidate(mut self, candidate_id: i64) -> Self {
        self.task.candidate_id = Some(candidate_id);
        self
    }

    pub fn with_scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.task.scheduled_at = Some(at);
        self
    }

    pub fn with_updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.task.updated_at = at;
        self
    }

    pub fn with_published_at(mut self, at: DateTime<Utc>) -> Self {
        self.task.published_at = Some(at);
        self
    }

    pub fn with_published_url(mut self, url: &str) -> Self {
        self.task.published_url = Some(url.to_string());
        self
    }

    pub fn with_executor_job(mut self, job_id: &str) -> Self {
        self.task.executor_job_id = Some(job_id.to_string());
        self
    }

    pub fn with_artifacts(mut self, artifacts: serde_json::Value) -> Self {
        self.task.artifacts = artifacts;
        self
    }

    pub fn with_topic_author(mut self, topic: &str, author: &str) -> Self {
        if let serde_json::Value::Object(map) = &mut self.task.artifacts {
            map.insert("topic_signature".to_string(), json!(topic));
            map.insert("author_key".to_string(), json!(author));
        }
        self
    }

    pub fn with_pause_requested(mut self, at: DateTime<Utc>) -> Self {
        self.task.pause_requested_at = Some(at);
        self
    }

    pub fn build(self) -> PublishTask {
        self.task
    }
}

impl Default for PublishTaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct DestinationBuilder {
    destination: Destination,
}

impl DestinationBuilder {
    pub fn new() -> Self {
        Self {
            destination: Destination {
                id: 1,
                project_id: 1,
                platform: "youtube".to_string(),
                social_account_id: 100,
                daily_limit: 3,
                priority: 0,
                is_active: true,
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.destination.id = id;
        self
    }

    pub fn with_project_id(mut self, project_id: i64) -> Self {
        self.destination.project_id = project_id;
        self
    }

    pub fn with_platform(mut self, platform: &str) -> Self {
        self.destination.platform = platform.to_string();
        self
    }

    pub fn with_account(mut self, account_id: i64) -> Self {
        self.destination.social_account_id = account_id;
        self
    }

    pub fn with_daily_limit(mut self, limit: i32) -> Self {
        self.destination.daily_limit = limit;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.destination.is_active = false;
        self
    }

    pub fn build(self) -> Destination {
        self.destination
    }
}

impl Default for DestinationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ProjectConfigBuilder {
    project: ProjectConfig,
}

impl ProjectConfigBuilder {
    pub fn new() -> Self {
        Self {
            project: ProjectConfig {
                id: 1,
                name: "test_project".to_string(),
                moderation_mode: ModerationMode::Manual,
                publish: PublishSettings::default(),
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.project.id = id;
        self
    }

    pub fn with_moderation_mode(mut self, mode: ModerationMode) -> Self {
        self.project.moderation_mode = mode;
        self
    }

    pub fn with_publish_settings(mut self, settings: PublishSettings) -> Self {
        self.project.publish = settings;
        self
    }

    pub fn build(self) -> ProjectConfig {
        self.project
    }
}

impl Default for ProjectConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
