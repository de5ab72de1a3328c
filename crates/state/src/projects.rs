use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use mailsieve_core::{AnalysisProject, MerchantId, ProjectId, ProjectStatus};

use crate::error::StateError;

/// Repository for analysis projects: named, label-only views over
/// existing merchant data.
#[derive(Debug, Clone)]
pub struct ProjectStore {
    pool: SqlitePool,
}

fn project_from_row(row: &SqliteRow) -> Result<AnalysisProject, StateError> {
    let id: String = row.try_get("id")?;
    let merchant_id: String = row.try_get("merchant_id")?;
    let status: String = row.try_get("status")?;
    let workers_raw: String = row.try_get("worker_names")?;
    Ok(AnalysisProject {
        id: ProjectId::parse(&id).map_err(|e| StateError::Serialization(e.to_string()))?,
        name: row.try_get("name")?,
        merchant_id: MerchantId::parse(&merchant_id)
            .map_err(|e| StateError::Serialization(e.to_string()))?,
        worker_names: serde_json::from_str(&workers_raw)
            .map_err(|e| StateError::Serialization(format!("project workers: {e}")))?,
        status: ProjectStatus::parse(&status)
            .ok_or_else(|| StateError::Serialization(format!("unknown project status: {status}")))?,
        note: row.try_get("note")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl ProjectStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, project: &AnalysisProject) -> Result<(), StateError> {
        let workers = serde_json::to_string(&project.worker_names)
            .map_err(|e| StateError::Serialization(e.to_string()))?;
        sqlx::query(
            "INSERT INTO analysis_projects
                (id, name, merchant_id, worker_names, status, note, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(project.id.to_string())
        .bind(&project.name)
        .bind(project.merchant_id.to_string())
        .bind(workers)
        .bind(project.status.as_str())
        .bind(&project.note)
        .bind(project.created_at)
        .bind(project.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: ProjectId) -> Result<Option<AnalysisProject>, StateError> {
        let row = sqlx::query("SELECT * FROM analysis_projects WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(project_from_row).transpose()
    }

    pub async fn list(
        &self,
        status: Option<ProjectStatus>,
    ) -> Result<Vec<AnalysisProject>, StateError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    "SELECT * FROM analysis_projects WHERE status = ?1 ORDER BY created_at DESC",
                )
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM analysis_projects ORDER BY created_at DESC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(project_from_row).collect()
    }

    pub async fn set_status(
        &self,
        id: ProjectId,
        status: ProjectStatus,
    ) -> Result<bool, StateError> {
        let result = sqlx::query(
            "UPDATE analysis_projects SET status = ?2, updated_at = ?3 WHERE id = ?1",
        )
        .bind(id.to_string())
        .bind(status.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete the label; the underlying data is untouched.
    pub async fn delete(&self, id: ProjectId) -> Result<bool, StateError> {
        let result = sqlx::query("DELETE FROM analysis_projects WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    #[tokio::test]
    async fn project_lifecycle() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let (merchant, _) = store.merchants().upsert_by_domain("foo.com").await.unwrap();
        let projects = store.projects();

        let now = Utc::now();
        let project = AnalysisProject {
            id: ProjectId::new(),
            name: "spring launch".into(),
            merchant_id: merchant.id,
            worker_names: vec!["w1".into(), "w2".into()],
            status: ProjectStatus::Active,
            note: None,
            created_at: now,
            updated_at: now,
        };
        projects.insert(&project).await.unwrap();

        let loaded = projects.get(project.id).await.unwrap().unwrap();
        assert_eq!(loaded.worker_names, vec!["w1", "w2"]);

        projects
            .set_status(project.id, ProjectStatus::Archived)
            .await
            .unwrap();
        assert!(projects.list(Some(ProjectStatus::Active)).await.unwrap().is_empty());
        assert_eq!(
            projects.list(Some(ProjectStatus::Archived)).await.unwrap().len(),
            1
        );

        assert!(projects.delete(project.id).await.unwrap());
        assert!(projects.get(project.id).await.unwrap().is_none());
    }
}
