use async_trait::async_trait;
use citysim_core::error::{CitysimError, Result};
use citysim_core::models::{
    AnalysisGroup, AnalysisResult, AnalysisRun, CheckpointArgs, CheckpointState, Geometry, GroupId,
    ProjectId, RunId, RunStatus, Scene, SceneId, ZonesConfigurationMapping,
};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::Row;

use super::{db_error, PostgresStore};
use crate::ports::RunStore;

const RUN_COLUMNS: &str = "id, project_id, group_id, scene_id, analysis_type, creator, created_at, \
     status, progress, checkpoint, checkpoint_args, results, message";

fn parse_status(raw: &str) -> Result<RunStatus> {
    RunStatus::parse(raw)
        .ok_or_else(|| CitysimError::Serialization(format!("Unknown run status '{}'", raw)))
}

fn run_from_row(row: &PgRow) -> Result<AnalysisRun> {
    let decode = |e: sqlx::Error| db_error("decode analysis run", e);

    let status: String = row.try_get("status").map_err(decode)?;
    let progress: i16 = row.try_get("progress").map_err(decode)?;
    let Json(checkpoint_args): Json<CheckpointArgs> =
        row.try_get("checkpoint_args").map_err(decode)?;
    let Json(results): Json<Vec<AnalysisResult>> = row.try_get("results").map_err(decode)?;

    Ok(AnalysisRun {
        id: RunId::new(row.try_get::<String, _>("id").map_err(decode)?),
        project_id: ProjectId::new(row.try_get::<String, _>("project_id").map_err(decode)?),
        group_id: GroupId::new(row.try_get::<String, _>("group_id").map_err(decode)?),
        scene_id: SceneId::new(row.try_get::<String, _>("scene_id").map_err(decode)?),
        analysis_type: row.try_get("analysis_type").map_err(decode)?,
        creator: row.try_get("creator").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
        status: parse_status(&status)?,
        progress: progress.clamp(0, 100) as u8,
        checkpoint: row.try_get("checkpoint").map_err(decode)?,
        checkpoint_args,
        results,
        message: row.try_get("message").map_err(decode)?,
    })
}

impl PostgresStore {
    /// Run an UPDATE against one run, failing when the run does not exist
    async fn update_run(
        &self,
        id: &RunId,
        query: sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<()> {
        let result =
            query.execute(&self.pool).await.map_err(|e| db_error("update analysis run", e))?;

        if result.rows_affected() == 0 {
            return Err(CitysimError::RunNotFound { id: id.to_string() });
        }
        Ok(())
    }

    async fn read_checkpoint(&self, id: &RunId) -> Result<CheckpointState> {
        let row = sqlx::query(
            "SELECT checkpoint, checkpoint_args, status FROM analysis_runs WHERE id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("read checkpoint", e))?
        .ok_or_else(|| CitysimError::RunNotFound { id: id.to_string() })?;

        let decode = |e: sqlx::Error| db_error("decode checkpoint", e);
        let status: String = row.try_get("status").map_err(decode)?;
        let Json(args): Json<CheckpointArgs> = row.try_get("checkpoint_args").map_err(decode)?;

        Ok(CheckpointState {
            name: row.try_get("checkpoint").map_err(decode)?,
            args,
            status: parse_status(&status)?,
        })
    }
}

#[async_trait]
impl RunStore for PostgresStore {
    async fn store_group(&self, group: &AnalysisGroup) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO analysis_groups (id, project_id, name, analysis_type, area_of_interest, parameters, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(group.id.as_str())
        .bind(group.project_id.as_str())
        .bind(&group.name)
        .bind(&group.analysis_type)
        .bind(Json(&group.area_of_interest))
        .bind(Json(&group.parameters))
        .bind(group.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("store analysis group", e))?;

        Ok(())
    }

    async fn get_group(&self, id: &GroupId) -> Result<Option<AnalysisGroup>> {
        let row = sqlx::query(
            r#"
            SELECT id, project_id, name, analysis_type, area_of_interest, parameters, created_at
            FROM analysis_groups
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("get analysis group", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let decode = |e: sqlx::Error| db_error("decode analysis group", e);
        let Json(area_of_interest): Json<Geometry> = row.try_get("area_of_interest").map_err(decode)?;
        let Json(parameters): Json<serde_json::Value> = row.try_get("parameters").map_err(decode)?;

        Ok(Some(AnalysisGroup {
            id: GroupId::new(row.try_get::<String, _>("id").map_err(decode)?),
            project_id: ProjectId::new(row.try_get::<String, _>("project_id").map_err(decode)?),
            name: row.try_get("name").map_err(decode)?,
            analysis_type: row.try_get("analysis_type").map_err(decode)?,
            area_of_interest,
            parameters,
            created_at: row.try_get("created_at").map_err(decode)?,
        }))
    }

    async fn store_scene(&self, scene: &Scene) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scenes (id, project_id, name, zone_config_mapping, module_settings)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(scene.id.as_str())
        .bind(scene.project_id.as_str())
        .bind(&scene.name)
        .bind(Json(&scene.zone_config_mapping))
        .bind(Json(&scene.module_settings))
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("store scene", e))?;

        Ok(())
    }

    async fn get_scene(&self, id: &SceneId) -> Result<Option<Scene>> {
        let row = sqlx::query(
            "SELECT id, project_id, name, zone_config_mapping, module_settings FROM scenes WHERE id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("get scene", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let decode = |e: sqlx::Error| db_error("decode scene", e);
        let Json(zone_config_mapping): Json<ZonesConfigurationMapping> =
            row.try_get("zone_config_mapping").map_err(decode)?;
        let Json(module_settings): Json<serde_json::Value> =
            row.try_get("module_settings").map_err(decode)?;

        Ok(Some(Scene {
            id: SceneId::new(row.try_get::<String, _>("id").map_err(decode)?),
            project_id: ProjectId::new(row.try_get::<String, _>("project_id").map_err(decode)?),
            name: row.try_get("name").map_err(decode)?,
            zone_config_mapping,
            module_settings,
        }))
    }

    async fn insert_run(&self, run: &AnalysisRun) -> Result<AnalysisRun> {
        sqlx::query(
            r#"
            INSERT INTO analysis_runs (id, project_id, group_id, scene_id, analysis_type, creator, created_at,
                                       status, progress, checkpoint, checkpoint_args, results, message)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(run.id.as_str())
        .bind(run.project_id.as_str())
        .bind(run.group_id.as_str())
        .bind(run.scene_id.as_str())
        .bind(&run.analysis_type)
        .bind(&run.creator)
        .bind(run.created_at)
        .bind(run.status.as_str())
        .bind(i16::from(run.progress))
        .bind(&run.checkpoint)
        .bind(Json(&run.checkpoint_args))
        .bind(Json(&run.results))
        .bind(run.message.as_deref())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("insert analysis run", e))?;

        self.get_run(&run.id)
            .await?
            .ok_or_else(|| CitysimError::RunNotFound { id: run.id.to_string() })
    }

    async fn get_run(&self, id: &RunId) -> Result<Option<AnalysisRun>> {
        let row = sqlx::query(&format!("SELECT {} FROM analysis_runs WHERE id = $1", RUN_COLUMNS))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("get analysis run", e))?;

        row.as_ref().map(run_from_row).transpose()
    }

    async fn list_runs(&self, project: &ProjectId) -> Result<Vec<AnalysisRun>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM analysis_runs WHERE project_id = $1 ORDER BY created_at, id",
            RUN_COLUMNS
        ))
        .bind(project.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list analysis runs", e))?;

        rows.iter().map(run_from_row).collect()
    }

    async fn list_runs_with_status(&self, statuses: &[RunStatus]) -> Result<Vec<AnalysisRun>> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();

        let rows = sqlx::query(&format!(
            "SELECT {} FROM analysis_runs WHERE status = ANY($1) ORDER BY created_at, id",
            RUN_COLUMNS
        ))
        .bind(statuses)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list analysis runs by status", e))?;

        rows.iter().map(run_from_row).collect()
    }

    async fn advance_checkpoint(
        &self,
        id: &RunId,
        checkpoint: &str,
        args: &CheckpointArgs,
    ) -> Result<CheckpointState> {
        // The status predicate lets a concurrent cancellation win
        sqlx::query(
            r#"
            UPDATE analysis_runs
            SET checkpoint = $2, checkpoint_args = $3
            WHERE id = $1 AND status = 'RUNNING'
            "#,
        )
        .bind(id.as_str())
        .bind(checkpoint)
        .bind(Json(args))
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("advance checkpoint", e))?;

        self.read_checkpoint(id).await
    }

    async fn set_status(&self, id: &RunId, status: RunStatus) -> Result<()> {
        self.update_run(
            id,
            sqlx::query("UPDATE analysis_runs SET status = $2 WHERE id = $1")
                .bind(id.as_str())
                .bind(status.as_str()),
        )
        .await
    }

    async fn set_progress(&self, id: &RunId, progress: u8) -> Result<()> {
        self.update_run(
            id,
            sqlx::query("UPDATE analysis_runs SET progress = $2 WHERE id = $1")
                .bind(id.as_str())
                .bind(i16::from(progress.min(100))),
        )
        .await
    }

    async fn set_message(&self, id: &RunId, message: &str) -> Result<()> {
        self.update_run(
            id,
            sqlx::query("UPDATE analysis_runs SET message = $2 WHERE id = $1")
                .bind(id.as_str())
                .bind(message),
        )
        .await
    }

    async fn complete_run(&self, id: &RunId, results: &[AnalysisResult]) -> Result<RunStatus> {
        sqlx::query(
            r#"
            UPDATE analysis_runs
            SET results = $2, progress = 100, status = 'COMPLETED'
            WHERE id = $1 AND status = 'RUNNING'
            "#,
        )
        .bind(id.as_str())
        .bind(Json(results))
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("complete analysis run", e))?;

        Ok(self.read_checkpoint(id).await?.status)
    }

    async fn delete_run(&self, id: &RunId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM analysis_runs WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("delete analysis run", e))?;

        Ok(result.rows_affected() > 0)
    }
}
