//! Urban wind analysis.
//!
//! Two remote jobs: the preparation job meshes the simulation domain from the
//! area of interest and the building footprints, the simulation job solves
//! the wind field on it and produces a wind speed grid and a pedestrian
//! comfort grid.

use async_trait::async_trait;
use citysim_core::error::{CitysimError, Result};
use citysim_core::models::{AnalysisResult, CheckpointArgs, DataRef, INITIAL_CHECKPOINT};
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::grid::GridExtractor;
use crate::analysis::Analysis;
use crate::checkpoint::{CheckpointMachine, Step};
use crate::context::AnalysisContext;
use crate::extraction::ExtractorRegistry;
use crate::gateway::{DataObject, JobInputs, ProductSpec};

pub const TYPE_NAME: &str = "urban-wind";

pub const PREPARATION_PROCESSOR: &str = "urban-wind-preparation";
pub const SIMULATION_PROCESSOR: &str = "urban-wind-simulation";

pub const READY_FOR_PREPARATION: &str = "ready-for-preparation";
pub const WAITING_FOR_PREPARATION: &str = "waiting-for-preparation";
pub const READY_FOR_SIMULATION: &str = "ready-for-simulation";
pub const WAITING_FOR_SIMULATION: &str = "waiting-for-simulation";
pub const SIMULATION_DONE: &str = "simulation-done";

pub const WIND_SPEED: &str = "wind-speed";
pub const WIND_COMFORT: &str = "wind-comfort";
const DOMAIN: &str = "domain";

const SELF_TRACKER: &str = "self";
const PREPARATION_TRACKER: &str = "preparation";
const SIMULATION_TRACKER: &str = "simulation";

/// Lawson comfort classes, index = cell value
const COMFORT_CLASSES: [&str; 5] = ["sitting", "standing", "walking", "uncomfortable", "dangerous"];

/// Parameters of an urban wind group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UrbanWindParameters {
    /// Direction the wind blows from, degrees clockwise from north
    pub wind_direction: f64,
    /// Reference wind speed at 10 m, m/s
    pub wind_speed: f64,
    /// Grid resolution, metres
    pub resolution: f64,
}

impl Default for UrbanWindParameters {
    fn default() -> Self {
        Self {
            wind_direction: 270.0,
            wind_speed: 5.0,
            resolution: 10.0,
        }
    }
}

impl UrbanWindParameters {
    pub fn from_value(value: &Value) -> Result<Self> {
        let params: Self = match value {
            Value::Null => Self::default(),
            other => serde_json::from_value(other.clone()).map_err(|e| CitysimError::InvalidParameter {
                name: "parameters".to_string(),
                reason: e.to_string(),
            })?,
        };
        params.validate()?;
        Ok(params)
    }

    fn validate(&self) -> Result<()> {
        let invalid = |name: &str, reason: &str| {
            Err(CitysimError::InvalidParameter {
                name: name.to_string(),
                reason: reason.to_string(),
            })
        };

        if !(0.0..360.0).contains(&self.wind_direction) {
            return invalid("wind_direction", "must be in [0, 360)");
        }
        if !(self.wind_speed > 0.0) {
            return invalid("wind_speed", "must be positive");
        }
        if !(self.resolution > 0.0) {
            return invalid("resolution", "must be positive");
        }
        Ok(())
    }
}

pub struct UrbanWind {
    machine: CheckpointMachine<UrbanWind>,
}

impl Default for UrbanWind {
    fn default() -> Self {
        Self::new()
    }
}

impl UrbanWind {
    pub fn new() -> Self {
        let machine = CheckpointMachine::new(TYPE_NAME)
            .step(INITIAL_CHECKPOINT, Self::initialise)
            .step(READY_FOR_PREPARATION, Self::submit_preparation)
            .step(WAITING_FOR_PREPARATION, Self::await_preparation)
            .step(READY_FOR_SIMULATION, Self::submit_simulation)
            .step(WAITING_FOR_SIMULATION, Self::await_simulation)
            .step(SIMULATION_DONE, Self::collect_results);
        Self { machine }
    }

    pub fn checkpoints(&self) -> Vec<&'static str> {
        self.machine.checkpoints().collect()
    }

    fn initialise<'a>(
        &'a self,
        ctx: &'a AnalysisContext,
        _args: CheckpointArgs,
    ) -> BoxFuture<'a, Result<Step>> {
        async move {
            let params = UrbanWindParameters::from_value(ctx.parameters())?;
            tracing::info!(
                run_id = %ctx.run_id(),
                wind_direction = params.wind_direction,
                wind_speed = params.wind_speed,
                "Starting urban wind analysis"
            );
            ctx.update_message("Preparing urban wind inputs").await?;
            ctx.update_progress(SELF_TRACKER, 5).await?;
            Ok(Step::advance(READY_FOR_PREPARATION, CheckpointArgs::new()))
        }
        .boxed()
    }

    fn submit_preparation<'a>(
        &'a self,
        ctx: &'a AnalysisContext,
        _args: CheckpointArgs,
    ) -> BoxFuture<'a, Result<Step>> {
        async move {
            let params = UrbanWindParameters::from_value(ctx.parameters())?;
            let processor = ctx.find_processor(PREPARATION_PROCESSOR).await?;

            let mut inputs = JobInputs::new();
            inputs.insert("aoi".to_string(), ctx.aoi_obj_id().await?.into());
            inputs.insert("buildings".to_string(), ctx.bld_footprint_obj_id().await?.into());
            inputs.insert("resolution".to_string(), json!(params.resolution));

            let outputs = BTreeMap::from([(
                DOMAIN.to_string(),
                ProductSpec::new("urban-wind-domain", "json"),
            )]);

            let job = processor
                .submit(
                    inputs,
                    outputs,
                    &format!("{} preparation", ctx.run_id()),
                    "Mesh the urban wind simulation domain",
                )
                .await?;

            ctx.update_message("Preparation job submitted").await?;
            ctx.update_progress(SELF_TRACKER, 15).await?;
            Ok(Step::advance(WAITING_FOR_PREPARATION, checkpoint_args([("job_id", job.id().into())])))
        }
        .boxed()
    }

    fn await_preparation<'a>(
        &'a self,
        ctx: &'a AnalysisContext,
        args: CheckpointArgs,
    ) -> BoxFuture<'a, Result<Step>> {
        async move {
            let job_id = arg(&args, "job_id")?;
            let job = ctx.find_job(&job_id).await?;
            let outputs = ctx.wait_for_job(job.as_ref(), PREPARATION_TRACKER).await?;
            let domain = output(&outputs, &job_id, DOMAIN)?;

            ctx.update_progress(SELF_TRACKER, 40).await?;
            Ok(Step::advance(READY_FOR_SIMULATION, checkpoint_args([("domain_obj_id", domain.into())])))
        }
        .boxed()
    }

    fn submit_simulation<'a>(
        &'a self,
        ctx: &'a AnalysisContext,
        args: CheckpointArgs,
    ) -> BoxFuture<'a, Result<Step>> {
        async move {
            let params = UrbanWindParameters::from_value(ctx.parameters())?;
            let domain = arg(&args, "domain_obj_id")?;
            let processor = ctx.find_processor(SIMULATION_PROCESSOR).await?;

            let mut inputs = JobInputs::new();
            inputs.insert(DOMAIN.to_string(), domain.clone().into());
            inputs.insert("wind_direction".to_string(), json!(params.wind_direction));
            inputs.insert("wind_speed".to_string(), json!(params.wind_speed));

            let outputs = BTreeMap::from([
                (WIND_SPEED.to_string(), ProductSpec::new("wind-speed-grid", "json")),
                (WIND_COMFORT.to_string(), ProductSpec::new("wind-comfort-grid", "json")),
            ]);

            let job = processor
                .submit(
                    inputs,
                    outputs,
                    &format!("{} simulation", ctx.run_id()),
                    "Solve the urban wind field",
                )
                .await?;

            ctx.update_message("Simulation job submitted").await?;
            ctx.update_progress(SELF_TRACKER, 50).await?;
            Ok(Step::advance(
                WAITING_FOR_SIMULATION,
                checkpoint_args([("domain_obj_id", domain.into()), ("job_id", job.id().into())]),
            ))
        }
        .boxed()
    }

    fn await_simulation<'a>(
        &'a self,
        ctx: &'a AnalysisContext,
        args: CheckpointArgs,
    ) -> BoxFuture<'a, Result<Step>> {
        async move {
            let job_id = arg(&args, "job_id")?;
            let job = ctx.find_job(&job_id).await?;
            let outputs = ctx.wait_for_job(job.as_ref(), SIMULATION_TRACKER).await?;
            let speed = output(&outputs, &job_id, WIND_SPEED)?;
            let comfort = output(&outputs, &job_id, WIND_COMFORT)?;

            ctx.update_progress(SELF_TRACKER, 90).await?;
            Ok(Step::advance(
                SIMULATION_DONE,
                checkpoint_args([
                    ("wind_speed_obj_id", speed.into()),
                    ("wind_comfort_obj_id", comfort.into()),
                ]),
            ))
        }
        .boxed()
    }

    fn collect_results<'a>(
        &'a self,
        ctx: &'a AnalysisContext,
        args: CheckpointArgs,
    ) -> BoxFuture<'a, Result<Step>> {
        async move {
            let params = UrbanWindParameters::from_value(ctx.parameters())?;
            let speed = arg(&args, "wind_speed_obj_id")?;
            let comfort = arg(&args, "wind_comfort_obj_id")?;
            let aoi = ctx.aoi_obj_id().await?;

            let results = vec![
                AnalysisResult::new(WIND_SPEED, "Wind speed", DataRef::Single(speed), "json")
                    .with_specification(json!({
                        "unit": "m/s",
                        "wind_direction": params.wind_direction,
                        "reference_speed": params.wind_speed,
                    }))
                    .with_extra("aoi_obj_id", json!(aoi)),
                AnalysisResult::new(WIND_COMFORT, "Wind comfort", DataRef::Single(comfort), "json")
                    .with_specification(json!({ "classes": COMFORT_CLASSES }))
                    .with_extra("aoi_obj_id", json!(aoi)),
            ];

            ctx.update_progress(SELF_TRACKER, 100).await?;
            ctx.update_message("Urban wind analysis finished").await?;
            Ok(Step::Done(results))
        }
        .boxed()
    }
}

#[async_trait]
impl Analysis for UrbanWind {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    async fn perform_analysis(&self, ctx: &AnalysisContext) -> Result<Option<Vec<AnalysisResult>>> {
        ctx.add_update_tracker(SELF_TRACKER, 100);
        ctx.add_update_tracker(PREPARATION_TRACKER, 100);
        ctx.add_update_tracker(SIMULATION_TRACKER, 400);

        self.machine.drive(self, ctx).await
    }
}

/// Register the extractors of the urban wind results
pub fn register_extractors(registry: &mut ExtractorRegistry) {
    registry.register(
        TYPE_NAME,
        WIND_SPEED,
        Arc::new(GridExtractor::new("Wind speed", "m/s").with_delta()),
    );
    registry.register(
        TYPE_NAME,
        WIND_COMFORT,
        Arc::new(GridExtractor::new("Wind comfort", "class")),
    );
}

fn checkpoint_args<const N: usize>(pairs: [(&str, Value); N]) -> CheckpointArgs {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

fn arg(args: &CheckpointArgs, key: &str) -> Result<String> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| CitysimError::InvalidParameter {
            name: key.to_string(),
            reason: "missing from checkpoint args".to_string(),
        })
}

fn output(outputs: &BTreeMap<String, DataObject>, job_id: &str, name: &str) -> Result<String> {
    outputs
        .get(name)
        .map(|object| object.obj_id.clone())
        .ok_or_else(|| CitysimError::DataObjectNotFound {
            obj_id: format!("{}/{}", job_id, name),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_order() {
        assert_eq!(
            UrbanWind::new().checkpoints(),
            vec![
                "initialised",
                "ready-for-preparation",
                "waiting-for-preparation",
                "ready-for-simulation",
                "waiting-for-simulation",
                "simulation-done",
            ]
        );
    }

    #[test]
    fn test_parameters_default_and_validate() {
        assert_eq!(
            UrbanWindParameters::from_value(&Value::Null).unwrap(),
            UrbanWindParameters::default()
        );

        let partial = UrbanWindParameters::from_value(&json!({ "wind_direction": 45.0 })).unwrap();
        assert_eq!(partial.wind_direction, 45.0);
        assert_eq!(partial.wind_speed, 5.0);

        assert!(UrbanWindParameters::from_value(&json!({ "wind_direction": 360.0 })).is_err());
        assert!(UrbanWindParameters::from_value(&json!({ "wind_speed": 0.0 })).is_err());
        assert!(UrbanWindParameters::from_value(&json!({ "resolution": "fine" })).is_err());
    }

    #[test]
    fn test_missing_arg_is_reported() {
        let err = arg(&CheckpointArgs::new(), "job_id").unwrap_err();
        assert!(matches!(err, CitysimError::InvalidParameter { name, .. } if name == "job_id"));
    }

    #[test]
    fn test_extractors_registered() {
        let mut registry = ExtractorRegistry::new();
        register_extractors(&mut registry);
        assert!(registry.contains(TYPE_NAME, WIND_SPEED));
        assert!(registry.contains(TYPE_NAME, WIND_COMFORT));
    }
}
