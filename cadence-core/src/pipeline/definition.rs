//! Declarative pipeline definitions resolved against a unit registry
//!
//! A definition names its units; the registry maps each name to a factory.
//! Every unresolved name or unknown stage kind is reported as a
//! configuration error before anything runs.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::config::RunnerConfig;
use crate::error::{CadenceError, Result};

use super::runner::Pipeline;
use super::stage::{Stage, StageKind};
use super::unit::{RouteSelector, WorkUnit};

/// Serializable description of a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,
    /// Optional runner settings for this pipeline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner: Option<RunnerConfig>,
    pub stages: Vec<StageDefinition>,
}

/// One stage in a [`PipelineDefinition`].
///
/// `kind` stays a plain string so that an unknown kind surfaces as a
/// configuration error naming the stage instead of a parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDefinition {
    pub kind: String,
    pub units: Vec<String>,
}

impl StageDefinition {
    pub fn unit(name: impl Into<String>) -> Self {
        Self {
            kind: StageKind::Unit.to_string(),
            units: vec![name.into()],
        }
    }

    pub fn parallel<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: StageKind::Parallel.to_string(),
            units: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn router(name: impl Into<String>) -> Self {
        Self {
            kind: StageKind::Router.to_string(),
            units: vec![name.into()],
        }
    }

    fn parse_kind(&self) -> Option<StageKind> {
        match self.kind.as_str() {
            "unit" => Some(StageKind::Unit),
            "parallel" | "parallel_group" => Some(StageKind::Parallel),
            "router" => Some(StageKind::Router),
            _ => None,
        }
    }
}

impl PipelineDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            runner: None,
            stages: Vec::new(),
        }
    }

    /// Append a stage
    pub fn stage(mut self, stage: StageDefinition) -> Self {
        self.stages.push(stage);
        self
    }

    /// Load a definition from a TOML, YAML or JSON file, picked by extension
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Json, Toml, Yaml},
        };

        let path = path.as_ref();
        if !path.exists() {
            return Err(CadenceError::config(format!(
                "Pipeline definition not found: {}",
                path.display()
            )));
        }

        let figment = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => Figment::from(Yaml::file(path)),
            Some("json") => Figment::from(Json::file(path)),
            _ => Figment::from(Toml::file(path)),
        };

        figment.extract().map_err(|e| {
            CadenceError::config(format!(
                "Failed to load pipeline definition {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Parse a YAML definition
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Render the definition as YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

type UnitFactory = Arc<dyn Fn() -> Arc<dyn WorkUnit> + Send + Sync>;
type SelectorFactory = Arc<dyn Fn() -> Arc<dyn RouteSelector> + Send + Sync>;

/// Named factories for work units and route selectors
#[derive(Clone, Default)]
pub struct WorkUnitRegistry {
    units: HashMap<String, UnitFactory>,
    selectors: HashMap<String, SelectorFactory>,
}

impl std::fmt::Debug for WorkUnitRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkUnitRegistry")
            .field("units", &self.unit_names())
            .field("selectors", &self.selector_names())
            .finish()
    }
}

impl WorkUnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for the work unit called `name`
    pub fn register_unit<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Arc<dyn WorkUnit> + Send + Sync + 'static,
    {
        self.units.insert(name.into(), Arc::new(factory));
        self
    }

    /// Register a unit instance under its own name; every resolution shares it
    pub fn register_shared_unit(&mut self, unit: Arc<dyn WorkUnit>) -> &mut Self {
        let name = unit.name().to_string();
        self.register_unit(name, move || Arc::clone(&unit))
    }

    /// Register a factory for the route selector called `name`
    pub fn register_selector<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Arc<dyn RouteSelector> + Send + Sync + 'static,
    {
        self.selectors.insert(name.into(), Arc::new(factory));
        self
    }

    /// Register a selector instance under its own name
    pub fn register_shared_selector(&mut self, selector: Arc<dyn RouteSelector>) -> &mut Self {
        let name = selector.name().to_string();
        self.register_selector(name, move || Arc::clone(&selector))
    }

    /// Registered unit names, sorted
    pub fn unit_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.units.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Registered selector names, sorted
    pub fn selector_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.selectors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn unit(&self, stage_index: usize, name: &str) -> Result<Arc<dyn WorkUnit>> {
        self.units.get(name).map(|factory| factory()).ok_or_else(|| {
            CadenceError::config(format!("stage {stage_index}: unknown work unit '{name}'"))
        })
    }

    fn selector(&self, stage_index: usize, name: &str) -> Result<Arc<dyn RouteSelector>> {
        self.selectors.get(name).map(|factory| factory()).ok_or_else(|| {
            CadenceError::config(format!(
                "stage {stage_index}: unknown route selector '{name}'"
            ))
        })
    }

    /// Resolve one stage definition
    fn resolve(&self, stage_index: usize, definition: &StageDefinition) -> Result<Stage> {
        let kind = definition.parse_kind().ok_or_else(|| {
            CadenceError::config(format!(
                "stage {stage_index}: unknown stage kind '{}'",
                definition.kind
            ))
        })?;

        match kind {
            StageKind::Unit => {
                let name = single_name(stage_index, definition)?;
                Ok(Stage::Unit(self.unit(stage_index, name)?))
            }
            StageKind::Router => {
                let name = single_name(stage_index, definition)?;
                Ok(Stage::Router(self.selector(stage_index, name)?))
            }
            StageKind::Parallel => {
                let units = definition
                    .units
                    .iter()
                    .map(|name| self.unit(stage_index, name))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Stage::ParallelGroup(units))
            }
        }
    }
}

fn single_name(stage_index: usize, definition: &StageDefinition) -> Result<&str> {
    match definition.units.as_slice() {
        [name] => Ok(name.as_str()),
        other => Err(CadenceError::config(format!(
            "stage {stage_index}: {} stage takes exactly one unit, got {}",
            definition.kind,
            other.len()
        ))),
    }
}

impl Pipeline {
    /// Build a pipeline from a definition, resolving every unit by name.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unknown stage kinds or names, and
    /// for any stage list [`Pipeline::new`] would reject.
    pub fn from_definition(
        definition: &PipelineDefinition,
        registry: &WorkUnitRegistry,
    ) -> Result<Self> {
        let stages = definition
            .stages
            .iter()
            .enumerate()
            .map(|(index, stage)| registry.resolve(index, stage))
            .collect::<Result<Vec<_>>>()?;

        let pipeline = Pipeline::named(definition.name.clone(), stages)?;
        match &definition.runner {
            Some(runner) => pipeline.with_config(runner.clone()),
            None => Ok(pipeline),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{FieldRouter, FnUnit, KickoffInput, StageOutput};
    use serde_json::json;
    use std::io::Write;
    use std::time::Duration;

    fn registry() -> WorkUnitRegistry {
        let mut registry = WorkUnitRegistry::new();
        registry
            .register_unit("double", || {
                FnUnit::new("double", |input| {
                    let v = input.get_i64("v").unwrap_or_default();
                    Ok(StageOutput::structured(json!({"v": v * 2})))
                })
                .shared()
            })
            .register_shared_unit(
                FnUnit::new("tag_a", |_| Ok(StageOutput::structured(json!({"tag": "a"})))).shared(),
            )
            .register_shared_unit(
                FnUnit::new("tag_b", |_| Ok(StageOutput::structured(json!({"tag": "b"})))).shared(),
            )
            .register_selector("size", || {
                Arc::new(FieldRouter::new("size", "small").add_threshold_rule("large", "v", 10.0))
            });
        registry
    }

    #[tokio::test]
    async fn test_definition_resolves_and_runs() {
        let definition = PipelineDefinition::new("doubler")
            .stage(StageDefinition::unit("double"))
            .stage(StageDefinition::parallel(["tag_a", "tag_b"]))
            .stage(StageDefinition::router("size"));

        let pipeline = Pipeline::from_definition(&definition, &registry()).unwrap();
        assert_eq!(pipeline.name(), "doubler");
        assert_eq!(
            pipeline.kinds(),
            vec![StageKind::Unit, StageKind::Parallel, StageKind::Router]
        );

        let result = pipeline.kickoff(KickoffInput::new().with("v", 6)).await;
        assert_eq!(result.final_input.get_i64("v"), Some(12));
        assert_eq!(result.final_input.get_str("tag"), Some("b"));
        assert_eq!(result.final_input.get_str("route"), Some("large"));
    }

    #[test]
    fn test_unknown_kind_and_names() {
        let registry = registry();

        let bad_kind = PipelineDefinition::new("x").stage(StageDefinition {
            kind: "loop".to_string(),
            units: vec!["double".to_string()],
        });
        let err = Pipeline::from_definition(&bad_kind, &registry).unwrap_err();
        assert!(matches!(err, CadenceError::Configuration(_)));
        assert!(err.to_string().contains("unknown stage kind 'loop'"));

        let bad_unit = PipelineDefinition::new("x").stage(StageDefinition::unit("triple"));
        let err = Pipeline::from_definition(&bad_unit, &registry).unwrap_err();
        assert!(err.to_string().contains("unknown work unit 'triple'"));

        // Selectors and units live in separate namespaces.
        let bad_router = PipelineDefinition::new("x").stage(StageDefinition::router("double"));
        assert!(Pipeline::from_definition(&bad_router, &registry).is_err());
    }

    #[test]
    fn test_structural_errors() {
        let registry = registry();

        let empty = PipelineDefinition::new("x");
        assert!(Pipeline::from_definition(&empty, &registry).is_err());

        let lonely = PipelineDefinition::new("x").stage(StageDefinition::parallel(["tag_a"]));
        assert!(Pipeline::from_definition(&lonely, &registry).is_err());

        let crowded = PipelineDefinition::new("x").stage(StageDefinition {
            kind: "unit".to_string(),
            units: vec!["tag_a".to_string(), "tag_b".to_string()],
        });
        let err = Pipeline::from_definition(&crowded, &registry).unwrap_err();
        assert!(err.to_string().contains("exactly one unit"));
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
name = "from-file"

[runner]
deadline = "5s"

[[stages]]
kind = "unit"
units = ["double"]

[[stages]]
kind = "parallel"
units = ["tag_a", "tag_b"]
"#
        )
        .unwrap();

        let definition = PipelineDefinition::from_file(file.path()).unwrap();
        assert_eq!(definition.stages.len(), 2);

        let pipeline = Pipeline::from_definition(&definition, &registry()).unwrap();
        assert_eq!(pipeline.config().deadline, Some(Duration::from_secs(5)));
        assert_eq!(pipeline.config().max_concurrent_kickoffs, 16);
    }

    #[test]
    fn test_yaml_round_trip() {
        let yaml = concat!(
            "name: routed\n",
            "stages:\n",
            "  - kind: router\n",
            "    units: [size]\n",
            "  - kind: unit\n",
            "    units: [double]\n",
        );
        let definition = PipelineDefinition::from_yaml_str(yaml).unwrap();
        assert_eq!(definition.stages[0], StageDefinition::router("size"));

        let rendered = definition.to_yaml().unwrap();
        assert_eq!(PipelineDefinition::from_yaml_str(&rendered).unwrap(), definition);
    }

    #[test]
    fn test_missing_file() {
        let err = PipelineDefinition::from_file("/nonexistent/pipeline.yaml").unwrap_err();
        assert!(matches!(err, CadenceError::Configuration(_)));
    }
}
