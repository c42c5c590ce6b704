//! The pipeline capability trait, its registry and the build context passed
//! through every build call.

use std::collections::HashMap;
use std::sync::Arc;

use kiln_common::Guid;
use kiln_config::KilnConfig;
use kiln_db::InstanceInfo;
use serde_json::Value;

use crate::asset::Asset;
use crate::builder::BuildContext;
use crate::dependency::BuildReason;
use crate::depends::Depends;
use crate::error::{BuildError, RegistryError};
use crate::fingerprint;

/// Everything a pipeline needs to know about one output build.
#[derive(Debug, Clone, Copy)]
pub struct BuildRequest<'a> {
    /// Source instance metadata; `None` for embedded and ad-hoc assets.
    pub source: Option<&'a InstanceInfo>,
    /// The source asset.
    pub asset: &'a Asset,
    /// Deep structural hash of `asset`.
    pub source_asset_hash: u32,
    /// Database path of the primary output.
    pub output_path: &'a str,
    /// Identifier of the primary output.
    pub output_guid: Guid,
    /// Caller-supplied build parameters.
    pub params: Option<&'a Value>,
    /// Why the build runs.
    pub reason: BuildReason,
}

/// Transforms source assets of one or more types into output instances.
///
/// Implementations must be deterministic: equal inputs under equal settings
/// must give equal outputs, since results are cached by fingerprint.
pub trait Pipeline: Send + Sync {
    /// Unique pipeline name.
    fn name(&self) -> &str;

    /// Implementation version. Bump it whenever output for the same input
    /// changes.
    fn version(&self) -> u32;

    /// Asset type names this pipeline handles.
    fn asset_types(&self) -> &[&str];

    /// Hash of settings the pipeline carries itself.
    fn settings_hash(&self) -> u32 {
        0
    }

    /// Declares the dependencies of `asset` through `depends`.
    fn build_dependencies(
        &self,
        depends: &mut Depends<'_>,
        source: Option<&InstanceInfo>,
        asset: &Asset,
    ) -> Result<(), BuildError> {
        let _ = (depends, source, asset);
        Ok(())
    }

    /// Builds the outputs for one request, staging them in `ctx`.
    fn build_output(
        &self,
        ctx: &mut BuildContext<'_>,
        request: &BuildRequest<'_>,
    ) -> Result<(), BuildError>;

    /// Builds an in-memory product that is never written to a database.
    fn build_product(
        &self,
        source: Option<&InstanceInfo>,
        asset: &Asset,
        params: Option<&Value>,
    ) -> Result<Asset, BuildError> {
        let _ = (source, params);
        Err(BuildError::pipeline(format!(
            "pipeline '{}' does not build products for '{}'",
            self.name(),
            asset.type_name
        )))
    }
}

/// Maps asset types to the pipelines handling them.
#[derive(Default)]
pub struct PipelineRegistry {
    by_name: HashMap<String, Arc<dyn Pipeline>>,
    by_type: HashMap<String, Arc<dyn Pipeline>>,
}

impl PipelineRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pipeline for all of its asset types.
    ///
    /// Nothing is registered if the name or any type is already taken.
    pub fn register(&mut self, pipeline: Arc<dyn Pipeline>) -> Result<(), RegistryError> {
        let name = pipeline.name().to_string();
        if self.by_name.contains_key(&name) {
            return Err(RegistryError::DuplicateName { name });
        }
        for type_name in pipeline.asset_types() {
            if let Some(existing) = self.by_type.get(*type_name) {
                return Err(RegistryError::DuplicateType {
                    type_name: type_name.to_string(),
                    existing: existing.name().to_string(),
                    added: name,
                });
            }
        }
        for type_name in pipeline.asset_types() {
            self.by_type
                .insert(type_name.to_string(), Arc::clone(&pipeline));
        }
        self.by_name.insert(name, pipeline);
        Ok(())
    }

    /// Returns the pipeline handling `type_name`.
    pub fn find(&self, type_name: &str) -> Option<&Arc<dyn Pipeline>> {
        self.by_type.get(type_name)
    }

    /// Returns the pipeline called `name`.
    pub fn by_name(&self, name: &str) -> Option<&Arc<dyn Pipeline>> {
        self.by_name.get(name)
    }

    /// Returns the number of registered pipelines.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Returns `true` if no pipeline is registered.
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Registry plus configuration, passed by reference through a whole build.
pub struct PipelineContext {
    /// Registered pipelines.
    pub registry: PipelineRegistry,
    /// Loaded configuration.
    pub config: KilnConfig,
}

impl PipelineContext {
    /// Creates a context.
    pub fn new(registry: PipelineRegistry, config: KilnConfig) -> Self {
        Self { registry, config }
    }

    /// Returns the pipeline hash of `pipeline` under the loaded configuration.
    pub fn pipeline_hash(&self, pipeline: &dyn Pipeline) -> u32 {
        fingerprint::pipeline_hash(
            pipeline.name(),
            pipeline.version(),
            pipeline.settings_hash(),
            self.config.pipeline_settings_hash(pipeline.name()),
        )
    }

    /// Returns the pipeline handling `type_name`.
    pub fn find(&self, type_name: &str) -> Option<&Arc<dyn Pipeline>> {
        self.registry.find(type_name)
    }
}
