//! The handle a pipeline uses while building one node.

use std::sync::Arc;

use kiln_common::Guid;
use kiln_db::{isolate, Database, InstanceInfo, OutputInstance};
use serde_json::Value;

use crate::asset::Asset;
use crate::error::BuildError;

use super::Builder;

/// Staging area and service access for one pipeline invocation.
///
/// Outputs written here reach the output database only after the pipeline
/// returns successfully.
pub struct BuildContext<'a> {
    builder: &'a Builder<'a>,
    failed_children: Vec<Guid>,
    outputs: Vec<OutputInstance>,
    warnings: Vec<String>,
}

impl<'a> BuildContext<'a> {
    pub(crate) fn new(builder: &'a Builder<'a>, failed_children: Vec<Guid>) -> Self {
        Self {
            builder,
            failed_children,
            outputs: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Stages an output instance. A later output with the same identifier
    /// replaces the earlier one.
    pub fn write_output(&mut self, output: OutputInstance) -> Result<(), BuildError> {
        if output.guid.is_nil() {
            return Err(BuildError::pipeline(format!(
                "output '{}' has a nil identifier",
                output.path
            )));
        }
        self.outputs.retain(|o| o.guid != output.guid);
        self.outputs.push(output);
        Ok(())
    }

    /// Reads an output built earlier, in this session or a previous one.
    pub fn read_built(&self, guid: Guid) -> Result<OutputInstance, BuildError> {
        if let Some(instance) = self.builder.session.cached_read(guid) {
            return Ok(instance);
        }
        let instance = isolate(self.builder.output_db, guid).map_err(|e| {
            BuildError::source_unavailable(format!("built output {guid}: {e}")).for_guid(guid)
        })?;
        self.builder.session.remember_read(instance.clone());
        Ok(instance)
    }

    /// Builds an in-memory product of another asset.
    pub fn build_product(
        &self,
        source: Option<&InstanceInfo>,
        asset: &Asset,
        params: Option<&Value>,
    ) -> Result<Arc<Asset>, BuildError> {
        self.builder.build_product(source, asset, params)
    }

    /// Builds another asset into its own output right away. Its counters
    /// are added to the report of the walk in progress.
    pub fn build_ad_hoc_output(
        &self,
        asset: Asset,
        output_path: &str,
        output_guid: Guid,
        params: Option<&Value>,
    ) -> Result<(), BuildError> {
        self.builder
            .build_ad_hoc_output(asset, output_path, output_guid, params)
    }

    /// Records a warning; the node then succeeds with warnings.
    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Output identifiers of the children that failed in this build.
    pub fn failed_children(&self) -> &[Guid] {
        &self.failed_children
    }

    /// The source database.
    pub fn source_db(&self) -> &dyn Database {
        self.builder.source_db
    }

    pub(crate) fn finish(self) -> (Vec<OutputInstance>, Vec<String>) {
        (self.outputs, self.warnings)
    }
}
