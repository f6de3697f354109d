//! [`Manager`]: drives registered pipelines against object storage,
//! recording every file's outcome in the registry.
//!
//! Pipelines, and files within a pipeline, run strictly one after another.

use serde::Serialize;
use strata_core::{
  identity::PipelineId,
  registry::DatafileState,
  storage::{DataFile, ObjectStorage, is_ignored, relative_name},
  store::Store,
};
use tracing::{debug, error, info, warn};

use crate::{Error, Result, pipeline::Pipeline, registry::DatafileRegistry};

// ─── Reports ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
  pub pipeline:  PipelineId,
  pub processed: usize,
  pub failed:    usize,
  pub skipped:   usize,
  /// Set when the pipeline could not run at all (e.g. listing failed).
  pub error:     Option<String>,
}

impl PipelineReport {
  fn new(pipeline: PipelineId) -> Self {
    Self { pipeline, processed: 0, failed: 0, skipped: 0, error: None }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
  pub pipelines: Vec<PipelineReport>,
}

impl RunReport {
  pub fn processed(&self) -> usize { self.pipelines.iter().map(|p| p.processed).sum() }

  pub fn failed(&self) -> usize {
    self
      .pipelines
      .iter()
      .map(|p| p.failed + usize::from(p.error.is_some()))
      .sum()
  }

  pub fn skipped(&self) -> usize { self.pipelines.iter().map(|p| p.skipped).sum() }
}

// ─── Manager ─────────────────────────────────────────────────────────────────

struct Binding {
  pipeline:      Box<dyn Pipeline>,
  /// `None` for file-less pipelines, which run once per invocation.
  sub_directory: Option<String>,
}

pub struct Manager<S, O> {
  storage:  O,
  registry: DatafileRegistry<S>,
  bindings: Vec<Binding>,
}

impl<S: Store, O: ObjectStorage> Manager<S, O> {
  pub fn new(storage: O, registry: DatafileRegistry<S>) -> Self {
    Self { storage, registry, bindings: Vec::new() }
  }

  pub fn registry(&self) -> &DatafileRegistry<S> { &self.registry }

  /// Bind `pipeline` to the files under `sub_directory`.
  pub fn register(
    &mut self,
    pipeline: Box<dyn Pipeline>,
    sub_directory: Option<&str>,
  ) -> Result<()> {
    if self.position(pipeline.id()).is_some() {
      return Err(Error::AlreadyRegistered(pipeline.id().clone()));
    }
    debug!(pipeline = %pipeline.id(), sub_directory, "registered pipeline");
    self.bindings.push(Binding {
      pipeline,
      sub_directory: sub_directory.map(str::to_owned),
    });
    Ok(())
  }

  pub fn get(&self, id: &PipelineId) -> Option<&dyn Pipeline> {
    self.position(id).map(|i| self.bindings[i].pipeline.as_ref())
  }

  pub fn remove(&mut self, id: &PipelineId) -> Option<Box<dyn Pipeline>> {
    self.position(id).map(|i| self.bindings.remove(i).pipeline)
  }

  /// Registered identities in registration order.
  pub fn pipeline_ids(&self) -> Vec<PipelineId> {
    self.bindings.iter().map(|b| b.pipeline.id().clone()).collect()
  }

  fn position(&self, id: &PipelineId) -> Option<usize> {
    self.bindings.iter().position(|b| b.pipeline.id() == id)
  }

  /// Process every not-yet-done file of one pipeline. Per-file failures are
  /// recorded and skipped past; only fatal errors are returned.
  pub async fn process_one(&self, id: &PipelineId) -> Result<PipelineReport> {
    let index = self
      .position(id)
      .ok_or_else(|| Error::UnknownPipeline(id.clone()))?;
    let binding = &self.bindings[index];
    let source = id.to_string();
    let mut report = PipelineReport::new(id.clone());

    let Some(dir) = &binding.sub_directory else {
      self.run(binding.pipeline.as_ref(), &source, "", None, &mut report).await?;
      return Ok(report);
    };

    let done = self
      .registry
      .processed_or_ignored_files(Some(&source))
      .await?
      .remove(&source)
      .unwrap_or_default();

    let mut keys = self.storage.list_files(dir).await.map_err(Error::storage)?;
    keys.retain(|k| !is_ignored(k));
    keys.sort_by(|a, b| relative_name(dir, a).cmp(relative_name(dir, b)));

    for key in keys {
      let name = relative_name(dir, &key);
      if done.contains(name) {
        debug!(pipeline = %id, file = name, "already done; skipping");
        report.skipped += 1;
        continue;
      }
      self
        .run(binding.pipeline.as_ref(), &source, name, Some(&key), &mut report)
        .await?;
    }
    Ok(report)
  }

  /// One registry-bracketed invocation of `pipeline.process`. A file the
  /// registry refuses to start is counted as skipped.
  async fn run(
    &self,
    pipeline: &dyn Pipeline,
    source: &str,
    file_name: &str,
    key: Option<&str>,
    report: &mut PipelineReport,
  ) -> Result<()> {
    info!(pipeline = %source, file = file_name, "processing");
    match self.registry.record_start(source, file_name).await {
      Ok(_) => {}
      Err(e @ Error::InvalidTransition { .. }) => {
        warn!(pipeline = %source, file = file_name, error = %e, "registry refused; skipping");
        report.skipped += 1;
        return Ok(());
      }
      Err(e) => return Err(e),
    }

    let outcome = match key {
      Some(key) => match self.storage.read_file(key).await {
        Ok(data) => {
          let file = DataFile::new(key, data).with_name(file_name);
          pipeline.process(Some(&file)).await
        }
        Err(e) => Err(Error::storage(e)),
      },
      None => pipeline.process(None).await,
    };

    match outcome {
      Ok(()) => {
        self
          .registry
          .record_result(source, file_name, DatafileState::Processed, None)
          .await?;
        report.processed += 1;
        Ok(())
      }
      Err(e) => {
        error!(pipeline = %source, file = file_name, error = %e, "processing failed");
        let message = e.to_string();
        self
          .registry
          .record_result(source, file_name, DatafileState::Failed, Some(&message))
          .await?;
        report.failed += 1;
        if e.is_fatal() { Err(e) } else { Ok(()) }
      }
    }
  }

  /// Process every registered pipeline in registration order.
  pub async fn process_all(&self) -> Result<RunReport> {
    let ids = self.pipeline_ids();
    let total = ids.len();
    let mut run = RunReport::default();
    for (i, id) in ids.iter().enumerate() {
      info!(pipeline = %id, "[{}/{}] processing pipeline", i + 1, total);
      match self.process_one(id).await {
        Ok(report) => {
          info!(
            pipeline = %id,
            processed = report.processed,
            failed = report.failed,
            skipped = report.skipped,
            "pipeline finished"
          );
          run.pipelines.push(report);
        }
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
          error!(pipeline = %id, error = %e, "pipeline could not run");
          let mut report = PipelineReport::new(id.clone());
          report.error = Some(e.to_string());
          run.pipelines.push(report);
        }
      }
    }
    Ok(run)
  }
}
