use std::{num::NonZeroUsize, path::PathBuf};

use log::{info, warn};

use crate::{
    cadence::{Cadences, Fired},
    checkpoint::Checkpointer,
    config::RunConfig,
    error::{MonitorErr, Result},
    grads::GradientSummary,
    image::ImageIo,
    params::NamedParams,
    reporting::{self, MetricsBackend, StepRecord},
    sample::{SampleGenerator, SampleRequest},
};

const CKPT_DIR: &str = "ckpt";
const OUTPUT_DIR: &str = "output";
const SAMPLE_PREFIX: &str = "lora";

type EnvLookup = Box<dyn Fn(&str) -> Option<String>>;

/// What the training loop exposes about the step that just finished.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutputs {
    /// Loss of the last micro-batch, before rescaling by `grad_accumulation`.
    pub loss: f32,
    pub grad_accumulation: NonZeroUsize,
    /// Smoothed loss kept by the loop, printed instead of `loss` when present.
    pub log_loss: Option<f32>,
    /// Auxiliary scalar forwarded to the metrics backend, e.g. the sampled timestep.
    pub t: Option<f32>,
}

impl StepOutputs {
    pub fn new(loss: f32) -> Self {
        Self {
            loss,
            grad_accumulation: NonZeroUsize::MIN,
            log_loss: None,
            t: None,
        }
    }

    /// The loss over the whole accumulated batch.
    pub fn scaled_loss(&self) -> f32 {
        self.loss * self.grad_accumulation.get() as f32
    }
}

/// The decisions taken on a single step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub step: u64,
    pub summary: GradientSummary,
    pub fired: Fired,
    pub emitted: bool,
    pub progress: Option<String>,
    pub checkpoint: Option<PathBuf>,
    pub samples: Vec<PathBuf>,
}

/// Per-step instrumentation hook for a training loop.
///
/// The loop calls [`StepMonitor::on_step_complete`] once after every optimization step. The
/// monitor counts steps and, on their own cadences, prints progress, saves a checkpoint and
/// renders samples. Checkpoints and samples run inline, so the next step never starts before
/// they finish.
pub struct StepMonitor<C, G, I> {
    config: RunConfig,
    cadences: Cadences,
    steps: u64,

    backend: Option<Box<dyn MetricsBackend>>,
    logging_enabled: bool,

    checkpointer: C,
    generator: G,
    images: I,
}

impl<C, G, I> StepMonitor<C, G, I>
where
    C: Checkpointer,
    G: SampleGenerator,
    I: ImageIo,
{
    /// Returns a builder for a `StepMonitor`.
    ///
    /// # Arguments
    /// * `config` - The run configuration.
    /// * `checkpointer` - Persists the weights on checkpoint steps.
    /// * `generator` - Renders samples on sample steps.
    /// * `images` - Reads conditioning images and writes rendered samples.
    pub fn builder(
        config: RunConfig,
        checkpointer: C,
        generator: G,
        images: I,
    ) -> StepMonitorBuilder<C, G, I> {
        StepMonitorBuilder {
            config,
            checkpointer,
            generator,
            images,
            backend: None,
            env: Box::new(|key| std::env::var(key).ok()),
        }
    }

    /// Handles the end of an optimization step.
    ///
    /// # Arguments
    /// * `epoch` - The loop's current epoch.
    /// * `batch_idx` - Index of the batch within the epoch.
    /// * `outputs` - Loss and related values of the step.
    /// * `params` - The model parameters, with the gradients of this step.
    ///
    /// # Errors
    /// Checkpoint and sample failures are returned as is. Metrics backend failures are only
    /// logged.
    pub fn on_step_complete(
        &mut self,
        epoch: usize,
        batch_idx: usize,
        outputs: &StepOutputs,
        params: &dyn NamedParams,
    ) -> Result<StepReport> {
        let summary = GradientSummary::collect(params);

        self.steps += 1;
        let step = self.steps;

        let emitted = self.emit(epoch, batch_idx, outputs, &summary);
        let fired = self.cadences.evaluate(step);

        let progress = fired.print.then(|| {
            let loss = outputs.log_loss.unwrap_or(outputs.loss);
            let line = reporting::progress_line(
                epoch,
                step,
                batch_idx,
                loss,
                summary.mean_norm,
                summary.max_norm,
            );
            info!("{line}");
            line
        });

        let checkpoint = if fired.checkpoint {
            info!("Epoch: {epoch}, Steps: {step} - Saving weights");
            let dir = self.checkpoint_dir(step);
            self.checkpointer
                .save_weights(params, &dir)
                .map_err(|source| MonitorErr::Checkpoint {
                    dir: dir.clone(),
                    source,
                })?;
            Some(dir)
        } else {
            None
        };

        let samples = if fired.sample {
            info!("Epoch: {epoch}, Steps: {step} - Generating a sample");
            let request = SampleRequest::build(&self.config, &self.images)?;
            let out_dir = self.sample_dir();
            request.render(
                params,
                &mut self.generator,
                &self.images,
                &out_dir,
                &sample_stem(step),
            )?
        } else {
            Vec::new()
        };

        Ok(StepReport {
            step,
            summary,
            fired,
            emitted,
            progress,
            checkpoint,
            samples,
        })
    }

    fn emit(
        &mut self,
        epoch: usize,
        batch: usize,
        outputs: &StepOutputs,
        summary: &GradientSummary,
    ) -> bool {
        if !self.logging_enabled {
            return false;
        }
        let Some(backend) = self.backend.as_mut() else {
            return false;
        };

        let record = StepRecord {
            batch,
            steps: self.steps,
            epoch,
            gradient_size: summary.mean_norm,
            loss: outputs.scaled_loss(),
            t: outputs.t,
        };

        match backend.emit(&record) {
            Ok(()) => true,
            Err(e) => {
                warn!("failed to emit metrics for step {}: {e}", self.steps);
                false
            }
        }
    }

    /// `{save_path}/{run_name}/ckpt/{step}`
    pub fn checkpoint_dir(&self, step: u64) -> PathBuf {
        self.config.run_dir().join(CKPT_DIR).join(step.to_string())
    }

    /// `{save_path}/{run_name}/output`
    pub fn sample_dir(&self) -> PathBuf {
        self.config.run_dir().join(OUTPUT_DIR)
    }

    /// `{save_path}/{run_name}/output/lora_{step}_{index}.{ext}`
    pub fn sample_path(&self, step: u64, index: usize) -> PathBuf {
        self.sample_dir()
            .join(format!("{}_{index}.{}", sample_stem(step), self.images.extension()))
    }

    /// Number of completed steps seen so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn logging_enabled(&self) -> bool {
        self.logging_enabled
    }

    pub fn checkpointer(&self) -> &C {
        &self.checkpointer
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }
}

fn sample_stem(step: u64) -> String {
    format!("{SAMPLE_PREFIX}_{step}")
}

/// Builder for [`StepMonitor`]. Logging is resolved once, in [`StepMonitorBuilder::build`].
pub struct StepMonitorBuilder<C, G, I> {
    config: RunConfig,
    checkpointer: C,
    generator: G,
    images: I,
    backend: Option<Box<dyn MetricsBackend>>,
    env: EnvLookup,
}

impl<C, G, I> StepMonitorBuilder<C, G, I>
where
    C: Checkpointer,
    G: SampleGenerator,
    I: ImageIo,
{
    /// Attaches a metrics backend.
    pub fn backend(mut self, backend: impl MetricsBackend + 'static) -> Self {
        self.backend = Some(Box::new(backend));
        self
    }

    /// Replaces the process environment as the source of the backend credential.
    pub fn env_lookup(mut self, lookup: impl Fn(&str) -> Option<String> + 'static) -> Self {
        self.env = Box::new(lookup);
        self
    }

    pub fn build(self) -> StepMonitor<C, G, I> {
        let logging_enabled = reporting::resolve_logging(
            self.backend.as_deref(),
            self.config.api_key_env(),
            &self.env,
        );

        info!(
            "monitoring run {} (print every {}, save every {}, sample every {}, metrics {})",
            self.config.run_name,
            self.config.print_every_n_steps,
            self.config.save_interval,
            self.config.sample_interval,
            if logging_enabled { "on" } else { "off" },
        );

        StepMonitor {
            cadences: Cadences::from_config(&self.config),
            config: self.config,
            steps: 0,
            backend: self.backend,
            logging_enabled,
            checkpointer: self.checkpointer,
            generator: self.generator,
            images: self.images,
        }
    }
}
