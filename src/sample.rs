use std::{
    fs,
    path::{Path, PathBuf},
};

use log::debug;
use rand::{SeedableRng, rngs::StdRng};

use crate::{
    config::RunConfig,
    error::{GenerateErr, MonitorErr, Result},
    image::{Image, ImageIo},
    params::NamedParams,
};

/// A conditioning image paired with the context (demonstration) image for the same task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub condition: Image,
    pub context: Image,
}

/// Everything a generator needs to render one sample.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub prompt: &'a str,
    pub conditions: &'a [Condition],
    pub height: usize,
    pub width: usize,
}

/// Renders images from the model's current weights.
pub trait SampleGenerator {
    /// Generates images for `request`, drawing all randomness from `rng`.
    fn generate(
        &mut self,
        params: &dyn NamedParams,
        request: &GenerationRequest<'_>,
        rng: &mut StdRng,
    ) -> std::result::Result<Vec<Image>, GenerateErr>;
}

#[derive(Debug, Clone)]
struct SampleItem {
    conditions: Vec<Condition>,
    prompt: String,
}

/// The samples rendered on a sample step, with their fixed generation parameters.
#[derive(Debug, Clone)]
pub struct SampleRequest {
    items: Vec<SampleItem>,
    seed: u64,
    height: usize,
    width: usize,
}

impl SampleRequest {
    /// Loads the configured conditioning and context images.
    ///
    /// # Errors
    /// Returns `MonitorErr::SampleIo` if an image cannot be read.
    pub fn build(config: &RunConfig, images: &dyn ImageIo) -> Result<Self> {
        let read = |path: &Path| -> Result<Image> {
            images.read(path).map_err(|source| MonitorErr::SampleIo {
                path: path.to_path_buf(),
                source,
            })
        };

        let items = config
            .samples
            .iter()
            .map(|spec| -> Result<SampleItem> {
                Ok(SampleItem {
                    conditions: vec![Condition {
                        condition: read(&spec.condition)?,
                        context: read(&spec.context)?,
                    }],
                    prompt: spec.prompt.clone(),
                })
            })
            .collect::<Result<_>>()?;

        Ok(Self {
            items,
            seed: config.sample_seed,
            height: config.sample_height.get(),
            width: config.sample_width.get(),
        })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Renders every sample into `out_dir`, naming them `{stem}_{index}.{ext}`.
    ///
    /// The RNG is reseeded on every call, so samples taken at different steps only differ by
    /// the weights.
    ///
    /// # Returns
    /// The paths of the written images, in sample order.
    pub fn render(
        &self,
        params: &dyn NamedParams,
        generator: &mut dyn SampleGenerator,
        images: &dyn ImageIo,
        out_dir: &Path,
        stem: &str,
    ) -> Result<Vec<PathBuf>> {
        let mut rng = StdRng::seed_from_u64(self.seed);

        fs::create_dir_all(out_dir).map_err(|source| MonitorErr::SampleIo {
            path: out_dir.to_path_buf(),
            source,
        })?;

        let mut written = Vec::with_capacity(self.items.len());
        for (index, item) in self.items.iter().enumerate() {
            let request = GenerationRequest {
                prompt: &item.prompt,
                conditions: &item.conditions,
                height: self.height,
                width: self.width,
            };

            let generated = generator
                .generate(params, &request, &mut rng)
                .map_err(|source| MonitorErr::Generate { index, source })?;
            let image = generated
                .first()
                .ok_or(MonitorErr::EmptyGeneration { index })?;

            let path = out_dir.join(format!("{stem}_{index}.{}", images.extension()));
            images
                .write(&path, image)
                .map_err(|source| MonitorErr::SampleIo {
                    path: path.clone(),
                    source,
                })?;

            debug!("wrote sample {index} to {}", path.display());
            written.push(path);
        }

        Ok(written)
    }
}
