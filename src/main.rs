use std::env;

use anyhow::Context;
use log::{info, warn};
use ndarray::{Array1, ArrayD, IxDyn};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde_json::json;

use step_monitor::{
    GenerationRequest, Image, ImageIo, JsonlBackend, NamedParams, Param, ParamStore, PpmImageIo,
    RunConfig, SafetensorsCheckpointer, SampleGenerator, SampleSpec, StepMonitor, StepOutputs,
    error::GenerateErr,
};

const DEFAULT_STEPS: usize = 200;
const DATASET_LEN: usize = 64;
const BATCH_SIZE: usize = 8;
const LEARNING_RATE: f32 = 0.05;

/// Renders the fitted line `y = w * x + b` over the conditioning image.
struct LineRenderer;

impl SampleGenerator for LineRenderer {
    fn generate(
        &mut self,
        params: &dyn NamedParams,
        request: &GenerationRequest<'_>,
        rng: &mut StdRng,
    ) -> Result<Vec<Image>, GenerateErr> {
        let (mut w, mut b) = (0.0, 0.0);
        for (name, p) in params.named_params() {
            let v = p.value.iter().next().copied().unwrap_or_default();
            match name {
                "weight" => w = v,
                "bias" => b = v,
                _ => {}
            }
        }

        let (width, height) = (request.width, request.height);
        let mut image = Image::black(width, height);
        if let Some(cond) = request.conditions.first() {
            let base = &cond.condition;
            for y in 0..height.min(base.height()) {
                for x in 0..width.min(base.width()) {
                    for c in 0..3 {
                        image.pixels_mut()[[y, x, c]] = base.pixels()[[y, x, c]] / 2;
                    }
                }
            }
        }

        // x and y both span [-1, 1] across the canvas.
        for px in 0..width {
            let x = px as f32 / (width - 1).max(1) as f32 * 2.0 - 1.0;
            let y = (w * x + b) / 4.0;
            let py = ((1.0 - y) / 2.0 * (height - 1) as f32).round();
            if (0.0..height as f32).contains(&py) {
                let shade: u8 = rng.random_range(200..=255);
                image.pixels_mut()[[py as usize, px, 0]] = shade;
            }
        }

        Ok(vec![image])
    }
}

fn dataset(rng: &mut StdRng) -> (Array1<f32>, Array1<f32>) {
    let x = Array1::from_iter((0..DATASET_LEN).map(|_| rng.random_range(-1.0..1.0)));
    let y = x.mapv(|x| 3.0 * x + 1.0 + rng.random_range(-0.1..0.1));
    (x, y)
}

fn scalar(v: f32) -> ArrayD<f32> {
    ArrayD::from_elem(IxDyn(&[1]), v)
}

fn get(params: &ParamStore, name: &str) -> f32 {
    params
        .get(name)
        .and_then(|p| p.value.iter().next().copied())
        .unwrap_or_default()
}

/// Writes a gradient image for demo runs that configure no samples.
fn demo_sample(config: &RunConfig) -> anyhow::Result<SampleSpec> {
    let dir = config.run_dir();
    std::fs::create_dir_all(&dir)?;

    let (w, h) = (config.sample_width.get(), config.sample_height.get());
    let mut image = Image::black(w, h);
    for ((y, x, c), v) in image.pixels_mut().indexed_iter_mut() {
        *v = match c {
            1 => (x * 255 / w.max(1)) as u8,
            2 => (y * 255 / h.max(1)) as u8,
            _ => 0,
        };
    }

    let path = dir.join("demo_condition.ppm");
    PpmImageIo.write(&path, &image)?;

    Ok(SampleSpec {
        condition: path.clone(),
        context: path,
        prompt: "a straight line".to_string(),
    })
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();
    let run_name = env::var("RUN_NAME").unwrap_or_else(|_| "demo".to_string());

    let mut config = match args.get(1) {
        Some(path) => RunConfig::from_file(&run_name, path)
            .with_context(|| format!("loading config from {path}"))?,
        None => RunConfig::from_json(
            &run_name,
            &json!({
                "print_every_n_steps": 10,
                "save_interval": 100,
                "sample_interval": 100,
                "sample_height": 64,
                "sample_width": 64,
            }),
        )?,
    };
    let total_steps = args
        .get(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_STEPS);

    if config.samples.is_empty() {
        config.samples.push(demo_sample(&config)?);
    }

    let mut builder = StepMonitor::builder(
        config.clone(),
        SafetensorsCheckpointer,
        LineRenderer,
        PpmImageIo,
    );
    match JsonlBackend::open(&config) {
        Ok(backend) => builder = builder.backend(backend),
        Err(e) => warn!("metrics backend unavailable: {e}"),
    }
    let mut monitor = builder.build();

    let mut rng = StdRng::seed_from_u64(config.sample_seed);
    let (xs, ys) = dataset(&mut rng);

    let mut params = ParamStore::new();
    params.insert("weight", Param::new(scalar(0.0)));
    params.insert("bias", Param::new(scalar(0.0)));
    params.insert("embedding", Param::frozen(ArrayD::ones(IxDyn(&[4, 4]))));

    let batches_per_epoch = DATASET_LEN / BATCH_SIZE;
    let mut smoothed = None;

    for step in 0..total_steps {
        let epoch = step / batches_per_epoch;
        let batch_idx = step % batches_per_epoch;
        let range = batch_idx * BATCH_SIZE..(batch_idx + 1) * BATCH_SIZE;

        let (w, b) = (get(&params, "weight"), get(&params, "bias"));
        let x = xs.slice(ndarray::s![range.clone()]);
        let y = ys.slice(ndarray::s![range]);

        let err = x.mapv(|x| w * x + b) - y;
        let loss = err.mapv(|e| e * e).mean().unwrap_or_default();
        let grad_w = 2.0 * (&err * &x).mean().unwrap_or_default();
        let grad_b = 2.0 * err.mean().unwrap_or_default();

        params.zero_grads();
        for (name, grad, value) in [("weight", grad_w, w), ("bias", grad_b, b)] {
            if let Some(p) = params.get_mut(name) {
                p.value = scalar(value - LEARNING_RATE * grad);
                p.grad = Some(scalar(grad));
            }
        }

        let log_loss = smoothed.map_or(loss, |s: f32| 0.9 * s + 0.1 * loss);
        smoothed = Some(log_loss);

        let outputs = StepOutputs {
            log_loss: Some(log_loss),
            ..StepOutputs::new(loss)
        };
        monitor.on_step_complete(epoch, batch_idx, &outputs, &params)?;
    }

    info!(
        "finished {} steps: weight {:.3}, bias {:.3}",
        monitor.steps(),
        get(&params, "weight"),
        get(&params, "bias"),
    );

    Ok(())
}
