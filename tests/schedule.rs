use std::{
    cell::RefCell,
    io,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    rc::Rc,
};

use ndarray::{ArrayD, IxDyn};
use rand::rngs::StdRng;

use step_monitor::{
    GenerationRequest, Image, ImageIo, MetricsBackend, NamedParams, Param, ParamStore, RunConfig,
    SampleGenerator, SampleSpec, StepMonitor, StepOutputs, StepRecord, checkpoint::Checkpointer,
    error::GenerateErr,
};

/// Everything the collaborators were asked to do, in call order.
#[derive(Debug, Default)]
struct Calls {
    checkpoints: Vec<PathBuf>,
    generations: Vec<String>,
    writes: Vec<PathBuf>,
    records: Vec<StepRecord>,
}

type Shared = Rc<RefCell<Calls>>;

struct FakeCheckpointer(Shared);

impl Checkpointer for FakeCheckpointer {
    fn save_weights(&mut self, _params: &dyn NamedParams, dir: &Path) -> io::Result<()> {
        self.0.borrow_mut().checkpoints.push(dir.to_path_buf());
        Ok(())
    }
}

struct FakeGenerator(Shared);

impl SampleGenerator for FakeGenerator {
    fn generate(
        &mut self,
        _params: &dyn NamedParams,
        request: &GenerationRequest<'_>,
        _rng: &mut StdRng,
    ) -> Result<Vec<Image>, GenerateErr> {
        self.0.borrow_mut().generations.push(request.prompt.to_string());
        Ok(vec![Image::black(request.width, request.height)])
    }
}

struct FakeImages(Shared);

impl ImageIo for FakeImages {
    fn read(&self, _path: &Path) -> io::Result<Image> {
        Ok(Image::black(2, 2))
    }

    fn write(&self, path: &Path, _image: &Image) -> io::Result<()> {
        self.0.borrow_mut().writes.push(path.to_path_buf());
        Ok(())
    }

    fn extension(&self) -> &str {
        "jpg"
    }
}

struct FakeBackend(Shared);

impl MetricsBackend for FakeBackend {
    fn initialized(&self) -> bool {
        true
    }

    fn emit(&mut self, record: &StepRecord) -> io::Result<()> {
        self.0.borrow_mut().records.push(record.clone());
        Ok(())
    }
}

fn config(tag: &str, print: usize, save: usize, sample: usize) -> RunConfig {
    let mut config = RunConfig::new("lora_run");
    config.save_path =
        std::env::temp_dir().join(format!("step_monitor_it_{tag}_{}", std::process::id()));
    config.print_every_n_steps = NonZeroUsize::new(print).unwrap();
    config.save_interval = NonZeroUsize::new(save).unwrap();
    config.sample_interval = NonZeroUsize::new(sample).unwrap();
    config.samples = vec![SampleSpec {
        condition: PathBuf::from("val/condition.jpg"),
        context: PathBuf::from("val/context.jpg"),
        prompt: "dense prediction".to_string(),
    }];
    config
}

fn monitor(
    config: RunConfig,
    calls: &Shared,
    credential: bool,
) -> StepMonitor<FakeCheckpointer, FakeGenerator, FakeImages> {
    StepMonitor::builder(
        config,
        FakeCheckpointer(calls.clone()),
        FakeGenerator(calls.clone()),
        FakeImages(calls.clone()),
    )
    .backend(FakeBackend(calls.clone()))
    .env_lookup(move |_| credential.then(|| "token".to_string()))
    .build()
}

fn one_gradient(norm: f32) -> ParamStore {
    let mut params = ParamStore::new();
    let mut p = Param::new(ArrayD::zeros(IxDyn(&[2])));
    // [norm, 0] has an L2 norm of `norm`.
    p.grad = Some(ArrayD::from_shape_vec(IxDyn(&[2]), vec![norm, 0.0]).unwrap());
    params.insert("lora_b", p);
    params.insert("base", Param::frozen(ArrayD::ones(IxDyn(&[3]))));
    params
}

#[test]
fn thousand_steps_with_default_intervals() {
    let calls = Shared::default();
    let config = config("default", 10, 1000, 1000);
    let root = config.save_path.clone();
    let mut monitor = monitor(config, &calls, true);
    let params = one_gradient(2.0);

    let mut progress_lines = 0;
    for i in 0..1000 {
        let report = monitor
            .on_step_complete(i / 100, i % 100, &StepOutputs::new(0.1), &params)
            .unwrap();

        assert_eq!(report.summary.mean_norm, 2.0);
        assert_eq!(report.summary.max_norm, 2.0);
        assert_eq!(report.summary.params_with_grad, 1);
        progress_lines += report.progress.is_some() as usize;
    }

    assert_eq!(monitor.steps(), 1000);
    assert_eq!(progress_lines, 100);

    let calls = calls.borrow();
    assert_eq!(calls.checkpoints, [root.join("lora_run/ckpt/1000")]);
    assert_eq!(calls.generations, ["dense prediction"]);
    assert_eq!(calls.writes, [root.join("lora_run/output/lora_1000_0.jpg")]);
    assert_eq!(calls.records.len(), 1000);
    assert_eq!(calls.records[999].steps, 1000);

    std::fs::remove_dir_all(&root).unwrap();
}

#[test]
fn checkpoint_and_sample_cadences_are_independent() {
    let calls = Shared::default();
    let config = config("independent", 10, 500, 1000);
    let root = config.save_path.clone();
    let mut monitor = monitor(config, &calls, false);
    let params = one_gradient(1.0);

    let mut sample_steps = Vec::new();
    for _ in 0..1000 {
        let report = monitor
            .on_step_complete(0, 0, &StepOutputs::new(1.0), &params)
            .unwrap();
        if report.fired.sample {
            sample_steps.push(report.step);
        }
    }

    let calls = calls.borrow();
    assert_eq!(
        calls.checkpoints,
        [monitor.checkpoint_dir(500), monitor.checkpoint_dir(1000)]
    );
    assert_eq!(sample_steps, [1000]);
    assert_eq!(calls.writes, [monitor.sample_path(1000, 0)]);

    std::fs::remove_dir_all(&root).unwrap();
}

#[test]
fn missing_credential_only_disables_records() {
    let calls = Shared::default();
    let config = config("nocred", 2, 4, 4);
    let root = config.save_path.clone();
    let mut monitor = monitor(config, &calls, false);
    assert!(!monitor.logging_enabled());

    let mut printed = 0;
    for _ in 0..8 {
        let report = monitor
            .on_step_complete(0, 0, &StepOutputs::new(1.0), &ParamStore::new())
            .unwrap();
        assert!(!report.emitted);
        printed += report.progress.is_some() as usize;
    }

    let calls = calls.borrow();
    assert!(calls.records.is_empty());
    assert_eq!(printed, 4);
    assert_eq!(calls.checkpoints.len(), 2);
    assert_eq!(calls.generations.len(), 2);

    std::fs::remove_dir_all(&root).unwrap();
}

#[test]
fn every_action_fires_on_a_shared_step_in_order() {
    let calls = Shared::default();
    let config = config("shared", 3, 3, 3);
    let root = config.save_path.clone();
    let mut monitor = monitor(config, &calls, true);

    let mut last = None;
    for _ in 0..3 {
        last = Some(
            monitor
                .on_step_complete(1, 2, &StepOutputs::new(0.5), &ParamStore::new())
                .unwrap(),
        );
    }
    let report = last.unwrap();

    assert!(report.fired.print && report.fired.checkpoint && report.fired.sample);
    assert!(report.emitted);
    assert_eq!(report.checkpoint, Some(monitor.checkpoint_dir(3)));
    assert_eq!(report.samples, [monitor.sample_path(3, 0)]);
    assert_eq!(report.summary.mean_norm, 0.0);

    std::fs::remove_dir_all(&root).unwrap();
}

#[test]
fn checkpoint_failure_reaches_the_caller() {
    struct Full;

    impl Checkpointer for Full {
        fn save_weights(&mut self, _params: &dyn NamedParams, _dir: &Path) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::StorageFull, "no space left on device"))
        }
    }

    let calls = Shared::default();
    let mut monitor = StepMonitor::builder(
        config("full", 10, 1, 1000),
        Full,
        FakeGenerator(calls.clone()),
        FakeImages(calls.clone()),
    )
    .env_lookup(|_| None)
    .build();

    let err = monitor
        .on_step_complete(0, 0, &StepOutputs::new(1.0), &ParamStore::new())
        .unwrap_err();

    assert_eq!(err.to_string(), "no space left on device");
    let source = std::error::Error::source(&err).unwrap();
    assert_eq!(
        source.downcast_ref::<io::Error>().unwrap().kind(),
        io::ErrorKind::StorageFull
    );
    assert_eq!(monitor.steps(), 1);
}
