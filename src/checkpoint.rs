use std::{
    fs::{self, File},
    io::{self, Write},
    path::Path,
};

use ndarray::{ArrayD, IxDyn};
use safetensors::{Dtype, SafeTensors, tensor::TensorView};

use crate::params::{NamedParams, Param, ParamStore};

/// File written inside every checkpoint directory.
pub const WEIGHTS_FILE: &str = "weights.safetensors";

/// Persists model weights into a checkpoint directory.
///
/// Implementations block until the checkpoint is complete and must never leave a partially
/// written file where a reader would take it for a valid checkpoint.
pub trait Checkpointer {
    fn save_weights(&mut self, params: &dyn NamedParams, dir: &Path) -> io::Result<()>;
}

/// Writes the trainable parameters as a single `safetensors` file.
#[derive(Debug, Default, Clone, Copy)]
pub struct SafetensorsCheckpointer;

impl Checkpointer for SafetensorsCheckpointer {
    fn save_weights(&mut self, params: &dyn NamedParams, dir: &Path) -> io::Result<()> {
        fs::create_dir_all(dir)?;

        let tensors: Vec<(&str, Vec<usize>, Vec<f32>)> = params
            .named_params()
            .filter(|(_, p)| p.trainable)
            .map(|(name, p)| (name, p.value.shape().to_vec(), p.value.iter().copied().collect()))
            .collect();

        let views = tensors
            .iter()
            .map(|(name, shape, data)| {
                TensorView::new(Dtype::F32, shape.clone(), bytemuck::cast_slice(data.as_slice()))
                    .map(|view| (*name, view))
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

        let bytes = safetensors::serialize(views, &None)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

        // Written under a temporary name and renamed into place once synced.
        let tmp = dir.join(format!("{WEIGHTS_FILE}.tmp"));
        let res = write_synced(&tmp, &bytes)
            .and_then(|()| fs::rename(&tmp, dir.join(WEIGHTS_FILE)));
        if res.is_err() {
            let _ = fs::remove_file(&tmp);
        }

        res
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Reads back the weights stored by [`SafetensorsCheckpointer`] in `dir`.
pub fn load_weights(dir: &Path) -> io::Result<ParamStore> {
    let bytes = fs::read(dir.join(WEIGHTS_FILE))?;
    let tensors = SafeTensors::deserialize(&bytes)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

    let mut names = tensors.names();
    names.sort();

    let mut store = ParamStore::new();
    for name in names {
        let view = tensors
            .tensor(name)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

        if view.dtype() != Dtype::F32 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("tensor {name} is {:?}, expected F32", view.dtype()),
            ));
        }

        let data: Vec<f32> = bytemuck::pod_collect_to_vec(view.data());
        let value = ArrayD::from_shape_vec(IxDyn(view.shape()), data)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        store.insert(name.as_str(), Param::new(value));
    }

    Ok(store)
}
