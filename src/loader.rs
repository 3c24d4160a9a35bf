// src/loader.rs
use crate::error::{Error, Result};
use crate::weights::WeightSet;
use half::{bf16, f16};
use memmap2::MmapOptions;
use ndarray::{ArrayD, IxDyn};
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};
use std::fs::File;
use std::path::Path;

fn decode(name: &str, view: &TensorView<'_>) -> Result<Vec<f32>> {
    let bytes = view.data();
    let values = match view.dtype() {
        Dtype::F32 => bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        Dtype::BF16 => bytes
            .chunks_exact(2)
            .map(|b| bf16::from_le_bytes([b[0], b[1]]).to_f32())
            .collect(),
        Dtype::F16 => bytes
            .chunks_exact(2)
            .map(|b| f16::from_le_bytes([b[0], b[1]]).to_f32())
            .collect(),
        other => {
            return Err(Error::UnsupportedDType {
                name: name.to_string(),
                dtype: format!("{:?}", other),
            })
        }
    };
    Ok(values)
}

/// Reads every tensor of a safetensors file into a [`WeightSet`].
///
/// With `prefix` set, only names starting with it are kept, so one file can
/// hold a whole model and each layer loads its own slice.
/// F32, BF16 and F16 tensors are widened to `f32`.
pub fn load_safetensors<P: AsRef<Path>>(path: P, prefix: Option<&str>) -> Result<WeightSet> {
    let file = File::open(path.as_ref())?;
    // 只读映射; 文件在加载期间不应被修改
    let mmap = unsafe { MmapOptions::new().map(&file)? };
    let tensors = SafeTensors::deserialize(&mmap)?;

    let mut set = WeightSet::new();
    for (name, view) in tensors.tensors() {
        if prefix.is_some_and(|p| !name.starts_with(p)) {
            continue;
        }
        let data = decode(&name, &view)?;
        let array = ArrayD::from_shape_vec(IxDyn(view.shape()), data)?;
        tracing::debug!(name = %name, dtype = ?view.dtype(), shape = ?view.shape(), "loaded tensor");
        set.insert(name, array);
    }

    tracing::info!(path = %path.as_ref().display(), tensors = set.len(), "safetensors loaded");
    Ok(set)
}

/// Writes a weight set as little-endian F32 safetensors.
pub fn save_safetensors<P: AsRef<Path>>(set: &WeightSet, path: P) -> Result<()> {
    let buffers: Vec<(String, Vec<usize>, Vec<u8>)> = set
        .iter()
        .map(|(name, t)| {
            let bytes = t.iter().flat_map(|v| v.to_le_bytes()).collect();
            (name.to_string(), t.shape().to_vec(), bytes)
        })
        .collect();

    let mut views = Vec::with_capacity(buffers.len());
    for (name, shape, bytes) in &buffers {
        views.push((name.as_str(), TensorView::new(Dtype::F32, shape.clone(), bytes)?));
    }

    safetensors::serialize_to_file(views, &None, path.as_ref())?;
    tracing::info!(path = %path.as_ref().display(), tensors = set.len(), "safetensors saved");
    Ok(())
}

/// Names in `expected` that `set` lacks. Each one is logged as a warning.
pub fn missing_keys<'k, I>(set: &WeightSet, expected: I) -> Vec<String>
where
    I: IntoIterator<Item = &'k str>,
{
    expected
        .into_iter()
        .filter(|key| !set.contains(key))
        .map(|key| {
            tracing::warn!(key, "parameter not found in weight file");
            key.to_string()
        })
        .collect()
}
