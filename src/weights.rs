// src/weights.rs
use crate::error::{ensure_shape, Error, Result};
use ndarray::{ArrayD, ArrayView1, ArrayView2, Ix1, Ix2, IxDyn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Prefixed parameter name, e.g. `pp("gru_cond", "U") == "gru_cond_U"`.
pub fn pp(prefix: &str, name: &str) -> String {
    format!("{}_{}", prefix, name)
}

/// Named parameter tensors for one or more layers.
///
/// Layers only ever borrow from a weight set; nothing in the crate
/// mutates one after it has been built.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WeightSet {
    params: BTreeMap<String, ArrayD<f32>>,
}

#[derive(Serialize, Deserialize)]
struct Checkpoint {
    params: Vec<(String, Vec<usize>, Vec<f32>)>,
}

impl WeightSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<D: ndarray::Dimension>(&mut self, key: impl Into<String>, value: ndarray::Array<f32, D>) {
        self.params.insert(key.into(), value.into_dyn());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.params.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArrayD<f32>)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get(&self, key: &str) -> Result<&ArrayD<f32>> {
        self.params.get(key).ok_or_else(|| Error::MissingWeight { key: key.to_string() })
    }

    /// `prefix_name` as a `[rows, cols]` matrix.
    pub fn matrix(&self, prefix: &str, name: &str, rows: usize, cols: usize) -> Result<ArrayView2<'_, f32>> {
        let key = pp(prefix, name);
        let t = self.get(&key)?;
        ensure_shape(&key, t.shape(), &[rows, cols])?;
        Ok(t.view().into_dimensionality::<Ix2>()?)
    }

    /// `prefix_name` as a `[len]` vector.
    pub fn vector(&self, prefix: &str, name: &str, len: usize) -> Result<ArrayView1<'_, f32>> {
        let key = pp(prefix, name);
        let t = self.get(&key)?;
        ensure_shape(&key, t.shape(), &[len])?;
        Ok(t.view().into_dimensionality::<Ix1>()?)
    }

    /// Merges `other` into `self`, replacing entries with the same name.
    pub fn extend(&mut self, other: WeightSet) {
        self.params.extend(other.params);
    }

    /// Writes a binary checkpoint of every parameter.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let params = self
            .params
            .iter()
            .map(|(k, v)| (k.clone(), v.shape().to_vec(), v.iter().copied().collect()))
            .collect();
        let checkpoint = Checkpoint { params };
        let writer = BufWriter::new(File::create(path.as_ref())?);
        bincode::serialize_into(writer, &checkpoint)?;
        tracing::info!(path = %path.as_ref().display(), tensors = self.len(), "weight set saved");
        Ok(())
    }

    /// Reads a checkpoint written by [`WeightSet::save`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let checkpoint: Checkpoint = bincode::deserialize_from(reader)?;

        let mut set = WeightSet::new();
        for (name, shape, data) in checkpoint.params {
            let array = ArrayD::from_shape_vec(IxDyn(&shape), data)?;
            set.params.insert(name, array);
        }
        tracing::info!(path = %path.as_ref().display(), tensors = set.len(), "weight set loaded");
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2};

    #[test]
    fn accessors_check_shapes() {
        let mut ws = WeightSet::new();
        ws.insert(pp("gru", "U"), Array2::<f32>::zeros((4, 8)));
        ws.insert(pp("gru", "b"), Array1::<f32>::zeros(8));

        assert!(ws.matrix("gru", "U", 4, 8).is_ok());
        assert!(matches!(ws.matrix("gru", "U", 4, 4), Err(Error::Shape { .. })));
        assert!(matches!(ws.vector("gru", "U", 8), Err(Error::Shape { .. })));
        assert!(ws.vector("gru", "b", 8).is_ok());
        assert!(matches!(ws.matrix("gru", "Ux", 4, 4), Err(Error::MissingWeight { ref key }) if key == "gru_Ux"));
    }

    #[test]
    fn checkpoint_preserves_names_and_values() {
        let mut ws = WeightSet::new();
        ws.insert("ff_W", Array2::from_shape_fn((2, 3), |(i, j)| (i * 3 + j) as f32 * 0.5));
        ws.insert("ff_b", Array1::from(vec![1.0f32, -2.0, 3.0]));

        let path = std::env::temp_dir().join(format!("lumen_rnn_ckpt_{}.bin", std::process::id()));
        ws.save(&path).unwrap();
        let loaded = WeightSet::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded, ws);
    }
}
