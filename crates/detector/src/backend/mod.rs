use ndarray::{ArrayD, ArrayViewD};
use std::collections::HashMap;

#[cfg(feature = "ort-backend")]
pub mod ort;

/// Opaque model runtime: takes the preprocessed input tensor and returns the
/// model's named outputs.
///
/// Implementations own their model handle and need `&mut self` to run it, so
/// a single instance must not be invoked concurrently.
pub trait InferenceBackend: Send {
    fn load_model(path: &str) -> anyhow::Result<Self>
    where
        Self: Sized;

    /// Run inference on an NCHW `[1, 3, size, size]` tensor
    fn infer(&mut self, input: &ArrayViewD<f32>) -> anyhow::Result<ModelOutputs>;

    /// Short name for logs
    fn name(&self) -> &str {
        "backend"
    }
}

/// Named output tensors of a single inference pass.
#[derive(Debug, Clone, Default)]
pub struct ModelOutputs {
    tensors: HashMap<String, ArrayD<f32>>,
}

impl ModelOutputs {
    pub fn insert(&mut self, name: impl Into<String>, tensor: ArrayD<f32>) {
        self.tensors.insert(name.into(), tensor);
    }

    pub fn get(&self, name: &str) -> Option<ArrayViewD<'_, f32>> {
        self.tensors.get(name).map(|t| t.view())
    }

    /// First tensor present under any of `aliases`, in alias order.
    pub fn find_any<'s, 'n, S: AsRef<str>>(
        &'s self,
        aliases: &'n [S],
    ) -> Option<(&'n str, ArrayViewD<'s, f32>)> {
        aliases.iter().find_map(|alias| {
            let alias = alias.as_ref();
            self.get(alias).map(|view| (alias, view))
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, ArrayD<f32>)> for ModelOutputs {
    fn from_iter<I: IntoIterator<Item = (S, ArrayD<f32>)>>(iter: I) -> Self {
        Self {
            tensors: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}
