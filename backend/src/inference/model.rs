use crate::inference::preprocess::ImageTensor;

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Model not loaded")]
    NotReady,
    #[error("Input tensor shape {actual:?} does not match expected {expected:?}")]
    ShapeMismatch {
        expected: [usize; 4],
        actual: Vec<usize>,
    },
    #[error("Model produced {actual} scores for {expected} labels")]
    OutputMismatch { expected: usize, actual: usize },
    #[error("Model error: {0}")]
    Model(String),
    #[error("Inference task aborted: {0}")]
    Aborted(String),
}

#[cfg(feature = "torch")]
impl From<tch::TchError> for InferenceError {
    fn from(err: tch::TchError) -> Self {
        InferenceError::Model(err.to_string())
    }
}

/// A loaded classifier that maps an `[1, H, W, 3]` tensor to one probability per class.
pub trait Predictor: Send + Sync {
    fn predict(&self, input: &ImageTensor) -> Result<Vec<f32>, InferenceError>;
}

#[cfg(feature = "torch")]
pub use torch::TorchModel;

#[cfg(feature = "torch")]
mod torch {
    use super::{InferenceError, Predictor};
    use crate::inference::preprocess::ImageTensor;
    use std::path::Path;
    use std::sync::Mutex;
    use tch::{CModule, Device, Kind, Tensor};

    /// TorchScript module. Calls are serialized through the mutex since the
    /// module is not known to be safe for concurrent forward passes.
    pub struct TorchModel {
        module: Mutex<CModule>,
        device: Device,
    }

    impl TorchModel {
        pub fn load(model_path: &Path) -> Result<Self, InferenceError> {
            let device = Device::cuda_if_available();
            let mut module = CModule::load_on_device(model_path, device)?;
            module.set_eval();
            log::info!("Loaded TorchScript module on {:?}", device);
            Ok(Self {
                module: Mutex::new(module),
                device,
            })
        }
    }

    impl Predictor for TorchModel {
        fn predict(&self, input: &ImageTensor) -> Result<Vec<f32>, InferenceError> {
            let dims: Vec<i64> = input.shape().iter().map(|&d| d as i64).collect();
            let data = input
                .as_slice()
                .ok_or_else(|| InferenceError::Model("input tensor is not contiguous".into()))?;
            let module = self
                .module
                .lock()
                .map_err(|e| InferenceError::Model(e.to_string()))?;

            // Input and output tensors are freed when they go out of scope here.
            let output = tch::no_grad(|| {
                let tensor = Tensor::from_slice(data)
                    .view(dims.as_slice())
                    .to_device(self.device);
                module.forward_ts(&[tensor])
            })?;

            let output_flat = output
                .to_kind(Kind::Float)
                .to_device(Device::Cpu)
                .view([-1]);
            let num_elements = output_flat.size()[0] as usize;
            let mut output_vec = vec![0.0f32; num_elements];
            output_flat.copy_data(&mut output_vec, num_elements);
            Ok(output_vec)
        }
    }
}
