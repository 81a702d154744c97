use std::path::Path;
use std::sync::Mutex;

use image::DynamicImage;
use tch::{CModule, Device, IValue, Kind, Tensor};

use super::config::{LabelSet, PreprocessorConfig};
use super::preprocess::Preprocessor;
use super::{Classifier, ClassifierError, Prediction};

pub const MODEL_CONFIG_FILE: &str = "config.json";
pub const PREPROCESSOR_CONFIG_FILE: &str = "preprocessor_config.json";
pub const TORCHSCRIPT_FILE: &str = "model.pt";

/// A TorchScript image classifier plus the label table and image processor
/// exported next to it.
pub struct TorchClassifier {
    model: Mutex<CModule>,
    device: Device,
    preprocessor: Preprocessor,
    labels: LabelSet,
}

impl TorchClassifier {
    pub fn load(model_dir: &Path) -> Result<Self, ClassifierError> {
        let labels = LabelSet::load(&model_dir.join(MODEL_CONFIG_FILE))?;
        let preprocessor_config =
            PreprocessorConfig::load(&model_dir.join(PREPROCESSOR_CONFIG_FILE))?;
        let preprocessor = Preprocessor::new(preprocessor_config)?;

        let device = Device::cuda_if_available();
        let mut model = CModule::load_on_device(model_dir.join(TORCHSCRIPT_FILE), device)?;
        model.set_eval();

        log::info!(
            "Loaded classifier from {} on {:?} with {} labels",
            model_dir.display(),
            device,
            labels.len()
        );

        Ok(Self {
            model: Mutex::new(model),
            device,
            preprocessor,
            labels,
        })
    }

    fn logits(&self, input: Tensor) -> Result<Vec<f32>, ClassifierError> {
        let model = self
            .model
            .lock()
            .map_err(|_| ClassifierError::Output("model lock poisoned".to_string()))?;
        let output = tch::no_grad(|| model.forward_is(&[IValue::Tensor(input)]))?;
        drop(model);

        let logits = first_tensor(output)?
            .to_kind(Kind::Float)
            .to_device(Device::Cpu)
            .view([-1]);
        let num_elements = logits.size()[0] as usize;
        let mut output_vec = vec![0.0f32; num_elements];
        logits.copy_data(&mut output_vec, num_elements);
        Ok(output_vec)
    }
}

impl Classifier for TorchClassifier {
    fn classify(&self, image: &DynamicImage) -> Result<Prediction, ClassifierError> {
        let batch = self.preprocessor.apply(image);
        let shape: Vec<i64> = batch.shape().iter().map(|&d| d as i64).collect();
        let data = batch
            .as_slice()
            .ok_or_else(|| ClassifierError::Output("input batch is not contiguous".to_string()))?;
        let input = Tensor::from_slice(data).view(shape.as_slice()).to_device(self.device);

        let prediction = self.labels.predict(&self.logits(input)?)?;
        log::debug!(
            "Predicted class {} ({}) with confidence {:.4}",
            prediction.index,
            prediction.label,
            prediction.confidence
        );
        Ok(prediction)
    }

    fn labels(&self) -> &LabelSet {
        &self.labels
    }
}

/// Traced Hugging Face models return a tuple or dict whose first entry
/// (or `logits` key) holds the logits.
fn first_tensor(value: IValue) -> Result<Tensor, ClassifierError> {
    match value {
        IValue::Tensor(tensor) => Ok(tensor),
        IValue::Tuple(items) | IValue::GenericList(items) => match items.into_iter().next() {
            Some(first) => first_tensor(first),
            None => Err(ClassifierError::Output("model returned an empty tuple".to_string())),
        },
        IValue::GenericDict(entries) => entries
            .into_iter()
            .find(|(key, _)| matches!(key, IValue::String(name) if name == "logits"))
            .map(|(_, logits)| first_tensor(logits))
            .unwrap_or_else(|| {
                Err(ClassifierError::Output("model output has no logits entry".to_string()))
            }),
        other => Err(ClassifierError::Output(format!("unsupported output {:?}", other))),
    }
}
