use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use super::{ClassifierError, Prediction};

#[derive(Debug, Deserialize)]
struct ModelConfig {
    id2label: HashMap<String, String>,
}

/// Class names in model output order.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelSet {
    labels: Vec<String>,
}

impl LabelSet {
    pub fn load(config_path: &Path) -> Result<Self, ClassifierError> {
        let config: ModelConfig = read_json(config_path)?;
        Self::from_id2label(config.id2label)
    }

    /// Orders an `id2label` table by index. Indices must run 0..n with no gaps.
    pub fn from_id2label(id2label: HashMap<String, String>) -> Result<Self, ClassifierError> {
        if id2label.is_empty() {
            return Err(ClassifierError::Labels("id2label is empty".to_string()));
        }

        let mut slots: Vec<Option<String>> = vec![None; id2label.len()];
        for (id, label) in id2label {
            let index: usize = id
                .trim()
                .parse()
                .map_err(|_| ClassifierError::Labels(format!("non-numeric class id {:?}", id)))?;
            let slot = slots.get_mut(index).ok_or_else(|| {
                ClassifierError::Labels(format!("class id {} is out of range", index))
            })?;
            if slot.replace(label).is_some() {
                return Err(ClassifierError::Labels(format!("duplicate class id {}", index)));
            }
        }

        let labels = slots
            .into_iter()
            .enumerate()
            .map(|(index, label)| {
                label.ok_or_else(|| ClassifierError::Labels(format!("missing class id {}", index)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    /// Picks the highest-scoring class. Ties resolve to the lowest index,
    /// matching `argmax`.
    pub fn predict(&self, logits: &[f32]) -> Result<Prediction, ClassifierError> {
        if logits.len() != self.labels.len() {
            return Err(ClassifierError::Output(format!(
                "expected {} logits, got {}",
                self.labels.len(),
                logits.len()
            )));
        }

        let mut best = 0;
        for (index, &score) in logits.iter().enumerate() {
            if score > logits[best] {
                best = index;
            }
        }

        let max = logits[best];
        let total: f32 = logits.iter().map(|&l| (l - max).exp()).sum();
        let confidence = if total.is_finite() && total > 0.0 { 1.0 / total } else { 0.0 };

        let label = self
            .get(best)
            .ok_or_else(|| ClassifierError::Output(format!("no label for class {}", best)))?;

        Ok(Prediction {
            index: best,
            label: label.to_string(),
            confidence,
        })
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ImageSize {
    HeightWidth { height: u32, width: u32 },
    ShortestEdge { shortest_edge: u32 },
    Square(u32),
}

/// The subset of a Hugging Face `preprocessor_config.json` the classifier
/// honours. Unset keys fall back to the ViT image processor defaults.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PreprocessorConfig {
    pub do_resize: bool,
    pub size: ImageSize,
    pub resample: u8,
    pub do_center_crop: bool,
    pub crop_size: Option<ImageSize>,
    pub do_rescale: bool,
    pub rescale_factor: f32,
    pub do_normalize: bool,
    pub image_mean: Vec<f32>,
    pub image_std: Vec<f32>,
}

impl Default for PreprocessorConfig {
    fn default() -> Self {
        Self {
            do_resize: true,
            size: ImageSize::HeightWidth {
                height: 224,
                width: 224,
            },
            resample: 2,
            do_center_crop: false,
            crop_size: None,
            do_rescale: true,
            rescale_factor: 1.0 / 255.0,
            do_normalize: true,
            image_mean: vec![0.5, 0.5, 0.5],
            image_std: vec![0.5, 0.5, 0.5],
        }
    }
}

impl PreprocessorConfig {
    pub fn load(path: &Path) -> Result<Self, ClassifierError> {
        read_json(path)
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ClassifierError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ClassifierError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ClassifierError::Json {
        path: path.to_path_buf(),
        source,
    })
}
