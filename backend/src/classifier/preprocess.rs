use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use ndarray::Array4;

use super::ClassifierError;
use super::config::{ImageSize, PreprocessorConfig};

/// Turns a decoded image into the normalized NCHW batch the model expects.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    config: PreprocessorConfig,
}

impl Preprocessor {
    pub fn new(config: PreprocessorConfig) -> Result<Self, ClassifierError> {
        if config.do_normalize {
            if config.image_mean.len() != 3 || config.image_std.len() != 3 {
                return Err(ClassifierError::Preprocessor(format!(
                    "image_mean and image_std need 3 channels, got {} and {}",
                    config.image_mean.len(),
                    config.image_std.len()
                )));
            }
            if config.image_std.iter().any(|&s| s == 0.0) {
                return Err(ClassifierError::Preprocessor(
                    "image_std must not contain zero".to_string(),
                ));
            }
        }
        Ok(Self { config })
    }

    pub fn apply(&self, image: &DynamicImage) -> Array4<f32> {
        let mut img = DynamicImage::ImageRgb8(image.to_rgb8());

        if self.config.do_resize {
            img = self.resize(&img);
        }

        if self.config.do_center_crop {
            if let Some(crop) = self.config.crop_size {
                img = center_crop(&img, crop, self.filter());
            }
        }

        let rgb = img.to_rgb8();
        let (width, height) = rgb.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

        for (x, y, pixel) in rgb.enumerate_pixels() {
            for channel in 0..3 {
                let mut value = pixel[channel] as f32;
                if self.config.do_rescale {
                    value *= self.config.rescale_factor;
                }
                if self.config.do_normalize {
                    value = (value - self.config.image_mean[channel])
                        / self.config.image_std[channel];
                }
                tensor[[0, channel, y as usize, x as usize]] = value;
            }
        }

        tensor
    }

    fn resize(&self, img: &DynamicImage) -> DynamicImage {
        let filter = self.filter();
        match self.config.size {
            ImageSize::HeightWidth { height, width } => img.resize_exact(width, height, filter),
            ImageSize::Square(side) => img.resize_exact(side, side, filter),
            ImageSize::ShortestEdge { shortest_edge } => {
                let (width, height) = img.dimensions();
                let (new_width, new_height) = if width <= height {
                    let scaled = (shortest_edge as f64 * height as f64 / width as f64) as u32;
                    (shortest_edge, scaled.max(1))
                } else {
                    let scaled = (shortest_edge as f64 * width as f64 / height as f64) as u32;
                    (scaled.max(1), shortest_edge)
                };
                img.resize_exact(new_width, new_height, filter)
            }
        }
    }

    // PIL resampling codes as stored in preprocessor_config.json.
    fn filter(&self) -> FilterType {
        match self.config.resample {
            0 => FilterType::Nearest,
            1 => FilterType::Lanczos3,
            3 => FilterType::CatmullRom,
            _ => FilterType::Triangle,
        }
    }
}

fn center_crop(img: &DynamicImage, crop: ImageSize, filter: FilterType) -> DynamicImage {
    let (crop_width, crop_height) = match crop {
        ImageSize::HeightWidth { height, width } => (width, height),
        ImageSize::Square(side) | ImageSize::ShortestEdge { shortest_edge: side } => (side, side),
    };
    let (width, height) = img.dimensions();

    if width < crop_width || height < crop_height {
        return img.resize_exact(crop_width, crop_height, filter);
    }

    let left = (width - crop_width) / 2;
    let top = (height - crop_height) / 2;
    img.crop_imm(left, top, crop_width, crop_height)
}
