use std::path::Path;

use tract_onnx::prelude::*;

use crate::error::{CaptureError, InitializationError, LoadError};
use crate::{Frame, FrameSource, ModelConfig, TensorLayout};

/// A fixed-length feature vector for one frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    pub fn iter(&self) -> core::slice::Iter<'_, f32> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

/// Maps frames to embeddings using a frozen model.
pub trait EmbeddingProvider {
    /// One-time model load. `infer` fails until this succeeds.
    fn load(&mut self) -> Result<(), LoadError>;

    fn infer(&self, frame: &Frame) -> Result<Embedding, CaptureError>;
}

/// Pipeline pairs the live feed with the model that embeds it.
pub struct Pipeline {
    source: Box<dyn FrameSource>,
    embedder: Box<dyn EmbeddingProvider>,
}

impl Pipeline {
    /// Opens the camera and loads the model; nothing else can touch either
    /// until both succeed.
    pub fn init(
        mut source: Box<dyn FrameSource>,
        mut embedder: Box<dyn EmbeddingProvider>,
    ) -> Result<Self, InitializationError> {
        source.open()?;
        embedder.load()?;
        Ok(Self { source, embedder })
    }

    /// Grabs the current frame and embeds it.
    pub fn embed_current(&mut self) -> Result<Embedding, CaptureError> {
        let frame = self.source.current_frame()?;
        self.embedder.infer(&frame)
    }
}

/// OnnxEmbedder runs a pretrained image model (a MobileNet-style feature
/// extractor) over RGB frames and returns its flattened output.
pub struct OnnxEmbedder {
    config: ModelConfig,
    width: u32,
    height: u32,
    model: Option<TypedRunnableModel<TypedModel>>,
}

impl OnnxEmbedder {
    pub fn new(config: ModelConfig, width: u32, height: u32) -> Self {
        Self {
            config,
            width,
            height,
            model: None,
        }
    }

    fn input_shape(&self) -> [usize; 4] {
        let (w, h) = (self.width as usize, self.height as usize);
        match self.config.layout {
            TensorLayout::Nchw => [1, 3, h, w],
            TensorLayout::Nhwc => [1, h, w, 3],
        }
    }
}

impl EmbeddingProvider for OnnxEmbedder {
    fn load(&mut self) -> Result<(), LoadError> {
        let path = Path::new(&self.config.path);
        if !path.exists() {
            return Err(LoadError::Missing(path.to_path_buf()));
        }

        let shape = self.input_shape();
        let model = tract_onnx::onnx()
            // load the model
            .model_for_path(path)
            .and_then(|m| m.with_input_fact(0, f32::fact(shape).into()))
            .and_then(|m| m.into_optimized())
            .and_then(|m| m.into_runnable())
            .map_err(|e| LoadError::Model {
                path: path.to_path_buf(),
                message: format!("{e:#}"),
            })?;

        tracing::info!("loaded embedding model {} (input {:?})", path.display(), shape);
        self.model = Some(model);
        Ok(())
    }

    fn infer(&self, frame: &Frame) -> Result<Embedding, CaptureError> {
        let model = self.model.as_ref().ok_or(CaptureError::ModelNotLoaded)?;
        let input: Tensor = frame_to_input(frame, &self.config)?.into();

        let out = model
            .run(tvec!(input.into()))
            .map_err(|e| CaptureError::Embedding(format!("{e:#}")))?
            .remove(0);
        let values = out
            .as_slice::<f32>()
            .map_err(|e| CaptureError::Embedding(format!("{e:#}")))?;
        Ok(Embedding(values.to_vec()))
    }
}

/// Builds the normalized `[1, C, H, W]` or `[1, H, W, C]` model input for a
/// frame.
pub(crate) fn frame_to_input(
    frame: &Frame,
    config: &ModelConfig,
) -> Result<tract_ndarray::Array4<f32>, CaptureError> {
    let (w, h) = (frame.width as usize, frame.height as usize);
    let expected = w * h * 3;
    if frame.pixels.len() != expected {
        return Err(CaptureError::InvalidFrame {
            expected,
            got: frame.pixels.len(),
        });
    }

    let value = |y: usize, x: usize, c: usize| {
        let px = frame.pixels[(y * w + x) * 3 + c] as f32 / 255.0;
        (px - config.mean[c]) / config.std[c]
    };
    let input = match config.layout {
        TensorLayout::Nchw => {
            tract_ndarray::Array4::from_shape_fn((1, 3, h, w), |(_, c, y, x)| value(y, x, c))
        }
        TensorLayout::Nhwc => {
            tract_ndarray::Array4::from_shape_fn((1, h, w, 3), |(_, y, x, c)| value(y, x, c))
        }
    };
    Ok(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain_config(layout: TensorLayout) -> ModelConfig {
        ModelConfig {
            layout,
            mean: [0.0; 3],
            std: [1.0; 3],
            ..ModelConfig::default()
        }
    }

    fn two_pixel_frame() -> Frame {
        Frame {
            id: 0,
            width: 2,
            height: 1,
            pixels: vec![255, 0, 0, 0, 0, 255],
        }
    }

    #[test]
    fn nchw_input_puts_channels_first() {
        let input = frame_to_input(&two_pixel_frame(), &plain_config(TensorLayout::Nchw)).unwrap();
        assert_eq!(input.shape(), &[1, 3, 1, 2]);
        assert_eq!(input[[0, 0, 0, 0]], 1.0);
        assert_eq!(input[[0, 2, 0, 0]], 0.0);
        assert_eq!(input[[0, 2, 0, 1]], 1.0);
    }

    #[test]
    fn nhwc_input_puts_channels_last() {
        let input = frame_to_input(&two_pixel_frame(), &plain_config(TensorLayout::Nhwc)).unwrap();
        assert_eq!(input.shape(), &[1, 1, 2, 3]);
        assert_eq!(input[[0, 0, 0, 0]], 1.0);
        assert_eq!(input[[0, 0, 1, 2]], 1.0);
    }

    #[test]
    fn normalization_applies_mean_and_std() {
        let config = ModelConfig {
            layout: TensorLayout::Nchw,
            mean: [0.5; 3],
            std: [0.5; 3],
            ..ModelConfig::default()
        };
        let input = frame_to_input(&two_pixel_frame(), &config).unwrap();
        assert_eq!(input[[0, 0, 0, 0]], 1.0);
        assert_eq!(input[[0, 1, 0, 0]], -1.0);
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let mut frame = two_pixel_frame();
        frame.pixels.pop();
        let err = frame_to_input(&frame, &plain_config(TensorLayout::Nchw)).unwrap_err();
        assert!(matches!(
            err,
            CaptureError::InvalidFrame {
                expected: 6,
                got: 5
            }
        ));
    }

    #[test]
    fn infer_before_load_fails() {
        let embedder = OnnxEmbedder::new(ModelConfig::default(), 2, 1);
        assert!(matches!(
            embedder.infer(&two_pixel_frame()),
            Err(CaptureError::ModelNotLoaded)
        ));
    }

    #[test]
    fn missing_model_file_fails_to_load() {
        let mut embedder = OnnxEmbedder::new(
            ModelConfig {
                path: "no/such/model.onnx".into(),
                ..ModelConfig::default()
            },
            2,
            1,
        );
        assert!(matches!(embedder.load(), Err(LoadError::Missing(_))));
    }
}
