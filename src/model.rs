use std::{fmt, path::Path, path::PathBuf, str::FromStr};

use crate::{
    errors::{Result, VideoSegError},
    traits::{Segmentation, SegmentationModel},
};
use clap::ValueEnum;
use image::{imageops, imageops::FilterType, ImageBuffer, Luma, Pixel, Rgb, RgbImage};
use ndarray::prelude::*;
use ort::value::TensorRef;
use ort::{
    execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider},
    session::{builder::SessionBuilder, Session},
};
use parking_lot::Mutex;

const SEGMENTS_OUTPUT: &str = "float_segments";
const PART_HEATMAPS_OUTPUT: &str = "float_part_heatmaps";
const PART_COUNT: usize = 24;
const SEGMENTATION_THRESHOLD: f32 = 0.5;
const IMAGENET_MEAN: [f32; 3] = [-123.15, -115.90, -103.06];

/// Backbone network of the BodyPix model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Architecture {
    #[value(name = "resnet50")]
    ResNet50,
    #[value(name = "mobilenet-v1")]
    MobileNetV1,
}

impl Architecture {
    fn file_stem(self) -> &'static str {
        match self {
            Self::ResNet50 => "resnet50",
            Self::MobileNetV1 => "mobilenetv1",
        }
    }

    fn valid_output_strides(self) -> &'static [u32] {
        match self {
            Self::ResNet50 => &[16, 32],
            Self::MobileNetV1 => &[8, 16],
        }
    }
}

/// Options selecting which BodyPix variant to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelConfig {
    pub architecture: Architecture,
    /// Bytes per weight; trades model size for precision.
    pub quant_bytes: u8,
    /// Spatial downsampling factor between input and output maps.
    pub output_stride: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            architecture: Architecture::ResNet50,
            quant_bytes: 4,
            output_stride: 16,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.quant_bytes, 1 | 2 | 4) {
            return Err(VideoSegError::Configuration {
                message: format!("quant bytes must be 1, 2 or 4, got {}", self.quant_bytes),
            });
        }
        let strides = self.architecture.valid_output_strides();
        if !strides.contains(&self.output_stride) {
            return Err(VideoSegError::Configuration {
                message: format!(
                    "output stride {} is not supported by {:?}, expected one of {:?}",
                    self.output_stride, self.architecture, strides
                ),
            });
        }
        Ok(())
    }

    /// File name of the exported model for this configuration, e.g. `bodypix_resnet50_q4_s16.onnx`.
    pub fn model_file_name(&self) -> String {
        format!(
            "bodypix_{}_q{}_s{}.onnx",
            self.architecture.file_stem(),
            self.quant_bytes,
            self.output_stride
        )
    }

    pub fn model_path_in(&self, model_dir: &Path) -> PathBuf {
        model_dir.join(self.model_file_name())
    }
}

/// Share of the frame size the model sees.
///
/// Given on the command line as a fraction of the frame (`0.5`, `1`) or a preset, and
/// kept as a whole percentage clamped to `10..=200`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InternalResolution {
    percent: u32,
}

impl InternalResolution {
    pub const MIN_PERCENT: u32 = 10;
    pub const MAX_PERCENT: u32 = 200;

    pub const LOW: Self = Self { percent: 25 };
    pub const MEDIUM: Self = Self { percent: 50 };
    pub const HIGH: Self = Self { percent: 75 };
    pub const FULL: Self = Self { percent: 100 };

    pub fn from_percent(percent: u32) -> Self {
        Self {
            percent: percent.clamp(Self::MIN_PERCENT, Self::MAX_PERCENT),
        }
    }

    /// `fraction` is clamped to `0.1..=2.0` and rounded to the nearest percent.
    pub fn from_fraction(fraction: f64) -> Self {
        let percent = (fraction * 100.0).round().clamp(
            f64::from(Self::MIN_PERCENT),
            f64::from(Self::MAX_PERCENT),
        );
        Self::from_percent(percent as u32)
    }

    pub const fn percent(self) -> u32 {
        self.percent
    }

    pub fn fraction(self) -> f32 {
        self.percent as f32 / 100.0
    }
}

impl fmt::Display for InternalResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.percent)
    }
}

impl FromStr for InternalResolution {
    type Err = VideoSegError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::LOW),
            "medium" => Ok(Self::MEDIUM),
            "high" => Ok(Self::HIGH),
            "full" => Ok(Self::FULL),
            other => match other.parse::<f64>() {
                Ok(fraction) if fraction.is_finite() && fraction > 0.0 => {
                    Ok(Self::from_fraction(fraction))
                }
                _ => Err(VideoSegError::validation(
                    "internal resolution",
                    format!("`{s}` is not low, medium, high, full or a positive fraction"),
                )),
            },
        }
    }
}

/// Snaps `size` to a size the network accepts for `stride` (`(size - 1) % stride == 0`).
pub fn valid_input_size(size: u32, stride: u32) -> u32 {
    let size = size.max(1);
    if (size - 1) % stride == 0 {
        size
    } else {
        (size / stride) * stride + 1
    }
}

/// Where a frame lands inside the padded model input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputLayout {
    pub frame_width: u32,
    pub frame_height: u32,
    pub input_width: u32,
    pub input_height: u32,
    pub resized_width: u32,
    pub resized_height: u32,
    pub pad_left: u32,
    pub pad_top: u32,
}

impl InputLayout {
    pub fn new(
        frame_width: u32,
        frame_height: u32,
        resolution: InternalResolution,
        stride: u32,
    ) -> Self {
        let scale = resolution.fraction();
        let input_width = valid_input_size((frame_width as f32 * scale) as u32, stride);
        let input_height = valid_input_size((frame_height as f32 * scale) as u32, stride);

        // keep the aspect ratio, pad the short side evenly
        let frame_aspect = frame_width as f64 / frame_height as f64;
        let input_aspect = input_width as f64 / input_height as f64;
        let (resized_width, resized_height) = if frame_aspect > input_aspect {
            let height = (input_width as f64 / frame_aspect).round() as u32;
            (input_width, height.clamp(1, input_height))
        } else {
            let width = (input_height as f64 * frame_aspect).round() as u32;
            (width.clamp(1, input_width), input_height)
        };

        Self {
            frame_width,
            frame_height,
            input_width,
            input_height,
            resized_width,
            resized_height,
            pad_left: (input_width - resized_width) / 2,
            pad_top: (input_height - resized_height) / 2,
        }
    }

    fn input_shape(&self) -> (u32, u32) {
        (self.input_width, self.input_height)
    }
}

/// Hardware the ONNX session runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Acceleration {
    pub gpu: bool,
    pub device_id: i32,
}

impl Acceleration {
    /// Whether this build registers a GPU execution provider.
    pub const GPU_PROVIDERS_COMPILED: bool = cfg!(any(feature = "cuda", feature = "tensorrt"));

    /// A GPU was requested but the build only has the CPU provider.
    pub const fn falls_back_to_cpu(self) -> bool {
        self.gpu && !Self::GPU_PROVIDERS_COMPILED
    }
}

/// BodyPix exported to ONNX (NHWC input, `float_segments` / `float_part_heatmaps` outputs).
pub struct BodyPixModel {
    config: ModelConfig,
    input_name: String,
    batched: bool,
    session: Mutex<Session>,
}

impl BodyPixModel {
    pub fn new(model_path: &Path, config: ModelConfig, acceleration: Acceleration) -> Result<Self> {
        config.validate()?;

        let mut builder = SessionBuilder::new()
            .map_err(|e| VideoSegError::inference("session builder initialization", None, e))?;

        if acceleration.falls_back_to_cpu() {
            tracing::warn!(
                device_id = acceleration.device_id,
                "GPU requested but built without the `cuda` or `tensorrt` feature, running on CPU"
            );
        } else if acceleration.gpu {
            builder = builder
                .with_execution_providers([
                    TensorRTExecutionProvider::default()
                        .with_device_id(acceleration.device_id)
                        .build(),
                    CUDAExecutionProvider::default()
                        .with_device_id(acceleration.device_id)
                        .build(),
                ])
                .map_err(|e| VideoSegError::inference("execution provider setup", None, e))?;
        }

        let session = builder
            .with_memory_pattern(true)
            .map_err(|e| VideoSegError::inference("memory pattern setup", None, e))?
            .commit_from_file(model_path)
            .map_err(|e| {
                VideoSegError::inference(
                    format!("model load from {}", model_path.display()),
                    None,
                    e,
                )
            })?;

        let input = session.inputs.first().ok_or_else(|| {
            VideoSegError::inference("model input lookup", None, "model declares no inputs")
        })?;
        let input_name = input.name.clone();
        let batched = input
            .input_type
            .tensor_shape()
            .and_then(|shape| shape.first().copied())
            .is_some_and(|batch| batch != 1);

        for output in [SEGMENTS_OUTPUT, PART_HEATMAPS_OUTPUT] {
            if !session.outputs.iter().any(|o| o.name == output) {
                return Err(VideoSegError::inference(
                    "model output lookup",
                    None,
                    format!("model has no `{output}` output"),
                ));
            }
        }

        tracing::info!(
            path = %model_path.display(),
            architecture = ?config.architecture,
            quant_bytes = config.quant_bytes,
            output_stride = config.output_stride,
            gpu = acceleration.gpu,
            batched,
            "loaded BodyPix model"
        );

        Ok(Self {
            config,
            input_name,
            batched,
            session: Mutex::new(session),
        })
    }

    pub const fn config(&self) -> ModelConfig {
        self.config
    }

    /// Runs the network on an NHWC batch, returning `(segment logits, part heatmaps)`.
    pub fn predict(&self, tensor: ArrayView4<f32>) -> Result<(Array4<f32>, Array4<f32>)> {
        let mut session = self.session.lock();
        let outputs = session.run(ort::inputs![
            self.input_name.as_str() => TensorRef::from_array_view(&tensor.as_standard_layout())?
        ])?;

        let segments = outputs[SEGMENTS_OUTPUT]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()?
            .to_owned();
        let part_heatmaps = outputs[PART_HEATMAPS_OUTPUT]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()?
            .to_owned();
        Ok((segments, part_heatmaps))
    }

    fn layout_for(&self, image: &RgbImage, resolution: InternalResolution) -> InputLayout {
        let (width, height) = image.dimensions();
        InputLayout::new(width, height, resolution, self.config.output_stride)
    }
}

impl SegmentationModel for BodyPixModel {
    fn segment(&self, image: &RgbImage, resolution: InternalResolution) -> Result<Segmentation> {
        let layout = self.layout_for(image, resolution);
        let tensor = preprocess(image, &layout, self.config.architecture);
        let (segments, part_heatmaps) = self.predict(tensor.view())?;
        postprocess(
            segments.index_axis(Axis(0), 0),
            part_heatmaps.index_axis(Axis(0), 0),
            &layout,
        )
    }

    fn segment_batch(
        &self,
        images: &[RgbImage],
        resolution: InternalResolution,
    ) -> Result<Vec<Segmentation>> {
        if images.is_empty() {
            return Ok(vec![]);
        }

        let layouts: Vec<_> = images
            .iter()
            .map(|image| self.layout_for(image, resolution))
            .collect();
        let shape = layouts[0].input_shape();
        let uniform = layouts.iter().all(|layout| layout.input_shape() == shape);

        if !self.batched || !uniform || images.len() == 1 {
            return images
                .iter()
                .map(|image| self.segment(image, resolution))
                .collect();
        }

        let tensors: Vec<_> = images
            .iter()
            .zip(&layouts)
            .map(|(image, layout)| preprocess(image, layout, self.config.architecture))
            .collect();
        let views: Vec<_> = tensors.iter().map(|t| t.view()).collect();
        let batch = ndarray::concatenate(Axis(0), &views)?;

        let (segments, part_heatmaps) = self.predict(batch.view())?;
        for output in [&segments, &part_heatmaps] {
            if output.len_of(Axis(0)) != images.len() {
                return Err(VideoSegError::inference(
                    "batch inference",
                    None,
                    format!(
                        "model returned {} results for {} frames",
                        output.len_of(Axis(0)),
                        images.len()
                    ),
                ));
            }
        }

        layouts
            .iter()
            .enumerate()
            .map(|(i, layout)| {
                postprocess(
                    segments.index_axis(Axis(0), i),
                    part_heatmaps.index_axis(Axis(0), i),
                    layout,
                )
            })
            .collect()
    }
}

/// Resizes and pads a frame into a `(1, height, width, 3)` network input.
pub fn preprocess(
    image: &RgbImage,
    layout: &InputLayout,
    architecture: Architecture,
) -> Array4<f32> {
    let resized = imageops::resize(
        image,
        layout.resized_width,
        layout.resized_height,
        FilterType::Triangle,
    );
    let mut canvas = RgbImage::from_pixel(layout.input_width, layout.input_height, Rgb([0, 0, 0]));
    imageops::overlay(
        &mut canvas,
        &resized,
        layout.pad_left.into(),
        layout.pad_top.into(),
    );

    let (width, height) = canvas.dimensions();
    Array4::from_shape_fn(
        (1, height as usize, width as usize, 3),
        |(_, y, x, c)| {
            let value = canvas.get_pixel(x as u32, y as u32).channels()[c] as f32;
            match architecture {
                Architecture::ResNet50 => value + IMAGENET_MEAN[c],
                Architecture::MobileNetV1 => value / 127.5 - 1.0,
            }
        },
    )
}

/// Decodes one item of the network output into frame sized maps.
///
/// `segments` is `(rows, cols, 1)` logits, `part_heatmaps` is `(rows, cols, 24)`.
pub fn postprocess(
    segments: ArrayView3<f32>,
    part_heatmaps: ArrayView3<f32>,
    layout: &InputLayout,
) -> Result<Segmentation> {
    let (rows, cols, channels) = segments.dim();
    if channels != 1 || part_heatmaps.dim() != (rows, cols, PART_COUNT) {
        return Err(VideoSegError::inference(
            "output decoding",
            None,
            format!(
                "unexpected output shapes: segments {:?}, part heatmaps {:?}",
                segments.dim(),
                part_heatmaps.dim()
            ),
        ));
    }

    let scores = segments.index_axis(Axis(2), 0).mapv(sigmoid);
    let labels = decode_part_labels(scores.view(), part_heatmaps);

    // labels are shifted by one so that "no person" fits in an unsigned pixel
    let score_map: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_fn(cols as u32, rows as u32, |x, y| {
            Luma([scores[[y as usize, x as usize]]])
        });
    let label_map: ImageBuffer<Luma<u8>, Vec<u8>> =
        ImageBuffer::from_fn(cols as u32, rows as u32, |x, y| {
            Luma([(labels[[y as usize, x as usize]] + 1) as u8])
        });

    let score_map = scale_to_frame(&score_map, layout, FilterType::Triangle);
    let label_map = scale_to_frame(&label_map, layout, FilterType::Nearest);

    let shape = (layout.frame_height as usize, layout.frame_width as usize);
    let confidence = Array2::from_shape_vec(shape, score_map.into_raw())?
        .mapv(|v: f32| v.clamp(0.0, 1.0));
    let part_labels =
        Array2::from_shape_vec(shape, label_map.into_raw())?.mapv(|v| i32::from(v) - 1);

    Ok(Segmentation {
        confidence,
        part_labels,
    })
}

/// Argmax over the part heatmaps where the person score clears the threshold, `-1` elsewhere.
pub fn decode_part_labels(
    scores: ArrayView2<f32>,
    part_heatmaps: ArrayView3<f32>,
) -> Array2<i32> {
    Array2::from_shape_fn(scores.dim(), |(y, x)| {
        if scores[[y, x]] <= SEGMENTATION_THRESHOLD {
            return -1;
        }
        part_heatmaps
            .slice(s![y, x, ..])
            .iter()
            .enumerate()
            .fold((0usize, f32::NEG_INFINITY), |best, (part, &v)| {
                if v > best.1 {
                    (part, v)
                } else {
                    best
                }
            })
            .0 as i32
    })
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn scale_to_frame<P>(
    map: &ImageBuffer<P, Vec<P::Subpixel>>,
    layout: &InputLayout,
    filter: FilterType,
) -> ImageBuffer<P, Vec<P::Subpixel>>
where
    P: Pixel + 'static,
    P::Subpixel: 'static,
{
    let padded = imageops::resize(map, layout.input_width, layout.input_height, filter);
    let cropped = imageops::crop_imm(
        &padded,
        layout.pad_left,
        layout.pad_top,
        layout.resized_width,
        layout.resized_height,
    )
    .to_image();
    imageops::resize(&cropped, layout.frame_width, layout.frame_height, filter)
}
