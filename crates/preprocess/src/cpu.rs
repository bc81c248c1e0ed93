use crate::config::{DEFAULT_INPUT_SIZE, LETTERBOX_COLOR, Normalization, ResizePolicy};
use crate::{Frame, FrameTransform, Preprocess, PreprocessResult};
use common::span;
use fast_image_resize::{
    FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer,
    images::{Image, ImageRef},
};
use ndarray::{Array, IxDyn};

pub struct CpuPreProcessor {
    pub input_size: u32,
    pub policy: ResizePolicy,
    pub normalization: Normalization,
    rgb_buffer: Vec<u8>,
    canvas: Vec<u8>,
    resizer: Resizer,
}

impl CpuPreProcessor {
    pub fn new(input_size: u32) -> Self {
        Self::with_options(input_size, ResizePolicy::default(), Normalization::default())
    }

    pub fn with_options(input_size: u32, policy: ResizePolicy, normalization: Normalization) -> Self {
        let side = input_size as usize;
        Self {
            input_size,
            policy,
            normalization,
            rgb_buffer: Vec::new(),
            canvas: vec![LETTERBOX_COLOR; side * side * 3],
            resizer: Resizer::new(),
        }
    }

    pub fn preprocess_frame(&mut self, frame: &Frame) -> anyhow::Result<PreprocessResult> {
        let _s = span!("preprocess_frame");

        tracing::trace!(
            width = frame.width,
            height = frame.height,
            format = ?frame.format,
            pixel_bytes = frame.pixels.len(),
            "Preprocessing frame dimensions"
        );

        if frame.width == 0 || frame.height == 0 {
            anyhow::bail!("Empty frame: {}x{}", frame.width, frame.height);
        }
        if self.input_size == 0 {
            anyhow::bail!("Model input size must be non-zero");
        }

        let expected_size = frame.expected_len();
        if frame.pixels.len() != expected_size {
            anyhow::bail!(
                "Buffer size mismatch: expected {}, got {} bytes",
                expected_size,
                frame.pixels.len()
            );
        }

        self.copy_rgb_pixels(frame);
        let transform = self.resize_into_canvas(frame.width, frame.height)?;
        let tensor = self.normalize()?;

        Ok(PreprocessResult { tensor, transform })
    }

    /// Repack the frame as tightly packed RGB, dropping alpha and swapping BGR.
    fn copy_rgb_pixels(&mut self, frame: &Frame) {
        let _s = span!("copy_rgb_pixels");

        let bpp = frame.format.bytes_per_pixel();
        let [r, g, b] = frame.format.rgb_offsets();

        self.rgb_buffer.clear();
        self.rgb_buffer
            .reserve(frame.width as usize * frame.height as usize * 3);

        for px in frame.pixels.chunks_exact(bpp) {
            self.rgb_buffer.extend_from_slice(&[px[r], px[g], px[b]]);
        }
    }

    fn resize_into_canvas(&mut self, width: u32, height: u32) -> anyhow::Result<FrameTransform> {
        let _s = span!("resize_into_canvas");

        let size = self.input_size;
        let (transform, new_width, new_height) = match self.policy {
            ResizePolicy::Stretch => (FrameTransform::stretch(size, width, height), size, size),
            ResizePolicy::Letterbox => {
                let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
                let new_width = ((width as f32 * scale).round() as u32).clamp(1, size);
                let new_height = ((height as f32 * scale).round() as u32).clamp(1, size);
                let transform = FrameTransform {
                    input_size: size,
                    frame_width: width,
                    frame_height: height,
                    scale_x: scale,
                    scale_y: scale,
                    offset_x: ((size - new_width) / 2) as f32,
                    offset_y: ((size - new_height) / 2) as f32,
                };
                (transform, new_width, new_height)
            }
        };

        let src = ImageRef::new(width, height, &self.rgb_buffer, PixelType::U8x3)?;
        let mut resized = Image::new(new_width, new_height, PixelType::U8x3);

        self.resizer.resize(
            &src,
            &mut resized,
            &ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear)),
        )?;

        self.canvas.fill(LETTERBOX_COLOR);

        let resized_data = resized.buffer();
        let row_bytes = new_width as usize * 3;
        let stride = size as usize * 3;
        let offset_x = transform.offset_x as usize;
        let offset_y = transform.offset_y as usize;

        for (y, src_row) in resized_data.chunks_exact(row_bytes).enumerate() {
            let dst_row = (y + offset_y) * stride + offset_x * 3;
            self.canvas[dst_row..dst_row + row_bytes].copy_from_slice(src_row);
        }

        Ok(transform)
    }

    fn normalize(&self) -> anyhow::Result<Array<f32, IxDyn>> {
        let _s = span!("normalize");

        let side = self.input_size as usize;
        let spatial = side * side;
        let mut output = vec![0.0f32; 3 * spatial];

        for (i, px) in self.canvas.chunks_exact(3).enumerate() {
            output[i] = self.normalization.apply(px[0], 0);
            output[i + spatial] = self.normalization.apply(px[1], 1);
            output[i + 2 * spatial] = self.normalization.apply(px[2], 2);
        }

        Ok(Array::from_shape_vec(IxDyn(&[1, 3, side, side]), output)?)
    }
}

impl Default for CpuPreProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_INPUT_SIZE)
    }
}

impl Preprocess for CpuPreProcessor {
    fn preprocess(&mut self, frame: &Frame) -> anyhow::Result<PreprocessResult> {
        self.preprocess_frame(frame)
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PixelFormat;

    /// Stretch output is always the square model input
    #[test]
    fn test_stretch_output_shape() {
        let frame = Frame::filled(64, 48, [10, 20, 30]);

        let mut preprocessor = CpuPreProcessor::default();
        let result = preprocessor.preprocess_frame(&frame);

        assert!(result.is_ok(), "RGB preprocessing should succeed");
        let result = result.unwrap();
        assert_eq!(result.tensor.shape(), &[1, 3, 300, 300]);
        assert!(
            result.transform.is_identity(),
            "Stretch should not move normalized coordinates"
        );
    }

    /// Test buffer size mismatch detection
    #[test]
    fn test_buffer_size_mismatch_detection() {
        let frame = Frame::new(vec![0u8; 200], 10, 10, PixelFormat::Rgb8);

        let mut preprocessor = CpuPreProcessor::default();
        let result = preprocessor.preprocess_frame(&frame);

        assert!(result.is_err(), "Size mismatch should return error");
        assert!(
            result.unwrap_err().to_string().contains("mismatch"),
            "Error should mention mismatch"
        );
    }

    #[test]
    fn test_empty_frame_rejected() {
        let frame = Frame::new(vec![], 0, 10, PixelFormat::Rgb8);
        let mut preprocessor = CpuPreProcessor::default();
        assert!(preprocessor.preprocess_frame(&frame).is_err());
    }

    /// Test letterboxing preserves aspect ratio
    #[test]
    fn test_letterboxing_preserves_aspect_ratio() {
        // 800x600 image (4:3 aspect ratio)
        let frame = Frame::filled(800, 600, [128, 128, 128]);

        let mut preprocessor = CpuPreProcessor::with_options(
            512,
            ResizePolicy::Letterbox,
            Normalization::UnitRange,
        );
        let result = preprocessor.preprocess_frame(&frame).unwrap();
        let t = result.transform;

        // Scale should be min(512/800, 512/600) = 512/800 = 0.64
        assert!((t.scale_x - 0.64).abs() < 1e-6, "Scale should preserve aspect ratio");
        assert_eq!(t.scale_x, t.scale_y);

        // Resized dimensions: 512x384, so the band is (512 - 384) / 2 = 64 rows
        assert_eq!(t.offset_x, 0.0, "X offset should be 0 for wide image");
        assert_eq!(t.offset_y, 64.0, "Y offset should center vertically");

        assert_eq!(result.tensor.shape(), &[1, 3, 512, 512]);

        // Padding rows carry the letterbox color, the center carries the image
        let pad = result.tensor[[0, 0, 10, 256]];
        let center = result.tensor[[0, 0, 256, 256]];
        assert!((pad - 114.0 / 255.0).abs() < 1e-6, "Top band should be padding");
        assert!((center - 128.0 / 255.0).abs() < 1e-2, "Center should be image");
    }

    #[test]
    fn test_letterbox_transform_maps_back_to_frame() {
        let frame = Frame::filled(800, 600, [0, 0, 0]);
        let mut preprocessor =
            CpuPreProcessor::with_options(512, ResizePolicy::Letterbox, Normalization::UnitRange);
        let t = preprocessor.preprocess_frame(&frame).unwrap().transform;

        // Top edge of the image content sits at y = 64/512 in input space
        let (x, y) = t.to_frame(0.0, 64.0 / 512.0);
        assert!(x.abs() < 1e-5);
        assert!(y.abs() < 1e-5);

        let (x, y) = t.to_frame(1.0, 448.0 / 512.0);
        assert!((x - 1.0).abs() < 1e-5);
        assert!((y - 1.0).abs() < 1e-5);
    }

    /// BGR and BGRA frames come out in RGB channel order
    #[test]
    fn test_bgr_channel_swap() {
        let bgr = Frame::new([0u8, 0, 255].repeat(16), 4, 4, PixelFormat::Bgr8);
        let bgra = Frame::new([0u8, 0, 255, 255].repeat(16), 4, 4, PixelFormat::Bgra8);

        let mut preprocessor = CpuPreProcessor::new(8);

        for frame in [bgr, bgra] {
            let tensor = preprocessor.preprocess_frame(&frame).unwrap().tensor;
            assert!((tensor[[0, 0, 4, 4]] - 1.0).abs() < 1e-3, "Red channel first");
            assert!(tensor[[0, 2, 4, 4]].abs() < 1e-3, "Blue channel last");
        }
    }

    /// Test ImageNet normalization is applied
    #[test]
    fn test_imagenet_normalization() {
        let frame = Frame::filled(2, 2, [128, 128, 128]);

        let mut preprocessor =
            CpuPreProcessor::with_options(16, ResizePolicy::Stretch, Normalization::ImageNet);
        let output = preprocessor.preprocess_frame(&frame).unwrap().tensor;

        // For gray 128 (0.502) with ImageNet norm:
        //   R: (0.502 - 0.485) / 0.229 ≈ 0.074
        //   G: (0.502 - 0.456) / 0.224 ≈ 0.205
        //   B: (0.502 - 0.406) / 0.225 ≈ 0.427
        let r = output[[0, 0, 8, 8]];
        let g = output[[0, 1, 8, 8]];
        let b = output[[0, 2, 8, 8]];

        assert!((r - 0.074).abs() < 0.05, "R channel should be ~0.074 (got {})", r);
        assert!((g - 0.205).abs() < 0.05, "G channel should be ~0.205 (got {})", g);
        assert!((b - 0.427).abs() < 0.05, "B channel should be ~0.427 (got {})", b);
    }

    /// Test the Preprocess trait implementation
    #[test]
    fn test_preprocess_trait() {
        let frame = Frame::filled(100, 100, [128, 128, 128]);
        let mut preprocessor: Box<dyn Preprocess> = Box::new(CpuPreProcessor::new(416));

        let result = preprocessor.preprocess(&frame);
        assert!(result.is_ok());
        assert_eq!(preprocessor.input_size(), 416);
        assert_eq!(result.unwrap().tensor.shape(), &[1, 3, 416, 416]);
    }
}
