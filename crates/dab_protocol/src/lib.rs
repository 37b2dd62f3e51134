use std::sync::Arc;

pub type DabSeqNo = u64;

pub const DAB_BYTES_PER_PIXEL: usize = 4;

/// Largest side length, in pixels, a dab buffer may be sized to.
pub const MAX_DAB_EXTENT: u32 = 4096;

/// Largest brush diameter a request may carry; its dab still fits [`MAX_DAB_EXTENT`].
pub const MAX_DAB_DIAMETER: f32 = MAX_DAB_EXTENT as f32;

/// Pixel buffer handle shared between the ledger, workers and the consumer.
pub type SharedDabBuffer = Arc<DabBuffer>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DabOffset {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DabShape {
    pub diameter: f32,
    pub aspect_ratio: f32,
    pub angle_radians: f32,
    pub hardness: f32,
}

impl Default for DabShape {
    fn default() -> Self {
        Self {
            diameter: 1.0,
            aspect_ratio: 1.0,
            angle_radians: 0.0,
            hardness: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DabRequestError {
    NonFinitePlacement,
    DiameterInvalid,
    DiameterTooLarge,
    AspectRatioInvalid,
    OpacityOutOfRange,
}

/// One paint request: where the dab lands and the parameters it is rendered with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DabRequest {
    pub canvas_x: f32,
    pub canvas_y: f32,
    pub shape: DabShape,
    pub opacity: f32,
}

impl DabRequest {
    pub fn new(canvas_x: f32, canvas_y: f32, shape: DabShape, opacity: f32) -> Self {
        Self {
            canvas_x,
            canvas_y,
            shape,
            opacity,
        }
    }

    pub fn validate(&self) -> Result<(), DabRequestError> {
        if !self.canvas_x.is_finite() || !self.canvas_y.is_finite() {
            return Err(DabRequestError::NonFinitePlacement);
        }
        if !self.shape.diameter.is_finite() || self.shape.diameter <= 0.0 {
            return Err(DabRequestError::DiameterInvalid);
        }
        if self.shape.diameter > MAX_DAB_DIAMETER {
            return Err(DabRequestError::DiameterTooLarge);
        }
        if !self.shape.aspect_ratio.is_finite() || self.shape.aspect_ratio <= 0.0 {
            return Err(DabRequestError::AspectRatioInvalid);
        }
        if !(0.0..=1.0).contains(&self.opacity) {
            return Err(DabRequestError::OpacityOutOfRange);
        }
        Ok(())
    }

    /// Side length in pixels of the square the dab is rendered into.
    pub fn dab_extent(&self) -> u32 {
        (self.shape.diameter.ceil() as u32).max(1)
    }

    /// Top-left canvas pixel the rendered dab is painted at.
    pub fn dst_offset(&self) -> DabOffset {
        let (left, top) = self.top_left();
        DabOffset {
            x: left.floor() as i32,
            y: top.floor() as i32,
        }
    }

    /// Fractional part of the dab origin. Two dabs with the same shape and phase
    /// rasterize to the same pixels.
    pub fn subpixel_phase(&self) -> (f32, f32) {
        let (left, top) = self.top_left();
        (left - left.floor(), top - top.floor())
    }

    fn top_left(&self) -> (f32, f32) {
        let radius = self.shape.diameter * 0.5;
        (self.canvas_x - radius, self.canvas_y - radius)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DabBufferSizeError {
    pub width: u32,
    pub height: u32,
}

/// RGBA8 pixel storage for one rendered dab. Resizing keeps the allocation so
/// pooled buffers can be reused without reallocating.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DabBuffer {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl DabBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_size(width: u32, height: u32) -> Result<Self, DabBufferSizeError> {
        let mut buffer = Self::new();
        buffer.reset(width, height)?;
        Ok(buffer)
    }

    /// Resizes to `width` x `height` and clears every pixel to transparent.
    ///
    /// Sizes beyond [`MAX_DAB_EXTENT`] are refused and leave the buffer untouched.
    pub fn reset(&mut self, width: u32, height: u32) -> Result<(), DabBufferSizeError> {
        let size_error = DabBufferSizeError { width, height };
        if width > MAX_DAB_EXTENT || height > MAX_DAB_EXTENT {
            return Err(size_error);
        }
        let byte_len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|pixels| pixels.checked_mul(DAB_BYTES_PER_PIXEL))
            .ok_or(size_error)?;
        self.width = width;
        self.height = height;
        self.pixels.clear();
        self.pixels.resize(byte_len, 0);
        Ok(())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    pub fn capacity_bytes(&self) -> usize {
        self.pixels.capacity()
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; DAB_BYTES_PER_PIXEL]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let start = (y as usize * self.width as usize + x as usize) * DAB_BYTES_PER_PIXEL;
        let mut pixel = [0; DAB_BYTES_PER_PIXEL];
        pixel.copy_from_slice(&self.pixels[start..start + DAB_BYTES_PER_PIXEL]);
        Some(pixel)
    }
}

/// A finished dab handed to the consumer in sequence order.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedDab {
    pub seq_no: DabSeqNo,
    pub buffer: SharedDabBuffer,
    pub offset: DabOffset,
}
