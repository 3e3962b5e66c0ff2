//! Frame model: pixel formats, image geometry, metadata, and borrowed frames.

use ffmpeg_next as ffmpeg;
use vidbot_protocol::FrameId;

use crate::error::MediaError;

/// Maximum number of planes an image can carry. Packed formats use plane 0
/// only; planar formats use one plane per component.
pub const MAX_IMAGE_PLANES: usize = 4;

/// Sentinel width meaning "keep the source width".
pub const ORIGINAL_IMAGE_WIDTH: i32 = -1;
/// Sentinel height meaning "keep the source height".
pub const ORIGINAL_IMAGE_HEIGHT: i32 = -1;

/// Pixel layouts deliverable to a bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Packed 24-bit B,G,R.
    Bgr,
    /// Packed 32-bit R,G,B plus one padding byte.
    Rgb0,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgr => 3,
            PixelFormat::Rgb0 => 4,
        }
    }

    pub fn to_av(self) -> ffmpeg::format::Pixel {
        match self {
            PixelFormat::Bgr => ffmpeg::format::Pixel::BGR24,
            PixelFormat::Rgb0 => ffmpeg::format::Pixel::RGBZ,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PixelFormat::Bgr => "bgr24",
            PixelFormat::Rgb0 => "rgb0",
        }
    }
}

/// Requested frame geometry. Either both dimensions are concrete and
/// positive, or both are the `original` sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSize {
    pub width: i32,
    pub height: i32,
}

impl ImageSize {
    /// Both dimensions set to the "keep source size" sentinel.
    pub const ORIGINAL: ImageSize = ImageSize {
        width: ORIGINAL_IMAGE_WIDTH,
        height: ORIGINAL_IMAGE_HEIGHT,
    };

    /// Whether either dimension carries the sentinel. The sentinel is
    /// all-or-nothing; mixed sizes are rejected at registration.
    pub fn is_original(&self) -> bool {
        self.width == ORIGINAL_IMAGE_WIDTH || self.height == ORIGINAL_IMAGE_HEIGHT
    }

    /// Whether exactly one dimension carries the sentinel.
    pub fn is_mixed(&self) -> bool {
        (self.width == ORIGINAL_IMAGE_WIDTH) != (self.height == ORIGINAL_IMAGE_HEIGHT)
    }
}

/// Parse `"original"` or a `WxH` size string.
pub fn parse_image_size(text: &str) -> Result<ImageSize, MediaError> {
    if text == "original" {
        return Ok(ImageSize::ORIGINAL);
    }

    let (w, h) = text
        .split_once('x')
        .ok_or_else(|| MediaError::InvalidArgument(format!("bad image size '{text}'")))?;
    let width: i32 = w
        .parse()
        .map_err(|_| MediaError::InvalidArgument(format!("bad image width '{w}'")))?;
    let height: i32 = h
        .parse()
        .map_err(|_| MediaError::InvalidArgument(format!("bad image height '{h}'")))?;
    if width <= 0 || height <= 0 {
        return Err(MediaError::InvalidArgument(format!(
            "image size '{text}' must be positive"
        )));
    }

    Ok(ImageSize { width, height })
}

/// Per-stream description of the frames a bot receives. Immutable within a
/// configuration epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    /// Bytes per row for each plane; 0 marks an unused plane.
    pub plane_strides: [usize; MAX_IMAGE_PLANES],
}

impl ImageMetadata {
    /// Metadata for a tightly packed image of the given format.
    pub fn for_format(width: u32, height: u32, format: PixelFormat) -> Self {
        let mut plane_strides = [0usize; MAX_IMAGE_PLANES];
        plane_strides[0] = width as usize * format.bytes_per_pixel();
        ImageMetadata {
            width,
            height,
            plane_strides,
        }
    }

    /// Assert that the strides are consistent with the pixel format and
    /// dimensions: plane 0 at least one row of pixels wide, the remaining
    /// planes unused for packed formats.
    pub fn validate(&self, format: PixelFormat) {
        let min_stride = self.width as usize * format.bytes_per_pixel();
        assert!(
            self.plane_strides[0] >= min_stride,
            "plane 0 stride {} below minimum {} for {}x{} {}",
            self.plane_strides[0],
            min_stride,
            self.width,
            self.height,
            format.name(),
        );
        for stride in &self.plane_strides[1..] {
            assert_eq!(*stride, 0, "packed format {} uses plane 0 only", format.name());
        }
    }
}

/// A decoded frame as emitted by the codec adapter, still in the decoder's
/// native geometry and pixel format. Owned by the adapter's caller; the
/// converter borrows it for the duration of one conversion.
pub struct RawFrame {
    frame: ffmpeg::frame::Video,
    index: u64,
}

impl RawFrame {
    /// Wrap a decoded av frame with its monotone decode index.
    pub fn from_video(frame: ffmpeg::frame::Video, index: u64) -> Self {
        RawFrame { frame, index }
    }

    pub fn width(&self) -> u32 {
        self.frame.width()
    }

    pub fn height(&self) -> u32 {
        self.frame.height()
    }

    pub fn format(&self) -> ffmpeg::format::Pixel {
        self.frame.format()
    }

    /// Monotone decode index assigned by the adapter.
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn video(&self) -> &ffmpeg::frame::Video {
        &self.frame
    }
}

/// A normalized frame lent to the bot for the duration of one image-callback
/// invocation. Plane data is read-only.
pub struct ImageFrame<'a> {
    id: FrameId,
    format: PixelFormat,
    width: u32,
    height: u32,
    planes: [&'a [u8]; MAX_IMAGE_PLANES],
    strides: [usize; MAX_IMAGE_PLANES],
}

impl<'a> ImageFrame<'a> {
    /// Build a frame view from explicit plane slices.
    pub fn from_planes(
        id: FrameId,
        format: PixelFormat,
        width: u32,
        height: u32,
        planes: [&'a [u8]; MAX_IMAGE_PLANES],
        strides: [usize; MAX_IMAGE_PLANES],
    ) -> Self {
        ImageFrame {
            id,
            format,
            width,
            height,
            planes,
            strides,
        }
    }

    /// Borrow the planes of a normalized av frame.
    pub fn from_video(id: FrameId, format: PixelFormat, frame: &'a ffmpeg::frame::Video) -> Self {
        let mut planes: [&[u8]; MAX_IMAGE_PLANES] = [&[]; MAX_IMAGE_PLANES];
        let mut strides = [0usize; MAX_IMAGE_PLANES];
        for i in 0..frame.planes().min(MAX_IMAGE_PLANES) {
            planes[i] = frame.data(i);
            strides[i] = frame.stride(i);
        }
        ImageFrame {
            id,
            format,
            width: frame.width(),
            height: frame.height(),
            planes,
            strides,
        }
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Plane data, empty for unused planes.
    pub fn plane(&self, index: usize) -> &[u8] {
        self.planes[index]
    }

    /// Bytes per row for a plane; 0 marks an unused plane.
    pub fn stride(&self, index: usize) -> usize {
        self.strides[index]
    }
}

/// An owned image buffer with tightly packed strides. Plane memory is freed
/// on drop.
pub struct AllocatedImage {
    width: u32,
    height: u32,
    format: PixelFormat,
    planes: Vec<Vec<u8>>,
    strides: [usize; MAX_IMAGE_PLANES],
}

/// Allocate a zeroed image with 1-byte-aligned strides.
pub fn allocate_image(
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<AllocatedImage, MediaError> {
    if width == 0 || height == 0 {
        return Err(MediaError::InvalidArgument(format!(
            "cannot allocate {width}x{height} image"
        )));
    }

    let stride = width as usize * format.bytes_per_pixel();
    let mut strides = [0usize; MAX_IMAGE_PLANES];
    strides[0] = stride;

    Ok(AllocatedImage {
        width,
        height,
        format,
        planes: vec![vec![0u8; stride * height as usize]],
        strides,
    })
}

impl AllocatedImage {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn stride(&self, index: usize) -> usize {
        self.strides[index]
    }

    pub fn plane(&self, index: usize) -> &[u8] {
        self.planes.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn plane_mut(&mut self, index: usize) -> &mut [u8] {
        self.planes
            .get_mut(index)
            .map(Vec::as_mut_slice)
            .unwrap_or(&mut [])
    }

    /// Metadata describing this image's layout.
    pub fn metadata(&self) -> ImageMetadata {
        ImageMetadata {
            width: self.width,
            height: self.height,
            plane_strides: self.strides,
        }
    }

    /// Borrow the image as a frame view with the given id.
    pub fn as_frame(&self, id: FrameId) -> ImageFrame<'_> {
        let mut planes: [&[u8]; MAX_IMAGE_PLANES] = [&[]; MAX_IMAGE_PLANES];
        for (i, plane) in self.planes.iter().enumerate().take(MAX_IMAGE_PLANES) {
            planes[i] = plane.as_slice();
        }
        ImageFrame::from_planes(id, self.format, self.width, self.height, planes, self.strides)
    }
}
