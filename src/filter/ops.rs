//! Filter stage implementations.
//!
//! Each [`FilterOp`] is a pure frame-to-frame transform. Argument
//! parsing and geometry validation happen once at graph build time;
//! `apply` assumes a frame matching the planned input geometry.

use super::FilterError;
use super::parser::ParsedFilter;
use crate::frame::{Frame, PixelFormat};

// Fixed-point scale for color math (matches the 10-bit arithmetic used
// in the format converters).
const FP_SHIFT: i32 = 10;
const FP_ONE: i32 = 1 << FP_SHIFT;

// BT.601 luma weights, scaled by 1024.
const LUMA_R: i32 = 306;
const LUMA_G: i32 = 601;
const LUMA_B: i32 = 117;

/// Precomputed state for the `hue` filter.
///
/// The RGB rotation matrix and the chroma rotation coefficients are
/// derived once at build time; `apply` is a per-pixel matrix multiply.
#[derive(Debug, Clone, PartialEq)]
pub struct HueState {
    hue_deg: f32,
    saturation: f32,
    /// 3x3 RGB matrix, fixed point (scaled by 1024).
    rgb_matrix: [[i32; 3]; 3],
    /// cos(hue) * saturation, fixed point.
    chroma_cos: i32,
    /// sin(hue) * saturation, fixed point.
    chroma_sin: i32,
}

impl HueState {
    fn new(hue_deg: f32, saturation: f32) -> Self {
        let a = hue_deg.to_radians();
        let (s, c) = a.sin_cos();

        // Hue rotation about the gray axis (Haeberli's matrix), composed
        // with saturation: at s=0 every row collapses to the luma weights.
        let hue = [
            [
                0.299 + 0.701 * c + 0.168 * s,
                0.587 - 0.587 * c + 0.330 * s,
                0.114 - 0.114 * c - 0.497 * s,
            ],
            [
                0.299 - 0.299 * c - 0.328 * s,
                0.587 + 0.413 * c + 0.035 * s,
                0.114 - 0.114 * c + 0.292 * s,
            ],
            [
                0.299 - 0.300 * c + 1.250 * s,
                0.587 - 0.588 * c - 1.050 * s,
                0.114 + 0.886 * c - 0.203 * s,
            ],
        ];
        let luma = [0.299f32, 0.587, 0.114];

        let mut rgb_matrix = [[0i32; 3]; 3];
        for (i, row) in hue.iter().enumerate() {
            for (j, &m) in row.iter().enumerate() {
                let blended = luma[j] * (1.0 - saturation) + m * saturation;
                rgb_matrix[i][j] = (blended * FP_ONE as f32).round() as i32;
            }
        }

        Self {
            hue_deg,
            saturation,
            rgb_matrix,
            chroma_cos: (c * saturation * FP_ONE as f32).round() as i32,
            chroma_sin: (s * saturation * FP_ONE as f32).round() as i32,
        }
    }
}

/// A single stage in a filter graph.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOp {
    /// Pass-through.
    Null,
    /// Bilinear resampling to the given dimensions.
    Scale {
        /// Target width.
        width: u32,
        /// Target height.
        height: u32,
    },
    /// Hue rotation and saturation adjustment.
    Hue(HueState),
    /// Rectangular crop.
    Crop {
        /// Output width.
        width: u32,
        /// Output height.
        height: u32,
        /// Left edge of the crop window.
        x: u32,
        /// Top edge of the crop window.
        y: u32,
    },
    /// Horizontal mirror.
    HFlip,
    /// Vertical mirror.
    VFlip,
    /// Desaturate, keeping the pixel format.
    Grayscale,
    /// Convert to another pixel format.
    Format {
        /// Target pixel format.
        format: PixelFormat,
    },
}

impl FilterOp {
    /// Construct a stage from a parsed descriptor entry.
    pub fn from_parsed(parsed: &ParsedFilter) -> Result<Self, FilterError> {
        match parsed.name.as_str() {
            "null" => Ok(FilterOp::Null),
            "scale" => {
                let width = positional_u32(parsed, 0, "scale", "width")?;
                let height = positional_u32(parsed, 1, "scale", "height")?;
                if width == 0 || height == 0 {
                    return Err(FilterError::BadArgument {
                        filter: "scale",
                        message: format!("target {}x{} must be non-zero", width, height),
                    });
                }
                Ok(FilterOp::Scale { width, height })
            }
            "hue" => {
                let hue_deg = named_f32(parsed, "h", "hue").unwrap_or(Ok(0.0))?;
                let saturation = named_f32(parsed, "s", "hue").unwrap_or(Ok(1.0))?;
                if !(-10.0..=10.0).contains(&saturation) {
                    return Err(FilterError::BadArgument {
                        filter: "hue",
                        message: format!("saturation {} out of range [-10, 10]", saturation),
                    });
                }
                Ok(FilterOp::Hue(HueState::new(hue_deg, saturation)))
            }
            "crop" => {
                let width = positional_u32(parsed, 0, "crop", "width")?;
                let height = positional_u32(parsed, 1, "crop", "height")?;
                let x = opt_positional_u32(parsed, 2, "crop", "x")?.unwrap_or(0);
                let y = opt_positional_u32(parsed, 3, "crop", "y")?.unwrap_or(0);
                if width == 0 || height == 0 {
                    return Err(FilterError::BadArgument {
                        filter: "crop",
                        message: format!("crop window {}x{} must be non-zero", width, height),
                    });
                }
                Ok(FilterOp::Crop {
                    width,
                    height,
                    x,
                    y,
                })
            }
            "hflip" => Ok(FilterOp::HFlip),
            "vflip" => Ok(FilterOp::VFlip),
            "grayscale" => Ok(FilterOp::Grayscale),
            "format" => {
                let name = parsed.positional(0).ok_or(FilterError::BadArgument {
                    filter: "format",
                    message: "missing pixel format name".into(),
                })?;
                let format = PixelFormat::from_name(name).ok_or(FilterError::BadArgument {
                    filter: "format",
                    message: format!("unknown pixel format '{}'", name),
                })?;
                Ok(FilterOp::Format { format })
            }
            other => Err(FilterError::UnknownFilter(other.to_string())),
        }
    }

    /// Validate this stage against an input geometry and return the
    /// output geometry. Called once per stage at graph build time.
    pub fn plan(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<(u32, u32, PixelFormat), FilterError> {
        match self {
            FilterOp::Null => Ok((width, height, format)),
            FilterOp::Scale {
                width: tw,
                height: th,
            } => {
                if format == PixelFormat::I420 && (tw % 2 != 0 || th % 2 != 0) {
                    return Err(FilterError::BadArgument {
                        filter: "scale",
                        message: format!("{}x{} must be even for yuv420p", tw, th),
                    });
                }
                Ok((*tw, *th, format))
            }
            FilterOp::Hue(_) => {
                if format.is_rgb() || format == PixelFormat::I420 {
                    Ok((width, height, format))
                } else {
                    Err(FilterError::UnsupportedFormat {
                        filter: "hue",
                        format,
                    })
                }
            }
            FilterOp::Crop {
                width: cw,
                height: ch,
                x,
                y,
            } => {
                if x + cw > width || y + ch > height {
                    return Err(FilterError::BadArgument {
                        filter: "crop",
                        message: format!(
                            "window {}x{}+{}+{} exceeds input {}x{}",
                            cw, ch, x, y, width, height
                        ),
                    });
                }
                if format == PixelFormat::I420
                    && (cw % 2 != 0 || ch % 2 != 0 || x % 2 != 0 || y % 2 != 0)
                {
                    return Err(FilterError::BadArgument {
                        filter: "crop",
                        message: "crop window must be even-aligned for yuv420p".into(),
                    });
                }
                Ok((*cw, *ch, format))
            }
            FilterOp::HFlip | FilterOp::VFlip | FilterOp::Grayscale => Ok((width, height, format)),
            FilterOp::Format { format: target } => {
                if *target == PixelFormat::I420 && (width % 2 != 0 || height % 2 != 0) {
                    return Err(FilterError::BadArgument {
                        filter: "format",
                        message: format!("{}x{} must be even for yuv420p", width, height),
                    });
                }
                Ok((width, height, *target))
            }
        }
    }

    /// Apply this stage to a frame, producing a new frame.
    pub fn apply(&self, frame: &Frame) -> Result<Frame, FilterError> {
        match self {
            FilterOp::Null => Ok(frame.clone()),
            FilterOp::Scale { width, height } => scale(frame, *width, *height),
            FilterOp::Hue(state) => hue(frame, state),
            FilterOp::Crop {
                width,
                height,
                x,
                y,
            } => crop(frame, *width, *height, *x, *y),
            FilterOp::HFlip => Ok(hflip(frame)),
            FilterOp::VFlip => Ok(vflip(frame)),
            FilterOp::Grayscale => Ok(grayscale(frame)),
            FilterOp::Format { format } => convert(frame, *format),
        }
    }

    /// Descriptor name of this stage.
    pub fn name(&self) -> &'static str {
        match self {
            FilterOp::Null => "null",
            FilterOp::Scale { .. } => "scale",
            FilterOp::Hue(_) => "hue",
            FilterOp::Crop { .. } => "crop",
            FilterOp::HFlip => "hflip",
            FilterOp::VFlip => "vflip",
            FilterOp::Grayscale => "grayscale",
            FilterOp::Format { .. } => "format",
        }
    }
}

fn positional_u32(
    parsed: &ParsedFilter,
    index: usize,
    filter: &'static str,
    what: &str,
) -> Result<u32, FilterError> {
    opt_positional_u32(parsed, index, filter, what)?.ok_or(FilterError::BadArgument {
        filter,
        message: format!("missing {} argument", what),
    })
}

fn opt_positional_u32(
    parsed: &ParsedFilter,
    index: usize,
    filter: &'static str,
    what: &str,
) -> Result<Option<u32>, FilterError> {
    match parsed.positional(index) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<u32>()
            .map(Some)
            .map_err(|_| FilterError::BadArgument {
                filter,
                message: format!("{} '{}' is not a valid integer", what, raw),
            }),
    }
}

fn named_f32(
    parsed: &ParsedFilter,
    key: &str,
    filter: &'static str,
) -> Option<Result<f32, FilterError>> {
    parsed.named(key).map(|raw| {
        raw.parse::<f32>().map_err(|_| FilterError::BadArgument {
            filter,
            message: format!("{}='{}' is not a valid number", key, raw),
        })
    })
}

// ============================================================================
// Scaling
// ============================================================================

fn scale(frame: &Frame, dst_width: u32, dst_height: u32) -> Result<Frame, FilterError> {
    let src_width = frame.width();
    let src_height = frame.height();
    let format = frame.pixel_format();

    if src_width == dst_width && src_height == dst_height {
        return Ok(frame.clone());
    }

    let mut out = vec![0u8; format.buffer_size(dst_width, dst_height)];

    match format.bytes_per_pixel() {
        Some(bpp) => {
            scale_packed_bilinear(
                frame.data(),
                src_width,
                src_height,
                &mut out,
                dst_width,
                dst_height,
                bpp,
            );
        }
        None => {
            // Planar YUV 4:2:0: scale each plane at its own resolution.
            let src_y = (src_width * src_height) as usize;
            let src_cw = src_width / 2;
            let src_ch = src_height / 2;
            let src_c = (src_cw * src_ch) as usize;

            let dst_y = (dst_width * dst_height) as usize;
            let dst_cw = dst_width / 2;
            let dst_ch = dst_height / 2;
            let dst_c = (dst_cw * dst_ch) as usize;

            let data = frame.data();
            scale_plane_bilinear(
                &data[..src_y],
                src_width,
                src_height,
                &mut out[..dst_y],
                dst_width,
                dst_height,
            );
            scale_plane_bilinear(
                &data[src_y..src_y + src_c],
                src_cw,
                src_ch,
                &mut out[dst_y..dst_y + dst_c],
                dst_cw,
                dst_ch,
            );
            scale_plane_bilinear(
                &data[src_y + src_c..],
                src_cw,
                src_ch,
                &mut out[dst_y + dst_c..],
                dst_cw,
                dst_ch,
            );
        }
    }

    frame_from_parts(dst_width, dst_height, format, out)
}

/// Bilinear scaling for a single 8-bit plane.
fn scale_plane_bilinear(
    src: &[u8],
    src_width: u32,
    src_height: u32,
    dst: &mut [u8],
    dst_width: u32,
    dst_height: u32,
) {
    let x_ratio = src_width as f32 / dst_width as f32;
    let y_ratio = src_height as f32 / dst_height as f32;

    for dy in 0..dst_height {
        let sy = dy as f32 * y_ratio;
        let y0 = sy.floor() as u32;
        let y1 = (y0 + 1).min(src_height - 1);
        let fy = sy - y0 as f32;

        for dx in 0..dst_width {
            let sx = dx as f32 * x_ratio;
            let x0 = sx.floor() as u32;
            let x1 = (x0 + 1).min(src_width - 1);
            let fx = sx - x0 as f32;

            let p00 = src[(y0 * src_width + x0) as usize] as f32;
            let p10 = src[(y0 * src_width + x1) as usize] as f32;
            let p01 = src[(y1 * src_width + x0) as usize] as f32;
            let p11 = src[(y1 * src_width + x1) as usize] as f32;

            let top = p00 * (1.0 - fx) + p10 * fx;
            let bottom = p01 * (1.0 - fx) + p11 * fx;
            let value = top * (1.0 - fy) + bottom * fy;

            dst[(dy * dst_width + dx) as usize] = value.round() as u8;
        }
    }
}

/// Bilinear scaling for packed formats, interpolating each channel.
#[allow(clippy::too_many_arguments)]
fn scale_packed_bilinear(
    src: &[u8],
    src_width: u32,
    src_height: u32,
    dst: &mut [u8],
    dst_width: u32,
    dst_height: u32,
    bpp: usize,
) {
    let x_ratio = src_width as f32 / dst_width as f32;
    let y_ratio = src_height as f32 / dst_height as f32;
    let src_stride = src_width as usize * bpp;
    let dst_stride = dst_width as usize * bpp;

    for dy in 0..dst_height as usize {
        let sy = dy as f32 * y_ratio;
        let y0 = sy.floor() as usize;
        let y1 = (y0 + 1).min(src_height as usize - 1);
        let fy = sy - y0 as f32;

        for dx in 0..dst_width as usize {
            let sx = dx as f32 * x_ratio;
            let x0 = sx.floor() as usize;
            let x1 = (x0 + 1).min(src_width as usize - 1);
            let fx = sx - x0 as f32;

            for ch in 0..bpp {
                let p00 = src[y0 * src_stride + x0 * bpp + ch] as f32;
                let p10 = src[y0 * src_stride + x1 * bpp + ch] as f32;
                let p01 = src[y1 * src_stride + x0 * bpp + ch] as f32;
                let p11 = src[y1 * src_stride + x1 * bpp + ch] as f32;

                let top = p00 * (1.0 - fx) + p10 * fx;
                let bottom = p01 * (1.0 - fx) + p11 * fx;
                let value = top * (1.0 - fy) + bottom * fy;

                dst[dy * dst_stride + dx * bpp + ch] = value.round() as u8;
            }
        }
    }
}

// ============================================================================
// Hue / saturation
// ============================================================================

fn hue(frame: &Frame, state: &HueState) -> Result<Frame, FilterError> {
    let format = frame.pixel_format();
    if format.is_rgb() {
        Ok(hue_rgb(frame, state))
    } else if format == PixelFormat::I420 {
        Ok(hue_i420(frame, state))
    } else {
        Err(FilterError::UnsupportedFormat {
            filter: "hue",
            format,
        })
    }
}

fn hue_rgb(frame: &Frame, state: &HueState) -> Frame {
    let format = frame.pixel_format();
    let bpp = format.bytes_per_pixel().expect("rgb formats are packed");
    let (ro, go, bo) = format.rgb_offsets();
    let m = &state.rgb_matrix;

    let mut out = frame.clone();
    for px in out.data_mut().chunks_exact_mut(bpp) {
        let r = px[ro] as i32;
        let g = px[go] as i32;
        let b = px[bo] as i32;

        let nr = (m[0][0] * r + m[0][1] * g + m[0][2] * b) >> FP_SHIFT;
        let ng = (m[1][0] * r + m[1][1] * g + m[1][2] * b) >> FP_SHIFT;
        let nb = (m[2][0] * r + m[2][1] * g + m[2][2] * b) >> FP_SHIFT;

        px[ro] = nr.clamp(0, 255) as u8;
        px[go] = ng.clamp(0, 255) as u8;
        px[bo] = nb.clamp(0, 255) as u8;
    }
    out
}

fn hue_i420(frame: &Frame, state: &HueState) -> Frame {
    let w = frame.width() as usize;
    let h = frame.height() as usize;
    let y_size = w * h;
    let c_size = (w / 2) * (h / 2);

    let mut out = frame.clone();
    let data = out.data_mut();

    // Hue in YUV space is a rotation of the centered chroma vector,
    // saturation a scaling of it; the luma plane is untouched.
    for i in 0..c_size {
        let u = data[y_size + i] as i32 - 128;
        let v = data[y_size + c_size + i] as i32 - 128;

        let nu = (u * state.chroma_cos - v * state.chroma_sin) >> FP_SHIFT;
        let nv = (u * state.chroma_sin + v * state.chroma_cos) >> FP_SHIFT;

        data[y_size + i] = (nu + 128).clamp(0, 255) as u8;
        data[y_size + c_size + i] = (nv + 128).clamp(0, 255) as u8;
    }
    out
}

// ============================================================================
// Crop and flips
// ============================================================================

fn crop(frame: &Frame, cw: u32, ch: u32, x: u32, y: u32) -> Result<Frame, FilterError> {
    let format = frame.pixel_format();
    match format.bytes_per_pixel() {
        Some(bpp) => {
            let src_stride = frame.width() as usize * bpp;
            let dst_stride = cw as usize * bpp;
            let mut out = vec![0u8; format.buffer_size(cw, ch)];
            for row in 0..ch as usize {
                let src_start = (y as usize + row) * src_stride + x as usize * bpp;
                let dst_start = row * dst_stride;
                out[dst_start..dst_start + dst_stride]
                    .copy_from_slice(&frame.data()[src_start..src_start + dst_stride]);
            }
            frame_from_parts(cw, ch, format, out)
        }
        None => {
            let w = frame.width() as usize;
            let h = frame.height() as usize;
            let data = frame.data();
            let (y_plane, u_plane, v_plane) = i420_planes(data, w, h);

            let mut out = vec![0u8; format.buffer_size(cw, ch)];
            let dst_y = (cw * ch) as usize;
            let dst_cw = (cw / 2) as usize;
            let dst_ch = (ch / 2) as usize;
            let dst_c = dst_cw * dst_ch;

            copy_window(y_plane, w, &mut out[..dst_y], cw as usize, x as usize, y as usize, ch as usize);
            copy_window(
                u_plane,
                w / 2,
                &mut out[dst_y..dst_y + dst_c],
                dst_cw,
                (x / 2) as usize,
                (y / 2) as usize,
                dst_ch,
            );
            copy_window(
                v_plane,
                w / 2,
                &mut out[dst_y + dst_c..],
                dst_cw,
                (x / 2) as usize,
                (y / 2) as usize,
                dst_ch,
            );
            frame_from_parts(cw, ch, format, out)
        }
    }
}

fn copy_window(
    src: &[u8],
    src_width: usize,
    dst: &mut [u8],
    dst_width: usize,
    x: usize,
    y: usize,
    rows: usize,
) {
    for row in 0..rows {
        let src_start = (y + row) * src_width + x;
        let dst_start = row * dst_width;
        dst[dst_start..dst_start + dst_width]
            .copy_from_slice(&src[src_start..src_start + dst_width]);
    }
}

fn hflip(frame: &Frame) -> Frame {
    let format = frame.pixel_format();
    let mut out = frame.clone();
    match format.bytes_per_pixel() {
        Some(bpp) => {
            let stride = frame.width() as usize * bpp;
            for row in out.data_mut().chunks_exact_mut(stride) {
                reverse_pixels(row, bpp);
            }
        }
        None => {
            let w = frame.width() as usize;
            let h = frame.height() as usize;
            for_each_i420_plane_mut(out.data_mut(), w, h, |plane, pw, _| {
                for row in plane.chunks_exact_mut(pw) {
                    row.reverse();
                }
            });
        }
    }
    out
}

fn reverse_pixels(row: &mut [u8], bpp: usize) {
    let n = row.len() / bpp;
    for i in 0..n / 2 {
        let j = n - 1 - i;
        for ch in 0..bpp {
            row.swap(i * bpp + ch, j * bpp + ch);
        }
    }
}

fn vflip(frame: &Frame) -> Frame {
    let format = frame.pixel_format();
    let mut out = frame.clone();
    match format.bytes_per_pixel() {
        Some(bpp) => {
            let stride = frame.width() as usize * bpp;
            flip_rows(out.data_mut(), stride);
        }
        None => {
            let w = frame.width() as usize;
            let h = frame.height() as usize;
            for_each_i420_plane_mut(out.data_mut(), w, h, |plane, pw, _| {
                flip_rows(plane, pw);
            });
        }
    }
    out
}

fn flip_rows(data: &mut [u8], stride: usize) {
    let rows = data.len() / stride;
    for i in 0..rows / 2 {
        let j = rows - 1 - i;
        let (top, bottom) = data.split_at_mut(j * stride);
        top[i * stride..i * stride + stride].swap_with_slice(&mut bottom[..stride]);
    }
}

// ============================================================================
// Grayscale
// ============================================================================

fn grayscale(frame: &Frame) -> Frame {
    let format = frame.pixel_format();
    let mut out = frame.clone();
    match format {
        PixelFormat::Gray8 => out,
        PixelFormat::I420 => {
            // Neutral chroma leaves only the luma plane visible.
            let w = frame.width() as usize;
            let h = frame.height() as usize;
            let y_size = w * h;
            for byte in &mut out.data_mut()[y_size..] {
                *byte = 128;
            }
            out
        }
        _ => {
            let bpp = format.bytes_per_pixel().expect("rgb formats are packed");
            let (ro, go, bo) = format.rgb_offsets();
            for px in out.data_mut().chunks_exact_mut(bpp) {
                let luma = (LUMA_R * px[ro] as i32
                    + LUMA_G * px[go] as i32
                    + LUMA_B * px[bo] as i32)
                    >> FP_SHIFT;
                let luma = luma.clamp(0, 255) as u8;
                px[ro] = luma;
                px[go] = luma;
                px[bo] = luma;
            }
            out
        }
    }
}

// ============================================================================
// Pixel format conversion
// ============================================================================

/// Convert a frame to another pixel format (BT.601 for YUV math).
pub(crate) fn convert(frame: &Frame, target: PixelFormat) -> Result<Frame, FilterError> {
    let source = frame.pixel_format();
    if source == target {
        return Ok(frame.clone());
    }

    let w = frame.width();
    let h = frame.height();
    let out = match (source, target) {
        (a, b) if a.is_rgb() && b.is_rgb() => convert_rgb_family(frame, target),
        (a, PixelFormat::Gray8) if a.is_rgb() => rgb_to_gray(frame),
        (PixelFormat::Gray8, b) if b.is_rgb() => gray_to_rgb(frame, target),
        (a, PixelFormat::I420) if a.is_rgb() => rgb_to_i420(frame),
        (PixelFormat::I420, b) if b.is_rgb() => i420_to_rgb(frame, target),
        (PixelFormat::Gray8, PixelFormat::I420) => gray_to_i420(frame),
        (PixelFormat::I420, PixelFormat::Gray8) => i420_to_gray(frame),
        _ => {
            return Err(FilterError::UnsupportedFormat {
                filter: "format",
                format: target,
            });
        }
    };
    frame_from_parts(w, h, target, out)
}

/// Any RGB-family layout to any other: reorder channels, add or drop alpha.
fn convert_rgb_family(frame: &Frame, target: PixelFormat) -> Vec<u8> {
    let src_fmt = frame.pixel_format();
    let src_bpp = src_fmt.bytes_per_pixel().expect("rgb formats are packed");
    let dst_bpp = target.bytes_per_pixel().expect("rgb formats are packed");
    let (sro, sgo, sbo) = src_fmt.rgb_offsets();
    let (dro, dgo, dbo) = target.rgb_offsets();

    let pixels = frame.width() as usize * frame.height() as usize;
    let mut out = vec![0u8; pixels * dst_bpp];
    for (src, dst) in frame
        .data()
        .chunks_exact(src_bpp)
        .zip(out.chunks_exact_mut(dst_bpp))
    {
        dst[dro] = src[sro];
        dst[dgo] = src[sgo];
        dst[dbo] = src[sbo];
        if target.has_alpha() {
            dst[3] = if src_fmt.has_alpha() { src[3] } else { 255 };
        }
    }
    out
}

fn rgb_to_gray(frame: &Frame) -> Vec<u8> {
    let format = frame.pixel_format();
    let bpp = format.bytes_per_pixel().expect("rgb formats are packed");
    let (ro, go, bo) = format.rgb_offsets();
    frame
        .data()
        .chunks_exact(bpp)
        .map(|px| {
            let luma =
                (LUMA_R * px[ro] as i32 + LUMA_G * px[go] as i32 + LUMA_B * px[bo] as i32)
                    >> FP_SHIFT;
            luma.clamp(0, 255) as u8
        })
        .collect()
}

fn gray_to_rgb(frame: &Frame, target: PixelFormat) -> Vec<u8> {
    let dst_bpp = target.bytes_per_pixel().expect("rgb formats are packed");
    let pixels = frame.width() as usize * frame.height() as usize;
    let mut out = vec![255u8; pixels * dst_bpp];
    for (gray, dst) in frame.data().iter().zip(out.chunks_exact_mut(dst_bpp)) {
        dst[0] = *gray;
        dst[1] = *gray;
        dst[2] = *gray;
    }
    out
}

/// BT.601 YUV -> RGB (coefficients scaled by 1024).
#[inline]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y = y as i32;
    let u = u as i32 - 128;
    let v = v as i32 - 128;

    let r = y + ((1436 * v) >> FP_SHIFT);
    let g = y - ((352 * u + 731 * v) >> FP_SHIFT);
    let b = y + ((1815 * u) >> FP_SHIFT);

    (
        r.clamp(0, 255) as u8,
        g.clamp(0, 255) as u8,
        b.clamp(0, 255) as u8,
    )
}

/// BT.601 RGB -> YUV (coefficients scaled by 1024).
#[inline]
fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let r = r as i32;
    let g = g as i32;
    let b = b as i32;

    let y = ((306 * r + 601 * g + 117 * b) >> FP_SHIFT).clamp(0, 255);
    let u = (((-173 * r - 339 * g + 512 * b) >> FP_SHIFT) + 128).clamp(0, 255);
    let v = (((512 * r - 429 * g - 83 * b) >> FP_SHIFT) + 128).clamp(0, 255);

    (y as u8, u as u8, v as u8)
}

fn i420_to_rgb(frame: &Frame, target: PixelFormat) -> Vec<u8> {
    let w = frame.width() as usize;
    let h = frame.height() as usize;
    let (y_plane, u_plane, v_plane) = i420_planes(frame.data(), w, h);

    let dst_bpp = target.bytes_per_pixel().expect("rgb formats are packed");
    let (ro, go, bo) = target.rgb_offsets();
    let mut out = vec![255u8; w * h * dst_bpp];

    for row in 0..h {
        for col in 0..w {
            let y = y_plane[row * w + col];
            let u = u_plane[(row / 2) * (w / 2) + col / 2];
            let v = v_plane[(row / 2) * (w / 2) + col / 2];
            let (r, g, b) = yuv_to_rgb(y, u, v);

            let px = &mut out[(row * w + col) * dst_bpp..][..dst_bpp];
            px[ro] = r;
            px[go] = g;
            px[bo] = b;
        }
    }
    out
}

fn rgb_to_i420(frame: &Frame) -> Vec<u8> {
    let w = frame.width() as usize;
    let h = frame.height() as usize;
    let src_fmt = frame.pixel_format();
    let bpp = src_fmt.bytes_per_pixel().expect("rgb formats are packed");
    let (ro, go, bo) = src_fmt.rgb_offsets();
    let data = frame.data();

    let y_size = w * h;
    let c_size = (w / 2) * (h / 2);
    let mut out = vec![0u8; y_size + 2 * c_size];

    for row in 0..h {
        for col in 0..w {
            let px = &data[(row * w + col) * bpp..][..bpp];
            let (y, u, v) = rgb_to_yuv(px[ro], px[go], px[bo]);
            out[row * w + col] = y;
            // Chroma subsampled 2x2: the top-left sample of each block wins.
            if row % 2 == 0 && col % 2 == 0 {
                let ci = (row / 2) * (w / 2) + col / 2;
                out[y_size + ci] = u;
                out[y_size + c_size + ci] = v;
            }
        }
    }
    out
}

fn gray_to_i420(frame: &Frame) -> Vec<u8> {
    let w = frame.width() as usize;
    let h = frame.height() as usize;
    let y_size = w * h;
    let c_size = (w / 2) * (h / 2);

    let mut out = vec![128u8; y_size + 2 * c_size];
    out[..y_size].copy_from_slice(frame.data());
    out
}

fn i420_to_gray(frame: &Frame) -> Vec<u8> {
    let w = frame.width() as usize;
    let h = frame.height() as usize;
    frame.data()[..w * h].to_vec()
}

// ============================================================================
// Shared helpers
// ============================================================================

fn i420_planes(data: &[u8], w: usize, h: usize) -> (&[u8], &[u8], &[u8]) {
    let y_size = w * h;
    let c_size = (w / 2) * (h / 2);
    (
        &data[..y_size],
        &data[y_size..y_size + c_size],
        &data[y_size + c_size..y_size + 2 * c_size],
    )
}

fn for_each_i420_plane_mut(
    data: &mut [u8],
    w: usize,
    h: usize,
    mut f: impl FnMut(&mut [u8], usize, usize),
) {
    let y_size = w * h;
    let c_size = (w / 2) * (h / 2);
    let (y_plane, chroma) = data.split_at_mut(y_size);
    let (u_plane, v_plane) = chroma.split_at_mut(c_size);
    f(y_plane, w, h);
    f(u_plane, w / 2, h / 2);
    f(v_plane, w / 2, h / 2);
}

fn frame_from_parts(
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
) -> Result<Frame, FilterError> {
    Frame::from_data(width, height, format, data).map_err(|e| FilterError::BadArgument {
        filter: "internal",
        message: e.to_string(),
    })
}
