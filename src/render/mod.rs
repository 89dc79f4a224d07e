//! ページのラスタライズ
//!
//! 組み込みのレンダラはパスの塗り・線、テキスト（グリフのアウトライン）、画像 XObject を描く。
//! 色管理はしない。`pdfium` フィーチャを有効にして `PDFIUM_DYNAMIC_LIB_PATH` を
//! 設定すると pdfium で描く。

pub mod canvas;
pub mod font;
pub mod interpreter;
#[cfg(feature = "pdfium")]
pub mod pdfium;

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GrayImage, ImageFormat, Luma, RgbImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::PdfForgeError;
use crate::pdf::content_stream::Matrix;
use crate::pdf::document::{Document, Page};
use canvas::Canvas;
use interpreter::Interpreter;

/// 出力画像の形式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RasterFormat {
    Png,
    Jpeg,
    Bmp,
}

impl RasterFormat {
    /// 名前から形式を引く。知らない名前は `UnsupportedFormatError`。
    pub fn from_name(name: &str) -> crate::error::Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "bmp" => Ok(Self::Bmp),
            other => Err(PdfForgeError::unsupported_format(format!(
                "raster format '{other}' is not supported (png, jpeg, bmp)"
            ))),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Bmp => "bmp",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Bmp => "image/bmp",
        }
    }
}

/// 色変換
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    Rgb,
    Grayscale,
    /// しきい値 128 の白黒
    Bw,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterizeOptions {
    pub format: RasterFormat,
    /// 36-1200
    pub dpi: u32,
    /// JPEG 品質 (1-100)
    pub quality: u8,
    pub color_mode: ColorMode,
    /// 1 始まりのページ番号（None は全ページ）
    pub pages: Option<Vec<u32>>,
}

impl Default for RasterizeOptions {
    fn default() -> Self {
        Self {
            format: RasterFormat::Png,
            dpi: 150,
            quality: 85,
            color_mode: ColorMode::Rgb,
            pages: None,
        }
    }
}

impl RasterizeOptions {
    pub fn validate(&self) -> crate::error::Result<()> {
        if !(36..=1200).contains(&self.dpi) {
            return Err(PdfForgeError::config(format!("dpi must be 36-1200, got {}", self.dpi)));
        }
        if !(1..=100).contains(&self.quality) {
            return Err(PdfForgeError::config(format!(
                "quality must be 1-100, got {}",
                self.quality
            )));
        }
        Ok(())
    }
}

/// ラスタライズ結果 1 ページ
#[derive(Debug, Clone)]
pub struct RasterImage {
    /// 0 始まりのページ番号
    pub page_index: usize,
    pub image: DynamicImage,
    pub color_mode: ColorMode,
    pub dpi: u32,
    pub format: RasterFormat,
    /// エンコード済みバイト列
    pub bytes: Vec<u8>,
}

/// 1 ページの画素数の上限（A4 を 1200 dpi で描ける大きさ）
pub const MAX_PIXELS: u64 = 150_000_000;

/// 出力画素数: round(ポイント × dpi / 72)
pub fn pixel_size(points: f64, dpi: u32) -> u32 {
    (points * f64::from(dpi) / 72.0).round().max(1.0) as u32
}

/// ページの出力サイズ。上限を超えるなら EncodingError。
pub fn page_pixel_dimensions(page: &Page, dpi: u32) -> crate::error::Result<(u32, u32)> {
    let (width_pt, height_pt) = page.display_size();
    let (width, height) = (pixel_size(width_pt, dpi), pixel_size(height_pt, dpi));
    let total = u64::from(width) * u64::from(height);
    if total > MAX_PIXELS {
        return Err(PdfForgeError::encoding(format!(
            "page of {width_pt}x{height_pt} pt at {dpi} dpi needs {width}x{height} pixels (limit {MAX_PIXELS})"
        )));
    }
    Ok((width, height))
}

/// ユーザー空間 → デバイス空間（左上原点、/Rotate は時計回り）
fn page_transform(page: &Page, dpi: u32) -> Matrix {
    let s = f64::from(dpi) / 72.0;
    let r = page.media_box;
    match page.rotation {
        90 => Matrix::new(0.0, s, s, 0.0, -r.y0 * s, -r.x0 * s),
        180 => Matrix::new(-s, 0.0, 0.0, s, r.x1 * s, -r.y0 * s),
        270 => Matrix::new(0.0, -s, -s, 0.0, r.y1 * s, r.x1 * s),
        _ => Matrix::new(s, 0.0, 0.0, -s, -r.x0 * s, r.y1 * s),
    }
}

/// 1 ページを RGB で描く。コンテンツが読めないページは白紙になる。
pub fn render_page(doc: &Document, index: usize, dpi: u32) -> crate::error::Result<RgbImage> {
    let page = doc.page(index)?;
    let (width, height) = page_pixel_dimensions(&page, dpi)?;
    let mut canvas = Canvas::new(width, height);

    match doc.page_content(page.id) {
        Ok(content) => {
            let resources = doc.page_resources(page.id);
            let mut interpreter = Interpreter::new(doc, &mut canvas, page_transform(&page, dpi));
            interpreter.run(&content, &resources);
            tracing::debug!(page = index + 1, skipped = interpreter.skipped, "page rendered");
        }
        Err(e) => {
            tracing::warn!(page = index + 1, "page content unreadable, rendering blank page: {e}");
        }
    }
    Ok(canvas.into_image())
}

/// 色変換を適用する。
pub fn apply_color_mode(image: RgbImage, mode: ColorMode) -> DynamicImage {
    match mode {
        ColorMode::Rgb => DynamicImage::ImageRgb8(image),
        ColorMode::Grayscale => DynamicImage::ImageLuma8(to_luminance(&image)),
        ColorMode::Bw => {
            let mut gray = to_luminance(&image);
            for pixel in gray.pixels_mut() {
                pixel.0[0] = if pixel.0[0] >= 128 { 255 } else { 0 };
            }
            DynamicImage::ImageLuma8(gray)
        }
    }
}

/// 0.299 R + 0.587 G + 0.114 B
fn to_luminance(image: &RgbImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b] = image.get_pixel(x, y).0;
        let l = 0.299 * f64::from(r) + 0.587 * f64::from(g) + 0.114 * f64::from(b);
        Luma([l.round().clamp(0.0, 255.0) as u8])
    })
}

/// 画像を指定形式でエンコードする。
pub fn encode_image(image: &DynamicImage, format: RasterFormat, quality: u8) -> crate::error::Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    match format {
        RasterFormat::Png => image.write_to(&mut buf, ImageFormat::Png)?,
        RasterFormat::Bmp => image.write_to(&mut buf, ImageFormat::Bmp)?,
        RasterFormat::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut buf, quality);
            image.write_with_encoder(encoder)?;
        }
    }
    Ok(buf.into_inner())
}

/// 選択ページを並列にラスタライズする。結果はページ順。
pub fn rasterize(doc: &Document, options: &RasterizeOptions) -> crate::error::Result<Vec<RasterImage>> {
    options.validate()?;
    doc.ensure_plaintext()?;
    let indices = crate::ops::selected_indices(doc, options.pages.as_deref())?;

    #[cfg(feature = "pdfium")]
    if let Some(images) = pdfium::rasterize(doc, &indices, options)? {
        return Ok(images);
    }

    let images = indices
        .par_iter()
        .map(|&index| {
            let rgb = render_page(doc, index, options.dpi)?;
            let image = apply_color_mode(rgb, options.color_mode);
            let bytes = encode_image(&image, options.format, options.quality)?;
            Ok(RasterImage {
                page_index: index,
                image,
                color_mode: options.color_mode,
                dpi: options.dpi,
                format: options.format,
                bytes,
            })
        })
        .collect::<crate::error::Result<Vec<_>>>()?;

    tracing::info!(
        pages = images.len(),
        dpi = options.dpi,
        format = options.format.extension(),
        "document rasterized"
    );
    Ok(images)
}
