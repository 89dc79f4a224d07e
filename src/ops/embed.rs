//! 画像列から PDF を作る。1 画像 = 1 ページ。
//!
//! 1 画素 = 1 ポイント（72 DPI）を自然サイズとする。

use image::{DynamicImage, ImageFormat};
use lopdf::content::Operation;
use lopdf::{Dictionary, Object, Stream};
use serde::Deserialize;

use crate::error::PdfForgeError;
use crate::pdf::content_stream::encode_operations;
use crate::pdf::document::{Document, Rect, number_object};
use crate::pdf::filters;

const IMAGE_RESOURCE: &str = "Im0";

/// 用紙サイズ
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageSize {
    A3,
    A4,
    A5,
    Letter,
    Legal,
    /// 画像サイズ + 余白
    Fit,
    Custom { width: f64, height: f64 },
}

impl PageSize {
    /// 縦向きの寸法（ポイント）。Fit は None。
    pub fn dimensions(self) -> Option<(f64, f64)> {
        match self {
            Self::A3 => Some((842.0, 1191.0)),
            Self::A4 => Some((595.0, 842.0)),
            Self::A5 => Some((420.0, 595.0)),
            Self::Letter => Some((612.0, 792.0)),
            Self::Legal => Some((612.0, 1008.0)),
            Self::Fit => None,
            Self::Custom { width, height } => Some((width, height)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Portrait,
    Landscape,
    /// 画像の縦横に合わせる
    Auto,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbedOptions {
    pub page_size: PageSize,
    pub orientation: Orientation,
    /// 四辺共通の余白（ポイント）
    pub margin: f64,
    pub fit_to_page: bool,
    pub preserve_aspect_ratio: bool,
}

impl Default for EmbedOptions {
    fn default() -> Self {
        Self {
            page_size: PageSize::A4,
            orientation: Orientation::Auto,
            margin: 36.0,
            fit_to_page: true,
            preserve_aspect_ratio: true,
        }
    }
}

/// 埋め込む画像（エンコード済みバイト列）
#[derive(Debug, Clone)]
pub struct EmbedImage {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// PDF に入れる直前の画像 XObject
struct PreparedImage {
    width: u32,
    height: u32,
    stream: Stream,
    smask: Option<Stream>,
}

/// 画像列から新しいドキュメントを作る。
pub fn images_to_pdf(images: &[EmbedImage], options: &EmbedOptions) -> crate::error::Result<Document> {
    if images.is_empty() {
        return Err(PdfForgeError::config("images_to_pdf needs at least one image"));
    }
    if !(options.margin >= 0.0 && options.margin.is_finite()) {
        return Err(PdfForgeError::config(format!("invalid margin {}", options.margin)));
    }
    if let PageSize::Custom { width, height } = options.page_size
        && !(width > 0.0 && height > 0.0 && width.is_finite() && height.is_finite())
    {
        return Err(PdfForgeError::config(format!(
            "custom page size must be positive, got {width}x{height}"
        )));
    }

    let mut doc = Document::new("1.7");
    let mut pages = Vec::with_capacity(images.len());

    for image in images {
        let prepared = prepare_image(image)?;
        let (img_w, img_h) = (f64::from(prepared.width), f64::from(prepared.height));
        let (page_w, page_h) = page_dimensions(options, img_w, img_h);
        let area = Rect::new(
            options.margin,
            options.margin,
            page_w - options.margin,
            page_h - options.margin,
        );
        if page_w - 2.0 * options.margin <= 0.0 || page_h - 2.0 * options.margin <= 0.0 {
            return Err(PdfForgeError::config(format!(
                "margin {} leaves no printable area on a {}x{} page",
                options.margin, page_w, page_h
            )));
        }
        let placement = place_image(options, area, img_w, img_h);

        let mut stream = prepared.stream;
        if let Some(smask) = prepared.smask {
            let smask_id = doc.add_object(smask);
            stream.dict.set("SMask", Object::Reference(smask_id));
        }
        let image_id = doc.add_object(stream);

        let operations = vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    number_object(placement.width()),
                    0.into(),
                    0.into(),
                    number_object(placement.height()),
                    number_object(placement.x0),
                    number_object(placement.y0),
                ],
            ),
            Operation::new("Do", vec![Object::Name(IMAGE_RESOURCE.as_bytes().to_vec())]),
            Operation::new("Q", vec![]),
        ];
        let content_id = doc.add_object(Stream::new(Dictionary::new(), encode_operations(operations)?));

        let mut xobjects = Dictionary::new();
        xobjects.set(IMAGE_RESOURCE, Object::Reference(image_id));
        let mut resources = Dictionary::new();
        resources.set("XObject", Object::Dictionary(xobjects));

        let mut page = Dictionary::new();
        page.set("Type", Object::Name(b"Page".to_vec()));
        page.set("MediaBox", Rect::new(0.0, 0.0, page_w, page_h).to_object());
        page.set("Resources", Object::Dictionary(resources));
        page.set("Contents", Object::Reference(content_id));
        pages.push(doc.add_object(Object::Dictionary(page)));

        tracing::debug!(
            image = %image.name,
            width = prepared.width,
            height = prepared.height,
            "image placed"
        );
    }

    super::install_page_tree(&mut doc, pages);
    doc.set_producer(crate::PRODUCER);
    tracing::info!(images = images.len(), "images embedded");
    Ok(doc)
}

/// 用紙サイズと向きからページ寸法を決める。
fn page_dimensions(options: &EmbedOptions, img_w: f64, img_h: f64) -> (f64, f64) {
    let Some((w, h)) = options.page_size.dimensions() else {
        return (img_w + 2.0 * options.margin, img_h + 2.0 * options.margin);
    };
    let landscape = match options.orientation {
        Orientation::Portrait => false,
        Orientation::Landscape => true,
        Orientation::Auto => img_w > img_h,
    };
    let (short, long) = (w.min(h), w.max(h));
    if landscape { (long, short) } else { (short, long) }
}

/// 配置領域の中での画像の矩形
fn place_image(options: &EmbedOptions, area: Rect, img_w: f64, img_h: f64) -> Rect {
    let (w, h) = if options.fit_to_page {
        let sx = area.width() / img_w;
        let sy = area.height() / img_h;
        if options.preserve_aspect_ratio {
            let s = sx.min(sy);
            (img_w * s, img_h * s)
        } else {
            (area.width(), area.height())
        }
    } else {
        (img_w, img_h)
    };
    let x = area.x0 + (area.width() - w) / 2.0;
    let y = area.y0 + (area.height() - h) / 2.0;
    Rect::new(x, y, x + w, y + h)
}

fn image_dict(width: u32, height: u32, color_space: &str, filter: &str) -> Dictionary {
    let mut dict = Dictionary::new();
    dict.set("Type", Object::Name(b"XObject".to_vec()));
    dict.set("Subtype", Object::Name(b"Image".to_vec()));
    dict.set("Width", Object::Integer(i64::from(width)));
    dict.set("Height", Object::Integer(i64::from(height)));
    dict.set("ColorSpace", Object::Name(color_space.as_bytes().to_vec()));
    dict.set("BitsPerComponent", Object::Integer(8));
    dict.set("Filter", Object::Name(filter.as_bytes().to_vec()));
    dict
}

fn prepare_image(image: &EmbedImage) -> crate::error::Result<PreparedImage> {
    let format = image::guess_format(&image.bytes).map_err(|_| {
        PdfForgeError::unsupported_format(format!("{}: unrecognized image format", image.name))
    })?;

    // 1 または 3 成分の JPEG はそのまま DCTDecode で埋め込む
    if format == ImageFormat::Jpeg
        && let Some(header) = jpeg_header(&image.bytes)
        && matches!(header.components, 1 | 3)
    {
        let color_space = if header.components == 1 { "DeviceGray" } else { "DeviceRGB" };
        return Ok(PreparedImage {
            width: header.width,
            height: header.height,
            stream: Stream::new(
                image_dict(header.width, header.height, color_space, "DCTDecode"),
                image.bytes.clone(),
            ),
            smask: None,
        });
    }

    let decoded = image::load_from_memory_with_format(&image.bytes, format).map_err(|e| {
        PdfForgeError::unsupported_format(format!("{}: cannot decode image: {e}", image.name))
    })?;
    encode_decoded(&decoded)
}

/// デコード済み画像を Flate の画像 XObject（必要ならアルファを SMask）にする。
fn encode_decoded(decoded: &DynamicImage) -> crate::error::Result<PreparedImage> {
    let (width, height) = (decoded.width(), decoded.height());
    if width == 0 || height == 0 {
        return Err(PdfForgeError::unsupported_format("image has zero size"));
    }
    let level = flate2::Compression::default();

    let (color_space, samples) = if decoded.color().has_color() {
        ("DeviceRGB", decoded.to_rgb8().into_raw())
    } else {
        ("DeviceGray", decoded.to_luma8().into_raw())
    };
    let stream = Stream::new(
        image_dict(width, height, color_space, "FlateDecode"),
        filters::flate_encode(&samples, level)?,
    );

    let smask = if decoded.color().has_alpha() {
        let alpha: Vec<u8> = decoded.to_rgba8().pixels().map(|p| p.0[3]).collect();
        // 完全不透明ならマスクは不要
        if alpha.iter().all(|&a| a == 255) {
            None
        } else {
            Some(Stream::new(
                image_dict(width, height, "DeviceGray", "FlateDecode"),
                filters::flate_encode(&alpha, level)?,
            ))
        }
    } else {
        None
    };

    Ok(PreparedImage {
        width,
        height,
        stream,
        smask,
    })
}

/// JPEG の SOF から読んだ寸法と成分数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JpegHeader {
    pub width: u32,
    pub height: u32,
    pub components: u8,
}

/// JPEG のマーカーを辿って最初の SOF を読む。
pub fn jpeg_header(data: &[u8]) -> Option<JpegHeader> {
    if !data.starts_with(&[0xFF, 0xD8]) {
        return None;
    }
    let mut pos = 2;
    while pos + 4 <= data.len() {
        if data[pos] != 0xFF {
            return None;
        }
        let marker = data[pos + 1];
        // フィルバイト
        if marker == 0xFF {
            pos += 1;
            continue;
        }
        // 長さを持たないマーカー
        if marker == 0x01 || (0xD0..=0xD7).contains(&marker) {
            pos += 2;
            continue;
        }
        let length = usize::from(u16::from_be_bytes([data[pos + 2], data[pos + 3]]));
        let is_sof = (0xC0..=0xCF).contains(&marker) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_sof {
            let segment = data.get(pos + 4..pos + 2 + length)?;
            if segment.len() < 6 {
                return None;
            }
            let height = u32::from(u16::from_be_bytes([segment[1], segment[2]]));
            let width = u32::from(u16::from_be_bytes([segment[3], segment[4]]));
            return Some(JpegHeader {
                width,
                height,
                components: segment[5],
            });
        }
        if marker == 0xDA || length < 2 {
            return None;
        }
        pos += 2 + length;
    }
    None
}
