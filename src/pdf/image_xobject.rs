// 画像XObjectのメタデータ読み取り・デコード・再エンコード

use crate::error::PdfForgeError;
use crate::pdf::document::Document;
use crate::pdf::filters::{self, Filter};
use image::{DynamicImage, GrayImage, RgbImage};
use lopdf::{Object, Stream};
use std::io::Cursor;

/// 画像の色空間
#[derive(Debug, Clone, PartialEq)]
pub enum ColorSpace {
    Gray,
    Rgb,
    Cmyk,
    /// パレット: ベース色空間の成分数と展開済みの参照表
    Indexed { base: Box<ColorSpace>, palette: Vec<u8> },
    Unknown(String),
}

impl ColorSpace {
    pub fn components(&self) -> usize {
        match self {
            Self::Gray | Self::Indexed { .. } | Self::Unknown(_) => 1,
            Self::Rgb => 3,
            Self::Cmyk => 4,
        }
    }
}

/// 画像XObjectのメタデータ
#[derive(Debug, Clone)]
pub struct ImageMeta {
    pub width: u32,
    pub height: u32,
    pub bits_per_component: u8,
    pub color_space: ColorSpace,
    pub filters: Vec<Filter>,
    pub image_mask: bool,
    /// /Decode 配列の有無
    pub has_decode: bool,
    /// /Decode [1 0]（マスクの反転）
    pub inverted_decode: bool,
}

/// 最適圧縮済み画像データ
#[derive(Debug)]
pub struct OptimizedImage {
    pub data: Vec<u8>,
    pub filter: &'static str,
    pub color_space: &'static str,
    pub bits_per_component: u8,
}

pub fn is_image_xobject(stream: &Stream) -> bool {
    matches!(stream.dict.get(b"Subtype"), Ok(Object::Name(n)) if n == b"Image")
}

/// 色空間オブジェクトを解決する。
pub fn resolve_color_space(doc: &Document, obj: &Object) -> ColorSpace {
    match doc.resolve(obj) {
        Object::Name(name) => match name.as_slice() {
            b"DeviceGray" | b"G" | b"CalGray" => ColorSpace::Gray,
            b"DeviceRGB" | b"RGB" | b"CalRGB" => ColorSpace::Rgb,
            b"DeviceCMYK" | b"CMYK" => ColorSpace::Cmyk,
            other => ColorSpace::Unknown(String::from_utf8_lossy(other).into_owned()),
        },
        Object::Array(items) => {
            let family = match items.first().map(|o| doc.resolve(o)) {
                Some(Object::Name(n)) => n.as_slice(),
                _ => return ColorSpace::Unknown("array".into()),
            };
            match family {
                b"CalGray" => ColorSpace::Gray,
                b"CalRGB" => ColorSpace::Rgb,
                b"ICCBased" => {
                    let n = items
                        .get(1)
                        .map(|o| doc.resolve(o))
                        .and_then(|o| o.as_stream().ok())
                        .and_then(|s| s.dict.get(b"N").ok())
                        .and_then(|o| o.as_i64().ok())
                        .unwrap_or(0);
                    match n {
                        1 => ColorSpace::Gray,
                        3 => ColorSpace::Rgb,
                        4 => ColorSpace::Cmyk,
                        _ => ColorSpace::Unknown(format!("ICCBased N={n}")),
                    }
                }
                b"Indexed" | b"I" => {
                    let base = items
                        .get(1)
                        .map(|o| resolve_color_space(doc, o))
                        .unwrap_or(ColorSpace::Rgb);
                    let palette = match items.get(3).map(|o| doc.resolve(o)) {
                        Some(Object::String(bytes, _)) => bytes.clone(),
                        Some(Object::Stream(s)) => filters::decode_stream(s).unwrap_or_default(),
                        _ => Vec::new(),
                    };
                    ColorSpace::Indexed {
                        base: Box::new(base),
                        palette,
                    }
                }
                other => ColorSpace::Unknown(String::from_utf8_lossy(other).into_owned()),
            }
        }
        _ => ColorSpace::Unknown(String::new()),
    }
}

/// 画像XObjectのストリームから画像メタデータを読み取る。
pub fn read_image_meta(doc: &Document, stream: &Stream) -> crate::error::Result<ImageMeta> {
    let dict = &stream.dict;

    let width = dict_get_u32(doc, dict, b"Width")?;
    let height = dict_get_u32(doc, dict, b"Height")?;
    let image_mask = matches!(doc.dict_get(dict, b"ImageMask"), Some(Object::Boolean(true)));
    // BitsPerComponent: missing keyの場合のみデフォルト（マスクは1、それ以外は8）、型エラーは伝播
    let bits_per_component = match dict.get(b"BitsPerComponent") {
        Ok(_) => dict_get_u32(doc, dict, b"BitsPerComponent")? as u8,
        Err(_) if image_mask => 1,
        Err(_) => 8,
    };

    let color_space = if image_mask {
        ColorSpace::Gray
    } else {
        match dict.get(b"ColorSpace") {
            Ok(obj) => resolve_color_space(doc, obj),
            Err(_) => ColorSpace::Unknown(String::new()),
        }
    };

    let filters = filters::filter_chain(dict)?
        .into_iter()
        .map(|(f, _)| f)
        .collect();

    let decode = doc.dict_get(dict, b"Decode").and_then(|o| o.as_array().ok());
    let inverted_decode = decode
        .and_then(|arr| arr.first())
        .and_then(|o| crate::pdf::document::object_to_f64(o))
        .is_some_and(|v| v >= 1.0);

    Ok(ImageMeta {
        width,
        height,
        bits_per_component,
        color_space,
        filters,
        image_mask,
        has_decode: decode.is_some(),
        inverted_decode,
    })
}

/// 辞書からu32値を取得するヘルパー（負の値はエラー）
fn dict_get_u32(doc: &Document, dict: &lopdf::Dictionary, key: &[u8]) -> crate::error::Result<u32> {
    match doc.dict_get(dict, key) {
        Some(Object::Integer(i)) => {
            let val = *i;
            if val < 0 || val > u32::MAX as i64 {
                Err(PdfForgeError::corrupt(format!(
                    "Value out of u32 range for {:?}: {}",
                    String::from_utf8_lossy(key),
                    val
                )))
            } else {
                Ok(val as u32)
            }
        }
        Some(Object::Real(f)) if *f >= 0.0 => Ok(*f as u32),
        Some(other) => Err(PdfForgeError::corrupt(format!(
            "Expected integer for {:?}, got {:?}",
            String::from_utf8_lossy(key),
            other
        ))),
        None => Err(PdfForgeError::corrupt(format!(
            "Missing required key: {:?}",
            String::from_utf8_lossy(key),
        ))),
    }
}

/// JPEG 再エンコードの対象になるレイアウトか。
///
/// 8bit、グレーまたは RGB、/Decode なし、マスクでない、
/// フィルタが汎用のみか DCTDecode 単独。
pub fn is_reencodable(meta: &ImageMeta) -> bool {
    let filters_ok = match meta.filters.as_slice() {
        [Filter::Dct] => true,
        chain => chain
            .iter()
            .all(|f| matches!(f, Filter::Flate | Filter::Lzw | Filter::AsciiHex | Filter::Ascii85 | Filter::RunLength)),
    };
    meta.bits_per_component == 8
        && matches!(meta.color_space, ColorSpace::Gray | ColorSpace::Rgb)
        && !meta.has_decode
        && !meta.image_mask
        && filters_ok
}

/// 画像XObjectのストリームデータをデコードしてDynamicImageに変換する。
///
/// 汎用フィルタを展開したあと、DCTDecode なら JPEG として、
/// 残りがなければ raw サンプルとして解釈する。
pub fn decode_image(doc: &Document, stream: &Stream) -> crate::error::Result<DynamicImage> {
    let meta = read_image_meta(doc, stream)?;
    decode_image_with_meta(stream, &meta)
}

pub fn decode_image_with_meta(stream: &Stream, meta: &ImageMeta) -> crate::error::Result<DynamicImage> {
    let decoded = filters::decode_generic(stream)?;
    match decoded.remaining.as_slice() {
        [] => decode_raw(&decoded.data, meta),
        [Filter::Dct] => decode_jpeg(&decoded.data),
        [other, ..] => Err(PdfForgeError::unsupported_format(format!(
            "image filter {} is not supported",
            other.name()
        ))),
    }
}

/// JPEGデータをデコード
pub fn decode_jpeg(data: &[u8]) -> crate::error::Result<DynamicImage> {
    let reader = image::ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| PdfForgeError::encoding(format!("JPEG decode error: {}", e)))?;
    reader
        .decode()
        .map_err(|e| PdfForgeError::encoding(format!("JPEG decode error: {}", e)))
}

/// 1行ぶんのサンプルを取り出す（bpc 1/2/4/8/16、8bit に正規化するかは `scale` で指定）
fn unpack_samples(data: &[u8], width: usize, height: usize, components: usize, bpc: u8, scale: bool) -> crate::error::Result<Vec<u8>> {
    let samples_per_row = width * components;
    let bpc = usize::from(bpc);
    if !matches!(bpc, 1 | 2 | 4 | 8 | 16) {
        return Err(PdfForgeError::unsupported_format(format!("{bpc} bits per component")));
    }
    let row_bytes = (samples_per_row * bpc).div_ceil(8);
    let needed = row_bytes * height;
    if data.len() < needed {
        return Err(PdfForgeError::corrupt(format!(
            "image data too short: expected {}, got {}",
            needed,
            data.len()
        )));
    }
    if bpc == 8 {
        return Ok(data[..needed].to_vec());
    }

    let max = (1u32 << bpc.min(8)) - 1;
    let mut out = Vec::with_capacity(samples_per_row * height);
    for row in data[..needed].chunks(row_bytes) {
        for i in 0..samples_per_row {
            let value = if bpc == 16 {
                // 上位バイトのみ使う
                u32::from(row[i * 2])
            } else {
                let bit = i * bpc;
                let byte = row[bit / 8];
                let shift = 8 - bpc - (bit % 8);
                (u32::from(byte) >> shift) & max
            };
            let v = if scale && bpc < 8 { value * 255 / max } else { value };
            out.push(v.min(255) as u8);
        }
    }
    Ok(out)
}

/// Raw pixelデータからDynamicImageを構築
///
/// 画像マスクは「描画する画素 = 255」のアルファとして返す。
fn decode_raw(data: &[u8], meta: &ImageMeta) -> crate::error::Result<DynamicImage> {
    let (w, h) = (meta.width, meta.height);
    let (wu, hu) = (w as usize, h as usize);

    if meta.image_mask {
        let bits = unpack_samples(data, wu, hu, 1, 1, false)?;
        // 既定の /Decode [0 1] ではサンプル 0 が描画対象
        let alpha: Vec<u8> = bits
            .iter()
            .map(|&b| if (b == 0) != meta.inverted_decode { 255 } else { 0 })
            .collect();
        let img = GrayImage::from_raw(w, h, alpha)
            .ok_or_else(|| PdfForgeError::corrupt("Failed to create mask from raw data"))?;
        return Ok(DynamicImage::ImageLuma8(img));
    }

    match &meta.color_space {
        ColorSpace::Gray | ColorSpace::Unknown(_) => {
            let samples = unpack_samples(data, wu, hu, 1, meta.bits_per_component, true)?;
            let img = GrayImage::from_raw(w, h, samples)
                .ok_or_else(|| PdfForgeError::corrupt("Failed to create Gray image from raw data"))?;
            Ok(DynamicImage::ImageLuma8(img))
        }
        ColorSpace::Rgb => {
            let samples = unpack_samples(data, wu, hu, 3, meta.bits_per_component, true)?;
            let img = RgbImage::from_raw(w, h, samples)
                .ok_or_else(|| PdfForgeError::corrupt("Failed to create RGB image from raw data"))?;
            Ok(DynamicImage::ImageRgb8(img))
        }
        ColorSpace::Cmyk => {
            let samples = unpack_samples(data, wu, hu, 4, meta.bits_per_component, true)?;
            let rgb: Vec<u8> = samples
                .chunks_exact(4)
                .flat_map(|p| cmyk_to_rgb(p[0], p[1], p[2], p[3]))
                .collect();
            let img = RgbImage::from_raw(w, h, rgb)
                .ok_or_else(|| PdfForgeError::corrupt("Failed to create RGB image from CMYK data"))?;
            Ok(DynamicImage::ImageRgb8(img))
        }
        ColorSpace::Indexed { base, palette } => {
            let indices = unpack_samples(data, wu, hu, 1, meta.bits_per_component, false)?;
            let base_components = base.components();
            let rgb: Vec<u8> = indices
                .iter()
                .flat_map(|&i| {
                    let start = usize::from(i) * base_components;
                    let entry = palette.get(start..start + base_components).unwrap_or(&[]);
                    match (base.as_ref(), entry) {
                        (ColorSpace::Rgb, [r, g, b]) => [*r, *g, *b],
                        (ColorSpace::Cmyk, [c, m, y, k]) => cmyk_to_rgb(*c, *m, *y, *k),
                        (_, [v, ..]) => [*v, *v, *v],
                        _ => [0, 0, 0],
                    }
                })
                .collect();
            let img = RgbImage::from_raw(w, h, rgb)
                .ok_or_else(|| PdfForgeError::corrupt("Failed to create RGB image from palette"))?;
            Ok(DynamicImage::ImageRgb8(img))
        }
    }
}

pub fn cmyk_to_rgb(c: u8, m: u8, y: u8, k: u8) -> [u8; 3] {
    let conv = |v: u8| 255 - (u16::from(v) + u16::from(k)).min(255) as u8;
    [conv(c), conv(m), conv(y)]
}

/// グレースケール画像をJPEGにエンコードする。
pub fn encode_gray_to_jpeg(gray: &GrayImage, quality: u8) -> crate::error::Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
    gray.write_with_encoder(encoder)?;
    Ok(buf.into_inner())
}

/// RGB画像をJPEGにエンコードする。
pub fn encode_rgb_to_jpeg(rgb: &RgbImage, quality: u8) -> crate::error::Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
    rgb.write_with_encoder(encoder)?;
    Ok(buf.into_inner())
}

/// すべての画素が無彩色か
fn is_effectively_gray(rgb: &RgbImage) -> bool {
    rgb.pixels().all(|p| p.0[0] == p.0[1] && p.0[1] == p.0[2])
}

/// 画像XObjectをJPEGで再エンコードし、元より厳密に小さい最小の結果を返す。
///
/// # Arguments
/// * `decoded` - デコード済み画像
/// * `original_size` - 元のストリームサイズ（比較用）
/// * `quality` - JPEG品質 (1-100)
///
/// # Returns
/// * `None` - 元のサイズより小さくならない
/// * `Some(OptimizedImage)` - 最適圧縮済みデータ
pub fn optimize_image_encoding(
    decoded: &DynamicImage,
    original_size: usize,
    quality: u8,
) -> crate::error::Result<Option<OptimizedImage>> {
    if !(1..=100).contains(&quality) {
        return Err(PdfForgeError::config(format!(
            "JPEG quality must be 1-100, got {}",
            quality
        )));
    }

    let mut candidates: Vec<OptimizedImage> = Vec::new();
    let is_color = decoded.color().has_color();

    if is_color {
        let rgb = decoded.to_rgb8();
        // 候補A: RGB JPEG
        candidates.push(OptimizedImage {
            data: encode_rgb_to_jpeg(&rgb, quality)?,
            filter: "DCTDecode",
            color_space: "DeviceRGB",
            bits_per_component: 8,
        });
        // 候補B: 実質グレーならグレースケールJPEG
        if is_effectively_gray(&rgb) {
            candidates.push(OptimizedImage {
                data: encode_gray_to_jpeg(&decoded.to_luma8(), quality)?,
                filter: "DCTDecode",
                color_space: "DeviceGray",
                bits_per_component: 8,
            });
        }
    } else {
        candidates.push(OptimizedImage {
            data: encode_gray_to_jpeg(&decoded.to_luma8(), quality)?,
            filter: "DCTDecode",
            color_space: "DeviceGray",
            bits_per_component: 8,
        });
    }

    // 最小サイズの候補を選択（元のサイズ未満のもの）
    candidates.sort_by_key(|c| c.data.len());

    Ok(candidates
        .into_iter()
        .find(|c| c.data.len() < original_size))
}
