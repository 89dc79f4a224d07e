//! サイズ削減: 画像の JPEG 再エンコード、メタデータ除去、フォントの再圧縮、GC。
//!
//! どの置き換えも「元より厳密に小さい」ときだけ行うので、
//! 出力の直列化サイズは入力以下になる。

use flate2::Compression;
use lopdf::{Object, ObjectId};
use rayon::prelude::*;
use serde::Deserialize;

use crate::error::PdfForgeError;
use crate::pdf::document::Document;
use crate::pdf::filters::{self, Filter};
use crate::pdf::graph;
use crate::pdf::image_xobject::{self, OptimizedImage};

/// 圧縮プリセット
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressLevel {
    Low,
    Medium,
    High,
    Extreme,
}

impl CompressLevel {
    pub fn options(self) -> CompressOptions {
        let (quality, remove_metadata, compress_fonts) = match self {
            Self::Low => (85, false, false),
            Self::Medium => (65, false, true),
            Self::High => (45, true, true),
            Self::Extreme => (25, true, true),
        };
        CompressOptions {
            quality,
            optimize_images: true,
            remove_metadata,
            compress_fonts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressOptions {
    /// JPEG 品質 (10-100)
    pub quality: u8,
    pub optimize_images: bool,
    pub remove_metadata: bool,
    pub compress_fonts: bool,
}

impl Default for CompressOptions {
    fn default() -> Self {
        CompressLevel::Medium.options()
    }
}

impl CompressOptions {
    pub fn validate(&self) -> crate::error::Result<()> {
        if !(10..=100).contains(&self.quality) {
            return Err(PdfForgeError::config(format!(
                "compression quality must be 10-100, got {}",
                self.quality
            )));
        }
        Ok(())
    }
}

/// 実行結果の集計
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompressStats {
    pub images_reencoded: usize,
    pub fonts_recompressed: usize,
    pub streams_deflated: usize,
    pub objects_removed: usize,
}

/// 圧縮したドキュメントを返す。入力は変更しない。
pub fn compress(doc: &Document, options: &CompressOptions) -> crate::error::Result<Document> {
    compress_with_stats(doc, options).map(|(out, _)| out)
}

pub fn compress_with_stats(
    doc: &Document,
    options: &CompressOptions,
) -> crate::error::Result<(Document, CompressStats)> {
    options.validate()?;
    doc.ensure_plaintext()?;

    let mut out = doc.clone();
    let mut stats = CompressStats::default();

    if options.optimize_images {
        stats.images_reencoded = reencode_images(&mut out, options.quality);
    }
    if options.remove_metadata {
        strip_metadata(&mut out);
    }
    if options.compress_fonts {
        stats.fonts_recompressed = recompress_fonts(&mut out);
    }
    stats.streams_deflated = deflate_unfiltered_streams(&mut out);
    stats.objects_removed = graph::collect_garbage(&mut out);

    tracing::info!(
        quality = options.quality,
        images = stats.images_reencoded,
        fonts = stats.fonts_recompressed,
        streams = stats.streams_deflated,
        removed = stats.objects_removed,
        "document compressed"
    );
    Ok((out, stats))
}

/// 再エンコード対象の画像を並列に JPEG 化し、小さくなったものだけ差し替える。
fn reencode_images(doc: &mut Document, quality: u8) -> usize {
    let targets: Vec<ObjectId> = doc
        .objects
        .iter()
        .filter_map(|(id, obj)| match obj {
            Object::Stream(s) if image_xobject::is_image_xobject(s) => Some(*id),
            _ => None,
        })
        .collect();

    let snapshot: &Document = doc;
    let results: Vec<(ObjectId, OptimizedImage)> = targets
        .par_iter()
        .filter_map(|&id| {
            let Some(Object::Stream(stream)) = snapshot.objects.get(&id) else {
                return None;
            };
            let meta = image_xobject::read_image_meta(snapshot, stream).ok()?;
            if !image_xobject::is_reencodable(&meta) {
                tracing::debug!(id = id.0, "image layout not re-encodable, kept");
                return None;
            }
            let decoded = match image_xobject::decode_image_with_meta(stream, &meta) {
                Ok(img) => img,
                Err(e) => {
                    tracing::warn!(id = id.0, "image decode failed, kept: {e}");
                    return None;
                }
            };
            if decoded.width() != meta.width || decoded.height() != meta.height {
                return None;
            }
            match image_xobject::optimize_image_encoding(&decoded, stream.content.len(), quality) {
                Ok(Some(optimized)) => Some((id, optimized)),
                Ok(None) => None,
                Err(e) => {
                    tracing::warn!(id = id.0, "image re-encode failed, kept: {e}");
                    None
                }
            }
        })
        .collect();

    let count = results.len();
    for (id, optimized) in results {
        if let Some(Object::Stream(stream)) = doc.objects.get_mut(&id) {
            stream.dict.set("Filter", Object::Name(optimized.filter.as_bytes().to_vec()));
            stream.dict.remove(b"DecodeParms");
            stream
                .dict
                .set("ColorSpace", Object::Name(optimized.color_space.as_bytes().to_vec()));
            stream.dict.set(
                "BitsPerComponent",
                Object::Integer(i64::from(optimized.bits_per_component)),
            );
            stream.set_content(optimized.data);
        }
    }
    count
}

/// Info、XMP メタデータ、ページの /Metadata と /PieceInfo を取り除く。
fn strip_metadata(doc: &mut Document) {
    doc.trailer.remove(b"Info");
    if let Ok(root) = doc.catalog_id()
        && let Some(Object::Dictionary(catalog)) = doc.objects.get_mut(&root)
    {
        catalog.remove(b"Metadata");
        catalog.remove(b"PieceInfo");
    }
    for page_id in doc.pages.clone() {
        if let Some(Object::Dictionary(page)) = doc.objects.get_mut(&page_id) {
            page.remove(b"Metadata");
            page.remove(b"PieceInfo");
        }
    }
}

/// FontDescriptor が指すフォントプログラムを最大レベルで deflate し直す。
fn recompress_fonts(doc: &mut Document) -> usize {
    let mut font_files: Vec<ObjectId> = doc
        .objects
        .values()
        .filter_map(|obj| match obj {
            Object::Dictionary(dict) => Some(dict),
            _ => None,
        })
        .filter(|dict| matches!(dict.get(b"Type"), Ok(Object::Name(n)) if n == b"FontDescriptor"))
        .flat_map(|dict| {
            [&b"FontFile"[..], &b"FontFile2"[..], &b"FontFile3"[..]]
                .into_iter()
                .filter_map(move |key| dict.get(key).ok()?.as_reference().ok())
        })
        .collect();
    font_files.sort();
    font_files.dedup();

    let mut count = 0;
    for id in font_files {
        let Some(Object::Stream(stream)) = doc.objects.get_mut(&id) else {
            continue;
        };
        let Ok(decoded) = filters::decode_generic(stream) else {
            continue;
        };
        if !decoded.remaining.is_empty() {
            continue;
        }
        let Ok(compressed) = filters::flate_encode(&decoded.data, Compression::best()) else {
            continue;
        };
        if compressed.len() < stream.content.len() {
            filters::set_flate_content(stream, compressed);
            count += 1;
        }
    }
    count
}

/// フィルタなしのストリームを deflate する（小さくなる場合のみ）。
fn deflate_unfiltered_streams(doc: &mut Document) -> usize {
    let mut count = 0;
    for stream in doc.objects.values_mut().filter_map(|obj| match obj {
        Object::Stream(s) => Some(s),
        _ => None,
    }) {
        let unfiltered = filters::filter_chain(&stream.dict).is_ok_and(|chain| chain.is_empty());
        if !unfiltered || stream.content.is_empty() {
            continue;
        }
        let Ok(compressed) = filters::flate_encode(&stream.content, Compression::best()) else {
            continue;
        };
        // "/Filter /FlateDecode" の分も見込む
        if compressed.len() + 20 < stream.content.len() {
            filters::set_flate_content(stream, compressed);
            count += 1;
        }
    }
    count
}

/// ストリームが JPEG で符号化されているか。
pub fn is_dct_stream(stream: &lopdf::Stream) -> bool {
    filters::filter_chain(&stream.dict)
        .is_ok_and(|chain| chain.iter().any(|(f, _)| *f == Filter::Dct))
}
