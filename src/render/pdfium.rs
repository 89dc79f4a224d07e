// pdfium-render による描画（`pdfium` フィーチャ）
//
// ライブラリは PDFIUM_DYNAMIC_LIB_PATH から読み込む。未設定なら組み込みの
// レンダラに任せる。

use std::path::PathBuf;

use pdfium_render::prelude::*;

use crate::error::PdfForgeError;
use crate::pdf::document::Document;
use crate::render::{RasterImage, RasterizeOptions, apply_color_mode, encode_image, page_pixel_dimensions};

fn library_path() -> crate::error::Result<Option<PathBuf>> {
    let Ok(path) = std::env::var("PDFIUM_DYNAMIC_LIB_PATH") else {
        return Ok(None);
    };
    let p = PathBuf::from(&path);
    if !p.exists() {
        return Err(PdfForgeError::config(format!(
            "PDFIUM_DYNAMIC_LIB_PATH is set to '{path}' but the path does not exist"
        )));
    }
    Ok(Some(p))
}

fn bind(path: &std::path::Path) -> crate::error::Result<Pdfium> {
    let path = path
        .to_str()
        .ok_or_else(|| PdfForgeError::config("pdfium library path contains non-UTF-8 characters"))?;
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(path))
        .map_err(|e| PdfForgeError::encoding(format!("pdfium: {e}")))?;
    Ok(Pdfium::new(bindings))
}

/// pdfium が使えるなら選択ページを描く。使えなければ None。
///
/// pdfium のハンドルはスレッド間で共有しないので、ページは順に描く。
pub fn rasterize(
    doc: &Document,
    indices: &[usize],
    options: &RasterizeOptions,
) -> crate::error::Result<Option<Vec<RasterImage>>> {
    let Some(path) = library_path()? else {
        return Ok(None);
    };
    let pdfium = bind(&path)?;
    let bytes = doc.to_bytes()?;
    let document = pdfium
        .load_pdf_from_byte_slice(&bytes, None)
        .map_err(|e| PdfForgeError::encoding(format!("pdfium: {e}")))?;

    let mut images = Vec::with_capacity(indices.len());
    for &index in indices {
        let (width, height) = page_pixel_dimensions(&doc.page(index)?, options.dpi)?;
        let page_index =
            u16::try_from(index).map_err(|_| PdfForgeError::page_range("page index exceeds pdfium's range"))?;
        let page = document
            .pages()
            .get(page_index)
            .map_err(|e| PdfForgeError::encoding(format!("pdfium: {e}")))?;

        let config = PdfRenderConfig::new()
            .set_target_width(width as i32)
            .set_target_height(height as i32);
        let bitmap = page
            .render_with_config(&config)
            .map_err(|e| PdfForgeError::encoding(format!("pdfium: {e}")))?;

        let image = apply_color_mode(bitmap.as_image().to_rgb8(), options.color_mode);
        let bytes = encode_image(&image, options.format, options.quality)?;
        images.push(RasterImage {
            page_index: index,
            image,
            color_mode: options.color_mode,
            dpi: options.dpi,
            format: options.format,
            bytes,
        });
    }

    tracing::info!(pages = images.len(), dpi = options.dpi, "document rasterized with pdfium");
    Ok(Some(images))
}
