// ラスタライズと画像→PDF の統合テスト

mod common;

use image::GenericImageView;
use pdf_forge::error::PdfForgeError;
use pdf_forge::ops::embed::{EmbedImage, EmbedOptions, Orientation, PageSize, images_to_pdf};
use pdf_forge::pdf::reader;
use pdf_forge::render::{ColorMode, RasterFormat, RasterizeOptions, rasterize};

fn raster_options(dpi: u32) -> RasterizeOptions {
    RasterizeOptions {
        dpi,
        ..Default::default()
    }
}

// ============================================================
// 1. 画素寸法
// ============================================================

#[test]
fn test_pixel_dimensions_follow_dpi() {
    let doc = reader::load(&common::text_pdf(1)).unwrap();
    let at_72 = rasterize(&doc, &raster_options(72)).unwrap();
    assert_eq!(at_72[0].image.dimensions(), (612, 792));

    let at_150 = rasterize(&doc, &raster_options(150)).unwrap();
    assert_eq!(at_150[0].image.dimensions(), (1275, 1650));
}

#[test]
fn test_one_image_per_selected_page_in_order() {
    let doc = reader::load(&common::text_pdf(4)).unwrap();
    let mut opts = raster_options(36);
    opts.pages = Some(vec![4, 2]);
    let images = rasterize(&doc, &opts).unwrap();
    assert_eq!(
        images.iter().map(|i| i.page_index).collect::<Vec<_>>(),
        vec![3, 1]
    );
}

// ============================================================
// 2. 描画内容
// ============================================================

#[test]
fn test_filled_rectangle_is_drawn() {
    let doc = reader::load(&common::text_pdf(1)).unwrap();
    let images = rasterize(&doc, &raster_options(72)).unwrap();
    let rgb = images[0].image.to_rgb8();
    // 矩形 (100,100)-(300,250) の中心はデバイス座標 (200, 792-175)
    assert_eq!(rgb.get_pixel(200, 617).0, [0, 0, 255]);
    // 矩形の外は白
    assert_eq!(rgb.get_pixel(50, 50).0, [255, 255, 255]);
}

#[test]
fn test_text_is_drawn() {
    if pdf_forge::render::font::system_font("Helvetica").is_none() {
        eprintln!("skipping text rendering test: no system font for Helvetica");
        return;
    }
    let doc = reader::load(&common::text_pdf(1)).unwrap();
    let rgb = rasterize(&doc, &raster_options(72)).unwrap().remove(0).image.to_rgb8();

    // "Page 1" は (72, 720) から 24pt。デバイス座標ではベースライン y = 72
    let dark = (72..160)
        .flat_map(|x| (45..80).map(move |y| (x, y)))
        .filter(|&(x, y)| rgb.get_pixel(x, y).0.iter().all(|&c| c < 128))
        .count();
    assert!(dark > 50, "expected glyph pixels in the text band, found {dark}");

    // 文字の左側は白いまま
    assert!((0..60).all(|x| rgb.get_pixel(x, 60).0 == [255, 255, 255]));
}

#[test]
fn test_invisible_text_render_mode_draws_nothing() {
    let mut doc = reader::load(&common::text_pdf(1)).unwrap();
    let page = doc.page(0).unwrap();
    let content_id = doc.page_content_ids(page.id)[0];
    if let Some(lopdf::Object::Stream(stream)) = doc.objects.get_mut(&content_id) {
        stream.set_plain_content(b"BT 3 Tr /F1 24 Tf 72 720 Td (Page 1) Tj ET".to_vec());
    }
    let rgb = rasterize(&doc, &raster_options(72)).unwrap().remove(0).image.to_rgb8();
    assert!(rgb.pixels().all(|p| p.0 == [255, 255, 255]));
}

#[test]
fn test_oversized_page_fails_instead_of_allocating() {
    let mut doc = reader::load(&common::text_pdf(1)).unwrap();
    let page_id = doc.pages[0];
    if let Some(lopdf::Object::Dictionary(page)) = doc.objects.get_mut(&page_id) {
        let huge = lopdf::Object::Integer(10_000_000);
        page.set("MediaBox", vec![0.into(), 0.into(), huge.clone(), huge]);
    }
    assert!(matches!(
        rasterize(&doc, &raster_options(36)),
        Err(PdfForgeError::EncodingError(_))
    ));
}

#[test]
fn test_object_stream_document_renders() {
    let doc = reader::load(&common::object_stream_pdf()).unwrap();
    let images = rasterize(&doc, &raster_options(72)).unwrap();
    let rgb = images[0].image.to_rgb8();
    assert_eq!(rgb.dimensions(), (200, 100));
    assert_eq!(rgb.get_pixel(50, 50).0, [0, 255, 0]);
    assert_eq!(rgb.get_pixel(150, 50).0, [255, 255, 255]);
}

#[test]
fn test_color_modes() {
    let doc = reader::load(&common::text_pdf(1)).unwrap();
    let mut opts = raster_options(72);

    opts.color_mode = ColorMode::Grayscale;
    let gray = rasterize(&doc, &opts).unwrap().remove(0);
    assert_eq!(gray.image.color(), image::ColorType::L8);
    // 0.114 * 255 = 29.07
    assert_eq!(gray.image.to_luma8().get_pixel(200, 617).0, [29]);

    opts.color_mode = ColorMode::Bw;
    let bw = rasterize(&doc, &opts).unwrap().remove(0);
    let luma = bw.image.to_luma8();
    assert!(luma.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
}

// ============================================================
// 3. 出力形式
// ============================================================

#[test]
fn test_encoded_formats() {
    let doc = reader::load(&common::text_pdf(1)).unwrap();
    for (format, magic) in [
        (RasterFormat::Png, &b"\x89PNG"[..]),
        (RasterFormat::Jpeg, &b"\xFF\xD8"[..]),
        (RasterFormat::Bmp, &b"BM"[..]),
    ] {
        let mut opts = raster_options(36);
        opts.format = format;
        let images = rasterize(&doc, &opts).unwrap();
        assert!(images[0].bytes.starts_with(magic), "{format:?}");
    }
}

#[test]
fn test_unsupported_format_and_dpi() {
    assert!(matches!(
        RasterFormat::from_name("gif"),
        Err(PdfForgeError::UnsupportedFormatError(_))
    ));
    let doc = reader::load(&common::text_pdf(1)).unwrap();
    assert!(matches!(
        rasterize(&doc, &raster_options(10)),
        Err(PdfForgeError::ConfigError(_))
    ));
}

// ============================================================
// 4. ラスタライズ → 画像→PDF の往復
// ============================================================

#[test]
fn test_rasterize_then_embed_reproduces_pixel_size() {
    let doc = reader::load(&common::text_pdf(2)).unwrap();
    let images = rasterize(&doc, &raster_options(72)).unwrap();

    let inputs: Vec<EmbedImage> = images
        .iter()
        .map(|img| EmbedImage {
            name: format!("page{}.png", img.page_index + 1),
            bytes: img.bytes.clone(),
        })
        .collect();
    let options = EmbedOptions {
        page_size: PageSize::Fit,
        orientation: Orientation::Auto,
        margin: 0.0,
        fit_to_page: false,
        preserve_aspect_ratio: true,
    };
    let embedded = images_to_pdf(&inputs, &options).unwrap();
    assert_eq!(embedded.page_count(), 2);

    let again = rasterize(&embedded, &raster_options(72)).unwrap();
    for (before, after) in images.iter().zip(&again) {
        assert_eq!(before.image.dimensions(), after.image.dimensions());
    }
    // 青い矩形も同じ位置に残る
    assert_eq!(again[0].image.to_rgb8().get_pixel(200, 617).0, [0, 0, 255]);
}

#[test]
fn test_embed_jpeg_verbatim() {
    let doc = reader::load(&common::text_pdf(1)).unwrap();
    let mut opts = raster_options(36);
    opts.format = RasterFormat::Jpeg;
    let jpeg = rasterize(&doc, &opts).unwrap().remove(0).bytes;

    let out = images_to_pdf(
        &[EmbedImage {
            name: "scan.jpg".into(),
            bytes: jpeg.clone(),
        }],
        &EmbedOptions::default(),
    )
    .unwrap();
    let embedded = out.objects.values().any(|obj| match obj {
        lopdf::Object::Stream(s) => s.content == jpeg,
        _ => false,
    });
    assert!(embedded, "JPEG bytes should be embedded unchanged");
}

#[test]
fn test_embed_rejects_unknown_bytes_and_huge_margin() {
    let garbage = EmbedImage {
        name: "noise.bin".into(),
        bytes: vec![1, 2, 3, 4, 5],
    };
    assert!(matches!(
        images_to_pdf(&[garbage], &EmbedOptions::default()),
        Err(PdfForgeError::UnsupportedFormatError(_))
    ));

    let doc = reader::load(&common::text_pdf(1)).unwrap();
    let png = rasterize(&doc, &raster_options(36)).unwrap().remove(0).bytes;
    let options = EmbedOptions {
        margin: 400.0,
        ..Default::default()
    };
    assert!(matches!(
        images_to_pdf(&[EmbedImage { name: "p.png".into(), bytes: png }], &options),
        Err(PdfForgeError::ConfigError(_))
    ));
}
