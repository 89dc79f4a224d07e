// 圧縮の統合テスト

mod common;

use pdf_forge::error::PdfForgeError;
use pdf_forge::ops::compress::{CompressLevel, CompressOptions, compress, compress_with_stats};
use pdf_forge::pdf::reader;
use pdf_forge::pipeline::batch::{InputFile, Operation, run_batch};

fn options(quality: u8) -> CompressOptions {
    CompressOptions {
        quality,
        ..CompressLevel::Medium.options()
    }
}

fn compressed_size(bytes: &[u8], quality: u8) -> usize {
    let out = run_batch(
        &Operation::Compress(options(quality)),
        &[InputFile::new("photo.pdf", bytes.to_vec())],
    )
    .unwrap();
    out.bytes().len()
}

// ============================================================
// 1. 品質とサイズ
// ============================================================

#[test]
fn test_higher_quality_is_never_smaller() {
    let input = common::image_pdf(128);
    let sizes: Vec<usize> = [90, 60, 30, 10]
        .iter()
        .map(|&q| compressed_size(&input, q))
        .collect();
    for pair in sizes.windows(2) {
        assert!(pair[0] >= pair[1], "sizes should not grow as quality drops: {sizes:?}");
    }
}

#[test]
fn test_output_not_larger_than_input() {
    for input in [common::image_pdf(96), common::text_pdf(3)] {
        for q in [100, 50, 10] {
            assert!(compressed_size(&input, q) <= input.len());
        }
    }
}

#[test]
fn test_low_quality_reencodes_image_as_jpeg() {
    let doc = reader::load(&common::image_pdf(128)).unwrap();
    let (out, stats) = compress_with_stats(&doc, &options(20)).unwrap();
    assert_eq!(stats.images_reencoded, 1);
    let has_dct = out.objects.values().any(|obj| match obj {
        lopdf::Object::Stream(s) => pdf_forge::ops::compress::is_dct_stream(s),
        _ => false,
    });
    assert!(has_dct, "image should now be DCT-encoded");
    assert!(out.dangling_references().is_empty());
}

// ============================================================
// 2. メタデータとガベージコレクション
// ============================================================

#[test]
fn test_high_preset_strips_metadata() {
    let doc = reader::load(&common::text_pdf(2)).unwrap();
    let out = compress(&doc, &CompressLevel::High.options()).unwrap();
    assert!(out.metadata().title.is_none());
    assert!(out.trailer.get(b"Info").is_err());

    // low はメタデータを残す
    let kept = compress(&doc, &CompressLevel::Low.options()).unwrap();
    assert_eq!(kept.metadata().title.as_deref(), Some("Fixture"));
}

#[test]
fn test_object_stream_input_still_loses_metadata() {
    let input = common::compact_text_pdf(30, "Secret Title");
    let out = run_batch(
        &Operation::Compress(CompressLevel::Extreme.options()),
        &[InputFile::new("compact.pdf", input.clone())],
    )
    .unwrap();

    // 入力より大きくなっても元のバイト列は返さない
    assert_ne!(out.bytes(), input.as_slice());
    let doc = reader::load(out.bytes()).unwrap();
    assert_eq!(doc.page_count(), 30);
    assert!(doc.metadata().title.is_none());
    assert!(doc.trailer.get(b"Info").is_err());
}

#[test]
fn test_unreachable_objects_are_collected() {
    let mut doc = reader::load(&common::text_pdf(1)).unwrap();
    let orphan = doc.add_object(lopdf::Stream::new(lopdf::Dictionary::new(), vec![b'x'; 4096]));
    let out = compress(&doc, &CompressOptions::default()).unwrap();
    assert!(!out.objects.contains_key(&orphan));
    assert_eq!(out.page_count(), 1);
}

#[test]
fn test_quality_out_of_range() {
    let doc = reader::load(&common::text_pdf(1)).unwrap();
    for q in [0, 9, 101] {
        assert!(matches!(
            compress(&doc, &options(q)),
            Err(PdfForgeError::ConfigError(_))
        ));
    }
}
