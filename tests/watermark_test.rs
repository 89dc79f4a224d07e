// 透かしの統合テスト

mod common;

use lopdf::Object;
use pdf_forge::error::PdfForgeError;
use pdf_forge::ops::watermark::{WatermarkOptions, watermark};
use pdf_forge::pdf::content_stream::{decode_operations, operand_to_f64};
use pdf_forge::pdf::document::Document;
use pdf_forge::pdf::reader;

fn options(text: &str) -> WatermarkOptions {
    WatermarkOptions {
        text: text.to_string(),
        ..Default::default()
    }
}

fn stream_bytes(doc: &Document, id: lopdf::ObjectId) -> Vec<u8> {
    match doc.get(id) {
        Some(Object::Stream(s)) => s.content.clone(),
        other => panic!("expected stream, got {other:?}"),
    }
}

// ============================================================
// 1. 元のコンテンツは変更しない
// ============================================================

#[test]
fn test_original_content_bytes_untouched() {
    let doc = reader::load(&common::text_pdf(2)).unwrap();
    let page = doc.page(0).unwrap();
    let original_ids = doc.page_content_ids(page.id);
    let original: Vec<Vec<u8>> = original_ids.iter().map(|&id| stream_bytes(&doc, id)).collect();

    let out = watermark(&doc, &options("CONFIDENTIAL")).unwrap();
    let new_ids = out.page_content_ids(out.page(0).unwrap().id);

    // [q, 元のストリーム..., Q, 透かし]
    assert_eq!(new_ids.len(), original_ids.len() + 3);
    for (id, bytes) in original_ids.iter().zip(&original) {
        assert!(new_ids.contains(id));
        assert_eq!(&stream_bytes(&out, *id), bytes);
    }
    assert!(out.dangling_references().is_empty());
}

#[test]
fn test_input_document_is_not_modified() {
    let doc = reader::load(&common::text_pdf(1)).unwrap();
    let before = doc.objects.len();
    let _ = watermark(&doc, &options("DRAFT")).unwrap();
    assert_eq!(doc.objects.len(), before);
}

// ============================================================
// 2. リソースと描画内容
// ============================================================

#[test]
fn test_resources_and_stamp() {
    let doc = reader::load(&common::text_pdf(1)).unwrap();
    let mut opts = options("DRAFT");
    opts.opacity = 0.5;
    let out = watermark(&doc, &opts).unwrap();
    let page = out.page(0).unwrap();

    let resources = out.page_resources(page.id);
    let fonts = out.resolve(resources.get(b"Font").unwrap()).as_dict().unwrap();
    // 元のフォントも残る
    assert!(fonts.get(b"F1").is_ok());
    assert!(fonts.len() >= 2);
    let gstates = out.resolve(resources.get(b"ExtGState").unwrap()).as_dict().unwrap();
    assert_eq!(gstates.len(), 1);

    let content = String::from_utf8_lossy(&out.page_content(page.id).unwrap()).into_owned();
    assert!(content.contains("(DRAFT) Tj"), "content: {content}");
    assert!(content.contains(" cm"));
}

/// 透かしストリームの cm オペランド
fn stamp_matrix(doc: &Document, page_index: usize) -> Vec<f64> {
    let page = doc.page(page_index).unwrap();
    let stamp_id = *doc.page_content_ids(page.id).last().unwrap();
    let operations = decode_operations(&stream_bytes(doc, stamp_id)).unwrap();
    let cm = operations.iter().find(|op| op.operator == "cm").expect("cm in stamp");
    cm.operands.iter().map(|o| operand_to_f64(o).unwrap()).collect()
}

#[test]
fn test_rotated_page_keeps_stamp_angle_on_screen() {
    let mut doc = reader::load(&common::text_pdf(2)).unwrap();
    let rotated = doc.pages[1];
    if let Some(Object::Dictionary(page)) = doc.objects.get_mut(&rotated) {
        page.set("Rotate", 90);
    }
    let mut opts = options("ROTATED");
    opts.rotation = 0.0;
    let out = watermark(&doc, &opts).unwrap();

    // 回転なしのページは水平のまま
    let plain = stamp_matrix(&out, 0);
    assert!((plain[0] - 1.0).abs() < 1e-6 && plain[1].abs() < 1e-6);

    // /Rotate 90 のページでは 90 度回して、表示上は水平になる
    let m = stamp_matrix(&out, 1);
    assert!(m[0].abs() < 1e-6, "cm: {m:?}");
    assert!((m[1] - 1.0).abs() < 1e-6, "cm: {m:?}");
    assert!((m[2] + 1.0).abs() < 1e-6, "cm: {m:?}");
    // 中心は MediaBox の中心のまま
    assert_eq!((m[4], m[5]), (306.0, 396.0));
}

#[test]
fn test_page_selection() {
    let doc = reader::load(&common::text_pdf(3)).unwrap();
    let mut opts = options("COPY");
    opts.pages = Some(vec![2]);
    let out = watermark(&doc, &opts).unwrap();

    let stamped = |i: usize| {
        let page = out.page(i).unwrap();
        String::from_utf8_lossy(&out.page_content(page.id).unwrap()).contains("(COPY)")
    };
    assert!(!stamped(0));
    assert!(stamped(1));
    assert!(!stamped(2));
}

// ============================================================
// 3. 検証
// ============================================================

#[test]
fn test_empty_text_is_config_error() {
    let doc = reader::load(&common::text_pdf(1)).unwrap();
    assert!(matches!(
        watermark(&doc, &options("   ")),
        Err(PdfForgeError::ConfigError(_))
    ));
}

#[test]
fn test_out_of_range_page_selection() {
    let doc = reader::load(&common::text_pdf(1)).unwrap();
    let mut opts = options("X");
    opts.pages = Some(vec![5]);
    assert!(matches!(
        watermark(&doc, &opts),
        Err(PdfForgeError::PageRangeError(_))
    ));
}
