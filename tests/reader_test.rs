// ローダーの統合テスト: xref 表 / xref ストリーム / 復旧モード

mod common;

use pdf_forge::crypt::{Algorithm, Permissions, ProtectOptions, encrypt};
use pdf_forge::error::PdfForgeError;
use pdf_forge::pdf::reader;

// ============================================================
// 1. 通常の xref 表
// ============================================================

#[test]
fn test_load_classic_xref() {
    let doc = reader::load(&common::text_pdf(3)).expect("should load");
    assert_eq!(doc.page_count(), 3);
    assert_eq!(doc.version, "1.5");
}

#[test]
fn test_inherited_media_box_is_materialized() {
    // MediaBox は /Pages にしかないが、各ページから見えること
    let doc = reader::load(&common::text_pdf(2)).unwrap();
    let page = doc.page(1).unwrap();
    assert_eq!(page.media_box.width(), 612.0);
    assert_eq!(page.media_box.height(), 792.0);
}

#[test]
fn test_metadata_is_read() {
    let doc = reader::load(&common::text_pdf(1)).unwrap();
    let meta = doc.metadata();
    assert_eq!(meta.title.as_deref(), Some("Fixture"));
    assert_eq!(meta.author.as_deref(), Some("pdf_forge tests"));
}

#[test]
fn test_page_content_is_decoded() {
    let doc = reader::load(&common::text_pdf(2)).unwrap();
    let page = doc.page(1).unwrap();
    let content = doc.page_content(page.id).unwrap();
    let text = String::from_utf8_lossy(&content);
    assert!(text.contains("(Page 2)"), "content: {text}");
}

// ============================================================
// 2. xref ストリームと object stream
// ============================================================

#[test]
fn test_load_object_streams() {
    let doc = reader::load(&common::object_stream_pdf()).expect("should load xref stream");
    assert_eq!(doc.page_count(), 1);
    let page = doc.page(0).unwrap();
    assert_eq!(page.media_box.width(), 200.0);
    assert_eq!(page.media_box.height(), 100.0);
    assert!(doc.dangling_references().is_empty());
}

// ============================================================
// 3. 復旧モード
// ============================================================

#[test]
fn test_recovers_from_broken_startxref() {
    let broken = common::break_startxref(&common::text_pdf(4));
    let doc = reader::load(&broken).expect("recovery scan should find objects");
    assert_eq!(doc.page_count(), 4);
}

#[test]
fn test_recovers_encrypted_file_with_broken_startxref() {
    let source = reader::load(&common::text_pdf(2)).unwrap();
    let options = ProtectOptions {
        user_password: "secret".to_string(),
        owner_password: String::new(),
        permissions: Permissions::ALL,
        algorithm: Algorithm::Rc4_128,
    };
    let bytes = encrypt(&source, &options).unwrap().to_bytes().unwrap();
    let broken = common::break_startxref(&bytes);

    let doc = reader::load_with_password(&broken, "secret").expect("recovered objects should decrypt");
    assert_eq!(doc.page_count(), 2);
    assert!(doc.security.is_some());
    let page = doc.page(0).unwrap();
    let text = String::from_utf8_lossy(&doc.page_content(page.id).unwrap()).into_owned();
    assert!(text.contains("(Page 1)"), "content: {text}");

    assert!(matches!(
        reader::load_with_password(&broken, "wrong"),
        Err(PdfForgeError::PasswordError(_))
    ));
}

#[test]
fn test_not_a_pdf_is_corrupt() {
    let result = reader::load(b"hello world, definitely not a document");
    assert!(
        matches!(result, Err(PdfForgeError::CorruptDocumentError(_))),
        "got: {result:?}"
    );
}

#[test]
fn test_truncated_file_is_corrupt() {
    let bytes = common::text_pdf(1);
    let result = reader::load(&bytes[..20]);
    assert!(result.is_err(), "truncated file should not load");
}

// ============================================================
// 4. 再直列化
// ============================================================

#[test]
fn test_roundtrip_keeps_pages() {
    let doc = reader::load(&common::object_stream_pdf()).unwrap();
    let bytes = doc.to_bytes().unwrap();
    let again = reader::load(&bytes).unwrap();
    assert_eq!(again.page_count(), 1);
    assert!(again.dangling_references().is_empty());
}

#[test]
fn test_load_file_reads_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("doc.pdf");
    std::fs::write(&path, common::text_pdf(2)).unwrap();
    let doc = reader::load_file(&path, None).unwrap();
    assert_eq!(doc.page_count(), 2);

    let missing = reader::load_file(dir.path().join("missing.pdf"), None);
    assert!(matches!(missing, Err(PdfForgeError::IoError(_))));
}
