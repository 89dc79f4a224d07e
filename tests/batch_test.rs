// バッチ実行の統合テスト

mod common;

use std::io::{Cursor, Read};

use pdf_forge::crypt::{Algorithm, Permissions, ProtectOptions};
use pdf_forge::error::PdfForgeError;
use pdf_forge::ops::compress::CompressOptions;
use pdf_forge::ops::embed::EmbedOptions;
use pdf_forge::ops::split::SplitMode;
use pdf_forge::ops::watermark::WatermarkOptions;
use pdf_forge::pdf::reader;
use pdf_forge::pipeline::batch::{BatchOptions, BatchOutput, InputFile, Operation, run_batch, run_batch_with};
use pdf_forge::render::{RasterFormat, RasterizeOptions};

fn pdf(name: &str, pages: usize) -> InputFile {
    InputFile::new(name, common::text_pdf(pages))
}

fn archive_entries(output: &BatchOutput) -> Vec<(String, Vec<u8>)> {
    let BatchOutput::Archive { bytes, .. } = output else {
        panic!("expected archive, got single output {}", output.name());
    };
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes.clone())).unwrap();
    (0..archive.len())
        .map(|i| {
            let mut file = archive.by_index(i).unwrap();
            let mut data = Vec::new();
            file.read_to_end(&mut data).unwrap();
            (file.name().to_string(), data)
        })
        .collect()
}

// ============================================================
// 1. fail-fast
// ============================================================

#[test]
fn test_corrupt_second_file_fails_whole_batch() {
    let inputs = vec![
        pdf("first.pdf", 2),
        InputFile::new("second.pdf", b"%PDF-1.4 garbage without objects".to_vec()),
        pdf("third.pdf", 1),
    ];
    let result = run_batch(&Operation::Compress(CompressOptions::default()), &inputs);
    let err = result.expect_err("batch should fail");
    assert!(matches!(err, PdfForgeError::CorruptDocumentError(_)));
    assert!(err.to_string().contains("second.pdf"), "got: {err}");
}

#[test]
fn test_empty_batch_is_config_error() {
    assert!(matches!(
        run_batch(&Operation::Merge, &[]),
        Err(PdfForgeError::ConfigError(_))
    ));
}

// ============================================================
// 2. アーカイブ
// ============================================================

#[test]
fn test_archive_entries_follow_input_order() {
    let inputs = vec![pdf("zeta.pdf", 2), pdf("alpha.pdf", 1), pdf("mid.pdf", 1)];
    let out = run_batch_with(
        &Operation::Split(SplitMode::Singles),
        &inputs,
        &BatchOptions { parallel_workers: 3 },
    )
    .unwrap();
    assert_eq!(out.content_type(), "application/zip");

    let names: Vec<String> = archive_entries(&out).into_iter().map(|(n, _)| n).collect();
    assert_eq!(
        names,
        vec!["zeta_part1.pdf", "zeta_part2.pdf", "alpha_part1.pdf", "mid_part1.pdf"]
    );
}

#[test]
fn test_duplicate_names_are_disambiguated() {
    let inputs = vec![pdf("dir1/report.pdf", 1), pdf("dir2/report.pdf", 1)];
    let out = run_batch(
        &Operation::Watermark(WatermarkOptions {
            text: "DRAFT".into(),
            ..Default::default()
        }),
        &inputs,
    )
    .unwrap();
    let names: Vec<String> = archive_entries(&out).into_iter().map(|(n, _)| n).collect();
    assert_eq!(names, vec!["report_watermarked.pdf", "report_watermarked_2.pdf"]);
}

#[test]
fn test_rasterize_entries_are_images() {
    let out = run_batch(
        &Operation::PdfToImage(RasterizeOptions {
            format: RasterFormat::Png,
            dpi: 36,
            ..Default::default()
        }),
        &[pdf("doc.pdf", 2)],
    )
    .unwrap();
    let entries = archive_entries(&out);
    assert_eq!(entries[0].0, "doc_page1.png");
    assert_eq!(entries[1].0, "doc_page2.png");
    assert!(entries.iter().all(|(_, data)| data.starts_with(b"\x89PNG")));
}

// ============================================================
// 3. 単一出力
// ============================================================

#[test]
fn test_merge_consumes_all_inputs() {
    let mut second = pdf("b.pdf", 3);
    second.pages = Some(vec![3]);
    let out = run_batch(&Operation::Merge, &[pdf("a.pdf", 2), second]).unwrap();
    assert_eq!(out.name(), "merged.pdf");
    let doc = reader::load(out.bytes()).unwrap();
    assert_eq!(doc.page_count(), 3);
}

#[test]
fn test_protect_then_open_encrypted_input() {
    let options = ProtectOptions {
        user_password: "secret".into(),
        owner_password: String::new(),
        permissions: Permissions::from_names(&["print"]).unwrap(),
        algorithm: Algorithm::Aes256,
    };
    let out = run_batch(&Operation::Protect(options), &[pdf("a.pdf", 1)]).unwrap();
    assert_eq!(out.name(), "a_protected.pdf");

    // 暗号化された入力はパスワード付きで処理できる
    let mut encrypted = InputFile::new("locked.pdf", out.bytes().to_vec());
    assert!(matches!(
        run_batch(&Operation::Split(SplitMode::Singles), std::slice::from_ref(&encrypted)),
        Err(PdfForgeError::PasswordError(_))
    ));
    encrypted.password = Some("secret".into());
    let out = run_batch(&Operation::Compress(CompressOptions::default()), &[encrypted]).unwrap();
    assert_eq!(reader::load(out.bytes()).unwrap().page_count(), 1);
}

#[test]
fn test_images_to_pdf_in_batch() {
    let raster = run_batch(
        &Operation::PdfToImage(RasterizeOptions {
            dpi: 36,
            ..Default::default()
        }),
        &[pdf("one.pdf", 1)],
    )
    .unwrap();
    let BatchOutput::Single { bytes, content_type, .. } = raster else {
        panic!("one page should give one image");
    };
    assert_eq!(content_type, "image/png");

    let inputs = vec![
        InputFile::new("a.png", bytes.clone()),
        InputFile::new("b.png", bytes),
    ];
    let out = run_batch(&Operation::ImagesToPdf(EmbedOptions::default()), &inputs).unwrap();
    assert_eq!(out.name(), "images.pdf");
    assert_eq!(reader::load(out.bytes()).unwrap().page_count(), 2);
}
