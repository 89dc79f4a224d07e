// テスト用 PDF フィクスチャ（lopdf で組み立てる）
#![allow(dead_code)]

use lopdf::{Document, Object, SaveOptions, Stream, dictionary};

/// Helvetica のテキストと青い矩形を描く n ページの PDF。
///
/// MediaBox は /Pages にだけ置く（継承）。矩形は (100, 100)-(300, 250)。
pub fn text_pdf(pages: usize) -> Vec<u8> {
    save(&mut text_document(pages, "Fixture"))
}

/// `text_pdf` と同じ内容を object stream と xref ストリームで書いたもの。
pub fn compact_text_pdf(pages: usize, title: &str) -> Vec<u8> {
    let mut doc = text_document(pages, title);
    let options = SaveOptions::builder()
        .use_object_streams(true)
        .use_xref_streams(true)
        .compression_level(9)
        .build();
    let mut buf = Vec::new();
    doc.save_with_options(&mut buf, options).expect("fixture should serialize");
    buf
}

fn text_document(pages: usize, title: &str) -> Document {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let mut kids: Vec<Object> = Vec::new();
    for i in 0..pages {
        let content = format!(
            "BT /F1 24 Tf 72 720 Td (Page {}) Tj ET\n0 0 1 rg 100 100 200 150 re f\n",
            i + 1
        );
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
        });
        kids.push(page_id.into());
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    let info_id = doc.add_object(dictionary! {
        "Title" => Object::string_literal(title),
        "Author" => Object::string_literal("pdf_forge tests"),
    });
    doc.trailer.set("Info", info_id);
    doc
}

/// 1 ページに size×size の RGB 画像（Flate、写真風のグラデーション）を置いた PDF。
pub fn image_pdf(size: u32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((size * size * 3) as usize);
    let mut seed: u32 = 12345;
    for y in 0..size {
        for x in 0..size {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
            let noise = ((seed >> 16) % 24) as f64;
            let fx = f64::from(x) / f64::from(size);
            let fy = f64::from(y) / f64::from(size);
            let r = 120.0 + 100.0 * (fx * 6.0).sin() + noise;
            let g = 120.0 + 100.0 * (fy * 5.0).cos() + noise;
            let b = 128.0 + 90.0 * ((fx + fy) * 4.0).sin() - noise;
            pixels.extend([r, g, b].map(|v| v.clamp(0.0, 255.0) as u8));
        }
    }

    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    std::io::Write::write_all(&mut encoder, &pixels).unwrap();
    let compressed = encoder.finish().unwrap();

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let image_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => size as i64,
            "Height" => size as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "Filter" => "FlateDecode",
        },
        compressed,
    ));
    let content = format!("q {size} 0 0 {size} 0 0 cm /Im1 Do Q");
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), (size as i64).into(), (size as i64).into()],
        "Contents" => content_id,
        "Resources" => dictionary! { "XObject" => dictionary! { "Im1" => image_id } },
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    save(&mut doc)
}

/// 相互参照ストリームと object stream だけで構成した 1 ページ PDF（200×100）。
///
/// Catalog・Pages・Page は object stream 5 に入れ、コンテンツは通常のオブジェクト 4。
pub fn object_stream_pdf() -> Vec<u8> {
    let obj1 = "<< /Type /Catalog /Pages 2 0 R >>";
    let obj2 = "<< /Type /Pages /Kids [3 0 R] /Count 1 >>";
    let obj3 = "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 200 100] /Contents 4 0 R >>";
    let off2 = obj1.len() + 1;
    let off3 = off2 + obj2.len() + 1;
    let header = format!("1 0 2 {off2} 3 {off3} ");
    let objstm_data = format!("{header}{obj1}\n{obj2}\n{obj3}");

    let mut out = b"%PDF-1.5\n".to_vec();

    let content = "0 1 0 rg 0 0 100 100 re f";
    let offset4 = out.len();
    out.extend_from_slice(
        format!(
            "4 0 obj\n<< /Length {} >>\nstream\n{content}\nendstream\nendobj\n",
            content.len()
        )
        .as_bytes(),
    );

    let offset5 = out.len();
    out.extend_from_slice(
        format!(
            "5 0 obj\n<< /Type /ObjStm /N 3 /First {} /Length {} >>\nstream\n{objstm_data}\nendstream\nendobj\n",
            header.len(),
            objstm_data.len()
        )
        .as_bytes(),
    );

    let offset6 = out.len();
    // W [1 4 2]
    let entry = |kind: u8, field2: u32, field3: u16| -> Vec<u8> {
        let mut e = vec![kind];
        e.extend_from_slice(&field2.to_be_bytes());
        e.extend_from_slice(&field3.to_be_bytes());
        e
    };
    let mut xref = Vec::new();
    xref.extend(entry(0, 0, 0xFFFF));
    xref.extend(entry(2, 5, 0));
    xref.extend(entry(2, 5, 1));
    xref.extend(entry(2, 5, 2));
    xref.extend(entry(1, offset4 as u32, 0));
    xref.extend(entry(1, offset5 as u32, 0));
    xref.extend(entry(1, offset6 as u32, 0));

    out.extend_from_slice(
        format!(
            "6 0 obj\n<< /Type /XRef /Size 7 /W [1 4 2] /Root 1 0 R /Length {} >>\nstream\n",
            xref.len()
        )
        .as_bytes(),
    );
    out.extend_from_slice(&xref);
    out.extend_from_slice(format!("\nendstream\nendobj\nstartxref\n{offset6}\n%%EOF\n").as_bytes());
    out
}

/// startxref の値を壊す。
pub fn break_startxref(bytes: &[u8]) -> Vec<u8> {
    let marker = b"startxref";
    let pos = bytes
        .windows(marker.len())
        .rposition(|w| w == marker)
        .expect("startxref present");
    let mut out = bytes[..pos].to_vec();
    out.extend_from_slice(b"startxref\n99999999\n%%EOF\n");
    out
}

fn save(doc: &mut Document) -> Vec<u8> {
    let mut buf = Vec::new();
    doc.save_to(&mut buf).expect("fixture should serialize");
    buf
}
