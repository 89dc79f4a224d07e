// Document → バイト列
//
// 直列化は lopdf に任せる。通常はクラシック xref 表、圧縮出力では
// object stream と xref ストリームを使う。

use lopdf::{Object, SaveOptions};

use crate::error::PdfForgeError;
use crate::pdf::document::Document;

/// object stream 1 本に詰めるオブジェクト数
const OBJECTS_PER_STREAM: usize = 100;

fn prepare(doc: &Document) -> lopdf::Document {
    let mut out = doc.to_lopdf();
    out.trailer.set("Size", Object::Integer(i64::from(out.max_id) + 1));
    out
}

/// ドキュメントを PDF バイト列として出力する。
pub fn write_document(doc: &Document) -> crate::error::Result<Vec<u8>> {
    let mut out = prepare(doc);
    let mut buf = Vec::new();
    out.save_to(&mut buf)
        .map_err(|e| PdfForgeError::encoding(format!("failed to serialize PDF: {e}")))?;

    tracing::debug!(
        bytes = buf.len(),
        objects = doc.objects.len(),
        encrypted = doc.encryption.is_some(),
        "document serialized"
    );
    Ok(buf)
}

/// 辞書などの非ストリームオブジェクトを object stream にまとめ、xref もストリームで書く。
///
/// 暗号化済みのドキュメントはクラシック形式で書く。
pub fn write_compact(doc: &Document) -> crate::error::Result<Vec<u8>> {
    if doc.encryption.is_some() {
        return write_document(doc);
    }
    let mut out = prepare(doc);
    let options = SaveOptions::builder()
        .use_object_streams(true)
        .use_xref_streams(true)
        .max_objects_per_stream(OBJECTS_PER_STREAM)
        .compression_level(9)
        .build();

    let mut buf = Vec::new();
    out.save_with_options(&mut buf, options)
        .map_err(|e| PdfForgeError::encoding(format!("failed to serialize PDF: {e}")))?;

    tracing::debug!(bytes = buf.len(), objects = doc.objects.len(), "document serialized with object streams");
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    fn one_page_doc() -> Document {
        let mut doc = Document::new("1.5");
        let pages_id = doc.new_object_id();
        let page = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 100.into(), 100.into()],
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! { "Type" => "Pages", "Kids" => vec![page.into()], "Count" => 1 }),
        );
        let catalog = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog);
        doc.pages = vec![page];
        doc
    }

    #[test]
    fn test_written_document_starts_with_header_and_ends_with_eof() {
        let bytes = write_document(&one_page_doc()).unwrap();
        assert!(bytes.starts_with(b"%PDF-1.5"));
        let tail = String::from_utf8_lossy(&bytes[bytes.len().saturating_sub(32)..]).to_string();
        assert!(tail.contains("%%EOF"));
    }

    #[test]
    fn test_compact_output_uses_object_streams() {
        let bytes = write_compact(&one_page_doc()).unwrap();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("/ObjStm"));
        assert!(text.contains("/XRef"));

        let reloaded = lopdf::Document::load_mem(&bytes).unwrap();
        assert_eq!(reloaded.get_pages().len(), 1);
    }
}
