//! 複数ドキュメントのページを 1 つのドキュメントに結合する。
//!
//! 各入力について選択ページからマークフェーズを走らせ、到達可能な
//! オブジェクトだけを新しい ID 空間にコピーする。リソースの重複排除はしない。

use std::collections::BTreeSet;

use lopdf::ObjectId;

use crate::error::PdfForgeError;
use crate::pdf::document::Document;
use crate::pdf::graph;

/// 結合の入力 1 件
#[derive(Debug, Clone)]
pub struct MergeSource<'a> {
    pub document: &'a Document,
    /// 0 始まりのページ番号（None は全ページ）
    pub pages: Option<Vec<usize>>,
}

impl<'a> MergeSource<'a> {
    pub fn all(document: &'a Document) -> Self {
        Self {
            document,
            pages: None,
        }
    }

    pub fn with_pages(document: &'a Document, pages: Vec<usize>) -> Self {
        Self {
            document,
            pages: Some(pages),
        }
    }
}

/// 入力を順に結合した新しいドキュメントを返す。
pub fn merge(sources: &[MergeSource<'_>]) -> crate::error::Result<Document> {
    if sources.is_empty() {
        return Err(PdfForgeError::config("merge needs at least one input document"));
    }

    let version = sources
        .iter()
        .map(|s| s.document.version.as_str())
        .max_by(|a, b| compare_versions(a, b))
        .unwrap_or("1.5")
        .to_string();
    let mut out = Document::new(&version);
    let mut out_pages: Vec<ObjectId> = Vec::new();

    for (source_index, source) in sources.iter().enumerate() {
        let src = source.document;
        src.ensure_plaintext()?;

        let selected: Vec<ObjectId> = match &source.pages {
            None => src.pages.clone(),
            Some(indices) => indices
                .iter()
                .map(|&i| {
                    src.pages.get(i).copied().ok_or_else(|| {
                        PdfForgeError::corrupt(format!(
                            "input {}: page index {} out of range (document has {} pages)",
                            source_index,
                            i,
                            src.page_count()
                        ))
                    })
                })
                .collect::<crate::error::Result<_>>()?,
        };

        let boundary = graph::page_boundary(src, &selected);
        let marked = graph::mark(src, selected.iter().copied(), &boundary);
        let mapping = graph::copy_renumbered(src, &marked, &mut out);

        // 同じページを複数回選んだ場合はページ辞書だけ複製する
        let mut used: BTreeSet<ObjectId> = BTreeSet::new();
        for old in &selected {
            let Some(&new_id) = mapping.get(old) else {
                return Err(PdfForgeError::corrupt(format!(
                    "input {}: page object {} {} is missing",
                    source_index, old.0, old.1
                )));
            };
            if used.insert(new_id) {
                out_pages.push(new_id);
            } else if let Some(copy) = out.objects.get(&new_id).cloned() {
                out_pages.push(out.add_object(copy));
            }
        }

        tracing::debug!(
            input = source_index,
            pages = selected.len(),
            objects = mapping.len(),
            "merge input copied"
        );
    }

    let page_total = out_pages.len();
    super::install_page_tree(&mut out, out_pages);
    out.set_producer(crate::PRODUCER);

    tracing::info!(inputs = sources.len(), pages = page_total, "documents merged");
    Ok(out)
}

/// "1.4" と "1.7" のような版番号を数値として比べる。
pub(crate) fn compare_versions(a: &str, b: &str) -> std::cmp::Ordering {
    let parse = |v: &str| -> (u32, u32) {
        let (major, minor) = v.split_once('.').unwrap_or((v, "0"));
        (major.parse().unwrap_or(1), minor.parse().unwrap_or(0))
    };
    parse(a).cmp(&parse(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::fixtures::text_document;
    use lopdf::Object;

    /// ページの /Parent が指す ID
    fn page_parent(doc: &Document, page: ObjectId) -> Option<ObjectId> {
        doc.get_dictionary(page)
            .ok()
            .and_then(|d| d.get(b"Parent").ok())
            .and_then(|o| match o {
                Object::Reference(id) => Some(*id),
                _ => None,
            })
    }

    #[test]
    fn test_merge_concatenates_pages_in_order() {
        let a = text_document(2);
        let b = text_document(3);
        let merged = merge(&[MergeSource::all(&a), MergeSource::all(&b)]).unwrap();
        assert_eq!(merged.page_count(), 5);
        assert!(merged.dangling_references().is_empty());

        let contents: Vec<Vec<u8>> = merged
            .pages
            .iter()
            .map(|p| merged.page_content(*p).unwrap())
            .collect();
        assert!(String::from_utf8_lossy(&contents[0]).contains("Page 1"));
        assert!(String::from_utf8_lossy(&contents[2]).contains("Page 1"));
        assert!(String::from_utf8_lossy(&contents[4]).contains("Page 3"));
    }

    #[test]
    fn test_merge_sets_parent_to_new_root() {
        let a = text_document(2);
        let merged = merge(&[MergeSource::all(&a)]).unwrap();
        let pages_id = merged
            .catalog()
            .unwrap()
            .get(b"Pages")
            .unwrap()
            .as_reference()
            .unwrap();
        for page in &merged.pages {
            assert_eq!(page_parent(&merged, *page), Some(pages_id));
        }
    }

    #[test]
    fn test_merge_subset_and_duplicate_page() {
        let a = text_document(4);
        let merged = merge(&[MergeSource::with_pages(&a, vec![3, 0, 3])]).unwrap();
        assert_eq!(merged.page_count(), 3);
        let ids: BTreeSet<ObjectId> = merged.pages.iter().copied().collect();
        assert_eq!(ids.len(), 3, "duplicated page gets its own dictionary");
        let first = merged.page_content(merged.pages[0]).unwrap();
        assert!(String::from_utf8_lossy(&first).contains("Page 4"));
    }

    #[test]
    fn test_merge_out_of_range_is_corrupt() {
        let a = text_document(2);
        let err = merge(&[MergeSource::with_pages(&a, vec![5])]).unwrap_err();
        assert!(matches!(err, PdfForgeError::CorruptDocumentError(_)));
    }

    #[test]
    fn test_merge_empty_is_config_error() {
        assert!(matches!(merge(&[]).unwrap_err(), PdfForgeError::ConfigError(_)));
    }

    #[test]
    fn test_merge_producer_is_set() {
        let a = text_document(1);
        let merged = merge(&[MergeSource::all(&a)]).unwrap();
        assert_eq!(merged.metadata().producer.as_deref(), Some(crate::PRODUCER));
    }

    #[test]
    fn test_compare_versions() {
        assert!(compare_versions("1.10", "1.7").is_gt());
        assert!(compare_versions("1.4", "1.7").is_lt());
    }
}
