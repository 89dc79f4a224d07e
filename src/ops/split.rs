//! 1 つのドキュメントをページ範囲ごとの複数ドキュメントに分割する。
//!
//! 各出力は選択ページの到達可能閉包だけを ID を保ったままコピーし、
//! 新しい Catalog とフラットな /Pages ノードを付ける。

use lopdf::ObjectId;
use serde::Serialize;

use crate::error::PdfForgeError;
use crate::pdf::document::Document;
use crate::pdf::graph;

/// 1 始まり・両端を含むページ範囲
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageRange {
    pub from: usize,
    pub to: usize,
}

impl PageRange {
    pub fn new(from: usize, to: usize) -> Self {
        Self { from, to }
    }

    pub fn len(&self) -> usize {
        self.to + 1 - self.from
    }

    pub fn is_empty(&self) -> bool {
        self.to < self.from
    }
}

/// 分割方法
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitMode {
    /// 指定範囲ごと（重複してもよい）
    Ranges(Vec<PageRange>),
    /// n 等分。1 部あたり ceil(P / n) ページで、最後の部に余りが入る
    EqualParts(usize),
    /// 1 ページずつ
    Singles,
}

/// 分割モードを具体的なページ範囲列に展開して検証する。
pub fn plan_ranges(mode: &SplitMode, page_count: usize) -> crate::error::Result<Vec<PageRange>> {
    match mode {
        SplitMode::Ranges(ranges) => {
            if ranges.is_empty() {
                return Err(PdfForgeError::page_range("no page ranges given"));
            }
            for range in ranges {
                if range.from < 1 {
                    return Err(PdfForgeError::page_range(format!(
                        "range {}-{}: pages start at 1",
                        range.from, range.to
                    )));
                }
                if range.from > range.to {
                    return Err(PdfForgeError::page_range(format!(
                        "range {}-{}: start is after end",
                        range.from, range.to
                    )));
                }
                if range.to > page_count {
                    return Err(PdfForgeError::page_range(format!(
                        "range {}-{}: document has {} pages",
                        range.from, range.to, page_count
                    )));
                }
            }
            Ok(ranges.clone())
        }
        SplitMode::EqualParts(n) => {
            let n = *n;
            if n == 0 || n > page_count {
                return Err(PdfForgeError::page_range(format!(
                    "cannot split {} pages into {} parts",
                    page_count, n
                )));
            }
            let per_part = page_count.div_ceil(n);
            Ok((1..=page_count)
                .step_by(per_part)
                .map(|from| PageRange::new(from, (from + per_part - 1).min(page_count)))
                .collect())
        }
        SplitMode::Singles => {
            if page_count == 0 {
                return Err(PdfForgeError::page_range("document has no pages"));
            }
            Ok((1..=page_count).map(|p| PageRange::new(p, p)).collect())
        }
    }
}

/// ドキュメントを分割する。入力は変更しない。
pub fn split(doc: &Document, mode: &SplitMode) -> crate::error::Result<Vec<Document>> {
    doc.ensure_plaintext()?;
    let ranges = plan_ranges(mode, doc.page_count())?;
    let metadata = doc.metadata();

    let parts = ranges
        .iter()
        .map(|range| {
            let selected: Vec<ObjectId> = doc.pages[range.from - 1..range.to].to_vec();
            let boundary = graph::page_boundary(doc, &selected);
            let marked = graph::mark(doc, selected.iter().copied(), &boundary);

            let mut part = Document::new(&doc.version);
            graph::copy_preserving_ids(doc, &marked, &mut part);
            super::install_page_tree(&mut part, selected);
            part.set_metadata(&metadata);

            tracing::debug!(
                from = range.from,
                to = range.to,
                objects = part.objects.len(),
                "split part built"
            );
            part
        })
        .collect::<Vec<_>>();

    tracing::info!(parts = parts.len(), pages = doc.page_count(), "document split");
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::fixtures::text_document;

    #[test]
    fn test_equal_parts_gives_4_4_2() {
        let ranges = plan_ranges(&SplitMode::EqualParts(3), 10).unwrap();
        let sizes: Vec<usize> = ranges.iter().map(PageRange::len).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn test_equal_parts_rejects_zero_and_too_many() {
        assert!(matches!(
            plan_ranges(&SplitMode::EqualParts(0), 5),
            Err(PdfForgeError::PageRangeError(_))
        ));
        assert!(matches!(
            plan_ranges(&SplitMode::EqualParts(6), 5),
            Err(PdfForgeError::PageRangeError(_))
        ));
    }

    #[test]
    fn test_range_validation() {
        for bad in [PageRange::new(3, 2), PageRange::new(0, 1), PageRange::new(1, 6)] {
            assert!(matches!(
                plan_ranges(&SplitMode::Ranges(vec![bad]), 5),
                Err(PdfForgeError::PageRangeError(_))
            ));
        }
        let overlapping = vec![PageRange::new(1, 3), PageRange::new(2, 5)];
        assert_eq!(plan_ranges(&SplitMode::Ranges(overlapping.clone()), 5).unwrap(), overlapping);
    }

    #[test]
    fn test_split_parts_are_self_contained() {
        let doc = text_document(5);
        let parts = split(&doc, &SplitMode::Ranges(vec![PageRange::new(2, 3), PageRange::new(5, 5)])).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].page_count(), 2);
        assert_eq!(parts[1].page_count(), 1);
        for part in &parts {
            assert!(part.dangling_references().is_empty());
            assert_eq!(part.metadata().title.as_deref(), Some("Fixture"));
        }
        let content = parts[1].page_content(parts[1].pages[0]).unwrap();
        assert!(String::from_utf8_lossy(&content).contains("Page 5"));
    }

    #[test]
    fn test_split_part_excludes_other_pages_content() {
        let doc = text_document(3);
        let parts = split(&doc, &SplitMode::Singles).unwrap();
        assert_eq!(parts.len(), 3);
        // ページ 1 + コンテンツ + 共有フォント + Pages + Catalog + Info
        assert_eq!(parts[0].objects.len(), 6);
    }
}
