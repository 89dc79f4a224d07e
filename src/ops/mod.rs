// ドキュメント変換: 入力を変更せず、新しい Document を返す

pub mod compress;
pub mod embed;
pub mod merge;
pub mod split;
pub mod watermark;

use lopdf::{Dictionary, Object, ObjectId};

use crate::pdf::document::Document;

/// `pages` を子に持つフラットな /Pages ノードと Catalog を作り、trailer の Root に設定する。
///
/// 各ページの /Parent は新しい /Pages ノードを指すように書き換える。
pub(crate) fn install_page_tree(doc: &mut Document, pages: Vec<ObjectId>) -> ObjectId {
    let pages_id = doc.new_object_id();

    for page_id in &pages {
        if let Some(Object::Dictionary(dict)) = doc.objects.get_mut(page_id) {
            dict.set("Parent", Object::Reference(pages_id));
        }
    }

    let mut pages_dict = Dictionary::new();
    pages_dict.set("Type", Object::Name(b"Pages".to_vec()));
    pages_dict.set(
        "Kids",
        Object::Array(pages.iter().map(|id| Object::Reference(*id)).collect()),
    );
    pages_dict.set("Count", Object::Integer(pages.len() as i64));
    doc.objects.insert(pages_id, Object::Dictionary(pages_dict));

    let mut catalog = Dictionary::new();
    catalog.set("Type", Object::Name(b"Catalog".to_vec()));
    catalog.set("Pages", Object::Reference(pages_id));
    let catalog_id = doc.add_object(Object::Dictionary(catalog));

    doc.trailer.set("Root", Object::Reference(catalog_id));
    doc.pages = pages;
    pages_id
}

/// 1始まりのページ番号列を 0 始まりのインデックスに変換する（None は全ページ）。
pub(crate) fn selected_indices(
    doc: &Document,
    pages: Option<&[u32]>,
) -> crate::error::Result<Vec<usize>> {
    match pages {
        None => Ok((0..doc.page_count()).collect()),
        Some(list) => list
            .iter()
            .map(|&p| {
                if p >= 1 && (p as usize) <= doc.page_count() {
                    Ok(p as usize - 1)
                } else {
                    Err(crate::error::PdfForgeError::page_range(format!(
                        "page {} out of range (document has {} pages)",
                        p,
                        doc.page_count()
                    )))
                }
            })
            .collect(),
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! ユニットテスト用の小さなドキュメント

    use lopdf::{Dictionary, Object, Stream, dictionary};

    use super::install_page_tree;
    use crate::pdf::document::Document;

    /// 各ページに "Page N" を描く Helvetica テキストを持つ n ページのドキュメント。
    /// フォントは全ページで共有する。
    pub fn text_document(n: usize) -> Document {
        let mut doc = Document::new("1.5");
        let font = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let mut pages = Vec::new();
        for i in 0..n {
            let content = format!("BT /F1 24 Tf 72 720 Td (Page {}) Tj ET", i + 1);
            let content_id = doc.add_object(Stream::new(Dictionary::new(), content.into_bytes()));
            let page = doc.add_object(dictionary! {
                "Type" => "Page",
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Resources" => dictionary! { "Font" => dictionary! { "F1" => font } },
                "Contents" => content_id,
            });
            pages.push(page);
        }
        install_page_tree(&mut doc, pages);
        let info = doc.add_object(dictionary! {
            "Title" => Object::string_literal("Fixture"),
        });
        doc.trailer.set("Info", info);
        doc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_page_tree_sets_parent() {
        let doc = fixtures::text_document(3);
        let catalog = doc.catalog().unwrap();
        let pages_id = catalog.get(b"Pages").unwrap().as_reference().unwrap();
        for page in &doc.pages {
            let dict = doc.get_dictionary(*page).unwrap();
            assert_eq!(dict.get(b"Parent").unwrap().as_reference().unwrap(), pages_id);
        }
        assert!(doc.dangling_references().is_empty());
    }

    #[test]
    fn test_selected_indices() {
        let doc = fixtures::text_document(3);
        assert_eq!(selected_indices(&doc, None).unwrap(), vec![0, 1, 2]);
        assert_eq!(selected_indices(&doc, Some(&[3, 1])).unwrap(), vec![2, 0]);
        assert!(selected_indices(&doc, Some(&[4])).is_err());
        assert!(selected_indices(&doc, Some(&[0])).is_err());
    }
}
