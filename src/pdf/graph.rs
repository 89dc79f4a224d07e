// オブジェクトグラフ: 到達可能性のマーク、スイープ、ID付け替えコピー
//
// split / merge / GC が同じマークフェーズを使う。

use std::collections::{BTreeMap, BTreeSet};

use lopdf::{Object, ObjectId};

use crate::pdf::document::Document;

/// オブジェクト内のすべての間接参照に対して `f` を呼ぶ。
pub fn for_each_reference(obj: &Object, f: &mut impl FnMut(ObjectId)) {
    match obj {
        Object::Reference(id) => f(*id),
        Object::Array(items) => items.iter().for_each(|item| for_each_reference(item, f)),
        Object::Dictionary(dict) => dict.iter().for_each(|(_, v)| for_each_reference(v, f)),
        Object::Stream(stream) => stream
            .dict
            .iter()
            .for_each(|(_, v)| for_each_reference(v, f)),
        _ => {}
    }
}

/// 参照を書き換える。`map` が None を返した参照は null に置き換える。
pub fn rewrite_references(obj: &mut Object, map: &mut impl FnMut(ObjectId) -> Option<ObjectId>) {
    if let Object::Reference(id) = obj {
        *obj = match map(*id) {
            Some(new_id) => Object::Reference(new_id),
            None => Object::Null,
        };
        return;
    }
    match obj {
        Object::Array(items) => items.iter_mut().for_each(|item| rewrite_references(item, map)),
        Object::Dictionary(dict) => dict
            .iter_mut()
            .for_each(|(_, v)| rewrite_references(v, map)),
        Object::Stream(stream) => stream
            .dict
            .iter_mut()
            .for_each(|(_, v)| rewrite_references(v, map)),
        _ => {}
    }
}

/// `roots` から到達可能なオブジェクト ID を集める。
///
/// `boundary` に含まれる ID には踏み込まない（マークもしない）。
pub fn mark(
    doc: &Document,
    roots: impl IntoIterator<Item = ObjectId>,
    boundary: &BTreeSet<ObjectId>,
) -> BTreeSet<ObjectId> {
    let mut marked = BTreeSet::new();
    let mut stack: Vec<ObjectId> = roots.into_iter().collect();

    while let Some(id) = stack.pop() {
        if boundary.contains(&id) || !marked.insert(id) {
            continue;
        }
        let Some(obj) = doc.objects.get(&id) else {
            marked.remove(&id);
            continue;
        };
        for_each_reference(obj, &mut |child| {
            if !marked.contains(&child) && !boundary.contains(&child) {
                stack.push(child);
            }
        });
    }
    marked
}

/// trailer から到達可能なオブジェクト ID を集める（ドキュメント全体スコープ）。
pub fn mark_from_trailer(doc: &Document) -> BTreeSet<ObjectId> {
    let mut roots = Vec::new();
    doc.trailer
        .iter()
        .for_each(|(_, v)| for_each_reference(v, &mut |id| roots.push(id)));
    mark(doc, roots, &BTreeSet::new())
}

/// ページ単位スコープの境界: ページツリーの中間ノード、Catalog、選択外のページ。
///
/// ページから /Parent や注釈の /P を通じて他ページやドキュメント全体が
/// 引き込まれるのを防ぐ。
pub fn page_boundary(doc: &Document, selected: &[ObjectId]) -> BTreeSet<ObjectId> {
    let selected: BTreeSet<ObjectId> = selected.iter().copied().collect();
    let mut boundary: BTreeSet<ObjectId> = doc
        .pages
        .iter()
        .filter(|id| !selected.contains(id))
        .copied()
        .collect();

    for (id, obj) in &doc.objects {
        if let Object::Dictionary(dict) = obj
            && let Ok(Object::Name(ty)) = dict.get(b"Type")
            && (ty == b"Pages" || ty == b"Catalog")
        {
            boundary.insert(*id);
        }
    }
    if let Ok(root) = doc.catalog_id() {
        boundary.insert(root);
    }
    boundary
}

/// `live` に含まれないオブジェクトを削除し、削除数を返す。
pub fn sweep(doc: &mut Document, live: &BTreeSet<ObjectId>) -> usize {
    let before = doc.objects.len();
    doc.objects.retain(|id, _| live.contains(id));
    before - doc.objects.len()
}

/// trailer から到達できないオブジェクトを削除する。
pub fn collect_garbage(doc: &mut Document) -> usize {
    let live = mark_from_trailer(doc);
    let removed = sweep(doc, &live);
    tracing::debug!(removed, remaining = doc.objects.len(), "garbage collected");
    removed
}

/// マーク済みオブジェクトを新しい ID で `dest` にコピーし、旧 ID → 新 ID の対応を返す。
///
/// マーク外を指す参照は null になる。
pub fn copy_renumbered(
    src: &Document,
    marked: &BTreeSet<ObjectId>,
    dest: &mut Document,
) -> BTreeMap<ObjectId, ObjectId> {
    let mapping: BTreeMap<ObjectId, ObjectId> = marked
        .iter()
        .filter(|id| src.objects.contains_key(id))
        .map(|&id| (id, dest.new_object_id()))
        .collect();

    for (old, new) in &mapping {
        let Some(obj) = src.objects.get(old) else {
            continue;
        };
        let mut copy = obj.clone();
        rewrite_references(&mut copy, &mut |id| mapping.get(&id).copied());
        dest.objects.insert(*new, copy);
    }
    mapping
}

/// マーク済みオブジェクトを ID を保ったまま `dest` にコピーする。
pub fn copy_preserving_ids(src: &Document, marked: &BTreeSet<ObjectId>, dest: &mut Document) {
    for id in marked {
        let Some(obj) = src.objects.get(id) else {
            continue;
        };
        let mut copy = obj.clone();
        rewrite_references(&mut copy, &mut |target| marked.contains(&target).then_some(target));
        dest.objects.insert(*id, copy);
        dest.max_id = dest.max_id.max(id.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    fn doc_with_shared_font() -> Document {
        let mut doc = Document::new("1.5");
        let pages_id = doc.new_object_id();
        let font = doc.add_object(dictionary! { "Type" => "Font", "BaseFont" => "Helvetica" });
        let p1 = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Resources" => dictionary! { "Font" => dictionary! { "F1" => font } },
        });
        let p2 = doc.add_object(dictionary! { "Type" => "Page", "Parent" => pages_id });
        // p1 の注釈が p2 を指している
        let annot = doc.add_object(dictionary! { "Type" => "Annot", "Dest" => vec![p2.into()] });
        if let Some(Object::Dictionary(d)) = doc.objects.get_mut(&p1) {
            d.set("Annots", vec![Object::Reference(annot)]);
        }
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! { "Type" => "Pages", "Kids" => vec![p1.into(), p2.into()], "Count" => 2 }),
        );
        let catalog = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog);
        doc.pages = vec![p1, p2];
        let _orphan = doc.add_object(Object::string_literal("unreachable"));
        doc
    }

    #[test]
    fn test_page_scope_mark_stops_at_other_pages() {
        let doc = doc_with_shared_font();
        let p1 = doc.pages[0];
        let boundary = page_boundary(&doc, &[p1]);
        let marked = mark(&doc, [p1], &boundary);
        assert!(marked.contains(&p1));
        assert!(marked.contains(&(2, 0)), "font must be reachable");
        assert!(!marked.contains(&doc.pages[1]));
        assert!(!marked.contains(&(1, 0)), "page tree node must not be marked");
    }

    #[test]
    fn test_collect_garbage_removes_orphans() {
        let mut doc = doc_with_shared_font();
        let before = doc.objects.len();
        let removed = collect_garbage(&mut doc);
        assert_eq!(removed, 1);
        assert_eq!(doc.objects.len(), before - 1);
        assert!(doc.dangling_references().is_empty());
    }

    #[test]
    fn test_copy_renumbered_nulls_outside_refs() {
        let doc = doc_with_shared_font();
        let p1 = doc.pages[0];
        let marked = mark(&doc, [p1], &page_boundary(&doc, &[p1]));

        let mut dest = Document::new("1.5");
        let mapping = copy_renumbered(&doc, &marked, &mut dest);
        assert_eq!(mapping.len(), marked.len());

        let new_p1 = mapping[&p1];
        let page = dest.get_dictionary(new_p1).unwrap();
        assert_eq!(page.get(b"Parent").unwrap(), &Object::Null);
        let ids: BTreeSet<u32> = dest.objects.keys().map(|id| id.0).collect();
        assert_eq!(ids, (1..=marked.len() as u32).collect());
    }
}
