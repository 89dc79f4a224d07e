// ローダー: バイト列 → Document
//
// 1. lopdf で xref を辿って読み込む（暗号化されていればパスワードで復号）
// 2. 失敗したら `N G obj` を全走査する復旧モード
// 3. ページツリーを辿って継承属性を各ページに実体化する

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use lopdf::{Dictionary, Object, ObjectId, dictionary};

use crate::crypt::{self, SecurityInfo};
use crate::error::PdfForgeError;
use crate::pdf::document::Document;
use crate::pdf::parser::{Parser, find_bytes, is_whitespace};

/// ページツリーの最大深さ
const MAX_TREE_DEPTH: usize = 64;
/// 継承可能なページ属性
const INHERITABLE: [&[u8]; 4] = [b"MediaBox", b"CropBox", b"Resources", b"Rotate"];

/// 復号済みでページツリー組み立て前のオブジェクト群
#[derive(Debug, Default)]
struct RawDocument {
    objects: BTreeMap<ObjectId, Object>,
    trailer: Dictionary,
    security: Option<SecurityInfo>,
    /// 全走査で集めたか
    recovered: bool,
    /// 復旧モードで見つけた Catalog（出現順）
    catalogs: Vec<ObjectId>,
}

/// ファイルから読み込む。
pub fn load_file(path: impl AsRef<Path>, password: Option<&str>) -> crate::error::Result<Document> {
    let bytes = std::fs::read(path.as_ref())?;
    load_with_password(&bytes, password.unwrap_or(""))
}

/// バイト列から読み込む（空パスワード）。
pub fn load(bytes: &[u8]) -> crate::error::Result<Document> {
    load_with_password(bytes, "")
}

/// バイト列から読み込む。暗号化されていれば `password` で認証する。
pub fn load_with_password(bytes: &[u8], password: &str) -> crate::error::Result<Document> {
    let version = match header_version(bytes) {
        Some(v) => v,
        None if find_bytes(bytes, 0, b" obj").is_none() => {
            return Err(PdfForgeError::corrupt("input is not a PDF file (no header, no objects)"));
        }
        // ヘッダ欠落でもオブジェクトがあれば読み込みを試みる
        None => {
            tracing::warn!("missing %PDF header, assuming 1.4");
            "1.4".to_string()
        }
    };

    let primary = load_with_lopdf(bytes, password).and_then(|raw| assemble(raw, &version));
    match primary {
        Ok(doc) => Ok(doc),
        Err(e @ PdfForgeError::PasswordError(_)) => Err(e),
        Err(e @ PdfForgeError::UnsupportedFormatError(_)) => Err(e),
        Err(e) => {
            tracing::warn!(error = %e, "cross-reference data unusable, scanning for objects");
            let mut raw = recovery_scan(bytes)?;
            decrypt_recovered(&mut raw, password)?;
            expand_object_streams(&mut raw);
            assemble(raw, &version)
        }
    }
}

/// xref（表・ストリーム・/Prev チェーン）の解釈と復号は lopdf に任せる。
fn load_with_lopdf(bytes: &[u8], password: &str) -> crate::error::Result<RawDocument> {
    let mut loaded = lopdf::Document::load_mem_with_password(bytes, password)?;

    if let Ok(encrypt) = loaded.trailer.get(b"Encrypt").cloned() {
        if loaded.encryption_state.is_none() {
            return Err(PdfForgeError::password("document is encrypted and could not be decrypted"));
        }
        if let Object::Reference(id) = encrypt {
            loaded.objects.remove(&id);
        }
        loaded.trailer.remove(b"Encrypt");
    }

    let security = loaded
        .encryption_state
        .as_ref()
        .map(|state| crypt::security_info(state, loaded.trailer.get(b"ID").ok(), password));
    if let Some(info) = &security {
        tracing::info!(
            algorithm = info.algorithm.as_str(),
            authenticated_as = ?info.authenticated_as,
            "decrypted input document"
        );
    }

    Ok(RawDocument {
        objects: loaded.objects,
        trailer: loaded.trailer,
        security,
        recovered: false,
        catalogs: Vec::new(),
    })
}

fn header_version(bytes: &[u8]) -> Option<String> {
    let window = &bytes[..bytes.len().min(1024)];
    let start = find_bytes(window, 0, b"%PDF-")? + 5;
    let version: String = bytes[start..]
        .iter()
        .take_while(|b| b.is_ascii_digit() || **b == b'.')
        .map(|&b| b as char)
        .collect();
    (!version.is_empty()).then_some(version)
}

// ============================================================
// 復旧モード
// ============================================================

/// `obj` キーワードの直前から `N G ` を逆向きに読み取り、ヘッダ開始位置を返す。
fn object_header_start(bytes: &[u8], obj_pos: usize) -> Option<usize> {
    let mut i = obj_pos;
    let skip_ws = |mut i: usize| {
        while i > 0 && is_whitespace(bytes[i - 1]) {
            i -= 1;
        }
        i
    };
    let skip_digits = |mut i: usize| {
        let end = i;
        while i > 0 && bytes[i - 1].is_ascii_digit() {
            i -= 1;
        }
        (i < end).then_some(i)
    };

    if i == 0 || !is_whitespace(bytes[i - 1]) {
        return None;
    }
    i = skip_ws(i);
    i = skip_digits(i)?;
    if i == 0 || !is_whitespace(bytes[i - 1]) {
        return None;
    }
    i = skip_ws(i);
    i = skip_digits(i)?;
    if i > 0 && !(is_whitespace(bytes[i - 1]) || bytes[i - 1] == b'>' || bytes[i - 1] == b']') {
        return None;
    }
    Some(i)
}

fn dict_is_type(dict: &Dictionary, ty: &[u8]) -> bool {
    matches!(dict.get(b"Type"), Ok(Object::Name(n)) if n == ty)
}

fn is_type(obj: &Object, ty: &[u8]) -> bool {
    match obj {
        Object::Dictionary(d) => dict_is_type(d, ty),
        Object::Stream(s) => dict_is_type(&s.dict, ty),
        _ => false,
    }
}

fn recovery_scan(bytes: &[u8]) -> crate::error::Result<RawDocument> {
    let mut raw = RawDocument {
        recovered: true,
        ..Default::default()
    };
    let mut pos = 0usize;

    while let Some(found) = find_bytes(bytes, pos, b"obj") {
        pos = found + 3;
        let next_ok = bytes.get(found + 3).is_none_or(|&b| is_whitespace(b) || b"<[(/%".contains(&b));
        if !next_ok {
            continue;
        }
        let Some(start) = object_header_start(bytes, found) else {
            continue;
        };
        let mut parser = Parser::new(bytes, start);
        match parser.parse_indirect_object() {
            Ok((id, obj)) => {
                if is_type(&obj, b"Catalog") {
                    raw.catalogs.push(id);
                }
                if let Object::Stream(stream) = &obj
                    && is_type(&obj, b"XRef")
                {
                    merge_trailer(&mut raw.trailer, &stream.dict);
                }
                // 後の定義が優先（増分更新）
                raw.objects.insert(id, obj);
                pos = pos.max(parser.position());
            }
            Err(e) => tracing::debug!(offset = start, error = %e, "skipping unparsable object"),
        }
    }

    let mut tpos = 0usize;
    while let Some(found) = find_bytes(bytes, tpos, b"trailer") {
        tpos = found + 7;
        let mut parser = Parser::new(bytes, tpos);
        if let Ok(Object::Dictionary(dict)) = parser.parse_object() {
            merge_trailer(&mut raw.trailer, &dict);
        }
    }
    if raw.objects.is_empty() {
        return Err(PdfForgeError::corrupt("no objects found in file"));
    }
    tracing::warn!(objects = raw.objects.len(), "recovered objects by scanning");
    Ok(raw)
}

/// 後から見つかった trailer のキーで上書きする。
fn merge_trailer(trailer: &mut Dictionary, newer: &Dictionary) {
    for (key, value) in newer.iter() {
        trailer.set(key.clone(), value.clone());
    }
}

// ============================================================
// 組み立て: ページツリー
// ============================================================

fn assemble(mut raw: RawDocument, version: &str) -> crate::error::Result<Document> {
    // 相互参照ストリームと object stream の入れ物は捨てる
    raw.objects
        .retain(|_, obj| !is_type(obj, b"XRef") && !is_type(obj, b"ObjStm"));

    if raw.recovered {
        ensure_catalog(&mut raw)?;
    }

    let mut doc = Document::new(version);
    doc.max_id = raw.objects.keys().map(|id| id.0).max().unwrap_or(0);
    doc.objects = raw.objects;
    doc.trailer = raw.trailer;
    doc.security = raw.security;
    // xref ストリーム由来のキーも trailer には残さない
    for key in [&b"Prev"[..], b"XRefStm", b"Size", b"Encrypt", b"Length", b"Filter", b"DecodeParms", b"W", b"Index", b"Type"] {
        doc.trailer.remove(key);
    }

    let catalog_id = doc.catalog_id()?;
    let pages_root = match doc.get_dictionary(catalog_id)?.get(b"Pages") {
        Ok(Object::Reference(id)) => *id,
        _ => return Err(PdfForgeError::corrupt("catalog has no /Pages reference")),
    };

    let pages = walk_page_tree(&doc, pages_root)?;
    if pages.is_empty() {
        return Err(PdfForgeError::corrupt("document has no pages"));
    }
    materialize_inherited(&mut doc, &pages);
    doc.pages = pages.into_iter().map(|(id, _)| id).collect();

    tracing::debug!(
        version,
        pages = doc.pages.len(),
        objects = doc.objects.len(),
        encrypted = doc.security.is_some(),
        recovered = raw.recovered,
        "document loaded"
    );
    Ok(doc)
}

/// 復旧モードで集めたオブジェクトが暗号化されていれば lopdf で復号する。
fn decrypt_recovered(raw: &mut RawDocument, password: &str) -> crate::error::Result<()> {
    if matches!(raw.trailer.get(b"Encrypt"), Err(_) | Ok(Object::Null)) {
        raw.trailer.remove(b"Encrypt");
        return Ok(());
    }

    let mut scanned = lopdf::Document::with_version("1.4");
    scanned.objects = std::mem::take(&mut raw.objects);
    scanned.trailer = raw.trailer.clone();
    scanned.max_id = scanned.objects.keys().map(|id| id.0).max().unwrap_or(0);
    scanned.decrypt(password)?;

    if let Some(state) = &scanned.encryption_state {
        let info = crypt::security_info(state, scanned.trailer.get(b"ID").ok(), password);
        tracing::info!(
            algorithm = info.algorithm.as_str(),
            authenticated_as = ?info.authenticated_as,
            "decrypted recovered document"
        );
        raw.security = Some(info);
    }
    raw.objects = scanned.objects;
    raw.trailer.remove(b"Encrypt");
    Ok(())
}

/// 全 object stream を展開する。同じ番号がすでにあればそちらを残す。
fn expand_object_streams(raw: &mut RawDocument) {
    let stream_ids: Vec<ObjectId> = raw
        .objects
        .iter()
        .filter(|(_, obj)| is_type(obj, b"ObjStm"))
        .map(|(id, _)| *id)
        .collect();

    for stream_id in stream_ids {
        let Some(Object::Stream(stream)) = raw.objects.get_mut(&stream_id) else {
            continue;
        };
        let contents = match lopdf::ObjectStream::new(stream) {
            Ok(object_stream) => object_stream.objects,
            Err(e) => {
                tracing::warn!(stream = stream_id.0, error = %e, "failed to expand object stream");
                continue;
            }
        };
        for (id, obj) in contents {
            raw.objects.entry(id).or_insert(obj);
        }
    }
}

/// 復旧モード: trailer の /Root が使えなければ Catalog を探すか合成する。
fn ensure_catalog(raw: &mut RawDocument) -> crate::error::Result<()> {
    let root_ok = match raw.trailer.get(b"Root") {
        Ok(Object::Reference(id)) => matches!(
            raw.objects.get(id),
            Some(Object::Dictionary(d)) if matches!(d.get(b"Pages"), Ok(Object::Reference(_)))
        ),
        _ => false,
    };
    if root_ok {
        return Ok(());
    }

    if let Some(&catalog) = raw.catalogs.iter().rev().find(|id| {
        matches!(raw.objects.get(id), Some(Object::Dictionary(d)) if matches!(d.get(b"Pages"), Ok(Object::Reference(_))))
    }) {
        tracing::warn!(catalog = catalog.0, "using last catalog found by scan");
        raw.trailer.set("Root", Object::Reference(catalog));
        return Ok(());
    }

    let mut next_id = raw.objects.keys().map(|id| id.0).max().unwrap_or(0) + 1;

    // ルートの Pages ノード（/Parent なし、/Count 最大）
    let pages_root = raw
        .objects
        .iter()
        .filter_map(|(id, obj)| match obj {
            Object::Dictionary(d) if is_type(obj, b"Pages") && !d.has(b"Parent") => {
                Some((*id, d.get(b"Count").and_then(Object::as_i64).unwrap_or(0)))
            }
            _ => None,
        })
        .max_by_key(|(_, count)| *count)
        .map(|(id, _)| id);

    let pages_root = match pages_root {
        Some(id) => id,
        None => {
            // Pages ノードもない: 見つかったページを束ねる
            let page_ids: Vec<ObjectId> = raw
                .objects
                .iter()
                .filter(|(_, obj)| is_type(obj, b"Page"))
                .map(|(id, _)| *id)
                .collect();
            if page_ids.is_empty() {
                return Err(PdfForgeError::corrupt("no page tree found"));
            }
            let pages_id = (next_id, 0);
            next_id += 1;
            for id in &page_ids {
                if let Some(Object::Dictionary(d)) = raw.objects.get_mut(id) {
                    d.set("Parent", Object::Reference(pages_id));
                }
            }
            raw.objects.insert(
                pages_id,
                Object::Dictionary(dictionary! {
                    "Type" => "Pages",
                    "Kids" => page_ids.iter().map(|id| Object::Reference(*id)).collect::<Vec<_>>(),
                    "Count" => page_ids.len() as i64,
                }),
            );
            tracing::warn!(pages = page_ids.len(), "synthesized page tree from orphan pages");
            pages_id
        }
    };

    let catalog_id = (next_id, 0);
    raw.objects.insert(
        catalog_id,
        Object::Dictionary(dictionary! {
            "Type" => "Catalog",
            "Pages" => Object::Reference(pages_root),
        }),
    );
    raw.trailer.set("Root", Object::Reference(catalog_id));
    tracing::warn!(catalog = catalog_id.0, "synthesized catalog");
    Ok(())
}

/// ページツリーを辿り、各ページと継承された属性を返す。
fn walk_page_tree(
    doc: &Document,
    root: ObjectId,
) -> crate::error::Result<Vec<(ObjectId, Dictionary)>> {
    let mut pages = Vec::new();
    let mut visited = BTreeSet::new();
    // (ノード, 深さ, 継承属性)。Kids の順序を保つため逆順に積む
    let mut stack = vec![(root, 0usize, Dictionary::new())];

    while let Some((id, depth, inherited)) = stack.pop() {
        if depth > MAX_TREE_DEPTH {
            return Err(PdfForgeError::corrupt("page tree too deep"));
        }
        if !visited.insert(id) {
            tracing::warn!(node = id.0, "page tree node visited twice, skipping");
            continue;
        }
        let Ok(dict) = doc.get_dictionary(id) else {
            tracing::warn!(node = id.0, "missing page tree node");
            continue;
        };

        let mut attrs = inherited;
        for key in INHERITABLE {
            if let Ok(value) = dict.get(key) {
                attrs.set(key, value.clone());
            }
        }

        let is_pages = dict_is_type(dict, b"Pages")
            || (!dict_is_type(dict, b"Page") && dict.has(b"Kids"));
        if is_pages {
            let kids = match dict.get(b"Kids").map(|o| doc.resolve(o)) {
                Ok(Object::Array(kids)) => kids.clone(),
                _ => Vec::new(),
            };
            for kid in kids.iter().rev() {
                if let Object::Reference(kid_id) = kid {
                    stack.push((*kid_id, depth + 1, attrs.clone()));
                }
            }
        } else {
            pages.push((id, attrs));
        }
    }
    Ok(pages)
}

/// 継承属性をページ辞書に直接書き込む。
fn materialize_inherited(doc: &mut Document, pages: &[(ObjectId, Dictionary)]) {
    for (id, attrs) in pages {
        let Some(Object::Dictionary(page)) = doc.objects.get_mut(id) else {
            continue;
        };
        for key in INHERITABLE {
            if !page.has(key)
                && let Ok(value) = attrs.get(key)
            {
                page.set(key, value.clone());
            }
        }
        if !page.has(b"MediaBox") {
            tracing::warn!(page = id.0, "page without MediaBox, using US Letter");
            page.set("MediaBox", vec![0.into(), 0.into(), 612.into(), 792.into()]);
        }
        if !page.has(b"Type") {
            page.set("Type", "Page");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_header_start() {
        let src = b"junk\n12 0 obj<<>>endobj";
        let obj_pos = find_bytes(src, 0, b"obj").unwrap();
        assert_eq!(object_header_start(src, obj_pos), Some(5));

        let endobj = b"x endobj";
        assert_eq!(object_header_start(endobj, 5), None);
    }

    #[test]
    fn test_header_version() {
        assert_eq!(header_version(b"%PDF-1.7\n%..."), Some("1.7".to_string()));
        assert_eq!(header_version(b"hello"), None);
    }

    #[test]
    fn test_not_a_pdf_is_corrupt() {
        match load(b"this is plainly not a pdf") {
            Err(PdfForgeError::CorruptDocumentError(_)) => {}
            other => panic!("unexpected {other:?}"),
        }
    }
}
