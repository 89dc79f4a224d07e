// ドキュメントモデル: オブジェクト領域（xref）、trailer、ページ列、メタデータ

use std::collections::{BTreeMap, BTreeSet};

use lopdf::{Dictionary, Object, ObjectId, StringFormat};
use serde::Serialize;

use crate::crypt::SecurityInfo;
use crate::error::PdfForgeError;
use crate::pdf::{filters, graph};

/// 参照を辿る最大回数（参照の循環対策）
const MAX_RESOLVE_HOPS: usize = 32;

static NULL: Object = Object::Null;

/// 矩形（PDFユーザー空間の座標）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl Rect {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        // 座標の順序を正規化する
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }

    pub fn to_object(self) -> Object {
        Object::Array(vec![
            number_object(self.x0),
            number_object(self.y0),
            number_object(self.x1),
            number_object(self.y1),
        ])
    }
}

/// 整数値なら Integer、そうでなければ Real にする。
pub fn number_object(v: f64) -> Object {
    if v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
        Object::Integer(v as i64)
    } else {
        Object::Real(v as f32)
    }
}

/// 数値オブジェクトを f64 に変換する。
pub fn object_to_f64(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(f) => Some(f64::from(*f)),
        _ => None,
    }
}

/// ページのビュー
#[derive(Debug, Clone)]
pub struct Page {
    pub id: ObjectId,
    pub media_box: Rect,
    /// 0, 90, 180, 270 のいずれか
    pub rotation: u16,
}

impl Page {
    /// 回転を考慮した表示サイズ（ポイント）
    pub fn display_size(&self) -> (f64, f64) {
        if self.rotation % 180 == 90 {
            (self.media_box.height(), self.media_box.width())
        } else {
            (self.media_box.width(), self.media_box.height())
        }
    }
}

/// Info 辞書のメタデータ
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Metadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub keywords: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub creation_date: Option<String>,
    pub mod_date: Option<String>,
}

impl Metadata {
    fn fields(&self) -> [(&'static str, &Option<String>); 8] {
        [
            ("Title", &self.title),
            ("Author", &self.author),
            ("Subject", &self.subject),
            ("Keywords", &self.keywords),
            ("Creator", &self.creator),
            ("Producer", &self.producer),
            ("CreationDate", &self.creation_date),
            ("ModDate", &self.mod_date),
        ]
    }
}

/// PDF テキスト文字列をデコードする（UTF-16BE BOM 付き、それ以外は Latin-1 とみなす）。
pub fn decode_text_string(bytes: &[u8]) -> String {
    if let Some(body) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = body
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    if let Some(body) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(body).into_owned();
    }
    bytes.iter().map(|&b| b as char).collect()
}

/// テキスト文字列を PDF オブジェクトにする（ASCII 以外は UTF-16BE）。
pub fn encode_text_string(text: &str) -> Object {
    if text.is_ascii() {
        Object::string_literal(text)
    } else {
        let mut bytes = vec![0xFE, 0xFF];
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        Object::String(bytes, StringFormat::Hexadecimal)
    }
}

/// メモリ上の PDF ドキュメント
#[derive(Debug, Clone)]
pub struct Document {
    pub version: String,
    /// 相互参照表に相当するオブジェクト領域
    pub objects: BTreeMap<ObjectId, Object>,
    pub trailer: Dictionary,
    /// ページツリー順のページ辞書 ID
    pub pages: Vec<ObjectId>,
    pub max_id: u32,
    /// Some の間はオブジェクト領域が暗号文
    pub encryption: Option<lopdf::EncryptionState>,
    /// 暗号化された入力をどう開いたか
    pub security: Option<SecurityInfo>,
}

impl Document {
    /// 空のドキュメントを作る（Catalog も Pages もない）。
    pub fn new(version: &str) -> Self {
        Self {
            version: version.to_string(),
            objects: BTreeMap::new(),
            trailer: Dictionary::new(),
            pages: Vec::new(),
            max_id: 0,
            encryption: None,
            security: None,
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn get(&self, id: ObjectId) -> Option<&Object> {
        self.objects.get(&id)
    }

    /// 参照を辿って実体を返す。存在しない参照は null。
    pub fn resolve<'a>(&'a self, obj: &'a Object) -> &'a Object {
        let mut current = obj;
        for _ in 0..MAX_RESOLVE_HOPS {
            match current {
                Object::Reference(id) => match self.objects.get(id) {
                    Some(target) => current = target,
                    None => return &NULL,
                },
                other => return other,
            }
        }
        &NULL
    }

    /// 辞書のキーを参照解決して返す。
    pub fn dict_get<'a>(&'a self, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
        dict.get(key).ok().map(|o| self.resolve(o)).filter(|o| !matches!(o, Object::Null))
    }

    /// 辞書（またはストリームの辞書）を返す。
    pub fn get_dictionary(&self, id: ObjectId) -> crate::error::Result<&Dictionary> {
        match self.objects.get(&id) {
            Some(Object::Dictionary(dict)) => Ok(dict),
            Some(Object::Stream(stream)) => Ok(&stream.dict),
            Some(_) => Err(PdfForgeError::corrupt(format!(
                "object {} {} is not a dictionary",
                id.0, id.1
            ))),
            None => Err(PdfForgeError::corrupt(format!(
                "object {} {} not found",
                id.0, id.1
            ))),
        }
    }

    pub fn catalog_id(&self) -> crate::error::Result<ObjectId> {
        match self.trailer.get(b"Root") {
            Ok(Object::Reference(id)) => Ok(*id),
            _ => Err(PdfForgeError::corrupt("trailer has no /Root reference")),
        }
    }

    pub fn catalog(&self) -> crate::error::Result<&Dictionary> {
        self.get_dictionary(self.catalog_id()?)
    }

    /// 新しいオブジェクト ID を払い出す（世代 0）。
    pub fn new_object_id(&mut self) -> ObjectId {
        self.max_id += 1;
        (self.max_id, 0)
    }

    pub fn add_object(&mut self, obj: impl Into<Object>) -> ObjectId {
        let id = self.new_object_id();
        self.objects.insert(id, obj.into());
        id
    }

    /// 0始まりのページ番号からページビューを作る。
    pub fn page(&self, index: usize) -> crate::error::Result<Page> {
        let id = *self.pages.get(index).ok_or_else(|| {
            PdfForgeError::page_range(format!(
                "page index {} out of range (document has {} pages)",
                index,
                self.pages.len()
            ))
        })?;
        self.page_view(id)
    }

    pub fn page_view(&self, id: ObjectId) -> crate::error::Result<Page> {
        let dict = self.get_dictionary(id)?;
        let media_box = self
            .dict_get(dict, b"MediaBox")
            .and_then(|o| self.rect_from_object(o))
            .unwrap_or(Rect::new(0.0, 0.0, 612.0, 792.0));
        let rotate = self
            .dict_get(dict, b"Rotate")
            .and_then(object_to_f64)
            .unwrap_or(0.0) as i64;
        Ok(Page {
            id,
            media_box,
            rotation: rotate.rem_euclid(360) as u16 / 90 * 90,
        })
    }

    pub fn rect_from_object(&self, obj: &Object) -> Option<Rect> {
        let items = self.resolve(obj).as_array().ok()?;
        if items.len() < 4 {
            return None;
        }
        let mut v = [0.0f64; 4];
        for (slot, item) in v.iter_mut().zip(items) {
            *slot = object_to_f64(self.resolve(item))?;
        }
        let rect = Rect::new(v[0], v[1], v[2], v[3]);
        (rect.width() > 0.0 && rect.height() > 0.0).then_some(rect)
    }

    /// ページのリソース辞書（参照解決済みの複製）
    pub fn page_resources(&self, page_id: ObjectId) -> Dictionary {
        self.get_dictionary(page_id)
            .ok()
            .and_then(|dict| self.dict_get(dict, b"Resources"))
            .and_then(|o| o.as_dict().ok())
            .cloned()
            .unwrap_or_default()
    }

    /// ページの /Contents が指すストリーム ID の列
    pub fn page_content_ids(&self, page_id: ObjectId) -> Vec<ObjectId> {
        let Ok(dict) = self.get_dictionary(page_id) else {
            return Vec::new();
        };
        match dict.get(b"Contents") {
            Ok(Object::Reference(id)) => match self.objects.get(id) {
                // 間接参照された配列
                Some(Object::Array(items)) => items
                    .iter()
                    .filter_map(|o| o.as_reference().ok())
                    .collect(),
                Some(_) => vec![*id],
                None => Vec::new(),
            },
            Ok(Object::Array(items)) => items
                .iter()
                .filter_map(|o| o.as_reference().ok())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// ページのコンテンツストリームを展開して連結する。
    pub fn page_content(&self, page_id: ObjectId) -> crate::error::Result<Vec<u8>> {
        let mut content = Vec::new();
        for id in self.page_content_ids(page_id) {
            let Some(Object::Stream(stream)) = self.objects.get(&id) else {
                continue;
            };
            let data = filters::decode_stream(stream)?;
            if !content.is_empty() {
                content.push(b'\n');
            }
            content.extend_from_slice(&data);
        }
        Ok(content)
    }

    fn info_dict(&self) -> Option<&Dictionary> {
        self.trailer
            .get(b"Info")
            .ok()
            .map(|o| self.resolve(o))
            .and_then(|o| o.as_dict().ok())
    }

    pub fn metadata(&self) -> Metadata {
        let Some(info) = self.info_dict() else {
            return Metadata::default();
        };
        let text = |key: &[u8]| match self.dict_get(info, key) {
            Some(Object::String(bytes, _)) => Some(decode_text_string(bytes)),
            _ => None,
        };
        Metadata {
            title: text(b"Title"),
            author: text(b"Author"),
            subject: text(b"Subject"),
            keywords: text(b"Keywords"),
            creator: text(b"Creator"),
            producer: text(b"Producer"),
            creation_date: text(b"CreationDate"),
            mod_date: text(b"ModDate"),
        }
    }

    /// Info 辞書を置き換える。すべて None なら Info を外す。
    pub fn set_metadata(&mut self, metadata: &Metadata) {
        let mut info = Dictionary::new();
        for (key, value) in metadata.fields() {
            if let Some(v) = value {
                info.set(key, encode_text_string(v));
            }
        }

        if let Ok(Object::Reference(old)) = self.trailer.get(b"Info") {
            let old = *old;
            self.objects.remove(&old);
        }
        if info.is_empty() {
            self.trailer.remove(b"Info");
        } else {
            let id = self.add_object(Object::Dictionary(info));
            self.trailer.set("Info", Object::Reference(id));
        }
    }

    /// Producer だけを更新する。
    pub fn set_producer(&mut self, producer: &str) {
        let mut metadata = self.metadata();
        metadata.producer = Some(producer.to_string());
        self.set_metadata(&metadata);
    }

    /// trailer /ID の先頭要素を返す。なければ生成して設定する。
    pub fn ensure_file_id(&mut self) -> Vec<u8> {
        if let Ok(Object::Array(ids)) = self.trailer.get(b"ID")
            && let Some(Object::String(first, _)) = ids.first()
            && !first.is_empty()
        {
            return first.clone();
        }
        let id = crate::crypt::random_file_id();
        self.trailer.set(
            "ID",
            Object::Array(vec![
                Object::String(id.clone(), StringFormat::Hexadecimal),
                Object::String(id.clone(), StringFormat::Hexadecimal),
            ]),
        );
        id
    }

    /// 暗号化済みのドキュメントには変換を適用できない。
    pub fn ensure_plaintext(&self) -> crate::error::Result<()> {
        if self.encryption.is_some() {
            return Err(PdfForgeError::config(
                "document is encrypted; apply transforms before protecting it",
            ));
        }
        Ok(())
    }

    /// trailer から到達可能なオブジェクトが参照する、存在しない ID の一覧。
    pub fn dangling_references(&self) -> Vec<ObjectId> {
        let mut missing = BTreeSet::new();
        let mut visited = BTreeSet::new();
        let mut stack: Vec<&Object> = self.trailer.iter().map(|(_, v)| v).collect();

        while let Some(obj) = stack.pop() {
            graph::for_each_reference(obj, &mut |id| {
                if visited.insert(id) {
                    match self.objects.get(&id) {
                        Some(target) => stack.push(target),
                        None => {
                            missing.insert(id);
                        }
                    }
                }
            });
        }
        missing.into_iter().collect()
    }

    /// バイト列に直列化する。
    pub fn to_bytes(&self) -> crate::error::Result<Vec<u8>> {
        crate::pdf::writer::write_document(self)
    }

    /// object stream と xref ストリームを使って小さく直列化する。
    pub fn to_compact_bytes(&self) -> crate::error::Result<Vec<u8>> {
        crate::pdf::writer::write_compact(self)
    }

    /// 同じオブジェクト領域と trailer を持つ lopdf のドキュメントを作る。
    pub fn to_lopdf(&self) -> lopdf::Document {
        let mut out = lopdf::Document::with_version(self.version.as_str());
        out.objects = self.objects.clone();
        out.trailer = self.trailer.clone();
        out.max_id = self.max_id.max(self.objects.keys().map(|id| id.0).max().unwrap_or(0));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    fn two_page_doc() -> Document {
        let mut doc = Document::new("1.5");
        let pages_id = doc.new_object_id();
        let p1 = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        });
        let p2 = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Rotate" => -90,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![p1.into(), p2.into()],
                "Count" => 2,
            }),
        );
        let catalog = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog);
        doc.pages = vec![p1, p2];
        doc
    }

    #[test]
    fn test_rotation_is_normalized() {
        let doc = two_page_doc();
        let page = doc.page(1).unwrap();
        assert_eq!(page.rotation, 270);
        assert_eq!(page.display_size(), (792.0, 612.0));
        assert!(matches!(doc.page(2), Err(PdfForgeError::PageRangeError(_))));
    }

    #[test]
    fn test_metadata_round_trip_with_unicode() {
        let mut doc = two_page_doc();
        let meta = Metadata {
            title: Some("Résumé 日本語".into()),
            author: Some("Alice".into()),
            ..Default::default()
        };
        doc.set_metadata(&meta);
        assert_eq!(doc.metadata(), meta);

        doc.set_producer("pdf_forge");
        let updated = doc.metadata();
        assert_eq!(updated.producer.as_deref(), Some("pdf_forge"));
        assert_eq!(updated.title, meta.title);
    }

    #[test]
    fn test_dangling_references_detects_missing_object() {
        let mut doc = two_page_doc();
        assert!(doc.dangling_references().is_empty());

        let page = doc.pages[0];
        if let Some(Object::Dictionary(dict)) = doc.objects.get_mut(&page) {
            dict.set("Contents", Object::Reference((999, 0)));
        }
        assert_eq!(doc.dangling_references(), vec![(999, 0)]);
    }

    #[test]
    fn test_text_string_decoding() {
        assert_eq!(decode_text_string(b"\xFE\xFF\x00A\x00B"), "AB");
        assert_eq!(decode_text_string(b"caf\xE9"), "café");
    }
}
