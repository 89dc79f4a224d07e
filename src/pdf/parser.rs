// PDF構文パーサ: バイト列 → lopdf::Object
//
// xref が使えないファイルを全走査する復旧モードで使う。
// 入力バッファは読み取りのみで変更しない。

use lopdf::{Dictionary, Object, ObjectId, Stream, StringFormat};

use crate::error::PdfForgeError;

/// 配列・辞書のネスト上限。壊れた入力でスタックを使い切らないための制限。
const MAX_DEPTH: usize = 128;

pub(crate) fn is_whitespace(b: u8) -> bool {
    matches!(b, b'\0' | b'\t' | b'\n' | b'\x0C' | b'\r' | b' ')
}

pub(crate) fn is_delimiter(b: u8) -> bool {
    matches!(
        b,
        b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
    )
}

fn is_regular(b: u8) -> bool {
    !is_whitespace(b) && !is_delimiter(b)
}

/// `haystack[from..]` 内で `needle` が最初に現れる位置（絶対オフセット）を返す。
pub(crate) fn find_bytes(haystack: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// PDFオブジェクト構文のパーサ。
pub struct Parser<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    pub fn new(buf: &'a [u8], pos: usize) -> Self {
        Self {
            buf,
            pos: pos.min(buf.len()),
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.buf.get(self.pos + offset).copied()
    }

    fn starts_with(&self, s: &[u8]) -> bool {
        self.buf[self.pos..].starts_with(s)
    }

    fn error(&self, msg: impl std::fmt::Display) -> PdfForgeError {
        PdfForgeError::corrupt(format!("{msg} at offset {}", self.pos))
    }

    /// 空白とコメント（`%` から行末まで）を読み飛ばす。
    pub fn skip_whitespace(&mut self) {
        while let Some(b) = self.peek() {
            if is_whitespace(b) {
                self.pos += 1;
            } else if b == b'%' {
                while let Some(c) = self.peek() {
                    if c == b'\n' || c == b'\r' {
                        break;
                    }
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
    }

    /// 通常文字の連続（キーワード・数値）を読み取る。
    pub fn read_token(&mut self) -> &'a [u8] {
        self.skip_whitespace();
        let start = self.pos;
        while let Some(b) = self.peek() {
            if !is_regular(b) {
                break;
            }
            self.pos += 1;
        }
        &self.buf[start..self.pos]
    }

    /// 指定キーワードを読み取る。一致しなければエラー（位置は戻す）。
    pub fn expect_keyword(&mut self, keyword: &[u8]) -> crate::error::Result<()> {
        let saved = self.pos;
        let token = self.read_token();
        if token == keyword {
            Ok(())
        } else {
            self.pos = saved;
            Err(self.error(format!(
                "expected '{}', found '{}'",
                String::from_utf8_lossy(keyword),
                String::from_utf8_lossy(token)
            )))
        }
    }

    /// 非負整数を読み取る。数字でなければ位置を戻して `None`。
    pub fn read_unsigned(&mut self) -> Option<u64> {
        let saved = self.pos;
        let token = self.read_token();
        if token.is_empty() || !token.iter().all(u8::is_ascii_digit) {
            self.pos = saved;
            return None;
        }
        match std::str::from_utf8(token).ok().and_then(|s| s.parse().ok()) {
            Some(v) => Some(v),
            None => {
                self.pos = saved;
                None
            }
        }
    }

    /// 直接オブジェクトを1つ読み取る。
    pub fn parse_object(&mut self) -> crate::error::Result<Object> {
        self.parse_value(0)
    }

    fn parse_value(&mut self, depth: usize) -> crate::error::Result<Object> {
        if depth > MAX_DEPTH {
            return Err(self.error("object nesting too deep"));
        }
        self.skip_whitespace();
        let Some(b) = self.peek() else {
            return Err(self.error("unexpected end of data"));
        };

        match b {
            b'/' => self.parse_name().map(Object::Name),
            b'(' => self.parse_literal_string(),
            b'<' if self.peek_at(1) == Some(b'<') => {
                self.parse_dictionary(depth).map(Object::Dictionary)
            }
            b'<' => self.parse_hex_string(),
            b'[' => self.parse_array(depth),
            b'0'..=b'9' | b'+' | b'-' | b'.' => self.parse_number_or_reference(),
            _ => {
                let token = self.read_token();
                match token {
                    b"true" => Ok(Object::Boolean(true)),
                    b"false" => Ok(Object::Boolean(false)),
                    b"null" => Ok(Object::Null),
                    b"" => {
                        let found = b as char;
                        self.pos += 1;
                        Err(self.error(format!("unexpected character '{found}'")))
                    }
                    other => Err(self.error(format!(
                        "unexpected token '{}'",
                        String::from_utf8_lossy(other)
                    ))),
                }
            }
        }
    }

    fn parse_name(&mut self) -> crate::error::Result<Vec<u8>> {
        // 先頭の '/' を読み飛ばす
        self.pos += 1;
        let mut name = Vec::new();
        while let Some(b) = self.peek() {
            if !is_regular(b) {
                break;
            }
            if b == b'#'
                && let (Some(h), Some(l)) = (self.peek_at(1), self.peek_at(2))
                && let (Some(hv), Some(lv)) = (hex_value(h), hex_value(l))
            {
                name.push(hv << 4 | lv);
                self.pos += 3;
                continue;
            }
            name.push(b);
            self.pos += 1;
        }
        Ok(name)
    }

    fn parse_literal_string(&mut self) -> crate::error::Result<Object> {
        self.pos += 1;
        let mut out = Vec::new();
        let mut nesting = 1usize;

        loop {
            let Some(b) = self.peek() else {
                return Err(self.error("unterminated literal string"));
            };
            self.pos += 1;
            match b {
                b'(' => {
                    nesting += 1;
                    out.push(b);
                }
                b')' => {
                    nesting -= 1;
                    if nesting == 0 {
                        break;
                    }
                    out.push(b);
                }
                b'\\' => {
                    let Some(e) = self.peek() else {
                        return Err(self.error("unterminated escape sequence"));
                    };
                    self.pos += 1;
                    match e {
                        b'n' => out.push(b'\n'),
                        b'r' => out.push(b'\r'),
                        b't' => out.push(b'\t'),
                        b'b' => out.push(0x08),
                        b'f' => out.push(0x0C),
                        b'(' | b')' | b'\\' => out.push(e),
                        b'\r' => {
                            // 行継続: \ + EOL は何も出力しない
                            if self.peek() == Some(b'\n') {
                                self.pos += 1;
                            }
                        }
                        b'\n' => {}
                        b'0'..=b'7' => {
                            let mut value = u32::from(e - b'0');
                            for _ in 0..2 {
                                match self.peek() {
                                    Some(d @ b'0'..=b'7') => {
                                        value = value * 8 + u32::from(d - b'0');
                                        self.pos += 1;
                                    }
                                    _ => break,
                                }
                            }
                            out.push((value & 0xFF) as u8);
                        }
                        // 未定義のエスケープはバックスラッシュを無視する
                        other => out.push(other),
                    }
                }
                b'\r' => {
                    // 文字列中の改行は LF に正規化する
                    if self.peek() == Some(b'\n') {
                        self.pos += 1;
                    }
                    out.push(b'\n');
                }
                other => out.push(other),
            }
        }

        Ok(Object::String(out, StringFormat::Literal))
    }

    fn parse_hex_string(&mut self) -> crate::error::Result<Object> {
        self.pos += 1;
        let mut digits = Vec::new();
        loop {
            let Some(b) = self.peek() else {
                return Err(self.error("unterminated hex string"));
            };
            self.pos += 1;
            if b == b'>' {
                break;
            }
            if is_whitespace(b) {
                continue;
            }
            let Some(v) = hex_value(b) else {
                return Err(self.error(format!("invalid hex digit '{}'", b as char)));
            };
            digits.push(v);
        }
        if digits.len() % 2 == 1 {
            digits.push(0);
        }
        let bytes = digits.chunks(2).map(|p| p[0] << 4 | p[1]).collect();
        Ok(Object::String(bytes, StringFormat::Hexadecimal))
    }

    fn parse_array(&mut self, depth: usize) -> crate::error::Result<Object> {
        self.pos += 1;
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                None => return Err(self.error("unterminated array")),
                Some(b']') => {
                    self.pos += 1;
                    break;
                }
                Some(_) => items.push(self.parse_value(depth + 1)?),
            }
        }
        Ok(Object::Array(items))
    }

    fn parse_dictionary(&mut self, depth: usize) -> crate::error::Result<Dictionary> {
        self.pos += 2;
        let mut dict = Dictionary::new();
        loop {
            self.skip_whitespace();
            if self.starts_with(b">>") {
                self.pos += 2;
                break;
            }
            match self.peek() {
                None => return Err(self.error("unterminated dictionary")),
                Some(b'/') => {}
                Some(_) => return Err(self.error("dictionary key must be a name")),
            }
            let key = self.parse_name()?;
            self.skip_whitespace();
            if self.starts_with(b">>") {
                // 値の欠けたキーは null とみなす
                dict.set(key, Object::Null);
                continue;
            }
            let value = self.parse_value(depth + 1)?;
            dict.set(key, value);
        }
        Ok(dict)
    }

    fn parse_number_or_reference(&mut self) -> crate::error::Result<Object> {
        let start = self.pos;
        let token = self.read_token();
        let text = std::str::from_utf8(token).map_err(|_| self.error("invalid number"))?;

        let digits = text.strip_prefix(['+', '-']).unwrap_or(text);
        let is_integer = !digits.is_empty() && digits.bytes().all(|c| c.is_ascii_digit());

        if is_integer && let Ok(value) = text.parse::<i64>() {
            // `N G R` 形式の参照を先読みする
            if value >= 0 && !text.starts_with(['+', '-']) {
                let after_first = self.pos;
                if let Some(generation) = self.read_unsigned() {
                    self.skip_whitespace();
                    if self.peek() == Some(b'R')
                        && self.peek_at(1).is_none_or(|c| !is_regular(c))
                        && let (Ok(id), Ok(generation)) =
                            (u32::try_from(value), u16::try_from(generation))
                    {
                        self.pos += 1;
                        return Ok(Object::Reference((id, generation)));
                    }
                }
                self.pos = after_first;
            }
            return Ok(Object::Integer(value));
        }

        // 実数（"4." や ".5"、"-.002" を含む）。"--5" のような壊れた表記は符号を1つに畳む。
        let normalized = if text.starts_with("--") {
            &text[1..]
        } else {
            text
        };
        match normalized.parse::<f64>() {
            Ok(v) => Ok(Object::Real(v as f32)),
            Err(_) => {
                self.pos = start;
                Err(self.error(format!("invalid number '{text}'")))
            }
        }
    }

    /// `N G obj ... endobj` 形式の間接オブジェクトを読み取る。
    ///
    /// ストリームの長さは `/Length` が直接整数で、その位置に `endstream` がある場合のみ
    /// 信頼する。それ以外（間接参照・不整合）は `endstream` を探索して決める。
    pub fn parse_indirect_object(&mut self) -> crate::error::Result<(ObjectId, Object)> {
        let id = self
            .read_unsigned()
            .ok_or_else(|| self.error("expected object number"))?;
        let generation = self
            .read_unsigned()
            .ok_or_else(|| self.error("expected generation number"))?;
        self.expect_keyword(b"obj")?;

        let id = u32::try_from(id).map_err(|_| self.error("object number out of range"))?;
        let generation =
            u16::try_from(generation).map_err(|_| self.error("generation out of range"))?;

        let mut value = self.parse_value(0)?;

        self.skip_whitespace();
        if let Object::Dictionary(dict) = &value
            && self.starts_with(b"stream")
        {
            self.pos += b"stream".len();
            let content = self.read_stream_body(dict)?;
            value = Object::Stream(Stream::new(dict.clone(), content));
        }

        // endobj の欠落は許容する
        let saved = self.pos;
        if self.read_token() != b"endobj" {
            self.pos = saved;
        }

        Ok(((id, generation), value))
    }

    fn read_stream_body(&mut self, dict: &Dictionary) -> crate::error::Result<Vec<u8>> {
        // "stream" 直後の EOL（CRLF / LF / 単独 CR）
        if self.starts_with(b"\r\n") {
            self.pos += 2;
        } else if matches!(self.peek(), Some(b'\n' | b'\r')) {
            self.pos += 1;
        }
        let start = self.pos;

        if let Ok(Object::Integer(len)) = dict.get(b"Length")
            && *len >= 0
            && let Some(end) = start.checked_add(*len as usize)
            && end <= self.buf.len()
        {
            let mut probe = Parser::new(self.buf, end);
            if probe.read_token() == b"endstream" {
                self.pos = probe.position();
                return Ok(self.buf[start..end].to_vec());
            }
        }

        let Some(marker) = find_bytes(self.buf, start, b"endstream") else {
            return Err(self.error("stream without endstream"));
        };
        let mut end = marker;
        if end > start && self.buf[end - 1] == b'\n' {
            end -= 1;
        }
        if end > start && self.buf[end - 1] == b'\r' {
            end -= 1;
        }
        self.pos = marker + b"endstream".len();
        Ok(self.buf[start..end].to_vec())
    }
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &[u8]) -> Object {
        Parser::new(src, 0).parse_object().expect("parse")
    }

    #[test]
    fn test_parse_nested_dictionary_with_reference() {
        let obj = parse(b"<< /Type /Page /Parent 3 0 R /MediaBox [0 0 612.5 792] /Res << /A null >> >>");
        let dict = obj.as_dict().unwrap();
        assert_eq!(dict.get(b"Type").unwrap(), &Object::Name(b"Page".to_vec()));
        assert_eq!(dict.get(b"Parent").unwrap(), &Object::Reference((3, 0)));
        let media_box = dict.get(b"MediaBox").unwrap().as_array().unwrap();
        assert_eq!(media_box[2], Object::Real(612.5));
        assert_eq!(media_box[3], Object::Integer(792));
    }

    #[test]
    fn test_integers_not_followed_by_r_stay_integers() {
        let obj = parse(b"[1 2 3 0 R 4]");
        let items = obj.as_array().unwrap();
        assert_eq!(
            items,
            &vec![
                Object::Integer(1),
                Object::Integer(2),
                Object::Reference((3, 0)),
                Object::Integer(4)
            ]
        );
    }

    #[test]
    fn test_literal_string_escapes() {
        let obj = parse(b"(a\\(b\\)c\\n\\101\\\r\nd (nested))");
        match obj {
            Object::String(bytes, StringFormat::Literal) => {
                assert_eq!(bytes, b"a(b)c\nAd (nested)".to_vec());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_hex_string_odd_length_is_padded() {
        let obj = parse(b"<48 65 6C6C 6F7>");
        match obj {
            Object::String(bytes, StringFormat::Hexadecimal) => {
                assert_eq!(bytes, b"Hello\x70".to_vec());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_name_with_hex_escape() {
        assert_eq!(parse(b"/A#20B"), Object::Name(b"A B".to_vec()));
    }

    #[test]
    fn test_real_numbers() {
        assert_eq!(parse(b"-.5"), Object::Real(-0.5));
        assert_eq!(parse(b"4."), Object::Real(4.0));
        assert_eq!(parse(b"-12"), Object::Integer(-12));
    }

    #[test]
    fn test_indirect_stream_with_wrong_length_uses_endstream() {
        let src = b"7 0 obj\n<< /Length 999 >>\nstream\r\nhello world\r\nendstream\nendobj\n";
        let (id, obj) = Parser::new(src, 0).parse_indirect_object().unwrap();
        assert_eq!(id, (7, 0));
        let stream = obj.as_stream().unwrap();
        assert_eq!(stream.content, b"hello world".to_vec());
        assert_eq!(stream.dict.get(b"Length").unwrap(), &Object::Integer(11));
    }

    #[test]
    fn test_indirect_stream_with_correct_length() {
        let src = b"2 0 obj << /Length 5 >> stream\nab\ncdendstream endobj";
        let (_, obj) = Parser::new(src, 0).parse_indirect_object().unwrap();
        assert_eq!(obj.as_stream().unwrap().content, b"ab\ncd".to_vec());
    }

    #[test]
    fn test_missing_value_before_dict_end_is_null() {
        let obj = parse(b"<< /A 1 /B >>");
        assert_eq!(obj.as_dict().unwrap().get(b"B").unwrap(), &Object::Null);
    }

    #[test]
    fn test_excessive_nesting_is_rejected() {
        let src = vec![b'['; MAX_DEPTH + 10];
        assert!(Parser::new(&src, 0).parse_object().is_err());
    }
}
