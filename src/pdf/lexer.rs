//! Byte-level tokenizer for PDF object syntax
//!
//! Reads direct objects (numbers, strings, names, arrays, dictionaries,
//! references) and the `N G obj` headers that introduce indirect objects.
//! Stream bodies are handled by the parser because their extent can depend
//! on an indirect `/Length`.

use crate::error::ParseError;
use crate::object::{Dictionary, Object, ObjectId, StringFormat};

/// Deepest array/dictionary nesting accepted before the input is rejected
const MAX_NESTING: usize = 256;

pub(crate) fn is_whitespace(byte: u8) -> bool {
    matches!(byte, b'\0' | b'\t' | b'\n' | b'\x0c' | b'\r' | b' ')
}

pub(crate) fn is_delimiter(byte: u8) -> bool {
    matches!(
        byte,
        b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
    )
}

pub(crate) fn is_regular(byte: u8) -> bool {
    !is_whitespace(byte) && !is_delimiter(byte)
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

pub(crate) struct Lexer<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn at(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn truncated(&self) -> ParseError {
        ParseError::TruncatedObject { offset: self.pos }
    }

    fn malformed(&self, reason: impl Into<String>) -> ParseError {
        ParseError::MalformedObject {
            offset: self.pos,
            reason: reason.into(),
        }
    }

    /// Skip whitespace and `%` comments
    pub fn skip_whitespace(&mut self) {
        while let Some(byte) = self.peek() {
            if is_whitespace(byte) {
                self.pos += 1;
            } else if byte == b'%' {
                while let Some(byte) = self.peek() {
                    if byte == b'\r' || byte == b'\n' {
                        break;
                    }
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
    }

    /// Consume `keyword` if it is the next token
    pub fn try_keyword(&mut self, keyword: &[u8]) -> bool {
        self.skip_whitespace();
        let end = self.pos + keyword.len();
        if self.data.get(self.pos..end) != Some(keyword) {
            return false;
        }
        if self.data.get(end).is_some_and(|&b| is_regular(b)) {
            return false;
        }
        self.pos = end;
        true
    }

    pub fn expect_keyword(&mut self, keyword: &[u8]) -> Result<(), ParseError> {
        if self.try_keyword(keyword) {
            Ok(())
        } else if self.pos >= self.data.len() {
            Err(self.truncated())
        } else {
            Err(self.malformed(format!(
                "expected `{}`",
                String::from_utf8_lossy(keyword)
            )))
        }
    }

    /// Run of regular characters at the cursor
    fn regular_token(&mut self) -> &'a [u8] {
        let start = self.pos;
        while self.peek().is_some_and(is_regular) {
            self.pos += 1;
        }
        &self.data[start..self.pos]
    }

    /// Unsigned decimal integer, leaving the cursor untouched on failure
    pub fn read_unsigned(&mut self) -> Option<u64> {
        self.skip_whitespace();
        let start = self.pos;
        let mut value: u64 = 0;
        while let Some(byte @ b'0'..=b'9') = self.peek() {
            value = value.checked_mul(10)?.checked_add(u64::from(byte - b'0'))?;
            self.pos += 1;
        }
        if self.pos == start || self.peek().is_some_and(is_regular) {
            self.pos = start;
            return None;
        }
        Some(value)
    }

    /// `N G obj` header of an indirect object
    pub fn read_object_header(&mut self) -> Result<ObjectId, ParseError> {
        let number = self.read_unsigned().ok_or_else(|| self.header_error())?;
        let generation = self.read_unsigned().ok_or_else(|| self.header_error())?;
        self.expect_keyword(b"obj")?;
        let number = u32::try_from(number).map_err(|_| self.malformed("object number too large"))?;
        let generation =
            u16::try_from(generation).map_err(|_| self.malformed("generation too large"))?;
        Ok(ObjectId::new(number, generation))
    }

    fn header_error(&self) -> ParseError {
        if self.pos >= self.data.len() {
            self.truncated()
        } else {
            self.malformed("expected object header")
        }
    }

    /// Parse one direct object
    pub fn read_object(&mut self) -> Result<Object, ParseError> {
        self.read_nested(0)
    }

    fn read_nested(&mut self, depth: usize) -> Result<Object, ParseError> {
        if depth > MAX_NESTING {
            return Err(self.malformed("nesting too deep"));
        }
        self.skip_whitespace();
        let byte = self.peek().ok_or_else(|| self.truncated())?;
        match byte {
            b'/' => self.read_name().map(Object::Name),
            b'(' => self.read_literal_string(),
            b'[' => self.read_array(depth),
            b'<' if self.data.get(self.pos + 1) == Some(&b'<') => {
                self.read_dictionary(depth).map(Object::Dictionary)
            }
            b'<' => self.read_hex_string(),
            b'+' | b'-' | b'.' | b'0'..=b'9' => self.read_number_or_reference(),
            _ => {
                let start = self.pos;
                let token = self.regular_token();
                match token {
                    b"true" => Ok(Object::Boolean(true)),
                    b"false" => Ok(Object::Boolean(false)),
                    b"null" => Ok(Object::Null),
                    _ => {
                        self.pos = start;
                        Err(self.malformed(format!(
                            "unexpected token `{}`",
                            String::from_utf8_lossy(&token[..token.len().min(32)])
                        )))
                    }
                }
            }
        }
    }

    fn read_number_or_reference(&mut self) -> Result<Object, ParseError> {
        let start = self.pos;
        let token = self.regular_token();
        let text = std::str::from_utf8(token).map_err(|_| self.malformed("bad number"))?;

        let is_plain_integer = token.iter().all(u8::is_ascii_digit);
        if is_plain_integer {
            let after_number = self.pos;
            if let Some(reference) = self.try_reference_tail(text) {
                return Ok(reference);
            }
            self.pos = after_number;
        }

        if !text.contains('.') {
            if let Ok(value) = text.parse::<i64>() {
                return Ok(Object::Integer(value));
            }
        }
        match text.parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(Object::Real(value)),
            // A lone sign or a bare dot reads as zero in every reader we know
            _ if matches!(text, "+" | "-" | "." | "-." | "+.") => Ok(Object::Integer(0)),
            _ => {
                self.pos = start;
                Err(self.malformed(format!("bad number `{text}`")))
            }
        }
    }

    /// After an integer, check for `G R`
    fn try_reference_tail(&mut self, number: &str) -> Option<Object> {
        let generation = self.read_unsigned()?;
        self.skip_whitespace();
        if self.peek() != Some(b'R') || self.data.get(self.pos + 1).is_some_and(|&b| is_regular(b))
        {
            return None;
        }
        self.pos += 1;
        let number = number.parse::<u32>().ok()?;
        let generation = u16::try_from(generation).ok()?;
        Some(Object::Reference(ObjectId::new(number, generation)))
    }

    fn read_name(&mut self) -> Result<Vec<u8>, ParseError> {
        self.pos += 1; // '/'
        let raw = self.regular_token();
        let mut name = Vec::with_capacity(raw.len());
        let mut i = 0;
        while i < raw.len() {
            if raw[i] == b'#' && i + 2 < raw.len() {
                if let (Some(hi), Some(lo)) = (hex_value(raw[i + 1]), hex_value(raw[i + 2])) {
                    name.push(hi << 4 | lo);
                    i += 3;
                    continue;
                }
            }
            name.push(raw[i]);
            i += 1;
        }
        Ok(name)
    }

    fn read_literal_string(&mut self) -> Result<Object, ParseError> {
        self.pos += 1; // '('
        let mut out = Vec::new();
        let mut depth = 1usize;
        loop {
            let byte = self.peek().ok_or_else(|| self.truncated())?;
            self.pos += 1;
            match byte {
                b'(' => {
                    depth += 1;
                    out.push(byte);
                }
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                    out.push(byte);
                }
                b'\r' => {
                    if self.peek() == Some(b'\n') {
                        self.pos += 1;
                    }
                    out.push(b'\n');
                }
                b'\\' => self.read_escape(&mut out)?,
                _ => out.push(byte),
            }
        }
        Ok(Object::String(out, StringFormat::Literal))
    }

    fn read_escape(&mut self, out: &mut Vec<u8>) -> Result<(), ParseError> {
        let byte = self.peek().ok_or_else(|| self.truncated())?;
        self.pos += 1;
        match byte {
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'0'..=b'7' => {
                let mut value = u32::from(byte - b'0');
                for _ in 0..2 {
                    match self.peek() {
                        Some(digit @ b'0'..=b'7') => {
                            value = value * 8 + u32::from(digit - b'0');
                            self.pos += 1;
                        }
                        _ => break,
                    }
                }
                out.push((value & 0xff) as u8);
            }
            // Line continuation
            b'\r' => {
                if self.peek() == Some(b'\n') {
                    self.pos += 1;
                }
            }
            b'\n' => {}
            other => out.push(other),
        }
        Ok(())
    }

    fn read_hex_string(&mut self) -> Result<Object, ParseError> {
        self.pos += 1; // '<'
        let mut out = Vec::new();
        let mut pending: Option<u8> = None;
        loop {
            let byte = self.peek().ok_or_else(|| self.truncated())?;
            self.pos += 1;
            if byte == b'>' {
                break;
            }
            if is_whitespace(byte) {
                continue;
            }
            let nibble = hex_value(byte).ok_or_else(|| self.malformed("bad hex digit"))?;
            match pending.take() {
                Some(high) => out.push(high << 4 | nibble),
                None => pending = Some(nibble),
            }
        }
        if let Some(high) = pending {
            out.push(high << 4);
        }
        Ok(Object::String(out, StringFormat::Hexadecimal))
    }

    fn read_array(&mut self, depth: usize) -> Result<Object, ParseError> {
        self.pos += 1; // '['
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                None => return Err(self.truncated()),
                Some(b']') => {
                    self.pos += 1;
                    return Ok(Object::Array(items));
                }
                Some(_) => items.push(self.read_nested(depth + 1)?),
            }
        }
    }

    pub fn read_dictionary(&mut self, depth: usize) -> Result<Dictionary, ParseError> {
        self.skip_whitespace();
        if self.data.get(self.pos..self.pos + 2) != Some(b"<<") {
            return Err(self.malformed("expected `<<`"));
        }
        self.pos += 2;
        let mut dict = Dictionary::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                None => return Err(self.truncated()),
                Some(b'>') if self.data.get(self.pos + 1) == Some(&b'>') => {
                    self.pos += 2;
                    return Ok(dict);
                }
                Some(b'/') => {
                    let key = self.read_name()?;
                    let value = self.read_nested(depth + 1)?;
                    dict.set(key, value);
                }
                Some(_) => return Err(self.malformed("dictionary key is not a name")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(src: &str) -> Object {
        Lexer::new(src.as_bytes()).read_object().unwrap()
    }

    #[test]
    fn test_numbers_and_references() {
        assert_eq!(read("42"), Object::Integer(42));
        assert_eq!(read("-3.5"), Object::Real(-3.5));
        assert_eq!(read(".25"), Object::Real(0.25));
        assert_eq!(read("12 0 R"), Object::Reference(ObjectId::new(12, 0)));
        assert_eq!(
            read("[1 2 R 3]"),
            Object::Array(vec![
                Object::Reference(ObjectId::new(1, 2)),
                Object::Integer(3),
            ])
        );
        assert_eq!(
            read("[0 0 612 792]"),
            Object::Array(vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(612),
                Object::Integer(792),
            ])
        );
    }

    #[test]
    fn test_strings() {
        assert_eq!(
            read(r"(a\(b\)c\n\101 (nested))"),
            Object::String(b"a(b)c\nA (nested)".to_vec(), StringFormat::Literal)
        );
        assert_eq!(
            read("<48 65 6C6C 6F7>"),
            Object::String(b"Hellop".to_vec(), StringFormat::Hexadecimal)
        );
    }

    #[test]
    fn test_names_with_escapes() {
        assert_eq!(read("/A#20B"), Object::Name(b"A B".to_vec()));
        assert_eq!(read("/Type"), Object::name("Type"));
    }

    #[test]
    fn test_dictionary_with_comment() {
        let obj = read("<< /Type /Page % a comment\n /Count 3 /Kids [4 0 R] >>");
        let dict = obj.as_dict().unwrap();
        assert!(dict.has_type(b"Page"));
        assert_eq!(dict.get(b"Count"), Some(&Object::Integer(3)));
    }

    #[test]
    fn test_object_header() {
        let mut lexer = Lexer::new(b"  7 0 obj\n<<>>\nendobj");
        assert_eq!(lexer.read_object_header().unwrap(), ObjectId::new(7, 0));
        assert!(lexer.read_object().unwrap().as_dict().unwrap().is_empty());
        assert!(lexer.try_keyword(b"endobj"));
    }

    #[test]
    fn test_truncated_and_malformed() {
        assert!(matches!(
            Lexer::new(b"<< /A [1 2").read_object(),
            Err(ParseError::TruncatedObject { .. })
        ));
        assert!(matches!(
            Lexer::new(b"<< 1 2 >>").read_object(),
            Err(ParseError::MalformedObject { .. })
        ));
    }

    #[test]
    fn test_nesting_limit() {
        let deep = "[".repeat(MAX_NESTING + 10);
        assert!(matches!(
            Lexer::new(deep.as_bytes()).read_object(),
            Err(ParseError::MalformedObject { .. })
        ));
    }

    #[test]
    fn test_keyword_boundaries() {
        let mut lexer = Lexer::new(b"endobjx");
        assert!(!lexer.try_keyword(b"endobj"));
        let mut lexer = Lexer::new(b"stream\r\n");
        assert!(lexer.try_keyword(b"stream"));
    }
}
