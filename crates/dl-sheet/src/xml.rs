//! Escaping and a small pull scanner for the XML dialects we read.
//!
//! The scanner understands start/end/empty tags, attributes, text, CDATA,
//! comments, processing instructions, and DOCTYPE. It does not validate
//! nesting; callers track the elements they care about by local name.

use std::borrow::Cow;

use dl_common::{Error, Result};

/// Escape `& < > " '` for use in text and attribute values.
pub fn escape(text: &str) -> Cow<'_, str> {
    if !text.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len() + 16);
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    Cow::Owned(out)
}

/// Resolve the predefined entities and numeric character references.
/// Unknown or broken references are kept literally.
pub fn unescape(text: &str) -> Cow<'_, str> {
    if !text.contains('&') {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let resolved = tail.find(';').and_then(|semi| {
            let entity = &tail[1..semi];
            let ch = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                    .and_then(char::from_u32),
            };
            ch.map(|c| (c, semi))
        });
        match resolved {
            Some((ch, semi)) => {
                out.push(ch);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

/// Strip a namespace prefix: `x:row` becomes `row`.
pub fn local_name(qualified: &str) -> &str {
    qualified.rsplit(':').next().unwrap_or(qualified)
}

/// A start or empty-element tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag<'a> {
    pub name: &'a str,
    attrs: Vec<(&'a str, Cow<'a, str>)>,
    pub self_closing: bool,
}

impl<'a> Tag<'a> {
    pub fn local_name(&self) -> &'a str {
        local_name(self.name)
    }

    pub fn is(&self, local: &str) -> bool {
        self.local_name() == local
    }

    /// Attribute by exact qualified name, falling back to local name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| *key == name)
            .or_else(|| self.attrs.iter().find(|(key, _)| local_name(key) == name))
            .map(|(_, value)| value.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum XmlEvent<'a> {
    Start(Tag<'a>),
    End(&'a str),
    Text(Cow<'a, str>),
}

/// Pull scanner over a document.
#[derive(Debug)]
pub struct XmlReader<'a> {
    input: &'a str,
    pos: usize,
    failed: bool,
}

fn malformed(message: impl Into<String>) -> Error {
    Error::MalformedImport(format!("malformed XML: {}", message.into()))
}

impl<'a> XmlReader<'a> {
    pub fn new(input: &'a str) -> Self {
        XmlReader {
            input,
            pos: 0,
            failed: false,
        }
    }

    fn skip_past(&mut self, terminator: &str, what: &str) -> Result<&'a str> {
        let rest = &self.input[self.pos..];
        match rest.find(terminator) {
            Some(end) => {
                self.pos += end + terminator.len();
                Ok(&rest[..end])
            }
            None => Err(malformed(format!("unterminated {}", what))),
        }
    }

    fn next_event(&mut self) -> Result<Option<XmlEvent<'a>>> {
        loop {
            let rest = &self.input[self.pos..];
            if rest.is_empty() {
                return Ok(None);
            }
            if !rest.starts_with('<') {
                let end = rest.find('<').unwrap_or(rest.len());
                self.pos += end;
                return Ok(Some(XmlEvent::Text(unescape(&rest[..end]))));
            }
            if rest.starts_with("<!--") {
                self.pos += 4;
                self.skip_past("-->", "comment")?;
                continue;
            }
            if rest.starts_with("<![CDATA[") {
                self.pos += 9;
                let text = self.skip_past("]]>", "CDATA section")?;
                return Ok(Some(XmlEvent::Text(Cow::Borrowed(text))));
            }
            if rest.starts_with("<?") {
                self.pos += 2;
                self.skip_past("?>", "processing instruction")?;
                continue;
            }
            if rest.starts_with("<!") {
                self.pos += 2;
                self.skip_past(">", "declaration")?;
                continue;
            }
            if let Some(after) = rest.strip_prefix("</") {
                self.pos += 2;
                self.skip_past(">", "end tag")?;
                let end = after.find('>').unwrap_or(after.len());
                return Ok(Some(XmlEvent::End(after[..end].trim())));
            }
            self.pos += 1;
            return self.start_tag().map(Some);
        }
    }

    fn start_tag(&mut self) -> Result<XmlEvent<'a>> {
        let input = self.input;
        let bytes = input.as_bytes();
        let name_start = self.pos;
        while self.pos < bytes.len()
            && !bytes[self.pos].is_ascii_whitespace()
            && bytes[self.pos] != b'>'
            && bytes[self.pos] != b'/'
        {
            self.pos += 1;
        }
        let name = &input[name_start..self.pos];
        if name.is_empty() {
            return Err(malformed("empty tag name"));
        }

        let mut attrs = Vec::new();
        loop {
            while self.pos < bytes.len() && bytes[self.pos].is_ascii_whitespace() {
                self.pos += 1;
            }
            match bytes.get(self.pos) {
                None => return Err(malformed(format!("unterminated tag <{}>", name))),
                Some(b'>') => {
                    self.pos += 1;
                    return Ok(XmlEvent::Start(Tag {
                        name,
                        attrs,
                        self_closing: false,
                    }));
                }
                Some(b'/') => {
                    if bytes.get(self.pos + 1) != Some(&b'>') {
                        return Err(malformed(format!("stray '/' in <{}>", name)));
                    }
                    self.pos += 2;
                    return Ok(XmlEvent::Start(Tag {
                        name,
                        attrs,
                        self_closing: true,
                    }));
                }
                Some(_) => {}
            }

            let key_start = self.pos;
            while self.pos < bytes.len()
                && !bytes[self.pos].is_ascii_whitespace()
                && !matches!(bytes[self.pos], b'=' | b'>' | b'/')
            {
                self.pos += 1;
            }
            let key = &input[key_start..self.pos];
            while self.pos < bytes.len() && bytes[self.pos].is_ascii_whitespace() {
                self.pos += 1;
            }
            if bytes.get(self.pos) != Some(&b'=') {
                return Err(malformed(format!("attribute {:?} without value", key)));
            }
            self.pos += 1;
            while self.pos < bytes.len() && bytes[self.pos].is_ascii_whitespace() {
                self.pos += 1;
            }
            let quote = match bytes.get(self.pos) {
                Some(&q @ (b'"' | b'\'')) => q,
                _ => return Err(malformed(format!("unquoted attribute {:?}", key))),
            };
            self.pos += 1;
            let value_start = self.pos;
            let Some(len) = input[value_start..].find(quote as char) else {
                return Err(malformed(format!("unterminated attribute {:?}", key)));
            };
            self.pos = value_start + len + 1;
            attrs.push((key, unescape(&input[value_start..value_start + len])));
        }
    }
}

impl<'a> Iterator for XmlReader<'a> {
    type Item = Result<XmlEvent<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_event() {
            Ok(event) => event.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(input: &str) -> Vec<XmlEvent<'_>> {
        XmlReader::new(input).collect::<Result<Vec<_>>>().unwrap()
    }

    #[test]
    fn test_escape_roundtrip() {
        let raw = r#"a<b>&"c"'d'"#;
        let escaped = escape(raw);
        assert_eq!(escaped, "a&lt;b&gt;&amp;&quot;c&quot;&apos;d&apos;");
        assert_eq!(unescape(&escaped), raw);
        assert!(matches!(escape("plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_unescape_numeric_and_unknown() {
        assert_eq!(unescape("&#65;&#x42;&#X43;"), "ABC");
        assert_eq!(unescape("&nbsp; & done"), "&nbsp; & done");
    }

    #[test]
    fn test_scans_tags_attributes_and_text() {
        let doc = r#"<?xml version="1.0"?><!-- c --><x:row r="2" t='s'><c/>a &amp; b<![CDATA[<raw>]]></x:row>"#;
        let evs = events(doc);
        assert_eq!(evs.len(), 5);
        match &evs[0] {
            XmlEvent::Start(tag) => {
                assert!(tag.is("row"));
                assert_eq!(tag.attr("r"), Some("2"));
                assert_eq!(tag.attr("t"), Some("s"));
                assert!(!tag.self_closing);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(&evs[1], XmlEvent::Start(tag) if tag.self_closing));
        assert_eq!(evs[2], XmlEvent::Text(Cow::Borrowed("a & b")));
        assert_eq!(evs[3], XmlEvent::Text(Cow::Borrowed("<raw>")));
        assert_eq!(evs[4], XmlEvent::End("x:row"));
    }

    #[test]
    fn test_attr_prefers_qualified_name() {
        let evs = events(r#"<sheet name="A" r:id="rId1"/>"#);
        let XmlEvent::Start(tag) = &evs[0] else {
            panic!("expected start tag");
        };
        assert_eq!(tag.attr("r:id"), Some("rId1"));
        assert_eq!(tag.attr("id"), Some("rId1"));
        assert_eq!(tag.attr("missing"), None);
    }

    #[test]
    fn test_malformed_input_reports_once() {
        let mut reader = XmlReader::new("<a b=1>");
        assert!(matches!(reader.next(), Some(Err(Error::MalformedImport(_)))));
        assert!(reader.next().is_none());
        assert!(XmlReader::new("<a").collect::<Result<Vec<_>>>().is_err());
    }
}
