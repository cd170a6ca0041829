//! DOCX text extraction
//!
//! A DOCX file is a zip archive whose body lives in `word/document.xml`.
//! Paragraphs become blocks separated by blank lines; text runs inside a
//! paragraph are concatenated. Formatting is dropped, but external
//! hyperlinks keep their target, rendered as `text (url)`, so cited sources
//! stay visible to the evaluator.
//!
//! Paragraphs nested inside another paragraph (text boxes) are emitted as
//! their own blocks ahead of the paragraph that contains them.

use regex::Regex;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;
use zip::result::ZipError;

const DOCUMENT_XML: &str = "word/document.xml";
const DOCUMENT_RELS: &str = "word/_rels/document.xml.rels";

/// Relationship id → external hyperlink target
pub type HyperlinkTargets = HashMap<String, String>;

/// DOCX read errors
#[derive(Debug, Error)]
pub enum DocxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not a DOCX archive: {0}")]
    Archive(#[from] ZipError),
}

/// Paragraph, hyperlink and break tags, or a text run with its content
fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"<w:t(?:\s[^>]*)?>([^<]*)</w:t>|<(/?)w:(p|hyperlink|tab|br|cr)((?:\s[^>]*?)?)(/?)>"#,
        )
        .expect("valid token regex")
    })
}

fn attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"([\w:]+)\s*=\s*"([^"]*)""#).expect("valid attribute regex"))
}

fn relationship_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"<Relationship\s([^>]*?)/?>"#).expect("valid relationship regex"))
}

fn query_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)query\s+(\d+)").expect("valid marker regex"))
}

fn decode(text: &str) -> String {
    html_escape::decode_html_entities(text).into_owned()
}

fn attribute(attrs: &str, name: &str) -> Option<String> {
    attr_re()
        .captures_iter(attrs)
        .find(|c| &c[1] == name)
        .map(|c| decode(&c[2]))
}

/// Read a DOCX file and return its plain text
pub fn extract_text(path: &Path) -> Result<String, DocxError> {
    let file = File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)?;

    let mut xml = String::new();
    archive.by_name(DOCUMENT_XML)?.read_to_string(&mut xml)?;

    let links = match archive.by_name(DOCUMENT_RELS) {
        Ok(mut entry) => {
            let mut rels = String::new();
            entry.read_to_string(&mut rels)?;
            hyperlink_targets(&rels)
        }
        Err(ZipError::FileNotFound) => HyperlinkTargets::new(),
        Err(e) => return Err(e.into()),
    };

    Ok(document_xml_to_text(&xml, &links))
}

/// External hyperlink targets from `word/_rels/document.xml.rels`
pub fn hyperlink_targets(rels_xml: &str) -> HyperlinkTargets {
    relationship_re()
        .captures_iter(rels_xml)
        .filter_map(|c| {
            let attrs = &c[1];
            let kind = attribute(attrs, "Type")?;
            if !kind.ends_with("/hyperlink") {
                return None;
            }
            Some((attribute(attrs, "Id")?, attribute(attrs, "Target")?))
        })
        .collect()
}

/// Open hyperlink: its target and where its text starts in the paragraph
struct OpenLink {
    target: Option<String>,
    start: usize,
}

/// Convert the body of `word/document.xml` to plain text
pub fn document_xml_to_text(xml: &str, links: &HyperlinkTargets) -> String {
    let mut blocks = Vec::new();
    let mut open: Vec<String> = Vec::new();
    let mut link_stack: Vec<OpenLink> = Vec::new();

    for token in token_re().captures_iter(xml) {
        if let Some(text) = token.get(1) {
            if let Some(para) = open.last_mut() {
                para.push_str(&decode(text.as_str()));
            }
            continue;
        }

        let closing = !token[2].is_empty();
        let self_closing = !token[5].is_empty();
        let attrs = token.get(4).map(|m| m.as_str()).unwrap_or("");

        match (&token[3], closing) {
            ("p", false) if !self_closing => open.push(String::new()),
            ("p", true) => {
                if let Some(para) = open.pop() {
                    if !para.trim().is_empty() {
                        blocks.push(para);
                    }
                }
            }
            ("hyperlink", false) if !self_closing => link_stack.push(OpenLink {
                target: attribute(attrs, "r:id").and_then(|id| links.get(&id).cloned()),
                start: open.last().map(String::len).unwrap_or(0),
            }),
            ("hyperlink", true) => {
                let (Some(link), Some(para)) = (link_stack.pop(), open.last_mut()) else {
                    continue;
                };
                let Some(target) = link.target else {
                    continue;
                };
                let label = para.get(link.start..).unwrap_or("").trim();
                let rendered = if label.is_empty() {
                    target
                } else if label == target {
                    continue;
                } else {
                    format!(" ({})", target)
                };
                para.push_str(&rendered);
            }
            ("tab", false) => {
                if let Some(para) = open.last_mut() {
                    para.push('\t');
                }
            }
            ("br", false) | ("cr", false) => {
                if let Some(para) = open.last_mut() {
                    para.push('\n');
                }
            }
            _ => {}
        }
    }

    blocks.join("\n\n")
}

/// Cut the `Query <n>` section out of a multi-query document
///
/// The section runs from its marker to the next marker (or the end). When
/// the document has no markers, or none for `query_num`, the whole text is
/// returned.
pub fn extract_query_section(text: &str, query_num: u32) -> &str {
    let markers: Vec<(usize, Option<u32>)> = query_marker_re()
        .captures_iter(text)
        .filter_map(|c| {
            let whole = c.get(0)?;
            let num = c.get(1).and_then(|m| m.as_str().parse::<u32>().ok());
            Some((whole.start(), num))
        })
        .collect();

    let Some(idx) = markers.iter().position(|(_, n)| *n == Some(query_num)) else {
        return text;
    };

    let start = markers[idx].0;
    let end = markers.get(idx + 1).map(|(pos, _)| *pos).unwrap_or(text.len());
    text[start..end].trim_end()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(xml: &str) -> String {
        document_xml_to_text(xml, &HyperlinkTargets::new())
    }

    #[test]
    fn test_paragraphs_and_runs() {
        let xml = r#"<w:document><w:body>
            <w:p w:rsidR="00A1"><w:pPr><w:pStyle w:val="Heading1"/></w:pPr><w:r><w:t>Query 1</w:t></w:r></w:p>
            <w:p><w:r><w:t xml:space="preserve">Start with </w:t></w:r><w:r><w:rPr><w:b/></w:rPr><w:t>metformin</w:t></w:r></w:p>
            <w:p w:rsidR="00A2"/>
            <w:p><w:r><w:t>a</w:t><w:tab/><w:t>b</w:t><w:br/><w:t>c</w:t></w:r></w:p>
            <w:tbl><w:tr><w:tc><w:p><w:proofErr w:type="spellStart"/><w:r><w:t>cell</w:t></w:r></w:p></w:tc></w:tr></w:tbl>
        </w:body></w:document>"#;

        assert_eq!(text(xml), "Query 1\n\nStart with metformin\n\na\tb\nc\n\ncell");
    }

    #[test]
    fn test_entities_decoded() {
        let xml = r#"<w:p><w:r><w:t>a &lt; b &amp;&amp; c &gt; d &quot;x&apos; &#65;&#x42;</w:t></w:r></w:p>"#;
        assert_eq!(text(xml), "a < b && c > d \"x' AB");
    }

    #[test]
    fn test_text_box_keeps_surrounding_text() {
        let xml = r#"<w:p><w:r><w:t>Before</w:t></w:r><w:r><w:pict><w:txbxContent><w:p><w:r><w:t>Inner</w:t></w:r></w:p></w:txbxContent></w:pict></w:r><w:r><w:t>After</w:t></w:r></w:p><w:p><w:r><w:t>Next</w:t></w:r></w:p>"#;
        assert_eq!(text(xml), "Inner\n\nBeforeAfter\n\nNext");
    }

    #[test]
    fn test_hyperlink_targets_from_relationships() {
        let rels = r#"<?xml version="1.0"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
            <Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/>
            <Relationship Id="rId5" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/hyperlink" Target="https://example.org/guide?a=1&amp;b=2" TargetMode="External"/>
        </Relationships>"#;

        let links = hyperlink_targets(rels);
        assert_eq!(links.len(), 1);
        assert_eq!(links["rId5"], "https://example.org/guide?a=1&b=2");
    }

    #[test]
    fn test_hyperlink_rendered_with_target() {
        let mut links = HyperlinkTargets::new();
        links.insert("rId5".to_string(), "https://example.org/ada".to_string());
        links.insert("rId6".to_string(), "https://example.org/bare".to_string());

        let xml = r#"<w:p><w:r><w:t xml:space="preserve">See </w:t></w:r><w:hyperlink r:id="rId5" w:history="1"><w:r><w:t>ADA guidance</w:t></w:r></w:hyperlink><w:r><w:t>.</w:t></w:r></w:p>
            <w:p><w:hyperlink r:id="rId6"></w:hyperlink><w:hyperlink w:anchor="_Toc1"><w:r><w:t>Section 2</w:t></w:r></w:hyperlink></w:p>
            <w:p><w:hyperlink r:id="rId5"><w:r><w:t>https://example.org/ada</w:t></w:r></w:hyperlink></w:p>"#;

        assert_eq!(
            document_xml_to_text(xml, &links),
            "See ADA guidance (https://example.org/ada).\n\nhttps://example.org/bareSection 2\n\nhttps://example.org/ada"
        );
    }

    #[test]
    fn test_query_section_middle() {
        let text = "Intro\n\nQuery 1\n\nAnswer one\n\nQuery 2\n\nAnswer two\n\nQuery 3\n\nAnswer three";
        assert_eq!(extract_query_section(text, 2), "Query 2\n\nAnswer two");
    }

    #[test]
    fn test_query_section_last_runs_to_end() {
        let text = "Query 25\n\nA\n\nquery 26\n\nB\n";
        assert_eq!(extract_query_section(text, 26), "query 26\n\nB");
    }

    #[test]
    fn test_query_section_missing_returns_whole() {
        let text = "Query 1\n\nA";
        assert_eq!(extract_query_section(text, 7), text);
        assert_eq!(extract_query_section("no markers", 1), "no markers");
    }
}
