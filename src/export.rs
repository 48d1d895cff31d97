use std::io::Write;

use thiserror::Error;

use crate::styles::transform::clear_formatting;

const PAGE_WIDTH: u32 = 595;
const PAGE_HEIGHT: u32 = 842;
const FONT_SIZE: u32 = 12;
const LEADING: u32 = 20;
const MARGIN_LEFT: u32 = 50;
const START_Y: u32 = 800;
const MIN_Y: u32 = 50;
const MAX_LINE_CHARS: usize = 100;

#[derive(Debug, Error)]
pub enum PdfError {
    #[error("nothing to export")]
    Empty,
    #[error("failed to write pdf: {0}")]
    Io(#[from] std::io::Error),
}

/// Latin-1 bytes of one line, escaped for a PDF literal string.
fn encode_line(line: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(line.len());
    for ch in line.chars().take(MAX_LINE_CHARS) {
        match ch {
            '\\' | '(' | ')' => {
                out.push(b'\\');
                out.push(ch as u8);
            }
            '\t' => out.push(b' '),
            ch if (ch as u32) < 0x20 => {}
            ch if (ch as u32) <= 0xFF => out.push(ch as u32 as u8),
            _ => out.push(b'?'),
        }
    }
    out
}

fn paginate(text: &str) -> Vec<Vec<&str>> {
    let lines_per_page = ((START_Y - MIN_Y) / LEADING + 1) as usize;
    let lines: Vec<&str> = text.split('\n').map(|line| line.trim_end_matches('\r')).collect();
    lines
        .chunks(lines_per_page)
        .map(|chunk| chunk.to_vec())
        .collect()
}

fn content_stream(lines: &[&str]) -> Result<Vec<u8>, PdfError> {
    let mut stream = Vec::new();
    write!(stream, "BT\n/F1 {FONT_SIZE} Tf\n{LEADING} TL\n{MARGIN_LEFT} {START_Y} Td\n")?;
    for (index, line) in lines.iter().enumerate() {
        if index > 0 {
            stream.extend_from_slice(b"T*\n");
        }
        stream.push(b'(');
        stream.extend_from_slice(&encode_line(line));
        stream.extend_from_slice(b") Tj\n");
    }
    stream.extend_from_slice(b"ET\n");
    Ok(stream)
}

struct PdfWriter {
    buffer: Vec<u8>,
    offsets: Vec<usize>,
}

impl PdfWriter {
    fn new() -> Self {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n");
        PdfWriter {
            buffer,
            offsets: Vec::new(),
        }
    }

    /// Objects must be written in id order starting at 1.
    fn object(&mut self, id: usize, body: &[u8]) -> Result<(), PdfError> {
        debug_assert_eq!(id, self.offsets.len() + 1);
        self.offsets.push(self.buffer.len());
        write!(self.buffer, "{id} 0 obj\n")?;
        self.buffer.extend_from_slice(body);
        self.buffer.extend_from_slice(b"\nendobj\n");
        Ok(())
    }

    fn finish(mut self) -> Result<Vec<u8>, PdfError> {
        let xref_offset = self.buffer.len();
        let count = self.offsets.len() + 1;
        write!(self.buffer, "xref\n0 {count}\n0000000000 65535 f \n")?;
        for offset in &self.offsets {
            write!(self.buffer, "{offset:010} 00000 n \n")?;
        }
        write!(
            self.buffer,
            "trailer\n<< /Size {count} /Root 1 0 R >>\nstartxref\n{xref_offset}\n%%EOF\n"
        )?;
        Ok(self.buffer)
    }
}

/// Renders plain text onto A4 pages in 12pt Helvetica.
pub fn render_pdf(text: &str) -> Result<Vec<u8>, PdfError> {
    if text.trim().is_empty() {
        return Err(PdfError::Empty);
    }

    let pages = paginate(text);
    // 1 catalog, 2 page tree, 3 font, then a (page, contents) pair per page.
    let page_ids: Vec<usize> = (0..pages.len()).map(|index| 4 + index * 2).collect();

    let mut writer = PdfWriter::new();
    writer.object(1, b"<< /Type /Catalog /Pages 2 0 R >>")?;

    let kids = page_ids
        .iter()
        .map(|id| format!("{id} 0 R"))
        .collect::<Vec<_>>()
        .join(" ");
    writer.object(
        2,
        format!("<< /Type /Pages /Kids [{kids}] /Count {} >>", pages.len()).as_bytes(),
    )?;
    writer.object(
        3,
        b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>",
    )?;

    for (page, page_id) in pages.iter().zip(&page_ids) {
        let contents_id = page_id + 1;
        writer.object(
            *page_id,
            format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {PAGE_WIDTH} {PAGE_HEIGHT}] \
                 /Resources << /Font << /F1 3 0 R >> >> /Contents {contents_id} 0 R >>"
            )
            .as_bytes(),
        )?;

        let stream = content_stream(page)?;
        let mut body = Vec::with_capacity(stream.len() + 64);
        write!(body, "<< /Length {} >>\nstream\n", stream.len())?;
        body.extend_from_slice(&stream);
        body.extend_from_slice(b"endstream");
        writer.object(contents_id, &body)?;
    }

    writer.finish()
}

/// Styled results are HTML; the document gets the visible text only.
pub fn plain_text_for_export(html: &str) -> String {
    clear_formatting(html)
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_text(pdf: &[u8]) -> String {
        String::from_utf8_lossy(pdf).into_owned()
    }

    #[test]
    fn empty_text_is_rejected() {
        assert!(matches!(render_pdf("  \n "), Err(PdfError::Empty)));
    }

    #[test]
    fn document_has_header_trailer_and_valid_xref() {
        let pdf = render_pdf("Hello").unwrap();
        let text = as_text(&pdf);
        assert!(text.starts_with("%PDF-1.4"));
        assert!(text.trim_end().ends_with("%%EOF"));

        let startxref: usize = text
            .rsplit("startxref\n")
            .next()
            .and_then(|tail| tail.lines().next())
            .and_then(|line| line.parse().ok())
            .unwrap();
        assert!(pdf[startxref..].starts_with(b"xref"));

        let first_entry = text.split("0000000000 65535 f \n").nth(1).unwrap();
        let offset: usize = first_entry[..10].parse().unwrap();
        assert!(pdf[offset..].starts_with(b"1 0 obj"));
    }

    #[test]
    fn long_text_spills_onto_new_pages() {
        let text = vec!["line"; 39].join("\n");
        let pdf = as_text(&render_pdf(&text).unwrap());
        assert!(pdf.contains("/Count 2"));

        let text = vec!["line"; 38].join("\n");
        let pdf = as_text(&render_pdf(&text).unwrap());
        assert!(pdf.contains("/Count 1"));
    }

    #[test]
    fn lines_are_escaped_truncated_and_latin1() {
        assert_eq!(encode_line("a(b)c\\"), b"a\\(b\\)c\\\\".to_vec());
        assert_eq!(encode_line("Привет é"), b"?????? \xE9".to_vec());
        assert_eq!(encode_line(&"x".repeat(150)).len(), MAX_LINE_CHARS);
    }

    #[test]
    fn export_text_drops_markup() {
        assert_eq!(
            plain_text_for_export("🚨 <b>a &lt;b&gt; &amp; c</b> 🚨"),
            "🚨 a <b> & c 🚨"
        );
    }
}
