//! Conversion of uploaded files into compact plain text.
//!
//! Supported formats are `.txt`, `.csv`, `.html` and `.htm`. Every format is
//! reduced to non-blank, trimmed lines joined with `\n`, which is what the
//! chunker expects.

use anyhow::{bail, Context, Result};
use scraper::node::Node;
use scraper::{ElementRef, Html};
use std::path::Path;

const NOISE_TAGS: [&str; 7] = ["script", "style", "noscript", "nav", "footer", "header", "aside"];
const NOISE_MARKERS: [&str; 4] = ["cookie", "consent", "modal", "popup"];

/// Lowercase extension without the leading dot, or `""`.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

pub fn is_supported(ext: &str) -> bool {
    matches!(ext, "txt" | "csv" | "html" | "htm")
}

/// Load `path` and return its normalized text.
pub fn preprocess_file(path: &Path) -> Result<String> {
    let ext = extension_of(path);
    if !is_supported(&ext) {
        tracing::error!(path = %path.display(), "unsupported file extension");
        bail!("Unsupported file extension: .{}", ext);
    }

    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let raw = String::from_utf8_lossy(&bytes);

    match ext.as_str() {
        "txt" => Ok(clean_text(&raw)),
        "csv" => preprocess_csv(&raw),
        _ => Ok(preprocess_html(&raw)),
    }
}

fn clean_text(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// One line per row: `header: value | header: value`, skipping empty cells.
fn preprocess_csv(raw: &str) -> Result<String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(raw.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .context("Failed to read CSV header row")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.context("Failed to read CSV row")?;
        let pairs: Vec<String> = record
            .iter()
            .enumerate()
            .filter_map(|(idx, cell)| {
                let value = cell.trim();
                if value.is_empty() {
                    return None;
                }
                let label = match headers.get(idx) {
                    Some(h) if !h.is_empty() => h.clone(),
                    _ => format!("col_{}", idx + 1),
                };
                Some(format!("{}: {}", label, value))
            })
            .collect();
        if !pairs.is_empty() {
            rows.push(pairs.join(" | "));
        }
    }

    Ok(clean_text(&rows.join("\n")))
}

fn preprocess_html(raw: &str) -> String {
    let document = Html::parse_document(raw);
    let mut parts = Vec::new();
    collect_text(document.root_element(), &mut parts);
    clean_text(&parts.join("\n"))
}

fn is_noise(element: &ElementRef) -> bool {
    let el = element.value();
    if NOISE_TAGS.contains(&el.name()) {
        return true;
    }
    let id = el.attr("id").unwrap_or_default();
    let class = el.attr("class").unwrap_or_default();
    NOISE_MARKERS
        .iter()
        .any(|marker| id.contains(marker) || class.contains(marker))
        || class.contains("newsletter")
}

fn collect_text(element: ElementRef, parts: &mut Vec<String>) {
    if is_noise(&element) {
        return;
    }
    for child in element.children() {
        match child.value() {
            Node::Text(text) => parts.push(text.trim().to_string()),
            Node::Element(_) => {
                if let Some(child_element) = ElementRef::wrap(child) {
                    collect_text(child_element, parts);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_txt_compacts_lines() {
        let tmp = TempDir::new().unwrap();
        let path = write(&tmp, "note.txt", "  First line  \n\nSecond line\n   \n");
        assert_eq!(preprocess_file(&path).unwrap(), "First line\nSecond line");
    }

    #[test]
    fn test_csv_labels_and_skips_empty_cells() {
        let tmp = TempDir::new().unwrap();
        let path = write(
            &tmp,
            "table.CSV",
            "name,amount,status\nAlice,100,paid\nBob,,pending\n,200,\n",
        );
        let text = preprocess_file(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "name: Alice | amount: 100 | status: paid",
                "name: Bob | status: pending",
                "amount: 200",
            ]
        );
    }

    #[test]
    fn test_csv_blank_header_gets_positional_label() {
        let tmp = TempDir::new().unwrap();
        let path = write(&tmp, "t.csv", "a,\nx,y\n");
        assert_eq!(preprocess_file(&path).unwrap(), "a: x | col_2: y");
    }

    #[test]
    fn test_html_drops_noise_and_keeps_body() {
        let tmp = TempDir::new().unwrap();
        let path = write(
            &tmp,
            "page.html",
            r#"<html>
                <head><script>ignore()</script></head>
                <body>
                    <nav>menu</nav>
                    <p>Main content stays.</p>
                    <div id="cookie-banner">cookie notice</div>
                    <div class="site-newsletter">subscribe</div>
                    <footer>foot</footer>
                </body>
            </html>"#,
        );
        let text = preprocess_file(&path).unwrap();
        assert_eq!(text, "Main content stays.");
    }

    #[test]
    fn test_unsupported_extension() {
        let tmp = TempDir::new().unwrap();
        let path = write(&tmp, "doc.pdf", "%PDF");
        let err = preprocess_file(&path).unwrap_err().to_string();
        assert!(err.contains("Unsupported file extension"), "{}", err);
    }
}
