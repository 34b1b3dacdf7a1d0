use super::*;
use tempfile::TempDir;

#[test]
fn validate_accepts_known_extensions_case_insensitively() {
    assert_eq!(validate_upload("notes.TXT", 10, 100).expect("valid"), FileKind::Text);
    assert_eq!(validate_upload("README.md", 10, 100).expect("valid"), FileKind::Markdown);
    assert_eq!(validate_upload("scan.JPEG", 10, 100).expect("valid"), FileKind::Jpeg);
    assert_eq!(validate_upload("page.htm", 10, 100).expect("valid"), FileKind::Html);
    assert_eq!(
        validate_upload("report.docx", 10, 100).expect("valid").mime_type(),
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
    );
}

#[test]
fn validate_checks_size_before_type() {
    assert!(matches!(
        validate_upload("archive.zip", 101, 100),
        Err(ExtractionError::FileTooLarge { size: 101, max: 100 })
    ));
    assert!(validate_upload("exact.txt", 100, 100).is_ok());
}

#[test]
fn validate_rejects_unknown_types() {
    let err = validate_upload("archive.zip", 1, 100).expect_err("zip is rejected");
    assert!(matches!(&err, ExtractionError::UnsupportedType(ext) if ext == ".zip"));
    assert!(err.to_string().contains(".pdf"));

    assert!(matches!(
        validate_upload("Makefile", 1, 100),
        Err(ExtractionError::UnsupportedType(ext)) if ext == "(none)"
    ));
}

#[test]
fn markdown_syntax_is_removed() {
    let markdown = "# Title\n\nSome **bold** and *italic* text with `code` and a [link](https://example.com).\n\n- one\n- two\n";
    let text = markdown_to_text(markdown);

    assert_eq!(
        text,
        "Title\nSome bold and italic text with code and a link.\none\ntwo"
    );
}

#[test]
fn html_scripts_and_styles_are_dropped() {
    let html = r#"<!DOCTYPE html>
        <html><head><title>Ignored</title><style>body { color: red; }</style></head>
        <body>
            <h1>Welcome</h1>
            <script>var secret = 1;</script>
            <p>First   paragraph.</p>
            <p>Second <b>bold</b> paragraph.</p>
        </body></html>"#;

    assert_eq!(html_to_text(html), "Welcome First paragraph. Second bold paragraph.");
}

#[test]
fn extract_reads_text_files_and_falls_back_to_lossy_utf8() {
    let temp_dir = TempDir::new().expect("temp dir");
    let plain = temp_dir.path().join("plain.txt");
    std::fs::write(&plain, "  hello world \n").expect("write");
    assert_eq!(extract_text(&plain, FileKind::Text).expect("extract"), "hello world");

    let latin = temp_dir.path().join("latin.txt");
    std::fs::write(&latin, b"caf\xe9 menu").expect("write");
    let text = extract_text(&latin, FileKind::Text).expect("extract");
    assert!(text.starts_with("caf"));
    assert!(text.ends_with("menu"));
}

#[test]
fn extract_markdown_file() {
    let temp_dir = TempDir::new().expect("temp dir");
    let path = temp_dir.path().join("doc.md");
    std::fs::write(&path, "## Setup\n\nRun `cargo run`.").expect("write");
    assert_eq!(extract_text(&path, FileKind::Markdown).expect("extract"), "Setup\nRun cargo run.");
}

#[test]
fn binary_formats_yield_empty_text_without_reading() {
    let missing = Path::new("/definitely/not/here.pdf");
    assert_eq!(extract_text(missing, FileKind::Pdf).expect("no extractor"), "");
    assert!(!FileKind::Png.has_extractor());
}

#[test]
fn missing_text_file_is_an_io_error() {
    let missing = Path::new("/definitely/not/here.txt");
    assert!(matches!(
        extract_text(missing, FileKind::Text),
        Err(ExtractionError::Io { .. })
    ));
}
