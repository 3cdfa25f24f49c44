//! Rasterisation against a real pdfium library.
//!
//! Gated behind `PDFIUM_E2E` so CI without pdfium skips it.
//!
//! Run with:
//!   PDFIUM_E2E=1 PDFIUM_LIB_PATH=/path/to/lib cargo test --test pdfium_e2e -- --nocapture

use pdf2records::{PageRasterizer, PdfiumBackend, PipelineConfig, SessionLog};
use std::path::Path;
use std::sync::Arc;

macro_rules! skip_unless_enabled {
    () => {{
        if std::env::var("PDFIUM_E2E").is_err() {
            println!("SKIP — set PDFIUM_E2E=1 to run pdfium tests");
            return;
        }
    }};
}

/// Write a minimal `pages`-page PDF with a correct xref table.
fn write_pdf(path: &Path, pages: usize) {
    let mut objects = vec![
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        format!(
            "<< /Type /Pages /Kids [{}] /Count {pages} >>",
            (0..pages)
                .map(|i| format!("{} 0 R", i + 3))
                .collect::<Vec<_>>()
                .join(" ")
        ),
    ];
    for _ in 0..pages {
        objects.push("<< /Type /Page /Parent 2 0 R /MediaBox [0 0 200 100] >>".to_string());
    }

    let mut out = String::from("%PDF-1.4\n");
    let mut offsets = Vec::new();
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.push_str(&format!("{} 0 obj\n{body}\nendobj\n", i + 1));
    }
    let xref = out.len();
    out.push_str(&format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1));
    for off in offsets {
        out.push_str(&format!("{off:010} 00000 n \n"));
    }
    out.push_str(&format!(
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref}\n%%EOF\n",
        objects.len() + 1
    ));
    std::fs::write(path, out).unwrap();
}

#[tokio::test]
async fn renders_blank_pages_to_png() {
    skip_unless_enabled!();
    let dir = tempfile::tempdir().unwrap();
    let pdf = dir.path().join("blank.pdf");
    write_pdf(&pdf, 3);

    let backend = PdfiumBackend::bind().expect("pdfium should bind");
    let rasterizer = PageRasterizer::new(Arc::new(backend), 2);
    let config = PipelineConfig::builder().dpi(72).build().unwrap();
    let out = dir.path().join("pages");
    let log = SessionLog::detached();

    let report = rasterizer
        .rasterize(&pdf, "blank", &out, &config, &log)
        .await
        .expect("rasterisation should succeed");
    assert_eq!(report.total, 3);
    assert_eq!(report.succeeded(), 3);

    let img = image::open(out.join("blank_page1.png")).unwrap();
    assert_eq!((img.width(), img.height()), (200, 100));
    for event in log.snapshot() {
        println!("{}", event.message);
    }
}

#[tokio::test]
async fn garbage_is_rejected_as_corrupt() {
    skip_unless_enabled!();
    let dir = tempfile::tempdir().unwrap();
    let pdf = dir.path().join("broken.pdf");
    std::fs::write(&pdf, b"%PDF-1.4\nthis is not a pdf").unwrap();

    let backend = PdfiumBackend::bind().expect("pdfium should bind");
    let rasterizer = PageRasterizer::new(Arc::new(backend), 1);
    let err = rasterizer
        .rasterize(
            &pdf,
            "broken",
            &dir.path().join("pages"),
            &PipelineConfig::default(),
            &SessionLog::detached(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, pdf2records::PipelineError::CorruptPdf { .. }));
}
