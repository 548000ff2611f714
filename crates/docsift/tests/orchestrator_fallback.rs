mod helpers;

use docsift::core::orchestrator::{NoopProgress, milestones};
use docsift::ocr::PAGE_BREAK;
use docsift::{DocsiftError, DocumentRef, EngineAvailability, ExtractionStrategy, ResultSource};
use helpers::*;
use parking_lot::Mutex;

#[tokio::test]
async fn test_clean_pdf_never_reaches_ocr() {
    let dir = tempfile::tempdir().unwrap();
    let pdf = write_fake_pdf(dir.path(), "report.pdf", CLEAN_TEXT);
    let h = default_harness();

    let result = h
        .orchestrator
        .extract(&DocumentRef::new("doc-1", pdf), &NoopProgress)
        .await
        .unwrap();

    assert_eq!(result.source, ResultSource::Native);
    assert_eq!(result.final_text, CLEAN_TEXT);
    assert_eq!(result.confidence, 0.0);
    assert_eq!(h.ocr.calls(), 0);
    assert_eq!(result.attempts.len(), 1);
}

#[tokio::test]
async fn test_clean_pdf_with_real_text_layer() {
    let dir = tempfile::tempdir().unwrap();
    let pdf = write_lopdf_pdf(dir.path(), "minutes.pdf", CLEAN_TEXT);
    let ocr = CountingOcr::new(OCR_TEXT);

    let orchestrator = docsift::ExtractionOrchestrator::builder(test_config())
        .availability(EngineAvailability::all())
        .ocr_engine(ocr.clone())
        .page_renderer(std::sync::Arc::new(BlankRenderer { pages: 1 }))
        .build()
        .unwrap();

    let result = orchestrator
        .extract(&DocumentRef::new("doc-1", pdf), &NoopProgress)
        .await
        .unwrap();

    assert_eq!(result.source, ResultSource::Native);
    assert!(result.final_text.contains("Quarterly revenue"));
    assert_eq!(result.page_count, Some(1));
    assert_eq!(ocr.calls(), 0);
}

#[tokio::test]
async fn test_empty_pdf_escalates_to_ocr() {
    let dir = tempfile::tempdir().unwrap();
    let pdf = write_fake_pdf(dir.path(), "scan.pdf", "");
    let h = default_harness();

    let result = h
        .orchestrator
        .extract(&DocumentRef::new("doc-2", pdf), &NoopProgress)
        .await
        .unwrap();

    assert_eq!(result.source, ResultSource::Ocr);
    assert_eq!(result.final_text, format!("{}{}{}", OCR_TEXT, PAGE_BREAK, OCR_TEXT));
    assert!(result.failed_pages.is_empty());
    assert_eq!(h.ocr.calls(), 2);
}

#[tokio::test]
async fn test_garbled_pdf_runs_ocr_once() {
    let dir = tempfile::tempdir().unwrap();
    let pdf = write_fake_pdf(dir.path(), "broken-fonts.pdf", GARBLED_TEXT);
    let h = default_harness();

    let result = h
        .orchestrator
        .extract(&DocumentRef::new("doc-4", pdf), &NoopProgress)
        .await
        .unwrap();

    assert_eq!(result.source, ResultSource::Ocr);
    assert!(result.final_text.starts_with(OCR_TEXT));
    // One pass over both pages
    assert_eq!(h.ocr.calls(), 2);

    let strategies: Vec<_> = result.attempts.iter().map(|a| a.strategy).collect();
    assert_eq!(strategies, vec![ExtractionStrategy::NativeText, ExtractionStrategy::Ocr]);
    assert!(result.attempts[0].is_garbled);
}

#[tokio::test]
async fn test_garbled_everywhere_keeps_earlier_attempt_and_completes() {
    let dir = tempfile::tempdir().unwrap();
    let pdf = write_fake_pdf(dir.path(), "noise.pdf", GARBLED_TEXT);
    let h = harness(
        test_config(),
        EngineAvailability::all(),
        CountingOcr::new(GARBLED_TEXT),
        FakeConverter::new(ConverterBehavior::Unavailable),
    );

    let result = h
        .orchestrator
        .extract(&DocumentRef::new("doc-5", pdf), &NoopProgress)
        .await
        .unwrap();

    assert_eq!(result.source, ResultSource::Native);
    assert_eq!(result.final_text, GARBLED_TEXT);
    assert!(result.confidence > 0.0);
    assert_eq!(result.attempts.len(), 2);
}

#[tokio::test]
async fn test_docx_is_converted_before_reading() {
    let dir = tempfile::tempdir().unwrap();
    let docx = dir.path().join("contract.docx");
    std::fs::write(&docx, b"PK\x03\x04 placeholder").unwrap();
    let h = default_harness();

    let result = h
        .orchestrator
        .extract(&DocumentRef::new("doc-3", docx), &NoopProgress)
        .await
        .unwrap();

    assert_eq!(result.source, ResultSource::Converted);
    assert_eq!(result.final_text, CLEAN_TEXT);
    assert_eq!(h.converter.calls(), 1);
    assert_eq!(h.ocr.calls(), 0);
}

#[tokio::test]
async fn test_garbled_conversion_output_is_ocrd_once() {
    let dir = tempfile::tempdir().unwrap();
    let docx = dir.path().join("legacy.doc");
    std::fs::write(&docx, b"placeholder").unwrap();
    let h = harness(
        test_config(),
        EngineAvailability::all(),
        CountingOcr::new(OCR_TEXT),
        FakeConverter::new(ConverterBehavior::Produce(GARBLED_TEXT.to_string())),
    );

    let result = h
        .orchestrator
        .extract(&DocumentRef::new("doc-7", docx), &NoopProgress)
        .await
        .unwrap();

    assert_eq!(result.source, ResultSource::Ocr);
    assert_eq!(h.converter.calls(), 1);
    assert_eq!(h.ocr.calls(), 2);
    assert_eq!(result.attempts[0].strategy, ExtractionStrategy::OfficeConverted);
}

#[tokio::test]
async fn test_unreadable_spreadsheet_is_ocrd_once_through_pdf() {
    let dir = tempfile::tempdir().unwrap();
    let xls = dir.path().join("ledger.xls");
    std::fs::write(&xls, b"not a workbook").unwrap();
    let h = harness(
        test_config(),
        EngineAvailability::all(),
        CountingOcr::new(OCR_TEXT),
        FakeConverter::new(ConverterBehavior::Produce(GARBLED_TEXT.to_string())),
    );

    let result = h
        .orchestrator
        .extract(&DocumentRef::new("doc-15", xls), &NoopProgress)
        .await
        .unwrap();

    assert_eq!(result.source, ResultSource::Ocr);
    assert_eq!(result.final_text, format!("{}{}{}", OCR_TEXT, PAGE_BREAK, OCR_TEXT));
    // xlsx for the cell reader, then pdf for OCR
    assert_eq!(h.converter.calls(), 2);
    assert_eq!(h.ocr.calls(), 2);

    let strategies: Vec<_> = result.attempts.iter().map(|a| a.strategy).collect();
    assert_eq!(
        strategies,
        vec![
            ExtractionStrategy::OfficeConverted,
            ExtractionStrategy::NativeText,
            ExtractionStrategy::Ocr
        ]
    );
}

#[tokio::test]
async fn test_unreadable_spreadsheet_with_ocr_disabled_reports_read_failure() {
    let dir = tempfile::tempdir().unwrap();
    let xls = dir.path().join("ledger.xls");
    std::fs::write(&xls, b"not a workbook").unwrap();
    let mut config = test_config();
    config.ocr.enabled = false;
    let h = harness(
        config,
        EngineAvailability::all(),
        CountingOcr::new(OCR_TEXT),
        FakeConverter::new(ConverterBehavior::Produce(GARBLED_TEXT.to_string())),
    );

    let err = h
        .orchestrator
        .extract(&DocumentRef::new("doc-16", xls), &NoopProgress)
        .await
        .unwrap_err();

    assert!(matches!(err, DocsiftError::NativeExtractionFailed(_)));
    assert_eq!(h.converter.calls(), 1);
    assert_eq!(h.ocr.calls(), 0);
}

#[tokio::test]
async fn test_docx_without_converter_fails() {
    let dir = tempfile::tempdir().unwrap();
    let docx = dir.path().join("contract.docx");
    std::fs::write(&docx, b"placeholder").unwrap();

    let availability = EngineAvailability {
        converter: false,
        ..EngineAvailability::all()
    };
    let h = harness(
        test_config(),
        availability,
        CountingOcr::new(OCR_TEXT),
        FakeConverter::new(ConverterBehavior::Produce(CLEAN_TEXT.to_string())),
    );

    let err = h
        .orchestrator
        .extract(&DocumentRef::new("doc-6", docx), &NoopProgress)
        .await
        .unwrap_err();

    assert!(matches!(err, DocsiftError::ConverterUnavailable(_)));
    assert!(err.to_string().contains("converter"));
    assert_eq!(h.converter.calls(), 0);
    assert_eq!(h.ocr.calls(), 0);
}

#[tokio::test]
async fn test_conversion_timeout_fails_word_documents() {
    let dir = tempfile::tempdir().unwrap();
    let pptx = dir.path().join("deck.pptx");
    std::fs::write(&pptx, b"placeholder").unwrap();
    let h = harness(
        test_config(),
        EngineAvailability::all(),
        CountingOcr::new(OCR_TEXT),
        FakeConverter::new(ConverterBehavior::Timeout),
    );

    let err = h
        .orchestrator
        .extract(&DocumentRef::new("doc-8", pptx), &NoopProgress)
        .await
        .unwrap_err();

    assert!(matches!(err, DocsiftError::ConversionTimeout { seconds: 5 }));
    assert_eq!(h.ocr.calls(), 0);
}

#[tokio::test]
async fn test_spreadsheet_without_converter_reports_converter_when_workbook_unreadable() {
    let dir = tempfile::tempdir().unwrap();
    let xlsx = dir.path().join("budget.xlsx");
    std::fs::write(&xlsx, b"definitely not a zip archive").unwrap();
    let h = harness(
        test_config(),
        EngineAvailability::all(),
        CountingOcr::new(OCR_TEXT),
        FakeConverter::new(ConverterBehavior::Unavailable),
    );

    let err = h
        .orchestrator
        .extract(&DocumentRef::new("doc-9", xlsx), &NoopProgress)
        .await
        .unwrap_err();

    assert!(err.is_missing_dependency());
    assert_eq!(h.converter.calls(), 1);
}

#[tokio::test]
async fn test_unsupported_format_is_terminal() {
    let dir = tempfile::tempdir().unwrap();
    let blob = dir.path().join("payload.bin");
    std::fs::write(&blob, [0u8, 159, 146, 150, 0, 1, 2, 3]).unwrap();
    let h = default_harness();

    let err = h
        .orchestrator
        .extract(&DocumentRef::new("doc-10", blob), &NoopProgress)
        .await
        .unwrap_err();

    assert!(matches!(err, DocsiftError::UnsupportedFormat(_)));
    assert!(err.is_fatal_for_document());
}

#[tokio::test]
async fn test_scanned_pdf_without_ocr_engine_fails_with_dependency_error() {
    let dir = tempfile::tempdir().unwrap();
    let pdf = write_fake_pdf(dir.path(), "scan.pdf", "");
    let availability = EngineAvailability {
        ocr: false,
        ..EngineAvailability::all()
    };
    let h = harness(
        test_config(),
        availability,
        CountingOcr::new(OCR_TEXT),
        FakeConverter::new(ConverterBehavior::Unavailable),
    );

    let err = h
        .orchestrator
        .extract(&DocumentRef::new("doc-11", pdf), &NoopProgress)
        .await
        .unwrap_err();

    assert!(matches!(err, DocsiftError::OcrEngineUnavailable(_)));
    assert_eq!(h.ocr.calls(), 0);
}

#[tokio::test]
async fn test_garbled_pdf_without_ocr_keeps_native_text() {
    let dir = tempfile::tempdir().unwrap();
    let pdf = write_fake_pdf(dir.path(), "broken.pdf", GARBLED_TEXT);
    let mut config = test_config();
    config.ocr.enabled = false;
    let h = harness(
        config,
        EngineAvailability::all(),
        CountingOcr::new(OCR_TEXT),
        FakeConverter::new(ConverterBehavior::Unavailable),
    );

    let result = h
        .orchestrator
        .extract(&DocumentRef::new("doc-12", pdf), &NoopProgress)
        .await
        .unwrap();

    assert_eq!(result.source, ResultSource::Native);
    assert_eq!(result.final_text, GARBLED_TEXT);
    assert_eq!(h.ocr.calls(), 0);
}

#[tokio::test]
async fn test_plain_text_reports_encoding() {
    let dir = tempfile::tempdir().unwrap();
    let txt = dir.path().join("notes.txt");
    std::fs::write(&txt, CLEAN_TEXT).unwrap();
    let h = default_harness();

    let result = h
        .orchestrator
        .extract(&DocumentRef::new("doc-13", txt), &NoopProgress)
        .await
        .unwrap();

    assert_eq!(result.source, ResultSource::Native);
    assert_eq!(result.final_text, CLEAN_TEXT);
    assert_eq!(result.encoding.as_deref(), Some("UTF-8"));
}

#[tokio::test]
async fn test_progress_is_monotonic_through_ocr() {
    let dir = tempfile::tempdir().unwrap();
    let pdf = write_fake_pdf(dir.path(), "scan.pdf", "");
    let h = default_harness();
    let seen = Mutex::new(Vec::new());
    let sink = |value: u8| seen.lock().push(value);

    h.orchestrator
        .extract(&DocumentRef::new("doc-14", pdf), &sink)
        .await
        .unwrap();

    let seen = seen.into_inner();
    assert_eq!(seen.first(), Some(&milestones::STARTED));
    assert_eq!(seen.last(), Some(&milestones::FINISHED));
    assert!(seen.contains(&milestones::OCR_STARTED));
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn test_invalid_override_is_rejected_before_extraction() {
    let dir = tempfile::tempdir().unwrap();
    let pdf = write_fake_pdf(dir.path(), "scan.pdf", "");
    let h = default_harness();
    let document = DocumentRef::new("doc-17", pdf);

    let mut zero_threshold = test_config();
    zero_threshold.garbled.threshold = 0.0;
    let err = h
        .orchestrator
        .extract_with_config(&document, &zero_threshold, &NoopProgress)
        .await
        .unwrap_err();
    assert!(matches!(err, DocsiftError::Validation { .. }));

    let mut no_languages = test_config();
    no_languages.ocr.languages.clear();
    let err = h
        .orchestrator
        .extract_with_config(&document, &no_languages, &NoopProgress)
        .await
        .unwrap_err();
    assert!(matches!(err, DocsiftError::Validation { .. }));

    assert_eq!(h.ocr.calls(), 0);
}

#[tokio::test]
async fn test_extensionless_upload_is_classified_by_signature() {
    let dir = tempfile::tempdir().unwrap();
    let upload = write_fake_pdf(dir.path(), "upload", CLEAN_TEXT);
    let h = default_harness();

    let result = h
        .orchestrator
        .extract(&DocumentRef::new("doc-18", upload), &NoopProgress)
        .await
        .unwrap();
    assert_eq!(result.source, ResultSource::Native);
    assert_eq!(result.final_text, CLEAN_TEXT);

    let err = h
        .orchestrator
        .extract(&DocumentRef::new("doc-19", dir.path().join("vanished")), &NoopProgress)
        .await
        .unwrap_err();
    assert!(matches!(err, DocsiftError::Io(_)));
}
