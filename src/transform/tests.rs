use super::*;

const GPU_HEADER: &str = "Timestamp,GPU_Utilization,Memory_Used,Memory_Total";
const MEMORY_HEADER: &str = "Timestamp,RSS_KB,VSZ_KB";

fn gpu_header() -> Header {
    Header::parse(GPU_HEADER)
}

fn gpu(sample: &Sample) -> &GpuSample {
    match sample {
        Sample::Gpu(s) => s,
        other => panic!("expected a gpu sample, got {other:?}"),
    }
}

mod gpu_rows {
    use super::*;

    #[test]
    fn derives_memory_percentage() {
        let batch = parse_rows("2024-01-15 10:30:45,87.5,3000,12000\n", &gpu_header(), Schema::Gpu);
        assert!(batch.errors.is_empty());
        let sample = gpu(&batch.samples[0]);
        assert_eq!(sample.utilization, 87.5);
        assert_eq!(sample.memory, 3000.0 / 12000.0 * 100.0);
        assert_eq!(sample.timestamp, "10:30:45");
    }

    #[test]
    fn zero_total_is_rejected() {
        let batch = parse_rows("2024-01-15 10:30:45,1,1,0", &gpu_header(), Schema::Gpu);
        assert!(batch.samples.is_empty());
        assert_eq!(batch.errors[0].kind, RowErrorKind::ZeroMemoryTotal);
    }

    #[test]
    fn empty_field_is_missing() {
        let batch = parse_rows("2024-01-15 10:30:45,,1,2", &gpu_header(), Schema::Gpu);
        assert_eq!(
            batch.errors[0].kind,
            RowErrorKind::MissingField("GPU_Utilization")
        );
    }

    #[test]
    fn short_row_is_missing_fields() {
        let batch = parse_rows("2024-01-15 10:30:45,50", &gpu_header(), Schema::Gpu);
        assert_eq!(batch.errors[0].kind, RowErrorKind::MissingField("Memory_Used"));
    }

    #[test]
    fn non_numeric_and_non_finite_values_are_rejected() {
        let text = "2024-01-15 10:30:45,abc,1,2\n2024-01-15 10:30:46,inf,1,2\n";
        let batch = parse_rows(text, &gpu_header(), Schema::Gpu);
        assert_eq!(batch.errors.len(), 2);
        assert!(matches!(
            &batch.errors[0].kind,
            RowErrorKind::InvalidNumber { field: "GPU_Utilization", value } if value == "abc"
        ));
    }

    #[test]
    fn bad_timestamp_is_rejected() {
        let batch = parse_rows("yesterday,1,1,2", &gpu_header(), Schema::Gpu);
        assert!(matches!(batch.errors[0].kind, RowErrorKind::InvalidTimestamp(_)));
    }

    #[test]
    fn extra_columns_and_whitespace_are_ignored() {
        let header =
            Header::parse("Timestamp, GPU_Utilization ,Memory_Used,Memory_Total,Temperature");
        let batch = parse_rows(" 2024-01-15T10:30:45 , 12 , 1 , 4 , 70 \r\n", &header, Schema::Gpu);
        assert!(batch.errors.is_empty());
        assert_eq!(gpu(&batch.samples[0]).utilization, 12.0);
        assert_eq!(gpu(&batch.samples[0]).memory, 25.0);
    }
}

mod memory_rows {
    use super::*;

    #[test]
    fn converts_kilobytes_to_megabytes() {
        let header = Header::parse(MEMORY_HEADER);
        let batch = parse_rows("2024/01/15 08:00:00,2048,3072\n", &header, Schema::Memory);
        match &batch.samples[0] {
            Sample::Memory(m) => {
                assert_eq!(m.usage, 2.0);
                assert_eq!(m.virtual_usage, 3.0);
                assert_eq!(m.timestamp, "08:00:00");
            }
            other => panic!("expected a memory sample, got {other:?}"),
        }
    }

    #[test]
    fn exact_division_without_rounding() {
        let header = Header::parse(MEMORY_HEADER);
        let batch = parse_rows("2024-01-15 08:00:00,1000,1", &header, Schema::Memory);
        match &batch.samples[0] {
            Sample::Memory(m) => {
                assert_eq!(m.usage, 1000.0 / 1024.0);
                assert_eq!(m.virtual_usage, 1.0 / 1024.0);
            }
            other => panic!("expected a memory sample, got {other:?}"),
        }
    }

    #[test]
    fn missing_vsz_is_rejected() {
        let header = Header::parse(MEMORY_HEADER);
        let batch = parse_rows("2024-01-15 08:00:00,1000,", &header, Schema::Memory);
        assert_eq!(batch.errors[0].kind, RowErrorKind::MissingField("VSZ_KB"));
    }
}

/// one malformed row never aborts the batch.
#[test]
fn partial_failure_preserves_order() {
    let mut text = String::new();
    for i in 1..=10 {
        if i == 5 {
            text.push_str("2024-01-15 10:00:05,oops,1,2\n");
        } else {
            text.push_str(&format!("2024-01-15 10:00:{i:02},{i},1,2\n"));
        }
    }

    let batch = parse_rows(&text, &gpu_header(), Schema::Gpu);
    assert_eq!(batch.samples.len(), 9);
    let utilizations: Vec<f64> = batch.samples.iter().map(|s| gpu(s).utilization).collect();
    assert_eq!(utilizations, vec![1.0, 2.0, 3.0, 4.0, 6.0, 7.0, 8.0, 9.0, 10.0]);

    assert_eq!(batch.errors.len(), 1);
    assert_eq!(batch.errors[0].row, 5);
    assert_eq!(batch.errors[0].line, "2024-01-15 10:00:05,oops,1,2");
}

#[test]
fn document_uses_first_line_as_header() {
    let text = format!("{MEMORY_HEADER}\n\n2024-01-15 08:00:00,1024,2048\n");
    let (header, batch) = parse_document(&text, Schema::Memory).unwrap();
    assert_eq!(header.columns(), ["Timestamp", "RSS_KB", "VSZ_KB"]);
    assert_eq!(batch.samples.len(), 1);
}

#[test]
fn header_only_document_has_no_rows() {
    let (_, batch) = parse_document(&format!("{GPU_HEADER}\n"), Schema::Gpu).unwrap();
    assert_eq!(batch, Batch::default());
    assert!(parse_document("", Schema::Gpu).is_none());
}

#[test]
fn schema_is_detected_from_header() {
    assert_eq!(Schema::detect(&gpu_header()), Some(Schema::Gpu));
    assert_eq!(Schema::detect(&Header::parse(MEMORY_HEADER)), Some(Schema::Memory));
    assert_eq!(Schema::detect(&Header::parse("a,b,c")), None);
}

#[test]
fn quoted_cells_are_unwrapped() {
    assert_eq!(
        split_cells(r#""2024-01-15 10:00:00","a,b","say ""hi""""#),
        vec!["2024-01-15 10:00:00", "a,b", r#"say "hi""#]
    );
}

#[test]
fn rfc3339_timestamps_are_accepted() {
    assert!(parse_timestamp("2024-01-15T10:30:45Z").is_ok());
    assert!(parse_timestamp("2024-01-15T10:30:45.123+02:00").is_ok());
    assert!(parse_timestamp("2024-13-45 10:30:45").is_err());
}

#[test]
fn naive_timestamps_keep_their_wall_clock_time() {
    // 02:30 on this date does not exist in zones that spring forward that night.
    assert_eq!(parse_timestamp("2024-03-10 02:30:00").unwrap(), "02:30:00");
    assert_eq!(parse_timestamp("2024-11-03 01:30:00").unwrap(), "01:30:00");

    let batch = parse_rows("2024-03-10 02:30:00,50,1,2\n", &gpu_header(), Schema::Gpu);
    assert!(batch.errors.is_empty());
    assert_eq!(gpu(&batch.samples[0]).timestamp, "02:30:00");
}
