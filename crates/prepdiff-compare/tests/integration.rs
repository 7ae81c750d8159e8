//! Integration test: two output trees on disk → run → collected reports.

use std::io::Write;
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use prepdiff_compare::report::{format_text, PairDetails};
use prepdiff_compare::volume::VolumeComparison;
use prepdiff_compare::{run, Collector, FilePairSpec, PairStatus, RunConfig, TextSink};
use prepdiff_core::Tolerance;

/// Gzipped little-endian NIfTI-1 image with float64 samples.
fn write_nifti(path: &Path, shape: &[i16], samples: &[f64]) {
    let mut header = vec![0u8; 352];
    header[0..4].copy_from_slice(&348i32.to_le_bytes());
    header[40..42].copy_from_slice(&(shape.len() as i16).to_le_bytes());
    for (i, d) in shape.iter().enumerate() {
        header[42 + 2 * i..44 + 2 * i].copy_from_slice(&d.to_le_bytes());
    }
    header[70..72].copy_from_slice(&64i16.to_le_bytes());
    header[72..74].copy_from_slice(&64i16.to_le_bytes());
    header[108..112].copy_from_slice(&352f32.to_le_bytes());
    header[344..348].copy_from_slice(b"n+1\0");
    for s in samples {
        header.extend_from_slice(&s.to_le_bytes());
    }

    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&header).unwrap();
    std::fs::write(path, encoder.finish().unwrap()).unwrap();
}

fn write_text(path: &Path, content: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

const T1W: &str = "ses-1/anat/sub-S01_ses-1_desc-preproc_T1w.nii.gz";
const BOLD: &str =
    "ses-2/func/sub-S01_ses-2_task-TheSecretNumber_space-MNI152NLin2009cAsym_desc-preproc_bold.nii.gz";
const MASK: &str =
    "ses-2/func/sub-S01_ses-2_task-TheSecretNumber_space-MNI152NLin2009cAsym_desc-brain_mask.nii.gz";
const CONFOUNDS: &str = "ses-2/func/sub-S01_ses-2_task-TheSecretNumber_desc-confounds_timeseries.tsv";

#[test]
fn sdc_comparison_end_to_end() {
    let without = tempfile::tempdir().unwrap();
    let with = tempfile::tempdir().unwrap();

    // Anatomical: unchanged between runs.
    let t1w: Vec<f64> = (0..8).map(f64::from).collect();
    write_nifti(&without.path().join(T1W), &[2, 2, 2], &t1w);
    write_nifti(&with.path().join(T1W), &[2, 2, 2], &t1w);

    // BOLD: one voxel shifted by 5.
    let mut bold = vec![0.0; 8];
    write_nifti(&without.path().join(BOLD), &[2, 2, 2], &bold);
    bold[7] = 5.0;
    write_nifti(&with.path().join(BOLD), &[2, 2, 2], &bold);

    // Mask: different grid.
    write_nifti(&without.path().join(MASK), &[2, 2, 2], &[1.0; 8]);
    write_nifti(&with.path().join(MASK), &[2, 2, 3], &[1.0; 12]);

    // Confounds: new column in the corrected run, one numeric change.
    write_text(
        &without.path().join(CONFOUNDS),
        "a\tb\nn/a\t0.5\n1.0\t0.25\n",
    );
    write_text(
        &with.path().join(CONFOUNDS),
        "a\tb\tc\nn/a\t0.5\t1\n1.0\t0.75\t2\n",
    );

    let config = RunConfig {
        root_a: without.path().to_path_buf(),
        root_b: with.path().to_path_buf(),
        pairs: [T1W, BOLD, CONFOUNDS, MASK]
            .into_iter()
            .map(FilePairSpec::new)
            .collect(),
        tolerance: Tolerance::default(),
    };
    config.validate().unwrap();

    let mut collector = Collector::default();
    let summary = run(&config, &mut collector).unwrap();
    let reports = &collector.reports;

    assert_eq!(reports[0].status, PairStatus::Identical);

    assert_eq!(reports[1].status, PairStatus::Differ);
    let PairDetails::Volume(VolumeComparison::Differ(stats)) = &reports[1].details else {
        panic!("expected volume stats: {:?}", reports[1].details);
    };
    assert_eq!(stats.max_abs_diff, 5.0);
    assert!((stats.mean_abs_diff - 0.625).abs() < 1e-12);
    assert!((stats.fraction_changed - 0.125).abs() < 1e-12);

    assert_eq!(reports[2].status, PairStatus::Differ);
    let PairDetails::Table(table) = &reports[2].details else {
        panic!("expected table details");
    };
    assert_eq!(table.added, ["c"]);
    assert_eq!(table.changed.len(), 1);
    assert_eq!(table.changed[0].column, "b");

    assert_eq!(reports[3].status, PairStatus::ShapeMismatch);

    assert_eq!(summary.identical, 1);
    assert_eq!(summary.differ, 3);
    assert!(summary.failures.is_empty());
    assert_eq!(summary.exit_code(), 1);

    let json = serde_json::to_value(reports).unwrap();
    assert_eq!(json[1]["details"]["result"], "differ");
    assert_eq!(json[3]["details"]["shapeB"][2], 3);
}

#[test]
fn text_output_matches_report_blocks() {
    let a = tempfile::tempdir().unwrap();
    let b = tempfile::tempdir().unwrap();
    write_nifti(&a.path().join(T1W), &[2, 2, 2], &[0.0; 8]);
    let mut changed = vec![0.0; 8];
    changed[0] = 5.0;
    write_nifti(&b.path().join(T1W), &[2, 2, 2], &changed);

    let config = RunConfig {
        root_a: a.path().to_path_buf(),
        root_b: b.path().to_path_buf(),
        pairs: vec![FilePairSpec::new(T1W)],
        tolerance: Tolerance::default(),
    };
    let mut sink = TextSink::new(Vec::new());
    run(&config, &mut sink).unwrap();
    let text = String::from_utf8(sink.into_inner()).unwrap();

    assert_eq!(
        text,
        format!(
            "\nComparing: {T1W}\n  Arrays DIFFER\n    Max absolute difference: 5.000000\n    \
             Mean absolute difference: 0.625000\n    Fraction of voxels that changed: 0.1250\n"
        )
    );
}

#[test]
fn corrupt_volume_is_a_load_error() {
    let a = tempfile::tempdir().unwrap();
    let b = tempfile::tempdir().unwrap();
    write_nifti(&a.path().join(T1W), &[2], &[0.0, 1.0]);
    write_text(&b.path().join(T1W), "not an image");
    write_text(&a.path().join(CONFOUNDS), "x\n1\n");
    write_text(&b.path().join(CONFOUNDS), "x\n1\n");

    let config = RunConfig {
        root_a: a.path().to_path_buf(),
        root_b: b.path().to_path_buf(),
        pairs: vec![FilePairSpec::new(T1W), FilePairSpec::new(CONFOUNDS)],
        tolerance: Tolerance::default(),
    };
    let mut collector = Collector::default();
    let summary = run(&config, &mut collector).unwrap();

    assert_eq!(collector.reports[0].status, PairStatus::LoadError);
    assert!(format_text(&collector.reports[0]).contains("invalid NIfTI file"));
    assert_eq!(collector.reports[1].status, PairStatus::Identical);
    assert_eq!(summary.exit_code(), 2);
}
