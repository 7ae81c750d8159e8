use std::io::Write;
use std::path::Path;
use std::process::{Command, Output};

use flate2::write::GzEncoder;
use flate2::Compression;

/// Gzipped little-endian NIfTI-1 image with float32 samples.
fn write_nifti(path: &Path, shape: &[i16], samples: &[f32]) {
    let mut bytes = vec![0u8; 352];
    bytes[0..4].copy_from_slice(&348i32.to_le_bytes());
    bytes[40..42].copy_from_slice(&(shape.len() as i16).to_le_bytes());
    for (i, d) in shape.iter().enumerate() {
        bytes[42 + 2 * i..44 + 2 * i].copy_from_slice(&d.to_le_bytes());
    }
    bytes[70..72].copy_from_slice(&16i16.to_le_bytes());
    bytes[72..74].copy_from_slice(&32i16.to_le_bytes());
    bytes[108..112].copy_from_slice(&352f32.to_le_bytes());
    bytes[344..348].copy_from_slice(b"n+1\0");
    for s in samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }

    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&bytes).unwrap();
    std::fs::write(path, encoder.finish().unwrap()).unwrap();
}

fn write_text(path: &Path, content: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn prepdiff(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_prepdiff"))
        .args(args)
        .current_dir(dir)
        .env_remove("PREPDIFF_ROOT_A")
        .env_remove("PREPDIFF_ROOT_B")
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

const T1W: &str = "anat/sub-S01_desc-preproc_T1w.nii.gz";
const CONFOUNDS: &str = "func/sub-S01_task-TheSecretNumber_desc-confounds_timeseries.tsv";

/// Two roots where the volume is identical and the confounds table is not.
fn output_trees(dir: &Path) {
    let samples: Vec<f32> = (0..8).map(|i| i as f32).collect();
    write_nifti(&dir.join("a").join(T1W), &[2, 2, 2], &samples);
    write_nifti(&dir.join("b").join(T1W), &[2, 2, 2], &samples);
    write_text(&dir.join("a").join(CONFOUNDS), "csf\tfd\n1.0\tn/a\n2.0\t0.5\n");
    write_text(&dir.join("b").join(CONFOUNDS), "csf\tfd\n1.0\tn/a\n2.0\t0.75\n");
}

#[test]
fn identical_files_exit_zero() {
    let dir = tempfile::tempdir().unwrap();
    output_trees(dir.path());

    let output = prepdiff(dir.path(), &["compare", "--root-a", "a", "--root-b", "b", T1W]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert_eq!(output.status.code(), Some(0), "stdout: {stdout}");
    assert!(stdout.contains(&format!("Comparing: {T1W}")));
    assert!(stdout.contains("Arrays are IDENTICAL"));
}

#[test]
fn differences_exit_one() {
    let dir = tempfile::tempdir().unwrap();
    output_trees(dir.path());

    let output = prepdiff(
        dir.path(),
        &["compare", "--root-a", "a", "--root-b", "b", T1W, CONFOUNDS],
    );
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert_eq!(output.status.code(), Some(1), "stdout: {stdout}");
    assert!(stdout.contains("1 columns DIFFER:"));
    assert!(stdout.contains("fd: max diff = 0.25"));
    assert!(stdout.contains("2 pairs: 1 identical, 1 differ"));
}

#[test]
fn loose_tolerance_hides_small_differences() {
    let dir = tempfile::tempdir().unwrap();
    output_trees(dir.path());

    let output = prepdiff(
        dir.path(),
        &[
            "compare", "--root-a", "a", "--root-b", "b", "--atol", "0.5", CONFOUNDS,
        ],
    );
    assert_eq!(output.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&output.stdout).contains("All shared columns are IDENTICAL"));
}

#[test]
fn missing_file_exits_two_and_reports_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    output_trees(dir.path());
    write_text(&dir.path().join("paths.txt"), &format!("# files\n{T1W}\nfunc/missing.tsv\n"));

    let output = prepdiff(
        dir.path(),
        &[
            "compare", "--root-a", "a", "--root-b", "b", "--paths-file", "paths.txt", "--format",
            "json",
        ],
    );
    assert_eq!(output.status.code(), Some(2));

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let reports = json["reports"].as_array().unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0]["status"], "identical");
    assert_eq!(reports[1]["status"], "load_error");
    assert_eq!(json["summary"]["total"], 2);
    assert_eq!(json["summary"]["failures"][0]["path"], "func/missing.tsv");
}

#[test]
fn roots_come_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    output_trees(dir.path());
    write_text(
        &dir.path().join(".prepdiff.toml"),
        &format!("[compare]\nroot_a = \"a\"\nroot_b = \"b\"\npaths = [\"{T1W}\"]\n"),
    );

    let output = prepdiff(dir.path(), &["compare"]);
    assert_eq!(
        output.status.code(),
        Some(0),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn missing_root_is_a_usage_error() {
    let dir = tempfile::tempdir().unwrap();

    let output = prepdiff(dir.path(), &["compare", "--root-a", "a", T1W]);
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}
