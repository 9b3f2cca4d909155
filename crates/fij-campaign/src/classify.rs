//! Per-iteration classification and the final CSV summary, grounded on
//! `campaign_analyzer.cpp`'s described (but, in the retrieval pack,
//! OpenCV-stubbed) role: compare each injected run's captured output
//! files against the golden baseline and bucket the result into
//! CRASH/HANG/SDC/BENIGN.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use fij_core::{Classification, ExecutionResult, FijError};

use crate::diff;

/// One row of the final summary: the classification plus enough of the
/// raw result to reproduce the CSV.
pub struct ClassifiedRow {
    pub iteration: u64,
    pub classification: Classification,
    pub memory_flip: bool,
    pub duration_ms: f64,
}

/// Classifies one completed, fault-injected iteration against the golden
/// baseline directory, writing a visual diff (when the differing file is
/// image-decodable) under `diff_out_dir`.
///
/// Callers must have already filtered out `fault_injected == false`
/// iterations (those are retried, not classified).
pub fn classify_run(
    result: &ExecutionResult,
    run_dir: &Path,
    golden_dir: &Path,
    diff_out_dir: &Path,
) -> Classification {
    let mut any_differs = false;
    let mut first_diff: Option<(PathBuf, PathBuf)> = None;

    for output in &result.output_files {
        let name = match output.file_name() {
            Some(name) => name,
            None => continue,
        };
        let golden_path = golden_dir.join(name);
        if diff::files_differ(&golden_path, output) {
            any_differs = true;
            first_diff.get_or_insert((golden_path, output.clone()));
        }
    }

    let classification = Classification::classify(result, any_differs);

    if let (Classification::Sdc, Some((golden, injected))) = (classification, first_diff) {
        write_diff_artifacts(&golden, &injected, diff_out_dir);
    }

    classification
}

fn write_diff_artifacts(golden: &Path, injected: &Path, diff_out_dir: &Path) {
    if fs::create_dir_all(diff_out_dir).is_err() {
        return;
    }
    let _ = fs::copy(golden, diff_out_dir.join("golden"));
    let _ = fs::copy(injected, diff_out_dir.join("injected"));
    if let Some(diff) = diff::diff_images(golden, injected) {
        let _ = diff.mask.save(diff_out_dir.join("diff_mask.png"));
    }
}

/// Writes the final `diff/summary.csv`: per-iteration rows followed by
/// totals and the register-vs-memory breakdown.
pub fn write_summary_csv(path: &Path, rows: &[ClassifiedRow]) -> Result<(), FijError> {
    let mut out = String::new();
    out.push_str("iteration,classification,memory_flip,duration_ms\n");
    for row in rows {
        out.push_str(&format!(
            "{},{},{},{:.3}\n",
            row.iteration,
            classification_name(row.classification),
            row.memory_flip as u8,
            row.duration_ms
        ));
    }

    out.push('\n');
    out.push_str("classification,register,memory\n");
    for kind in [Classification::Crash, Classification::Hang, Classification::Sdc, Classification::Benign] {
        let register = rows.iter().filter(|r| r.classification == kind && !r.memory_flip).count();
        let memory = rows.iter().filter(|r| r.classification == kind && r.memory_flip).count();
        out.push_str(&format!("{},{},{}\n", classification_name(kind), register, memory));
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::File::create(path)?;
    file.write_all(out.as_bytes())?;
    Ok(())
}

fn classification_name(c: Classification) -> &'static str {
    match c {
        Classification::Hang => "HANG",
        Classification::Crash => "CRASH",
        Classification::Sdc => "SDC",
        Classification::Benign => "BENIGN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_result() -> ExecutionResult {
        ExecutionResult {
            fault_injected: true,
            ..Default::default()
        }
    }

    #[test]
    fn classifies_hang_before_crash() {
        let result = ExecutionResult {
            exit_code: 1,
            process_hanged: true,
            ..base_result()
        };
        assert_eq!(Classification::classify(&result, false), Classification::Hang);
    }

    #[test]
    fn classifies_crash_on_nonzero_exit_without_hang() {
        let result = ExecutionResult {
            exit_code: 1,
            ..base_result()
        };
        assert_eq!(Classification::classify(&result, false), Classification::Crash);
    }

    #[test]
    fn classifies_sdc_on_output_diff_with_zero_exit() {
        let result = base_result();
        assert_eq!(Classification::classify(&result, true), Classification::Sdc);
    }

    #[test]
    fn classifies_benign_otherwise() {
        let result = base_result();
        assert_eq!(Classification::classify(&result, false), Classification::Benign);
    }

    #[test]
    fn summary_csv_breaks_down_by_memory_flip() {
        let dir = std::env::temp_dir().join(format!("fij-summary-test-{}", std::process::id()));
        let path = dir.join("summary.csv");
        let rows = vec![
            ClassifiedRow { iteration: 0, classification: Classification::Crash, memory_flip: false, duration_ms: 1.0 },
            ClassifiedRow { iteration: 1, classification: Classification::Crash, memory_flip: true, duration_ms: 2.0 },
        ];
        write_summary_csv(&path, &rows).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("CRASH,1,1"));
        fs::remove_dir_all(&dir).ok();
    }
}
