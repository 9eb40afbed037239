use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn sheetdock_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("sheetdock");
    path
}

const MARKER_A: &str = "1.134.11.3395 2024-07-29 16:09:02 정기빌드";
const MARKER_B: &str = "1.134.12.3400 2024-08-02 10:30:00";

fn column_letters(mut col: usize) -> String {
    let mut letters = String::new();
    loop {
        letters.insert(0, (b'A' + (col % 26) as u8) as char);
        if col < 26 {
            break;
        }
        col = col / 26 - 1;
    }
    letters
}

fn sheet_xml(grid: &[Vec<&str>]) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><worksheet xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\"><sheetData>",
    );
    for (r, row) in grid.iter().enumerate() {
        xml.push_str(&format!("<row r=\"{}\">", r + 1));
        for (c, value) in row.iter().enumerate() {
            if value.is_empty() {
                continue;
            }
            xml.push_str(&format!(
                "<c r=\"{}{}\" t=\"inlineStr\"><is><t>{}</t></is></c>",
                column_letters(c),
                r + 1,
                value
            ));
        }
        xml.push_str("</row>");
    }
    xml.push_str("</sheetData></worksheet>");
    xml
}

/// Minimal xlsx (ZIP of workbook XML, relationships, and one part per sheet)
/// with all cells as inline strings.
fn write_workbook(path: &Path, sheets: &[(&str, Vec<Vec<&str>>)]) {
    use std::io::Write;

    let file = fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();

    let mut workbook = String::from(
        "<?xml version=\"1.0\"?><workbook xmlns:r=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships\"><sheets>",
    );
    let mut rels = String::from(
        "<?xml version=\"1.0\"?><Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">",
    );
    for (i, (name, _)) in sheets.iter().enumerate() {
        workbook.push_str(&format!(
            "<sheet name=\"{}\" sheetId=\"{}\" r:id=\"rId{}\"/>",
            name,
            i + 1,
            i + 1
        ));
        rels.push_str(&format!(
            "<Relationship Id=\"rId{}\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet\" Target=\"worksheets/sheet{}.xml\"/>",
            i + 1,
            i + 1
        ));
    }
    workbook.push_str("</sheets></workbook>");
    rels.push_str("</Relationships>");

    zip.start_file("xl/workbook.xml", options).unwrap();
    zip.write_all(workbook.as_bytes()).unwrap();
    zip.start_file("xl/_rels/workbook.xml.rels", options).unwrap();
    zip.write_all(rels.as_bytes()).unwrap();
    for (i, (_, grid)) in sheets.iter().enumerate() {
        zip.start_file(format!("xl/worksheets/sheet{}.xml", i + 1), options)
            .unwrap();
        zip.write_all(sheet_xml(grid).as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}

/// A sheet with a header, two build markers, and data rows under each.
fn results_grid() -> Vec<Vec<&'static str>> {
    vec![
        vec!["기능", "결과"],
        vec![MARKER_A],
        vec!["로그인", "pass"],
        vec!["결제", "fail"],
        vec![MARKER_B],
        vec!["로그인", "pass"],
    ]
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    write_workbook(
        &root.join("results.xlsx"),
        &[("Sheet1", results_grid()), ("Notes", vec![vec!["memo"]])],
    );

    let config_content = format!(
        r#"[db]
path = "{}/data/sheetdock.sqlite"

[server]
bind = "127.0.0.1:7420"

[upload]
preview_rows = 10
"#,
        root.display()
    );

    let config_path = config_dir.join("sheetdock.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_sheetdock(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = sheetdock_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run sheetdock binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn import_results(config_path: &Path, tmp: &TempDir) {
    let file = tmp.path().join("results.xlsx");
    let (stdout, stderr, success) = run_sheetdock(
        config_path,
        &[
            "import",
            file.to_str().unwrap(),
            "--sheet",
            "Sheet1",
            "--columns",
            "기능,결과",
        ],
    );
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);
}

fn count_results(stdout: &str) -> usize {
    stdout.lines().filter(|l| l.trim().starts_with("id:")).count()
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_sheetdock(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data").join("sheetdock.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_sheetdock(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_sheetdock(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_sheets_lists_names_in_order() {
    let (tmp, config_path) = setup_test_env();
    let file = tmp.path().join("results.xlsx");

    let (stdout, _, success) = run_sheetdock(&config_path, &["sheets", file.to_str().unwrap()]);
    assert!(success, "sheets failed");
    let names: Vec<&str> = stdout.lines().collect();
    assert_eq!(names, vec!["Sheet1", "Notes"]);
}

#[test]
fn test_preview_shows_non_blank_rows() {
    let (tmp, config_path) = setup_test_env();
    let file = tmp.path().join("results.xlsx");

    let (stdout, _, success) = run_sheetdock(
        &config_path,
        &["preview", file.to_str().unwrap(), "--sheet", "Sheet1"],
    );
    assert!(success, "preview failed: {}", stdout);
    assert!(stdout.contains("기능 | 결과"));
    assert!(stdout.contains(MARKER_A));
    assert!(stdout.contains("(6 non-blank rows total)"));
}

#[test]
fn test_import_groups_rows_under_build_markers() {
    let (tmp, config_path) = setup_test_env();
    run_sheetdock(&config_path, &["init"]);

    let file = tmp.path().join("results.xlsx");
    let (stdout, stderr, success) = run_sheetdock(
        &config_path,
        &[
            "import",
            file.to_str().unwrap(),
            "--sheet",
            "Sheet1",
            "--columns",
            "기능,결과",
        ],
    );
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("records inserted: 3"), "got: {}", stdout);
    assert!(stdout.contains("build markers: 2"), "got: {}", stdout);
    assert!(stdout.contains("ok"));
}

#[test]
fn test_import_drops_rows_before_first_marker() {
    let (tmp, config_path) = setup_test_env();
    run_sheetdock(&config_path, &["init"]);

    let file = tmp.path().join("orphan.xlsx");
    write_workbook(
        &file,
        &[(
            "Sheet1",
            vec![
                vec!["기능", "결과"],
                vec!["고아행", "pass"],
                vec![MARKER_A],
                vec!["로그인", "pass"],
            ],
        )],
    );

    let (stdout, _, success) = run_sheetdock(
        &config_path,
        &[
            "import",
            file.to_str().unwrap(),
            "--sheet",
            "Sheet1",
            "--columns",
            "기능,결과",
        ],
    );
    assert!(success, "import failed: {}", stdout);
    assert!(stdout.contains("records inserted: 1"), "got: {}", stdout);
}

#[test]
fn test_import_without_markers_reports_no_valid_rows() {
    let (tmp, config_path) = setup_test_env();
    run_sheetdock(&config_path, &["init"]);

    let file = tmp.path().join("plain.xlsx");
    write_workbook(
        &file,
        &[("Sheet1", vec![vec!["기능", "결과"], vec!["로그인", "pass"]])],
    );

    let (_, stderr, success) = run_sheetdock(
        &config_path,
        &[
            "import",
            file.to_str().unwrap(),
            "--sheet",
            "Sheet1",
            "--columns",
            "기능,결과",
        ],
    );
    assert!(!success, "import without markers should fail");
    assert!(stderr.contains("no valid rows"), "got: {}", stderr);
}

#[test]
fn test_import_empty_sheet_reports_no_rows() {
    let (tmp, config_path) = setup_test_env();
    run_sheetdock(&config_path, &["init"]);

    let file = tmp.path().join("empty.xlsx");
    write_workbook(&file, &[("Sheet1", vec![])]);

    let (_, stderr, success) = run_sheetdock(
        &config_path,
        &[
            "import",
            file.to_str().unwrap(),
            "--sheet",
            "Sheet1",
            "--columns",
            "기능",
        ],
    );
    assert!(!success, "import of empty sheet should fail");
    assert!(stderr.contains("no rows found"), "got: {}", stderr);
}

#[test]
fn test_import_unknown_sheet_fails() {
    let (tmp, config_path) = setup_test_env();
    run_sheetdock(&config_path, &["init"]);

    let file = tmp.path().join("results.xlsx");
    let (_, stderr, success) = run_sheetdock(
        &config_path,
        &[
            "import",
            file.to_str().unwrap(),
            "--sheet",
            "Missing",
            "--columns",
            "기능",
        ],
    );
    assert!(!success, "unknown sheet should fail");
    assert!(stderr.contains("sheet not found"), "got: {}", stderr);
}

#[test]
fn test_import_rejects_reserved_header() {
    let (tmp, config_path) = setup_test_env();
    run_sheetdock(&config_path, &["init"]);

    let file = tmp.path().join("reserved.xlsx");
    write_workbook(
        &file,
        &[(
            "Sheet1",
            vec![vec!["빌드명", "결과"], vec![MARKER_A], vec!["x", "pass"]],
        )],
    );

    let (_, stderr, success) = run_sheetdock(
        &config_path,
        &[
            "import",
            file.to_str().unwrap(),
            "--sheet",
            "Sheet1",
            "--columns",
            "결과",
        ],
    );
    assert!(!success, "reserved header should fail");
    assert!(stderr.contains("reserved"), "got: {}", stderr);
}

#[test]
fn test_bulk_imports_every_row() {
    let (tmp, config_path) = setup_test_env();
    run_sheetdock(&config_path, &["init"]);

    let file = tmp.path().join("results.xlsx");
    let (stdout, stderr, success) = run_sheetdock(
        &config_path,
        &["bulk", file.to_str().unwrap(), "--sheet", "Sheet1"],
    );
    assert!(success, "bulk failed: stdout={}, stderr={}", stdout, stderr);
    // Every row after the header, markers and all, with no grouping.
    assert!(stdout.contains("records inserted: 5"), "got: {}", stdout);
}

#[test]
fn test_search_term_matches_any_field() {
    let (tmp, config_path) = setup_test_env();
    run_sheetdock(&config_path, &["init"]);
    import_results(&config_path, &tmp);

    let (stdout, _, success) = run_sheetdock(&config_path, &["search", "로그인"]);
    assert!(success, "search failed");
    assert_eq!(count_results(&stdout), 2, "got: {}", stdout);
    assert!(stdout.contains("results.xlsx"));
}

#[test]
fn test_search_is_case_insensitive() {
    let (tmp, config_path) = setup_test_env();
    run_sheetdock(&config_path, &["init"]);
    import_results(&config_path, &tmp);

    let (stdout, _, success) = run_sheetdock(&config_path, &["search", "PASS"]);
    assert!(success);
    assert_eq!(count_results(&stdout), 2, "got: {}", stdout);
}

#[test]
fn test_search_filters_narrow_and_widen() {
    let (tmp, config_path) = setup_test_env();
    run_sheetdock(&config_path, &["init"]);
    import_results(&config_path, &tmp);

    // AND narrows: only the failing row.
    let (stdout, _, success) =
        run_sheetdock(&config_path, &["search", "--filter", "결과=fail:and"]);
    assert!(success);
    assert_eq!(count_results(&stdout), 1, "got: {}", stdout);

    // OR widens everything accumulated before it: 기능~결제 OR 결과~pass.
    let (stdout, _, success) = run_sheetdock(
        &config_path,
        &["search", "--filter", "기능=결제", "--filter", "결과=pass:or"],
    );
    assert!(success);
    assert_eq!(count_results(&stdout), 3, "got: {}", stdout);

    // A trailing AND applies to the whole OR branch.
    let (stdout, _, success) = run_sheetdock(
        &config_path,
        &[
            "search",
            "--filter",
            "기능=결제",
            "--filter",
            "결과=pass:or",
            "--filter",
            "빌드명=3395:and",
        ],
    );
    assert!(success);
    assert_eq!(count_results(&stdout), 2, "got: {}", stdout);
}

#[test]
fn test_search_filters_match_build_columns() {
    let (tmp, config_path) = setup_test_env();
    run_sheetdock(&config_path, &["init"]);
    import_results(&config_path, &tmp);

    let (stdout, _, success) =
        run_sheetdock(&config_path, &["search", "--filter", "빌드명=1.134.12"]);
    assert!(success);
    assert_eq!(count_results(&stdout), 1, "got: {}", stdout);
    assert!(stdout.contains("1.134.12.3400"));
}

#[test]
fn test_search_no_results() {
    let (tmp, config_path) = setup_test_env();
    run_sheetdock(&config_path, &["init"]);
    import_results(&config_path, &tmp);

    let (stdout, _, success) = run_sheetdock(&config_path, &["search", "xyznonexistent"]);
    assert!(success);
    assert!(stdout.contains("No results"));
}

#[test]
fn test_search_deterministic() {
    let (tmp, config_path) = setup_test_env();
    run_sheetdock(&config_path, &["init"]);
    import_results(&config_path, &tmp);

    let (stdout1, _, _) = run_sheetdock(&config_path, &["search", "pass"]);
    let (stdout2, _, _) = run_sheetdock(&config_path, &["search", "pass"]);
    assert_eq!(
        stdout1, stdout2,
        "Search results should be deterministic across runs"
    );
}

#[test]
fn test_history_shows_one_line_per_file() {
    let (tmp, config_path) = setup_test_env();
    run_sheetdock(&config_path, &["init"]);
    import_results(&config_path, &tmp);
    // A second batch of the same file: history must still report it once.
    import_results(&config_path, &tmp);

    let (stdout, _, success) = run_sheetdock(&config_path, &["history"]);
    assert!(success, "history failed: {}", stdout);
    assert_eq!(stdout.matches("results.xlsx").count(), 1, "got: {}", stdout);
    assert!(stdout.contains("Sheet1"));
}

#[test]
fn test_history_empty() {
    let (_tmp, config_path) = setup_test_env();
    run_sheetdock(&config_path, &["init"]);

    let (stdout, _, success) = run_sheetdock(&config_path, &["history"]);
    assert!(success);
    assert!(stdout.contains("No uploads"));
}

#[test]
fn test_builds_lists_recognized_markers() {
    let (tmp, config_path) = setup_test_env();
    run_sheetdock(&config_path, &["init"]);
    import_results(&config_path, &tmp);

    let (stdout, _, success) = run_sheetdock(&config_path, &["builds"]);
    assert!(success, "builds failed: {}", stdout);
    assert!(stdout.contains("1.134.11.3395"));
    assert!(stdout.contains("1.134.12.3400"));
    assert!(stdout.contains("2024-07-29 16:09:02"));

    let (stdout, _, success) = run_sheetdock(&config_path, &["builds", "--file", "other.xlsx"]);
    assert!(success);
    assert!(stdout.contains("No build markers"));
}

#[test]
fn test_get_record_with_batch() {
    let (tmp, config_path) = setup_test_env();
    run_sheetdock(&config_path, &["init"]);
    import_results(&config_path, &tmp);

    let (search_out, _, _) = run_sheetdock(&config_path, &["search", "결제"]);
    let id = search_out
        .lines()
        .find(|l| l.trim().starts_with("id:"))
        .and_then(|l| l.split("id:").nth(1))
        .map(|s| s.trim().to_string())
        .expect("search output should include an id");

    let (stdout, _, success) = run_sheetdock(&config_path, &["get", &id]);
    assert!(success, "get should succeed: {}", stdout);
    assert!(stdout.contains(&id));
    assert!(stdout.contains("results.xlsx"));
    // The whole upload batch rides along with the anchor record.
    assert!(stdout.contains("Batch (3 records)"), "got: {}", stdout);
}

#[test]
fn test_get_missing_record() {
    let (_tmp, config_path) = setup_test_env();
    run_sheetdock(&config_path, &["init"]);

    let (_, stderr, success) = run_sheetdock(&config_path, &["get", "nonexistent-id"]);
    assert!(!success, "get with missing ID should fail");
    assert!(
        stderr.contains("not found"),
        "Should report not found, got: {}",
        stderr
    );
}

#[test]
fn test_sheets_rejects_non_xlsx() {
    let (tmp, config_path) = setup_test_env();
    let file = tmp.path().join("notes.txt");
    fs::write(&file, "plainly not a workbook").unwrap();

    let (_, stderr, success) = run_sheetdock(&config_path, &["sheets", file.to_str().unwrap()]);
    assert!(!success, "non-xlsx input should fail");
    assert!(stderr.contains("not an xlsx archive"), "got: {}", stderr);
}
