use datatest_stable::Utf8Path;
use quill::Context;

#[derive(thiserror::Error, Debug)]
#[error("error(s) occured in eval datatest at {0}")]
pub struct DatatestError(Box<Utf8Path>);

/// The sections of a `.qd` file: expected errors, expected value, source.
///
/// Lines starting with `;` before the source section are comments. They are
/// kept in place when the file is rewritten.
struct DatatestFile<'a> {
    errors: Vec<&'a str>,
    value: Vec<&'a str>,
    source: String,
    error_comments: Vec<&'a str>,
    value_comments: Vec<&'a str>,
}

// from https://matklad.github.io/2021/05/31/how-to-test.html
// with DATATEST_EXPECT set, the file is rewritten to match what the test
// produced instead of failing.
fn stitch_to_datatest(file: &DatatestFile, errors: &str, value: &str) -> String {
    let mut lines = vec![];
    lines.extend(file.error_comments.iter().copied());
    lines.extend(errors.lines());
    lines.push("---");
    lines.extend(file.value_comments.iter().copied());
    lines.extend(value.lines());
    lines.push("---");
    lines.extend(file.source.lines());
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn read_datatest(test_contents: &str) -> DatatestFile {
    #[derive(PartialEq, Eq, Debug, Default)]
    enum Section {
        #[default]
        Error,
        Value,
        Source,
    }

    let mut file = DatatestFile {
        errors: vec![],
        value: vec![],
        source: String::new(),
        error_comments: vec![],
        value_comments: vec![],
    };
    let mut section = Section::default();

    for line in test_contents.lines() {
        if section != Section::Source && line.trim_start().starts_with(';') {
            match section {
                Section::Error => file.error_comments.push(line),
                _ => file.value_comments.push(line),
            }
            continue;
        }

        match section {
            Section::Error if line.trim_end() == "---" => section = Section::Value,
            Section::Error => file.errors.push(line),
            Section::Value if line.trim_end() == "---" => section = Section::Source,
            Section::Value => file.value.push(line),
            Section::Source => {
                if !file.source.is_empty() {
                    file.source.push('\n');
                }
                file.source.push_str(line);
            }
        }
    }

    file
}

fn eval_test(path: &Utf8Path, contents: String) -> datatest_stable::Result<()> {
    let file = read_datatest(&contents);

    let (got_errors, got_value) = match Context::default().eval_str(&file.source) {
        Ok(value) => (String::new(), value.to_string()),
        Err(err) => {
            let span = err
                .span()
                .map_or_else(|| "?".to_owned(), |span| format!("{span:?}"));
            (format!("[{span}] {err}"), String::new())
        }
    };

    let expected_errors = file.errors.join("\n");
    let expected_value = file.value.join("\n");

    if std::env::var("DATATEST_EXPECT").is_ok() {
        std::fs::write(path, stitch_to_datatest(&file, &got_errors, &got_value))?;
        return Ok(());
    }

    let mut failed = false;
    if expected_errors.trim() != got_errors.trim() {
        println!(
            "error in {path}: error mismatch\n\nGot:\n{}\n\nExpected:\n{}",
            got_errors.trim(),
            expected_errors.trim()
        );
        failed = true;
    }
    if expected_value.trim() != got_value.trim() {
        println!(
            "error in {path}: value mismatch\n\nGot:\n{}\n\nExpected:\n{}",
            got_value.trim(),
            expected_value.trim()
        );
        failed = true;
    }

    if failed {
        Err(DatatestError(Box::from(path)))?
    } else {
        Ok(())
    }
}

datatest_stable::harness! {
    eval_test, "test_data", r"^.*\.qd",
}
