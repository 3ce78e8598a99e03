//! JUnit report sink for CI.
//!
//! With `--report junit --report-file <path>` the dispatcher records each
//! top-level invocation as a single testcase whose classname and name are
//! the joined command path. A write failure of the report itself is a hard
//! error: CI depends on the file existing.

use crate::error::Error;
use std::path::Path;

/// One invocation's outcome.
#[derive(Debug, Clone)]
pub struct TestCase {
    /// Joined command path, e.g. `apps list`.
    pub name: String,
    pub time_secs: f64,
    /// Error message when the invocation failed.
    pub failure: Option<String>,
}

/// Write a single-testcase JUnit file at `path`.
///
/// # Errors
///
/// Returns `Error::Report` when the file cannot be written.
pub fn write_junit_report(path: &Path, case: &TestCase) -> Result<(), Error> {
    let xml = render_junit(case);
    std::fs::write(path, xml).map_err(|e| Error::report(format!("{}: {e}", path.display())))
}

fn render_junit(case: &TestCase) -> String {
    let failures = usize::from(case.failure.is_some());
    let name = xml_escape(&case.name);
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str(&format!(
        "<testsuite name=\"asc\" tests=\"1\" failures=\"{failures}\" time=\"{:.3}\">\n",
        case.time_secs
    ));
    xml.push_str(&format!(
        "  <testcase classname=\"{name}\" name=\"{name}\" time=\"{:.3}\"",
        case.time_secs
    ));
    match &case.failure {
        None => xml.push_str("/>\n"),
        Some(message) => {
            xml.push_str(">\n");
            xml.push_str(&format!(
                "    <failure type=\"ERROR\">{}</failure>\n",
                xml_escape(message)
            ));
            xml.push_str("  </testcase>\n");
        }
    }
    xml.push_str("</testsuite>\n");
    xml
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_success_case_shape() {
        let xml = render_junit(&TestCase {
            name: "apps list".to_string(),
            time_secs: 1.5,
            failure: None,
        });
        assert!(xml.contains("<testsuite name=\"asc\" tests=\"1\" failures=\"0\""));
        assert!(xml.contains("classname=\"apps list\" name=\"apps list\" time=\"1.500\"/>"));
        assert!(!xml.contains("<failure"));
    }

    #[test]
    fn test_failure_case_carries_message() {
        let xml = render_junit(&TestCase {
            name: "apps get".to_string(),
            time_secs: 0.2,
            failure: Some("HTTP 403: Forbidden <key>".to_string()),
        });
        assert!(xml.contains("failures=\"1\""));
        assert!(xml.contains("<failure type=\"ERROR\">HTTP 403: Forbidden &lt;key&gt;</failure>"));
    }

    #[test]
    fn test_write_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.xml");
        write_junit_report(
            &path,
            &TestCase {
                name: "auth list".to_string(),
                time_secs: 0.1,
                failure: None,
            },
        )
        .unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("<?xml"));
    }

    #[test]
    fn test_unwritable_path_is_report_error() {
        let err = write_junit_report(
            Path::new("/nonexistent-dir/report.xml"),
            &TestCase {
                name: "x".to_string(),
                time_secs: 0.0,
                failure: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::Report { .. }));
        assert!(err.to_string().contains("failed to write JUnit report"));
    }
}
