//! Failed test extraction from test runner reports.

use crate::{RunnerError, RunnerResult};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, trace};
use tracker::{dedup_by_title, FailedTest};

/// Maximum number of output lines kept per failed test.
pub const MAX_OUTPUT_LINES: usize = 50;

/// Machine-readable report formats the extractor understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportFormat {
    /// `go test -json` event stream
    GoTestJson,
    /// libtest `--format json` event stream
    LibtestJson,
    /// JUnit XML report file
    #[serde(rename = "junit")]
    JUnitXml,
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportFormat::GoTestJson => write!(f, "go-test-json"),
            ReportFormat::LibtestJson => write!(f, "libtest-json"),
            ReportFormat::JUnitXml => write!(f, "junit"),
        }
    }
}

impl FromStr for ReportFormat {
    type Err = RunnerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "go-test-json" | "go" | "gotest" => Ok(ReportFormat::GoTestJson),
            "libtest-json" | "libtest" | "cargo" => Ok(ReportFormat::LibtestJson),
            "junit" | "junit-xml" | "xml" => Ok(ReportFormat::JUnitXml),
            other => Err(RunnerError::UnknownFormat(other.to_string())),
        }
    }
}

/// Extract the ordered, title-deduplicated failures from a report.
pub fn extract_failed_tests(format: ReportFormat, input: &str) -> RunnerResult<Vec<FailedTest>> {
    let failures = match format {
        ReportFormat::GoTestJson => parse_go_test_json(input),
        ReportFormat::LibtestJson => parse_libtest_json(input),
        ReportFormat::JUnitXml => parse_junit_xml(input)?,
    };
    debug!("Extracted {} failed test(s) from {} report", failures.len(), format);
    Ok(failures)
}

/// Keeps the last `MAX_OUTPUT_LINES` lines of `output`.
fn tail_lines(output: &str) -> String {
    let lines: Vec<&str> = output.lines().collect();
    let start = lines.len().saturating_sub(MAX_OUTPUT_LINES);
    lines[start..].join("\n")
}

fn attach_output(test: FailedTest, output: Option<&str>) -> FailedTest {
    match output.map(str::trim_end).filter(|o| !o.is_empty()) {
        Some(output) => test.with_output(tail_lines(output)),
        None => test,
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GoTestEvent {
    action: String,
    #[serde(default)]
    package: String,
    #[serde(default)]
    test: Option<String>,
    #[serde(default)]
    output: Option<String>,
}

/// Test name reported for a package that failed without any failing test,
/// such as a build failure, a panic in `init` or a failing `TestMain`.
pub const PACKAGE_FAILURE_TEST: &str = "TestMain";

/// Parses a `go test -json` stream. Lines that are not test events, such as
/// build errors interleaved by the toolchain, are skipped.
///
/// A package that fails with no failed test of its own is reported as a
/// [`PACKAGE_FAILURE_TEST`] failure carrying the package-level output.
pub fn parse_go_test_json(input: &str) -> Vec<FailedTest> {
    let mut outputs: HashMap<(String, String), String> = HashMap::new();
    let mut package_outputs: HashMap<String, String> = HashMap::new();
    let mut packages_with_failures: HashSet<String> = HashSet::new();
    let mut failures = Vec::new();

    for line in input.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let event: GoTestEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                trace!("Skipping non-event line ({}): {}", e, line);
                continue;
            }
        };

        let Some(test) = event.test.filter(|t| !t.is_empty()) else {
            match event.action.as_str() {
                "output" => {
                    if let Some(output) = event.output {
                        package_outputs
                            .entry(event.package)
                            .or_default()
                            .push_str(&output);
                    }
                }
                "fail" => {
                    let output = package_outputs.remove(&event.package);
                    if !packages_with_failures.contains(&event.package) {
                        debug!("Package {} failed without a failing test", event.package);
                        let failed = FailedTest::from_parts(event.package, PACKAGE_FAILURE_TEST);
                        failures.push(attach_output(failed, output.as_deref()));
                    }
                }
                "pass" | "skip" => {
                    package_outputs.remove(&event.package);
                }
                _ => {}
            }
            continue;
        };
        let key = (event.package, test);

        match event.action.as_str() {
            "output" => {
                if let Some(output) = event.output {
                    outputs.entry(key).or_default().push_str(&output);
                }
            }
            "fail" => {
                let output = outputs.remove(&key);
                packages_with_failures.insert(key.0.clone());
                let failed = FailedTest::from_parts(key.0, key.1);
                failures.push(attach_output(failed, output.as_deref()));
            }
            "pass" | "skip" => {
                outputs.remove(&key);
            }
            _ => {}
        }
    }

    dedup_by_title(failures)
}

#[derive(Deserialize)]
struct LibtestEvent {
    #[serde(rename = "type")]
    kind: String,
    event: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    stdout: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Parses libtest's JSON event stream (`cargo test -- -Z unstable-options --format json`).
pub fn parse_libtest_json(input: &str) -> Vec<FailedTest> {
    let mut failures = Vec::new();

    for line in input.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Ok(event) = serde_json::from_str::<LibtestEvent>(line) else {
            trace!("Skipping non-event line: {}", line);
            continue;
        };

        if event.kind != "test" || event.event != "failed" {
            continue;
        }
        let Some(name) = event.name.filter(|n| !n.is_empty()) else {
            continue;
        };

        let output = match (event.stdout, event.message) {
            (Some(stdout), Some(message)) => Some(format!("{}\n{}", stdout, message)),
            (stdout, message) => stdout.or(message),
        };
        failures.push(attach_output(FailedTest::new(name), output.as_deref()));
    }

    dedup_by_title(failures)
}

#[derive(Default)]
struct JUnitCase {
    classname: String,
    name: String,
    failed: bool,
    output: String,
}

fn attribute(element: &BytesStart<'_>, key: &str) -> Option<String> {
    element
        .try_get_attribute(key)
        .ok()
        .flatten()
        .and_then(|attr| attr.unescape_value().ok())
        .map(|value| value.into_owned())
}

fn junit_error(reader: &Reader<&[u8]>, err: impl fmt::Display) -> RunnerError {
    RunnerError::Parse {
        format: ReportFormat::JUnitXml.to_string(),
        message: format!("at byte {}: {}", reader.buffer_position(), err),
    }
}

/// Parses a JUnit XML report. Every `<testcase>` holding a `<failure>` or
/// `<error>` element is a failed test, titled by its classname and name.
pub fn parse_junit_xml(input: &str) -> RunnerResult<Vec<FailedTest>> {
    let mut reader = Reader::from_str(input);
    reader.config_mut().trim_text(true);

    let mut failures = Vec::new();
    let mut current: Option<JUnitCase> = None;
    let mut in_failure = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"testcase" => {
                    current = Some(JUnitCase {
                        classname: attribute(&e, "classname").unwrap_or_default(),
                        name: attribute(&e, "name").unwrap_or_default(),
                        ..JUnitCase::default()
                    });
                }
                b"failure" | b"error" => {
                    if let Some(case) = current.as_mut() {
                        case.failed = true;
                        if let Some(message) = attribute(&e, "message") {
                            case.output.push_str(&message);
                            case.output.push('\n');
                        }
                        in_failure = true;
                    }
                }
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"failure" | b"error" => {
                    if let Some(case) = current.as_mut() {
                        case.failed = true;
                        if let Some(message) = attribute(&e, "message") {
                            case.output.push_str(&message);
                            case.output.push('\n');
                        }
                    }
                }
                // a self-closing testcase has no failure child
                _ => {}
            },
            Ok(Event::Text(text)) if in_failure => {
                if let Some(case) = current.as_mut() {
                    let text = text.unescape().map_err(|e| junit_error(&reader, e))?;
                    case.output.push_str(&text);
                    case.output.push('\n');
                }
            }
            Ok(Event::CData(data)) if in_failure => {
                if let Some(case) = current.as_mut() {
                    case.output.push_str(&String::from_utf8_lossy(&data));
                    case.output.push('\n');
                }
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"failure" | b"error" => in_failure = false,
                b"testcase" => {
                    if let Some(case) = current.take().filter(|c| c.failed && !c.name.is_empty()) {
                        let failed = FailedTest::from_parts(case.classname, case.name);
                        failures.push(attach_output(failed, Some(&case.output)));
                    }
                    in_failure = false;
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(junit_error(&reader, e)),
            _ => {}
        }
    }

    Ok(dedup_by_title(failures))
}

#[cfg(test)]
mod tests {
    use super::*;

    const GO_EVENTS: &str = r##"
{"Action":"run","Package":"example.com/shop","Test":"TestCart"}
{"Action":"output","Package":"example.com/shop","Test":"TestCart","Output":"=== RUN   TestCart\n"}
{"Action":"output","Package":"example.com/shop","Test":"TestCart","Output":"    cart_test.go:12: expected 3, got 2\n"}
{"Action":"fail","Package":"example.com/shop","Test":"TestCart","Elapsed":0.01}
{"Action":"run","Package":"example.com/shop","Test":"TestCheckout"}
{"Action":"pass","Package":"example.com/shop","Test":"TestCheckout","Elapsed":0}
# example.com/broken
{"Action":"output","Package":"example.com/broken","Output":"# example.com/broken\n"}
{"Action":"output","Package":"example.com/broken","Output":"broken.go:3:1: syntax error: non-declaration statement outside function body\n"}
{"Action":"output","Package":"example.com/broken","Output":"FAIL\texample.com/broken [build failed]\n"}
{"Action":"fail","Package":"example.com/broken","Elapsed":0}
{"Action":"output","Package":"example.com/shop","Output":"FAIL\texample.com/shop\t0.02s\n"}
{"Action":"fail","Package":"example.com/shop","Elapsed":0.02}
{"Action":"fail","Package":"example.com/shop","Test":"TestCart","Elapsed":0.01}
{"Action":"fail","Package":"example.com/auth","Test":"TestLogin"}
"##;

    #[test]
    fn test_format_parsing() {
        assert_eq!("go".parse::<ReportFormat>().unwrap(), ReportFormat::GoTestJson);
        assert_eq!(
            "libtest-json".parse::<ReportFormat>().unwrap(),
            ReportFormat::LibtestJson
        );
        assert_eq!("JUnit".parse::<ReportFormat>().unwrap(), ReportFormat::JUnitXml);
        assert!(matches!(
            "tap".parse::<ReportFormat>(),
            Err(RunnerError::UnknownFormat(_))
        ));
        assert_eq!(ReportFormat::GoTestJson.to_string(), "go-test-json");
    }

    #[test]
    fn test_go_test_json_failures() {
        let failures = parse_go_test_json(GO_EVENTS);
        let titles: Vec<&str> = failures.iter().map(|f| f.title.as_str()).collect();
        assert_eq!(
            titles,
            vec![
                "example.com/shop: TestCart",
                "example.com/broken: TestMain",
                "example.com/auth: TestLogin"
            ]
        );

        let output = failures[0].output.as_deref().unwrap();
        assert!(output.contains("expected 3, got 2"));
        assert!(!output.contains("FAIL\texample.com/shop"));
        let build = failures[1].output.as_deref().unwrap();
        assert!(build.contains("syntax error"));
        assert!(build.contains("[build failed]"));
        assert!(failures[2].output.is_none());
    }

    #[test]
    fn test_go_test_json_package_failure_without_tests() {
        let input = r#"
{"Action":"start","Package":"example.com/shop"}
{"Action":"output","Package":"example.com/shop","Output":"panic: missing DATABASE_URL\n"}
{"Action":"output","Package":"example.com/shop","Output":"FAIL\texample.com/shop\t0.003s\n"}
{"Action":"fail","Package":"example.com/shop","Elapsed":0.003}
{"Action":"output","Package":"example.com/auth","Output":"ok  \texample.com/auth\t0.01s\n"}
{"Action":"pass","Package":"example.com/auth","Elapsed":0.01}
"#;
        let failures = parse_go_test_json(input);
        assert_eq!(
            failures,
            vec![FailedTest::from_parts("example.com/shop", PACKAGE_FAILURE_TEST)]
        );
        assert!(failures[0]
            .output
            .as_deref()
            .unwrap()
            .starts_with("panic: missing DATABASE_URL"));
    }

    #[test]
    fn test_go_test_json_all_passing() {
        let input = r#"{"Action":"pass","Package":"p","Test":"TestA"}"#;
        assert!(parse_go_test_json(input).is_empty());
    }

    #[test]
    fn test_libtest_json_failures() {
        let input = r#"
{ "type": "suite", "event": "started", "test_count": 3 }
{ "type": "test", "event": "started", "name": "tests::adds" }
{ "type": "test", "name": "tests::adds", "event": "ok" }
{ "type": "test", "name": "tests::divides", "event": "failed", "stdout": "thread 'tests::divides' panicked at src/lib.rs:10:5\n" }
{ "type": "test", "name": "tests::ignored", "event": "ignored" }
{ "type": "suite", "event": "failed", "passed": 1, "failed": 1, "ignored": 1 }
"#;
        let failures = parse_libtest_json(input);
        assert_eq!(failures, vec![FailedTest::new("tests::divides")]);
        assert!(failures[0].output.as_deref().unwrap().contains("panicked"));
    }

    #[test]
    fn test_junit_failures() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<testsuites>
  <testsuite name="example.com/shop" tests="4" failures="2" errors="1">
    <testcase classname="example.com/shop" name="TestCart" time="0.01">
      <failure message="Failed" type="">cart_test.go:12: expected 3, got 2</failure>
    </testcase>
    <testcase classname="example.com/shop" name="TestCheckout" time="0.00"></testcase>
    <testcase classname="example.com/shop" name="TestRefund"/>
    <testcase classname="example.com/shop" name="TestTax">
      <error message="panic: nil map"/>
    </testcase>
    <testcase classname="example.com/shop" name="TestCart">
      <failure><![CDATA[again]]></failure>
    </testcase>
  </testsuite>
</testsuites>"#;

        let failures = parse_junit_xml(xml).unwrap();
        let titles: Vec<&str> = failures.iter().map(|f| f.title.as_str()).collect();
        assert_eq!(
            titles,
            vec!["example.com/shop: TestCart", "example.com/shop: TestTax"]
        );
        assert!(failures[0]
            .output
            .as_deref()
            .unwrap()
            .contains("expected 3, got 2"));
        assert_eq!(failures[1].output.as_deref(), Some("panic: nil map"));
    }

    #[test]
    fn test_junit_malformed() {
        let result = parse_junit_xml("<testsuite><testcase name=\"a\"></testsuite>");
        assert!(matches!(result, Err(RunnerError::Parse { .. })));
    }

    #[test]
    fn test_output_is_bounded() {
        let mut input = String::new();
        for i in 0..120 {
            input.push_str(&format!(
                "{{\"Action\":\"output\",\"Package\":\"p\",\"Test\":\"TestNoisy\",\"Output\":\"line {}\\n\"}}\n",
                i
            ));
        }
        input.push_str(r#"{"Action":"fail","Package":"p","Test":"TestNoisy"}"#);

        let failures = parse_go_test_json(&input);
        let output = failures[0].output.as_deref().unwrap();
        assert_eq!(output.lines().count(), MAX_OUTPUT_LINES);
        assert!(output.starts_with("line 70"));
        assert!(output.ends_with("line 119"));
    }
}
