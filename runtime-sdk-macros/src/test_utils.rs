use std::{
    io::Write,
    process::{Command, Stdio},
};

/// Formats a generated item with rustfmt so token streams can be compared as text.
pub fn rustfmt(code: &str) -> String {
    let mut child = Command::new("rustfmt")
        .args(["--emit", "stdout", "--quiet"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("rustfmt should be installed");

    // Wrap in a const item as the generated code may be a statement.
    child
        .stdin
        .as_mut()
        .unwrap()
        .write_all(format!("const _: () = {{ {}; }};", code).as_bytes())
        .expect("rustfmt should accept input");

    let output = child.wait_with_output().unwrap();
    assert!(
        output.status.success(),
        "rustfmt failed\n{}",
        String::from_utf8_lossy(&output.stderr)
    );

    let formatted = String::from_utf8(output.stdout).unwrap();
    let lines: Vec<_> = formatted.lines().collect();
    // Strip the wrapper lines and the trailing statement semicolon.
    let mut body = lines[1..lines.len() - 1].join("\n");
    body.pop();
    body
}

#[macro_export]
macro_rules! assert_empty_diff {
    ($actual:expr, $expected:expr) => {{
        use quote::ToTokens;

        let actual = crate::test_utils::rustfmt(&$actual.to_token_stream().to_string());
        let expected = crate::test_utils::rustfmt(&$expected.to_token_stream().to_string());

        let changes = difference::Changeset::new(&expected, &actual, "\n");
        if changes.distance > 0 {
            eprintln!("Diff:\n{}\n\nActual output:\n{}\n", changes, actual);
        }
        assert_eq!(changes.distance, 0);
    }};
}
