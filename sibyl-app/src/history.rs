use chrono::{DateTime, Local};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Append one prompt/response exchange to the plain-text history log.
pub fn append_exchange(
    path: &Path,
    prompt: &str,
    response: &str,
    at: DateTime<Local>,
) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    write!(
        file,
        "--- Prompt sent at {} ---\n{prompt}\n\n--- Response ---\n{response}\n{}\n\n",
        at.format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(40)
    )?;
    file.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn appends_framed_exchanges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session").join("prompt_history.txt");
        let at = Local.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();

        append_exchange(&path, "what is rust", "A language.", at).unwrap();
        append_exchange(&path, "and tokio", "A runtime.", at).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        let rule = "=".repeat(40);
        let first = format!(
            "--- Prompt sent at 2025-03-04 05:06:07 ---\nwhat is rust\n\n--- Response ---\nA language.\n{rule}\n\n"
        );
        assert!(written.starts_with(&first));
        assert!(written.ends_with(&format!("A runtime.\n{rule}\n\n")));
        assert_eq!(written.matches("--- Response ---").count(), 2);
    }
}
