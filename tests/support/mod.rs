//! Fake `claude` binaries for driving the runner end to end.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// A shell script standing in for the CLI. The directory is removed on drop.
pub struct FakeClaude {
    dir: TempDir,
    path: PathBuf,
}

impl FakeClaude {
    /// Write `body` as a `/bin/sh` script and make it executable.
    pub fn new(body: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("claude");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        Self { dir, path }
    }

    /// A script that prints `lines` to stdout, then exits with `code`.
    pub fn printing(lines: &[&str], code: i32) -> Self {
        let mut body = String::from("cat <<'EOF'\n");
        for line in lines {
            body.push_str(line);
            body.push('\n');
        }
        body.push_str("EOF\n");
        body.push_str(&format!("exit {code}"));
        Self::new(&body)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Scratch directory next to the script.
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}

pub const INIT: &str = r#"{"type":"system","subtype":"init","session_id":"sess-abc","tools":[]}"#;

pub fn assistant(text: &str) -> String {
    serde_json::json!({
        "type": "assistant",
        "message": {"content": [{"type": "text", "text": text}]}
    })
    .to_string()
}

pub fn result(text: &str) -> String {
    serde_json::json!({
        "type": "result",
        "subtype": "success",
        "result": text,
        "session_id": "sess-abc"
    })
    .to_string()
}
