//! Fallback DNS server list.
//!
//! The daemon does not manage name resolution, so the operator surface
//! reads `nameserver` lines straight from a resolv.conf-shaped file.
//! Entirely independent of the control socket.

use std::io;
use std::path::Path;

/// Default location of the fallback file.
pub(crate) const RESOLV_CONF: &str = "/etc/resolv.conf";

/// Reads the `nameserver` entries of `path` in file order.
///
/// A missing file reads as an empty list; other I/O failures surface.
pub(crate) fn nameservers(path: &Path) -> io::Result<Vec<String>> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    Ok(text
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next()) {
                (Some("nameserver"), Some(addr)) => Some(addr.to_owned()),
                _ => None,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    fn write_conf(dir: &tempfile::TempDir, body: &str) -> std::path::PathBuf {
        let path = dir.path().join("resolv.conf");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn reads_nameservers_in_file_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_conf(
            &dir,
            "# generated\nsearch lan\nnameserver 10.0.0.1\nnameserver 8.8.8.8\n",
        );
        assert_eq!(nameservers(&path).unwrap(), vec!["10.0.0.1", "8.8.8.8"]);
    }

    #[test]
    fn ignores_comments_and_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_conf(&dir, "# nameserver 1.1.1.1\nnameserver\nnameserverx 2.2.2.2\n");
        assert_eq!(nameservers(&path).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(nameservers(&dir.path().join("absent")).unwrap(), Vec::<String>::new());
    }
}
