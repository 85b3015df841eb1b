//! Host preparation done once before any unit is loaded: banner, kernel
//! parameters, resource limits and transparent huge pages.
//!
//! Everything is driven by environment variables and every failure is
//! fatal to startup.

use crate::error::{Error, Result};
use crate::journal::Journal;
use nix::sys::resource::{getrlimit, setrlimit, Resource};
use std::path::{Path, PathBuf};

/// Banner printed line by line at startup, if present.
pub const BANNER_FILE: &str = "/etc/banner.minit.txt";

/// Transparent huge page control file.
pub const THP_CONTROL_FILE: &str = "/sys/kernel/mm/transparent_hugepage/enabled";

const RLIMITS: [(&str, Resource); 14] = [
    ("AS", Resource::RLIMIT_AS),
    ("CORE", Resource::RLIMIT_CORE),
    ("CPU", Resource::RLIMIT_CPU),
    ("DATA", Resource::RLIMIT_DATA),
    ("FSIZE", Resource::RLIMIT_FSIZE),
    ("LOCKS", Resource::RLIMIT_LOCKS),
    ("MEMLOCK", Resource::RLIMIT_MEMLOCK),
    ("MSGQUEUE", Resource::RLIMIT_MSGQUEUE),
    ("NICE", Resource::RLIMIT_NICE),
    ("NOFILE", Resource::RLIMIT_NOFILE),
    ("NPROC", Resource::RLIMIT_NPROC),
    ("RTPRIO", Resource::RLIMIT_RTPRIO),
    ("SIGPENDING", Resource::RLIMIT_SIGPENDING),
    ("STACK", Resource::RLIMIT_STACK),
];

/// Run every setup step in order.
pub fn setup_host(journal: &Journal) -> Result<()> {
    setup_banner(journal, Path::new(BANNER_FILE));
    setup_sysctl(journal, Path::new("/proc/sys"))?;
    setup_rlimits(journal)?;
    setup_thp(journal, Path::new(THP_CONTROL_FILE))
}

/// Print the banner file, if it can be read.
pub fn setup_banner(journal: &Journal, path: &Path) {
    let Ok(content) = std::fs::read_to_string(path) else {
        return;
    };
    for line in content.lines() {
        journal.print(line);
    }
}

/// Parse `MINIT_SYSCTL`: comma separated `key=value` pairs.
///
/// Malformed entries and empty keys are skipped.
pub fn parse_sysctl(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|entry| {
            let mut parts = entry.split('=');
            let (key, value) = (parts.next()?, parts.next()?);
            if parts.next().is_some() {
                return None;
            }
            let key = key.trim();
            (!key.is_empty()).then(|| (key.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// `/proc/sys` file for a dotted key, under `root`.
pub fn sysctl_path(root: &Path, key: &str) -> PathBuf {
    key.split('.').fold(root.to_path_buf(), |path, part| path.join(part))
}

/// Apply `MINIT_SYSCTL`, writing below `root`.
pub fn setup_sysctl(journal: &Journal, root: &Path) -> Result<()> {
    let raw = std::env::var("MINIT_SYSCTL").unwrap_or_default();
    for (key, value) in parse_sysctl(&raw) {
        journal.print(format!("writing sysctl {}={}", key, value));
        std::fs::write(sysctl_path(root, &key), &value)
            .map_err(|e| Error::Setup(format!("cannot write sysctl {}={}: {}", key, value, e)))?;
    }
    Ok(())
}

fn parse_rlimit_value(s: &str, current: libc::rlim_t) -> std::result::Result<libc::rlim_t, String> {
    let s = s.trim();
    if s.is_empty() || s == "-" {
        return Ok(current);
    }
    if s.eq_ignore_ascii_case("unlimited") {
        return Ok(libc::RLIM_INFINITY);
    }
    s.parse::<libc::rlim_t>().map_err(|e| e.to_string())
}

/// Parse a `MINIT_RLIMIT_*` value against the current `(soft, hard)` pair.
///
/// `soft:hard` sets both independently; a single value sets both to the
/// same limit; `-` keeps the current value.
pub fn parse_rlimit(
    value: &str,
    current: (libc::rlim_t, libc::rlim_t),
) -> std::result::Result<(libc::rlim_t, libc::rlim_t), String> {
    if value.contains(':') {
        let parts: Vec<&str> = value.split(':').collect();
        if parts.len() != 2 {
            return Err("expected soft:hard".to_string());
        }
        Ok((
            parse_rlimit_value(parts[0], current.0)?,
            parse_rlimit_value(parts[1], current.1)?,
        ))
    } else {
        let limit = parse_rlimit_value(value, current.0)?;
        Ok((limit, limit))
    }
}

fn format_rlimit(v: libc::rlim_t) -> String {
    if v == libc::RLIM_INFINITY {
        "unlimited".to_string()
    } else {
        v.to_string()
    }
}

/// Apply every `MINIT_RLIMIT_<NAME>` variable.
pub fn setup_rlimits(journal: &Journal) -> Result<()> {
    for (name, resource) in RLIMITS {
        let key = format!("MINIT_RLIMIT_{}", name);
        let value = std::env::var(&key).unwrap_or_default();
        let value = value.trim();
        if value.is_empty() || value == "-" || value == "-:-" {
            continue;
        }

        let current = getrlimit(resource)
            .map_err(|e| Error::Setup(format!("cannot get RLIMIT_{}: {}", name, e)))?;
        journal.print(format!(
            "current RLIMIT_{}={}:{}",
            name,
            format_rlimit(current.0),
            format_rlimit(current.1)
        ));

        let (soft, hard) = parse_rlimit(value, current)
            .map_err(|e| Error::Setup(format!("invalid {}={}: {}", key, value, e)))?;
        journal.print(format!(
            "setting RLIMIT_{}={}:{}",
            name,
            format_rlimit(soft),
            format_rlimit(hard)
        ));
        setrlimit(resource, soft, hard)
            .map_err(|e| Error::Setup(format!("cannot set RLIMIT_{}={}: {}", name, value, e)))?;
    }
    Ok(())
}

/// Apply `MINIT_THP` to the control file at `path`.
pub fn setup_thp(journal: &Journal, path: &Path) -> Result<()> {
    let value = std::env::var("MINIT_THP").unwrap_or_default();
    let value = value.trim();
    if value.is_empty() {
        return Ok(());
    }

    let read = || {
        std::fs::read_to_string(path)
            .map(|s| s.trim().to_string())
            .map_err(|e| Error::Setup(format!("cannot read {}: {}", path.display(), e)))
    };

    journal.print(format!("current transparent huge pages: {}", read()?));
    journal.print(format!("writing transparent huge pages: {}", value));
    std::fs::write(path, value)
        .map_err(|e| Error::Setup(format!("cannot write {}: {}", path.display(), e)))?;
    journal.print(format!("current transparent huge pages: {}", read()?));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_sysctl() {
        assert_eq!(
            parse_sysctl(" net.core.somaxconn = 1024 ,bad,=1,a=b=c,vm.swappiness=0"),
            vec![
                ("net.core.somaxconn".to_string(), "1024".to_string()),
                ("vm.swappiness".to_string(), "0".to_string()),
            ]
        );
        assert!(parse_sysctl("").is_empty());
    }

    #[test]
    fn test_sysctl_path() {
        assert_eq!(
            sysctl_path(Path::new("/proc/sys"), "net.core.somaxconn"),
            PathBuf::from("/proc/sys/net/core/somaxconn")
        );
    }

    #[test]
    fn test_parse_rlimit() {
        let current = (1024, 4096);
        assert_eq!(parse_rlimit("65535", current), Ok((65535, 65535)));
        assert_eq!(parse_rlimit("100:-", current), Ok((100, 4096)));
        assert_eq!(parse_rlimit("-:8192", current), Ok((1024, 8192)));
        assert_eq!(
            parse_rlimit("unlimited:Unlimited", current),
            Ok((libc::RLIM_INFINITY, libc::RLIM_INFINITY))
        );
        assert!(parse_rlimit("1:2:3", current).is_err());
        assert!(parse_rlimit("lots", current).is_err());
    }

    #[test]
    fn test_banner() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::new(dir.path(), "minit", "minit")
            .unwrap()
            .without_console();
        let banner = dir.path().join("banner.txt");
        std::fs::write(&banner, "welcome\nto the box\n").unwrap();

        setup_banner(&journal, &banner);
        setup_banner(&journal, &dir.path().join("missing.txt"));

        let out = std::fs::read_to_string(dir.path().join("minit.out.log")).unwrap();
        assert!(out.contains("[minit] welcome\n"));
        assert!(out.contains("[minit] to the box\n"));
    }
}
