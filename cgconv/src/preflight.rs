//! Pre-flight checks for cgconv
//!
//! Validates the input and output paths before any sample is read, with
//! error messages that say what to fix.

use std::io;
use std::path::Path;

use crate::convert::ConvertConfig;
use crate::domain::ConvertError;

/// Run all pre-flight checks before conversion
///
/// # Errors
/// `InputUnavailable` or `OutputUnavailable` naming the offending path
pub fn run_preflight_checks(config: &ConvertConfig) -> Result<(), ConvertError> {
    if !config.reads_stdin() {
        check_input(&config.input)?;
    }
    check_output(&config.output)?;
    if let Some(symfs) = &config.symfs {
        check_symfs(symfs)?;
    }
    if let Some(vmlinux) = &config.vmlinux {
        check_vmlinux(vmlinux)?;
    }
    Ok(())
}

/// Check that the input exists and is a regular file
fn check_input(path: &Path) -> Result<(), ConvertError> {
    let unavailable = |kind, message: String| ConvertError::InputUnavailable {
        path: path.to_path_buf(),
        source: io::Error::new(kind, message),
    };
    let metadata = path.metadata().map_err(|_| {
        unavailable(
            io::ErrorKind::NotFound,
            "no such file\n\nRecord a profile first with: perf record -g <command>".to_string(),
        )
    })?;
    if !metadata.is_file() {
        return Err(unavailable(
            io::ErrorKind::InvalidInput,
            "not a file\n\n--input must point to perf.data or perf script output".to_string(),
        ));
    }
    Ok(())
}

/// Check that the output can be created: its directory exists and the path
/// itself is not a directory
fn check_output(path: &Path) -> Result<(), ConvertError> {
    let unavailable = |message: &str| ConvertError::OutputUnavailable {
        path: path.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidInput, message.to_string()),
    };
    if path.is_dir() {
        return Err(unavailable("is a directory"));
    }
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() && !dir.is_dir() => {
            Err(unavailable("parent directory does not exist"))
        }
        _ => Ok(()),
    }
}

/// A missing symfs root leaves every image unresolved, which is almost
/// certainly a typo
fn check_symfs(path: &Path) -> Result<(), ConvertError> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(ConvertError::InputUnavailable {
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::NotFound, "--symfs is not a directory"),
        })
    }
}

fn check_vmlinux(path: &Path) -> Result<(), ConvertError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(ConvertError::InputUnavailable {
            path: path.to_path_buf(),
            source: io::Error::new(
                io::ErrorKind::NotFound,
                "--vmlinux is not a file\n\nPoint it at an uncompressed kernel image with symbols",
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_not_found() {
        let result = check_input(Path::new("/nonexistent/path/to/perf.data"));
        let err = result.unwrap_err();
        assert!(err.is_input_failure());
        assert!(err.to_string().contains("no such file"));
    }

    #[test]
    fn test_input_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = check_input(dir.path()).unwrap_err();
        assert!(err.to_string().contains("not a file"));
    }

    #[test]
    fn test_output_checks() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_output(&dir.path().join("callgrind.out")).is_ok());
        assert!(check_output(Path::new("callgrind.out")).is_ok());
        assert!(check_output(dir.path()).unwrap_err().is_output_failure());
        assert!(check_output(&dir.path().join("missing/callgrind.out")).is_err());
    }

    #[test]
    fn test_stdin_skips_input_check() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConvertConfig::new("-", dir.path().join("out"));
        assert!(run_preflight_checks(&config).is_ok());

        let mut config = config;
        config.symfs = Some(dir.path().join("nope"));
        assert!(run_preflight_checks(&config).unwrap_err().is_input_failure());
    }

    #[test]
    fn test_vmlinux_must_be_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ConvertConfig::new("-", dir.path().join("out"));
        config.vmlinux = Some(dir.path().to_path_buf());
        let err = run_preflight_checks(&config).unwrap_err();
        assert!(err.to_string().contains("--vmlinux"));

        let vmlinux = dir.path().join("vmlinux");
        std::fs::write(&vmlinux, b"").unwrap();
        config.vmlinux = Some(vmlinux);
        assert!(run_preflight_checks(&config).is_ok());
    }
}
