//! Platform naming conventions for modules and native binaries.

use std::path::PathBuf;

/// Module file extensions, tried in order for base-directory fallback.
pub const MODULE_EXTENSIONS: &[&str] = &[".module", ".module.json"];

#[cfg(unix)]
pub const NATIVE_PREFIXES: &[&str] = &["", "lib"];
#[cfg(not(unix))]
pub const NATIVE_PREFIXES: &[&str] = &[""];

#[cfg(target_os = "macos")]
pub const NATIVE_SUFFIXES: &[&str] = &[".dylib"];
#[cfg(target_os = "windows")]
pub const NATIVE_SUFFIXES: &[&str] = &[".dll"];
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub const NATIVE_SUFFIXES: &[&str] = &[".so"];

#[cfg(target_os = "macos")]
const LIBRARY_PATH_VAR: &str = "DYLD_LIBRARY_PATH";
#[cfg(target_os = "windows")]
const LIBRARY_PATH_VAR: &str = "PATH";
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const LIBRARY_PATH_VAR: &str = "LD_LIBRARY_PATH";

/// Directories the host itself would search for a native library.
pub fn host_library_dirs() -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = std::env::var_os(LIBRARY_PATH_VAR)
        .map(|v| std::env::split_paths(&v).collect())
        .unwrap_or_default();

    #[cfg(unix)]
    dirs.extend(["/usr/local/lib", "/usr/lib", "/lib"].map(PathBuf::from));

    dirs.retain(|d| !d.as_os_str().is_empty());
    dirs
}

/// Strip a platform suffix from a native library name (`sni.so` → `sni`).
pub fn trim_native_suffix(name: &str) -> Option<&str> {
    NATIVE_SUFFIXES.iter().find_map(|suffix| {
        name.len()
            .checked_sub(suffix.len())
            .filter(|&cut| {
                cut > 0
                    && name
                        .get(cut..)
                        .is_some_and(|tail| tail.eq_ignore_ascii_case(suffix))
            })
            .map(|cut| &name[..cut])
    })
}

/// Decorated file names for a native base name, most specific first.
pub fn native_file_names(prefix: &str, name: &str) -> Vec<String> {
    let mut names: Vec<String> = NATIVE_SUFFIXES
        .iter()
        .map(|suffix| format!("{prefix}{name}{suffix}"))
        .collect();
    names.push(format!("{prefix}{name}"));
    names
}

/// Known executable-image magics: ELF, PE, Mach-O (32/64, both endians) and fat binaries.
pub fn is_native_image(header: &[u8]) -> bool {
    const MAGICS: &[&[u8]] = &[
        b"\x7fELF",
        b"MZ",
        &[0xfe, 0xed, 0xfa, 0xce],
        &[0xfe, 0xed, 0xfa, 0xcf],
        &[0xce, 0xfa, 0xed, 0xfe],
        &[0xcf, 0xfa, 0xed, 0xfe],
        &[0xca, 0xfe, 0xba, 0xbe],
    ];
    MAGICS.iter().any(|m| header.starts_with(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_native_magics() {
        assert!(is_native_image(b"\x7fELF\x02\x01"));
        assert!(is_native_image(b"MZ\x90\x00"));
        assert!(is_native_image(&[0xcf, 0xfa, 0xed, 0xfe, 0x07]));
        assert!(!is_native_image(b""));
        assert!(!is_native_image(b"{\"name\":\"x\"}"));
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    #[test]
    fn decorations_on_linux() {
        assert_eq!(trim_native_suffix("sni.so"), Some("sni"));
        assert_eq!(trim_native_suffix("sni.SO"), Some("sni"));
        assert_eq!(trim_native_suffix(".so"), None);
        assert_eq!(trim_native_suffix("sni"), None);
        assert_eq!(
            native_file_names("lib", "sqlite3"),
            vec!["libsqlite3.so".to_string(), "libsqlite3".to_string()]
        );
    }
}
