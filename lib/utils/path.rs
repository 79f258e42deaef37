//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The sub directory of the staging area where downloaded layer archives are kept.
pub const LAYERS_SUBDIR: &str = "layers";

/// The default directory where the merged image filesystem is written.
pub const DEFAULT_OUTPUT_DIR: &str = "./output";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Replaces characters that are unsafe in file names (e.g. the `:` in `sha256:<hex>`)
/// so a digest can be used as an on-disk path component.
pub fn sanitize_name_for_path(name: &str) -> String {
    name.replace(':', "_")
}

/// Formats a unix permission mode as an `rwxrwxrwx` style string.
pub fn format_mode(mode: u32) -> String {
    let mut out = String::with_capacity(9);
    for shift in [6u32, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utils_sanitize_name_for_path() {
        assert_eq!(
            sanitize_name_for_path("sha256:abc123"),
            "sha256_abc123".to_string()
        );
        assert_eq!(sanitize_name_for_path("plain"), "plain".to_string());
    }

    #[test]
    fn test_utils_format_mode() {
        assert_eq!(format_mode(0o755), "rwxr-xr-x");
        assert_eq!(format_mode(0o644), "rw-r--r--");
        assert_eq!(format_mode(0o000), "---------");
    }
}
