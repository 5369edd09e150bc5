/// Centralized environment-variable parsing helpers.
///
/// Recorder defaults that can be overridden from the environment read
/// through these helpers so the truthy/falsey parsing logic lives in
/// exactly one place.
use std::path::PathBuf;

/// Returns `true` when the environment variable is set to a truthy value
/// (`1`, `true`, `yes`, or `on`, case-insensitive, trimmed).
#[inline]
pub(crate) fn env_var_truthy(var_name: &str) -> bool {
    std::env::var(var_name)
        .map(|raw| is_truthy(&raw))
        .unwrap_or(false)
}

#[inline]
pub(crate) fn is_truthy(raw: &str) -> bool {
    let normalized = raw.trim().to_ascii_lowercase();
    normalized == "1" || normalized == "true" || normalized == "yes" || normalized == "on"
}

/// Reads the environment variable as a path, ignoring unset or blank values.
#[inline]
pub(crate) fn env_var_path(var_name: &str) -> Option<PathBuf> {
    std::env::var_os(var_name)
        .filter(|raw| !raw.to_string_lossy().trim().is_empty())
        .map(PathBuf::from)
}

/// Declares a cached boolean feature flag backed by a `OnceLock<bool>`.
///
/// `enabled_when(fn_name, "ENV_VAR")` returns `true` only when the env var
/// is truthy (the feature is off by default).
macro_rules! define_env_flag {
    (enabled_when($fn_name:ident, $var:expr)) => {
        #[inline]
        fn $fn_name() -> bool {
            static VALUE: ::std::sync::OnceLock<bool> = ::std::sync::OnceLock::new();
            *VALUE.get_or_init(|| $crate::env_config::env_var_truthy($var))
        }
    };
}

pub(crate) use define_env_flag;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_values_are_case_and_whitespace_insensitive() {
        for raw in ["1", "true", " YES ", "On"] {
            assert!(is_truthy(raw), "{raw:?} should be truthy");
        }
        for raw in ["0", "false", "", "enabled"] {
            assert!(!is_truthy(raw), "{raw:?} should not be truthy");
        }
    }

    #[test]
    fn unset_path_variable_is_none() {
        assert_eq!(env_var_path("OUTPUT_CAPTURE_TEST_SURELY_UNSET_VAR"), None);
    }
}
