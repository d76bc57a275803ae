//! Path normalization shared by route registration, base-route auth overrides and the global
//! API prefix. Every place that compares or joins route paths goes through [`normalize`] so the
//! two sides of a comparison are always produced by the same logic.

/// Join `prefix` and `path` into a single normalized route path.
///
/// Both segments get exactly one leading `/`, `path` is only appended when non-empty, and any run
/// of consecutive `/` is collapsed into one. Trailing slashes are preserved.
///
/// ```
/// use routemark::path::normalize;
///
/// assert_eq!(normalize("users", ":id"), "/users/:id");
/// assert_eq!(normalize("//api/", "/v1//users"), "/api/v1/users");
/// assert_eq!(normalize("", ""), "/");
/// ```
#[must_use]
pub fn normalize(prefix: &str, path: &str) -> String {
    let mut joined = String::with_capacity(prefix.len() + path.len() + 2);
    joined.push('/');
    joined.push_str(prefix);
    if !path.is_empty() {
        joined.push('/');
        joined.push_str(path);
    }
    collapse_slashes(&joined)
}

fn collapse_slashes(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut previous_slash = false;
    for ch in raw.chars() {
        if ch == '/' {
            if previous_slash {
                continue;
            }
            previous_slash = true;
        } else {
            previous_slash = false;
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_adds_leading_slash() {
        assert_eq!(normalize("users", ""), "/users");
        assert_eq!(normalize("users", "list"), "/users/list");
    }

    #[test]
    fn test_normalize_collapses_runs() {
        assert_eq!(normalize("///users//", "//:id"), "/users/:id");
        assert_eq!(normalize("/", "/"), "/");
    }

    #[test]
    fn test_normalize_keeps_trailing_slash() {
        assert_eq!(normalize("/users/", ""), "/users/");
    }

    #[test]
    fn test_normalize_root_prefix() {
        assert_eq!(normalize("/", "/users"), "/users");
        assert_eq!(normalize("/", ""), "/");
    }
}
