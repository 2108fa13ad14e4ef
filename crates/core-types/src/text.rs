//! Name sanitisers shared by block names, metadata keys and manifest columns.

/// Lowercases `name` and collapses every run of non `[0-9a-z]` characters
/// into a single dash, trimming dashes at both ends.
pub fn to_class_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_dash = false;
    for ch in name.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch);
        } else {
            pending_dash = true;
        }
    }
    out
}

/// Camel-cases the class-name form of `name` (`"Experiment Name"` becomes
/// `"experimentName"`).
pub fn to_camel_case(name: &str) -> String {
    let class_name = to_class_name(name);
    let mut out = String::with_capacity(class_name.len());
    let mut chars = class_name.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '-' {
            match chars.peek() {
                Some(next) if next.is_ascii_lowercase() => {
                    out.push(next.to_ascii_uppercase());
                    chars.next();
                }
                _ => out.push(ch),
            }
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_name_sanitises() {
        assert_eq!(to_class_name("Hello world"), "hello-world");
        assert_eq!(to_class_name("  --Hero  Banner!! "), "hero-banner");
        assert_eq!(to_class_name(""), "");
    }

    #[test]
    fn camel_case_from_class_name() {
        assert_eq!(to_camel_case("HeLlO wOrLd"), "helloWorld");
        assert_eq!(to_camel_case("Experiment Name"), "experimentName");
        assert_eq!(to_camel_case("challenger-1"), "challenger-1");
        assert_eq!(to_camel_case(""), "");
    }
}
