/// sanitizes a file name for use as an on-disk path segment: keep
/// alphanumerics and `. _ -`, strip everything else, then trim trailing
/// whitespace left over from the stripping.
pub fn safe_name(name: &str) -> String {
    let filtered: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '.' | '_' | '-' | ' '))
        .collect();
    filtered.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_alphanumerics_dots_underscores_dashes() {
        assert_eq!(safe_name("report_final-v2.1.txt"), "report_final-v2.1.txt");
    }

    #[test]
    fn strips_path_separators_and_other_punctuation() {
        assert_eq!(safe_name("../../etc/passwd"), "etcpasswd");
        assert_eq!(safe_name("weird:name?.bin"), "weirdname.bin");
    }

    #[test]
    fn trims_trailing_whitespace_left_by_stripping() {
        assert_eq!(safe_name("name!!!  "), "name");
    }
}
