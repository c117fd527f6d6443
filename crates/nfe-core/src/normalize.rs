use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Normalize a display label into an ASCII snake_case key.
///
/// Decomposes to NFD, drops combining marks, collapses every run of
/// non-alphanumeric characters into one `_`, trims `_` from both ends and
/// lowercases.
///
/// Example: `"Última Verificação"` → `"ultima_verificacao"`
pub fn normalize_key(label: &str) -> String {
    let mut key = String::with_capacity(label.len());
    let mut pending_sep = false;

    for c in label.nfd().filter(|c| !is_combining_mark(*c)) {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !key.is_empty() {
                key.push('_');
            }
            pending_sep = false;
            key.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }

    key
}
