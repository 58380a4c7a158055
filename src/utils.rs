/// Maps accented Latin characters to their unaccented base letter.
fn fold_diacritic(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'Á' | 'À' | 'Â' | 'Ã' | 'Ä' | 'Å' => 'A',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'É' | 'È' | 'Ê' | 'Ë' => 'E',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'Í' | 'Ì' | 'Î' | 'Ï' => 'I',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
        'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => 'O',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
        'ç' => 'c',
        'Ç' => 'C',
        'ñ' => 'n',
        'Ñ' => 'N',
        'ý' | 'ÿ' => 'y',
        'Ý' => 'Y',
        other => other,
    }
}

pub fn strip_diacritics(text: &str) -> String {
    text.chars().map(fold_diacritic).collect()
}

/// Trimmed, diacritics-free, lowercase form used by every text heuristic.
pub fn normalize_text(text: &str) -> String {
    strip_diacritics(text.trim()).to_lowercase()
}

/// Normalized form of a payload key: diacritics stripped, lowercased,
/// spaces replaced by underscores.
pub fn normalize_key(key: &str) -> String {
    strip_diacritics(key).to_lowercase().replace(' ', "_")
}

/// True if `token` appears in `text` delimited by non-alphanumeric characters
/// (or the string boundaries).
pub fn contains_token(text: &str, token: &str) -> bool {
    if token.is_empty() {
        return false;
    }
    text.match_indices(token).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + token.len()..].chars().next();
        let is_boundary = |c: Option<char>| match c {
            None => true,
            Some(ch) => !ch.is_ascii_alphanumeric(),
        };
        is_boundary(before) && is_boundary(after)
    })
}

pub fn contains_any(text: &str, fragments: &[String]) -> bool {
    fragments.iter().any(|fragment| text.contains(fragment.as_str()))
}

/// Uppercases the first character and lowercases the rest.
pub fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// "NOTA_FISCAL_EMITIDA" -> "Nota Fiscal Emitida"
pub fn titleize(code: &str) -> String {
    code.split('_')
        .filter(|part| !part.is_empty())
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
