/// Split text into lowercase word tokens.
///
/// A token is a maximal run of Unicode alphanumerics or `_`, so `parse_json`
/// stays one token while `a.b::c` yields three. No stemming, no stop words.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !is_word_char(c))
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn is_word_char(c: char) -> bool {
    c == '_' || c.is_alphanumeric()
}

#[cfg(test)]
mod tests {
    use super::tokenize;

    #[test]
    fn splits_on_punctuation_and_lowercases() {
        assert_eq!(
            tokenize("fn Parse_JSON(input: &str) -> Result<Value>"),
            vec!["fn", "parse_json", "input", "str", "result", "value"]
        );
    }

    #[test]
    fn keeps_unicode_words() {
        assert_eq!(tokenize("检索 über-Größe"), vec!["检索", "über", "größe"]);
    }

    #[test]
    fn empty_and_symbol_only_inputs_yield_nothing() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("  -> :: {} ").is_empty());
    }
}
