//! Spoken-digit normalization (spec §4.4 "Dual sourcing"): turns STT text
//! like `"one two triple three"` into `"12333"`.

const WORDS: &[(&str, char)] = &[
    ("zero", '0'), ("oh", '0'),
    ("one", '1'),
    ("two", '2'), ("to", '2'), ("too", '2'),
    ("three", '3'),
    ("four", '4'), ("for", '4'),
    ("five", '5'),
    ("six", '6'),
    ("seven", '7'),
    ("eight", '8'), ("ate", '8'),
    ("nine", '9'),
];

const MULTIPLIERS: &[(&str, u32)] = &[("double", 2), ("triple", 3), ("quadruple", 4)];

fn word_to_digit(word: &str) -> Option<char> {
    WORDS.iter().find(|(w, _)| *w == word).map(|(_, d)| *d)
}

fn multiplier(word: &str) -> Option<u32> {
    MULTIPLIERS.iter().find(|(w, _)| *w == word).map(|(_, n)| *n)
}

/// Parse spoken digits, honoring `double`/`triple`/`quadruple` prefixes and
/// bare digit characters interspersed with words. Fails with a descriptive
/// message if a token cannot be resolved to a digit.
pub fn normalize(text: &str) -> std::result::Result<String, String> {
    let mut out = String::new();
    let mut pending_multiplier: Option<u32> = None;

    for raw_token in text.to_lowercase().split_whitespace() {
        let token = raw_token.trim_matches(|c: char| !c.is_alphanumeric());
        if token.is_empty() {
            continue;
        }

        if let Some(n) = multiplier(token) {
            pending_multiplier = Some(n);
            continue;
        }

        let digit = if token.chars().all(|c| c.is_ascii_digit()) && token.len() == 1 {
            token.chars().next()
        } else {
            word_to_digit(token)
        };

        match digit {
            Some(d) => {
                let count = pending_multiplier.take().unwrap_or(1);
                for _ in 0..count {
                    out.push(d);
                }
            }
            None => return Err(format!("could not resolve spoken token '{token}' to a digit")),
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_triple_and_bare_words() {
        assert_eq!(normalize("one two triple three").unwrap(), "12333");
    }

    #[test]
    fn expands_double() {
        assert_eq!(normalize("double nine five").unwrap(), "995");
    }

    #[test]
    fn rejects_unrecognized_token() {
        assert!(normalize("one banana three").is_err());
    }
}
