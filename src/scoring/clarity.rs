// clarity.rs — Rules-based cleanup of recognised English speech

const PUNCTUATION: [char; 6] = ['.', ',', '!', '?', ':', ';'];

/// Apply rules-based clarity corrections before scoring
pub fn transform(text: &str) -> String {
    let mut result = collapse_spaces(text);
    result = drop_fillers(&result);
    result = fix_punctuation(&result);
    result = capitalize_sentences(&result);
    result.trim().to_string()
}

fn collapse_spaces(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Hesitation tokens some recognisers emit verbatim.
fn drop_fillers(text: &str) -> String {
    const FILLERS: [&str; 5] = ["uh", "um", "erm", "uhm", "hmm"];
    text.split(' ')
        .filter(|word| {
            let bare = word.trim_matches(|c: char| PUNCTUATION.contains(&c));
            !FILLERS.contains(&bare.to_ascii_lowercase().as_str())
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn fix_punctuation(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let chars: Vec<char> = text.chars().collect();

    for (i, &ch) in chars.iter().enumerate() {
        // Remove space before punctuation
        if PUNCTUATION.contains(&ch) && result.ends_with(' ') {
            result.pop();
        }

        result.push(ch);

        // Ensure space after punctuation (if next char is letter)
        if PUNCTUATION.contains(&ch) && i + 1 < chars.len() && chars[i + 1].is_alphabetic() {
            result.push(' ');
        }
    }

    result
}

fn capitalize_sentences(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut capitalize_next = true;
    let words: Vec<&str> = text.split(' ').collect();

    for (i, word) in words.iter().enumerate() {
        if i > 0 {
            result.push(' ');
        }
        // Recognisers often emit a lowercase first-person "i".
        let word = match *word {
            "i" => "I",
            "i'm" => "I'm",
            "i've" => "I've",
            "i'd" => "I'd",
            "i'll" => "I'll",
            other => other,
        };
        for ch in word.chars() {
            if capitalize_next && ch.is_alphabetic() {
                result.extend(ch.to_uppercase());
                capitalize_next = false;
            } else {
                result.push(ch);
            }
            if ch == '.' || ch == '!' || ch == '?' {
                capitalize_next = true;
            }
        }
    }

    // Ensure text ends with period if it doesn't end with punctuation
    let trimmed = result.trim_end();
    match trimmed.chars().last() {
        Some(last) if last != '.' && last != '!' && last != '?' => format!("{}.", trimmed),
        _ => result,
    }
}
