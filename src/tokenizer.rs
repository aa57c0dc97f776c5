//! Shared line tokenizer for the behavior and map languages. Both are
//! line-oriented: an optional `name =` assignment head, a command or type
//! name, and a run of `<Key: Value>` options with nesting allowed inside a
//! value (`<Rect: <0,0,16,16>>`).

/// Splits off a trailing comment at the first literal `#`.
///
/// This is intentionally not quote-aware: a `#` inside a quoted text literal
/// is treated as a comment start, and a line containing more than one `#`
/// keeps nothing. Known limitation, kept for compatibility with existing
/// map and behavior files.
pub fn strip_comment(line: &str) -> &str {
    if !line.contains('#') {
        return line;
    }
    let parts: Vec<&str> = line.split('#').filter(|p| !p.is_empty()).collect();
    if parts.len() == 2 {
        parts[0]
    } else {
        ""
    }
}

/// Indentation depth of the raw (pre-trim) line: one level per four spaces.
pub fn indent_level(line: &str) -> usize {
    line.chars().take_while(|c| *c == ' ').count() / 4
}

/// Splits `name = rest` on a single `=`. Returns the trimmed assignment
/// target (if any) and the remainder.
pub fn split_assignment(text: &str) -> (Option<String>, &str) {
    let mut parts = text.splitn(2, '=');
    let left = parts.next().unwrap_or("");
    match parts.next() {
        Some(right) if !left.trim().is_empty() => (Some(left.trim().to_string()), right),
        _ => (None, text),
    }
}

/// A command or type name plus its raw `<...>` option chunks, still
/// unsplit into key/value pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandChunks {
    pub command: String,
    pub chunks: Vec<String>,
}

/// Splits `Name<chunk><chunk>...` into the name and its top-level chunks,
/// honoring nested `<...>` inside a chunk.
pub fn split_command(text: &str) -> Result<CommandChunks, String> {
    let text = text.trim();
    let open = match text.find('<') {
        Some(index) => index,
        None => {
            return Ok(CommandChunks { command: text.to_string(), chunks: Vec::new() });
        }
    };

    let command = text[..open].trim().to_string();
    let mut chunks = Vec::new();
    let mut depth: i32 = -1;
    let mut current = String::new();

    for ch in text[open..].chars() {
        match ch {
            '<' => {
                if depth >= 0 {
                    current.push(ch);
                }
                depth += 1;
            }
            '>' => {
                if depth == 0 {
                    chunks.push(current.clone());
                    current.clear();
                    depth = -1;
                } else if depth < 0 {
                    return Err("unbalanced '>'".to_string());
                } else {
                    depth -= 1;
                    current.push(ch);
                }
            }
            _ => current.push(ch),
        }
    }

    if !current.is_empty() {
        let name = current.split(':').next().unwrap_or("").trim().to_string();
        return Err(format!("no closing '>' for option '{name}'"));
    }

    Ok(CommandChunks { command, chunks })
}

/// Raw string options of one statement, keyed by lowercased option name.
#[derive(Debug, Clone, Default)]
pub struct OptionBag {
    entries: Vec<(String, String)>,
}

impl OptionBag {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.iter().find(|(key, _)| key == name).map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Splits raw chunks into `key: value` pairs and collects an option bag.
/// Keys are lowercased; values keep their raw spelling for typed coercion
/// by the consuming compiler.
///
/// Both option spellings are accepted: one chunk per option
/// (`<To: x><Maximum: 10>`) and several comma-separated options inside one
/// chunk (`<To: x, Maximum: 10>`). A comma only starts a new option when the
/// following segment reads as `name:`, so vector literals (`Value: 2, 4`)
/// stay whole.
pub fn parse_options(chunks: &[String]) -> Result<OptionBag, String> {
    let mut entries: Vec<(String, String)> = Vec::with_capacity(chunks.len());
    let finish = |entry: Option<(String, String)>, entries: &mut Vec<(String, String)>| {
        if let Some((key, value)) = entry {
            entries.push((key, strip_wrapping_angles(&value).to_string()));
        }
    };
    for chunk in chunks {
        let mut open: Option<(String, String)> = None;
        for segment in split_top_level_commas(chunk) {
            if let Some((key, rest)) = segment.split_once(':') {
                let key = key.trim();
                if is_option_key(key) {
                    finish(open.take(), &mut entries);
                    open = Some((key.to_lowercase(), rest.trim().to_string()));
                    continue;
                }
            }
            match open.as_mut() {
                Some((_, value)) => {
                    value.push_str(", ");
                    value.push_str(segment.trim());
                }
                None => return Err(format!("option '{}' is missing a ':' separator", segment.trim())),
            }
        }
        finish(open.take(), &mut entries);
    }
    Ok(OptionBag { entries })
}

/// `<Rect: <0, 0, 16, 16>>` carries its vector literal in a nested angle
/// pair; one wrapping level is peeled off the stored value.
fn strip_wrapping_angles(value: &str) -> &str {
    let trimmed = value.trim();
    trimmed
        .strip_prefix('<')
        .and_then(|v| v.strip_suffix('>'))
        .unwrap_or(trimmed)
}

fn is_option_key(key: &str) -> bool {
    !key.is_empty()
        && key.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Splits on commas outside any nested `<...>`.
fn split_top_level_commas(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (index, ch) in text.char_indices() {
        match ch {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                out.push(&text[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    out.push(&text[start..]);
    out
}

/// One fully tokenized statement: optional assignment target, command name,
/// raw option chunks.
#[derive(Debug, Clone)]
pub struct Statement {
    pub target: Option<String>,
    pub command: String,
    pub chunks: Vec<String>,
}

pub fn tokenize_statement(text: &str) -> Result<Statement, String> {
    let (target, rest) = split_assignment(text);
    let CommandChunks { command, chunks } = split_command(rest)?;
    Ok(Statement { target, command, chunks })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comment_split_is_naive() {
        assert_eq!(strip_comment("Add<To: x> # bump"), "Add<To: x> ");
        assert_eq!(strip_comment("no comment"), "no comment");
        // Two '#' characters wipe the whole line.
        assert_eq!(strip_comment("a # b # c"), "");
        assert_eq!(strip_comment("# only"), "");
    }

    #[test]
    fn nested_options_stay_whole() {
        let parsed = split_command("Shape2D<Rect: <0, 0, 16, 16>><Type: Box>").expect("parse");
        assert_eq!(parsed.command, "Shape2D");
        assert_eq!(parsed.chunks, vec!["Rect: <0, 0, 16, 16>".to_string(), "Type: Box".to_string()]);
    }

    #[test]
    fn unterminated_option_is_reported() {
        let err = split_command("Image<Id: \"tiles\"").expect_err("should fail");
        assert!(err.contains("no closing '>'"), "{err}");
    }

    #[test]
    fn assignment_head_is_detected() {
        let statement = tokenize_statement("background = Image<Id: \"bg\">").expect("tokenize");
        assert_eq!(statement.target.as_deref(), Some("background"));
        assert_eq!(statement.command, "Image");
    }

    #[test]
    fn comma_separated_options_share_one_chunk() {
        let statement = tokenize_statement("Add<to: x, maximum: 10>").expect("tokenize");
        let bag = parse_options(&statement.chunks).expect("options");
        assert_eq!(bag.get("to"), Some("x"));
        assert_eq!(bag.get("maximum"), Some("10"));
    }

    #[test]
    fn vector_literals_keep_their_commas() {
        let statement =
            tokenize_statement("IsVariable<Variable: pos, Value: 2, 4, Mode: Equal>").expect("tokenize");
        let bag = parse_options(&statement.chunks).expect("options");
        assert_eq!(bag.get("value"), Some("2, 4"));
        assert_eq!(bag.get("mode"), Some("Equal"));
    }

    #[test]
    fn nested_angle_values_are_unwrapped() {
        let statement = tokenize_statement("Shape2D<Rect: <0, 0, 16, 16>>").expect("tokenize");
        let bag = parse_options(&statement.chunks).expect("options");
        assert_eq!(bag.get("rect"), Some("0, 0, 16, 16"));
    }

    #[test]
    fn option_keys_are_lowercased() {
        let statement = tokenize_statement("Disk<Radius: 4><Color: 1,0,0,1>").expect("tokenize");
        let bag = parse_options(&statement.chunks).expect("options");
        assert_eq!(bag.get("radius"), Some("4"));
        assert_eq!(bag.get("color"), Some("1,0,0,1"));
    }
}
