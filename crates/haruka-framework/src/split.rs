//! Prefix matching and argument splitting for command text.

use thiserror::Error;

/// Returned by [`shell_split`] when a quote is never closed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unbalanced quote at byte {0}")]
pub struct UnbalancedQuote(pub usize);

/// Shell-like argument splitting for plain text.
///
/// Handles:
/// - Whitespace-separated arguments
/// - Quoted strings (single and double quotes)
/// - Backslash escapes: any character outside quotes, only `"` and `\`
///   inside double quotes
///
/// Single quotes are literal: a backslash inside them is kept as-is. Inside
/// double quotes a backslash before any other character is kept too, so
/// `"c:\dir"` stays `c:\dir`.
pub fn shell_split(input: &str) -> Result<Vec<String>, UnbalancedQuote> {
    let mut args = Vec::new();
    let mut current = String::new();
    // Tracks "inside a word" separately so `''` yields an empty argument.
    let mut in_word = false;
    let mut quote_start: Option<usize> = None;
    let mut in_single_quote = false;
    let mut in_double_quote = false;
    let mut escape_next = false;

    for (idx, ch) in input.char_indices() {
        if escape_next {
            if in_double_quote && !matches!(ch, '"' | '\\') {
                current.push('\\');
            }
            current.push(ch);
            escape_next = false;
            continue;
        }

        match ch {
            '\\' if !in_single_quote => {
                escape_next = true;
                in_word = true;
            }
            '\'' if !in_double_quote => {
                in_single_quote = !in_single_quote;
                quote_start = in_single_quote.then_some(idx);
                in_word = true;
            }
            '"' if !in_single_quote => {
                in_double_quote = !in_double_quote;
                quote_start = in_double_quote.then_some(idx);
                in_word = true;
            }
            c if c.is_whitespace() && !in_single_quote && !in_double_quote => {
                if in_word {
                    args.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            _ => {
                current.push(ch);
                in_word = true;
            }
        }
    }

    if in_single_quote || in_double_quote {
        return Err(UnbalancedQuote(quote_start.unwrap_or_default()));
    }
    if escape_next {
        // Trailing backslash is kept literally.
        current.push('\\');
    }
    if in_word {
        args.push(current);
    }

    Ok(args)
}

/// Splits `input` with [`shell_split`], falling back to plain whitespace
/// splitting when the quotes do not balance.
pub fn split_args(input: &str) -> Vec<String> {
    shell_split(input)
        .unwrap_or_else(|_| input.split_whitespace().map(str::to_string).collect())
}

/// A message that passed prefix matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    /// The prefix that matched.
    pub prefix: String,
    /// First token after the prefix, case-folded.
    pub trigger: String,
    /// Tokens after the trigger, shell-split.
    pub args: Vec<String>,
    /// Raw text after the trigger with leading whitespace removed.
    pub input: String,
}

/// Why a message was not parsed as a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMiss {
    /// The text starts with none of the configured prefixes.
    NoPrefix,
    /// A prefix matched but nothing followed it.
    EmptyTrigger,
}

/// Matches `text` against `prefixes` and splits it into trigger and
/// arguments.
///
/// When several prefixes match, the longest one wins, so `..` beats `.` for
/// `..ping`. Empty prefixes never match.
pub fn parse_command<S: AsRef<str>>(prefixes: &[S], text: &str) -> Result<ParsedCommand, ParseMiss> {
    let prefix = prefixes
        .iter()
        .map(AsRef::as_ref)
        .filter(|p| !p.is_empty() && text.starts_with(p))
        .max_by_key(|p| p.len())
        .ok_or(ParseMiss::NoPrefix)?;

    let rest = &text[prefix.len()..];
    let (head, tail) = match rest.find(char::is_whitespace) {
        Some(pos) => rest.split_at(pos),
        None => (rest, ""),
    };
    if head.is_empty() {
        return Err(ParseMiss::EmptyTrigger);
    }

    let input = tail.trim_start().to_string();
    Ok(ParsedCommand {
        prefix: prefix.to_string(),
        trigger: head.to_lowercase(),
        args: split_args(&input),
        input,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_split_simple() {
        let args = shell_split("echo hello world").unwrap();
        assert_eq!(args, vec!["echo", "hello", "world"]);
    }

    #[test]
    fn test_shell_split_quoted() {
        let args = shell_split(r#"echo "hello world" test"#).unwrap();
        assert_eq!(args, vec!["echo", "hello world", "test"]);
    }

    #[test]
    fn test_shell_split_mixed_quotes() {
        let args = shell_split(r#"cmd "double's quote" 'single"s quote'"#).unwrap();
        assert_eq!(args, vec!["cmd", "double's quote", r#"single"s quote"#]);
    }

    #[test]
    fn test_shell_split_escapes() {
        let args = shell_split(r#"a\ b "c\"d" 'e\f'"#).unwrap();
        assert_eq!(args, vec!["a b", "c\"d", r"e\f"]);
    }

    #[test]
    fn test_backslash_in_double_quotes_only_escapes_quote_and_backslash() {
        let args = shell_split(r#""c\d" "x\\y" "q\"q" c\d"#).unwrap();
        assert_eq!(args, vec![r"c\d", r"x\y", r#"q"q"#, "cd"]);
    }

    #[test]
    fn test_shell_split_empty_quotes_make_argument() {
        let args = shell_split("set key ''").unwrap();
        assert_eq!(args, vec!["set", "key", ""]);
    }

    #[test]
    fn test_shell_split_whitespace_only() {
        assert!(shell_split("   \t  ").unwrap().is_empty());
    }

    #[test]
    fn test_unbalanced_quote_falls_back_to_whitespace() {
        assert_eq!(shell_split("say \"hi there"), Err(UnbalancedQuote(4)));
        assert_eq!(split_args("say \"hi there"), vec!["say", "\"hi", "there"]);
    }

    #[test]
    fn test_parse_quoted_argument() {
        let parsed = parse_command(&["."], ".echo \"hi there\"").unwrap();
        assert_eq!(parsed.trigger, "echo");
        assert_eq!(parsed.args, vec!["hi there"]);
        assert_eq!(parsed.input, "\"hi there\"");
    }

    #[test]
    fn test_parse_folds_trigger_case() {
        let parsed = parse_command(&["."], ".PiNg   now").unwrap();
        assert_eq!(parsed.trigger, "ping");
        assert_eq!(parsed.input, "now");
        assert_eq!(parsed.args, vec!["now"]);
    }

    #[test]
    fn test_parse_misses() {
        assert_eq!(parse_command(&["."], "hello"), Err(ParseMiss::NoPrefix));
        assert_eq!(parse_command(&["."], "."), Err(ParseMiss::EmptyTrigger));
        assert_eq!(parse_command(&["."], ". ping"), Err(ParseMiss::EmptyTrigger));
        assert_eq!(parse_command::<&str>(&[], ".ping"), Err(ParseMiss::NoPrefix));
    }

    #[test]
    fn test_longest_prefix_wins() {
        let parsed = parse_command(&[".", ".."], "..ping").unwrap();
        assert_eq!(parsed.prefix, "..");
        assert_eq!(parsed.trigger, "ping");

        let parsed = parse_command(&["!", "."], ".ping").unwrap();
        assert_eq!(parsed.prefix, ".");
    }
}
