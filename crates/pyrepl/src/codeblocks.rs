//! Stripping Markdown code fences from submitted code.

use std::sync::LazyLock;

use regex::Regex;

/// Code with its fence removed.
///
/// `language` is `None` when the input was not fenced at all, and an empty
/// string when the fence named no language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Codeblock {
    pub language: Option<String>,
    pub content: String,
}

static FENCED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\A```([^`\n]*)\n(.*?)```\s*\z").expect("fenced block pattern compiles"));

static INLINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\A(?:```(.*?)```|``(.*?)``|`(.*?)`)\s*\z").expect("inline code pattern compiles")
});

/// Splits a possibly fenced argument into its language tag and code.
///
/// ```
/// use pyrepl::codeblock_converter;
///
/// let block = codeblock_converter("```py\nprint(1)\n```");
/// assert_eq!(block.language.as_deref(), Some("py"));
/// assert_eq!(block.content, "print(1)\n");
/// ```
#[must_use]
pub fn codeblock_converter(argument: &str) -> Codeblock {
    if !argument.starts_with('`') {
        return Codeblock {
            language: None,
            content: argument.to_owned(),
        };
    }
    if let Some(captures) = FENCED.captures(argument) {
        return Codeblock {
            language: Some(captures[1].trim().to_owned()),
            content: captures[2].to_owned(),
        };
    }
    let inline = INLINE
        .captures(argument)
        .and_then(|captures| captures.iter().skip(1).flatten().next().map(|m| m.as_str().to_owned()));
    Codeblock {
        language: Some(String::new()),
        // an unterminated fence keeps everything after the opening backticks
        content: inline.unwrap_or_else(|| argument.trim_start_matches('`').to_owned()),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn block(language: Option<&str>, content: &str) -> Codeblock {
        Codeblock {
            language: language.map(str::to_owned),
            content: content.to_owned(),
        }
    }

    #[test]
    fn plain_text_is_untouched() {
        assert_eq!(codeblock_converter("1 + 1"), block(None, "1 + 1"));
        assert_eq!(codeblock_converter(" `x`"), block(None, " `x`"));
    }

    #[test]
    fn fenced_blocks_report_their_language() {
        assert_eq!(codeblock_converter("```py\nx = 1\nx\n```"), block(Some("py"), "x = 1\nx\n"));
        assert_eq!(codeblock_converter("```\nyield 3```"), block(Some(""), "yield 3"));
        assert_eq!(codeblock_converter("```python \na```\n"), block(Some("python"), "a"));
    }

    #[test]
    fn inline_code_has_empty_language() {
        assert_eq!(codeblock_converter("`1 + 2`"), block(Some(""), "1 + 2"));
        assert_eq!(codeblock_converter("``a ` b``"), block(Some(""), "a ` b"));
        assert_eq!(codeblock_converter("```print(1)```"), block(Some(""), "print(1)"));
    }

    #[test]
    fn patterns_compile() {
        assert!(FENCED.is_match("```\n```"));
        assert!(INLINE.is_match("`x`"));
    }

    #[test]
    fn unterminated_fence_drops_opening_backticks() {
        assert_eq!(codeblock_converter("```oops"), block(Some(""), "oops"));
    }
}
