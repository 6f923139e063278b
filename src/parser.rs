//! Visible-text extraction and tokenization for the indexer.
//!
//! Extraction walks the parsed DOM and keeps what a reader would see:
//! text nodes, minus everything under `script` and `style`. Tokenization
//! is deliberately byte-oriented so the same input always yields the same
//! token sequence regardless of locale.

use ego_tree::NodeRef;
use scraper::{Html, Node};

/// Tokens shorter than this are dropped.
const MIN_TOKEN_LEN: usize = 3;

/// Extract the visible text of an HTML document as a single string.
///
/// Element children are joined with a single space when non-empty, which
/// is what puts a token boundary between adjacent inline elements.
pub fn extract_text(html: &str) -> String {
    let document = Html::parse_document(html);
    node_text(*document.root_element())
}

fn node_text(node: NodeRef<'_, Node>) -> String {
    match node.value() {
        Node::Text(text) => text.to_string(),
        Node::Element(element) => {
            if matches!(element.name(), "script" | "style") {
                return String::new();
            }
            let mut parts: Vec<String> = Vec::new();
            for child in node.children() {
                let text = node_text(child);
                if !text.is_empty() {
                    parts.push(text);
                }
            }
            parts.join(" ")
        }
        // Comments, doctypes and processing instructions carry no visible text.
        _ => String::new(),
    }
}

/// Split text into lowercase alphanumeric tokens of length >= 3.
///
/// Bytes outside ASCII letters and digits are boundaries, including all
/// non-ASCII bytes. Token order follows text order and repeats are kept;
/// `doc_length` is defined over this raw sequence.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();

    for &byte in text.as_bytes() {
        if byte.is_ascii_alphanumeric() {
            current.push(byte.to_ascii_lowercase() as char);
        } else if !current.is_empty() {
            if current.len() >= MIN_TOKEN_LEN {
                tokens.push(std::mem::take(&mut current));
            } else {
                current.clear();
            }
        }
    }
    if current.len() >= MIN_TOKEN_LEN {
        tokens.push(current);
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_drops_short_tokens_and_lowercases() {
        let tokens = tokenize("Hello, WORLD! a ab abc 123 <b>x</b>y");
        assert_eq!(tokens, vec!["hello", "world", "abc", "123"]);
    }

    #[test]
    fn test_tokenize_is_deterministic() {
        let input = "The quick brown fox, 42 times; Ünïcödé splits here";
        assert_eq!(tokenize(input), tokenize(input));
    }

    #[test]
    fn test_tokenize_output_alphabet() {
        let tokens = tokenize("MIXED case And-Some_Punctuation 999 a1b2c3");
        for token in &tokens {
            assert!(token.len() >= 3);
            assert!(token
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()));
        }
    }

    #[test]
    fn test_tokenize_non_ascii_is_a_boundary() {
        // "é" is two bytes, both boundaries, so "café" yields "caf".
        assert_eq!(tokenize("café"), vec!["caf"]);
        assert_eq!(tokenize("über"), vec!["ber"]);
    }

    #[test]
    fn test_tokenize_keeps_repeats_in_order() {
        assert_eq!(tokenize("dog cat dog"), vec!["dog", "cat", "dog"]);
    }

    #[test]
    fn test_tokenize_empty_input() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("!! ?? ..").is_empty());
    }

    #[test]
    fn test_extract_skips_script_and_style() {
        let html =
            "<html><body>Hi <script>alert(1)</script><b>there</b></body></html>";
        let text = extract_text(html);
        assert!(text.contains("Hi"));
        assert!(text.contains("there"));
        assert!(!text.contains("alert"));
        assert!(!text.contains('1'));
    }

    #[test]
    fn test_extract_joins_siblings_with_space() {
        let html = "<html><body><p>one</p><p>two</p></body></html>";
        let text = extract_text(html);
        let tokens = tokenize(&text);
        assert_eq!(tokens, vec!["one", "two"]);
    }

    #[test]
    fn test_extract_ignores_comments() {
        let html = "<html><body>keep<!-- drop this -->me</body></html>";
        let text = extract_text(html);
        assert!(text.contains("keep"));
        assert!(text.contains("me"));
        assert!(!text.contains("drop"));
    }

    #[test]
    fn test_extract_style_block() {
        let html = "<html><head><style>body { color: red }</style></head>\
                    <body>visible</body></html>";
        let text = extract_text(html);
        assert!(text.contains("visible"));
        assert!(!text.contains("color"));
    }

    #[test]
    fn test_extract_then_tokenize_pipeline() {
        let html = "<html><body><h1>Rust Crawler</h1>\
                    <p>It archives pages, it indexes pages.</p></body></html>";
        let tokens = tokenize(&extract_text(html));
        assert_eq!(
            tokens,
            vec!["rust", "crawler", "archives", "pages", "indexes", "pages"]
        );
    }
}
