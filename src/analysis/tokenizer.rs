use unicode_segmentation::UnicodeSegmentation;
use crate::analysis::locale::{locale_literal, split_ml_stored_value};
use crate::analysis::token::Token;

/// Standard Unicode tokenizer
#[derive(Debug, Clone)]
pub struct StandardTokenizer {
    pub lowercase: bool,
    pub max_token_length: usize,
}

impl Default for StandardTokenizer {
    fn default() -> Self {
        StandardTokenizer {
            lowercase: true,
            max_token_length: 255,
        }
    }
}

impl StandardTokenizer {
    pub fn tokenize(&self, text: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut position = 0u32;

        for word in text.unicode_words() {
            if word.len() > self.max_token_length {
                continue;
            }
            let token_text = if self.lowercase {
                word.to_lowercase()
            } else {
                word.to_string()
            };
            tokens.push(Token::new(token_text, position));
            position += 1;
        }

        tokens
    }

    /// Tokenize a field value, recovering the locale tag when the value is a
    /// stored multilingual marker. Locale-tagged values produce
    /// `{locale}token` terms; plain values produce bare terms.
    pub fn tokenize_value(&self, value: &str) -> Vec<Token> {
        match split_ml_stored_value(value) {
            Some((locale, text)) => self
                .tokenize(text)
                .into_iter()
                .map(|t| Token::new(locale_literal(locale, &t.text), t.position))
                .collect(),
            None => self.tokenize(value),
        }
    }
}
