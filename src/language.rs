//! Language detection for user questions
//!
//! The detected language is resolved once per turn and every worker agent
//! is told to answer in it.

use tracing::debug;
use whatlang::{Detector, Lang};

/// Languages agents are allowed to answer in, keyed by ISO 639-1 tag
pub const SUPPORTED_LANGUAGES: &[(&str, &str)] = &[
    ("en", "English"),
    ("es", "Spanish"),
    ("fr", "French"),
    ("de", "German"),
    ("it", "Italian"),
    ("pt", "Portuguese"),
    ("ru", "Russian"),
    ("ja", "Japanese"),
    ("hi", "Hindi"),
    ("th", "Thai"),
];

pub const FALLBACK_LANGUAGE: &str = "Spanish";

/// Detects the language of a piece of text
pub trait LanguageDetector: Send + Sync {
    /// ISO 639-1 tag, or `None` when the text gives no usable signal
    fn detect(&self, text: &str) -> Option<String>;
}

/// Map a tag to its language name if supported
pub fn language_name(tag: &str) -> Option<&'static str> {
    let tag = tag.trim().to_lowercase();
    SUPPORTED_LANGUAGES
        .iter()
        .find(|(code, _)| *code == tag)
        .map(|(_, name)| *name)
}

/// Detect and map to a supported language name, or use `fallback`
pub fn resolve_language(detector: &dyn LanguageDetector, text: &str, fallback: &str) -> String {
    detector
        .detect(text)
        .and_then(|tag| language_name(&tag))
        .map(str::to_string)
        .unwrap_or_else(|| fallback.to_string())
}

/// Instruction block appended to every worker system prompt
pub fn language_prompt(language: &str) -> String {
    format!(
        "IMPORTANT: The user's original message was in {lang}.\n\
         You MUST respond in {lang} to match the user's language.\n\
         If you don't speak {lang} fluently, provide your technical response in {fallback} \
         but add a note that you're responding in {fallback} due to technical limitations.",
        lang = language,
        fallback = FALLBACK_LANGUAGE,
    )
}

/// Statistical detector over the supported languages only
pub struct WhatlangDetector {
    detector: Detector,
}

impl Default for WhatlangDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl WhatlangDetector {
    pub fn new() -> Self {
        let allowed = vec![
            Lang::Eng,
            Lang::Spa,
            Lang::Fra,
            Lang::Deu,
            Lang::Ita,
            Lang::Por,
            Lang::Rus,
            Lang::Jpn,
            Lang::Hin,
            Lang::Tha,
        ];
        Self {
            detector: Detector::with_allowlist(allowed),
        }
    }

    fn tag(lang: Lang) -> &'static str {
        match lang {
            Lang::Eng => "en",
            Lang::Spa => "es",
            Lang::Fra => "fr",
            Lang::Deu => "de",
            Lang::Ita => "it",
            Lang::Por => "pt",
            Lang::Rus => "ru",
            Lang::Jpn => "ja",
            Lang::Hin => "hi",
            Lang::Tha => "th",
            other => other.code(),
        }
    }
}

impl LanguageDetector for WhatlangDetector {
    fn detect(&self, text: &str) -> Option<String> {
        let info = self.detector.detect(text)?;
        debug!(
            lang = info.lang().code(),
            confidence = info.confidence(),
            reliable = info.is_reliable(),
            "language detected"
        );
        Some(Self::tag(info.lang()).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_common_languages() {
        let detector = WhatlangDetector::new();
        let cases = [
            ("Why can't I reach the office printer from my laptop since this morning?", "en"),
            ("¿Por qué no funciona el wifi de mi oficina desde esta mañana?", "es"),
            ("Pourquoi mon VPN ne fonctionne plus depuis ce matin au bureau ?", "fr"),
            ("Warum funktioniert mein Internet im Büro seit heute Morgen nicht mehr?", "de"),
            ("Почему у меня не работает интернет в офисе?", "ru"),
            ("ネットワークがとても遅いです", "ja"),
        ];
        for (text, tag) in cases {
            assert_eq!(detector.detect(text).as_deref(), Some(tag), "{}", text);
        }
    }

    #[test]
    fn test_resolves_to_language_names() {
        let detector = WhatlangDetector::new();
        assert_eq!(
            resolve_language(&detector, "Pourquoi mon VPN ne fonctionne plus depuis ce matin ?", "Spanish"),
            "French"
        );
    }

    #[test]
    fn test_no_letters_falls_back() {
        let detector = WhatlangDetector::new();
        assert_eq!(detector.detect("8.8.8.8 443"), None);
        assert_eq!(resolve_language(&detector, "8.8.8.8 443", "Spanish"), "Spanish");
    }

    #[test]
    fn test_unsupported_tag_falls_back() {
        struct Always(&'static str);
        impl LanguageDetector for Always {
            fn detect(&self, _text: &str) -> Option<String> {
                Some(self.0.to_string())
            }
        }
        assert_eq!(resolve_language(&Always("nl"), "hallo", "Spanish"), "Spanish");
        assert_eq!(resolve_language(&Always("DE"), "hallo", "Spanish"), "German");
    }

    #[test]
    fn test_language_prompt_names_language() {
        let prompt = language_prompt("French");
        assert!(prompt.contains("You MUST respond in French"));
    }
}
