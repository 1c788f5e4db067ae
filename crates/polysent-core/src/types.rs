//! Core types for polysent

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

macro_rules! language_tags {
    ($($variant:ident => $name:literal, $code:literal;)+) => {
        /// Natural language identified by a language detector.
        ///
        /// `Unknown` is returned when detection fails or is ambiguous. It never
        /// has a model binding of its own.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum LanguageTag {
            $(
                #[doc = $name]
                $variant,
            )+
            /// Detection failed or was ambiguous
            Unknown,
        }

        impl LanguageTag {
            /// All known languages, excluding `Unknown`
            pub const ALL: &'static [LanguageTag] = &[$(LanguageTag::$variant),+];

            /// Lowercase English name, as used in configuration files
            pub fn name(&self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                    Self::Unknown => "unknown",
                }
            }

            /// ISO 639-1 code, `None` for `Unknown`
            pub fn iso_code(&self) -> Option<&'static str> {
                match self {
                    $(Self::$variant => Some($code),)+
                    Self::Unknown => None,
                }
            }
        }

        impl FromStr for LanguageTag {
            type Err = crate::Error;

            fn from_str(s: &str) -> crate::Result<Self> {
                let key = s.trim().to_ascii_lowercase();
                match key.as_str() {
                    $($name | $code => Ok(Self::$variant),)+
                    "unknown" => Ok(Self::Unknown),
                    _ => Err(crate::Error::config(format!("unrecognized language '{}'", s))),
                }
            }
        }
    };
}

language_tags! {
    Arabic => "arabic", "ar";
    Bengali => "bengali", "bn";
    Chinese => "chinese", "zh";
    Czech => "czech", "cs";
    Danish => "danish", "da";
    Dutch => "dutch", "nl";
    English => "english", "en";
    Estonian => "estonian", "et";
    Finnish => "finnish", "fi";
    French => "french", "fr";
    German => "german", "de";
    Greek => "greek", "el";
    Hebrew => "hebrew", "he";
    Hindi => "hindi", "hi";
    Hungarian => "hungarian", "hu";
    Indonesian => "indonesian", "id";
    Italian => "italian", "it";
    Japanese => "japanese", "ja";
    Korean => "korean", "ko";
    Malay => "malay", "ms";
    Norwegian => "norwegian", "no";
    Persian => "persian", "fa";
    Polish => "polish", "pl";
    Portuguese => "portuguese", "pt";
    Romanian => "romanian", "ro";
    Russian => "russian", "ru";
    Spanish => "spanish", "es";
    Swedish => "swedish", "sv";
    Tagalog => "tagalog", "tl";
    Thai => "thai", "th";
    Turkish => "turkish", "tr";
    Ukrainian => "ukrainian", "uk";
    Vietnamese => "vietnamese", "vi";
}

impl LanguageTag {
    /// Whether this is the distinguished unknown tag
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }
}

impl fmt::Display for LanguageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for LanguageTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for LanguageTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Identifier naming a classification model (e.g. a Hugging Face repo id)
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(String);

impl ModelId {
    /// Create a new model identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModelId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ModelId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for ModelId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ModelId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Sentiment of a single message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentResult {
    /// Sentiment label (lowercase once returned by the router)
    pub label: String,

    /// Confidence score (0.0-1.0)
    pub score: f32,
}

impl SentimentResult {
    /// Label of the sentinel for messages with no model binding
    pub const NONE_LABEL: &'static str = "none";

    /// Label of the sentinel for messages whose engine failed
    pub const ERROR_LABEL: &'static str = "error";

    /// Create a new sentiment result
    pub fn new(label: impl Into<String>, score: f32) -> Self {
        Self {
            label: label.into(),
            score,
        }
    }

    /// Sentinel for messages that map to no model
    pub fn none() -> Self {
        Self::new(Self::NONE_LABEL, 0.0)
    }

    /// Sentinel for messages whose group failed under the fallback policy
    pub fn error() -> Self {
        Self::new(Self::ERROR_LABEL, 0.0)
    }

    /// Whether this is the unclassifiable sentinel
    pub fn is_none(&self) -> bool {
        self.label == Self::NONE_LABEL && self.score == 0.0
    }

    /// Whether this is the engine-failure sentinel
    pub fn is_error(&self) -> bool {
        self.label == Self::ERROR_LABEL && self.score == 0.0
    }

    /// Lowercase the label in place
    pub fn normalize(&mut self) {
        if self.label.chars().any(char::is_uppercase) {
            self.label = self.label.to_lowercase();
        }
    }

    /// Consume and return the result with a lowercase label
    pub fn normalized(mut self) -> Self {
        self.normalize();
        self
    }
}
