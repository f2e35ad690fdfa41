use fluent_bundle::{FluentBundle, FluentResource};
use std::cell::RefCell;
use std::collections::HashMap;
use tracing::warn;
use unic_langid::LanguageIdentifier;

/// Built-in locales, compiled into the binary.
const LOCALES: &[(&str, &str)] = &[
    ("en", include_str!("../locales/en/main.ftl")),
    ("ru", include_str!("../locales/ru/main.ftl")),
];

/// Localization manager for user-facing bot messages
pub struct LocalizationManager {
    bundles: HashMap<String, FluentBundle<FluentResource>>,
}

impl LocalizationManager {
    /// Create a new localization manager from the built-in locales
    pub fn new() -> Self {
        let mut bundles = HashMap::new();
        for (locale_str, source) in LOCALES {
            let locale: LanguageIdentifier = match locale_str.parse() {
                Ok(locale) => locale,
                Err(e) => {
                    warn!(locale = locale_str, error = %e, "Invalid locale identifier");
                    continue;
                }
            };
            let mut bundle = FluentBundle::new(vec![locale]);
            // Telegram clients render the bidi isolation marks literally
            bundle.set_use_isolating(false);
            match FluentResource::try_new((*source).to_string()) {
                Ok(resource) => {
                    let _ = bundle.add_resource(resource);
                }
                Err((_, errors)) => {
                    warn!(locale = locale_str, ?errors, "Invalid fluent resource");
                }
            }
            bundles.insert((*locale_str).to_string(), bundle);
        }
        Self { bundles }
    }

    /// Get a localized message in a specific language
    pub fn get_message_in_language(
        &self,
        key: &str,
        language: &str,
        args: Option<&HashMap<&str, &str>>,
    ) -> String {
        let bundle = match self.bundles.get(language) {
            Some(bundle) => bundle,
            None => {
                // Fallback to English if language not found
                match self.bundles.get("en") {
                    Some(bundle) => bundle,
                    None => return format!("Missing translation: {}", key),
                }
            }
        };

        let msg = match bundle.get_message(key) {
            Some(msg) => msg,
            None => return format!("Missing translation: {}", key),
        };

        let pattern = match msg.value() {
            Some(pattern) => pattern,
            None => return format!("Missing value for key: {}", key),
        };

        let mut value = String::new();

        if let Some(args) = args {
            let fluent_args = fluent_bundle::FluentArgs::from_iter(
                args.iter()
                    .map(|(k, v)| (*k, fluent_bundle::FluentValue::from(*v))),
            );

            let _ = bundle.write_pattern(&mut value, pattern, Some(&fluent_args), &mut vec![]);
        } else {
            let _ = bundle.write_pattern(&mut value, pattern, None, &mut vec![]);
        }

        value
    }

    /// Get a localized message with arguments in a specific language
    pub fn get_message_with_args_in_language(
        &self,
        key: &str,
        language: &str,
        args: &[(&str, &str)],
    ) -> String {
        let args_map: HashMap<&str, &str> = args.iter().cloned().collect();
        self.get_message_in_language(key, language, Some(&args_map))
    }

    /// Check if a language is supported
    pub fn is_language_supported(&self, language: &str) -> bool {
        self.bundles.contains_key(language)
    }
}

impl Default for LocalizationManager {
    fn default() -> Self {
        Self::new()
    }
}

thread_local! {
    // FluentBundle is not Sync, so each worker thread builds its own manager
    // lazily from the compiled-in locales.
    static LOCALIZATION_MANAGER: RefCell<Option<LocalizationManager>> = const { RefCell::new(None) };
}

fn with_localization_manager<F, R>(f: F) -> R
where
    F: FnOnce(&LocalizationManager) -> R,
{
    LOCALIZATION_MANAGER.with(|cell| {
        let mut slot = cell.borrow_mut();
        let manager = slot.get_or_insert_with(LocalizationManager::new);
        f(manager)
    })
}

/// Convenience function to get a localized message in user's language
pub fn t_lang(key: &str, language_code: Option<&str>) -> String {
    with_localization_manager(|manager| {
        let language = resolve_language(manager, language_code);
        manager.get_message_in_language(key, &language, None)
    })
}

/// Convenience function to get a localized message with arguments in user's language
pub fn t_args_lang(key: &str, args: &[(&str, &str)], language_code: Option<&str>) -> String {
    with_localization_manager(|manager| {
        let language = resolve_language(manager, language_code);
        manager.get_message_with_args_in_language(key, &language, args)
    })
}

/// Detect the appropriate language based on user's Telegram language code
pub fn detect_language(language_code: Option<&str>) -> String {
    with_localization_manager(|manager| resolve_language(manager, language_code))
}

fn resolve_language(manager: &LocalizationManager, language_code: Option<&str>) -> String {
    if let Some(code) = language_code {
        // Extract language code (e.g., "ru-RU" -> "ru", "en-US" -> "en")
        let lang = code.split('-').next().unwrap_or("en");
        if manager.is_language_supported(lang) {
            return lang.to_string();
        }
    }
    // Default to English if language not supported or not provided
    "en".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn english_messages_resolve() {
        let text = t_lang("available-commands", Some("en"));
        assert!(!text.starts_with("Missing translation"));
    }

    #[test]
    fn unknown_language_falls_back_to_english() {
        let en = t_lang("available-commands", Some("en"));
        let other = t_lang("available-commands", Some("xx"));
        assert_eq!(en, other);
    }

    #[test]
    fn args_are_interpolated() {
        let text = t_args_lang("error-running-command", &[("error", "boom")], Some("en"));
        assert!(text.contains("boom"));
    }

    #[test]
    fn detect_language_strips_region() {
        assert_eq!(detect_language(Some("ru-RU")), "ru");
        assert_eq!(detect_language(Some("fr-FR")), "en");
        assert_eq!(detect_language(None), "en");
    }
}
