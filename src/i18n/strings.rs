/// Compiled-in user-facing strings for one locale.
///
/// These back [`BuiltinCatalogLoader`](crate::i18n::BuiltinCatalogLoader) and
/// cover what the render host needs without any catalog on disk.
#[derive(Debug, Clone)]
pub struct LocaleStrings {
    /// Application name shown in the page title
    pub app_title: &'static str,

    // ==================== General Error Page ====================
    /// Heading of the general error page
    pub error_title: &'static str,

    /// Body text of the general error page
    pub error_subtitle: &'static str,

    /// Status line of the general error page
    /// Placeholders: {status}
    pub error_status: &'static str,
}

pub const APP_TITLE: &str = "app.title";
pub const ERROR_TITLE: &str = "errors.general.title";
pub const ERROR_SUBTITLE: &str = "errors.general.subtitle";
pub const ERROR_STATUS: &str = "errors.general.status";

impl LocaleStrings {
    /// Message id / template pairs.
    pub fn messages(&self) -> [(&'static str, &'static str); 4] {
        [
            (APP_TITLE, self.app_title),
            (ERROR_TITLE, self.error_title),
            (ERROR_SUBTITLE, self.error_subtitle),
            (ERROR_STATUS, self.error_status),
        ]
    }
}

/// English strings (canonical, also the default messages)
pub const ENGLISH_STRINGS: LocaleStrings = LocaleStrings {
    app_title: "Kitsu",
    error_title: "Uh oh!",
    error_subtitle: "Something went wrong, why don't you try that again in a few minutes?",
    error_status: "Error {status}",
};

pub const SPANISH_STRINGS: LocaleStrings = LocaleStrings {
    app_title: "Kitsu",
    error_title: "¡Oh, no!",
    error_subtitle: "Algo salió mal, ¿por qué no lo intentas de nuevo en unos minutos?",
    error_status: "Error {status}",
};

pub const FRENCH_STRINGS: LocaleStrings = LocaleStrings {
    app_title: "Kitsu",
    error_title: "Oh non !",
    error_subtitle:
        "Quelque chose s'est mal passé, pourquoi ne pas réessayer dans quelques minutes ?",
    error_status: "Erreur {status}",
};

pub const JAPANESE_STRINGS: LocaleStrings = LocaleStrings {
    app_title: "Kitsu",
    error_title: "おっと！",
    error_subtitle: "問題が発生しました。数分後にもう一度お試しください。",
    error_status: "エラー {status}",
};

pub const PORTUGUESE_BR_STRINGS: LocaleStrings = LocaleStrings {
    app_title: "Kitsu",
    error_title: "Ops!",
    error_subtitle: "Algo deu errado, que tal tentar novamente em alguns minutos?",
    error_status: "Erro {status}",
};

/// Built-in strings for a locale code, if any.
pub fn for_code(code: &str) -> Option<&'static LocaleStrings> {
    match code.to_ascii_lowercase().as_str() {
        "en" => Some(&ENGLISH_STRINGS),
        "es" => Some(&SPANISH_STRINGS),
        "fr" => Some(&FRENCH_STRINGS),
        "ja" => Some(&JAPANESE_STRINGS),
        "pt-br" => Some(&PORTUGUESE_BR_STRINGS),
        _ => None,
    }
}
