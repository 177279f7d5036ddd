use crate::exchange_contracts::ResponseSummary;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_JSON_COLOR: &str = "#157a37";
pub const DEFAULT_XML_COLOR: &str = "#0b4ea8";
pub const DEFAULT_HTML_COLOR: &str = "#1f7aa8";
pub const DEFAULT_STATUS_5XX_COLOR: &str = "#a32f2a";
pub const DEFAULT_STATUS_4XX_COLOR: &str = "#a06008";
pub const DEFAULT_STATUS_3XX_COLOR: &str = "#8a7a06";
pub const DEFAULT_AUTO_MODE: bool = true;

const SVG_CONTENT_TYPE: &str = "image/svg+xml";
const JSON_MARKERS: &[&str] = &["application/json", "+json"];
const XML_MARKERS: &[&str] = &["application/xml", "text/xml", "+xml"];
const HTML_MARKERS: &[&str] = &["text/html", "application/xhtml+xml"];
const CONTENT_TYPE_SEPARATOR: &str = ";";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorSlot {
    Json,
    Xml,
    Html,
    Status5xx,
    Status4xx,
    Status3xx,
}

impl ColorSlot {
    pub const ALL: [ColorSlot; 6] = [
        ColorSlot::Json,
        ColorSlot::Xml,
        ColorSlot::Html,
        ColorSlot::Status5xx,
        ColorSlot::Status4xx,
        ColorSlot::Status3xx,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ColorSlot::Json => "json",
            ColorSlot::Xml => "xml",
            ColorSlot::Html => "html",
            ColorSlot::Status5xx => "status5xx",
            ColorSlot::Status4xx => "status4xx",
            ColorSlot::Status3xx => "status3xx",
        }
    }
}

impl fmt::Display for ColorSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One color per content category and per error/redirect status band. An
/// empty string is a valid color and means "clear the color".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorTable {
    pub json: String,
    pub xml: String,
    pub html: String,
    pub status5xx: String,
    pub status4xx: String,
    pub status3xx: String,
}

impl Default for ColorTable {
    fn default() -> Self {
        Self {
            json: DEFAULT_JSON_COLOR.to_string(),
            xml: DEFAULT_XML_COLOR.to_string(),
            html: DEFAULT_HTML_COLOR.to_string(),
            status5xx: DEFAULT_STATUS_5XX_COLOR.to_string(),
            status4xx: DEFAULT_STATUS_4XX_COLOR.to_string(),
            status3xx: DEFAULT_STATUS_3XX_COLOR.to_string(),
        }
    }
}

impl ColorTable {
    pub fn get(&self, slot: ColorSlot) -> &str {
        match slot {
            ColorSlot::Json => &self.json,
            ColorSlot::Xml => &self.xml,
            ColorSlot::Html => &self.html,
            ColorSlot::Status5xx => &self.status5xx,
            ColorSlot::Status4xx => &self.status4xx,
            ColorSlot::Status3xx => &self.status3xx,
        }
    }
}

/// A color table as submitted by a caller; any slot may be omitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ColorTablePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xml: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status5xx: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status4xx: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status3xx: Option<String>,
}

impl ColorTablePatch {
    /// Omitted slots take the built-in default, never a previously saved value.
    pub fn resolve(self) -> ColorTable {
        let defaults = ColorTable::default();
        ColorTable {
            json: self.json.unwrap_or(defaults.json),
            xml: self.xml.unwrap_or(defaults.xml),
            html: self.html.unwrap_or(defaults.html),
            status5xx: self.status5xx.unwrap_or(defaults.status5xx),
            status4xx: self.status4xx.unwrap_or(defaults.status4xx),
            status3xx: self.status3xx.unwrap_or(defaults.status3xx),
        }
    }
}

impl From<ColorTable> for ColorTablePatch {
    fn from(table: ColorTable) -> Self {
        Self {
            json: Some(table.json),
            xml: Some(table.xml),
            html: Some(table.html),
            status5xx: Some(table.status5xx),
            status4xx: Some(table.status4xx),
            status3xx: Some(table.status3xx),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub auto_mode: bool,
    pub colors: ColorTable,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_mode: DEFAULT_AUTO_MODE,
            colors: ColorTable::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_mode: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colors: Option<ColorTablePatch>,
}

impl SettingsPatch {
    pub fn normalize(self) -> Settings {
        Settings {
            auto_mode: self.auto_mode.unwrap_or(DEFAULT_AUTO_MODE),
            colors: self.colors.unwrap_or_default().resolve(),
        }
    }
}

impl From<Settings> for SettingsPatch {
    fn from(settings: Settings) -> Self {
        Self {
            auto_mode: Some(settings.auto_mode),
            colors: Some(settings.colors.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentCategory {
    Json,
    Xml,
    Html,
    Other,
}

impl ContentCategory {
    /// Expects a value produced by [`normalize_content_type`]. A type can match
    /// several marker lists, so the check order is part of the contract.
    pub fn detect(content_type: &str) -> Self {
        if contains_any(content_type, JSON_MARKERS) {
            ContentCategory::Json
        } else if !content_type.contains(SVG_CONTENT_TYPE)
            && contains_any(content_type, XML_MARKERS)
        {
            ContentCategory::Xml
        } else if contains_any(content_type, HTML_MARKERS) {
            ContentCategory::Html
        } else {
            ContentCategory::Other
        }
    }

    pub fn slot(&self) -> Option<ColorSlot> {
        match self {
            ContentCategory::Json => Some(ColorSlot::Json),
            ContentCategory::Xml => Some(ColorSlot::Xml),
            ContentCategory::Html => Some(ColorSlot::Html),
            ContentCategory::Other => None,
        }
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

pub fn normalize_content_type<S: AsRef<str>>(values: &[S]) -> Option<String> {
    if values.is_empty() {
        return None;
    }
    let joined = values
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(CONTENT_TYPE_SEPARATOR);
    Some(joined.trim().to_lowercase())
}

/// Picks the color for a response.
///
/// `None` means "write nothing": the status is unknown or outside every band.
/// `Some("")` means "clear the color": a 2xx whose content type matched no
/// category.
pub fn classify(
    status: Option<u16>,
    content_type: Option<&str>,
    colors: &ColorTable,
) -> Option<String> {
    let status = status?;
    let slot = match status {
        500.. => ColorSlot::Status5xx,
        400..=499 => ColorSlot::Status4xx,
        300..=399 => ColorSlot::Status3xx,
        200..=299 => {
            let category = content_type
                .filter(|value| !value.is_empty())
                .map(|value| ContentCategory::detect(&value.to_lowercase()))
                .unwrap_or(ContentCategory::Other);
            match category.slot() {
                Some(slot) => slot,
                None => return Some(String::new()),
            }
        }
        _ => return None,
    };
    Some(colors.get(slot).to_string())
}

pub fn classify_response(response: &ResponseSummary, colors: &ColorTable) -> Option<String> {
    let content_type = normalize_content_type(&response.content_type);
    classify(response.status_code, content_type.as_deref(), colors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ColorTable {
        ColorTable {
            json: "json-c".to_string(),
            xml: "xml-c".to_string(),
            html: "html-c".to_string(),
            status5xx: "5xx-c".to_string(),
            status4xx: "4xx-c".to_string(),
            status3xx: "3xx-c".to_string(),
        }
    }

    #[test]
    fn success_without_known_type_clears_color() {
        let colors = table();
        for status in [200, 204, 250, 299] {
            assert_eq!(classify(Some(status), None, &colors), Some(String::new()));
            assert_eq!(
                classify(Some(status), Some("application/octet-stream"), &colors),
                Some(String::new())
            );
        }
    }

    #[test]
    fn missing_status_never_classifies() {
        let colors = table();
        for content_type in [None, Some("application/json"), Some("text/html")] {
            assert_eq!(classify(None, content_type, &colors), None);
        }
    }

    #[test]
    fn content_categories_map_to_their_slots() {
        let colors = table();
        assert_eq!(
            classify(Some(200), Some("application/json; charset=utf-8"), &colors).as_deref(),
            Some("json-c")
        );
        assert_eq!(
            classify(Some(200), Some("application/problem+json"), &colors).as_deref(),
            Some("json-c")
        );
        assert_eq!(
            classify(Some(200), Some("text/xml"), &colors).as_deref(),
            Some("xml-c")
        );
        assert_eq!(
            classify(Some(201), Some("application/atom+xml"), &colors).as_deref(),
            Some("xml-c")
        );
        assert_eq!(
            classify(Some(200), Some("text/html"), &colors).as_deref(),
            Some("html-c")
        );
    }

    #[test]
    fn svg_is_not_treated_as_xml() {
        let colors = table();
        assert_eq!(
            classify(Some(200), Some("image/svg+xml"), &colors),
            Some(String::new())
        );
    }

    #[test]
    fn xhtml_matches_html_only_after_xml_check() {
        // application/xhtml+xml also carries the +xml marker, so it lands in xml.
        let colors = table();
        assert_eq!(
            classify(Some(200), Some("application/xhtml+xml"), &colors).as_deref(),
            Some("xml-c")
        );
    }

    #[test]
    fn status_bands_ignore_content_type() {
        let colors = table();
        assert_eq!(
            classify(Some(503), Some("application/json"), &colors).as_deref(),
            Some("5xx-c")
        );
        assert_eq!(classify(Some(404), None, &colors).as_deref(), Some("4xx-c"));
        assert_eq!(
            classify(Some(302), Some("text/html"), &colors).as_deref(),
            Some("3xx-c")
        );
        assert_eq!(classify(Some(100), None, &colors), None);
        assert_eq!(classify(Some(101), Some("text/html"), &colors), None);
    }

    #[test]
    fn response_headers_are_joined_and_lowercased() {
        let colors = table();
        let response = ResponseSummary {
            status_code: Some(200),
            content_type: vec!["  Text/HTML".to_string(), "Charset=UTF-8 ".to_string()],
        };
        assert_eq!(classify_response(&response, &colors).as_deref(), Some("html-c"));
        assert_eq!(
            normalize_content_type(&response.content_type).as_deref(),
            Some("text/html;charset=utf-8")
        );

        let headerless = ResponseSummary::status_only(200);
        assert_eq!(classify_response(&headerless, &colors), Some(String::new()));
    }

    #[test]
    fn partial_settings_fall_back_to_defaults() {
        let patch: SettingsPatch =
            serde_json::from_str(r##"{"colors":{"json":"#000000","html":""}}"##)
                .expect("parse patch");
        let settings = patch.normalize();

        assert!(settings.auto_mode);
        assert_eq!(settings.colors.json, "#000000");
        assert_eq!(settings.colors.html, "");
        assert_eq!(settings.colors.xml, DEFAULT_XML_COLOR);
        assert_eq!(settings.colors.status5xx, DEFAULT_STATUS_5XX_COLOR);
        assert_eq!(settings.colors.status4xx, DEFAULT_STATUS_4XX_COLOR);
        assert_eq!(settings.colors.status3xx, DEFAULT_STATUS_3XX_COLOR);
    }

    #[test]
    fn settings_serialize_with_camel_case_auto_mode() {
        let encoded = serde_json::to_value(Settings::default()).expect("encode");
        assert_eq!(encoded["autoMode"], serde_json::json!(true));
        assert_eq!(encoded["colors"]["status4xx"], serde_json::json!("#a06008"));

        let full: SettingsPatch = Settings::default().into();
        assert_eq!(full.normalize(), Settings::default());
    }

    #[test]
    fn color_slot_names_match_stored_keys() {
        let colors = ColorTable::default();
        let encoded = serde_json::to_value(&colors).expect("encode");
        for slot in ColorSlot::ALL {
            assert_eq!(encoded[slot.to_string()], serde_json::json!(colors.get(slot)));
        }
    }
}
