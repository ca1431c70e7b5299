//! Declaration data model and the pure transformations applied to it.
//!
//! A stored declaration file is handled as a [`serde_json::Value`] so that
//! document types the publisher does not touch are carried through verbatim
//! (unknown fields and key order included). Proposed blocks are typed as
//! [`TermsDeclaration`].

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::error::PublishError;

/// Directory holding declarations inside a declarations repository.
pub const DECLARATIONS_DIR: &str = "declarations";

/// A start/end range inside a page, expressed with CSS selectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RangeSelector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_after: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Selector {
    Css(String),
    Range(RangeSelector),
}

/// `select` and `remove` accept either a single selector or a list of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Selectors {
    One(Selector),
    Many(Vec<Selector>),
}

impl Selectors {
    pub fn is_empty(&self) -> bool {
        match self {
            Selectors::One(Selector::Css(css)) => css.trim().is_empty(),
            Selectors::One(Selector::Range(_)) => false,
            Selectors::Many(list) => list.is_empty(),
        }
    }

    fn into_list(self) -> Vec<Selector> {
        match self {
            Selectors::One(selector) => vec![selector],
            Selectors::Many(list) => list,
        }
    }
}

/// How to fetch one document and which parts of it are significant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TermsDeclaration {
    pub fetch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select: Option<Selectors>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove: Option<Selectors>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execute_client_scripts: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combine: Option<Vec<TermsDeclaration>>,
}

impl TermsDeclaration {
    pub fn has_selector(&self) -> bool {
        self.select.as_ref().is_some_and(|s| !s.is_empty())
    }

    /// Trims the URL, turns selectors into lists and drops empty fields.
    pub fn normalized(self) -> Self {
        let non_empty = |selectors: Option<Selectors>| {
            selectors
                .map(Selectors::into_list)
                .filter(|list| !list.is_empty())
                .map(Selectors::Many)
        };
        TermsDeclaration {
            fetch: self.fetch.trim().to_string(),
            select: non_empty(self.select),
            remove: non_empty(self.remove),
            execute_client_scripts: self.execute_client_scripts.filter(|run| *run),
            extract: self.extract.filter(|fields| !fields.is_empty()),
            combine: self.combine,
        }
    }
}

/// A proposed declaration: a service name and its document-type blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Declaration {
    pub name: String,
    pub terms: BTreeMap<String, TermsDeclaration>,
}

impl Declaration {
    pub fn single(name: impl Into<String>, document_type: impl Into<String>, block: TermsDeclaration) -> Self {
        let mut terms = BTreeMap::new();
        terms.insert(document_type.into(), block);
        Declaration {
            name: name.into(),
            terms,
        }
    }

    pub fn normalized(self) -> Self {
        Declaration {
            name: self.name.trim().to_string(),
            terms: self
                .terms
                .into_iter()
                .map(|(document_type, block)| (document_type, block.normalized()))
                .collect(),
        }
    }

    pub fn id(&self) -> String {
        derive_id(&self.name)
    }

    /// The document type a single-type proposal is about.
    pub fn first_document_type(&self) -> Result<&str, PublishError> {
        self.terms
            .keys()
            .next()
            .map(String::as_str)
            .ok_or_else(|| PublishError::InvalidDeclaration(format!("`{}` declares no document type", self.name)))
    }

    pub fn block(&self, document_type: &str) -> Result<&TermsDeclaration, PublishError> {
        self.terms.get(document_type).ok_or_else(|| {
            PublishError::InvalidDeclaration(format!(
                "`{}` has no `{document_type}` document type",
                self.name
            ))
        })
    }

    /// This declaration reduced to one document type, as a JSON document.
    pub fn document_for(&self, document_type: &str) -> Result<Value, PublishError> {
        let block = self.block(document_type)?;
        let mut terms = Map::new();
        terms.insert(document_type.to_string(), serde_json::to_value(block)?);
        let mut document = Map::new();
        document.insert("name".into(), Value::String(self.name.clone()));
        document.insert("terms".into(), Value::Object(terms));
        Ok(Value::Object(document))
    }
}

/// Derives the service identifier (and file stem) from a service name:
/// diacritics are stripped, then `&`, `\`, `/` and `:` are removed.
pub fn derive_id(name: &str) -> String {
    deburr(name)
        .chars()
        .filter(|c| !matches!(c, '&' | '\\' | '/' | ':'))
        .collect()
}

pub fn declaration_path(id: &str) -> String {
    format!("{DECLARATIONS_DIR}/{id}.json")
}

pub fn history_path(id: &str) -> String {
    format!("{DECLARATIONS_DIR}/{id}.history.json")
}

/// Latin transliteration: removes combining marks and maps the few letters
/// that carry no decomposition.
pub fn deburr(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.nfd().filter(|c| !is_combining_mark(*c)) {
        match c {
            'ø' => out.push('o'),
            'Ø' => out.push('O'),
            'ł' => out.push('l'),
            'Ł' => out.push('L'),
            'đ' | 'ð' => out.push('d'),
            'Đ' | 'Ð' => out.push('D'),
            'ħ' => out.push('h'),
            'Ħ' => out.push('H'),
            'ı' => out.push('i'),
            'æ' => out.push_str("ae"),
            'Æ' => out.push_str("AE"),
            'œ' => out.push_str("oe"),
            'Œ' => out.push_str("OE"),
            'ß' => out.push_str("ss"),
            'þ' => out.push_str("th"),
            'Þ' => out.push_str("Th"),
            other => out.push(other),
        }
    }
    out.nfc().collect()
}

fn separators() -> &'static Regex {
    static SEPARATORS: OnceLock<Regex> = OnceLock::new();
    SEPARATORS.get_or_init(|| Regex::new(r"[^\p{L}\p{N}]+").expect("static regex"))
}

/// Splits on non-alphanumerics, case changes and letter/digit boundaries.
fn words(input: &str) -> Vec<String> {
    let mut words = Vec::new();
    for chunk in separators().split(input).filter(|c| !c.is_empty()) {
        let chars: Vec<char> = chunk.chars().collect();
        let mut current = String::new();
        for (i, &c) in chars.iter().enumerate() {
            if let Some(&prev) = i.checked_sub(1).and_then(|p| chars.get(p)) {
                let next = chars.get(i + 1).copied();
                let boundary = (prev.is_lowercase() && c.is_uppercase())
                    || (prev.is_alphabetic() && c.is_numeric())
                    || (prev.is_numeric() && c.is_alphabetic())
                    || (prev.is_uppercase() && c.is_uppercase() && next.is_some_and(char::is_lowercase));
                if boundary && !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
            current.push(c);
        }
        if !current.is_empty() {
            words.push(current);
        }
    }
    words
}

/// Lower snake case of a change-request title; the result names its branch.
pub fn branch_name(title: &str) -> String {
    let cleaned = deburr(title).replace(['\'', '\u{2019}'], "");
    words(&cleaned)
        .iter()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join("_")
}

/// Block stored for `document_type` in a declaration document, if any.
pub fn terms_block<'a>(document: &'a Value, document_type: &str) -> Option<&'a Value> {
    document.get("terms")?.get(document_type)
}

/// Returns a copy of `document` in which only `terms[document_type]` is
/// replaced by `block`. Every other key keeps its value and position.
pub fn with_terms(document: &Value, document_type: &str, block: &Value) -> Result<Value, PublishError> {
    let mut merged = document.clone();
    let root = merged
        .as_object_mut()
        .ok_or_else(|| PublishError::InvalidDeclaration("declaration is not a JSON object".into()))?;
    let terms = root
        .entry("terms")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| PublishError::InvalidDeclaration("`terms` is not a JSON object".into()))?;
    terms.insert(document_type.to_string(), block.clone());
    Ok(merged)
}

pub fn parse_document(content: &str) -> Result<Value, PublishError> {
    let document: Value = serde_json::from_str(content)?;
    if !document.is_object() {
        return Err(PublishError::InvalidDeclaration("declaration is not a JSON object".into()));
    }
    Ok(document)
}

/// Two-space indented JSON with a trailing newline, as stored in repositories.
pub fn render_document(document: &Value) -> Result<String, PublishError> {
    let mut rendered = serde_json::to_string_pretty(document)?;
    rendered.push('\n');
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn derive_id_strips_accents_and_forbidden_characters() {
        assert_eq!(derive_id("Café & Co."), "Cafe  Co.");
        assert_eq!(derive_id("AT&T"), "ATT");
        assert_eq!(derive_id("Ørsted: Energi/Ltd\\"), "Orsted EnergiLtd");
        assert_eq!(derive_id("Société Générale"), "Societe Generale");
    }

    #[test]
    fn derive_id_is_stable_under_reapplication() {
        for name in ["Café & Co.", "Łódź Ærø", "네이버", "Straße / Weg", "Ça: va\\"] {
            let once = derive_id(name);
            assert_eq!(derive_id(&once), once, "not idempotent for {name}");
            assert!(!once.contains(['&', '\\', '/', ':']));
            assert!(once.nfd().all(|c| !is_combining_mark(c)), "accent left in {once}");
        }
    }

    #[test]
    fn paths_follow_the_declarations_layout() {
        assert_eq!(declaration_path("Acme"), "declarations/Acme.json");
        assert_eq!(history_path("Acme"), "declarations/Acme.history.json");
    }

    #[test]
    fn branch_name_is_a_deterministic_snake_case_slug() {
        assert_eq!(branch_name("Add Acme Terms of Service"), "add_acme_terms_of_service");
        assert_eq!(branch_name("Update Café & Co. Privacy Policy"), "update_cafe_co_privacy_policy");
        assert_eq!(branch_name("Add iCloud Terms"), "add_i_cloud_terms");
        assert_eq!(branch_name("Add HTMLParser v2 FAQ"), "add_html_parser_v_2_faq");
        assert_eq!(branch_name("Add McDonald's terms"), "add_mc_donalds_terms");
        assert_eq!(
            branch_name("Add Acme Terms of Service"),
            branch_name("Add  Acme   Terms of Service ")
        );
    }

    #[test]
    fn selectors_deserialize_from_strings_ranges_and_lists() {
        let block: TermsDeclaration = serde_json::from_value(json!({
            "fetch": "https://example.com/tos",
            "select": [".tos", { "startBefore": "#start", "endAfter": "#end" }],
            "remove": ".cookie-banner",
            "executeClientScripts": true
        }))
        .unwrap();

        assert!(block.has_selector());
        assert_eq!(
            block.select,
            Some(Selectors::Many(vec![
                Selector::Css(".tos".into()),
                Selector::Range(RangeSelector {
                    start_before: Some("#start".into()),
                    end_after: Some("#end".into()),
                    ..Default::default()
                }),
            ]))
        );
        assert_eq!(block.remove, Some(Selectors::One(Selector::Css(".cookie-banner".into()))));

        let back = serde_json::to_value(&block).unwrap();
        assert_eq!(back["select"][1], json!({ "startBefore": "#start", "endAfter": "#end" }));
        assert!(back.get("extract").is_none());
    }

    #[test]
    fn empty_select_is_not_a_selector() {
        let block = TermsDeclaration {
            fetch: "https://example.com".into(),
            select: Some(Selectors::Many(vec![])),
            remove: None,
            execute_client_scripts: None,
            extract: None,
            combine: None,
        };
        assert!(!block.has_selector());
        assert!(!TermsDeclaration {
            select: Some(Selectors::One(Selector::Css("  ".into()))),
            ..block
        }
        .has_selector());
    }

    #[test]
    fn normalization_trims_and_drops_empty_fields() {
        let declaration = Declaration::single(
            "  Acme ",
            "Terms of Service",
            TermsDeclaration {
                fetch: " https://acme.example/tos ".into(),
                select: Some(Selectors::One(Selector::Css("main".into()))),
                remove: Some(Selectors::Many(vec![])),
                execute_client_scripts: Some(false),
                extract: Some(vec![]),
                combine: None,
            },
        )
        .normalized();

        assert_eq!(declaration.name, "Acme");
        let block = declaration.block("Terms of Service").unwrap();
        assert_eq!(block.fetch, "https://acme.example/tos");
        assert_eq!(block.select, Some(Selectors::Many(vec![Selector::Css("main".into())])));
        assert_eq!(block.remove, None);
        assert_eq!(block.execute_client_scripts, None);
        assert_eq!(block.extract, None);
    }

    #[test]
    fn with_terms_replaces_only_the_target_type() {
        let document = json!({
            "name": "Acme",
            "terms": {
                "Privacy Policy": { "select": "#privacy", "fetch": "https://acme.example/privacy", "filter": ["x"] },
                "Terms of Service": { "fetch": "https://acme.example/old" }
            }
        });
        let block = json!({ "fetch": "https://acme.example/new", "select": ["main"] });

        let merged = with_terms(&document, "Terms of Service", &block).unwrap();

        assert_eq!(merged["terms"]["Terms of Service"], block);
        assert_eq!(merged["terms"]["Privacy Policy"], document["terms"]["Privacy Policy"]);
        let keys: Vec<_> = merged["terms"]["Privacy Policy"].as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, ["select", "fetch", "filter"]);
        assert_eq!(document["terms"]["Terms of Service"]["fetch"], "https://acme.example/old");
    }

    #[test]
    fn with_terms_is_a_no_op_when_reapplied() {
        let document = json!({ "name": "Acme", "terms": {} });
        let block = json!({ "fetch": "https://acme.example/tos" });
        let once = with_terms(&document, "Terms of Service", &block).unwrap();
        let twice = with_terms(&once, "Terms of Service", &block).unwrap();
        assert_eq!(render_document(&once).unwrap(), render_document(&twice).unwrap());
    }

    #[test]
    fn with_terms_rejects_non_object_documents() {
        let err = with_terms(&json!([1, 2]), "Terms of Service", &json!({})).unwrap_err();
        assert!(matches!(err, PublishError::InvalidDeclaration(_)));
        let err = with_terms(&json!({ "terms": "nope" }), "Terms of Service", &json!({})).unwrap_err();
        assert!(matches!(err, PublishError::InvalidDeclaration(_)));
    }

    #[test]
    fn document_for_keeps_only_the_requested_type() {
        let mut declaration = Declaration::single(
            "Acme",
            "Terms of Service",
            TermsDeclaration {
                fetch: "https://acme.example/tos".into(),
                select: None,
                remove: None,
                execute_client_scripts: None,
                extract: None,
                combine: None,
            },
        );
        declaration
            .terms
            .insert("Privacy Policy".into(), declaration.terms["Terms of Service"].clone());

        let document = declaration.document_for("Privacy Policy").unwrap();
        assert_eq!(
            document,
            json!({ "name": "Acme", "terms": { "Privacy Policy": { "fetch": "https://acme.example/tos" } } })
        );
        assert!(matches!(
            declaration.document_for("Imprint"),
            Err(PublishError::InvalidDeclaration(_))
        ));
    }

    #[test]
    fn rendered_documents_use_two_space_indent_and_trailing_newline() {
        let rendered = render_document(&json!({ "name": "Acme", "terms": {} })).unwrap();
        assert_eq!(rendered, "{\n  \"name\": \"Acme\",\n  \"terms\": {}\n}\n");
    }
}
