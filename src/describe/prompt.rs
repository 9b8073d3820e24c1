//! Prompt template for product copy and extraction of the generated text.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use crate::catalog::{value_text, Metadata};

/// Marker the model is asked to continue from.
pub const SENTINEL: &str = "DESCRIPTION:";

/// Rendered in place of any fact the metadata does not provide.
pub const PLACEHOLDER: &str = "—";

pub const DEFAULT_STYLE: &str = "Friendly, concise, modern e-commerce tone. \
Highlight material, color, feel, and use-cases. \
Avoid hard claims about certifications or warranties. 70–110 words.";

/// Build the instruction prompt. Every fact line is always present.
pub fn build_prompt(metadata: &Metadata, style: Option<&str>) -> String {
    let style = style
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_STYLE);

    let fact = |key: &str| value_text(metadata.get(key)).unwrap_or_else(|| PLACEHOLDER.to_string());

    format!(
        "You are a copywriter for an e-commerce site.\n\
         Write a short, appealing product description using the facts below.\n\
         Do not invent specifications that aren't provided. No bullet points.\n\n\
         STYLE: {style}\n\n\
         FACTS:\n\
         - Title: {title}\n\
         - Brand: {brand}\n\
         - Price: {price}\n\
         - Categories: {categories}\n\
         - Material: {material}\n\
         - Color: {color}\n\
         - NLP tag: {cluster_tag}\n\
         - CV category: {predicted_category}\n\
         - Existing description (may be messy): {description}\n\n\
         {SENTINEL}",
        title = fact("title"),
        brand = fact("brand"),
        price = price_text(metadata.get("price")),
        categories = fact("categories"),
        material = fact("material"),
        color = fact("color"),
        cluster_tag = fact("cluster_tag"),
        predicted_category = fact("predicted_category"),
        description = fact("description"),
    )
}

/// Text after the last sentinel, with newlines collapsed to spaces.
pub fn extract_description(raw: &str) -> String {
    raw.rsplit(SENTINEL)
        .next()
        .unwrap_or_default()
        .trim()
        .replace("\r\n", " ")
        .replace('\n', " ")
        .trim()
        .to_string()
}

/// `₹1,299` for a positive price, the placeholder otherwise.
///
/// Strings like "Rs. 1,299.00" are accepted; the first number wins.
pub fn price_text(value: Option<&Value>) -> String {
    let amount = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => parse_amount(s),
        _ => None,
    };

    match amount {
        Some(amount) if amount.is_finite() && amount > 0.0 => {
            format!("₹{}", group_thousands(amount.trunc() as u64))
        }
        _ => PLACEHOLDER.to_string(),
    }
}

fn parse_amount(raw: &str) -> Option<f64> {
    static NUMBER: OnceLock<Regex> = OnceLock::new();
    let number = NUMBER.get_or_init(|| Regex::new(r"[-+]?\d*\.?\d+").expect("valid regex"));

    let cleaned = raw.replace(',', "");
    number
        .find(&cleaned)
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
