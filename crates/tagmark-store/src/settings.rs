//! User-configured tag lists from the settings provider.
//!
//! The settings UI hands these over as comma-delimited strings; they get
//! the same trim/dedup treatment as saved tags.

use crate::codec::normalize_tags;

/// Pinned and emoji tag lists the display layer consults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagListSettings {
    pub pinned: Vec<String>,
    pub emoji: Vec<String>,
}

impl TagListSettings {
    pub fn from_delimited(pinned: &str, emoji: &str) -> Self {
        Self {
            pinned: parse_tag_list(pinned),
            emoji: parse_tag_list(emoji),
        }
    }
}

/// Parse one comma-delimited tag list.
pub fn parse_tag_list(input: &str) -> Vec<String> {
    normalize_tags(input.split(','))
}
