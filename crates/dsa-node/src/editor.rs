//! Editor metadata.
//!
//! UI editor widgets (colour pickers, date pickers, etc.) carry a much
//! larger catalogue of display strings than this SDK needs; only the
//! validated subset needed to honor the `invalid-editor-type` /
//! `editor-type-not-allowed` rules is kept here.

use dsa_value::ValueType;

/// An editor hint attached to an action parameter, action result column, or
/// (restricted) a value node's own attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Editor {
    Number,
    Color,
    TextArea,
    Password,
    DateRange,
    Date,
}

impl Editor {
    /// The attribute string this editor serializes to (`"$editor"` config
    /// value).
    pub fn name(self) -> &'static str {
        match self {
            Editor::Number => "number",
            Editor::Color => "color",
            Editor::TextArea => "textarea",
            Editor::Password => "password",
            Editor::DateRange => "daterange",
            Editor::Date => "date",
        }
    }

    /// The value type this editor is declared to operate on.
    pub fn value_type(self) -> ValueType {
        match self {
            Editor::Number => ValueType::Number,
            Editor::Color | Editor::TextArea | Editor::Password | Editor::DateRange
            | Editor::Date => ValueType::String,
        }
    }

    /// Whether this editor may be attached directly to a value node, as
    /// opposed to only an action parameter/column.
    pub fn allowed_on_value_node(self) -> bool {
        matches!(
            self,
            Editor::TextArea | Editor::Password | Editor::DateRange | Editor::Date
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_node_allow_list_is_textual_editors_only() {
        assert!(Editor::TextArea.allowed_on_value_node());
        assert!(Editor::Password.allowed_on_value_node());
        assert!(Editor::DateRange.allowed_on_value_node());
        assert!(Editor::Date.allowed_on_value_node());
        assert!(!Editor::Number.allowed_on_value_node());
        assert!(!Editor::Color.allowed_on_value_node());
    }
}
