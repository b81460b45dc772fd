//! Menu descriptions — validated decoding of the client's JSON tree.
//!
//! A description is an object with `name`, `icon` and an optional `items`
//! array of objects of the same shape. Parsing is a pure transformation:
//! it either yields a complete [`MenuNode`] tree or a [`ParseError`],
//! never a partially populated tree.

use serde::Deserialize;
use thiserror::Error;

/// Separator between names in an item identifier.
pub const PATH_SEPARATOR: char = '/';

/// Escapes a separator (or itself) inside a name.
const PATH_ESCAPE: char = '\\';

/// Menu description could not be decoded.
#[derive(Debug, Error)]
#[error("malformed menu description: {0}")]
pub struct ParseError(#[from] serde_json::Error);

/// One entry of a menu tree.
///
/// A node with children is a submenu and cannot be activated itself; a
/// node without children is a leaf. The `icon` is an opaque token handed
/// to the presentation layer untouched.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MenuNode {
    name: String,
    icon: String,
    #[serde(default, rename = "items")]
    children: Vec<MenuNode>,
}

impl MenuNode {
    /// Display label.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Opaque icon token.
    pub fn icon(&self) -> &str {
        &self.icon
    }

    /// Ordered child entries (empty for leaves).
    pub fn children(&self) -> &[MenuNode] {
        &self.children
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Number of activatable leaves below this node, excluding itself.
    pub fn leaf_count(&self) -> usize {
        self.children
            .iter()
            .map(|child| if child.is_leaf() { 1 } else { child.leaf_count() })
            .sum()
    }

    /// Emit the tree as an indented `name (icon)` outline at debug level.
    pub fn log_outline(&self) {
        if !tracing::enabled!(tracing::Level::DEBUG) {
            return;
        }
        let mut stack = vec![(self, 0usize)];
        while let Some((node, depth)) = stack.pop() {
            tracing::debug!("{}{} ({})", "  ".repeat(depth), node.name, node.icon);
            stack.extend(node.children.iter().rev().map(|c| (c, depth + 1)));
        }
    }
}

/// Join the names from the root's child down to a leaf into an item
/// identifier.
///
/// A `/` or `\` inside a name is prefixed with `\`, so a leaf named
/// `A/B` (`"A\/B"`) and leaf `B` under submenu `A` (`"A/B"`) never
/// share an identifier.
pub fn item_path<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    let mut path = String::new();
    for (i, name) in names.into_iter().enumerate() {
        if i > 0 {
            path.push(PATH_SEPARATOR);
        }
        for c in name.chars() {
            if c == PATH_SEPARATOR || c == PATH_ESCAPE {
                path.push(PATH_ESCAPE);
            }
            path.push(c);
        }
    }
    path
}

/// Decode a serialized menu description.
///
/// Unknown fields are ignored. Missing `name`/`icon`, wrong types,
/// a non-object root and trailing data are all rejected.
pub fn parse(raw: &str) -> Result<MenuNode, ParseError> {
    Ok(serde_json::from_str(raw)?)
}
