//! Text attribute model.
//!
//! [`TextAttributes`] is a sparse mapping from [`AttributeKey`] to [`AttributeValue`]. Text
//! sections share attribute objects through `Arc`, and an explicit [`AttributeTable`] hands out
//! stable [`AttributeId`]s so that the layout side can cache fonts by id instead of comparing
//! maps.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Formatting keys understood by the document model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AttributeKey {
    /// Bold weight (bool).
    Bold,
    /// Italic style (bool).
    Italic,
    /// Underline decoration (bool).
    Underline,
    /// Strike-through decoration (bool).
    Strike,
    /// Font family name (text).
    FontFamily,
    /// Font size in points (int).
    FontSize,
    /// Foreground color.
    Foreground,
    /// Background color.
    Background,
    /// Highlight (marker) color.
    Highlight,
    /// Vertical position: normal, subscript or superscript.
    Position,
    /// Hyperlink target (text).
    Url,
    /// E-mail link target (text).
    Email,
}

impl AttributeKey {
    /// All keys in canonical order.
    pub const ALL: [AttributeKey; 12] = [
        AttributeKey::Bold,
        AttributeKey::Italic,
        AttributeKey::Underline,
        AttributeKey::Strike,
        AttributeKey::FontFamily,
        AttributeKey::FontSize,
        AttributeKey::Foreground,
        AttributeKey::Background,
        AttributeKey::Highlight,
        AttributeKey::Position,
        AttributeKey::Url,
        AttributeKey::Email,
    ];

    /// Keys whose value influences glyph metrics (and therefore layout).
    pub fn affects_metrics(self) -> bool {
        matches!(
            self,
            AttributeKey::Bold
                | AttributeKey::Italic
                | AttributeKey::FontFamily
                | AttributeKey::FontSize
                | AttributeKey::Position
        )
    }
}

/// 24-bit RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rgb {
    /// Red channel.
    pub r: u8,
    /// Green channel.
    pub g: u8,
    /// Blue channel.
    pub b: u8,
}

impl Rgb {
    /// Create a color from its channels.
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `#rrggbb` or `rrggbb`. Returns `None` for anything else.
    pub fn from_hex(s: &str) -> Option<Self> {
        let hex = s.strip_prefix('#').unwrap_or(s);
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        Some(Self::new(channel(0)?, channel(2)?, channel(4)?))
    }

    /// Format as `#rrggbb`.
    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Vertical text position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum TextPosition {
    /// Baseline text.
    #[default]
    Normal,
    /// Subscript.
    Subscript,
    /// Superscript.
    Superscript,
}

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AttributeValue {
    /// Boolean flag (bold, italic, underline, strike).
    Flag(bool),
    /// Integer value (font size).
    Int(u32),
    /// Free text (font family, url, email).
    Text(String),
    /// Color value.
    Color(Rgb),
    /// Vertical position.
    Position(TextPosition),
}

/// Identity of an attribute set inside an [`AttributeTable`] generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttributeId {
    generation: u32,
    index: u32,
}

impl AttributeId {
    fn pack(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    fn unpack(raw: u64) -> Option<Self> {
        if raw == 0 {
            return None;
        }
        Some(Self {
            generation: (raw >> 32) as u32,
            index: raw as u32,
        })
    }

    /// Dense index of this attribute set within its table generation.
    pub fn index(self) -> u32 {
        self.index
    }
}

/// Sparse formatting mapping attached to a text run.
///
/// Equality is structural. The cached identity is not part of equality; it is cleared by every
/// mutation and filled back in by [`AttributeTable::identify`].
#[derive(Default)]
pub struct TextAttributes {
    values: BTreeMap<AttributeKey, AttributeValue>,
    identity: AtomicU64,
}

impl Clone for TextAttributes {
    fn clone(&self) -> Self {
        Self {
            values: self.values.clone(),
            identity: AtomicU64::new(self.identity.load(Ordering::Relaxed)),
        }
    }
}

impl PartialEq for TextAttributes {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl Eq for TextAttributes {}

impl fmt::Debug for TextAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.values.iter()).finish()
    }
}

macro_rules! flag_accessors {
    ($($get:ident, $with:ident => $key:ident;)*) => {
        $(
            #[doc = concat!("`", stringify!($key), "` flag, if set.")]
            pub fn $get(&self) -> Option<bool> {
                match self.values.get(&AttributeKey::$key) {
                    Some(AttributeValue::Flag(v)) => Some(*v),
                    _ => None,
                }
            }

            #[doc = concat!("Builder: set the `", stringify!($key), "` flag.")]
            pub fn $with(mut self, value: bool) -> Self {
                self.insert(AttributeKey::$key, AttributeValue::Flag(value));
                self
            }
        )*
    };
}

macro_rules! text_accessors {
    ($($get:ident, $with:ident => $key:ident;)*) => {
        $(
            #[doc = concat!("`", stringify!($key), "` value, if set.")]
            pub fn $get(&self) -> Option<&str> {
                match self.values.get(&AttributeKey::$key) {
                    Some(AttributeValue::Text(v)) => Some(v.as_str()),
                    _ => None,
                }
            }

            #[doc = concat!("Builder: set `", stringify!($key), "`.")]
            pub fn $with(mut self, value: impl Into<String>) -> Self {
                self.insert(AttributeKey::$key, AttributeValue::Text(value.into()));
                self
            }
        )*
    };
}

macro_rules! color_accessors {
    ($($get:ident, $with:ident => $key:ident;)*) => {
        $(
            #[doc = concat!("`", stringify!($key), "` color, if set.")]
            pub fn $get(&self) -> Option<Rgb> {
                match self.values.get(&AttributeKey::$key) {
                    Some(AttributeValue::Color(v)) => Some(*v),
                    _ => None,
                }
            }

            #[doc = concat!("Builder: set the `", stringify!($key), "` color.")]
            pub fn $with(mut self, value: Rgb) -> Self {
                self.insert(AttributeKey::$key, AttributeValue::Color(value));
                self
            }
        )*
    };
}

impl TextAttributes {
    /// Empty attribute set (plain text).
    pub fn new() -> Self {
        Self::default()
    }

    flag_accessors! {
        bold, with_bold => Bold;
        italic, with_italic => Italic;
        underline, with_underline => Underline;
        strike, with_strike => Strike;
    }

    text_accessors! {
        font_family, with_font_family => FontFamily;
        url, with_url => Url;
        email, with_email => Email;
    }

    color_accessors! {
        foreground, with_foreground => Foreground;
        background, with_background => Background;
        highlight, with_highlight => Highlight;
    }

    /// Font size in points, if set.
    pub fn font_size(&self) -> Option<u32> {
        match self.values.get(&AttributeKey::FontSize) {
            Some(AttributeValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// Builder: set the font size in points.
    pub fn with_font_size(mut self, size: u32) -> Self {
        self.insert(AttributeKey::FontSize, AttributeValue::Int(size));
        self
    }

    /// Vertical position, if set.
    pub fn position(&self) -> Option<TextPosition> {
        match self.values.get(&AttributeKey::Position) {
            Some(AttributeValue::Position(v)) => Some(*v),
            _ => None,
        }
    }

    /// Builder: set the vertical position.
    pub fn with_position(mut self, position: TextPosition) -> Self {
        self.insert(AttributeKey::Position, AttributeValue::Position(position));
        self
    }

    /// Raw value for `key`.
    pub fn get(&self, key: AttributeKey) -> Option<&AttributeValue> {
        self.values.get(&key)
    }

    /// Whether `key` is set.
    pub fn contains(&self, key: AttributeKey) -> bool {
        self.values.contains_key(&key)
    }

    /// Set `key` to `value`, invalidating the cached identity.
    pub fn insert(&mut self, key: AttributeKey, value: AttributeValue) {
        self.values.insert(key, value);
        self.invalidate();
    }

    /// Unset `key`, invalidating the cached identity.
    pub fn remove(&mut self, key: AttributeKey) -> Option<AttributeValue> {
        let old = self.values.remove(&key);
        if old.is_some() {
            self.invalidate();
        }
        old
    }

    /// Number of set keys.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// `true` when no key is set.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over set keys in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (AttributeKey, &AttributeValue)> {
        self.values.iter().map(|(k, v)| (*k, v))
    }

    /// Apply `patch` on top of `self`: keys set in the patch win, every other key is untouched.
    pub fn merged(&self, patch: &TextAttributes) -> TextAttributes {
        let mut values = self.values.clone();
        for (key, value) in &patch.values {
            values.insert(*key, value.clone());
        }
        TextAttributes {
            values,
            identity: AtomicU64::new(0),
        }
    }

    /// Copy of `self` with every key in `keys` unset.
    pub fn without(&self, keys: &[AttributeKey]) -> TextAttributes {
        let mut values = self.values.clone();
        for key in keys {
            values.remove(key);
        }
        TextAttributes {
            values,
            identity: AtomicU64::new(0),
        }
    }

    /// The key/value pairs shared by `self` and `other`.
    pub fn intersection(&self, other: &TextAttributes) -> TextAttributes {
        let values = self
            .values
            .iter()
            .filter(|(k, v)| other.values.get(k) == Some(*v))
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        TextAttributes {
            values,
            identity: AtomicU64::new(0),
        }
    }

    /// Identity cached by the last [`AttributeTable::identify`] call, if still valid.
    pub fn cached_id(&self) -> Option<AttributeId> {
        AttributeId::unpack(self.identity.load(Ordering::Relaxed))
    }

    fn invalidate(&mut self) {
        *self.identity.get_mut() = 0;
    }
}

/// Fast equality for shared attribute objects: pointer identity first, then structure.
pub fn same_attributes(a: &Arc<TextAttributes>, b: &Arc<TextAttributes>) -> bool {
    Arc::ptr_eq(a, b) || **a == **b
}

/// Generations are unique across every table in the process, so an identity cached by one
/// table is never mistaken for an entry of another.
static NEXT_GENERATION: AtomicU32 = AtomicU32::new(1);

fn fresh_generation() -> u32 {
    loop {
        let generation = NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);
        if generation != 0 {
            return generation;
        }
    }
}

/// Identity table for attribute sets.
///
/// Equal attribute sets receive the same [`AttributeId`] and, through [`AttributeTable::share`],
/// the same `Arc`. [`AttributeTable::clear`] and [`AttributeTable::compact`] start a new
/// generation: every previously issued id becomes stale and is regenerated lazily on the next
/// lookup.
#[derive(Debug)]
pub struct AttributeTable {
    generation: u32,
    ids: HashMap<BTreeMap<AttributeKey, AttributeValue>, u32>,
    shared: Vec<Arc<TextAttributes>>,
}

impl Default for AttributeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl AttributeTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            generation: fresh_generation(),
            ids: HashMap::new(),
            shared: Vec::new(),
        }
    }

    /// Current generation; replaced by [`AttributeTable::clear`] and [`AttributeTable::compact`].
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Number of distinct attribute sets in the current generation.
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    /// `true` when the current generation holds no attribute set.
    pub fn is_empty(&self) -> bool {
        self.shared.is_empty()
    }

    /// Stable id for `attrs`, regenerating the cached identity when it is stale.
    pub fn identify(&mut self, attrs: &TextAttributes) -> AttributeId {
        if let Some(id) = attrs.cached_id()
            && id.generation == self.generation
            && self
                .shared
                .get(id.index as usize)
                .is_some_and(|shared| std::ptr::eq(&**shared, attrs) || shared.values == attrs.values)
        {
            return id;
        }
        let index = self.intern_index(attrs);
        let id = AttributeId {
            generation: self.generation,
            index,
        };
        attrs.identity.store(id.pack(), Ordering::Relaxed);
        id
    }

    /// Canonical shared object for `attrs`. Equal inputs return the same `Arc`.
    pub fn share(&mut self, attrs: TextAttributes) -> Arc<TextAttributes> {
        let id = self.identify(&attrs);
        Arc::clone(&self.shared[id.index as usize])
    }

    /// Canonical shared empty attribute set.
    pub fn plain(&mut self) -> Arc<TextAttributes> {
        self.share(TextAttributes::new())
    }

    /// Resolve an id from the current generation.
    pub fn get(&self, id: AttributeId) -> Option<&Arc<TextAttributes>> {
        if id.generation != self.generation {
            return None;
        }
        self.shared.get(id.index as usize)
    }

    /// Drop every interned set and start a new generation.
    pub fn clear(&mut self) {
        self.ids.clear();
        self.shared.clear();
        self.generation = fresh_generation();
        tracing::debug!(generation = self.generation, "attribute table cleared");
    }

    /// Drop the sets only the table still holds and renumber the rest under a new generation.
    ///
    /// Shared objects handed out earlier keep working: their cached identities are rewritten in
    /// place. Returns the number of dropped sets.
    pub fn compact(&mut self) -> usize {
        let before = self.shared.len();
        let generation = fresh_generation();
        let live: Vec<Arc<TextAttributes>> = std::mem::take(&mut self.shared)
            .into_iter()
            .filter(|attrs| Arc::strong_count(attrs) > 1)
            .collect();
        self.ids.clear();
        for (index, attrs) in live.iter().enumerate() {
            let index = index as u32;
            attrs
                .identity
                .store(AttributeId { generation, index }.pack(), Ordering::Relaxed);
            self.ids.insert(attrs.values.clone(), index);
        }
        self.shared = live;
        self.generation = generation;
        let dropped = before - self.shared.len();
        tracing::debug!(generation, dropped, kept = self.shared.len(), "attribute table compacted");
        dropped
    }

    fn intern_index(&mut self, attrs: &TextAttributes) -> u32 {
        if let Some(index) = self.ids.get(&attrs.values) {
            return *index;
        }
        let index = self.shared.len() as u32;
        let canonical = TextAttributes {
            values: attrs.values.clone(),
            identity: AtomicU64::new(
                AttributeId {
                    generation: self.generation,
                    index,
                }
                .pack(),
            ),
        };
        self.ids.insert(attrs.values.clone(), index);
        self.shared.push(Arc::new(canonical));
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_sets_share_identity() {
        let mut table = AttributeTable::new();
        let a = TextAttributes::new().with_bold(true).with_font_size(12);
        let b = TextAttributes::new().with_font_size(12).with_bold(true);
        assert_eq!(table.identify(&a), table.identify(&b));
        assert!(Arc::ptr_eq(&table.share(a), &table.share(b)));
    }

    #[test]
    fn test_mutation_invalidates_cached_id() {
        let mut table = AttributeTable::new();
        let mut attrs = TextAttributes::new().with_italic(true);
        let before = table.identify(&attrs);
        assert_eq!(attrs.cached_id(), Some(before));

        attrs.insert(AttributeKey::Bold, AttributeValue::Flag(true));
        assert_eq!(attrs.cached_id(), None);
        assert_ne!(table.identify(&attrs), before);
    }

    #[test]
    fn test_clear_bumps_generation() {
        let mut table = AttributeTable::new();
        let attrs = TextAttributes::new().with_underline(true);
        let old = table.identify(&attrs);
        table.clear();
        assert!(table.get(old).is_none());
        let fresh = table.identify(&attrs);
        assert_ne!(old, fresh);
        assert!(table.get(fresh).is_some());
    }

    #[test]
    fn test_ids_from_another_table_are_not_trusted() {
        let mut first = AttributeTable::new();
        let mut second = AttributeTable::new();
        first.plain();
        second.plain();
        let large = first.share(TextAttributes::new().with_font_size(40));
        second.share(TextAttributes::new().with_bold(true));
        assert_ne!(first.generation(), second.generation());

        let id = second.identify(&large);
        assert_eq!(id.index(), 2);
        assert_eq!(second.get(id).unwrap().font_size(), Some(40));
        assert_eq!(first.identify(&large).index(), 1);
        let first_id = first.identify(&large);
        assert_eq!(first.get(first_id).unwrap().font_size(), Some(40));
    }

    #[test]
    fn test_compact_drops_unreferenced_sets() {
        let mut table = AttributeTable::new();
        let kept = table.share(TextAttributes::new().with_italic(true));
        table.share(TextAttributes::new().with_bold(true));
        table.share(TextAttributes::new().with_font_size(20));
        let old = table.identify(&kept);
        assert_eq!(table.len(), 3);

        assert_eq!(table.compact(), 2);
        assert_eq!(table.len(), 1);
        assert!(table.get(old).is_none());
        let id = kept.cached_id().unwrap();
        assert_eq!(id.index(), 0);
        assert!(Arc::ptr_eq(table.get(id).unwrap(), &kept));
        assert_eq!(table.identify(&kept), id);
        assert!(Arc::ptr_eq(&table.share(TextAttributes::new().with_italic(true)), &kept));
    }

    #[test]
    fn test_patch_only_touches_set_keys() {
        let base = TextAttributes::new()
            .with_bold(true)
            .with_foreground(Rgb::new(255, 0, 0));
        let patch = TextAttributes::new().with_italic(true).with_bold(false);
        let merged = base.merged(&patch);
        assert_eq!(merged.bold(), Some(false));
        assert_eq!(merged.italic(), Some(true));
        assert_eq!(merged.foreground(), Some(Rgb::new(255, 0, 0)));
    }

    #[test]
    fn test_rgb_hex() {
        assert_eq!(Rgb::from_hex("#ff8000"), Some(Rgb::new(255, 128, 0)));
        assert_eq!(Rgb::from_hex("00ff00"), Some(Rgb::new(0, 255, 0)));
        assert_eq!(Rgb::from_hex("#fff"), None);
        assert_eq!(Rgb::new(1, 2, 3).to_hex(), "#010203");
    }
}
