//! Lyric text → mouth shape.
//!
//! A syllable is reduced to one vowel sound: the last kana that carries a
//! vowel (hiragana or katakana), or failing that the last romaji vowel.
//! The vowel is then looked up in a [`PhonemeTable`], which is plain
//! configuration data so the set of mouth images can vary per character.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Key of a mouth image, resolved to an actual asset by the sink.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MouthShape(pub String);

impl MouthShape {
    pub fn new(key: impl Into<String>) -> Self {
        MouthShape(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MouthShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Vowel sound of a syllable. `N` is the nasal / closed sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Vowel {
    A,
    I,
    U,
    E,
    O,
    N,
}

const KANA_A: &str = "あかさたなはまやらわがざだばぱぁゃゎアカサタナハマヤラワガザダバパァャヮ";
const KANA_I: &str = "いきしちにひみりぎじぢびぴぃイキシチニヒミリギジヂビピィ";
const KANA_U: &str = "うくすつぬふむゆるぐずづぶぷぅゅウクスツヌフムユルグズヅブプゥュヴ";
const KANA_E: &str = "えけせてねへめれげぜでべぺぇエケセテネヘメレゲゼデベペェ";
const KANA_O: &str = "おこそとのほもよろをごぞどぼぽぉょオコソトノホモヨロヲゴゾドボポォョ";
const SMALL_KANA: &str = "ゃゅょぁぃぅぇぉャュョァィゥェォっッ";
const LONG_MARK: char = 'ー';

fn kana_vowel(c: char) -> Option<Vowel> {
    [
        (KANA_A, Vowel::A),
        (KANA_I, Vowel::I),
        (KANA_U, Vowel::U),
        (KANA_E, Vowel::E),
        (KANA_O, Vowel::O),
    ]
    .iter()
    .find(|(set, _)| set.contains(c))
    .map(|&(_, v)| v)
}

fn romaji_vowel(c: char) -> Option<Vowel> {
    match c.to_ascii_lowercase() {
        'a' => Some(Vowel::A),
        'i' => Some(Vowel::I),
        'u' => Some(Vowel::U),
        'e' => Some(Vowel::E),
        'o' => Some(Vowel::O),
        _ => None,
    }
}

/// Strip whitespace and punctuation a lyric line may carry.
fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace() && !c.is_ascii_punctuation())
        .filter(|c| !"、。・！？「」『』（）".contains(*c))
        .collect()
}

/// Vowel sound of a syllable, or `None` if the text carries no recognizable
/// vowel. Empty text counts as a closed mouth.
pub fn vowel_of(text: &str) -> Option<Vowel> {
    let text = normalize(text);
    if text.is_empty() || matches!(text.as_str(), "ん" | "ン" | "n" | "N") {
        return Some(Vowel::N);
    }

    // A long mark or small kana extends the sound before it
    let kana = text
        .chars()
        .rev()
        .filter(|&c| c != LONG_MARK && !SMALL_KANA.contains(c))
        .find_map(|c| match c {
            'ん' | 'ン' => None,
            c => kana_vowel(c),
        });
    if kana.is_some() {
        return kana;
    }
    text.chars().rev().find_map(romaji_vowel)
}

/// Configurable vowel → mouth shape table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhonemeTable {
    /// Shape used for rests, nasal syllables and unrecognized text
    pub closed: MouthShape,
    pub vowels: BTreeMap<Vowel, MouthShape>,
    /// Whole-syllable overrides, checked before vowel analysis
    pub overrides: BTreeMap<String, MouthShape>,
}

impl Default for PhonemeTable {
    fn default() -> Self {
        Self::five_vowel()
    }
}

/// Result of looking up a syllable.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeLookup<'a> {
    pub shape: &'a MouthShape,
    /// False when the text carried no recognizable vowel and the closed shape
    /// was substituted.
    pub recognized: bool,
}

impl PhonemeTable {
    /// One image per vowel: `A I U E O` plus `N` for the closed mouth.
    pub fn five_vowel() -> Self {
        let vowels = [
            (Vowel::A, "A"),
            (Vowel::I, "I"),
            (Vowel::U, "U"),
            (Vowel::E, "E"),
            (Vowel::O, "O"),
            (Vowel::N, "N"),
        ]
        .into_iter()
        .map(|(v, k)| (v, MouthShape::new(k)))
        .collect();
        Self {
            closed: MouthShape::new("N"),
            vowels,
            overrides: BTreeMap::new(),
        }
    }

    /// Four images `A O U CLOSED`, with I and E drawn as `A`.
    pub fn reduced() -> Self {
        Self::reduced_with(MouthShape::new("A"))
    }

    /// Four images `A O U CLOSED`, with I and E drawn as `map_ie_to`.
    pub fn reduced_with(map_ie_to: MouthShape) -> Self {
        let closed = MouthShape::new("CLOSED");
        let mut vowels = BTreeMap::new();
        vowels.insert(Vowel::A, MouthShape::new("A"));
        vowels.insert(Vowel::O, MouthShape::new("O"));
        vowels.insert(Vowel::U, MouthShape::new("U"));
        vowels.insert(Vowel::I, map_ie_to.clone());
        vowels.insert(Vowel::E, map_ie_to);
        vowels.insert(Vowel::N, closed.clone());
        Self {
            closed,
            vowels,
            overrides: BTreeMap::new(),
        }
    }

    /// Every shape this table can produce, closed shape included.
    pub fn shapes(&self) -> Vec<&MouthShape> {
        let mut shapes: Vec<&MouthShape> = std::iter::once(&self.closed)
            .chain(self.vowels.values())
            .chain(self.overrides.values())
            .collect();
        shapes.sort();
        shapes.dedup();
        shapes
    }

    pub fn lookup(&self, text: &str) -> ShapeLookup<'_> {
        if let Some(shape) = self.overrides.get(text.trim()) {
            return ShapeLookup {
                shape,
                recognized: true,
            };
        }
        match vowel_of(text) {
            Some(vowel) => ShapeLookup {
                // A table without an entry for the vowel draws it closed
                shape: self.vowels.get(&vowel).unwrap_or(&self.closed),
                recognized: true,
            },
            None => ShapeLookup {
                shape: &self.closed,
                recognized: false,
            },
        }
    }

    pub fn shape_for(&self, text: &str) -> &MouthShape {
        self.lookup(text).shape
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kana_uses_last_voiced_character() {
        assert_eq!(vowel_of("か"), Some(Vowel::A));
        assert_eq!(vowel_of("きょ"), Some(Vowel::I));
        assert_eq!(vowel_of("そー"), Some(Vowel::O));
        assert_eq!(vowel_of("テン"), Some(Vowel::E));
        assert_eq!(vowel_of("ん"), Some(Vowel::N));
    }

    #[test]
    fn romaji_fallback() {
        assert_eq!(vowel_of("ka"), Some(Vowel::A));
        assert_eq!(vowel_of("Shine,"), Some(Vowel::E));
        assert_eq!(vowel_of("n"), Some(Vowel::N));
        assert_eq!(vowel_of("hmm"), None);
    }

    #[test]
    fn reduced_table_folds_i_and_e() {
        let table = PhonemeTable::reduced();
        assert_eq!(table.shape_for("き").as_str(), "A");
        assert_eq!(table.shape_for("ね").as_str(), "A");
        assert_eq!(table.shape_for("ん").as_str(), "CLOSED");

        let table = PhonemeTable::reduced_with(MouthShape::new("U"));
        assert_eq!(table.shape_for("mi").as_str(), "U");
        assert_eq!(table.shapes().len(), 4);
    }

    #[test]
    fn unrecognized_text_is_closed() {
        let table = PhonemeTable::five_vowel();
        let lookup = table.lookup("♪");
        assert!(!lookup.recognized);
        assert_eq!(lookup.shape, &table.closed);
    }

    #[test]
    fn overrides_win() {
        let mut table = PhonemeTable::five_vowel();
        table
            .overrides
            .insert("la".to_string(), MouthShape::new("O"));
        assert_eq!(table.shape_for(" la ").as_str(), "O");
        assert_eq!(table.shape_for("ka").as_str(), "A");
    }
}
